//! Ranking metrics for training reports

use crate::error::{PipelineError, Result};

/// Area under the ROC curve via the rank-sum (Mann-Whitney) statistic.
///
/// Tied scores receive their average rank. Fails when either class is
/// absent or a score is non-finite.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> Result<f64> {
    if labels.len() != scores.len() {
        return Err(PipelineError::shape(labels.len(), scores.len()));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(PipelineError::invalid_score("roc_auc input", *bad));
    }

    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(PipelineError::TrainingError(
            "ROC-AUC needs both positive and negative labels".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; ties share the mean of start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        positive_rank_sum += rank * order[start..end].iter().filter(|&&i| labels[i]).count() as f64;
        start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_and_inverted_ranking() {
        let labels = [false, false, true, true];
        assert_eq!(roc_auc(&labels, &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&labels, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 0.0);
    }

    #[test]
    fn test_ties_count_half() {
        let labels = [false, true];
        assert_eq!(roc_auc(&labels, &[0.5, 0.5]).unwrap(), 0.5);

        // One of two negatives outranked, one tied
        let labels = [false, false, true];
        assert_eq!(roc_auc(&labels, &[0.1, 0.7, 0.7]).unwrap(), 0.75);
    }

    #[test]
    fn test_single_class_rejected() {
        assert!(roc_auc(&[true, true], &[0.1, 0.2]).is_err());
        assert!(roc_auc(&[true], &[0.1, 0.2]).is_err());
    }
}
