//! Adam optimizer shared by the autoencoder and graph trainers

use ndarray::{Array, Dimension};

/// Adam with bias-corrected moment estimates.
///
/// Parameters are addressed by slot index; each slot keeps its own first
/// and second moments. Call [`Adam::begin_step`] once per optimisation
/// step, before updating the slots for that step.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// Apply one Adam update to `param` in place.
    pub fn update<D: Dimension>(
        &mut self,
        slot: usize,
        param: &mut Array<f64, D>,
        grad: &Array<f64, D>,
    ) {
        if self.m.len() <= slot {
            self.m.resize(slot + 1, Vec::new());
            self.v.resize(slot + 1, Vec::new());
        }
        if self.m[slot].len() != param.len() {
            self.m[slot] = vec![0.0; param.len()];
            self.v[slot] = vec![0.0; param.len()];
        }

        let t = self.t.max(1);
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2) = (self.beta1, self.beta2);

        let moments = self.m[slot].iter_mut().zip(self.v[slot].iter_mut());
        for ((p, &g), (m, v)) in param.iter_mut().zip(grad.iter()).zip(moments) {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;

            let m_hat = *m / bias_correction1;
            let v_hat = *v / bias_correction2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(0.1);
        let mut param = array![1.0, -1.0];
        let grad = array![0.5, -2.0];

        adam.begin_step();
        adam.update(0, &mut param, &grad);

        // Bias-corrected first step is lr * sign(grad)
        assert!((param[0] - 0.9).abs() < 1e-6);
        assert!((param[1] + 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = Adam::new(0.05);
        let mut param = array![[3.0, -4.0]];
        for _ in 0..500 {
            let grad = param.mapv(|p| 2.0 * p);
            adam.begin_step();
            adam.update(0, &mut param, &grad);
        }
        assert!(param.iter().all(|p| p.abs() < 0.1));
    }
}
