//! Offline model training
//!
//! `anomaly` fits the per-transaction ensemble and writes its artifacts,
//! `graph` trains the account-graph network, `score-graph` runs offline
//! node scoring with a trained network.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fraud_anomaly_pipeline::config::AppConfig;
use fraud_anomaly_pipeline::graph::{
    generate_synthetic_graph, AccountGraph, FraudGnn, GraphBuilder,
};
use fraud_anomaly_pipeline::logging;
use fraud_anomaly_pipeline::models::evaluation::roc_auc;
use fraud_anomaly_pipeline::models::{train_pipeline, ScoringService, TrainingLock};
use fraud_anomaly_pipeline::synthetic::TransactionGenerator;
use fraud_anomaly_pipeline::types::{LabeledTransaction, TransactionRecord};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "train_models")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train the fraud anomaly models")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Overrides models.models_dir
    #[arg(long)]
    models_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the autoencoder + isolation forest ensemble
    Anomaly(DataSource),
    /// Train the account-graph network
    Graph {
        /// Build the graph from scored, labelled transactions instead of
        /// generating a synthetic one
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Score every account with a trained graph network
    ScoreGraph {
        /// Labelled or unlabelled transactions (JSON Lines); synthetic graph when absent
        #[arg(long)]
        data: Option<PathBuf>,
        /// Accounts listed in the output
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

/// Transaction row whose label may be absent
#[derive(Deserialize)]
struct GraphRow {
    #[serde(flatten)]
    record: TransactionRecord,
    is_fraud: Option<bool>,
}

#[derive(Args)]
struct DataSource {
    /// JSON Lines file of transactions with an `is_fraud` flag
    #[arg(long, conflicts_with = "synthetic")]
    data: Option<PathBuf>,

    /// Generate this many synthetic transactions instead
    #[arg(long, default_value_t = 20_000)]
    synthetic: usize,

    #[arg(long, default_value_t = 0.01)]
    fraud_rate: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        AppConfig::load_from_path(&cli.config)?
    } else {
        AppConfig::default()
    };
    if let Some(dir) = cli.models_dir {
        config.models.models_dir = dir;
    }
    logging::init_tracing(&config.logging);

    match cli.command {
        Commands::Anomaly(source) => train_anomaly(&config, &source),
        Commands::Graph { data } => train_graph(&config, data.as_deref()),
        Commands::ScoreGraph { data, top } => score_graph(&config, data.as_deref(), top),
    }
}

fn train_anomaly(config: &AppConfig, source: &DataSource) -> Result<()> {
    let data = match &source.data {
        Some(path) => read_jsonl::<LabeledTransaction>(path)?,
        None => {
            info!(
                records = source.synthetic,
                fraud_rate = source.fraud_rate,
                "Generating synthetic training data"
            );
            TransactionGenerator::new(source.seed).labeled_dataset(source.synthetic, source.fraud_rate)
        }
    };

    let models_dir = Path::new(&config.models.models_dir);
    let lock = TrainingLock::acquire(models_dir)?;

    let (artifacts, report) = train_pipeline(&data, &config.training)?;
    artifacts.save_locked(&lock)?;

    info!(
        models_dir = %models_dir.display(),
        epochs = report.autoencoder.train_losses.len(),
        best_epoch = report.autoencoder.best_epoch,
        stopped_early = report.autoencoder.stopped_early,
        threshold = report.threshold,
        roc_auc = report.roc_auc,
        fraud_recall = report.fraud_recall,
        validation_flag_rate = report.validation_flag_rate,
        "Anomaly models trained"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn train_graph(config: &AppConfig, data: Option<&Path>) -> Result<()> {
    let graph = match data {
        Some(path) => build_graph(config, path)?.0,
        None => generate_synthetic_graph(&config.graph.synthetic)?,
    };
    info!(nodes = graph.n_nodes(), edges = graph.n_edges(), "Account graph ready");

    let models_dir = Path::new(&config.models.models_dir);
    let lock = TrainingLock::acquire(models_dir)?;

    let mut gnn = FraudGnn::new(&config.graph.gnn)?;
    let history = gnn.fit(&graph, &config.graph.gnn)?;
    gnn.save(&lock)?;

    if let Some((epoch, auc)) = history.roc_auc.last() {
        info!(epoch, roc_auc = auc, "Graph network trained");
    }
    Ok(())
}

fn score_graph(config: &AppConfig, data: Option<&Path>, top: usize) -> Result<()> {
    let gnn = FraudGnn::load(&config.models.models_dir)?;

    let (graph, names) = match data {
        Some(path) => build_graph(config, path)?,
        None => {
            let graph = generate_synthetic_graph(&config.graph.synthetic)?;
            let ids = (0..graph.n_nodes()).map(|i| format!("node_{}", i)).collect();
            (graph, ids)
        }
    };

    let probabilities = gnn.predict(&graph)?;
    if let Some(labels) = graph.labels() {
        match roc_auc(labels, &probabilities.to_vec()) {
            Ok(auc) => info!(roc_auc = auc, "Graph scoring evaluated"),
            Err(e) => warn!(error = %e, "ROC-AUC unavailable"),
        }
    }

    let mut ranked: Vec<(usize, f64)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (node, probability) in ranked.into_iter().take(top) {
        println!("{}\t{:.4}", names[node], probability);
    }
    Ok(())
}

/// Score transactions with the trained ensemble and aggregate them per account
fn build_graph(config: &AppConfig, path: &Path) -> Result<(AccountGraph, Vec<String>)> {
    let scoring = ScoringService::from_config(config)
        .context("graph features need trained anomaly models")?;
    let mut builder = GraphBuilder::new();

    for row in read_jsonl::<GraphRow>(path)? {
        let prediction = scoring.score(&row.record)?;
        builder.add(&row.record, prediction.ae_score, prediction.if_score, row.is_fraud);
    }

    let graph = builder.build()?;
    Ok((graph, builder.account_ids()))
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        records.push(record);
    }
    info!(records = records.len(), path = %path.display(), "Transactions loaded");
    Ok(records)
}
