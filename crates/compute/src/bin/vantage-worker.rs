//! vantage-worker: run one module over a dataset file and print the result
//! followed by the task metrics.
//!
//! The module runs through the task manager, so repeated requests within a
//! run (`--repeat`) are served from the cache.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use vantage_compute::{SupportedModule, TaskManager, TaskManagerConfig};
use vantage_core::{config, Config, DatasetSource, InMemoryDataset, ModuleOptions, NamedDatasetFilters, SplitName};

/// Compute module results over a dataset split.
#[derive(Parser, Debug)]
#[command(name = "vantage-worker", version, about)]
struct Cli {
    /// Path to the dataset JSON document.
    #[arg(long, env = "VANTAGE_DATASET_PATH")]
    dataset: Option<PathBuf>,

    /// Split to run on.
    #[arg(long, default_value = "validation")]
    split: String,

    /// Module to run (metrics, metrics_per_filter, class_distribution).
    #[arg(long, default_value = "metrics")]
    module: SupportedModule,

    /// Pipeline whose predictions are evaluated.
    #[arg(long)]
    pipeline_index: Option<usize>,

    /// Keep only utterances with this label (repeatable).
    #[arg(long)]
    label: Vec<String>,

    /// Keep only utterances with this prediction (repeatable).
    #[arg(long)]
    prediction: Vec<String>,

    /// Keep only utterances whose text contains this string.
    #[arg(long)]
    utterance: Option<String>,

    /// Number of times to request the result.
    #[arg(long, default_value_t = 1)]
    repeat: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let path = cli
        .dataset
        .or_else(|| config.dataset.path.clone())
        .context("no dataset given (use --dataset or VANTAGE_DATASET_PATH)")?;
    let dataset = Arc::new(
        InMemoryDataset::load(&path)
            .with_context(|| format!("failed to load dataset {}", path.display()))?,
    );

    let manager =
        TaskManager::with_standard_modules(TaskManagerConfig::from(&config.compute), dataset.clone());

    let named = NamedDatasetFilters {
        label: cli.label,
        prediction: cli.prediction,
        outcome: Vec::new(),
        utterance: cli.utterance,
    };
    let filters = named.to_dataset_filters(&dataset.class_names())?;
    let options = ModuleOptions::new(filters, cli.pipeline_index);
    let split = SplitName::from(cli.split);

    let mut last = None;
    for _ in 0..cli.repeat.max(1) {
        let result = manager
            .get_result(cli.module, &split, &options, dataset.last_update())
            .await?;
        last = Some(result);
    }

    if let Some(result) = last {
        println!("{}", serde_json::to_string_pretty(result.as_ref())?);
    }

    let metrics = manager.metrics();
    info!(
        cache_hits = metrics.cache_hits,
        coalesced = metrics.coalesced_requests,
        cached_results = metrics.cached_results,
        "Done"
    );
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
