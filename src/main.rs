// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use tweet_fanout::{join_all, load_config_with_env, Batch, StorageManager, TagSet};

/// Tweet fanout - Save collected records to every subscribed storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// JSON file holding the batch to save
    #[arg(short, long)]
    batch: Option<PathBuf>,

    /// Tags of the rules that produced the batch
    #[arg(short, long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Main storage name (overrides config file)
    #[arg(short, long)]
    main_storage: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config_with_env(&args.config)?;

    if let Some(main_storage) = args.main_storage {
        config.main_storage = main_storage;
        tweet_fanout::config::ConfigLoader::validate(&config)?;
    }

    // Initialize tracing with configured level
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Loaded configuration from: {:?}", args.config);

    let manager = StorageManager::from_config(&config).await?;

    info!("\n{}", manager);
    for (name, free) in manager.free_space_report() {
        if !free {
            warn!("Storage '{}' has no free space left", name);
        }
    }

    let Some(batch_path) = args.batch else {
        info!("No batch given, nothing to save");
        return Ok(());
    };

    let content = tokio::fs::read_to_string(&batch_path)
        .await
        .with_context(|| format!("Failed to read batch file {}", batch_path.display()))?;
    let batch: Batch = serde_json::from_str(&content).context("Failed to parse batch")?;
    let tags: TagSet = args.tags.into_iter().collect();

    info!(
        "Saving {} records ({:?}) tagged [{}]",
        batch.record_count(),
        batch.kinds(),
        tags
    );

    let outcomes = join_all(manager.save_bulk(batch, &tags)).await;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => info!("{} saved to '{}'", outcome.kind, outcome.backend),
            Err(e) => error!("{}", e),
        }
    }

    let failures = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failures > 0 {
        bail!("{} of {} writes failed", failures, outcomes.len());
    }

    info!("Batch saved to {} storages", outcomes.len());
    Ok(())
}
