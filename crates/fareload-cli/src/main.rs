//! `fareload` binary.
//!
//! Reads `fareload.toml` (or the path given with `--config`), opens the
//! SQLite store and either reconciles a batch file, prints history and
//! decisions, or serves the JSON API over HTTP.

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use fareload_api::ApiState;
use fareload_core::{
  batch::Batch,
  load::LoadType,
  record::BusinessKey,
  run::Pipeline,
  store::{LoadQuery, RecordStore},
};
use fareload_store_sqlite::SqliteStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[derive(Parser)]
#[command(author, version, about = "Fare data reconciliation pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "fareload.toml")]
  config: PathBuf,

  /// Dataset to operate on, overriding the configured one.
  #[arg(long, global = true)]
  dataset: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Reconcile a JSON array of rows into the dataset.
  Load {
    file:        PathBuf,
    /// Treat every active record absent from the file as deleted and force
    /// a full reload.
    #[arg(long)]
    full:        bool,
    /// Run even when the file holds no rows.
    #[arg(long)]
    allow_empty: bool,
  },
  /// Print recent loads, newest first.
  History {
    #[arg(long, default_value_t = 30)]
    days:  u32,
    #[arg(long, default_value_t = 10)]
    limit: usize,
  },
  /// Print the retrain decision for the latest load.
  Decide,
  /// Print every stored version of a business key.
  Record { key: String },
  /// Serve the JSON API.
  Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let mut settings = Settings::load(cli.config)?;
  if let Some(dataset) = cli.dataset {
    settings.dataset = dataset;
  }

  let store_path = settings.resolved_store_path();
  let store = SqliteStore::open_with(&store_path, settings.store.options())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let pipeline = Pipeline::new(
    Arc::new(store),
    settings.pipeline.clone(),
    settings.retrain.clone(),
  );

  match cli.command {
    Command::Load { file, full, allow_empty } => {
      load(&pipeline, &settings.dataset, file, full, allow_empty).await
    }
    Command::History { days, limit } => {
      let query = LoadQuery {
        dataset: settings.dataset.clone(),
        since:   Some(Utc::now() - Duration::days(i64::from(days))),
        limit:   Some(limit),
      };
      let loads = pipeline
        .store()
        .load_history(&query)
        .await
        .context("failed to read load history")?;
      print_json(&loads)
    }
    Command::Decide => {
      let decision = pipeline
        .decide(pipeline.store().as_ref(), &settings.dataset, Utc::now())
        .await;
      print_json(&decision)
    }
    Command::Record { key } => {
      let key = BusinessKey::from_canonical(key);
      let versions = pipeline
        .store()
        .record_history(&settings.dataset, &key)
        .await
        .context("failed to read record history")?;
      if versions.is_empty() {
        anyhow::bail!("no versions stored for {key}");
      }
      print_json(&versions)
    }
    Command::Serve => serve(pipeline, &settings).await,
  }
}

async fn load(
  pipeline: &Pipeline<SqliteStore>,
  dataset: &str,
  file: PathBuf,
  full: bool,
  allow_empty: bool,
) -> anyhow::Result<()> {
  let bytes = tokio::fs::read(&file)
    .await
    .with_context(|| format!("failed to read {file:?}"))?;
  let batch = Batch::from_json_slice(&bytes)
    .with_context(|| format!("failed to parse {file:?}"))?;
  if batch.is_empty() && !allow_empty {
    tracing::info!(file = %file.display(), "no data to transfer");
    return Ok(());
  }

  let load_type = if full { LoadType::Full } else { LoadType::Incremental };

  // Ctrl-C rolls the open transaction back instead of killing the process
  // mid-write.
  let cancel = CancellationToken::new();
  let watcher = tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupt received, cancelling run");
        cancel.cancel();
      }
    }
  });

  let result = pipeline.run(dataset, batch, load_type, cancel).await;
  watcher.abort();
  let report = result.context("run failed")?;
  print_json(&report)?;

  let decision = pipeline
    .decide_for(pipeline.store().as_ref(), &report.metadata, Utc::now())
    .await;
  if decision.should_retrain {
    let reasons: Vec<&str> =
      decision.reasons.iter().map(|r| r.as_str()).collect();
    tracing::info!(reasons = ?reasons, "retraining recommended");
  }
  print_json(&decision)
}

async fn serve(
  pipeline: Pipeline<SqliteStore>,
  settings: &Settings,
) -> anyhow::Result<()> {
  let state = ApiState {
    pipeline,
    dataset: Arc::from(settings.dataset.as_str()),
  };
  let app = fareload_api::api_router(state);
  let address = format!("{}:{}", settings.host, settings.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("server error")?;

  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let out =
    serde_json::to_string_pretty(value).context("failed to encode output")?;
  println!("{out}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory as _;

  use super::*;

  #[test]
  fn cli_is_well_formed() { Cli::command().debug_assert(); }

  #[test]
  fn load_flags_parse() {
    let cli = Cli::parse_from([
      "fareload",
      "load",
      "fares.json",
      "--full",
      "--dataset",
      "fares",
    ]);
    assert_eq!(cli.dataset.as_deref(), Some("fares"));
    let Command::Load { file, full, allow_empty } = cli.command else {
      panic!("expected load");
    };
    assert_eq!(file, PathBuf::from("fares.json"));
    assert!(full);
    assert!(!allow_empty);
  }
}
