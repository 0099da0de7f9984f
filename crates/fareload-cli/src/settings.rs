//! Configuration for the `fareload` binary.
//!
//! Read from a TOML file layered with `FARELOAD_*` environment variables.
//! Nested keys use a double underscore, e.g.
//! `FARELOAD_PIPELINE__LOCK_TTL_SECS=600`.

use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use fareload_core::{retrain::RetrainThresholds, run::PipelineConfig};
use fareload_store_sqlite::StoreOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path: PathBuf,
  pub dataset:    String,
  pub host:       String,
  pub port:       u16,
  pub store:      StoreSettings,
  pub pipeline:   PipelineConfig,
  pub retrain:    RetrainThresholds,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("fareload.db"),
      dataset:    "flights".to_string(),
      host:       "127.0.0.1".to_string(),
      port:       8080,
      store:      StoreSettings::default(),
      pipeline:   PipelineConfig::default(),
      retrain:    RetrainThresholds::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
  pub chunk_size:               usize,
  pub transaction_timeout_secs: u64,
  pub busy_timeout_ms:          u64,
}

impl Default for StoreSettings {
  fn default() -> Self {
    let options = StoreOptions::default();
    Self {
      chunk_size:               options.chunk_size,
      transaction_timeout_secs: options.transaction_timeout.as_secs(),
      busy_timeout_ms:          options.busy_timeout.as_millis() as u64,
    }
  }
}

impl StoreSettings {
  pub fn options(&self) -> StoreOptions {
    StoreOptions {
      chunk_size:          self.chunk_size.max(1),
      transaction_timeout: Duration::from_secs(self.transaction_timeout_secs),
      busy_timeout:        Duration::from_millis(self.busy_timeout_ms),
    }
  }
}

impl Settings {
  /// Load settings from `path` (optional) and the environment.
  pub fn load(path: PathBuf) -> anyhow::Result<Self> {
    Self::from_builder(
      config::Config::builder()
        .add_source(config::File::from(path).required(false)),
    )
  }

  fn from_builder(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> anyhow::Result<Self> {
    builder
      .add_source(
        config::Environment::with_prefix("FARELOAD")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise settings")
  }

  /// Expand a leading `~` in `store_path` to the user's home directory.
  pub fn resolved_store_path(&self) -> PathBuf {
    let s = self.store_path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
      && let Ok(home) = std::env::var("HOME")
    {
      return PathBuf::from(home).join(rest);
    }
    self.store_path.clone()
  }
}

#[cfg(test)]
mod tests {
  use config::{File, FileFormat};

  use super::*;

  fn parse(toml: &str) -> Settings {
    Settings::from_builder(
      config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
    )
    .unwrap()
  }

  #[test]
  fn empty_file_uses_defaults() {
    let s = parse("");
    assert_eq!(s.dataset, "flights");
    assert_eq!(s.store.chunk_size, 5000);
    assert_eq!(s.store.transaction_timeout_secs, 300);
    assert_eq!(s.pipeline.lock_ttl_secs, 900);
    assert_eq!(s.pipeline.full_load_threshold, Some(50.0));
    assert_eq!(s.retrain, RetrainThresholds::default());
  }

  #[test]
  fn nested_sections_override_defaults() {
    let s = parse(
      r#"
        dataset = "fares"

        [store]
        chunk_size = 250

        [pipeline]
        lock_ttl_secs = 60

        [retrain]
        min_new_records = 10
      "#,
    );
    assert_eq!(s.dataset, "fares");
    assert_eq!(s.store.options().chunk_size, 250);
    assert_eq!(
      s.store.options().transaction_timeout,
      Duration::from_secs(300)
    );
    assert_eq!(s.pipeline.lock_ttl_secs, 60);
    assert_eq!(s.retrain.min_new_records, 10);
    assert_eq!(s.retrain.min_change_percentage, 5.0);
  }

  #[test]
  fn absolute_store_path_is_unchanged() {
    let s = Settings {
      store_path: PathBuf::from("/var/lib/fareload.db"),
      ..Default::default()
    };
    assert_eq!(s.resolved_store_path(), PathBuf::from("/var/lib/fareload.db"));
  }
}
