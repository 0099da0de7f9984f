//! Load metadata: the immutable audit row written at the end of every
//! successful run.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

// ─── LoadType ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
  /// Every previously active key is closed and every incoming key inserted.
  Full,
  /// Reconcile against the active set.
  Incremental,
}

impl LoadType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Full => "FULL",
      Self::Incremental => "INCREMENTAL",
    }
  }
}

impl fmt::Display for LoadType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for LoadType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "FULL" => Ok(Self::Full),
      "INCREMENTAL" => Ok(Self::Incremental),
      _ => Err(Error::UnknownLoadType(s.to_owned())),
    }
  }
}

// ─── Counts ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
  pub inserted:  u64,
  pub updated:   u64,
  pub deleted:   u64,
  pub unchanged: u64,
}

/// Structural churn: arrivals and departures of entities relative to the
/// previously active set. Updates and unchanged rows do not count.
pub fn change_percentage(
  inserted: u64,
  deleted: u64,
  previous_active_count: u64,
) -> f64 {
  100.0 * (inserted + deleted) as f64 / previous_active_count.max(1) as f64
}

// ─── Run stamp ───────────────────────────────────────────────────────────────

/// Everything about a run that is known before its changes are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStamp {
  pub run_id:                Uuid,
  pub dataset:               String,
  pub load_type:             LoadType,
  pub started_at:            DateTime<Utc>,
  pub previous_active_count: u64,
  pub records_rejected:      u64,
  pub duplicate_keys:        u64,
}

// ─── LoadMetadata ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadMetadata {
  pub run_id:                Uuid,
  pub dataset:               String,
  /// When the run's transaction was summarised (just before commit).
  pub load_timestamp:        DateTime<Utc>,
  pub load_type:             LoadType,
  pub records_inserted:      u64,
  pub records_updated:       u64,
  pub records_deleted:       u64,
  pub records_unchanged:     u64,
  pub records_rejected:      u64,
  pub duplicate_keys:        u64,
  pub previous_active_count: u64,
  pub change_percentage:     f64,
  pub started_at:            DateTime<Utc>,
  pub execution_time_ms:     u64,
}

impl LoadMetadata {
  pub fn counts(&self) -> ChangeCounts {
    ChangeCounts {
      inserted:  self.records_inserted,
      updated:   self.records_updated,
      deleted:   self.records_deleted,
      unchanged: self.records_unchanged,
    }
  }
}

/// Summarise a run into its audit row.
pub fn summarize(
  stamp: &RunStamp,
  counts: ChangeCounts,
  finished_at: DateTime<Utc>,
) -> LoadMetadata {
  let execution_time_ms = (finished_at - stamp.started_at)
    .num_milliseconds()
    .max(0) as u64;

  LoadMetadata {
    run_id: stamp.run_id,
    dataset: stamp.dataset.clone(),
    load_timestamp: finished_at,
    load_type: stamp.load_type,
    records_inserted: counts.inserted,
    records_updated: counts.updated,
    records_deleted: counts.deleted,
    records_unchanged: counts.unchanged,
    records_rejected: stamp.records_rejected,
    duplicate_keys: stamp.duplicate_keys,
    previous_active_count: stamp.previous_active_count,
    change_percentage: change_percentage(
      counts.inserted,
      counts.deleted,
      stamp.previous_active_count,
    ),
    started_at: stamp.started_at,
    execution_time_ms,
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  #[test]
  fn change_percentage_counts_arrivals_and_departures() {
    assert_eq!(change_percentage(40, 10, 1000), 5.0);
    assert_eq!(change_percentage(0, 0, 1000), 0.0);
  }

  #[test]
  fn change_percentage_on_empty_store_uses_one() {
    assert_eq!(change_percentage(3, 0, 0), 300.0);
  }

  #[test]
  fn summarize_fills_every_field() {
    let started_at = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
    let stamp = RunStamp {
      run_id: Uuid::new_v4(),
      dataset: "flights".into(),
      load_type: LoadType::Incremental,
      started_at,
      previous_active_count: 1000,
      records_rejected: 3,
      duplicate_keys: 2,
    };
    let counts = ChangeCounts {
      inserted:  40,
      updated:   7,
      deleted:   10,
      unchanged: 943,
    };
    let md = summarize(&stamp, counts, started_at + Duration::milliseconds(1500));

    assert_eq!(md.run_id, stamp.run_id);
    assert_eq!(md.change_percentage, 5.0);
    assert_eq!(md.execution_time_ms, 1500);
    assert_eq!(md.records_rejected, 3);
    assert_eq!(md.duplicate_keys, 2);
    assert_eq!(md.counts(), counts);
  }

  #[test]
  fn load_type_parses_case_insensitively() {
    assert_eq!("full".parse::<LoadType>().unwrap(), LoadType::Full);
    assert_eq!(
      " Incremental ".parse::<LoadType>().unwrap(),
      LoadType::Incremental
    );
    assert!("delta".parse::<LoadType>().is_err());
  }
}
