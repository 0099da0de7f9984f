//! Shared fixtures for unit tests.

use std::{
  collections::HashMap,
  sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  batch::HashedRecord,
  diff::{Change, ChangeSet},
  index::{ActiveEntry, ActiveIndex},
  load::{LoadMetadata, RunStamp, summarize},
  record::{BusinessKey, FareRecord, StoredRecord},
  store::{LoadQuery, LockOutcome, ModelRegistry, RecordStore},
  training::ModelTrainingRecord,
};

fn base_departure() -> NaiveDateTime {
  NaiveDate::from_ymd_opt(2025, 3, 1)
    .and_then(|d| d.and_hms_opt(9, 30, 0))
    .unwrap()
}

pub fn sample() -> FareRecord {
  FareRecord {
    airline:               "US-Bangla Airlines".into(),
    source_code:           "DAC".into(),
    destination_code:      "CXB".into(),
    departure_datetime:    base_departure(),
    travel_class:          "Economy".into(),
    booking_source:        "Online Website".into(),
    source_name:           None,
    destination_name:      None,
    arrival_datetime:      None,
    duration_hrs:          Some(1.0),
    stopovers:             Some("Direct".into()),
    aircraft_type:         None,
    base_fare_bdt:         Some(4500.0),
    tax_surcharge_bdt:     Some(500.0),
    total_fare_bdt:        Some(5000.0),
    seasonality:           Some("Regular".into()),
    days_before_departure: Some(14),
  }
}

/// A record whose business key is unique per `n` (departure shifted by `n`
/// hours) with the given total fare.
pub fn fare(n: i64, total: f64) -> FareRecord {
  FareRecord {
    departure_datetime: base_departure() + Duration::hours(n),
    total_fare_bdt: Some(total),
    ..sample()
  }
}

pub fn hashed(n: i64, total: f64) -> HashedRecord {
  HashedRecord::new(fare(n, total))
}

// ─── MemoryStore ─────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
  #[error("injected failure")]
  Injected,
  #[error("cancelled")]
  Cancelled,
}

#[derive(Default)]
struct Inner {
  rows:                Vec<StoredRecord>,
  loads:               Vec<LoadMetadata>,
  locks:               HashMap<String, (Uuid, DateTime<Utc>)>,
  fail_next_apply:     bool,
  /// Park the next apply until its token is cancelled.
  stall_next_apply:    bool,
  /// Hand the lock to this holder when a run next refreshes it.
  takeover_on_refresh: Option<Uuid>,
}

/// A `RecordStore` kept in memory, for exercising the pipeline without a
/// database. It is also a `ModelRegistry` with no production model.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  fn inner(&self) -> MutexGuard<'_, Inner> { self.inner.lock().unwrap() }

  pub fn hold_lock(&self, dataset: &str, holder: Uuid) {
    let expires_at = Utc::now() + Duration::hours(1);
    self.inner().locks.insert(dataset.to_owned(), (holder, expires_at));
  }

  pub fn fail_next_apply(&self) { self.inner().fail_next_apply = true; }

  pub fn stall_next_apply(&self) { self.inner().stall_next_apply = true; }

  pub fn take_over_lock_on_refresh(&self, holder: Uuid) {
    self.inner().takeover_on_refresh = Some(holder);
  }

  pub fn lock_holder(&self, dataset: &str) -> Option<Uuid> {
    self.inner().locks.get(dataset).map(|&(by, _)| by)
  }

  pub fn loads(&self) -> Vec<LoadMetadata> { self.inner().loads.clone() }

  pub fn row_count(&self) -> usize { self.inner().rows.len() }
}

impl RecordStore for MemoryStore {
  type Error = MemoryError;

  async fn try_lock_run<'a>(
    &'a self,
    dataset: &'a str,
    run_id: Uuid,
    ttl: Duration,
  ) -> Result<LockOutcome, MemoryError> {
    let now = Utc::now();
    let mut inner = self.inner();
    if inner.locks.get(dataset).is_some_and(|(by, _)| *by == run_id) {
      if let Some(thief) = inner.takeover_on_refresh.take() {
        inner
          .locks
          .insert(dataset.to_owned(), (thief, now + Duration::hours(1)));
      }
    }
    if let Some(&(by, expires_at)) = inner.locks.get(dataset) {
      if by != run_id && expires_at > now {
        return Ok(LockOutcome::Held { by, expires_at });
      }
    }
    inner.locks.insert(dataset.to_owned(), (run_id, now + ttl));
    Ok(LockOutcome::Acquired)
  }

  async fn release_run<'a>(
    &'a self,
    dataset: &'a str,
    run_id: Uuid,
  ) -> Result<(), MemoryError> {
    let mut inner = self.inner();
    if inner.locks.get(dataset).is_some_and(|(by, _)| *by == run_id) {
      inner.locks.remove(dataset);
    }
    Ok(())
  }

  async fn active_index<'a>(
    &'a self,
    dataset: &'a str,
  ) -> Result<ActiveIndex, MemoryError> {
    Ok(
      self
        .inner()
        .rows
        .iter()
        .filter(|r| r.dataset == dataset && r.is_active)
        .map(|r| {
          (r.business_key.clone(), ActiveEntry {
            content_hash: r.content_hash.clone(),
            record_id:    r.record_id,
          })
        })
        .collect(),
    )
  }

  async fn apply(
    &self,
    stamp: RunStamp,
    changes: ChangeSet,
    cancel: CancellationToken,
  ) -> Result<LoadMetadata, MemoryError> {
    let stall = std::mem::take(&mut self.inner().stall_next_apply);
    if stall {
      cancel.cancelled().await;
      return Err(MemoryError::Cancelled);
    }

    let mut inner = self.inner();
    if cancel.is_cancelled() {
      return Err(MemoryError::Cancelled);
    }
    if std::mem::take(&mut inner.fail_next_apply) {
      return Err(MemoryError::Injected);
    }

    let now = Utc::now();
    let counts = changes.counts();
    for change in changes.changes {
      let (closes, writes) = match change {
        Change::Insert(record) => (None, Some((record, None))),
        Change::Update { previous, record } => {
          (Some(previous), Some((record, Some(previous))))
        }
        Change::Unchanged { .. } => (None, None),
        Change::Delete { record_id, .. } => (Some(record_id), None),
      };
      if let Some(id) = closes {
        for row in inner.rows.iter_mut().filter(|r| r.record_id == id) {
          row.is_active = false;
          row.deactivated_at = Some(now);
        }
      }
      if let Some((hashed, supersedes)) = writes {
        inner.rows.push(StoredRecord {
          record_id: Uuid::new_v4(),
          dataset: stamp.dataset.clone(),
          business_key: hashed.key,
          content_hash: hashed.hash,
          season_category: hashed.record.season_category(),
          record: hashed.record,
          is_active: true,
          ingestion_timestamp: now,
          deactivated_at: None,
          run_id: stamp.run_id,
          supersedes,
        });
      }
    }

    let metadata = summarize(&stamp, counts, now);
    inner.loads.push(metadata.clone());
    Ok(metadata)
  }

  async fn active_count<'a>(
    &'a self,
    dataset: &'a str,
  ) -> Result<u64, MemoryError> {
    Ok(
      self
        .inner()
        .rows
        .iter()
        .filter(|r| r.dataset == dataset && r.is_active)
        .count() as u64,
    )
  }

  async fn latest_load<'a>(
    &'a self,
    dataset: &'a str,
  ) -> Result<Option<LoadMetadata>, MemoryError> {
    Ok(
      self
        .inner()
        .loads
        .iter()
        .rev()
        .find(|l| l.dataset == dataset)
        .cloned(),
    )
  }

  async fn load_history<'a>(
    &'a self,
    query: &'a LoadQuery,
  ) -> Result<Vec<LoadMetadata>, MemoryError> {
    Ok(
      self
        .inner()
        .loads
        .iter()
        .rev()
        .filter(|l| l.dataset == query.dataset)
        .filter(|l| query.since.is_none_or(|s| l.load_timestamp >= s))
        .take(query.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect(),
    )
  }

  async fn record_history<'a>(
    &'a self,
    dataset: &'a str,
    key: &'a BusinessKey,
  ) -> Result<Vec<StoredRecord>, MemoryError> {
    Ok(
      self
        .inner()
        .rows
        .iter()
        .rev()
        .filter(|r| r.dataset == dataset && &r.business_key == key)
        .cloned()
        .collect(),
    )
  }
}

impl ModelRegistry for MemoryStore {
  type Error = MemoryError;

  async fn last_production_training(
    &self,
  ) -> Result<Option<ModelTrainingRecord>, MemoryError> {
    Ok(None)
  }
}
