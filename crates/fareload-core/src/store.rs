//! The `RecordStore` and `ModelRegistry` traits and supporting query types.
//!
//! The traits are implemented by storage backends (e.g.
//! `fareload-store-sqlite`). The pipeline, the API and the CLI depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  diff::ChangeSet,
  index::ActiveIndex,
  load::{LoadMetadata, RunStamp},
  record::{BusinessKey, StoredRecord},
  training::ModelTrainingRecord,
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`RecordStore::load_history`].
#[derive(Debug, Clone, Default)]
pub struct LoadQuery {
  pub dataset: String,
  /// Only loads at or after this instant.
  pub since:   Option<DateTime<Utc>>,
  pub limit:   Option<usize>,
}

/// Result of [`RecordStore::try_lock_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
  Acquired,
  /// Another live run holds the lock.
  Held { by: Uuid, expires_at: DateTime<Utc> },
}

// ─── RecordStore ─────────────────────────────────────────────────────────────

/// Abstraction over a persisted fare-record store.
///
/// Records are append-only: a version is closed by clearing its active flag,
/// never removed. Load metadata rows are immutable once written.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Run lock ──────────────────────────────────────────────────────────

  /// Take the per-dataset run lock for `run_id`. A lock whose holder has not
  /// released it within `ttl` is considered abandoned and may be taken over.
  /// Calling this again for the run that holds the lock extends its expiry.
  fn try_lock_run<'a>(
    &'a self,
    dataset: &'a str,
    run_id: Uuid,
    ttl: Duration,
  ) -> impl Future<Output = Result<LockOutcome, Self::Error>> + Send + 'a;

  /// Release the lock if `run_id` still holds it. Releasing a lock that is not
  /// held is not an error.
  fn release_run<'a>(
    &'a self,
    dataset: &'a str,
    run_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Reconciliation ────────────────────────────────────────────────────

  /// Snapshot of the active set for `dataset`.
  fn active_index<'a>(
    &'a self,
    dataset: &'a str,
  ) -> impl Future<Output = Result<ActiveIndex, Self::Error>> + Send + 'a;

  /// Apply `changes` and record the run's load metadata in one atomic
  /// transaction.
  ///
  /// On any error, including cancellation through `cancel` and the backend's
  /// transaction timeout, the store is left exactly as it was and no metadata
  /// row is written.
  fn apply(
    &self,
    stamp: RunStamp,
    changes: ChangeSet,
    cancel: CancellationToken,
  ) -> impl Future<Output = Result<LoadMetadata, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn active_count<'a>(
    &'a self,
    dataset: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// The most recent load for `dataset`, if any.
  fn latest_load<'a>(
    &'a self,
    dataset: &'a str,
  ) -> impl Future<Output = Result<Option<LoadMetadata>, Self::Error>> + Send + 'a;

  /// Loads matching `query`, newest first.
  fn load_history<'a>(
    &'a self,
    query: &'a LoadQuery,
  ) -> impl Future<Output = Result<Vec<LoadMetadata>, Self::Error>> + Send + 'a;

  /// Every version ever written for `key`, newest first.
  fn record_history<'a>(
    &'a self,
    dataset: &'a str,
    key: &'a BusinessKey,
  ) -> impl Future<Output = Result<Vec<StoredRecord>, Self::Error>> + Send + 'a;
}

// ─── ModelRegistry ───────────────────────────────────────────────────────────

/// Read-only view of the model training history kept by the training
/// orchestrator.
pub trait ModelRegistry: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The most recently trained production model, if any.
  fn last_production_training(
    &self,
  ) -> impl Future<Output = Result<Option<ModelTrainingRecord>, Self::Error>>
  + Send
  + '_;
}
