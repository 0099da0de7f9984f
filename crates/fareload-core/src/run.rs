//! The pipeline runner: lock, classify, apply, summarise, decide.
//!
//! A run's state lives in an explicit [`RunContext`] that is threaded through
//! the stages; nothing about the current load is kept in globals.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
  Error, Result,
  batch::{Batch, prepare},
  diff::{ChangeSet, diff},
  index::ActiveIndex,
  load::{LoadMetadata, LoadType, RunStamp},
  retrain::{RetrainDecision, RetrainThresholds, decide_from},
  store::{LockOutcome, ModelRegistry, RecordStore},
  validate::Rejection,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// How long a run lock may be held before another run may take it over.
  pub lock_ttl_secs:       u64,
  /// Projected change percentage above which an incremental run is
  /// reclassified as a full reload. `None` disables escalation.
  pub full_load_threshold: Option<f64>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      lock_ttl_secs:       900,
      full_load_threshold: Some(50.0),
    }
  }
}

// ─── Run context ─────────────────────────────────────────────────────────────

/// Everything one run needs, captured when it starts.
#[derive(Debug, Clone)]
pub struct RunContext {
  pub run_id:     Uuid,
  pub dataset:    String,
  /// The load type requested by the caller.
  pub load_type:  LoadType,
  pub started_at: DateTime<Utc>,
  pub batch:      Batch,
  pub active:     ActiveIndex,
}

/// A classified run, ready to apply.
#[derive(Debug, Clone)]
pub struct Classified {
  pub stamp:             RunStamp,
  pub changes:           ChangeSet,
  pub rejections:        Vec<Rejection>,
  pub escalated_to_full: bool,
}

impl RunContext {
  /// Prepare the batch and diff it against the active snapshot.
  pub fn classify(self, full_load_threshold: Option<f64>) -> Classified {
    let prepared = prepare(self.batch);

    if !prepared.rejections.is_empty() {
      tracing::warn!(
        rejected = prepared.rejections.len(),
        "rows rejected by validation"
      );
    }
    if prepared.duplicate_keys > 0 {
      tracing::warn!(
        duplicates = prepared.duplicate_keys,
        "duplicate business keys in batch, keeping last occurrence"
      );
    }

    let mut changes = diff(prepared.records, &self.active, self.load_type);

    let projected = changes.projected_change_percentage();
    let escalated_to_full = self.load_type == LoadType::Incremental
      && full_load_threshold.is_some_and(|t| projected > t);
    if escalated_to_full {
      tracing::info!(
        projected_change_percentage = projected,
        "change exceeds full-load threshold, escalating to full reload"
      );
      changes = changes.escalate_to_full();
    }

    let stamp = RunStamp {
      run_id:                self.run_id,
      dataset:               self.dataset,
      load_type:             changes.load_type,
      started_at:            self.started_at,
      previous_active_count: self.active.len() as u64,
      records_rejected:      prepared.rejections.len() as u64,
      duplicate_keys:        prepared.duplicate_keys as u64,
    };

    Classified {
      stamp,
      changes,
      rejections: prepared.rejections,
      escalated_to_full,
    }
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
  pub metadata:          LoadMetadata,
  pub rejections:        Vec<Rejection>,
  pub escalated_to_full: bool,
  /// Active records after the run, when the store could be asked.
  pub active_count:      Option<u64>,
}

// ─── Run lock guard ──────────────────────────────────────────────────────────

/// Holds a dataset's run lock for the lifetime of one run.
///
/// If dropped without [`RunLock::release`], e.g. because the caller dropped
/// the run future, it cancels the run's token and releases the lock on a
/// spawned task.
struct RunLock<S: RecordStore + 'static> {
  store:   Arc<S>,
  dataset: String,
  run_id:  Uuid,
  armed:   Option<DropGuard>,
}

impl<S: RecordStore + 'static> RunLock<S> {
  async fn release(mut self) {
    if let Some(guard) = self.armed.take() {
      let _ = guard.disarm();
    }
    if let Err(e) = self.store.release_run(&self.dataset, self.run_id).await {
      tracing::warn!(error = %e, "failed to release run lock");
    }
  }
}

impl<S: RecordStore + 'static> Drop for RunLock<S> {
  fn drop(&mut self) {
    // Dropping the guard cancels the token.
    let Some(guard) = self.armed.take() else {
      return;
    };
    drop(guard);

    let (store, dataset, run_id) =
      (Arc::clone(&self.store), self.dataset.clone(), self.run_id);
    tracing::warn!(
      %run_id,
      dataset = %dataset,
      "run abandoned, cancelling and releasing lock"
    );
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(async move {
          if let Err(e) = store.release_run(&dataset, run_id).await {
            tracing::warn!(
              %run_id,
              dataset = %dataset,
              error = %e,
              "failed to release run lock"
            );
          }
        });
      }
      Err(_) => {
        tracing::warn!(
          %run_id,
          dataset = %dataset,
          "no runtime to release run lock, it will expire"
        );
      }
    }
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct Pipeline<S> {
  store:      Arc<S>,
  config:     PipelineConfig,
  thresholds: RetrainThresholds,
}

impl<S> Clone for Pipeline<S> {
  fn clone(&self) -> Self {
    Self {
      store:      Arc::clone(&self.store),
      config:     self.config.clone(),
      thresholds: self.thresholds.clone(),
    }
  }
}

impl<S: RecordStore + 'static> Pipeline<S> {
  pub fn new(
    store: Arc<S>,
    config: PipelineConfig,
    thresholds: RetrainThresholds,
  ) -> Self {
    Self { store, config, thresholds }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn thresholds(&self) -> &RetrainThresholds { &self.thresholds }

  /// Reconcile `batch` into `dataset`.
  ///
  /// Fails fast with [`Error::RunInProgress`] if another run holds the
  /// dataset's lock. On any failure the store is left as it was before the
  /// run. Dropping the returned future cancels the run and releases the lock
  /// in the background.
  pub async fn run(
    &self,
    dataset: &str,
    batch: Batch,
    load_type: LoadType,
    cancel: CancellationToken,
  ) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id, dataset, %load_type);

    async move {
      match self
        .store
        .try_lock_run(dataset, run_id, self.lock_ttl())
        .await
        .map_err(Error::store)?
      {
        LockOutcome::Acquired => {}
        LockOutcome::Held { by, expires_at } => {
          tracing::warn!(holder = %by, %expires_at, "dataset is locked by another run");
          return Err(Error::RunInProgress {
            dataset: dataset.to_owned(),
            holder:  by,
          });
        }
      }

      // The child token lets the guard cancel this run without touching the
      // caller's token.
      let cancel = cancel.child_token();
      let lock = RunLock {
        store:   Arc::clone(&self.store),
        dataset: dataset.to_owned(),
        run_id,
        armed:   Some(cancel.clone().drop_guard()),
      };

      let result = self
        .run_locked(run_id, dataset, batch, load_type, cancel)
        .await;

      lock.release().await;
      result
    }
    .instrument(span)
    .await
  }

  /// The configured lock TTL, clamped to a year so expiry stays
  /// representable.
  fn lock_ttl(&self) -> Duration {
    const MAX_SECS: u64 = 365 * 24 * 60 * 60;
    Duration::seconds(self.config.lock_ttl_secs.min(MAX_SECS) as i64)
  }

  async fn run_locked(
    &self,
    run_id: Uuid,
    dataset: &str,
    batch: Batch,
    load_type: LoadType,
    cancel: CancellationToken,
  ) -> Result<RunReport> {
    let started_at = Utc::now();
    let active = self
      .store
      .active_index(dataset)
      .await
      .map_err(Error::store)?;
    tracing::info!(
      active = active.len(),
      rows = batch.len(),
      "loaded active set"
    );

    let ctx = RunContext {
      run_id,
      dataset: dataset.to_owned(),
      load_type,
      started_at,
      batch,
      active,
    };
    let threshold = self.config.full_load_threshold;
    let classified =
      tokio::task::spawn_blocking(move || ctx.classify(threshold))
        .await
        .map_err(|e| Error::Worker(e.to_string()))?;

    let counts = classified.changes.counts();
    tracing::info!(
      load_type = %classified.changes.load_type,
      inserts = counts.inserted,
      updates = counts.updated,
      deletes = counts.deleted,
      unchanged = counts.unchanged,
      "classified batch"
    );

    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }

    // Classification has no time bound, so the lock may have outlived its
    // TTL. Re-taking it extends the expiry, or fails if another run took over.
    match self
      .store
      .try_lock_run(dataset, run_id, self.lock_ttl())
      .await
      .map_err(Error::store)?
    {
      LockOutcome::Acquired => {}
      LockOutcome::Held { by, .. } => {
        tracing::error!(holder = %by, "run lock lost before apply, aborting");
        return Err(Error::RunInProgress {
          dataset: dataset.to_owned(),
          holder:  by,
        });
      }
    }

    let metadata = match self
      .store
      .apply(classified.stamp, classified.changes, cancel.clone())
      .await
    {
      Ok(metadata) => metadata,
      Err(_) if cancel.is_cancelled() => {
        tracing::error!("run cancelled, changes rolled back");
        return Err(Error::Cancelled);
      }
      Err(e) => {
        tracing::error!(error = %e, "apply failed, changes rolled back");
        return Err(Error::store(e));
      }
    };

    let expected = (metadata.previous_active_count + metadata.records_inserted)
      .saturating_sub(metadata.records_deleted);
    let active_count = match self.store.active_count(dataset).await {
      Ok(n) if n == expected => {
        tracing::info!(active = n, "active count verified");
        Some(n)
      }
      Ok(n) => {
        tracing::warn!(active = n, expected, "active count mismatch after run");
        Some(n)
      }
      Err(e) => {
        tracing::warn!(error = %e, "could not verify active count");
        None
      }
    };

    tracing::info!(
      change_percentage = metadata.change_percentage,
      execution_time_ms = metadata.execution_time_ms,
      "run committed"
    );

    Ok(RunReport {
      metadata,
      rejections: classified.rejections,
      escalated_to_full: classified.escalated_to_full,
      active_count,
    })
  }

  /// Retrain decision for the latest load of `dataset`. Never fails: any read
  /// error yields a fail-closed decision.
  pub async fn decide<R: ModelRegistry>(
    &self,
    registry: &R,
    dataset: &str,
    now: DateTime<Utc>,
  ) -> RetrainDecision {
    let load = self.store.latest_load(dataset).await;
    let model = registry.last_production_training().await;
    decide_from(load, model, now, &self.thresholds)
  }

  /// Retrain decision for a load the caller already holds, e.g. the metadata
  /// returned by [`Pipeline::run`].
  pub async fn decide_for<R: ModelRegistry>(
    &self,
    registry: &R,
    metadata: &LoadMetadata,
    now: DateTime<Utc>,
  ) -> RetrainDecision {
    let model = registry.last_production_training().await;
    decide_from::<std::convert::Infallible, _>(
      Ok(Some(metadata.clone())),
      model,
      now,
      &self.thresholds,
    )
  }
}
