//! [`SqliteStore`]: the SQLite implementation of [`RecordStore`] and
//! [`ModelRegistry`].

use std::{
  path::Path,
  time::{Duration as StdDuration, Instant},
};

use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fareload_core::{
  diff::{Change, ChangeSet},
  hash::ContentHash,
  index::{ActiveEntry, ActiveIndex},
  load::{LoadMetadata, RunStamp, summarize},
  record::{BusinessKey, StoredRecord},
  store::{LoadQuery, LockOutcome, ModelRegistry, RecordStore},
  training::ModelTrainingRecord,
};

use crate::{
  Error, Result,
  encode::{
    LOAD_COLUMNS, NewRecordRow, RECORD_COLUMNS, RawLoadMetadata,
    RawStoredRecord, RawTraining, TRAINING_COLUMNS, decode_dt, decode_uuid,
    encode_dt, encode_uuid, insert_load,
  },
  schema::SCHEMA,
};

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoreOptions {
  /// Rows written per chunk inside the apply transaction.
  pub chunk_size:          usize,
  /// Wall-clock budget for one apply transaction, checked between chunks.
  pub transaction_timeout: StdDuration,
  /// How long a statement waits on another connection's write lock.
  pub busy_timeout:        StdDuration,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      chunk_size:          5000,
      transaction_timeout: StdDuration::from_secs(300),
      busy_timeout:        StdDuration::from_secs(5),
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A fare-record store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  options:         StoreOptions,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, StoreOptions::default()).await
  }

  pub async fn open_with(
    path: impl AsRef<Path>,
    options: StoreOptions,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, options };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open_in_memory_with(StoreOptions::default()).await
  }

  pub async fn open_in_memory_with(options: StoreOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, options };
    store.init_schema().await?;
    Ok(store)
  }

  pub fn options(&self) -> &StoreOptions { &self.options }

  async fn init_schema(&self) -> Result<()> {
    let busy_timeout = self.options.busy_timeout;
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Append a row to the training history. The training orchestrator owns
  /// this table; the pipeline itself never calls this.
  pub async fn record_training(&self, model: &ModelTrainingRecord) -> Result<()> {
    let training_id = encode_uuid(model.training_id);
    let model_name = model.model_name.clone();
    let model_type = model.model_type.clone();
    let trained_at = encode_dt(model.trained_at);
    let m = model.metrics.clone();
    let is_production = model.is_production;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO model_training_history ({TRAINING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
          ),
          rusqlite::params![
            training_id,
            model_name,
            model_type,
            trained_at,
            m.test_r2,
            m.test_mae,
            m.test_rmse,
            m.cv_r2_mean,
            m.cv_r2_std,
            is_production,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Apply plan ──────────────────────────────────────────────────────────────

/// The writes of one run, encoded ahead of the transaction.
struct WritePlan {
  closes:  Vec<Uuid>,
  inserts: Vec<NewRecordRow>,
}

impl WritePlan {
  fn new(changes: &ChangeSet) -> Result<Self> {
    let mut closes = Vec::new();
    let mut inserts = Vec::new();

    for change in &changes.changes {
      match change {
        Change::Insert(r) => {
          inserts.push(NewRecordRow::new(&r.key, &r.hash, &r.record, None)?);
        }
        Change::Update { previous, record: r } => {
          closes.push(*previous);
          inserts.push(NewRecordRow::new(
            &r.key,
            &r.hash,
            &r.record,
            Some(*previous),
          )?);
        }
        Change::Unchanged { .. } => {}
        Change::Delete { record_id, .. } => closes.push(*record_id),
      }
    }

    Ok(Self { closes, inserts })
  }
}

/// Between-chunk check for cancellation and the transaction deadline.
fn checkpoint(
  cancel: &CancellationToken,
  deadline: Instant,
  timeout: StdDuration,
) -> Result<(), tokio_rusqlite::Error> {
  if cancel.is_cancelled() {
    return Err(Error::Cancelled.abort());
  }
  if Instant::now() >= deadline {
    return Err(Error::Timeout(timeout).abort());
  }
  Ok(())
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  // ── Run lock ──────────────────────────────────────────────────────────────

  async fn try_lock_run<'a>(
    &'a self,
    dataset: &'a str,
    run_id: Uuid,
    ttl: Duration,
  ) -> Result<LockOutcome> {
    let dataset = dataset.to_owned();
    let now = Utc::now();
    let now_str = encode_dt(now);
    let expires_str = encode_dt(now + ttl);
    let run_str = encode_uuid(run_id);

    let held: Option<(String, String)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<(String, String)> = tx
          .query_row(
            "SELECT run_id, expires_at FROM run_locks WHERE dataset = ?1",
            rusqlite::params![dataset],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?;

        if let Some((holder, expires_at)) = current {
          // Timestamps are fixed-width, so string order is time order.
          if holder != run_str && expires_at > now_str {
            return Ok(Some((holder, expires_at)));
          }
        }

        tx.execute(
          "INSERT INTO run_locks (dataset, run_id, acquired_at, expires_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (dataset) DO UPDATE SET
             run_id = excluded.run_id,
             acquired_at = excluded.acquired_at,
             expires_at = excluded.expires_at",
          rusqlite::params![dataset, run_str, now_str, expires_str],
        )?;
        tx.commit()?;
        Ok(None)
      })
      .await?;

    match held {
      None => Ok(LockOutcome::Acquired),
      Some((holder, expires_at)) => Ok(LockOutcome::Held {
        by:         decode_uuid(&holder)?,
        expires_at: decode_dt(&expires_at)?,
      }),
    }
  }

  async fn release_run<'a>(&'a self, dataset: &'a str, run_id: Uuid) -> Result<()> {
    let dataset = dataset.to_owned();
    let run_str = encode_uuid(run_id);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM run_locks WHERE dataset = ?1 AND run_id = ?2",
          rusqlite::params![dataset, run_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reconciliation ────────────────────────────────────────────────────────

  async fn active_index<'a>(&'a self, dataset: &'a str) -> Result<ActiveIndex> {
    let dataset = dataset.to_owned();

    let raws: Vec<(String, String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT business_key, content_hash, record_id
             FROM fare_records
            WHERE dataset = ?1 AND is_active = 1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![dataset], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(key, hash, id)| {
        Ok((BusinessKey::from_canonical(key), ActiveEntry {
          content_hash: ContentHash::from_hex(hash),
          record_id:    decode_uuid(&id)?,
        }))
      })
      .collect()
  }

  async fn apply(
    &self,
    stamp: RunStamp,
    changes: ChangeSet,
    cancel: CancellationToken,
  ) -> Result<LoadMetadata> {
    let plan = WritePlan::new(&changes)?;
    let counts = changes.counts();
    drop(changes);

    let chunk_size = self.options.chunk_size.max(1);
    let timeout = self.options.transaction_timeout;

    let metadata = self
      .conn
      .call(move |conn| {
        let deadline = Instant::now() + timeout;
        // Dropping the transaction without commit rolls it back.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = encode_dt(Utc::now());
        let dataset = stamp.dataset.clone();
        let run_str = encode_uuid(stamp.run_id);

        // Closes first, so that a replacement version never collides with the
        // active-key index.
        for chunk in plan.closes.chunks(chunk_size) {
          checkpoint(&cancel, deadline, timeout)?;
          let mut stmt = tx.prepare_cached(
            "UPDATE fare_records
                SET is_active = 0, deactivated_at = ?2
              WHERE record_id = ?1 AND dataset = ?3 AND is_active = 1",
          )?;
          for id in chunk {
            let n =
              stmt.execute(rusqlite::params![encode_uuid(*id), now, dataset])?;
            if n != 1 {
              return Err(Error::StaleIndex(*id).abort());
            }
          }
          tracing::debug!(closed = chunk.len(), "closed chunk");
        }

        for chunk in plan.inserts.chunks(chunk_size) {
          checkpoint(&cancel, deadline, timeout)?;
          let mut stmt = tx.prepare_cached(
            "INSERT INTO fare_records (
               record_id, dataset, business_key, content_hash, record_json,
               airline, source_code, destination_code, departure_datetime,
               travel_class, booking_source, total_fare_bdt, season_category,
               is_active, ingestion_timestamp, deactivated_at, run_id, supersedes
             ) VALUES (
               ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
               1, ?14, NULL, ?15, ?16
             )",
          )?;
          for r in chunk {
            stmt.execute(rusqlite::params![
              r.record_id,
              dataset,
              r.business_key,
              r.content_hash,
              r.record_json,
              r.airline,
              r.source_code,
              r.destination_code,
              r.departure_datetime,
              r.travel_class,
              r.booking_source,
              r.total_fare_bdt,
              r.season_category,
              now,
              run_str,
              r.supersedes,
            ])?;
          }
          tracing::debug!(inserted = chunk.len(), "inserted chunk");
        }

        checkpoint(&cancel, deadline, timeout)?;
        let metadata = summarize(&stamp, counts, Utc::now());
        insert_load(&tx, &metadata)?;
        tx.commit()?;
        Ok(metadata)
      })
      .await?;

    Ok(metadata)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn active_count<'a>(&'a self, dataset: &'a str) -> Result<u64> {
    let dataset = dataset.to_owned();

    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM fare_records WHERE dataset = ?1 AND is_active = 1",
          rusqlite::params![dataset],
          |row| row.get(0),
        )?)
      })
      .await?;

    u64::try_from(n).map_err(|_| Error::Decode(format!("negative count: {n}")))
  }

  async fn latest_load<'a>(
    &'a self,
    dataset: &'a str,
  ) -> Result<Option<LoadMetadata>> {
    let dataset = dataset.to_owned();

    let raw: Option<RawLoadMetadata> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LOAD_COLUMNS} FROM load_metadata
                  WHERE dataset = ?1
                  ORDER BY load_timestamp DESC, rowid DESC
                  LIMIT 1"
              ),
              rusqlite::params![dataset],
              RawLoadMetadata::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawLoadMetadata::into_metadata).transpose()
  }

  async fn load_history<'a>(
    &'a self,
    query: &'a LoadQuery,
  ) -> Result<Vec<LoadMetadata>> {
    let dataset = query.dataset.clone();
    let since = query.since.map(encode_dt);
    // SQLite treats a negative LIMIT as "no limit".
    let limit = query
      .limit
      .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
      .unwrap_or(-1);

    let raws: Vec<RawLoadMetadata> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LOAD_COLUMNS} FROM load_metadata
            WHERE dataset = ?1
              AND (?2 IS NULL OR load_timestamp >= ?2)
            ORDER BY load_timestamp DESC, rowid DESC
            LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![dataset, since, limit],
            RawLoadMetadata::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLoadMetadata::into_metadata).collect()
  }

  async fn record_history<'a>(
    &'a self,
    dataset: &'a str,
    key: &'a BusinessKey,
  ) -> Result<Vec<StoredRecord>> {
    let dataset = dataset.to_owned();
    let key = key.as_str().to_owned();

    let raws: Vec<RawStoredRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RECORD_COLUMNS} FROM fare_records
            WHERE dataset = ?1 AND business_key = ?2
            ORDER BY ingestion_timestamp DESC, rowid DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![dataset, key], RawStoredRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawStoredRecord::into_stored).collect()
  }
}

// ─── ModelRegistry impl ──────────────────────────────────────────────────────

impl ModelRegistry for SqliteStore {
  type Error = Error;

  async fn last_production_training(&self) -> Result<Option<ModelTrainingRecord>> {
    let raw: Option<RawTraining> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {TRAINING_COLUMNS} FROM model_training_history
                  WHERE is_production = 1
                  ORDER BY training_timestamp DESC
                  LIMIT 1"
              ),
              [],
              RawTraining::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTraining::into_training).transpose()
  }
}
