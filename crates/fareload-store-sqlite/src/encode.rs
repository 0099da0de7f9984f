//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (nanoseconds, `Z`
//! suffix) so that lexical order is chronological. Counts are stored as
//! `INTEGER`. UUIDs are stored as hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use fareload_core::{
  hash::ContentHash,
  load::{LoadMetadata, LoadType},
  record::{BusinessKey, FareRecord, SeasonCategory, StoredRecord},
  training::{ModelTrainingRecord, TrainingMetrics},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── SeasonCategory ──────────────────────────────────────────────────────────

pub fn decode_season(s: &str) -> Result<SeasonCategory> {
  match s {
    "PEAK" => Ok(SeasonCategory::Peak),
    "OFF_PEAK" => Ok(SeasonCategory::OffPeak),
    "REGULAR" => Ok(SeasonCategory::Regular),
    "OTHER" => Ok(SeasonCategory::Other),
    other => Err(Error::Decode(format!("unknown season category: {other:?}"))),
  }
}

// ─── Counts ──────────────────────────────────────────────────────────────────

fn decode_count(column: &str, v: i64) -> Result<u64> {
  u64::try_from(v).map_err(|_| Error::Decode(format!("negative {column}: {v}")))
}

// ─── Record rows ─────────────────────────────────────────────────────────────

/// Owned column values for one `fare_records` insert, prepared outside the
/// connection thread.
pub struct NewRecordRow {
  pub record_id:          String,
  pub business_key:       String,
  pub content_hash:       String,
  pub record_json:        String,
  pub airline:            String,
  pub source_code:        String,
  pub destination_code:   String,
  pub departure_datetime: String,
  pub travel_class:       String,
  pub booking_source:     String,
  pub total_fare_bdt:     Option<f64>,
  pub season_category:    &'static str,
  pub supersedes:         Option<String>,
}

impl NewRecordRow {
  pub fn new(
    key: &BusinessKey,
    hash: &ContentHash,
    record: &FareRecord,
    supersedes: Option<Uuid>,
  ) -> Result<Self> {
    Ok(Self {
      record_id:          encode_uuid(Uuid::new_v4()),
      business_key:       key.as_str().to_owned(),
      content_hash:       hash.as_str().to_owned(),
      record_json:        serde_json::to_string(record)?,
      airline:            record.airline.clone(),
      source_code:        record.source_code.clone(),
      destination_code:   record.destination_code.clone(),
      departure_datetime: record
        .departure_datetime
        .format("%Y-%m-%d %H:%M:%S")
        .to_string(),
      travel_class:       record.travel_class.clone(),
      booking_source:     record.booking_source.clone(),
      total_fare_bdt:     record.total_fare_bdt,
      season_category:    record.season_category().as_str(),
      supersedes:         supersedes.map(encode_uuid),
    })
  }
}

pub const RECORD_COLUMNS: &str = "record_id, dataset, business_key, content_hash, \
   record_json, season_category, is_active, ingestion_timestamp, \
   deactivated_at, run_id, supersedes";

/// Raw strings read directly from a `fare_records` row.
pub struct RawStoredRecord {
  pub record_id:           String,
  pub dataset:             String,
  pub business_key:        String,
  pub content_hash:        String,
  pub record_json:         String,
  pub season_category:     String,
  pub is_active:           bool,
  pub ingestion_timestamp: String,
  pub deactivated_at:      Option<String>,
  pub run_id:              String,
  pub supersedes:          Option<String>,
}

impl RawStoredRecord {
  /// Map a row selected with [`RECORD_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:           row.get(0)?,
      dataset:             row.get(1)?,
      business_key:        row.get(2)?,
      content_hash:        row.get(3)?,
      record_json:         row.get(4)?,
      season_category:     row.get(5)?,
      is_active:           row.get(6)?,
      ingestion_timestamp: row.get(7)?,
      deactivated_at:      row.get(8)?,
      run_id:              row.get(9)?,
      supersedes:          row.get(10)?,
    })
  }

  pub fn into_stored(self) -> Result<StoredRecord> {
    Ok(StoredRecord {
      record_id:           decode_uuid(&self.record_id)?,
      dataset:             self.dataset,
      business_key:        BusinessKey::from_canonical(self.business_key),
      content_hash:        ContentHash::from_hex(self.content_hash),
      record:              serde_json::from_str(&self.record_json)?,
      season_category:     decode_season(&self.season_category)?,
      is_active:           self.is_active,
      ingestion_timestamp: decode_dt(&self.ingestion_timestamp)?,
      deactivated_at:      self
        .deactivated_at
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      run_id:              decode_uuid(&self.run_id)?,
      supersedes:          self
        .supersedes
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
    })
  }
}

// ─── Load metadata rows ──────────────────────────────────────────────────────

pub const LOAD_COLUMNS: &str = "run_id, dataset, load_timestamp, load_type, \
   records_inserted, records_updated, records_deleted, records_unchanged, \
   records_rejected, duplicate_keys, previous_active_count, \
   change_percentage, started_at, execution_time_ms";

/// Raw values read directly from a `load_metadata` row.
pub struct RawLoadMetadata {
  pub run_id:                String,
  pub dataset:               String,
  pub load_timestamp:        String,
  pub load_type:             String,
  pub records_inserted:      i64,
  pub records_updated:       i64,
  pub records_deleted:       i64,
  pub records_unchanged:     i64,
  pub records_rejected:      i64,
  pub duplicate_keys:        i64,
  pub previous_active_count: i64,
  pub change_percentage:     f64,
  pub started_at:            String,
  pub execution_time_ms:     i64,
}

impl RawLoadMetadata {
  /// Map a row selected with [`LOAD_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:                row.get(0)?,
      dataset:               row.get(1)?,
      load_timestamp:        row.get(2)?,
      load_type:             row.get(3)?,
      records_inserted:      row.get(4)?,
      records_updated:       row.get(5)?,
      records_deleted:       row.get(6)?,
      records_unchanged:     row.get(7)?,
      records_rejected:      row.get(8)?,
      duplicate_keys:        row.get(9)?,
      previous_active_count: row.get(10)?,
      change_percentage:     row.get(11)?,
      started_at:            row.get(12)?,
      execution_time_ms:     row.get(13)?,
    })
  }

  pub fn into_metadata(self) -> Result<LoadMetadata> {
    Ok(LoadMetadata {
      run_id:                decode_uuid(&self.run_id)?,
      dataset:               self.dataset,
      load_timestamp:        decode_dt(&self.load_timestamp)?,
      load_type:             self.load_type.parse::<LoadType>()?,
      records_inserted:      decode_count("records_inserted", self.records_inserted)?,
      records_updated:       decode_count("records_updated", self.records_updated)?,
      records_deleted:       decode_count("records_deleted", self.records_deleted)?,
      records_unchanged:     decode_count(
        "records_unchanged",
        self.records_unchanged,
      )?,
      records_rejected:      decode_count("records_rejected", self.records_rejected)?,
      duplicate_keys:        decode_count("duplicate_keys", self.duplicate_keys)?,
      previous_active_count: decode_count(
        "previous_active_count",
        self.previous_active_count,
      )?,
      change_percentage:     self.change_percentage,
      started_at:            decode_dt(&self.started_at)?,
      execution_time_ms:     decode_count(
        "execution_time_ms",
        self.execution_time_ms,
      )?,
    })
  }
}

/// Insert `md` as a `load_metadata` row on `conn`.
pub fn insert_load(
  conn: &rusqlite::Connection,
  md: &LoadMetadata,
) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO load_metadata ({LOAD_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
    ),
    rusqlite::params![
      encode_uuid(md.run_id),
      md.dataset,
      encode_dt(md.load_timestamp),
      md.load_type.as_str(),
      md.records_inserted as i64,
      md.records_updated as i64,
      md.records_deleted as i64,
      md.records_unchanged as i64,
      md.records_rejected as i64,
      md.duplicate_keys as i64,
      md.previous_active_count as i64,
      md.change_percentage,
      encode_dt(md.started_at),
      md.execution_time_ms as i64,
    ],
  )?;
  Ok(())
}

// ─── Training rows ───────────────────────────────────────────────────────────

pub const TRAINING_COLUMNS: &str = "training_id, model_name, model_type, \
   training_timestamp, test_r2, test_mae, test_rmse, cv_r2_mean, cv_r2_std, \
   is_production";

/// Raw values read directly from a `model_training_history` row.
pub struct RawTraining {
  pub training_id:        String,
  pub model_name:         String,
  pub model_type:         Option<String>,
  pub training_timestamp: String,
  pub metrics:            TrainingMetrics,
  pub is_production:      bool,
}

impl RawTraining {
  /// Map a row selected with [`TRAINING_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      training_id:        row.get(0)?,
      model_name:         row.get(1)?,
      model_type:         row.get(2)?,
      training_timestamp: row.get(3)?,
      metrics:            TrainingMetrics {
        test_r2:    row.get(4)?,
        test_mae:   row.get(5)?,
        test_rmse:  row.get(6)?,
        cv_r2_mean: row.get(7)?,
        cv_r2_std:  row.get(8)?,
      },
      is_production:      row.get(9)?,
    })
  }

  pub fn into_training(self) -> Result<ModelTrainingRecord> {
    Ok(ModelTrainingRecord {
      training_id:   decode_uuid(&self.training_id)?,
      model_name:    self.model_name,
      model_type:    self.model_type,
      trained_at:    decode_dt(&self.training_timestamp)?,
      metrics:       self.metrics,
      is_production: self.is_production,
    })
  }
}
