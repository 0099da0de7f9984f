//! Incoming batches and their preparation for the differ.
//!
//! Preparation validates every row, fingerprints the survivors and collapses
//! duplicate business keys (last occurrence wins).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  hash::{ContentHash, content_hash},
  record::{BusinessKey, FareRecord},
  validate::{Rejection, validate_row},
};

// ─── Batch ───────────────────────────────────────────────────────────────────

/// The ordered rows of one run, as handed over by the extraction stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
  rows: Vec<serde_json::Value>,
}

impl Batch {
  pub fn from_rows(rows: Vec<serde_json::Value>) -> Self { Self { rows } }

  /// Parse a JSON array of row objects.
  pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    match value {
      serde_json::Value::Array(rows) => Ok(Self { rows }),
      other => Err(Error::Batch(format!(
        "expected an array, found {}",
        json_kind(&other)
      ))),
    }
  }

  /// Build a batch from already-typed records.
  pub fn from_records(records: &[FareRecord]) -> Result<Self> {
    let rows = records
      .iter()
      .map(serde_json::to_value)
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { rows })
  }

  pub fn len(&self) -> usize { self.rows.len() }

  pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
  match value {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "a boolean",
    serde_json::Value::Number(_) => "a number",
    serde_json::Value::String(_) => "a string",
    serde_json::Value::Array(_) => "an array",
    serde_json::Value::Object(_) => "an object",
  }
}

// ─── HashedRecord ────────────────────────────────────────────────────────────

/// A validated record together with its business key and fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedRecord {
  pub key:    BusinessKey,
  pub hash:   ContentHash,
  pub record: FareRecord,
}

impl HashedRecord {
  pub fn new(record: FareRecord) -> Self {
    Self {
      key: record.business_key(),
      hash: content_hash(&record),
      record,
    }
  }
}

// ─── Preparation ─────────────────────────────────────────────────────────────

/// A batch ready for classification.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
  /// Rows received, including rejected ones and duplicates.
  pub received:       usize,
  /// One record per business key, in order of each key's last occurrence.
  pub records:        Vec<HashedRecord>,
  pub rejections:     Vec<Rejection>,
  /// Earlier occurrences dropped because a later row had the same key.
  pub duplicate_keys: usize,
}

/// Validate, fingerprint and de-duplicate `batch`.
pub fn prepare(batch: Batch) -> PreparedBatch {
  let received = batch.rows.len();
  let mut rejections = Vec::new();
  let mut hashed = Vec::with_capacity(received);

  for (position, row) in batch.rows.into_iter().enumerate() {
    match validate_row(position, row) {
      Ok(record) => hashed.push(HashedRecord::new(record)),
      Err(rejection) => rejections.push(rejection),
    }
  }

  let (records, duplicate_keys) = keep_last_occurrence(hashed);

  PreparedBatch { received, records, rejections, duplicate_keys }
}

/// Drop every record whose key reappears later in the batch. Returns the
/// survivors and the number dropped.
fn keep_last_occurrence(
  records: Vec<HashedRecord>,
) -> (Vec<HashedRecord>, usize) {
  let mut last_seen: HashMap<BusinessKey, usize> =
    HashMap::with_capacity(records.len());
  for (i, r) in records.iter().enumerate() {
    last_seen.insert(r.key.clone(), i);
  }

  let total = records.len();
  let kept: Vec<HashedRecord> = records
    .into_iter()
    .enumerate()
    .filter(|(i, r)| last_seen.get(&r.key) == Some(i))
    .map(|(_, r)| r)
    .collect();
  let dropped = total - kept.len();
  (kept, dropped)
}
