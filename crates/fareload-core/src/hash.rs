//! Content fingerprints for fare records.
//!
//! A fingerprint is a SHA-256 digest over every business-key and tracked
//! field after canonicalisation, so two semantically identical records hash
//! the same no matter which upstream run produced them.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::record::FareRecord;

/// Separates fields in the digest input; cannot appear in canonical text.
const FIELD_SEPARATOR: &[u8] = b"\x1f";

/// Hex-encoded SHA-256 fingerprint of a record's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
  /// Wrap a hex digest previously produced by [`content_hash`].
  pub fn from_hex(hex: impl Into<String>) -> Self { Self(hex.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Canonicalisation ────────────────────────────────────────────────────────

/// Trim, collapse internal whitespace runs and uppercase. Control characters
/// count as whitespace.
pub fn canonical_text(s: &str) -> String {
  s.split(|c: char| c.is_whitespace() || c.is_control())
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
    .to_uppercase()
}

/// Fixed two-decimal formatting; `-0.0` renders as `0.00`.
pub fn canonical_decimal(v: f64) -> String {
  let v = if v == 0.0 { 0.0 } else { v };
  format!("{v:.2}")
}

pub fn canonical_datetime(dt: &NaiveDateTime) -> String {
  dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> String) -> String {
  value.map(f).unwrap_or_default()
}

// ─── Hashing ─────────────────────────────────────────────────────────────────

/// Compute the fingerprint of `record`. Pure and deterministic.
pub fn content_hash(record: &FareRecord) -> ContentHash {
  let fields = [
    canonical_text(&record.airline),
    canonical_text(&record.source_code),
    canonical_text(&record.destination_code),
    canonical_datetime(&record.departure_datetime),
    canonical_text(&record.travel_class),
    canonical_text(&record.booking_source),
    opt(record.source_name.as_deref(), canonical_text),
    opt(record.destination_name.as_deref(), canonical_text),
    opt(record.arrival_datetime.as_ref(), canonical_datetime),
    opt(record.duration_hrs, canonical_decimal),
    opt(record.stopovers.as_deref(), canonical_text),
    opt(record.aircraft_type.as_deref(), canonical_text),
    opt(record.base_fare_bdt, canonical_decimal),
    opt(record.tax_surcharge_bdt, canonical_decimal),
    opt(record.total_fare_bdt, canonical_decimal),
    opt(record.seasonality.as_deref(), canonical_text),
    opt(record.days_before_departure, |d| d.to_string()),
  ];

  let mut hasher = Sha256::new();
  for field in &fields {
    hasher.update(field.as_bytes());
    hasher.update(FIELD_SEPARATOR);
  }
  ContentHash(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::sample;

  #[test]
  fn identical_records_hash_identically() {
    assert_eq!(content_hash(&sample()), content_hash(&sample()));
    assert_eq!(content_hash(&sample()).as_str().len(), 64);
  }

  #[test]
  fn case_and_whitespace_do_not_matter() {
    let mut b = sample();
    b.airline = " us-bangla  AIRLINES\t".into();
    b.stopovers = Some("direct".into());
    b.seasonality = Some("  regular".into());
    assert_eq!(content_hash(&sample()), content_hash(&b));
  }

  #[test]
  fn numeric_formatting_does_not_matter() {
    let mut b = sample();
    b.total_fare_bdt = Some(5000.001);
    b.duration_hrs = Some(1.0000);
    assert_eq!(content_hash(&sample()), content_hash(&b));
  }

  #[test]
  fn tracked_field_change_changes_hash() {
    let mut b = sample();
    b.total_fare_bdt = Some(5100.0);
    assert_ne!(content_hash(&sample()), content_hash(&b));

    let mut c = sample();
    c.aircraft_type = Some("ATR 72".into());
    assert_ne!(content_hash(&sample()), content_hash(&c));
  }

  #[test]
  fn shifting_a_value_between_fields_changes_hash() {
    // Moving a value between adjacent optional fields must not collide.
    let mut a = sample();
    a.source_name = Some("Dhaka".into());
    a.destination_name = None;
    let mut b = sample();
    b.source_name = None;
    b.destination_name = Some("Dhaka".into());
    assert_ne!(content_hash(&a), content_hash(&b));
  }

  #[test]
  fn control_characters_cannot_forge_a_separator() {
    assert_eq!(canonical_text("Dhaka\x1fChittagong\x00"), "DHAKA CHITTAGONG");

    // Raw, both would feed "DHAKA␟COX␟BAZAR␟" to the digest.
    let mut a = sample();
    a.source_name = Some("Dhaka\x1fCox".into());
    a.destination_name = Some("Bazar".into());
    let mut b = sample();
    b.source_name = Some("Dhaka".into());
    b.destination_name = Some("Cox\x1fBazar".into());
    assert_ne!(content_hash(&a), content_hash(&b));
  }

  #[test]
  fn negative_zero_is_zero() {
    assert_eq!(canonical_decimal(-0.0), "0.00");
    assert_eq!(canonical_decimal(12.346), "12.35");
  }
}
