//! Fare records: the rows the reconciler keeps in sync with the source.
//!
//! A record is identified across loads by its [`BusinessKey`]. Every other
//! field is tracked: a change to any of them produces a new version of the
//! record rather than an in-place overwrite.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::{ContentHash, canonical_datetime, canonical_text};

// ─── FareRecord ──────────────────────────────────────────────────────────────

/// One validated fare observation as supplied by the extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareRecord {
  // ── Business key ────────────────────────────────────────────────────────
  pub airline:               String,
  /// IATA code of the departure airport.
  pub source_code:           String,
  /// IATA code of the arrival airport.
  pub destination_code:      String,
  pub departure_datetime:    NaiveDateTime,
  pub travel_class:          String,
  pub booking_source:        String,

  // ── Tracked fields ──────────────────────────────────────────────────────
  pub source_name:           Option<String>,
  pub destination_name:      Option<String>,
  pub arrival_datetime:      Option<NaiveDateTime>,
  pub duration_hrs:          Option<f64>,
  /// Free text, e.g. "Direct" or "1 Stop".
  pub stopovers:             Option<String>,
  pub aircraft_type:         Option<String>,
  pub base_fare_bdt:         Option<f64>,
  pub tax_surcharge_bdt:     Option<f64>,
  pub total_fare_bdt:        Option<f64>,
  pub seasonality:           Option<String>,
  pub days_before_departure: Option<i64>,
}

impl FareRecord {
  /// The business key identifying this record across loads.
  pub fn business_key(&self) -> BusinessKey { BusinessKey::of(self) }

  pub fn season_category(&self) -> SeasonCategory {
    SeasonCategory::classify(self.seasonality.as_deref())
  }
}

// ─── BusinessKey ─────────────────────────────────────────────────────────────

/// Canonical identity of a fare record: airline, route, departure, class and
/// booking channel, each canonicalised and joined with `|`.
///
/// A `|` or `\` inside a part is escaped with a backslash, so different key
/// fields never produce the same key. Keys without those characters read
/// plainly, e.g. `BIMAN|DAC|CGP|2025-03-01T07:00:00|ECONOMY|ONLINE`.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BusinessKey(String);

const KEY_SEPARATOR: char = '|';
const KEY_ESCAPE: char = '\\';

impl BusinessKey {
  pub fn of(record: &FareRecord) -> Self {
    let parts = [
      canonical_text(&record.airline),
      canonical_text(&record.source_code),
      canonical_text(&record.destination_code),
      canonical_datetime(&record.departure_datetime),
      canonical_text(&record.travel_class),
      canonical_text(&record.booking_source),
    ];
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
      if i > 0 {
        key.push(KEY_SEPARATOR);
      }
      for c in part.chars() {
        if c == KEY_SEPARATOR || c == KEY_ESCAPE {
          key.push(KEY_ESCAPE);
        }
        key.push(c);
      }
    }
    Self(key)
  }

  /// Wrap a key previously produced by [`BusinessKey::of`], e.g. read back
  /// from the store or a URL path.
  pub fn from_canonical(key: impl Into<String>) -> Self { Self(key.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for BusinessKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Season category ─────────────────────────────────────────────────────────

/// Closed vocabulary derived from the free-text `seasonality` column.
///
/// Values outside the known vocabulary land in [`SeasonCategory::Other`]; they
/// are never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeasonCategory {
  Peak,
  OffPeak,
  Regular,
  Other,
}

impl SeasonCategory {
  pub fn classify(seasonality: Option<&str>) -> Self {
    let Some(raw) = seasonality else {
      return Self::Other;
    };
    match canonical_text(raw).as_str() {
      "REGULAR" => Self::Regular,
      "PEAK" | "EID" | "HAJJ" | "SUMMER" | "WINTER HOLIDAYS" => Self::Peak,
      "OFF-PEAK" | "OFF PEAK" => Self::OffPeak,
      _ => Self::Other,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Peak => "PEAK",
      Self::OffPeak => "OFF_PEAK",
      Self::Regular => "REGULAR",
      Self::Other => "OTHER",
    }
  }
}

// ─── StoredRecord ────────────────────────────────────────────────────────────

/// A persisted version of a fare record. Rows are never removed; an inactive
/// row is a closed version kept for history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
  pub record_id:           Uuid,
  pub dataset:             String,
  pub business_key:        BusinessKey,
  pub content_hash:        ContentHash,
  pub record:              FareRecord,
  pub season_category:     SeasonCategory,
  pub is_active:           bool,
  /// Server-assigned when the version was written.
  pub ingestion_timestamp: DateTime<Utc>,
  /// Set when the version was closed by an update or a soft delete.
  pub deactivated_at:      Option<DateTime<Utc>>,
  /// The run that wrote this version.
  pub run_id:              Uuid,
  /// The version this one replaced, if it was written by an update.
  pub supersedes:          Option<Uuid>,
}
