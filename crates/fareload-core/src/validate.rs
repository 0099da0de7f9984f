//! Per-row validation of incoming batch rows.
//!
//! A malformed row is rejected on its own; the rest of the batch carries on.
//! Only the checks the reconciler depends on live here; the extraction stage
//! owns type coercion.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::FareRecord;

const DATETIME_FORMATS: &[&str] = &[
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M",
];

/// A batch row that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("row {position} rejected: {}", .reasons.join("; "))]
pub struct Rejection {
  /// Zero-based position of the row in the incoming batch.
  pub position: usize,
  pub reasons:  Vec<String>,
}

/// The row shape accepted from the extraction stage. Every field is optional
/// here so that a missing field becomes a rejection reason rather than a
/// deserialisation failure. Unknown columns are ignored.
#[derive(Debug, Deserialize)]
struct RawFareRow {
  airline:               Option<String>,
  source_code:           Option<String>,
  source_name:           Option<String>,
  destination_code:      Option<String>,
  destination_name:      Option<String>,
  departure_datetime:    Option<String>,
  arrival_datetime:      Option<String>,
  duration_hrs:          Option<f64>,
  stopovers:             Option<String>,
  aircraft_type:         Option<String>,
  travel_class:          Option<String>,
  booking_source:        Option<String>,
  base_fare_bdt:         Option<f64>,
  tax_surcharge_bdt:     Option<f64>,
  total_fare_bdt:        Option<f64>,
  seasonality:           Option<String>,
  days_before_departure: Option<i64>,
}

/// Parse a date/time in any of the accepted layouts.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
  DATETIME_FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn trimmed(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_owned())
    .filter(|v| !v.is_empty())
}

fn required(
  problems: &mut Vec<String>,
  field: &str,
  value: Option<String>,
) -> Option<String> {
  let value = trimmed(value);
  if value.is_none() {
    problems.push(format!("{field} is required"));
  }
  value
}

fn airport_code(
  problems: &mut Vec<String>,
  field: &str,
  value: Option<String>,
) -> Option<String> {
  let code = required(problems, field, value)?;
  if code.chars().count() != 3 {
    problems.push(format!("{field} must be 3 characters, got {code:?}"));
    return None;
  }
  Some(code)
}

fn datetime(
  problems: &mut Vec<String>,
  field: &str,
  value: Option<String>,
) -> Option<NaiveDateTime> {
  let raw = trimmed(value)?;
  let parsed = parse_datetime(&raw);
  if parsed.is_none() {
    problems.push(format!("{field} {raw:?} is not a recognised date/time"));
  }
  parsed
}

fn amount(
  problems: &mut Vec<String>,
  field: &str,
  value: Option<f64>,
  allow_zero: bool,
) -> Option<f64> {
  let v = value?;
  let ok = v.is_finite() && if allow_zero { v >= 0.0 } else { v > 0.0 };
  if !ok {
    let rule = if allow_zero { "cannot be negative" } else { "must be positive" };
    problems.push(format!("{field} {rule}, got {v}"));
  }
  Some(v)
}

/// Validate one batch row. `position` is the row's index in the batch and is
/// carried into the [`Rejection`] on failure.
pub fn validate_row(
  position: usize,
  row: serde_json::Value,
) -> Result<FareRecord, Rejection> {
  let raw: RawFareRow = serde_json::from_value(row).map_err(|e| Rejection {
    position,
    reasons: vec![format!("malformed row: {e}")],
  })?;

  let mut problems = Vec::new();

  let airline = required(&mut problems, "airline", raw.airline);
  let source_code = airport_code(&mut problems, "source_code", raw.source_code);
  let destination_code =
    airport_code(&mut problems, "destination_code", raw.destination_code);
  let travel_class = required(&mut problems, "travel_class", raw.travel_class);
  let booking_source =
    required(&mut problems, "booking_source", raw.booking_source);

  let departure_datetime = match trimmed(raw.departure_datetime) {
    Some(raw_dt) => datetime(&mut problems, "departure_datetime", Some(raw_dt)),
    None => {
      problems.push("departure_datetime is required".into());
      None
    }
  };
  let arrival_datetime =
    datetime(&mut problems, "arrival_datetime", raw.arrival_datetime);

  let base_fare_bdt =
    amount(&mut problems, "base_fare_bdt", raw.base_fare_bdt, false);
  let tax_surcharge_bdt =
    amount(&mut problems, "tax_surcharge_bdt", raw.tax_surcharge_bdt, true);
  let total_fare_bdt =
    amount(&mut problems, "total_fare_bdt", raw.total_fare_bdt, false);
  let duration_hrs =
    amount(&mut problems, "duration_hrs", raw.duration_hrs, false);

  let (
    Some(airline),
    Some(source_code),
    Some(destination_code),
    Some(departure_datetime),
    Some(travel_class),
    Some(booking_source),
  ) = (
    airline,
    source_code,
    destination_code,
    departure_datetime,
    travel_class,
    booking_source,
  )
  else {
    return Err(Rejection { position, reasons: problems });
  };

  if !problems.is_empty() {
    return Err(Rejection { position, reasons: problems });
  }

  Ok(FareRecord {
    airline,
    source_code,
    destination_code,
    departure_datetime,
    travel_class,
    booking_source,
    source_name: trimmed(raw.source_name),
    destination_name: trimmed(raw.destination_name),
    arrival_datetime,
    duration_hrs,
    stopovers: trimmed(raw.stopovers),
    aircraft_type: trimmed(raw.aircraft_type),
    base_fare_bdt,
    tax_surcharge_bdt,
    total_fare_bdt,
    seasonality: trimmed(raw.seasonality),
    days_before_departure: raw.days_before_departure,
  })
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn row() -> serde_json::Value {
    json!({
      "airline": " Biman Bangladesh ",
      "source_code": "DAC",
      "destination_code": "CGP",
      "departure_datetime": "2025-04-10 07:15:00",
      "travel_class": "Business",
      "booking_source": "Direct Booking",
      "base_fare_bdt": 8000.0,
      "tax_surcharge_bdt": 1200,
      "total_fare_bdt": 9200.0,
      "seasonality": "Eid",
      "mysql_raw_id": 17
    })
  }

  #[test]
  fn valid_row_is_trimmed_and_parsed() {
    let record = validate_row(0, row()).unwrap();
    assert_eq!(record.airline, "Biman Bangladesh");
    assert_eq!(record.tax_surcharge_bdt, Some(1200.0));
    assert_eq!(
      record.departure_datetime.format("%H:%M").to_string(),
      "07:15"
    );
  }

  #[test]
  fn missing_key_field_is_rejected() {
    let mut r = row();
    r.as_object_mut().unwrap().remove("airline");
    let err = validate_row(4, r).unwrap_err();
    assert_eq!(err.position, 4);
    assert_eq!(err.reasons, vec!["airline is required".to_string()]);
  }

  #[test]
  fn blank_key_field_is_rejected() {
    let mut r = row();
    r["travel_class"] = json!("   ");
    let err = validate_row(0, r).unwrap_err();
    assert!(err.reasons.iter().any(|p| p.contains("travel_class")));
  }

  #[test]
  fn unparseable_datetime_is_rejected() {
    let mut r = row();
    r["departure_datetime"] = json!("next tuesday");
    let err = validate_row(0, r).unwrap_err();
    assert_eq!(err.reasons.len(), 1);
    assert!(err.reasons[0].contains("not a recognised date/time"));
  }

  #[test]
  fn missing_datetime_is_required() {
    let mut r = row();
    r["departure_datetime"] = serde_json::Value::Null;
    let err = validate_row(0, r).unwrap_err();
    assert_eq!(err.reasons, vec!["departure_datetime is required".to_string()]);
  }

  #[test]
  fn wrong_json_type_is_rejected() {
    let mut r = row();
    r["total_fare_bdt"] = json!("lots");
    let err = validate_row(2, r).unwrap_err();
    assert!(err.reasons[0].starts_with("malformed row"));

    let err = validate_row(3, json!(["not", "an", "object"])).unwrap_err();
    assert_eq!(err.position, 3);
  }

  #[test]
  fn every_problem_is_reported() {
    let mut r = row();
    r["source_code"] = json!("DHAKA");
    r["base_fare_bdt"] = json!(-5.0);
    let err = validate_row(0, r).unwrap_err();
    assert_eq!(err.reasons.len(), 2, "{:?}", err.reasons);
    assert!(err.to_string().starts_with("row 0 rejected: "));
  }
}
