//! The retrain decision engine.
//!
//! [`decide`] is a pure OR over independent triggers; each trigger that holds
//! contributes its own reason. [`decide_from`] wraps it for callers that read
//! their inputs from fallible sources and fails closed on bad input.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  load::{LoadMetadata, LoadType},
  training::ModelTrainingRecord,
};

// ─── Thresholds ──────────────────────────────────────────────────────────────

/// Trigger thresholds. Every comparison is strictly greater-than.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainThresholds {
  /// Structural churn, in percent of the previously active set.
  pub min_change_percentage:      f64,
  pub min_new_records:            u64,
  pub max_days_since_training:    i64,
  pub force_retrain_on_full_load: bool,
}

impl Default for RetrainThresholds {
  fn default() -> Self {
    Self {
      min_change_percentage:      5.0,
      min_new_records:            1000,
      max_days_since_training:    30,
      force_retrain_on_full_load: true,
    }
  }
}

// ─── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
  ChangeThreshold,
  VolumeThreshold,
  ModelAge,
  FullReload,
  NoBaseline,
  /// The inputs could not be read or were corrupt.
  DecisionUnavailable,
}

impl ReasonCode {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::ChangeThreshold => "CHANGE_THRESHOLD",
      Self::VolumeThreshold => "VOLUME_THRESHOLD",
      Self::ModelAge => "MODEL_AGE",
      Self::FullReload => "FULL_RELOAD",
      Self::NoBaseline => "NO_BASELINE",
      Self::DecisionUnavailable => "DECISION_UNAVAILABLE",
    }
  }
}

impl fmt::Display for ReasonCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrainDecision {
  pub should_retrain: bool,
  pub reasons:        Vec<ReasonCode>,
}

impl RetrainDecision {
  fn from_reasons(reasons: Vec<ReasonCode>) -> Self {
    Self { should_retrain: !reasons.is_empty(), reasons }
  }

  pub fn unavailable() -> Self {
    Self {
      should_retrain: false,
      reasons:        vec![ReasonCode::DecisionUnavailable],
    }
  }

  pub fn has(&self, reason: ReasonCode) -> bool {
    self.reasons.contains(&reason)
  }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Decide whether to retrain after the load described by `load`.
///
/// `last_production` is the most recent production model, if any. `now` is
/// passed in so the result depends on nothing but the arguments.
pub fn decide(
  load: &LoadMetadata,
  last_production: Option<&ModelTrainingRecord>,
  now: DateTime<Utc>,
  thresholds: &RetrainThresholds,
) -> RetrainDecision {
  let mut reasons = Vec::new();

  if load.change_percentage > thresholds.min_change_percentage {
    reasons.push(ReasonCode::ChangeThreshold);
  }
  if load.records_inserted > thresholds.min_new_records {
    reasons.push(ReasonCode::VolumeThreshold);
  }
  match last_production {
    Some(model) => {
      let age_days = (now - model.trained_at).num_days();
      if age_days > thresholds.max_days_since_training {
        reasons.push(ReasonCode::ModelAge);
      }
    }
    None => reasons.push(ReasonCode::NoBaseline),
  }
  if thresholds.force_retrain_on_full_load && load.load_type == LoadType::Full
  {
    reasons.push(ReasonCode::FullReload);
  }

  RetrainDecision::from_reasons(reasons)
}

/// Like [`decide`], but takes the raw results of reading its inputs.
///
/// Any read error, a missing load, or a corrupt change percentage yields
/// `should_retrain = false` with [`ReasonCode::DecisionUnavailable`] and an
/// error-level log. This function never fails.
pub fn decide_from<E1, E2>(
  load: Result<Option<LoadMetadata>, E1>,
  last_production: Result<Option<ModelTrainingRecord>, E2>,
  now: DateTime<Utc>,
  thresholds: &RetrainThresholds,
) -> RetrainDecision
where
  E1: fmt::Display,
  E2: fmt::Display,
{
  let load = match load {
    Ok(Some(load)) => load,
    Ok(None) => {
      tracing::error!("retrain decision unavailable: no load metadata");
      return RetrainDecision::unavailable();
    }
    Err(e) => {
      tracing::error!(error = %e, "retrain decision unavailable: load metadata unreadable");
      return RetrainDecision::unavailable();
    }
  };

  if !load.change_percentage.is_finite() || load.change_percentage < 0.0 {
    tracing::error!(
      run_id = %load.run_id,
      change_percentage = load.change_percentage,
      "retrain decision unavailable: corrupt load metadata"
    );
    return RetrainDecision::unavailable();
  }

  let last_production = match last_production {
    Ok(model) => model,
    Err(e) => {
      tracing::error!(error = %e, "retrain decision unavailable: model registry unreadable");
      return RetrainDecision::unavailable();
    }
  };

  decide(&load, last_production.as_ref(), now, thresholds)
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};
  use uuid::Uuid;

  use super::*;
  use crate::training::TrainingMetrics;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
  }

  fn load(change_percentage: f64, inserted: u64) -> LoadMetadata {
    LoadMetadata {
      run_id: Uuid::new_v4(),
      dataset: "flights".into(),
      load_timestamp: now(),
      load_type: LoadType::Incremental,
      records_inserted: inserted,
      records_updated: 0,
      records_deleted: 0,
      records_unchanged: 0,
      records_rejected: 0,
      duplicate_keys: 0,
      previous_active_count: 1000,
      change_percentage,
      started_at: now(),
      execution_time_ms: 0,
    }
  }

  fn model(days_old: i64) -> ModelTrainingRecord {
    ModelTrainingRecord {
      training_id:   Uuid::new_v4(),
      model_name:    "fare_regressor".into(),
      model_type:    Some("GradientBoosting".into()),
      trained_at:    now() - Duration::days(days_old),
      metrics:       TrainingMetrics::default(),
      is_production: true,
    }
  }

  fn run(load: &LoadMetadata, model: Option<&ModelTrainingRecord>) -> RetrainDecision {
    decide(load, model, now(), &RetrainThresholds::default())
  }

  #[test]
  fn structural_change_alone_triggers() {
    let d = run(&load(6.0, 50), Some(&model(5)));
    assert!(d.should_retrain);
    assert_eq!(d.reasons, vec![ReasonCode::ChangeThreshold]);
  }

  #[test]
  fn combined_triggers_report_every_reason() {
    let d = run(&load(6.0, 1500), Some(&model(5)));
    assert!(d.should_retrain);
    assert!(d.has(ReasonCode::ChangeThreshold));
    assert!(d.has(ReasonCode::VolumeThreshold));
    assert_eq!(d.reasons.len(), 2);
  }

  #[test]
  fn quiet_load_does_not_trigger() {
    let d = run(&load(1.0, 50), Some(&model(5)));
    assert!(!d.should_retrain);
    assert!(d.reasons.is_empty());
  }

  #[test]
  fn missing_baseline_triggers() {
    let d = run(&load(0.0, 0), None);
    assert!(d.should_retrain);
    assert_eq!(d.reasons, vec![ReasonCode::NoBaseline]);
  }

  #[test]
  fn stale_model_triggers() {
    assert!(run(&load(0.0, 0), Some(&model(31))).has(ReasonCode::ModelAge));
    assert!(!run(&load(0.0, 0), Some(&model(30))).should_retrain);
  }

  #[test]
  fn thresholds_are_strict() {
    let d = run(&load(5.0, 1000), Some(&model(5)));
    assert!(!d.should_retrain, "{:?}", d.reasons);
  }

  #[test]
  fn full_reload_triggers_unless_disabled() {
    let mut full = load(0.0, 0);
    full.load_type = LoadType::Full;
    assert_eq!(run(&full, Some(&model(1))).reasons, vec![
      ReasonCode::FullReload
    ]);

    let lenient = RetrainThresholds {
      force_retrain_on_full_load: false,
      ..Default::default()
    };
    assert!(!decide(&full, Some(&model(1)), now(), &lenient).should_retrain);
  }

  #[test]
  fn unreadable_load_fails_closed() {
    let d = decide_from::<_, std::io::Error>(
      Err(std::io::Error::other("disk on fire")),
      Ok(None),
      now(),
      &RetrainThresholds::default(),
    );
    assert_eq!(d, RetrainDecision::unavailable());

    let d = decide_from::<std::io::Error, std::io::Error>(
      Ok(None),
      Ok(None),
      now(),
      &RetrainThresholds::default(),
    );
    assert!(!d.should_retrain);
  }

  #[test]
  fn corrupt_load_fails_closed() {
    let d = decide_from::<std::io::Error, std::io::Error>(
      Ok(Some(load(f64::NAN, 5000))),
      Ok(None),
      now(),
      &RetrainThresholds::default(),
    );
    assert_eq!(d.reasons, vec![ReasonCode::DecisionUnavailable]);
  }

  #[test]
  fn unreadable_registry_fails_closed() {
    let d = decide_from::<std::io::Error, _>(
      Ok(Some(load(50.0, 5000))),
      Err(std::io::Error::other("registry down")),
      now(),
      &RetrainThresholds::default(),
    );
    assert!(!d.should_retrain);
  }

  #[test]
  fn readable_inputs_pass_through() {
    let d = decide_from::<std::io::Error, std::io::Error>(
      Ok(Some(load(6.0, 50))),
      Ok(Some(model(5))),
      now(),
      &RetrainThresholds::default(),
    );
    assert_eq!(d.reasons, vec![ReasonCode::ChangeThreshold]);
  }
}
