//! Model training history, as written by the external training orchestrator.
//!
//! The reconciler only ever reads these rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
  pub test_r2:    Option<f64>,
  pub test_mae:   Option<f64>,
  pub test_rmse:  Option<f64>,
  pub cv_r2_mean: Option<f64>,
  pub cv_r2_std:  Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainingRecord {
  pub training_id:   Uuid,
  pub model_name:    String,
  pub model_type:    Option<String>,
  pub trained_at:    DateTime<Utc>,
  pub metrics:       TrainingMetrics,
  pub is_production: bool,
}
