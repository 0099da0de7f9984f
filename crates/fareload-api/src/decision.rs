//! `GET /decision`: the retrain decision for the dataset's latest load.
//!
//! Always answers 200. When the inputs cannot be read the decision is the
//! fail-closed `DECISION_UNAVAILABLE` one.

use axum::{Json, extract::State};
use chrono::Utc;
use fareload_core::{
  retrain::RetrainDecision,
  store::{ModelRegistry, RecordStore},
};

use crate::ApiState;

pub async fn handler<S>(
  State(state): State<ApiState<S>>,
) -> Json<RetrainDecision>
where
  S: RecordStore + ModelRegistry + 'static,
{
  let decision = state
    .pipeline
    .decide(state.pipeline.store().as_ref(), &state.dataset, Utc::now())
    .await;
  Json(decision)
}
