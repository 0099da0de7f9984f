//! Run handlers.
//!
//! | Method | Path    | Notes                                               |
//! |--------|---------|-----------------------------------------------------|
//! | POST   | `/runs` | Body is a JSON array of rows; `?load_type=` opt.    |

use axum::{
  Json,
  body::Bytes,
  extract::{Query, State},
  http::StatusCode,
};
use chrono::Utc;
use fareload_core::{
  batch::Batch,
  load::LoadType,
  retrain::RetrainDecision,
  run::RunReport,
  store::{ModelRegistry, RecordStore},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
  /// `FULL` or `INCREMENTAL`, case-insensitive. Defaults to incremental.
  pub load_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
  pub report:   RunReport,
  pub decision: RetrainDecision,
}

/// `POST /runs`
///
/// Reconciles the posted batch into the configured dataset and returns the
/// run report together with the retrain decision for the new load.
pub async fn create<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<RunParams>,
  body: Bytes,
) -> Result<(StatusCode, Json<RunResponse>), ApiError>
where
  S: RecordStore + ModelRegistry + 'static,
{
  let load_type = match params.load_type.as_deref() {
    Some(raw) => raw.parse::<LoadType>()?,
    None => LoadType::Incremental,
  };
  let batch = Batch::from_json_slice(&body)?;

  // A client disconnect drops this future; the pipeline then cancels the run
  // and releases the dataset lock itself.
  let report = state
    .pipeline
    .run(&state.dataset, batch, load_type, CancellationToken::new())
    .await?;
  let decision = state
    .pipeline
    .decide_for(state.pipeline.store().as_ref(), &report.metadata, Utc::now())
    .await;

  Ok((StatusCode::CREATED, Json(RunResponse { report, decision })))
}
