//! Load history handlers.
//!
//! | Method | Path            | Notes                                       |
//! |--------|-----------------|---------------------------------------------|
//! | GET    | `/loads`        | `?days=` (default 30), `?limit=` (def. 10)  |
//! | GET    | `/loads/latest` | 404 before the first committed run          |

use axum::{
  Json,
  extract::{Query, State},
};
use chrono::{Duration, Utc};
use fareload_core::{
  load::LoadMetadata,
  store::{LoadQuery, ModelRegistry, RecordStore},
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

const DEFAULT_DAYS: u32 = 30;
const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
  pub days:  Option<u32>,
  pub limit: Option<usize>,
}

/// `GET /loads`
pub async fn list<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<LoadMetadata>>, ApiError>
where
  S: RecordStore + ModelRegistry + 'static,
{
  let days = params.days.unwrap_or(DEFAULT_DAYS);
  let query = LoadQuery {
    dataset: state.dataset.to_string(),
    since:   Some(Utc::now() - Duration::days(i64::from(days))),
    limit:   Some(params.limit.unwrap_or(DEFAULT_LIMIT)),
  };
  let loads = state
    .pipeline
    .store()
    .load_history(&query)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(loads))
}

/// `GET /loads/latest`
pub async fn latest<S>(
  State(state): State<ApiState<S>>,
) -> Result<Json<LoadMetadata>, ApiError>
where
  S: RecordStore + ModelRegistry + 'static,
{
  state
    .pipeline
    .store()
    .latest_load(&state.dataset)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .map(Json)
    .ok_or_else(|| {
      ApiError::NotFound(format!("no loads for dataset {}", state.dataset))
    })
}
