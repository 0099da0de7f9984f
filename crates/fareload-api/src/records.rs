//! Record history handlers.
//!
//! | Method | Path             | Notes                                      |
//! |--------|------------------|--------------------------------------------|
//! | GET    | `/records/{key}` | Every version of a business key, newest    |
//! |        |                  | first. The key must be percent-encoded.    |

use axum::{
  Json,
  extract::{Path, State},
};
use fareload_core::{
  record::{BusinessKey, StoredRecord},
  store::{ModelRegistry, RecordStore},
};

use crate::{ApiState, error::ApiError};

/// `GET /records/{key}`
pub async fn history<S>(
  State(state): State<ApiState<S>>,
  Path(key): Path<String>,
) -> Result<Json<Vec<StoredRecord>>, ApiError>
where
  S: RecordStore + ModelRegistry + 'static,
{
  let key = BusinessKey::from_canonical(key);
  let versions = state
    .pipeline
    .store()
    .record_history(&state.dataset, &key)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  if versions.is_empty() {
    return Err(ApiError::NotFound(format!("record {key}")));
  }
  Ok(Json(versions))
}
