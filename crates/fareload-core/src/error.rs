//! Error types for `fareload-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Another run already holds the lock for this dataset.
  #[error("run in progress for dataset {dataset:?} (held by run {holder})")]
  RunInProgress { dataset: String, holder: Uuid },

  #[error("run cancelled")]
  Cancelled,

  #[error("batch is not a JSON array of rows: {0}")]
  Batch(String),

  #[error("unknown load type: {0:?}")]
  UnknownLoadType(String),

  #[error("classification worker failed: {0}")]
  Worker(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error into [`Error::Store`].
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
