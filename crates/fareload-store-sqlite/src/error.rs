//! Error type for `fareload-store-sqlite`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] fareload_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unrecognised column value: {0}")]
  Decode(String),

  /// The active index the changes were computed from no longer matches the
  /// table: `0` was expected to be an active row.
  #[error("record {0} is not active; the active index is stale")]
  StaleIndex(uuid::Uuid),

  #[error("transaction cancelled")]
  Cancelled,

  #[error("transaction exceeded its {0:?} timeout")]
  Timeout(Duration),
}

/// Errors raised inside a connection closure travel back as
/// [`tokio_rusqlite::Error::Other`]; unwrap ours so callers can match on them.
impl From<tokio_rusqlite::Error> for Error {
  fn from(err: tokio_rusqlite::Error) -> Self {
    match err {
      tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Error>() {
        Ok(ours) => *ours,
        Err(other) => Self::Database(tokio_rusqlite::Error::Other(other)),
      },
      other => Self::Database(other),
    }
  }
}

impl Error {
  /// Wrap `self` for return from inside a connection closure.
  pub(crate) fn abort(self) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(self))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
