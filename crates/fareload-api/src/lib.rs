//! JSON API for the fareload pipeline.
//!
//! Exposes an axum [`Router`] backed by any store implementing both
//! [`RecordStore`] and [`ModelRegistry`]. Auth and TLS are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", fareload_api::api_router(state))
//! ```

pub mod decision;
pub mod error;
pub mod loads;
pub mod records;
pub mod runs;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use fareload_core::{
  run::Pipeline,
  store::{ModelRegistry, RecordStore},
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct ApiState<S> {
  pub pipeline: Pipeline<S>,
  /// The dataset every route operates on.
  pub dataset:  Arc<str>,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self {
      pipeline: self.pipeline.clone(),
      dataset:  Arc::clone(&self.dataset),
    }
  }
}

/// Build the API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: ApiState<S>) -> Router<()>
where
  S: RecordStore + ModelRegistry + 'static,
{
  Router::new()
    .route("/runs", post(runs::create::<S>))
    .route("/loads", get(loads::list::<S>))
    .route("/loads/latest", get(loads::latest::<S>))
    .route("/decision", get(decision::handler::<S>))
    .route("/records/{key}", get(records::history::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
