//! Core types and reconciliation logic for the fareload pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies. It owns
//! the hasher, the differ, the load metadata recorder and the retrain decision
//! engine; storage backends implement the traits in [`store`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod batch;
pub mod diff;
pub mod error;
pub mod hash;
pub mod index;
pub mod load;
pub mod record;
pub mod retrain;
pub mod run;
pub mod store;
pub mod training;
pub mod validate;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
