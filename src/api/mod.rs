//! HTTP API for Tributary.
//!
//! Exposes the search pipeline as a JSON endpoint next to health and
//! Prometheus metrics.

mod handlers;
mod rest;

pub use handlers::*;
pub use rest::*;
