//! REST API module
//!
//! Read-only observability surface over the relay's shared state.

pub mod generic;

pub use generic::{ApiResponse, ApiServer};
