//! HTTP API for dbstudio

pub mod auth;
pub mod error;
pub mod middleware;
pub mod rest;
pub mod schema;
pub mod types;

pub use error::{ApiError, ApiJson};
pub use rest::{AppState, create_router};
pub use types::*;
