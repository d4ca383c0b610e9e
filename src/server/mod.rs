//! Health probe for the bot process.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness probe with uptime and LLM token usage

pub mod routes;

pub use routes::{app_router, serve, HealthState};
