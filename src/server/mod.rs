//! HTTP server for the character chat core.
//!
//! # Endpoints
//!
//! - `GET  /health`           : liveness check
//! - `GET  /characters`       : list characters
//! - `POST /switch_character` : activate a character
//! - `POST /chat`             : talk to the active character
//! - `GET  /status`           : which character is active

pub mod routes;

pub use routes::{app_router, AppState, SwitchRequest};
