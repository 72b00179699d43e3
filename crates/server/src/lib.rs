//! QuickPoll server.
//!
//! Hosts one live poll at a time over JSON/HTTP and pushes every change to
//! connected viewers over Server-Sent Events. All state is in memory.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

pub use app::build_router;
pub use config::{ConfigError, Environment, LogFormat, ServerConfig};
pub use error::AppError;
pub use state::AppState;
