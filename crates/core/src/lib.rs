//! QuickPoll Core - Domain types and vote tallying.
//!
//! This crate provides the types and pure algorithms shared by the QuickPoll
//! components:
//! - `server` - HTTP/SSE service hosting the single active poll
//! - `integration-tests` - End-to-end tests against a spawned server
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no locks,
//! no clocks. Callers pass the current time in explicitly, which keeps every
//! rule here deterministic and easy to test.
//!
//! # Modules
//!
//! - [`types`] - Emails, typed IDs, polls and votes
//! - [`tally`] - Result aggregation for simple, rating and ranking polls

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod tally;
pub mod types;

pub use tally::{PollResults, Tally, VoterEntry, tally};
pub use types::*;
