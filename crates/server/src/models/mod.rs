//! Request-scoped models shared by middleware, services and routes.

pub mod client;
pub mod session;

pub use client::ClientInfo;
pub use session::keys as session_keys;
