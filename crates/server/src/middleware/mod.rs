//! HTTP middleware and extractors.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. Panic catcher (JSON 500)
//! 3. `TraceLayer` (`http_request` span)
//! 4. Request ID (recorded on the span, echoed in `x-request-id`)
//! 5. Session layer (tower-sessions over a bounded moka cache)
//! 6. Rate limiting on `/auth` and `/votes` (governor)

pub mod client;
pub mod json;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use client::ClientContext;
pub use json::{ApiJson, ApiQuery};
pub use rate_limit::{
    auth_rate_limiter, client_ip_from_headers, rate_limit_response, votes_rate_limiter,
};
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
pub use session::{SessionCache, create_session_layer, spawn_session_sweeper};
