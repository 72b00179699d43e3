//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health               - Liveness
//! GET    /health/ready         - Readiness (store and identity locks)
//!
//! # Polls
//! POST   /polls                - Create the poll
//! GET    /polls/current        - Current poll (?includeClosed=true)
//! PUT    /polls                - Update, close or reopen (owner only)
//! DELETE /polls                - Delete poll and votes (creating client only)
//! GET    /polls/results        - Poll with results
//!
//! # Votes (rate limited)
//! POST   /votes                - Submit a ballot
//! GET    /votes/status         - Eligibility (?voterIdentifier=)
//!
//! # Auth (rate limited)
//! POST   /auth/signin          - Sign in with an email
//! POST   /auth/signout         - Sign out
//! GET    /auth/status          - Sign-in status (?email=)
//!
//! # Realtime
//! GET    /events               - Server-Sent Events
//! ```

pub mod auth;
pub mod events;
pub mod polls;
pub mod votes;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::middleware::{auth_rate_limiter, rate_limit_response, votes_rate_limiter};
use crate::state::AppState;

/// All application routes. Rate limiters are attached when enabled in
/// `config`.
pub fn routes(config: &ServerConfig) -> Router<AppState> {
    let mut auth_routes = Router::new()
        .route("/auth/signin", post(auth::sign_in))
        .route("/auth/signout", post(auth::sign_out))
        .route("/auth/status", get(auth::status));

    let mut vote_routes = Router::new()
        .route("/votes", post(votes::submit))
        .route("/votes/status", get(votes::status));

    if config.rate_limit {
        auth_routes = auth_routes
            .layer(auth_rate_limiter())
            .layer(from_fn(rate_limit_response));
        vote_routes = vote_routes
            .layer(votes_rate_limiter())
            .layer(from_fn(rate_limit_response));
    }

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route(
            "/polls",
            post(polls::create).put(polls::update).delete(polls::delete),
        )
        .route("/polls/current", get(polls::current))
        .route("/polls/results", get(polls::results))
        .route("/events", get(events::stream))
        .merge(auth_routes)
        .merge(vote_routes)
        .fallback(not_found)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store = state.store().is_healthy();
    let identity = state.identity().is_healthy();
    let status = if store && identity {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ready" } else { "unavailable" },
            "store": store,
            "identity": identity,
            "connections": state.events().connection_count(),
        })),
    )
}

async fn not_found() -> AppError {
    AppError::NotFound("route not found".to_string())
}
