//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. `AppError` maps each failure
//! onto a stable error code and HTTP status and renders
//! `{"error": {"code", "message", "details"?}}`. Server errors are captured to
//! Sentry before responding.

use axum::{
    Json,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::services::{AdmissionError, IdentityError, PollError};
use crate::store::StoreError;

/// Message shown to clients in place of internal error details.
const INTERNAL_MESSAGE: &str = "Internal server error";

/// Application-level error type for the server.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cookie session could not be read or written.
    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Malformed or invalid request.
    #[error("{0}")]
    BadRequest(String),

    #[error("too many requests, please slow down")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

/// The real message behind a generic 500, attached to the response so
/// development builds can surface it.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

const fn store_status(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::ActivePollExists => (StatusCode::CONFLICT, "ACTIVE_POLL_EXISTS"),
        StoreError::NoActivePoll => (StatusCode::NOT_FOUND, "NO_ACTIVE_POLL"),
        StoreError::PollClosed => (StatusCode::GONE, "POLL_CLOSED"),
        StoreError::Poisoned => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl AppError {
    /// HTTP status and stable error code for this error.
    #[must_use]
    pub const fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Store(err)
            | Self::Poll(PollError::Store(err))
            | Self::Admission(AdmissionError::Store(err)) => store_status(err),

            Self::Poll(PollError::Validation(_))
            | Self::Identity(IdentityError::InvalidEmail(_) | IdentityError::InvalidName)
            | Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            Self::Poll(PollError::Expired) | Self::Admission(AdmissionError::PollExpired) => {
                (StatusCode::GONE, "POLL_EXPIRED")
            }
            Self::Poll(PollError::Closed) | Self::Admission(AdmissionError::PollClosed) => {
                (StatusCode::GONE, "POLL_CLOSED")
            }
            Self::Poll(PollError::NotOwner) | Self::Admission(AdmissionError::NotAuthorized) => {
                (StatusCode::FORBIDDEN, "NOT_AUTHORIZED")
            }

            Self::Admission(AdmissionError::NoActivePoll) => {
                (StatusCode::NOT_FOUND, "NO_ACTIVE_POLL")
            }
            Self::Admission(AdmissionError::InvalidVoteData(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_VOTE_DATA")
            }
            Self::Admission(AdmissionError::AuthRequired) => {
                (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED")
            }
            Self::Admission(AdmissionError::AlreadyVoted { .. }) => {
                (StatusCode::CONFLICT, "ALREADY_VOTED")
            }

            Self::Identity(IdentityError::AlreadySignedIn(_)) => {
                (StatusCode::CONFLICT, "ALREADY_SIGNED_IN")
            }

            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),

            Self::Identity(IdentityError::Poisoned) | Self::Session(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }

    /// Structured context for errors that carry it.
    fn details(&self) -> Option<Value> {
        match self {
            Self::Admission(AdmissionError::AlreadyVoted {
                vote_id,
                submitted_at,
            }) => Some(json!({ "voteId": vote_id, "submittedAt": submitted_at })),
            Self::Identity(IdentityError::AlreadySignedIn(conflict)) => {
                serde_json::to_value(conflict).ok()
            }
            _ => None,
        }
    }
}

fn error_body(code: &str, message: &str, details: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let (Some(details), Some(object)) = (details, error.as_object_mut()) {
        object.insert("details".to_string(), details);
    }
    json!({ "error": error })
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );

            let mut response =
                (status, Json(error_body(code, INTERNAL_MESSAGE, None))).into_response();
            response
                .extensions_mut()
                .insert(InternalErrorDetail(self.to_string()));
            return response;
        }

        tracing::debug!(code, error = %self, "Request rejected");
        (status, Json(error_body(code, &self.to_string(), self.details()))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Development-only middleware that swaps the generic 500 message for the
/// underlying error.
pub async fn expose_error_detail(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let Some(InternalErrorDetail(detail)) = response.extensions().get().cloned() else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    let body = error_body("INTERNAL_ERROR", &detail, None);
    (parts, Json(body)).into_response()
}
