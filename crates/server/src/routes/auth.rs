//! Sign-in routes.
//!
//! Sign-in is self-asserted: the email is trusted as given. Each email can be
//! signed in from one client at a time; the winning client remembers the
//! email in its cookie session.

use axum::{Json, body::Bytes, extract::State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use quickpoll_core::Email;

use crate::error::{AppError, Result};
use crate::middleware::{ApiJson, ApiQuery, ClientContext};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignOutRequest {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub email: Option<String>,
}

/// `POST /auth/signin`
pub async fn sign_in(
    State(state): State<AppState>,
    client: ClientContext,
    ApiJson(request): ApiJson<SignInRequest>,
) -> Result<Json<Value>> {
    let session = state.identity().sign_in(
        &request.email,
        request.name.as_deref(),
        &client.info,
        Utc::now(),
    )?;
    client.remember_voter(&session.email).await?;

    Ok(Json(json!({ "session": session })))
}

/// `POST /auth/signout`
///
/// The body is optional; without an email the client's remembered email is
/// signed out. Signing out twice is not an error.
pub async fn sign_out(
    State(state): State<AppState>,
    client: ClientContext,
    body: Bytes,
) -> Result<Json<Value>> {
    let request: SignOutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SignOutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?
    };

    let remembered = client.remembered_voter().await?;
    let requested = request
        .email
        .as_deref()
        .map(Email::normalize)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let email = requested.or_else(|| remembered.clone());

    let Some(email) = email else {
        return Ok(Json(json!({ "signedOut": true })));
    };

    let had_session = state.identity().sign_out(&email)?;
    if remembered.as_ref() == Some(&email) {
        client.forget_voter().await?;
    }

    Ok(Json(json!({
        "signedOut": true,
        "email": email,
        "hadSession": had_session,
    })))
}

/// `GET /auth/status?email=`
pub async fn status(
    State(state): State<AppState>,
    client: ClientContext,
    ApiQuery(query): ApiQuery<StatusQuery>,
) -> Result<Json<Value>> {
    let email = match query.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(raw) => Email::normalize(raw).ok(),
        None => client.info.signed_in_email.clone(),
    };

    let Some(email) = email else {
        return Ok(Json(json!({ "signedIn": false })));
    };

    let identity = state.identity();
    let now = Utc::now();
    let session = if identity.status(&email, now)? {
        identity.session(&email, now)?
    } else {
        None
    };
    Ok(Json(json!({
        "signedIn": session.is_some(),
        "email": email,
        "session": session,
    })))
}
