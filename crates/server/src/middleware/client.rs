//! Client identity extractor.
//!
//! Resolves who is calling from the cookie session and the request: a
//! stable client id (issued on first contact), the client IP, the user agent
//! and the email the client is signed in with.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts},
};
use chrono::Utc;
use tower_sessions::Session;
use uuid::Uuid;

use quickpoll_core::Email;

use super::rate_limit::client_ip_from_headers;
use crate::error::AppError;
use crate::models::{ClientInfo, session_keys};
use crate::state::AppState;

/// The calling client plus a handle on its cookie session.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(client: ClientContext) -> impl IntoResponse {
///     client.info.client_id.clone()
/// }
/// ```
pub struct ClientContext {
    session: Session,
    pub info: ClientInfo,
}

impl FromRequestParts<AppState> for ClientContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| AppError::Internal("session layer not installed".to_string()))?;

        let client_id = issued_token(&session, session_keys::CLIENT_ID).await?;
        let creator_alias = issued_token(&session, session_keys::CREATOR_ALIAS).await?;

        let ip_address = client_ip_from_headers(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip())
            })
            .map(|ip| ip.to_string());

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // Only honour the remembered email while this client still holds the
        // live sign-in for it.
        let remembered = session
            .get::<String>(session_keys::CURRENT_VOTER)
            .await?
            .and_then(|raw| Email::normalize(&raw).ok());
        let signed_in_email = match remembered {
            Some(email) => state
                .identity()
                .session(&email, Utc::now())?
                .filter(|live| live.client_id == client_id)
                .map(|live| live.email),
            None => None,
        };

        Ok(Self {
            session,
            info: ClientInfo {
                client_id,
                creator_alias,
                ip_address,
                user_agent,
                signed_in_email,
            },
        })
    }
}

/// Read the random token stored under `key`, issuing one on first use.
async fn issued_token(session: &Session, key: &str) -> Result<String, AppError> {
    if let Some(token) = session.get::<String>(key).await? {
        return Ok(token);
    }
    let token = Uuid::new_v4().to_string();
    session.insert(key, &token).await?;
    Ok(token)
}

impl ClientContext {
    /// Remember `email` as this client's signed-in identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be modified.
    pub async fn remember_voter(&self, email: &Email) -> Result<(), AppError> {
        self.session
            .insert(session_keys::CURRENT_VOTER, email.as_str())
            .await?;
        Ok(())
    }

    /// Forget the signed-in identity, keeping the client id.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be modified.
    pub async fn forget_voter(&self) -> Result<(), AppError> {
        self.session
            .remove::<String>(session_keys::CURRENT_VOTER)
            .await?;
        Ok(())
    }

    /// Email remembered in the cookie session, live or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be read.
    pub async fn remembered_voter(&self) -> Result<Option<Email>, AppError> {
        Ok(self
            .session
            .get::<String>(session_keys::CURRENT_VOTER)
            .await?
            .and_then(|raw| Email::normalize(&raw).ok()))
    }
}
