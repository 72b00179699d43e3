//! Identity gate.
//!
//! Tracks which emails are signed in. Emails are self-asserted: signing in only
//! proves the client typed the address, so the gate's job is to keep one live
//! session per email and to tell a second client that the email is taken.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use quickpoll_core::{Email, EmailError};

use crate::models::ClientInfo;

/// Maximum display name length in characters.
pub const MAX_NAME_LENGTH: usize = 100;

/// Errors that can occur during sign-in.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    #[error("name must be between 1 and 100 characters")]
    InvalidName,

    #[error("this email is already signed in on another device")]
    AlreadySignedIn(Box<SessionConflict>),

    #[error("identity lock poisoned")]
    Poisoned,
}

/// Details of the session that blocked a sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConflict {
    pub signed_in_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// A live sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInSession {
    pub email: Email,
    pub name: String,
    pub signed_in_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    #[serde(skip)]
    pub client_id: String,
}

/// Process-wide sign-in registry keyed by normalized email.
#[derive(Clone)]
pub struct IdentityGate {
    sessions: Arc<RwLock<HashMap<Email, SignedInSession>>>,
    ttl: chrono::Duration,
}

impl IdentityGate {
    /// Create a gate whose sessions live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::default(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    fn is_live(&self, session: &SignedInSession, now: DateTime<Utc>) -> bool {
        now - session.signed_in_at < self.ttl
    }

    /// Sign `email` in for `client`.
    ///
    /// Signing in again from the client that already holds the session
    /// refreshes it.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidEmail` or `IdentityError::InvalidName` for
    /// bad input, and `IdentityError::AlreadySignedIn` when another client holds
    /// a live session for the same email.
    #[instrument(skip(self, name, client), fields(client_id = %client.client_id))]
    pub fn sign_in(
        &self,
        email: &str,
        name: Option<&str>,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Result<SignedInSession, IdentityError> {
        let email = Email::normalize(email)?;
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) if name.chars().count() > MAX_NAME_LENGTH => {
                return Err(IdentityError::InvalidName);
            }
            Some(name) => name.to_owned(),
            None => email.local_part().to_owned(),
        };

        let mut sessions = self.sessions.write().map_err(|_| IdentityError::Poisoned)?;

        if let Some(existing) = sessions.get(&email)
            && existing.client_id != client.client_id
            && self.is_live(existing, now)
        {
            warn!(email = %email, "Sign-in rejected, email already signed in elsewhere");
            return Err(IdentityError::AlreadySignedIn(Box::new(SessionConflict {
                signed_in_at: existing.signed_in_at,
                user_agent: existing.user_agent.clone(),
                ip_address: existing.ip_address.clone(),
            })));
        }

        let session = SignedInSession {
            email: email.clone(),
            name,
            signed_in_at: now,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
            client_id: client.client_id.clone(),
        };
        sessions.insert(email, session.clone());
        info!(email = %session.email, "Signed in");

        Ok(session)
    }

    /// Sign `email` out. Returns whether a session was removed.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Poisoned` if the lock is poisoned.
    pub fn sign_out(&self, email: &Email) -> Result<bool, IdentityError> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| IdentityError::Poisoned)?
            .remove(email)
            .is_some();
        if removed {
            info!(email = %email, "Signed out");
        }
        Ok(removed)
    }

    /// The live session for `email`, evicting it if it has expired.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Poisoned` if the lock is poisoned.
    pub fn session(
        &self,
        email: &Email,
        now: DateTime<Utc>,
    ) -> Result<Option<SignedInSession>, IdentityError> {
        {
            let sessions = self.sessions.read().map_err(|_| IdentityError::Poisoned)?;
            match sessions.get(email) {
                None => return Ok(None),
                Some(session) if self.is_live(session, now) => return Ok(Some(session.clone())),
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().map_err(|_| IdentityError::Poisoned)?;
        // Re-check under the write lock; a fresh sign-in may have replaced it.
        if sessions
            .get(email)
            .is_some_and(|session| !self.is_live(session, now))
        {
            sessions.remove(email);
            debug!(email = %email, "Evicted expired session");
        }
        Ok(sessions
            .get(email)
            .filter(|session| self.is_live(session, now))
            .cloned())
    }

    /// Whether `email` has a live session, evicting it if it has expired.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Poisoned` if the lock is poisoned.
    pub fn status(&self, email: &Email, now: DateTime<Utc>) -> Result<bool, IdentityError> {
        Ok(self.session(email, now)?.is_some())
    }

    /// Drop every expired session. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Poisoned` if the lock is poisoned.
    pub fn reap(&self, now: DateTime<Utc>) -> Result<usize, IdentityError> {
        let mut sessions = self.sessions.write().map_err(|_| IdentityError::Poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, session| self.is_live(session, now));
        Ok(before - sessions.len())
    }

    /// Number of stored sessions, live or not yet reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map_or(0, |sessions| sessions.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the lock is usable.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.sessions.is_poisoned()
    }
}

/// Spawn a background task that reaps expired sessions every `every`.
pub fn spawn_session_reaper(gate: IdentityGate, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "Spawning session reaper");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            match gate.reap(Utc::now()) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Reaped expired sessions"),
                Err(e) => warn!(error = %e, "Session reaper failed"),
            }
        }
    })
}
