//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::middleware::SessionCache;
use crate::services::{IdentityGate, PollService, VoteAdmission};
use crate::store::PollStore;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Owns the poll store, the identity gate, the
/// event bus and the cookie session store; services borrow them per request.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    store: PollStore,
    identity: IdentityGate,
    events: EventBus,
    sessions: SessionCache,
}

impl AppState {
    /// Create fresh, empty state for `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let identity = IdentityGate::new(config.session_ttl);
        let events = EventBus::new(config.event_capacity);
        let sessions = SessionCache::from_config(&config);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store: PollStore::new(),
                identity,
                events,
                sessions,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &PollStore {
        &self.inner.store
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityGate {
        &self.inner.identity
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Store behind the cookie session layer.
    #[must_use]
    pub fn sessions(&self) -> &SessionCache {
        &self.inner.sessions
    }

    /// Poll lifecycle service bound to this state.
    #[must_use]
    pub fn polls(&self) -> PollService<'_> {
        PollService::new(self.store(), self.events(), self.identity())
    }

    /// Vote admission service bound to this state.
    #[must_use]
    pub fn admission(&self) -> VoteAdmission<'_> {
        VoteAdmission::new(self.store(), self.events(), self.identity())
    }
}
