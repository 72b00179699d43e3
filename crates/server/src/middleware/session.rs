//! Session middleware configuration.
//!
//! Client identity lives in a bounded in-memory `tower-sessions` store. The
//! cookie only carries the session id; the client id and signed-in email stay
//! server-side.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_sessions::{
    Expiry, SessionManagerLayer, SessionStore,
    cookie::{SameSite, time::OffsetDateTime},
    session::{Id, Record},
    session_store,
};
use tracing::{debug, info};

use crate::config::ServerConfig;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "quickpoll_session";

/// In-memory session store that forgets idle sessions.
///
/// Records are dropped after `ttl` without a load or save. Once `capacity`
/// is reached the least used records are evicted.
#[derive(Clone)]
pub struct SessionCache {
    records: Cache<Id, Record>,
}

impl SessionCache {
    #[must_use]
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let records = Cache::builder()
            .max_capacity(capacity)
            .time_to_idle(ttl)
            .build();
        Self { records }
    }

    /// Store sized from `session_capacity` and `session_ttl`.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.session_capacity, config.session_ttl)
    }

    /// Approximate number of stored sessions.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.records.entry_count()
    }

    /// Drop expired records and apply capacity eviction now.
    pub async fn sweep(&self) {
        self.records.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("entry_count", &self.records.entry_count())
            .finish()
    }
}

#[async_trait]
impl SessionStore for SessionCache {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        while self.records.contains_key(&record.id) {
            record.id = Id::default();
        }
        self.records.insert(record.id, record.clone()).await;
        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.records.insert(record.id, record.clone()).await;
        Ok(())
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        Ok(self
            .records
            .get(session_id)
            .await
            .filter(|record| record.expiry_date > OffsetDateTime::now_utc()))
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.records.invalidate(session_id).await;
        Ok(())
    }
}

/// Create the session layer over `store`.
///
/// Sessions expire after `session_ttl` of inactivity. Cookies are marked
/// `Secure` when the public base URL is https.
#[must_use]
pub fn create_session_layer(
    config: &ServerConfig,
    store: SessionCache,
) -> SessionManagerLayer<SessionCache> {
    let ttl = i64::try_from(config.session_ttl.as_secs()).unwrap_or(i64::MAX);

    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(ttl),
        ))
        .with_secure(config.secure_cookies())
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

/// Spawn a background task that sweeps `store` every `every`.
///
/// The cache also cleans up as it is used; this keeps an idle server from
/// holding expired records.
pub fn spawn_session_sweeper(store: SessionCache, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "Spawning cookie session sweeper");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;
            store.sweep().await;
            debug!(sessions = store.entry_count(), "Swept cookie sessions");
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use tower_sessions::cookie::time;

    use super::*;

    fn record(lifetime: time::Duration) -> Record {
        Record {
            id: Id::default(),
            data: HashMap::new(),
            expiry_date: OffsetDateTime::now_utc() + lifetime,
        }
    }

    #[tokio::test]
    async fn test_idle_sessions_are_removed() {
        let store = SessionCache::new(100, Duration::from_millis(50));
        let mut rec = record(time::Duration::hours(1));
        store.create(&mut rec).await.unwrap();
        store.sweep().await;
        assert_eq!(store.entry_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        store.sweep().await;

        assert_eq!(store.entry_count(), 0);
        assert!(store.load(&rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_skips_expired_record() {
        let store = SessionCache::new(100, Duration::from_secs(60));
        let rec = record(time::Duration::seconds(-1));
        store.save(&rec).await.unwrap();
        assert!(store.load(&rec.id).await.unwrap().is_none());

        let live = record(time::Duration::hours(1));
        store.save(&live).await.unwrap();
        let loaded = store.load(&live.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, live.id);
    }

    #[tokio::test]
    async fn test_capacity_bounds_store() {
        let store = SessionCache::new(8, Duration::from_secs(60));
        for _ in 0..100 {
            let mut rec = record(time::Duration::hours(1));
            store.create(&mut rec).await.unwrap();
        }
        store.sweep().await;
        assert!(store.entry_count() <= 8);
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let store = SessionCache::new(100, Duration::from_secs(60));
        let mut rec = record(time::Duration::hours(1));
        store.create(&mut rec).await.unwrap();
        store.delete(&rec.id).await.unwrap();
        assert!(store.load(&rec.id).await.unwrap().is_none());
    }
}
