//! Session management.
//!
//! Sessions live in a [`SessionStore`]: Redis when it is reachable at startup,
//! a process-local map otherwise. A session is invalid once it has been idle
//! longer than `session.max_inactive_seconds`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::core::clock::Clock;
use crate::models::{RedisConfig, SessionBackend, SessionConfig};
use crate::utils::{read_or_recover, write_or_recover};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Timed out connecting to the session store")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub last_activity: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub is_active: bool,
}

/// Data supplied when a user logs in
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub ip_address: String,
    pub user_agent: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn backend(&self) -> &'static str;
    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: StdDuration) -> Result<(), SessionError>;
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError>;
    async fn remove(&self, session_id: &str) -> Result<(), SessionError>;
    async fn entries(&self) -> Result<Vec<(String, SessionRecord)>, SessionError>;
}

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, session_id: &str, record: &SessionRecord, _ttl: StdDuration) -> Result<(), SessionError> {
        write_or_recover(&self.sessions, "sessions").insert(session_id.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(read_or_recover(&self.sessions, "sessions").get(session_id).cloned())
    }

    async fn remove(&self, session_id: &str) -> Result<(), SessionError> {
        write_or_recover(&self.sessions, "sessions").remove(session_id);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, SessionRecord)>, SessionError> {
        Ok(read_or_recover(&self.sessions, "sessions")
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect())
    }
}

/// Redis-backed session store. Records are JSON under `session:<id>` with a TTL.
pub struct RedisSessionStore {
    connection: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, SessionError> {
        let client = redis::Client::open(config.url.as_str())?;
        let connect = async {
            let mut connection = ConnectionManager::new(client).await?;
            redis::cmd("PING").query_async::<_, String>(&mut connection).await?;
            Ok::<_, redis::RedisError>(connection)
        };

        match tokio::time::timeout(StdDuration::from_secs(config.connect_timeout_seconds), connect).await {
            Ok(connection) => Ok(Self { connection: connection? }),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    fn key(session_id: &str) -> String {
        format!("session:{}", session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: StdDuration) -> Result<(), SessionError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(Self::key(session_id), payload, ttl.as_secs() as usize)
            .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn.get(Self::key(session_id)).await?;
        Ok(payload
            .map(|payload| serde_json::from_str::<SessionRecord>(&payload))
            .transpose()?)
    }

    async fn remove(&self, session_id: &str) -> Result<(), SessionError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::key(session_id)).await?;
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, SessionRecord)>, SessionError> {
        let mut conn = self.connection.clone();
        let mut keys = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>("session:*").await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let payload: Option<String> = conn.get(&key).await?;
            let Some(payload) = payload else { continue };
            match serde_json::from_str::<SessionRecord>(&payload) {
                Ok(record) => {
                    let id = key.trim_start_matches("session:").to_string();
                    entries.push((id, record));
                }
                Err(e) => warn!("Skipping unreadable session {}: {}", key, e),
            }
        }
        Ok(entries)
    }
}

/// Session manager service
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn with_store(store: Arc<dyn SessionStore>, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, config, clock }
    }

    /// Pick the store named by the configuration.
    ///
    /// `auto` falls back to memory when Redis is unreachable; `redis` fails.
    pub async fn from_config(
        config: SessionConfig,
        redis: &RedisConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        let store: Arc<dyn SessionStore> = match config.backend {
            SessionBackend::Memory => Arc::new(InMemorySessionStore::new()),
            SessionBackend::Redis => Arc::new(RedisSessionStore::connect(redis).await?),
            SessionBackend::Auto => match RedisSessionStore::connect(redis).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("Redis not available ({}), using in-memory session store", e);
                    Arc::new(InMemorySessionStore::new())
                }
            },
        };
        info!("Session store: {}", store.backend());
        Ok(Self::with_store(store, config, clock))
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    fn ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.config.max_inactive_seconds.max(1) as u64)
    }

    fn is_expired(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        now - record.last_activity > Duration::seconds(self.config.max_inactive_seconds)
    }

    pub async fn create_session(&self, session_id: &str, session: NewSession) -> Result<SessionRecord, SessionError> {
        let record = SessionRecord {
            user_id: session.user_id,
            username: session.username,
            email: session.email,
            role: session.role,
            last_activity: self.clock.now(),
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            is_active: true,
        };
        self.store.put(session_id, &record, self.ttl()).await?;
        debug!("Created session for user {}", record.user_id);
        Ok(record)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        self.store.get(session_id).await
    }

    /// Apply `update` to a session and refresh its activity time.
    /// Returns `None` when the session does not exist.
    pub async fn update_session<F>(&self, session_id: &str, update: F) -> Result<Option<SessionRecord>, SessionError>
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let Some(mut record) = self.store.get(session_id).await? else {
            return Ok(None);
        };
        update(&mut record);
        record.last_activity = self.clock.now();
        self.store.put(session_id, &record, self.ttl()).await?;
        Ok(Some(record))
    }

    pub async fn touch_session(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        self.update_session(session_id, |_| {}).await
    }

    pub async fn destroy_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.store.remove(session_id).await
    }

    pub async fn destroy_user_sessions(&self, user_id: i64) -> Result<usize, SessionError> {
        let mut destroyed = 0;
        for (session_id, record) in self.store.entries().await? {
            if record.user_id == user_id {
                self.store.remove(&session_id).await?;
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Whether a session exists, is active and has not idled out.
    /// Idle sessions are destroyed.
    pub async fn is_session_valid(&self, session_id: &str) -> Result<bool, SessionError> {
        let Some(record) = self.store.get(session_id).await? else {
            return Ok(false);
        };
        if !record.is_active {
            return Ok(false);
        }
        if self.is_expired(&record, self.clock.now()) {
            self.store.remove(session_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn cleanup_expired(&self) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let mut removed = 0;
        for (session_id, record) in self.store.entries().await? {
            if self.is_expired(&record, now) {
                self.store.remove(&session_id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} expired sessions", removed);
        }
        Ok(removed)
    }

    pub async fn active_sessions(&self, user_id: i64) -> Result<Vec<SessionRecord>, SessionError> {
        Ok(self
            .store
            .entries()
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| record.user_id == user_id && record.is_active)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use tokio_test::block_on;

    fn login(user_id: i64) -> NewSession {
        NewSession {
            user_id,
            username: format!("user{}", user_id),
            email: format!("user{}@example.com", user_id),
            role: "member".to_string(),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test-agent".to_string(),
        }
    }

    fn manager() -> (SessionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = SessionManager::with_store(
            Arc::new(InMemorySessionStore::new()),
            SessionConfig::default(),
            clock.clone(),
        );
        (manager, clock)
    }

    #[test]
    fn test_session_lifecycle() {
        block_on(async {
            let (manager, clock) = manager();
            let created = manager.create_session("s1", login(1)).await.unwrap();
            assert!(created.is_active);
            assert!(manager.is_session_valid("s1").await.unwrap());

            clock.advance(Duration::hours(23));
            let touched = manager.touch_session("s1").await.unwrap().unwrap();
            assert_eq!(touched.last_activity, clock.now());

            clock.advance(Duration::hours(23));
            assert!(manager.is_session_valid("s1").await.unwrap());

            manager.destroy_session("s1").await.unwrap();
            assert!(!manager.is_session_valid("s1").await.unwrap());
            assert!(manager.touch_session("s1").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_idle_session_is_invalid_and_removed() {
        block_on(async {
            let (manager, clock) = manager();
            manager.create_session("s1", login(1)).await.unwrap();

            clock.advance(Duration::hours(24) + Duration::seconds(1));
            assert!(!manager.is_session_valid("s1").await.unwrap());
            assert!(manager.get_session("s1").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_user_sessions() {
        block_on(async {
            let (manager, clock) = manager();
            manager.create_session("a", login(1)).await.unwrap();
            manager.create_session("b", login(1)).await.unwrap();
            manager.create_session("c", login(2)).await.unwrap();
            manager.update_session("b", |record| record.is_active = false).await.unwrap();

            assert_eq!(manager.active_sessions(1).await.unwrap().len(), 1);
            assert!(!manager.is_session_valid("b").await.unwrap());

            clock.advance(Duration::days(2));
            manager.touch_session("c").await.unwrap();
            assert_eq!(manager.cleanup_expired().await.unwrap(), 2);

            assert_eq!(manager.destroy_user_sessions(2).await.unwrap(), 1);
            assert!(manager.get_session("c").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_expired_session_is_removed_from_store() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let stale = SessionRecord {
            user_id: 1,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            role: "member".to_string(),
            last_activity: clock.now() - Duration::days(3),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test-agent".to_string(),
            is_active: true,
        };

        let mut store = MockSessionStore::new();
        store
            .expect_get()
            .times(1)
            .returning(move |_| Ok(Some(stale.clone())));
        store.expect_remove().times(1).returning(|_| Ok(()));

        let manager = SessionManager::with_store(Arc::new(store), SessionConfig::default(), clock);
        assert!(!block_on(manager.is_session_valid("s1")).unwrap());
    }

    #[test]
    fn test_store_errors_propagate() {
        let mut store = MockSessionStore::new();
        store
            .expect_get()
            .returning(|_| Err(SessionError::Timeout));

        let manager = SessionManager::with_store(
            Arc::new(store),
            SessionConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
        );
        assert!(matches!(block_on(manager.is_session_valid("s1")), Err(SessionError::Timeout)));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6379"]
    async fn test_redis_store_lists_sessions_by_scan() {
        let store = RedisSessionStore::connect(&RedisConfig::default()).await.unwrap();
        let record = SessionRecord {
            user_id: 77,
            username: "scan-user".to_string(),
            email: "scan@example.com".to_string(),
            role: "member".to_string(),
            last_activity: Utc::now(),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test-agent".to_string(),
            is_active: true,
        };
        let ids: Vec<String> = (0..25).map(|i| format!("scan-test-{}", i)).collect();
        for id in &ids {
            store.put(id, &record, StdDuration::from_secs(60)).await.unwrap();
        }

        let listed: Vec<String> = store
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| id.starts_with("scan-test-"))
            .collect();
        for id in &ids {
            assert!(listed.contains(id));
            store.remove(id).await.unwrap();
        }
    }
}
