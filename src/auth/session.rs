use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sqlx::{FromRow, PgPool};
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::proof::{IdentityProofProvider, IssuedProof, ProofTransport};
use crate::{config::SessionConfig, error::StoreError};

#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, id: &str, record: SessionRecord) -> Result<(), StoreError>;
    async fn find(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    /// Drops every record that expired at or before `now`; returns how many.
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError>;
}

pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, id: &str, record: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(record.user_id)
        .bind(record.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT user_id, expires_at
              FROM sessions
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(done.rows_affected())
    }
}

/// Session records kept in process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, id: &str, record: SessionRecord) -> Result<(), StoreError> {
        self.sessions.write().await.insert(id.to_string(), record);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, r| r.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
impl MemorySessionStore {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Server-side sessions addressed by an opaque cookie value.
pub struct SessionProvider {
    store: Arc<dyn SessionStore>,
    ttl: TimeDuration,
}

impl SessionProvider {
    pub fn new(store: Arc<dyn SessionStore>, cfg: &SessionConfig) -> Self {
        Self {
            store,
            ttl: TimeDuration::minutes(cfg.ttl_minutes),
        }
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

#[async_trait]
impl IdentityProofProvider for SessionProvider {
    fn transport(&self) -> ProofTransport {
        ProofTransport::Cookie
    }

    async fn issue(&self, user_id: Uuid) -> anyhow::Result<IssuedProof> {
        let now = OffsetDateTime::now_utc();
        // abandoned sessions never come back to be purged on lookup
        let purged = self
            .store
            .purge_expired(now)
            .await
            .context("purge expired sessions")?;
        if purged > 0 {
            debug!(purged, "expired sessions removed");
        }

        let id = new_session_id();
        let expires_at = now + self.ttl;
        self.store
            .insert(&id, SessionRecord { user_id, expires_at })
            .await
            .context("store session")?;
        debug!(user_id = %user_id, "session created");
        Ok(IssuedProof {
            value: id,
            expires_at,
        })
    }

    async fn verify(&self, proof: &str) -> anyhow::Result<Option<Uuid>> {
        if proof.is_empty() {
            return Ok(None);
        }
        let Some(record) = self.store.find(proof).await.context("load session")? else {
            return Ok(None);
        };
        if record.expires_at <= OffsetDateTime::now_utc() {
            debug!(user_id = %record.user_id, "session expired");
            self.store.delete(proof).await.context("purge session")?;
            return Ok(None);
        }
        Ok(Some(record.user_id))
    }

    async fn revoke(&self, proof: &str) -> anyhow::Result<()> {
        self.store.delete(proof).await.context("delete session")?;
        debug!("session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;

    fn provider(ttl_minutes: i64) -> (SessionProvider, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::default());
        let cfg = SessionConfig {
            cookie_name: "sid".into(),
            ttl_minutes,
            secure: true,
            same_site: SameSite::Lax,
        };
        (SessionProvider::new(store.clone(), &cfg), store)
    }

    #[test]
    fn session_ids_are_random_and_url_safe() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn issue_verify_revoke() {
        let (sessions, _) = provider(5);
        let user_id = Uuid::new_v4();
        let proof = sessions.issue(user_id).await.unwrap();
        assert!(proof.expires_at > OffsetDateTime::now_utc());
        assert_eq!(sessions.verify(&proof.value).await.unwrap(), Some(user_id));

        sessions.revoke(&proof.value).await.unwrap();
        assert_eq!(sessions.verify(&proof.value).await.unwrap(), None);

        // second revoke is fine
        sessions.revoke(&proof.value).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_and_empty_ids_are_rejected() {
        let (sessions, _) = provider(5);
        assert_eq!(sessions.verify("nope").await.unwrap(), None);
        assert_eq!(sessions.verify("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_sessions_are_purged() {
        let (sessions, store) = provider(5);
        let user_id = Uuid::new_v4();
        store
            .insert(
                "stale",
                SessionRecord {
                    user_id,
                    expires_at: OffsetDateTime::now_utc() - TimeDuration::seconds(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(sessions.verify("stale").await.unwrap(), None);
        assert!(store.find("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn issuing_sweeps_abandoned_sessions() {
        let (sessions, store) = provider(5);
        let gone = OffsetDateTime::now_utc() - TimeDuration::minutes(1);
        for i in 0..100 {
            store
                .insert(
                    &format!("abandoned-{i}"),
                    SessionRecord {
                        user_id: Uuid::new_v4(),
                        expires_at: gone,
                    },
                )
                .await
                .unwrap();
        }
        let live = sessions.issue(Uuid::new_v4()).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert!(store.find(&live.value).await.unwrap().is_some());
        assert!(store.find("abandoned-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_keeps_live_sessions() {
        let store = MemorySessionStore::default();
        let now = OffsetDateTime::now_utc();
        for (id, offset) in [("old", -10), ("edge", 0), ("fresh", 10)] {
            store
                .insert(
                    id,
                    SessionRecord {
                        user_id: Uuid::new_v4(),
                        expires_at: now + TimeDuration::minutes(offset),
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(store.purge_expired(now).await.unwrap(), 2);
        assert!(store.find("fresh").await.unwrap().is_some());
        assert_eq!(store.len().await, 1);
    }
}
