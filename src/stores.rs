//! Storage for suspended tool invocations.
//!
//! - [`ContinuationToken`] - opaque, single-use handle returned to callers
//! - [`StoredContinuation`] - the private state behind a token
//! - [`ContinuationStore`] - the three operations every backend provides
//!
//! # Built-in Implementation
//!
//! [`InMemoryContinuationStore`] is safe to share between engines in one
//! process. For multi-process deployments implement [`ContinuationStore`]
//! over a shared backend (e.g. Redis, Postgres) with an atomic
//! read-and-delete for [`ContinuationStore::take`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Opaque handle for a suspended tool call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContinuationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredContinuation {
    /// Everything needed to re-enter the suspended invocation
    pub private_state: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Session that may consume the token
    pub owner_scope: String,
}

impl StoredContinuation {
    #[must_use]
    pub fn new(private_state: serde_json::Value, owner_scope: impl Into<String>, ttl: Duration) -> Self {
        let created_at = OffsetDateTime::now_utc();
        let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
        Self {
            private_state,
            created_at,
            expires_at: created_at.saturating_add(ttl),
            owner_scope: owner_scope.into(),
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

#[async_trait]
pub trait ContinuationStore: Send + Sync {
    /// Store the state behind a freshly minted token.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be stored.
    async fn put(&self, token: &ContinuationToken, entry: StoredContinuation) -> Result<()>;

    /// Atomically consume a token.
    ///
    /// Returns `None` when the token is unknown, already consumed, expired,
    /// or owned by another scope. A scope mismatch must leave the entry in
    /// place. Of any number of concurrent calls for one token, at most one
    /// receives the entry.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    async fn take(
        &self,
        token: &ContinuationToken,
        owner_scope: &str,
    ) -> Result<Option<StoredContinuation>>;

    /// Discard a token. Returns whether it was present.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    async fn delete(&self, token: &ContinuationToken) -> Result<bool>;

    /// Drop expired entries, returning how many were removed.
    ///
    /// Backends with native expiry can keep the default no-op.
    ///
    /// # Errors
    /// Returns an error if the backend fails.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// In-process continuation store guarded by a lock.
#[derive(Default)]
pub struct InMemoryContinuationStore {
    entries: RwLock<HashMap<String, StoredContinuation>>,
}

impl InMemoryContinuationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live or not-yet-reaped entries.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.read().ok().context("lock poisoned")?.len())
    }

    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Periodically purge expired entries until the store is dropped.
    #[must_use]
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    log::debug!("Continuation store dropped, reaper exiting");
                    break;
                };
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => log::debug!("Reaped expired continuations count={n}"),
                    Err(e) => log::warn!("Continuation reaper failed: {e}"),
                }
            }
        })
    }
}

#[async_trait]
impl ContinuationStore for InMemoryContinuationStore {
    async fn put(&self, token: &ContinuationToken, entry: StoredContinuation) -> Result<()> {
        self.entries
            .write()
            .ok()
            .context("lock poisoned")?
            .insert(token.0.clone(), entry);
        Ok(())
    }

    async fn take(
        &self,
        token: &ContinuationToken,
        owner_scope: &str,
    ) -> Result<Option<StoredContinuation>> {
        let mut entries = self.entries.write().ok().context("lock poisoned")?;
        let Some(entry) = entries.get(&token.0) else {
            return Ok(None);
        };
        if entry.owner_scope != owner_scope {
            log::warn!(
                "Continuation scope mismatch token={token} owner={} caller={owner_scope}",
                entry.owner_scope
            );
            return Ok(None);
        }
        let entry = entries.remove(&token.0);
        Ok(entry.filter(|e| {
            let live = !e.is_expired();
            if !live {
                log::info!("Continuation expired token={token}");
            }
            live
        }))
    }

    async fn delete(&self, token: &ContinuationToken) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .ok()
            .context("lock poisoned")?
            .remove(&token.0)
            .is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.write().ok().context("lock poisoned")?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        Ok(before - entries.len())
    }
}
