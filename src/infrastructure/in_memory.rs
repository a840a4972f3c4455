use crate::domain::ports::NotificationStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// A thread-safe in-memory notification store with per-key expiry.
///
/// Expired entries are hidden from reads immediately and purged on the next
/// write. Writers wake every task blocked in [`NotificationStore::wait_for`],
/// so waiting costs no polling. Suited to single-process deployments and tests.
#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    written: Arc<Notify>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not expired yet.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        {
            let mut entries = self.entries.write().await;
            entries.retain(|_, entry| entry.is_live(now));
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
        }
        self.written.notify_waiters();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn wait_for(&self, key: &str) -> Result<String> {
        loop {
            // Register before reading so a write between the two is not missed.
            let notified = self.written.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.get(key).await? {
                return Ok(value);
            }
            notified.await;
        }
    }
}
