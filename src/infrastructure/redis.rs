use crate::domain::ports::NotificationStore;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Notification store backed by Redis `SET EX` / `GET`, shared by every
/// process that receives webhooks.
#[derive(Clone)]
pub struct RedisNotificationStore {
    connection: ConnectionManager,
}

fn store_error(e: redis::RedisError) -> PaymentError {
    PaymentError::Store(e.to_string())
}

impl RedisNotificationStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let connection = ConnectionManager::new(client).await.map_err(store_error)?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl NotificationStore for RedisNotificationStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        // Redis rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        let _: () = connection
            .set_ex(key, value, seconds)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        connection.get(key).await.map_err(store_error)
    }
}
