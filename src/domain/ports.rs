use crate::domain::merchant::OrderId;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const METHOD_NOTIFICATION_TTL: Duration = Duration::from_secs(15 * 60);
pub const CHALLENGE_NOTIFICATION_TTL: Duration = Duration::from_secs(30 * 60);

/// Interval used by the default [`NotificationStore::wait_for`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The two out-of-band callbacks a purchase can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// `threeDSCompInd` posted by the ACS after the 3DS method ran.
    MethodCompletion,
    /// `CRES` posted after the cardholder finished the challenge.
    ChallengeResponse,
}

impl NotificationKind {
    fn prefix(&self) -> &'static str {
        match self {
            NotificationKind::MethodCompletion => "notification_3DS",
            NotificationKind::ChallengeResponse => "notification_CRES",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            NotificationKind::MethodCompletion => METHOD_NOTIFICATION_TTL,
            NotificationKind::ChallengeResponse => CHALLENGE_NOTIFICATION_TTL,
        }
    }
}

/// Order id plus the gateway's 3DS server transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub order: String,
    pub trans_id: String,
}

impl CorrelationKey {
    pub fn new(order: impl Into<String>, trans_id: impl Into<String>) -> Self {
        Self {
            order: order.into(),
            trans_id: trans_id.into(),
        }
    }

    /// Checks both ids before they end up in storage keys and callback URLs.
    /// The transaction id must be non-empty and free of `:`.
    pub fn parse(order: &str, trans_id: &str) -> Result<Self> {
        let order = OrderId::new(order)?;
        let trans_id = trans_id.trim();
        if trans_id.is_empty() || trans_id.contains(':') {
            return Err(PaymentError::Validation {
                field: "trans_id",
                reason: "must be non-empty and contain no ':'".to_string(),
            });
        }
        Ok(Self::new(order.as_str(), trans_id))
    }

    pub fn storage_key(&self, kind: NotificationKind) -> String {
        format!("{}:{}:{}", kind.prefix(), self.order, self.trans_id)
    }
}

/// Short-lived key-value store bridging webhook deliveries into a running
/// purchase. Expired and never-written keys both read as `None`.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Resolves once `key` holds a value. Never times out on its own; callers
    /// bound it with a deadline.
    async fn wait_for(&self, key: &str) -> Result<String> {
        loop {
            if let Some(value) = self.get(key).await? {
                return Ok(value);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

pub type NotificationStoreRef = Arc<dyn NotificationStore>;
