use crate::domain::emv3ds::ThreeDsCompInd;
use crate::domain::ports::{CorrelationKey, NotificationKind, NotificationStoreRef};
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use tracing::{info, instrument};

#[derive(Deserialize)]
struct MethodNotification {
    #[serde(rename = "threeDSCompInd", default)]
    three_ds_comp_ind: Option<String>,
}

#[derive(Deserialize)]
struct ChallengeNotification {
    #[serde(rename = "CRES", alias = "cres", default)]
    cres: Option<String>,
}

/// Entry point for the two ACS callbacks. The web layer routes
/// `@notificationRedsys3DS/{order}/{trans_id}` and
/// `@notificationRedsysChallenge/{order}/{trans_id}` here with the raw body.
#[derive(Clone)]
pub struct WebhookRecorder {
    store: NotificationStoreRef,
}

fn parse_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| PaymentError::Validation {
        field: "body",
        reason: e.to_string(),
    })
}

impl WebhookRecorder {
    pub fn new(store: NotificationStoreRef) -> Self {
        Self { store }
    }

    /// Stores the method completion indicator for 15 minutes. A body without
    /// one records `N`.
    #[instrument(skip(self, body))]
    pub async fn record_method_notification(
        &self,
        order: &str,
        trans_id: &str,
        body: &[u8],
    ) -> Result<ThreeDsCompInd> {
        let key = CorrelationKey::parse(order, trans_id)?;
        let notification: MethodNotification = parse_body(body)?;
        let comp_ind = notification
            .three_ds_comp_ind
            .as_deref()
            .map_or(ThreeDsCompInd::N, ThreeDsCompInd::from_notification);

        let kind = NotificationKind::MethodCompletion;
        self.store
            .put(&key.storage_key(kind), comp_ind.as_str(), kind.ttl())
            .await?;
        info!(%comp_ind, "method notification recorded");
        Ok(comp_ind)
    }

    /// Stores the challenge response token for 30 minutes.
    #[instrument(skip(self, body))]
    pub async fn record_challenge_notification(
        &self,
        order: &str,
        trans_id: &str,
        body: &[u8],
    ) -> Result<()> {
        let key = CorrelationKey::parse(order, trans_id)?;
        let notification: ChallengeNotification = parse_body(body)?;
        let cres = notification
            .cres
            .as_deref()
            .map(str::trim)
            .filter(|cres| !cres.is_empty())
            .ok_or_else(|| PaymentError::Validation {
                field: "CRES",
                reason: "missing or empty".to_string(),
            })?;

        let kind = NotificationKind::ChallengeResponse;
        self.store
            .put(&key.storage_key(kind), cres, kind.ttl())
            .await?;
        info!("challenge notification recorded");
        Ok(())
    }

    /// Indicator recorded for `(order, trans_id)`, `N` if none is stored.
    pub async fn method_completion(&self, order: &str, trans_id: &str) -> Result<ThreeDsCompInd> {
        let key = CorrelationKey::parse(order, trans_id)?;
        let stored = self
            .store
            .get(&key.storage_key(NotificationKind::MethodCompletion))
            .await?;
        Ok(stored
            .as_deref()
            .map_or(ThreeDsCompInd::N, ThreeDsCompInd::from_notification))
    }
}
