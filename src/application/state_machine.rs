//! 3DS2 purchase flow.
//!
//! A [`PaymentGateway`] is shared across purchases and hands out one
//! [`ProtocolStateMachine`] per purchase. The machine moves through
//!
//! ```text
//! INIT -> METHOD_REQUIRED -> METHOD_DONE -> AUTH_RESULT
//!                                        -> CHALLENGE_REQUIRED -> AUTH_RESULT
//! ```
//!
//! and any gateway call can end it in GATEWAY_ERROR instead. Steps run one at
//! a time; calling a step from the wrong state is an error and sends nothing.

use crate::config::GatewaySettings;
use crate::domain::emv3ds::{BrowserInfo, Emv3ds, ProtocolVersion, ThreeDsCompInd};
use crate::domain::merchant::{
    Amount, CardBlock, CardData, Currency, MerchantParameters, OrderId, TransactionType,
};
use crate::domain::ports::{CorrelationKey, NotificationKind, NotificationStoreRef};
use crate::domain::response::{
    AuthResult, AuthenticationOutcome, ChallengeRequest, ErrorResponse, IniciaPeticionResponse,
};
use crate::error::{PaymentError, Result, Step};
use crate::interfaces::rest::client::{Endpoint, GatewayClient, RetryPolicy};
use crate::interfaces::rest::codec::{
    self, CodecError, GatewayEnvelope, ParameterCodec, ThreeDsMethodRequest,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Everything needed to run purchases against one terminal. Cheap to clone;
/// clones share the HTTP pool and the notification store.
#[derive(Clone)]
pub struct PaymentGateway {
    settings: Arc<GatewaySettings>,
    codec: ParameterCodec,
    client: GatewayClient,
    store: NotificationStoreRef,
}

impl PaymentGateway {
    pub fn new(settings: GatewaySettings, store: NotificationStoreRef) -> Result<Self> {
        let codec = ParameterCodec::new(settings.signer()?);
        let client = GatewayClient::new(settings.gateway_url.clone()).map_err(|e| {
            PaymentError::Configuration(format!("cannot build HTTP client: {e}"))
        })?;
        Ok(Self {
            settings: Arc::new(settings),
            codec,
            client,
            store,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client = self.client.with_retry_policy(retry);
        self
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn codec(&self) -> &ParameterCodec {
        &self.codec
    }

    pub fn store(&self) -> &NotificationStoreRef {
        &self.store
    }

    pub fn start(&self, purchase: Purchase) -> ProtocolStateMachine {
        ProtocolStateMachine {
            gateway: self.clone(),
            purchase,
            state: FlowState::Init,
        }
    }
}

/// What the cardholder is paying for and with.
#[derive(Debug, Clone)]
pub struct Purchase {
    pub order: OrderId,
    pub amount: Amount,
    pub currency: Currency,
    pub transaction_type: TransactionType,
    pub card: CardData,
    /// Sends `Ds_Merchant_Excep_SCA=Y` on the first request.
    pub request_sca_exemptions: bool,
}

impl Purchase {
    pub fn new(order: OrderId, amount: Amount, card: CardData) -> Self {
        Self {
            order,
            amount,
            currency: Currency::default(),
            transaction_type: TransactionType::authorization(),
            card,
            request_sca_exemptions: true,
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_transaction_type(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_type = transaction_type;
        self
    }

    pub fn without_sca_exemptions(mut self) -> Self {
        self.request_sca_exemptions = false;
        self
    }
}

/// 3DS identifiers handed out by `iniciaPeticionREST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreeDsSession {
    pub order: String,
    pub trans_id: Option<String>,
    pub protocol_version: ProtocolVersion,
    pub method_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_psd2: Option<String>,
}

impl ThreeDsSession {
    pub fn correlation(&self) -> Option<CorrelationKey> {
        self.trans_id
            .as_ref()
            .map(|trans_id| CorrelationKey::new(self.order.clone(), trans_id.clone()))
    }
}

/// Why the method step settled on its completion indicator. Several sources
/// share the same indicator; this keeps them apart in logs and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// The ACS webhook arrived in time.
    Notification,
    /// The ACS answered the method post with an indicator.
    AcsResponse,
    /// No method URL was issued, or the card is not enrolled in 3DS2.
    NoMethodUrl,
    /// The ACS answered without an indicator.
    NoIndicator,
    TimedOut,
    /// The ACS could not be reached and no webhook arrived in time.
    AcsUnavailable,
    /// The notification store failed and the ACS gave no indicator.
    StoreUnavailable,
}

/// What went wrong on either side of the method rendezvous, read once the
/// deadline fires.
#[derive(Default)]
struct MethodSignals {
    acs_failed: AtomicBool,
    store_failed: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MethodOutcome {
    pub comp_ind: ThreeDsCompInd,
    pub source: CompletionSource,
}

impl MethodOutcome {
    fn new(comp_ind: ThreeDsCompInd, source: CompletionSource) -> Self {
        Self { comp_ind, source }
    }

    fn not_completed(source: CompletionSource) -> Self {
        Self::new(ThreeDsCompInd::N, source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Init,
    MethodRequired {
        session: ThreeDsSession,
    },
    MethodDone {
        session: ThreeDsSession,
        outcome: MethodOutcome,
    },
    ChallengeRequired {
        session: ThreeDsSession,
        challenge: ChallengeRequest,
    },
    AuthResult {
        result: AuthResult,
    },
    GatewayError {
        error: ErrorResponse,
    },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Init => "INIT",
            FlowState::MethodRequired { .. } => "METHOD_REQUIRED",
            FlowState::MethodDone { .. } => "METHOD_DONE",
            FlowState::ChallengeRequired { .. } => "CHALLENGE_REQUIRED",
            FlowState::AuthResult { .. } => "AUTH_RESULT",
            FlowState::GatewayError { .. } => "GATEWAY_ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::AuthResult { .. } | FlowState::GatewayError { .. }
        )
    }
}

enum Exchange {
    Rejected(ErrorResponse),
    Accepted(Map<String, Value>),
}

fn decoding(step: Step, order: &str, error: impl std::fmt::Display) -> PaymentError {
    PaymentError::Decoding {
        step,
        order: order.to_string(),
        reason: error.to_string(),
    }
}

/// One purchase in flight.
pub struct ProtocolStateMachine {
    gateway: PaymentGateway,
    purchase: Purchase,
    state: FlowState,
}

impl ProtocolStateMachine {
    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn purchase(&self) -> &Purchase {
        &self.purchase
    }

    pub fn into_state(self) -> FlowState {
        self.state
    }

    /// Sends the card data and learns how the card does 3DS.
    #[instrument(skip_all, fields(order = %self.purchase.order, step = "iniciaPeticion"))]
    pub async fn initiate(&mut self) -> Result<&FlowState> {
        const STEP: Step = Step::IniciaPeticion;
        if !matches!(self.state, FlowState::Init) {
            return Err(self.invalid(STEP));
        }

        let params = self.parameters(
            Some(Emv3ds::card_data()),
            self.purchase.request_sca_exemptions,
        );
        let next = match self.exchange(STEP, Endpoint::IniciaPeticion, &params).await? {
            Exchange::Rejected(error) => FlowState::GatewayError { error },
            Exchange::Accepted(map) => {
                let response: IniciaPeticionResponse = serde_json::from_value(Value::Object(map))
                    .map_err(|e| decoding(STEP, self.purchase.order.as_str(), e))?;
                FlowState::MethodRequired {
                    session: self.session_from(response)?,
                }
            }
        };
        Ok(self.transition(next))
    }

    fn session_from(&self, response: IniciaPeticionResponse) -> Result<ThreeDsSession> {
        let order = self.purchase.order.as_str();
        let emv3ds = response.emv3ds;
        let protocol_version = ProtocolVersion::parse(&emv3ds.protocol_version).ok_or_else(|| {
            decoding(
                Step::IniciaPeticion,
                order,
                format!("unsupported protocol version {:?}", emv3ds.protocol_version),
            )
        })?;
        let trans_id = emv3ds
            .three_ds_server_trans_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        match &trans_id {
            // Webhooks for this purchase must be able to find it again.
            Some(trans_id) => {
                CorrelationKey::parse(&response.order, trans_id)
                    .map_err(|e| decoding(Step::IniciaPeticion, order, e))?;
            }
            None if !protocol_version.is_legacy() => {
                return Err(decoding(
                    Step::IniciaPeticion,
                    order,
                    "threeDSServerTransID missing",
                ));
            }
            None => {}
        }
        Ok(ThreeDsSession {
            order: response.order,
            trans_id,
            protocol_version,
            method_url: emv3ds.three_ds_method_url.filter(|url| !url.trim().is_empty()),
            card_psd2: response.card_psd2,
        })
    }

    /// Runs the 3DS method and settles the completion indicator. A slow,
    /// silent or failing ACS or notification store degrades to `N`.
    #[instrument(skip_all, fields(order = %self.purchase.order, step = "threeDSMethod"))]
    pub async fn run_method(&mut self) -> Result<&FlowState> {
        let FlowState::MethodRequired { session } = &self.state else {
            return Err(self.invalid(Step::ThreeDsMethod));
        };
        let session = session.clone();
        let outcome = self.method_outcome(&session).await?;
        info!(
            comp_ind = %outcome.comp_ind,
            source = ?outcome.source,
            "3DS method settled"
        );
        Ok(self.transition(FlowState::MethodDone { session, outcome }))
    }

    async fn method_outcome(&self, session: &ThreeDsSession) -> Result<MethodOutcome> {
        let method_url = session
            .method_url
            .as_deref()
            .filter(|_| !session.protocol_version.is_legacy());
        let (Some(method_url), Some(key)) = (method_url, session.correlation()) else {
            return Ok(MethodOutcome::not_completed(CompletionSource::NoMethodUrl));
        };

        let settings = self.gateway.settings();
        let notification_url = settings.method_notification_url(&key)?;
        let request = ThreeDsMethodRequest {
            three_ds_method_data: codec::method_data(&key.trans_id, &notification_url).map_err(
                |e| PaymentError::Encoding {
                    step: Step::ThreeDsMethod,
                    order: key.order.clone(),
                    reason: e.to_string(),
                },
            )?,
        };
        let store_key = key.storage_key(NotificationKind::MethodCompletion);
        let deadline = Instant::now() + settings.method_timeout;
        let signals = MethodSignals::default();

        let rendezvous = self.method_rendezvous(method_url, &request, &store_key, &signals);
        match tokio::time::timeout_at(deadline, rendezvous).await {
            Ok(outcome) => Ok(outcome),
            Err(_) if signals.acs_failed.load(Ordering::Relaxed) => {
                warn!("3DS method ACS unavailable and no notification arrived");
                Ok(MethodOutcome::not_completed(CompletionSource::AcsUnavailable))
            }
            Err(_) if signals.store_failed.load(Ordering::Relaxed) => {
                warn!("3DS method timed out with the notification store unavailable");
                Ok(MethodOutcome::not_completed(CompletionSource::StoreUnavailable))
            }
            Err(_) => {
                warn!(
                    timeout_ms = settings.method_timeout.as_millis() as u64,
                    "3DS method timed out"
                );
                Ok(MethodOutcome::not_completed(CompletionSource::TimedOut))
            }
        }
    }

    /// Races the ACS answer against the webhook. Unbounded; the caller puts
    /// a deadline on it. Failures of either side only remove that side from
    /// the race.
    async fn method_rendezvous(
        &self,
        method_url: &str,
        request: &ThreeDsMethodRequest,
        store_key: &str,
        signals: &MethodSignals,
    ) -> MethodOutcome {
        let store = &self.gateway.store;
        let acs = self.gateway.client.post_method(method_url, request);
        let webhook = store.wait_for(store_key);
        tokio::pin!(acs);
        tokio::pin!(webhook);

        let mut acs_pending = true;
        let mut webhook_pending = true;
        loop {
            tokio::select! {
                response = &mut acs, if acs_pending => {
                    acs_pending = false;
                    match response {
                        Ok(raw) => {
                            if let Some(comp_ind) = codec::method_completion(&raw.body) {
                                return MethodOutcome::new(comp_ind, CompletionSource::AcsResponse);
                            }
                            return match store.get(store_key).await {
                                Ok(Some(value)) => MethodOutcome::new(
                                    ThreeDsCompInd::from_notification(&value),
                                    CompletionSource::Notification,
                                ),
                                Ok(None) => MethodOutcome::not_completed(CompletionSource::NoIndicator),
                                Err(e) => {
                                    warn!(error = %e, "notification store unavailable");
                                    MethodOutcome::not_completed(CompletionSource::StoreUnavailable)
                                }
                            };
                        }
                        Err(e) => {
                            warn!(error = %e, "3DS method post failed, waiting for notification");
                            signals.acs_failed.store(true, Ordering::Relaxed);
                        }
                    }
                }
                value = &mut webhook, if webhook_pending => match value {
                    Ok(value) => {
                        return MethodOutcome::new(
                            ThreeDsCompInd::from_notification(&value),
                            CompletionSource::Notification,
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "notification store unavailable, waiting for the ACS");
                        webhook_pending = false;
                        signals.store_failed.store(true, Ordering::Relaxed);
                    }
                },
                else => return MethodOutcome::not_completed(CompletionSource::StoreUnavailable),
            }
        }
    }

    /// Sends the browser fingerprint and completion indicator. Ends in a
    /// final result or a challenge.
    #[instrument(skip_all, fields(order = %self.purchase.order, step = "authentication"))]
    pub async fn authenticate(&mut self, browser: &BrowserInfo) -> Result<&FlowState> {
        const STEP: Step = Step::Authentication;
        let FlowState::MethodDone { session, outcome } = &self.state else {
            return Err(self.invalid(STEP));
        };
        let session = session.clone();
        let comp_ind = outcome.comp_ind;

        let emv3ds = match session.correlation() {
            Some(key) if !session.protocol_version.is_legacy() => Some(Emv3ds::authentication(
                session.protocol_version,
                &key.trans_id,
                comp_ind,
                &self.gateway.settings().challenge_notification_url(&key)?,
                browser,
            )),
            _ => None,
        };
        let params = self.parameters(emv3ds, false);

        let next = match self.exchange(STEP, Endpoint::TrataPeticion, &params).await? {
            Exchange::Rejected(error) => FlowState::GatewayError { error },
            Exchange::Accepted(map) => match self.outcome(STEP, map)? {
                AuthenticationOutcome::ChallengeRequired(challenge) => {
                    FlowState::ChallengeRequired { session, challenge }
                }
                AuthenticationOutcome::Completed(result) => FlowState::AuthResult { result },
            },
        };
        Ok(self.transition(next))
    }

    /// Finishes a challenge with the CRES the ACS returned.
    #[instrument(skip_all, fields(order = %self.purchase.order, step = "challengeResponse"))]
    pub async fn submit_challenge(&mut self, cres: &str) -> Result<&FlowState> {
        const STEP: Step = Step::ChallengeResponse;
        let FlowState::ChallengeRequired { session, .. } = &self.state else {
            return Err(self.invalid(STEP));
        };
        let cres = cres.trim();
        if cres.is_empty() {
            return Err(PaymentError::Validation {
                field: "cres",
                reason: "challenge response is empty".to_string(),
            });
        }

        let emv3ds = Emv3ds::challenge_response(session.protocol_version, cres);
        let params = self.parameters(Some(emv3ds), false);
        let next = match self.exchange(STEP, Endpoint::TrataPeticion, &params).await? {
            Exchange::Rejected(error) => FlowState::GatewayError { error },
            Exchange::Accepted(map) => match self.outcome(STEP, map)? {
                AuthenticationOutcome::Completed(result) => FlowState::AuthResult { result },
                AuthenticationOutcome::ChallengeRequired(_) => {
                    return Err(decoding(
                        STEP,
                        self.purchase.order.as_str(),
                        "gateway requested a second challenge",
                    ));
                }
            },
        };
        Ok(self.transition(next))
    }

    fn pending_challenge(&self) -> Result<CorrelationKey> {
        match &self.state {
            FlowState::ChallengeRequired { session, .. } => session.correlation().ok_or_else(|| {
                decoding(
                    Step::ChallengeResponse,
                    self.purchase.order.as_str(),
                    "challenge without a transaction id",
                )
            }),
            _ => Err(self.invalid(Step::ChallengeResponse)),
        }
    }

    /// Reads the CRES recorded by the challenge webhook once. If it has not
    /// arrived (or already expired) the flow stays in CHALLENGE_REQUIRED.
    pub async fn complete_challenge(&mut self) -> Result<&FlowState> {
        let key = self.pending_challenge()?;
        let store_key = key.storage_key(NotificationKind::ChallengeResponse);
        let recorded = self.gateway.store.get(&store_key).await?;
        match recorded {
            Some(cres) => self.submit_challenge(&cres).await,
            None => Err(PaymentError::ChallengePending {
                order: key.order,
                trans_id: key.trans_id,
            }),
        }
    }

    /// Like [`complete_challenge`](Self::complete_challenge), but waits up to
    /// `timeout` for the webhook.
    pub async fn await_challenge(&mut self, timeout: Duration) -> Result<&FlowState> {
        let key = self.pending_challenge()?;
        let store_key = key.storage_key(NotificationKind::ChallengeResponse);
        let waited = tokio::time::timeout(timeout, self.gateway.store.wait_for(&store_key)).await;
        match waited {
            Ok(cres) => {
                let cres = cres?;
                self.submit_challenge(&cres).await
            }
            Err(_) => Err(PaymentError::ChallengePending {
                order: key.order,
                trans_id: key.trans_id,
            }),
        }
    }

    /// Drives the flow until it ends or needs the cardholder for a challenge.
    pub async fn run(&mut self, browser: &BrowserInfo) -> Result<&FlowState> {
        loop {
            match self.state {
                FlowState::Init => {
                    self.initiate().await?;
                }
                FlowState::MethodRequired { .. } => {
                    self.run_method().await?;
                }
                FlowState::MethodDone { .. } => {
                    self.authenticate(browser).await?;
                }
                _ => return Ok(&self.state),
            }
        }
    }

    fn parameters(&self, emv3ds: Option<Emv3ds>, exception_sca: bool) -> MerchantParameters {
        let settings = self.gateway.settings();
        MerchantParameters::new(
            self.purchase.amount,
            self.purchase.currency,
            settings.merchant_code.clone(),
            self.purchase.order.clone(),
            settings.terminal.clone(),
            self.purchase.transaction_type.clone(),
        )
        .with_card(CardBlock {
            card: self.purchase.card.clone(),
            emv3ds,
            exception_sca,
        })
    }

    fn outcome(&self, step: Step, map: Map<String, Value>) -> Result<AuthenticationOutcome> {
        codec::authentication_outcome(map)
            .map_err(|e| decoding(step, self.purchase.order.as_str(), e))
    }

    /// Signs and posts `params`, then unwraps and checks the answer.
    async fn exchange(
        &self,
        step: Step,
        endpoint: Endpoint,
        params: &MerchantParameters,
    ) -> Result<Exchange> {
        let order = params.order.as_str();
        let (encoded, form) = self
            .gateway
            .codec
            .encode(params)
            .map_err(|e| PaymentError::Encoding {
                step,
                order: order.to_string(),
                reason: e.to_string(),
            })?;
        debug!(bytes = encoded.len(), endpoint = endpoint.path(), "posting request");

        let response = self
            .gateway
            .client
            .post_gateway(endpoint, &form)
            .await
            .map_err(|source| PaymentError::Transport {
                step,
                order: order.to_string(),
                source,
            })?;

        match codec::decode_envelope(&response.body).map_err(|e| decoding(step, order, e))? {
            GatewayEnvelope::Error(error) => {
                warn!(
                    error_code = %error.error_code,
                    status = response.status,
                    "gateway rejected request"
                );
                Ok(Exchange::Rejected(error))
            }
            GatewayEnvelope::Signed(signed) => {
                let map = codec::decode(&signed.merchant_parameters)
                    .map_err(|e| decoding(step, order, e))?;
                if let Some(signature) = signed.signature.as_deref() {
                    let signed_order = map
                        .get("Ds_Order")
                        .and_then(Value::as_str)
                        .unwrap_or(order);
                    let valid = self
                        .gateway
                        .codec
                        .signer()
                        .verify(signed_order, &signed.merchant_parameters, signature)
                        .map_err(|e| decoding(step, order, CodecError::from(e)))?;
                    if !valid {
                        return Err(PaymentError::InvalidSignature {
                            step,
                            order: order.to_string(),
                        });
                    }
                }
                Ok(Exchange::Accepted(map))
            }
        }
    }

    fn invalid(&self, step: Step) -> PaymentError {
        PaymentError::InvalidState {
            step,
            state: self.state.name(),
        }
    }

    fn transition(&mut self, next: FlowState) -> &FlowState {
        info!(from = self.state.name(), to = next.name(), "state transition");
        self.state = next;
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryNotificationStore;
    use secrecy::SecretString;

    fn gateway() -> PaymentGateway {
        let settings = GatewaySettings::new(
            "999008881",
            "001",
            SecretString::from("sq7HjrUOBfKmC576ILgskD5srU870gJ7"),
            "http://127.0.0.1:9/sis/rest",
            "https://shop.example.com",
        )
        .unwrap();
        PaymentGateway::new(settings, Arc::new(InMemoryNotificationStore::new())).unwrap()
    }

    fn purchase() -> Purchase {
        Purchase::new(
            OrderId::new("ABCD1234").unwrap(),
            Amount::from_minor(1249).unwrap(),
            CardData::new("4548810000000003", "1249", "123").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_steps_out_of_order_are_rejected() {
        let mut flow = gateway().start(purchase());

        let err = flow.run_method().await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidState {
                step: Step::ThreeDsMethod,
                state: "INIT"
            }
        ));
        let browser = BrowserInfo::default();
        assert!(matches!(
            flow.authenticate(&browser).await,
            Err(PaymentError::InvalidState { .. })
        ));
        assert!(matches!(
            flow.submit_challenge("cres").await,
            Err(PaymentError::InvalidState { .. })
        ));
        assert!(matches!(
            flow.complete_challenge().await,
            Err(PaymentError::InvalidState { .. })
        ));
        assert_eq!(flow.state(), &FlowState::Init);
    }

    #[tokio::test]
    async fn test_legacy_session_skips_method() {
        let gateway = gateway();
        let mut flow = gateway.start(purchase());
        flow.state = FlowState::MethodRequired {
            session: ThreeDsSession {
                order: "ABCD1234".to_string(),
                trans_id: None,
                protocol_version: ProtocolVersion::Legacy,
                method_url: Some("https://acs.example.com/method".to_string()),
                card_psd2: None,
            },
        };

        let state = flow.run_method().await.unwrap();
        let FlowState::MethodDone { outcome, .. } = state else {
            panic!("expected METHOD_DONE, got {}", state.name());
        };
        assert_eq!(outcome.comp_ind, ThreeDsCompInd::N);
        assert_eq!(outcome.source, CompletionSource::NoMethodUrl);
    }

    #[test]
    fn test_state_serialization() {
        let state = FlowState::MethodDone {
            session: ThreeDsSession {
                order: "ABCD1234".to_string(),
                trans_id: Some("tx-1".to_string()),
                protocol_version: ProtocolVersion::V2_2_0,
                method_url: None,
                card_psd2: None,
            },
            outcome: MethodOutcome::not_completed(CompletionSource::TimedOut),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "METHOD_DONE");
        assert_eq!(json["session"]["protocol_version"], "2.2.0");
        assert_eq!(json["outcome"]["comp_ind"], "N");
        assert_eq!(json["outcome"]["source"], "timed_out");
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_session_from_rejects_unroutable_ids() {
        let flow = gateway().start(purchase());
        for (order, trans_id) in [("ABCD1234", "tx:1"), ("AB", "tx-1")] {
            let response: IniciaPeticionResponse = serde_json::from_value(serde_json::json!({
                "Ds_Order": order,
                "Ds_EMV3DS": {"protocolVersion": "2.2.0", "threeDSServerTransID": trans_id}
            }))
            .unwrap();
            assert!(matches!(
                flow.session_from(response),
                Err(PaymentError::Decoding { .. })
            ));
        }
    }

    #[test]
    fn test_session_from_rejects_unknown_protocol() {
        let flow = gateway().start(purchase());
        let response: IniciaPeticionResponse = serde_json::from_value(serde_json::json!({
            "Ds_Order": "ABCD1234",
            "Ds_EMV3DS": {"protocolVersion": "1.0.2", "threeDSInfo": "CardConfiguration"}
        }))
        .unwrap();
        assert!(matches!(
            flow.session_from(response),
            Err(PaymentError::Decoding { .. })
        ));
    }
}
