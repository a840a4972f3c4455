//! HTTP transport towards the gateway and the per-transaction ACS URLs.

use crate::interfaces::rest::codec::{
    GatewayEnvelope, SignedForm, ThreeDsMethodRequest, decode_envelope,
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request to {url} failed after {attempts} attempt(s)")]
    Connection {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status} after {attempts} attempt(s)")]
    ServerError { url: String, status: u16, attempts: u32 },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the zero-based `attempt` failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay)
    }
}

/// Last error of a retried operation and how many attempts were made.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy runs out of attempts.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    should_retry: R,
    mut operation: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    attempt,
                    max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Gateway REST operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    IniciaPeticion,
    TrataPeticion,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::IniciaPeticion => "iniciaPeticionREST",
            Endpoint::TrataPeticion => "trataPeticionREST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

enum AttemptError {
    Connection(reqwest::Error),
    Server(u16),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Connection(e) => write!(f, "{e}"),
            AttemptError::Server(status) => write!(f, "HTTP {status}"),
        }
    }
}

/// Shared connection pool plus the retry policy. Cloning is cheap and clones
/// share the pool.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base: Url,
    retry: RetryPolicy,
}

impl GatewayClient {
    pub fn new(base: Url) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, TransportError> {
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            endpoint.path()
        );
        Url::parse(&joined).map_err(|e| TransportError::InvalidUrl(format!("{joined}: {e}")))
    }

    pub async fn post_gateway(
        &self,
        endpoint: Endpoint,
        form: &SignedForm,
    ) -> Result<RawResponse, TransportError> {
        let url = self.endpoint_url(endpoint)?;
        self.post_json(url, form).await
    }

    /// Posts `threeDSMethodData` to a URL the gateway handed out. Only
    /// absolute http(s) URLs are contacted.
    pub async fn post_method(
        &self,
        method_url: &str,
        request: &ThreeDsMethodRequest,
    ) -> Result<RawResponse, TransportError> {
        let url = validate_url(method_url)?;
        self.post_json(url, request).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<RawResponse, TransportError> {
        let result = retry_with_backoff(
            &self.retry,
            |error: &AttemptError| match error {
                AttemptError::Connection(e) => !e.is_builder(),
                AttemptError::Server(_) => true,
            },
            || self.attempt(&url, body),
        )
        .await;

        result.map_err(|Exhausted { error, attempts }| match error {
            AttemptError::Connection(source) => TransportError::Connection {
                url: url.to_string(),
                attempts,
                source,
            },
            AttemptError::Server(status) => TransportError::ServerError {
                url: url.to_string(),
                status,
                attempts,
            },
        })
    }

    async fn attempt<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<RawResponse, AttemptError> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(AttemptError::Connection)?;
        let status = response.status();
        let body = response.text().await.map_err(AttemptError::Connection)?;
        if status.is_server_error() {
            // An explicit gateway error code is final whatever the status.
            if !matches!(decode_envelope(&body), Ok(GatewayEnvelope::Error(_))) {
                return Err(AttemptError::Server(status.as_u16()));
            }
            warn!(%url, status = status.as_u16(), "gateway error code on a server error status");
        }
        debug!(%url, status = status.as_u16(), bytes = body.len(), "response received");
        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn validate_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw.trim()).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        scheme => Err(TransportError::InvalidUrl(format!(
            "{raw}: unsupported scheme {scheme}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_delays_grow_and_are_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(&fast_policy(), |_: &String| true, || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("temporary".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let exhausted = retry_with_backoff(&fast_policy(), |_: &String| true, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("down".to_string())
            }
        })
        .await
        .unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.error, "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let exhausted = retry_with_backoff(&fast_policy(), |_: &String| false, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("fatal".to_string())
            }
        })
        .await
        .unwrap_err();
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_endpoint_urls() {
        let client = GatewayClient::new(Url::parse("https://sis-t.redsys.es:25443/sis/rest/").unwrap())
            .unwrap();
        assert_eq!(
            client.endpoint_url(Endpoint::IniciaPeticion).unwrap().as_str(),
            "https://sis-t.redsys.es:25443/sis/rest/iniciaPeticionREST"
        );
        assert_eq!(
            client.endpoint_url(Endpoint::TrataPeticion).unwrap().as_str(),
            "https://sis-t.redsys.es:25443/sis/rest/trataPeticionREST"
        );
    }

    #[test]
    fn test_method_urls_must_be_http() {
        assert!(validate_url("https://acs.example.com/method").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/method").is_ok());
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("/relative/path"),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
