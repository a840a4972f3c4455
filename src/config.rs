use crate::domain::merchant::{MerchantCode, Terminal};
use crate::domain::ports::CorrelationKey;
use crate::domain::signature::SignatureEngine;
use crate::error::{PaymentError, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(10);

const METHOD_NOTIFICATION_ROUTE: &str = "@notificationRedsys3DS";
const CHALLENGE_NOTIFICATION_ROUTE: &str = "@notificationRedsysChallenge";

/// Static settings for one merchant terminal.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub merchant_code: MerchantCode,
    pub terminal: Terminal,
    secret_key: SecretString,
    /// Base URL the REST operations are appended to.
    pub gateway_url: Url,
    /// Public URL of this service, used to build webhook callback URLs.
    pub public_base_url: Url,
    /// Bound on the whole 3DS method step.
    pub method_timeout: Duration,
}

/// Field values that take precedence over the settings file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub merchant_code: Option<String>,
    pub terminal: Option<String>,
    pub secret_key: Option<String>,
    pub gateway_url: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Deserialize)]
struct SettingsFile {
    merchant_code: String,
    terminal: String,
    secret_key: String,
    gateway_url: String,
    public_base_url: String,
    #[serde(default)]
    method_timeout_secs: Option<u64>,
}

fn parse_url(name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| PaymentError::Configuration(format!("{name} {raw:?} is not a URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(PaymentError::Configuration(format!(
            "{name} {raw:?} must be an absolute http(s) URL"
        )));
    }
    Ok(url)
}

impl GatewaySettings {
    pub fn new(
        merchant_code: &str,
        terminal: &str,
        secret_key: SecretString,
        gateway_url: &str,
        public_base_url: &str,
    ) -> Result<Self> {
        let merchant_code = MerchantCode::new(merchant_code)
            .map_err(|e| PaymentError::Configuration(e.to_string()))?;
        let terminal =
            Terminal::new(terminal).map_err(|e| PaymentError::Configuration(e.to_string()))?;
        if secret_key.expose_secret().trim().is_empty() {
            return Err(PaymentError::Configuration(
                "terminal secret key is empty".to_string(),
            ));
        }
        Ok(Self {
            merchant_code,
            terminal,
            secret_key,
            gateway_url: parse_url("gateway_url", gateway_url)?,
            public_base_url: parse_url("public_base_url", public_base_url)?,
            method_timeout: DEFAULT_METHOD_TIMEOUT,
        })
    }

    pub fn with_method_timeout(mut self, timeout: Duration) -> Self {
        self.method_timeout = timeout;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: SettingsFile = serde_json::from_str(json)
            .map_err(|e| PaymentError::Configuration(format!("invalid settings file: {e}")))?;
        let settings = Self::new(
            &file.merchant_code,
            &file.terminal,
            SecretString::from(file.secret_key),
            &file.gateway_url,
            &file.public_base_url,
        )?;
        Ok(match file.method_timeout_secs {
            Some(secs) => settings.with_method_timeout(Duration::from_secs(secs)),
            None => settings,
        })
    }

    /// Reads a settings file, if any, and lets `overrides` replace its
    /// fields before validation.
    pub fn load(path: Option<&Path>, overrides: SettingsOverrides) -> Result<Self> {
        let mut document = match path {
            Some(path) => serde_json::from_str::<Map<String, Value>>(&std::fs::read_to_string(path)?)
                .map_err(|e| PaymentError::Configuration(format!("invalid settings file: {e}")))?,
            None => Map::new(),
        };
        let fields = [
            ("merchant_code", overrides.merchant_code),
            ("terminal", overrides.terminal),
            ("secret_key", overrides.secret_key),
            ("gateway_url", overrides.gateway_url),
            ("public_base_url", overrides.public_base_url),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                document.insert(name.to_string(), Value::String(value));
            }
        }
        Self::from_json(&Value::Object(document).to_string())
    }

    pub fn signer(&self) -> Result<SignatureEngine> {
        SignatureEngine::new(self.secret_key.expose_secret())
            .map_err(|e| PaymentError::Configuration(e.to_string()))
    }

    fn notification_url(&self, route: &str, key: &CorrelationKey) -> Result<Url> {
        let mut url = self.public_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PaymentError::Configuration(format!(
                    "public_base_url {} cannot carry a path",
                    self.public_base_url
                ))
            })?
            .pop_if_empty()
            .extend([route, key.order.as_str(), key.trans_id.as_str()]);
        Ok(url)
    }

    /// Where the ACS posts `threeDSCompInd`.
    pub fn method_notification_url(&self, key: &CorrelationKey) -> Result<Url> {
        self.notification_url(METHOD_NOTIFICATION_ROUTE, key)
    }

    /// Where the ACS posts the `CRES` after a challenge.
    pub fn challenge_notification_url(&self, key: &CorrelationKey) -> Result<Url> {
        self.notification_url(CHALLENGE_NOTIFICATION_ROUTE, key)
    }
}
