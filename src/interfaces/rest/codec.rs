//! Wire encoding of merchant parameters and decoding of gateway answers.
//!
//! Requests are serialized as compact JSON whose object keys are in ascending
//! byte order at every level (the declaration order of the wire structs),
//! with every scalar rendered as a string and unset fields omitted. The JSON
//! is then base64url encoded without padding. The gateway signs and checks
//! the literal bytes, so this layout must never drift.

use crate::domain::emv3ds::{Emv3ds, ThreeDsCompInd};
use crate::domain::merchant::MerchantParameters;
use crate::domain::response::{
    AuthResult, AuthenticationOutcome, ChallengeRequest, ErrorResponse, ThreeDsMethodResult,
};
use crate::domain::signature::{SignatureEngine, SignatureError};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

pub const SIGNATURE_VERSION: &str = "HMAC_SHA512_V2";

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("unrecognised response shape: {0}")]
    UnknownShape(String),
}

/// The three fields posted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedForm {
    #[serde(rename = "Ds_SignatureVersion")]
    pub signature_version: String,
    #[serde(rename = "Ds_MerchantParameters")]
    pub merchant_parameters: String,
    #[serde(rename = "Ds_Signature")]
    pub signature: String,
}

#[derive(Serialize)]
struct WireParameters<'a> {
    #[serde(rename = "Ds_Merchant_Amount")]
    amount: String,
    #[serde(rename = "Ds_Merchant_CVV2", skip_serializing_if = "Option::is_none")]
    cvv2: Option<&'a str>,
    #[serde(rename = "Ds_Merchant_Currency")]
    currency: String,
    #[serde(rename = "Ds_Merchant_EMV3DS", skip_serializing_if = "Option::is_none")]
    emv3ds: Option<&'a Emv3ds>,
    #[serde(rename = "Ds_Merchant_Excep_SCA", skip_serializing_if = "Option::is_none")]
    exception_sca: Option<&'static str>,
    #[serde(rename = "Ds_Merchant_ExpiryDate", skip_serializing_if = "Option::is_none")]
    expiry_date: Option<&'a str>,
    #[serde(rename = "Ds_Merchant_MerchantCode")]
    merchant_code: &'a str,
    #[serde(rename = "Ds_Merchant_Order")]
    order: &'a str,
    #[serde(rename = "Ds_Merchant_Pan", skip_serializing_if = "Option::is_none")]
    pan: Option<&'a str>,
    #[serde(rename = "Ds_Merchant_Terminal")]
    terminal: &'a str,
    #[serde(rename = "Ds_Merchant_TransactionType")]
    transaction_type: &'a str,
}

impl<'a> From<&'a MerchantParameters> for WireParameters<'a> {
    fn from(params: &'a MerchantParameters) -> Self {
        let card = params.card.as_ref();
        Self {
            amount: params.amount.to_string(),
            cvv2: card.map(|block| block.card.cvv2()),
            currency: params.currency.to_string(),
            emv3ds: card.and_then(|block| block.emv3ds.as_ref()),
            exception_sca: card.filter(|block| block.exception_sca).map(|_| "Y"),
            expiry_date: card.map(|block| block.card.expiry_date()),
            merchant_code: params.merchant_code.as_str(),
            order: params.order.as_str(),
            pan: card.map(|block| block.card.pan()),
            terminal: params.terminal.as_str(),
            transaction_type: params.transaction_type.as_str(),
        }
    }
}

#[derive(Serialize)]
struct MethodData<'a> {
    #[serde(rename = "threeDSMethodNotificationURL")]
    notification_url: &'a str,
    #[serde(rename = "threeDSServerTransID")]
    trans_id: &'a str,
}

/// Body posted to the ACS 3DS method URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreeDsMethodRequest {
    #[serde(rename = "threeDSMethodData")]
    pub three_ds_method_data: String,
}

/// Gateway answer before its merchant parameters are decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GatewayEnvelope {
    Error(ErrorResponse),
    Signed(SignedEnvelope),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedEnvelope {
    #[serde(rename = "Ds_MerchantParameters")]
    pub merchant_parameters: String,
    #[serde(rename = "Ds_Signature", default)]
    pub signature: Option<String>,
    #[serde(rename = "Ds_SignatureVersion", default)]
    pub signature_version: Option<String>,
}

/// Encodes and signs merchant parameters. Stateless apart from the key, so
/// one codec serves any number of concurrent purchases.
#[derive(Debug, Clone)]
pub struct ParameterCodec {
    signer: SignatureEngine,
}

impl ParameterCodec {
    pub fn new(signer: SignatureEngine) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &SignatureEngine {
        &self.signer
    }

    /// The canonical JSON text, before base64.
    pub fn wire_json(&self, params: &MerchantParameters) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&WireParameters::from(params))?)
    }

    pub fn encode(&self, params: &MerchantParameters) -> Result<(String, SignedForm), CodecError> {
        let encoded = URL_SAFE_NO_PAD.encode(self.wire_json(params)?);
        let signature = self.signer.sign(params.order.as_str(), &encoded)?;
        let form = SignedForm {
            signature_version: SIGNATURE_VERSION.to_string(),
            merchant_parameters: encoded.clone(),
            signature,
        };
        Ok((encoded, form))
    }
}

/// Base64url (no padding) of the compact JSON form of `value`.
pub fn encode_value<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(value)?))
}

fn decode_bytes(encoded: &str) -> Result<Vec<u8>, CodecError> {
    let mut padded = encoded.trim().trim_end_matches('=').to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    match URL_SAFE.decode(&padded) {
        Ok(bytes) => Ok(bytes),
        Err(_) => Ok(STANDARD.decode(&padded)?),
    }
}

/// Decodes a merchant-parameters string into its JSON object. Either base64
/// alphabet is accepted, padded or not.
pub fn decode(encoded: &str) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_slice(&decode_bytes(encoded)?)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::UnknownShape(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// `threeDSMethodData` payload pointing the ACS at our notification URL.
pub fn method_data(trans_id: &str, notification_url: &Url) -> Result<String, CodecError> {
    encode_value(&MethodData {
        notification_url: notification_url.as_str(),
        trans_id,
    })
}

pub fn decode_envelope(body: &str) -> Result<GatewayEnvelope, CodecError> {
    serde_json::from_str(body).map_err(|e| {
        CodecError::UnknownShape(format!(
            "neither errorCode nor Ds_MerchantParameters present ({e})"
        ))
    })
}

fn is_response_code(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()))
}

/// Classifies a decoded `trataPeticionREST` answer. A challenge needs both an
/// ACS URL and a `creq`; otherwise a 4-digit `Ds_Response` makes it final.
pub fn authentication_outcome(map: Map<String, Value>) -> Result<AuthenticationOutcome, CodecError> {
    if let Some(Value::Object(emv3ds)) = map.get("Ds_EMV3DS")
        && emv3ds.get("acsURL").is_some_and(Value::is_string)
        && emv3ds.get("creq").is_some_and(Value::is_string)
    {
        let challenge: ChallengeRequest = serde_json::from_value(Value::Object(emv3ds.clone()))?;
        return Ok(AuthenticationOutcome::ChallengeRequired(challenge));
    }
    match map.get("Ds_Response") {
        Some(code) if is_response_code(code) => {
            let result: AuthResult = serde_json::from_value(Value::Object(map))?;
            Ok(AuthenticationOutcome::Completed(result))
        }
        Some(code) => Err(CodecError::UnknownShape(format!(
            "Ds_Response {code} is not a 4-digit code"
        ))),
        None => Err(CodecError::UnknownShape(
            "neither challenge data nor Ds_Response present".to_string(),
        )),
    }
}

/// Completion indicator in an ACS answer, if it sent a readable one.
pub fn method_completion(body: &str) -> Option<ThreeDsCompInd> {
    serde_json::from_str::<ThreeDsMethodResult>(body)
        .ok()?
        .three_ds_comp_ind
        .as_deref()
        .and_then(ThreeDsCompInd::parse)
}
