use percent_encoding::percent_decode_str;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accepts a JSON string or number and keeps it as text.
fn stringish<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn required_stringish<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    stringish(deserializer)?.ok_or_else(|| serde::de::Error::custom("value is null"))
}

fn flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "y" | "s" => Some(true),
            "false" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Explicit error answer from the gateway. Terminal, never retried, and
/// surfaced exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "errorCode", deserialize_with = "required_stringish")]
    pub error_code: String,
    #[serde(
        rename = "errorCodeDescription",
        default,
        deserialize_with = "stringish",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(
        rename = "repeatOrderStatus",
        default,
        deserialize_with = "flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub repeat_order_status: Option<bool>,
}

/// `Ds_EMV3DS` block returned by `iniciaPeticionREST`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CardConfiguration {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "threeDSServerTransID", default)]
    pub three_ds_server_trans_id: Option<String>,
    #[serde(rename = "threeDSInfo", default)]
    pub three_ds_info: Option<String>,
    #[serde(rename = "threeDSMethodURL", default)]
    pub three_ds_method_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IniciaPeticionResponse {
    #[serde(rename = "Ds_Order", deserialize_with = "required_stringish")]
    pub order: String,
    #[serde(rename = "Ds_MerchantCode", default, deserialize_with = "stringish")]
    pub merchant_code: Option<String>,
    #[serde(rename = "Ds_Terminal", default, deserialize_with = "stringish")]
    pub terminal: Option<String>,
    #[serde(rename = "Ds_TransactionType", default, deserialize_with = "stringish")]
    pub transaction_type: Option<String>,
    #[serde(rename = "Ds_EMV3DS")]
    pub emv3ds: CardConfiguration,
    /// Whether the card falls under PSD2 (`Y`/`N`).
    #[serde(rename = "Ds_Card_PSD2", default, deserialize_with = "stringish")]
    pub card_psd2: Option<String>,
}

/// ACS answer to the 3DS method post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ThreeDsMethodResult {
    #[serde(rename = "threeDSCompInd", default)]
    pub three_ds_comp_ind: Option<String>,
}

/// Challenge data the cardholder's browser must be sent to the ACS with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRequest {
    #[serde(rename = "acsURL")]
    pub acs_url: String,
    pub creq: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "threeDSServerTransID", default, skip_serializing_if = "Option::is_none")]
    pub three_ds_server_trans_id: Option<String>,
}

/// Final authorization block.
///
/// Every field is kept as the gateway sent it; the response code in
/// particular is never normalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    #[serde(rename = "Ds_Response", deserialize_with = "required_stringish")]
    pub response: String,
    #[serde(rename = "Ds_Amount", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(rename = "Ds_Currency", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(rename = "Ds_Order", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(rename = "Ds_MerchantCode", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub merchant_code: Option<String>,
    #[serde(rename = "Ds_Terminal", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    #[serde(rename = "Ds_AuthorisationCode", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub authorisation_code: Option<String>,
    #[serde(rename = "Ds_TransactionType", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
    #[serde(rename = "Ds_SecurePayment", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub secure_payment: Option<String>,
    #[serde(rename = "Ds_Language", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(rename = "Ds_Card_Number", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(rename = "Ds_Card_Brand", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub card_brand: Option<String>,
    #[serde(rename = "Ds_Card_Country", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub card_country: Option<String>,
    #[serde(rename = "Ds_Date", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "Ds_Hour", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(rename = "Ds_MerchantData", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub merchant_data: Option<String>,
    #[serde(rename = "Ds_ProcessedPayMethod", default, deserialize_with = "stringish", skip_serializing_if = "Option::is_none")]
    pub processed_pay_method: Option<String>,
}

impl AuthResult {
    pub const APPROVED: &'static str = "0000";

    pub fn response_code(&self) -> &str {
        &self.response
    }

    pub fn is_authorized(&self) -> bool {
        self.response == Self::APPROVED
    }

    /// `Ds_Date` with its URL encoding removed (`dd/mm/yyyy`).
    pub fn date(&self) -> Option<String> {
        self.date.as_deref().map(url_decoded)
    }

    /// `Ds_Hour` with its URL encoding removed (`hh:mm`).
    pub fn hour(&self) -> Option<String> {
        self.hour.as_deref().map(url_decoded)
    }
}

fn url_decoded(value: &str) -> String {
    let value = value.replace('+', " ");
    percent_decode_str(&value).decode_utf8_lossy().into_owned()
}

/// What the authentication step can lead to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    ChallengeRequired(ChallengeRequest),
    Completed(AuthResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response_accepts_numeric_code_and_string_flag() {
        let error: ErrorResponse = serde_json::from_value(json!({
            "errorCode": 9051,
            "repeatOrderStatus": "false",
        }))
        .unwrap();
        assert_eq!(error.error_code, "9051");
        assert_eq!(error.repeat_order_status, Some(false));
        assert_eq!(error.description, None);

        let error: ErrorResponse = serde_json::from_value(json!({
            "errorCode": "SIS0051",
            "errorCodeDescription": "Pedido repetido",
            "repeatOrderStatus": true,
        }))
        .unwrap();
        assert_eq!(error.error_code, "SIS0051");
        assert_eq!(error.repeat_order_status, Some(true));
    }

    #[test]
    fn test_auth_result_keeps_codes_untouched() {
        let result: AuthResult = serde_json::from_value(json!({
            "Ds_Amount": "1249",
            "Ds_Response": "0184",
            "Ds_Date": "19%2F10%2F2026",
            "Ds_Hour": "12%3A05",
            "Ds_Card_Brand": 1,
        }))
        .unwrap();
        assert!(!result.is_authorized());
        assert_eq!(result.response_code(), "0184");
        assert_eq!(result.date().as_deref(), Some("19/10/2026"));
        assert_eq!(result.hour().as_deref(), Some("12:05"));
        assert_eq!(result.card_brand.as_deref(), Some("1"));
    }

    #[test]
    fn test_inicia_response_shape() {
        let response: IniciaPeticionResponse = serde_json::from_value(json!({
            "Ds_Order": "ABCD1234",
            "Ds_MerchantCode": "123456789",
            "Ds_Terminal": "1",
            "Ds_TransactionType": "0",
            "Ds_EMV3DS": {
                "protocolVersion": "2.1.0",
                "threeDSServerTransID": "tx-1",
                "threeDSInfo": "CardConfiguration",
                "threeDSMethodURL": "https://acs.example.com/method"
            },
            "Ds_Card_PSD2": "Y"
        }))
        .unwrap();
        assert_eq!(response.emv3ds.protocol_version, "2.1.0");
        assert_eq!(response.emv3ds.three_ds_server_trans_id.as_deref(), Some("tx-1"));
        assert_eq!(response.card_psd2.as_deref(), Some("Y"));
    }
}
