#![allow(dead_code)]

use redsys3ds::application::state_machine::{PaymentGateway, Purchase};
use redsys3ds::config::GatewaySettings;
use redsys3ds::domain::merchant::{Amount, CardData, OrderId};
use redsys3ds::domain::ports::NotificationStoreRef;
use redsys3ds::domain::signature::compute_signature;
use redsys3ds::interfaces::rest::client::RetryPolicy;
use redsys3ds::interfaces::rest::codec::{self, SIGNATURE_VERSION, SignedForm};
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use std::time::Duration;
use wiremock::{Match, MockServer, Request};

pub const SECRET_KEY: &str = "sq7HjrUOBfKmC576ILgskD5srU870gJ7";
pub const MERCHANT_CODE: &str = "999008881";
pub const ORDER: &str = "ABCD1234";
pub const TRANS_ID: &str = "8de84430-3336-4ff4-b18d-f073b546ccea";
pub const PUBLIC_BASE_URL: &str = "https://shop.example.com";
pub const METHOD_TIMEOUT: Duration = Duration::from_millis(300);

pub fn gateway_url(server: &MockServer) -> String {
    format!("{}/sis/rest", server.uri())
}

pub fn settings(server: &MockServer) -> GatewaySettings {
    GatewaySettings::new(
        MERCHANT_CODE,
        "001",
        SecretString::from(SECRET_KEY),
        &gateway_url(server),
        PUBLIC_BASE_URL,
    )
    .unwrap()
    .with_method_timeout(METHOD_TIMEOUT)
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
    }
}

pub fn gateway(server: &MockServer, store: NotificationStoreRef) -> PaymentGateway {
    PaymentGateway::new(settings(server), store)
        .unwrap()
        .with_retry_policy(fast_retry())
}

pub fn purchase() -> Purchase {
    purchase_for(ORDER)
}

pub fn purchase_for(order: &str) -> Purchase {
    Purchase::new(
        OrderId::new(order).unwrap(),
        Amount::from_minor(1249).unwrap(),
        CardData::new("4548810000000003", "1249", "123").unwrap(),
    )
}

/// Wraps `params` the way the gateway does: base64url JSON plus a signature
/// made with the terminal key.
pub fn signed(params: Value) -> Value {
    let encoded = codec::encode_value(&params).unwrap();
    let order = params
        .get("Ds_Order")
        .and_then(Value::as_str)
        .unwrap_or(ORDER);
    json!({
        "Ds_SignatureVersion": SIGNATURE_VERSION,
        "Ds_MerchantParameters": encoded,
        "Ds_Signature": compute_signature(SECRET_KEY, order, &encoded).unwrap(),
    })
}

pub fn card_configuration(protocol_version: &str, method_url: Option<&str>) -> Value {
    let mut emv3ds = json!({
        "protocolVersion": protocol_version,
        "threeDSServerTransID": TRANS_ID,
        "threeDSInfo": "CardConfiguration",
    });
    if let Some(url) = method_url {
        emv3ds["threeDSMethodURL"] = json!(url);
    }
    json!({
        "Ds_Order": ORDER,
        "Ds_MerchantCode": MERCHANT_CODE,
        "Ds_Terminal": "1",
        "Ds_TransactionType": "0",
        "Ds_EMV3DS": emv3ds,
        "Ds_Card_PSD2": "Y",
    })
}

pub fn legacy_configuration() -> Value {
    json!({
        "Ds_Order": ORDER,
        "Ds_MerchantCode": MERCHANT_CODE,
        "Ds_Terminal": "1",
        "Ds_TransactionType": "0",
        "Ds_EMV3DS": {"protocolVersion": "NO_3DS_v2", "threeDSInfo": "CardConfiguration"},
    })
}

pub fn auth_result(code: &str) -> Value {
    json!({
        "Ds_Amount": "1249",
        "Ds_Currency": "978",
        "Ds_Order": ORDER,
        "Ds_MerchantCode": MERCHANT_CODE,
        "Ds_Terminal": "1",
        "Ds_Response": code,
        "Ds_AuthorisationCode": "123456",
        "Ds_TransactionType": "0",
        "Ds_SecurePayment": "1",
        "Ds_Language": "1",
        "Ds_Card_Number": "454881******0003",
        "Ds_Date": "19%2F10%2F2026",
        "Ds_Hour": "12%3A30",
        "Ds_Card_Brand": "1",
        "Ds_Card_Country": "724",
        "Ds_ProcessedPayMethod": "78",
    })
}

pub fn challenge_request(acs_url: &str) -> Value {
    json!({
        "Ds_Order": ORDER,
        "Ds_EMV3DS": {
            "threeDSInfo": "ChallengeRequest",
            "protocolVersion": "2.2.0",
            "acsURL": acs_url,
            "creq": "eyJ0aHJlZURTU2VydmVyVHJhbnNJRCI6IjhkZTg0NDMwIn0",
        },
    })
}

/// Decoded merchant parameters of a request the gateway mock received.
pub fn sent_parameters(request: &Request) -> Map<String, Value> {
    let form: SignedForm = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(form.signature_version, SIGNATURE_VERSION);
    codec::decode(&form.merchant_parameters).unwrap()
}

/// Matches gateway requests by the `threeDSInfo` they carry.
pub struct Stage(pub &'static str);

impl Match for Stage {
    fn matches(&self, request: &Request) -> bool {
        let Ok(form) = serde_json::from_slice::<SignedForm>(&request.body) else {
            return false;
        };
        let Ok(params) = codec::decode(&form.merchant_parameters) else {
            return false;
        };
        params
            .get("Ds_Merchant_EMV3DS")
            .and_then(|emv3ds| emv3ds.get("threeDSInfo"))
            .and_then(Value::as_str)
            == Some(self.0)
    }
}
