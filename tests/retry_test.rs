mod common;

use common::*;
use redsys3ds::application::state_machine::{FlowState, PaymentGateway};
use redsys3ds::config::GatewaySettings;
use redsys3ds::error::{PaymentError, Step};
use redsys3ds::infrastructure::in_memory::InMemoryNotificationStore;
use redsys3ds::interfaces::rest::client::TransportError;
use secrecy::SecretString;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INICIA: &str = "/sis/rest/iniciaPeticionREST";

async fn inicia_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == INICIA)
        .count()
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INICIA))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut flow = gateway(&server, Arc::new(InMemoryNotificationStore::new())).start(purchase());
    let err = flow.initiate().await.unwrap_err();

    let PaymentError::Transport { step, order, source } = err else {
        panic!("expected a transport error");
    };
    assert_eq!(step, Step::IniciaPeticion);
    assert_eq!(order, ORDER);
    assert!(matches!(
        source,
        TransportError::ServerError {
            status: 503,
            attempts: 3,
            ..
        }
    ));
    assert_eq!(flow.state().name(), "INIT");
}

#[tokio::test]
async fn test_transient_errors_recover() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INICIA))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(INICIA))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(signed(card_configuration("2.2.0", None))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut flow = gateway(&server, Arc::new(InMemoryNotificationStore::new())).start(purchase());
    let state = flow.initiate().await.unwrap();

    assert_eq!(state.name(), "METHOD_REQUIRED");
    assert_eq!(inicia_requests(&server).await, 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INICIA))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut flow = gateway(&server, Arc::new(InMemoryNotificationStore::new())).start(purchase());
    let err = flow.initiate().await.unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Decoding {
            step: Step::IniciaPeticion,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unreachable_gateway() {
    let settings = GatewaySettings::new(
        MERCHANT_CODE,
        "001",
        SecretString::from(SECRET_KEY),
        "http://127.0.0.1:9/sis/rest",
        PUBLIC_BASE_URL,
    )
    .unwrap();
    let gateway = PaymentGateway::new(settings, Arc::new(InMemoryNotificationStore::new()))
        .unwrap()
        .with_retry_policy(fast_retry());

    let mut flow = gateway.start(purchase());
    let err = flow.initiate().await.unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Transport {
            source: TransportError::Connection { attempts: 3, .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_error_code_on_server_error_is_final() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INICIA))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "errorCode": "SIS0051",
            "errorCodeDescription": "Pedido repetido",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut flow = gateway(&server, Arc::new(InMemoryNotificationStore::new())).start(purchase());
    let state = flow.initiate().await.unwrap();

    let FlowState::GatewayError { error } = state else {
        panic!("expected GATEWAY_ERROR, got {}", state.name());
    };
    assert_eq!(error.error_code, "SIS0051");
    assert_eq!(inicia_requests(&server).await, 1);
}
