use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use opsgate_core::gateway::{
    ActionGateway, GatewayRequest, GatewayResponse, HealthPolicy, HealthReport, HttpGatewayClient,
    TimeoutPolicy,
};
use opsgate_core::models::{ActionId, RunId};

fn request(action: &str, target: &str) -> GatewayRequest {
    GatewayRequest {
        action: ActionId::from(action),
        target: target.to_string(),
        run_id: RunId::parse("20260501T100000Z-00a1").unwrap(),
    }
}

fn quick_health() -> HealthPolicy {
    HealthPolicy {
        timeout: Duration::from_millis(500),
        retries: 3,
        backoff: Duration::from_millis(10),
    }
}

async fn execute(client: HttpGatewayClient, request: GatewayRequest) -> GatewayResponse {
    tokio::task::spawn_blocking(move || client.execute(&request))
        .await
        .unwrap()
}

async fn health(client: HttpGatewayClient) -> HealthReport {
    tokio::task::spawn_blocking(move || client.health_check())
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn posts_action_with_token_and_run_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/actions/deploy_service"))
        .and(header("authorization", "Bearer t0k3n"))
        .and(header("x-opsgate-run-id", "20260501T100000Z-00a1"))
        .and(body_json(json!({
            "action": "deploy",
            "run_id": "20260501T100000Z-00a1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "stdout": "deployed 3 services\n",
            "exit_code": 0,
            "duration_ms": 1234,
            "artifact_dir": "/var/opsgate/artifacts/20260501T100000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(server.uri(), TimeoutPolicy::default(), quick_health())
        .with_token(Some("t0k3n".to_string()));
    let response = execute(client, request("deploy", "deploy_service")).await;

    assert!(response.ok);
    assert_eq!(response.http_status, Some(200));
    assert_eq!(response.exit_code, Some(0));
    assert_eq!(response.duration_ms, 1234);
    assert_eq!(response.stdout, "deployed 3 services\n");
    assert!(!response.is_transport_failure());
}

#[tokio::test(flavor = "multi_thread")]
async fn locked_status_is_admission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/actions/place_order"))
        .respond_with(ResponseTemplate::new(423).set_body_json(json!({
            "error_class": "MARKET_CLOSED",
            "required_condition": "market_open",
            "error": "trading session is closed"
        })))
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(server.uri(), TimeoutPolicy::default(), quick_health());
    let response = execute(client, request("place_order", "place_order")).await;

    assert!(!response.ok);
    assert!(response.is_admission_denied());
    assert_eq!(response.error_class.as_deref(), Some("MARKET_CLOSED"));
    assert_eq!(response.required_condition.as_deref(), Some("market_open"));
    assert_eq!(response.error.as_deref(), Some("trading session is closed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn locked_status_without_body_still_has_a_class() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(423))
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(server.uri(), TimeoutPolicy::default(), quick_health());
    let response = execute(client, request("deploy", "deploy")).await;

    assert!(response.is_admission_denied());
    assert_eq!(response.error_class.as_deref(), Some("ADMISSION_DENIED"));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_classified_by_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(server.uri(), TimeoutPolicy::default(), quick_health());
    let response = execute(client, request("deploy", "deploy")).await;

    assert!(!response.ok);
    assert_eq!(response.http_status, Some(500));
    assert_eq!(response.error_class.as_deref(), Some("GATEWAY_HTTP_500"));
    assert!(!response.is_admission_denied());
    assert!(!response.is_transport_failure());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_success_body_is_a_bad_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(server.uri(), TimeoutPolicy::default(), quick_health());
    let response = execute(client, request("deploy", "deploy")).await;

    assert!(!response.ok);
    assert_eq!(response.error_class.as_deref(), Some("GATEWAY_BAD_RESPONSE"));
}

#[tokio::test(flavor = "multi_thread")]
async fn normal_actions_time_out_at_the_short_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let timeouts = TimeoutPolicy {
        normal: Duration::from_millis(300),
        long_running: Some(Duration::from_secs(30)),
        long_running_actions: BTreeSet::from([ActionId::from("deploy")]),
    };
    let client = HttpGatewayClient::new(server.uri(), timeouts, quick_health());
    let response = execute(client, request("ping", "ping")).await;

    assert!(!response.ok);
    assert_eq!(response.error_class.as_deref(), Some("GATEWAY_TIMEOUT"));
    assert_eq!(response.http_status, None);
    assert!(response.is_transport_failure());
    assert!(response.duration_ms < 3_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn long_running_actions_outlive_the_short_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true, "exit_code": 0}))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let timeouts = TimeoutPolicy {
        normal: Duration::from_millis(300),
        long_running: None,
        long_running_actions: BTreeSet::from([ActionId::from("deploy")]),
    };
    let client = HttpGatewayClient::new(server.uri(), timeouts, quick_health());
    let response = execute(client, request("deploy", "deploy")).await;

    assert!(response.ok);
    assert!(response.duration_ms >= 800);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_gateway_is_classified() {
    let client = HttpGatewayClient::new(
        "http://127.0.0.1:1",
        TimeoutPolicy::default(),
        quick_health(),
    );
    let response = execute(client, request("deploy", "deploy")).await;

    assert!(!response.ok);
    assert_eq!(response.error_class.as_deref(), Some("GATEWAY_UNREACHABLE"));
    assert!(response.is_transport_failure());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_succeeds_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(server.uri(), TimeoutPolicy::default(), quick_health());
    let report = health(client).await;

    assert!(report.ok);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_gives_up_after_configured_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = HttpGatewayClient::new(server.uri(), TimeoutPolicy::default(), quick_health());
    let report = health(client).await;

    assert!(!report.ok);
    assert!(report.duration_ms >= 30);
}
