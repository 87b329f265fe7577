//! Integration tests using wiremock to simulate the API server.

use cocapi::middleware::{BoxError, OutgoingRequest};
use cocapi::rate_limit::RateLimitConfig;
use cocapi::request::params;
use cocapi::{AsyncClient, ClientAdmin, ClientBuilder, Error, ErrorKind, ErrorPayload};
use http::HeaderValue;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{any, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn builder(server: &MockServer) -> ClientBuilder {
    ClientBuilder::new("test-token")
        .base_url(format!("{}/v1", server.uri()))
        .unwrap()
        .retry_delay(Duration::from_millis(10))
        .verify_connection(false)
}

async fn client(server: &MockServer) -> AsyncClient {
    builder(server).enable_metrics(true).build_async().unwrap()
}

fn locations() -> Value {
    json!({"items": [{"id": 32000006, "name": "International"}]})
}

#[tokio::test]
async fn test_successful_request_sends_auth_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/locations"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(locations()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let response = client.request_async("/locations", None).await.unwrap();
    assert_eq!(response, locations());
}

#[tokio::test]
async fn test_second_identical_request_served_from_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(locations()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let first = client.request_async("/locations", None).await.unwrap();
    let second = client.request_async("/locations", None).await.unwrap();

    assert_eq!(first, second);
    let samples = client.metrics().samples();
    assert_eq!(samples.len(), 2);
    assert!(!samples[0].cache_hit);
    assert!(samples[1].cache_hit);
    assert_eq!(client.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_parameter_order_does_not_affect_caching() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/leagues"))
        .and(query_param("limit", "5"))
        .and(query_param("after", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    client
        .request_async("/leagues", Some(params([("limit", "5"), ("after", "abc")])))
        .await
        .unwrap();
    let cached = client
        .request_async("/leagues", Some(params([("after", "abc"), ("limit", "5")])))
        .await
        .unwrap();

    assert_eq!(cached, json!({"items": []}));
}

#[tokio::test]
async fn test_invalid_param_rejected_without_network() {
    let mock_server = MockServer::start().await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let response = client
        .api()
        .clan("#ABC", Some(params([("limit", "5"), ("foo", "bar")])))
        .await
        .unwrap();

    assert_eq!(response["result"], "error");
    assert_eq!(response["message"], "Invalid params for method");
    assert_eq!(response["error_type"], "invalid_param");
}

#[tokio::test]
async fn test_rate_limited_then_success_retries_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/clans/%23ABC"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"reason": "throttled"})))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/clans/%23ABC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tag": "#ABC"})))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let response = client.api().clan("#ABC", None).await.unwrap();

    assert_eq!(response, json!({"tag": "#ABC"}));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);

    let errors = client.recent_errors(10);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, Some(ErrorKind::RateLimited));
}

#[tokio::test]
async fn test_server_error_exhausts_exactly_max_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/warleagues"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let response = client.api().war_leagues().await.unwrap();
    let error = ErrorPayload::from_value(&response).unwrap();

    assert_eq!(error.error_type, ErrorKind::ServerError);
    assert_eq!(error.status_code, Some(503));
    assert_eq!(error.message, "Server error - try again later");
    // errors are never cached
    assert_eq!(client.cache_stats().total_entries, 0);
}

#[tokio::test]
async fn test_client_errors_are_terminal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/players/%23NOPE"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"reason": "notFound"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/labels/players"))
        .respond_with(ResponseTemplate::new(418))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let not_found = client.api().player("#NOPE", None).await.unwrap();
    assert_eq!(not_found["error_type"], "not_found");
    assert_eq!(not_found["message"], "Not found - check clan/player tag");
    assert_eq!(not_found["status_code"], 404);

    let teapot = client.api().player_labels(None).await.unwrap();
    assert_eq!(teapot["error_type"], "http");
    assert_eq!(teapot["message"], "HTTP error 418");
}

#[tokio::test]
async fn test_invalid_json_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/goldpass/seasons/current"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let response = client.api().gold_pass().await.unwrap();

    assert_eq!(response["error_type"], "json");
    assert_eq!(response["message"], "Invalid JSON response from API");
}

#[tokio::test]
async fn test_timeout_on_every_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/leagues"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = builder(&mock_server)
        .timeout(Duration::from_millis(100))
        .max_retries(3)
        .build_async()
        .unwrap();
    let _session = client.enter().await.unwrap();

    let response = client.api().leagues(None).await.unwrap();

    assert_eq!(response["result"], "error");
    assert_eq!(response["error_type"], "timeout");
    assert!(response.get("status_code").is_none());
}

#[tokio::test]
async fn test_connection_failure_is_classified() {
    let client = ClientBuilder::new("test-token")
        .base_url("http://127.0.0.1:9/v1")
        .unwrap()
        .retry_delay(Duration::from_millis(1))
        .timeout(Duration::from_secs(2))
        .include_status_code(true)
        .verify_connection(false)
        .build_async()
        .unwrap();
    let _session = client.enter().await.unwrap();

    let response = client.request_async("/locations", None).await.unwrap();

    assert!(matches!(
        response["error_type"].as_str(),
        Some("connection") | Some("timeout")
    ));
    assert_eq!(response["status_code"], 0);
}

#[tokio::test]
async fn test_middleware_applied_and_failures_contained() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/labels/clans"))
        .and(header("x-tracker", "on"))
        .and(query_param("limit", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    client.add_request_middleware(|request: &OutgoingRequest| {
        let mut request = request.clone();
        request.headers.insert("x-tracker", HeaderValue::from_static("on"));
        Ok::<_, BoxError>(request)
    });
    client.add_request_middleware(|_: &OutgoingRequest| -> Result<OutgoingRequest, BoxError> {
        Err("broken middleware".into())
    });
    client.add_request_middleware(|request: &OutgoingRequest| {
        let mut request = request.clone();
        request.params.insert("limit".to_string(), "3".to_string());
        Ok::<_, BoxError>(request)
    });
    client.add_response_middleware(|response: &Value| {
        let mut response = response.clone();
        response["_seen"] = json!(true);
        Ok::<_, BoxError>(response)
    });

    let _session = client.enter().await.unwrap();
    let response = client.api().clan_labels(None).await.unwrap();
    assert_eq!(response, json!({"items": [], "_seen": true}));

    let info = client.middleware_info();
    assert_eq!(info.request_middleware_count, 3);
    assert_eq!(info.response_middleware_count, 1);
}

#[tokio::test]
async fn test_error_payloads_skip_response_middleware() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/capitalleagues"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    client.add_response_middleware(|response: &Value| {
        let mut response = response.clone();
        response["_seen"] = json!(true);
        Ok::<_, BoxError>(response)
    });

    let _session = client.enter().await.unwrap();
    let response = client.api().capital_leagues(None).await.unwrap();

    assert_eq!(response["error_type"], "forbidden");
    assert!(response.get("_seen").is_none());
}

#[tokio::test]
async fn test_verify_player_token_posts_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/players/%232PP/verifytoken"))
        .and(body_json(json!({"token": "abc123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    let api = client.api();
    assert_eq!(api.verify_player_token("#2PP", "abc123").await.unwrap()["status"], "ok");
    // POST responses are not cached
    assert_eq!(api.verify_player_token("#2PP", "abc123").await.unwrap()["status"], "ok");
}

#[tokio::test]
async fn test_self_test_failure_aborts_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/locations"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let client = builder(&mock_server)
        .verify_connection(true)
        .build_async()
        .unwrap();

    match client.enter().await {
        Err(Error::SelfTestFailed {
            error_type,
            status_code,
            message,
        }) => {
            assert_eq!(error_type, ErrorKind::Forbidden);
            assert_eq!(status_code, Some(403));
            assert_eq!(message, "Forbidden - invalid API token or access denied");
        }
        other => panic!("Expected SelfTestFailed, got {:?}", other.map(|_| ())),
    }
    assert!(!client.is_active());
    assert!(matches!(
        client.request_async("/locations", None).await,
        Err(Error::NoActiveSession)
    ));
}

#[tokio::test]
async fn test_status_code_injection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/locations/32000006"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 32000006})))
        .mount(&mock_server)
        .await;

    let client = builder(&mock_server)
        .include_status_code(true)
        .build_async()
        .unwrap();
    let _session = client.enter().await.unwrap();

    let fresh = client.api().location(32000006).await.unwrap();
    let cached = client.api().location(32000006).await.unwrap();

    assert_eq!(fresh, json!({"id": 32000006, "status_code": 200}));
    assert_eq!(cached, fresh);
}

#[tokio::test]
async fn test_base_url_can_be_switched() {
    let old_server = MockServer::start().await;
    let new_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/leagues/29000022"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 29000022})))
        .expect(1)
        .mount(&new_server)
        .await;

    let client = client(&old_server).await;
    client
        .set_base_url(&format!("{}/v1", new_server.uri()), true)
        .unwrap();
    let _session = client.enter().await.unwrap();

    let response = client.api().league(29000022).await.unwrap();
    assert_eq!(response["id"], 29000022);
    assert!(old_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_share_cache_and_metrics() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/builderbaseleagues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&mock_server)
        .await;

    let client = builder(&mock_server)
        .enable_metrics(true)
        .rate_limit_config(
            RateLimitConfig::builder()
                .requests_per_second(100.0)
                .burst(5)
                .build(),
        )
        .build_async()
        .unwrap();
    let _session = client.enter().await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .api()
                    .builder_base_leagues(Some(params([("limit", i + 1)])))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response, json!({"items": []}));
    }

    assert_eq!(client.metrics_summary().total_requests, 10);
    assert_eq!(client.cache_stats().total_entries, 10);
    let endpoint = client.endpoint_metrics("/builderbaseleagues").unwrap();
    assert_eq!(endpoint.success_rate, 100.0);
}

#[tokio::test]
async fn test_metrics_export_and_insights() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/clans/%23AAA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tag": "#AAA"})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/clans/%23BBB"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server).await;
    let _session = client.enter().await.unwrap();

    client.api().clan("#AAA", None).await.unwrap();
    client.api().clan("#BBB", None).await.unwrap();

    let csv = client.export_metrics_csv();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], cocapi::metrics::CSV_HEADER);
    assert!(lines[1].starts_with("/clans/%23{tag},GET,200,"));
    assert!(lines[2].ends_with(",false,not_found"));

    let summary = client.metrics_summary();
    assert_eq!(summary.success_rate, 50.0);
    assert_eq!(summary.most_used_endpoints[0].1, 2);

    let report = client.performance_insights().unwrap();
    assert!(!report.insights.is_empty());
    assert!(!report.recommendations.is_empty());

    client.clear_metrics();
    assert_eq!(client.metrics_summary().total_requests, 0);
}
