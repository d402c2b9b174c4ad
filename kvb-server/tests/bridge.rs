use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use kvb_client::mock::MockStore;
use kvb_client::{PoolConfig, RetryPolicy, SessionPool};
use kvb_common::AuthToken;
use kvb_server::{build_router, AuthGate};

const TOKEN: &str = "test-token";

fn pool_for(addr: &str) -> SessionPool {
    SessionPool::new(PoolConfig {
        addr: addr.to_string(),
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
        ..PoolConfig::default()
    })
}

async fn bridge() -> (MockStore, Router) {
    let store = MockStore::start().await.expect("mock store");
    let router = build_router(pool_for(store.addr()), AuthGate::new(AuthToken::new(TOKEN)));
    (store, router)
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(body.into())
        .expect("request")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    post(uri, body.to_string())
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn set_then_get_returns_stored_value() {
    let (_store, router) = bridge().await;

    let (status, body) = send(&router, post_json("/", json!(["SET", "a", "1"]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "OK"}));

    let (status, body) = send(&router, post_json("/", json!(["GET", "a"]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "1"}));

    let (_, body) = send(&router, post_json("/", json!(["GET", "missing"]))).await;
    assert_eq!(body, json!({"result": null}));
}

#[tokio::test]
async fn numeric_tokens_are_sent_as_strings() {
    let (store, router) = bridge().await;

    let (status, body) = send(&router, post_json("/", json!(["SET", "n", 41]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "OK"}));

    let (_, body) = send(&router, post_json("/", json!(["INCR", "n"]))).await;
    assert_eq!(body, json!({"result": 42}));
    assert_eq!(store.value(b"n"), Some(b"42".to_vec()));
}

#[tokio::test]
async fn single_command_error_is_bad_request() {
    let (store, router) = bridge().await;
    store.insert(b"word", b"abc");

    let (status, body) = send(&router, post_json("/", json!(["INCR", "word"]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "ERR value is not an integer or out of range"}));
}

#[tokio::test]
async fn malformed_bodies_are_rejected_without_store_calls() {
    let (store, router) = bridge().await;

    for body in ["not json", "{\"cmd\":1}", "[]", "[null]"] {
        let (status, payload) = send(&router, post("/", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert!(payload["error"].is_string());
    }
    let (status, _) = send(&router, post("/pipeline", "[\"GET\",\"a\"]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(store.commands(), 0);
}

#[tokio::test]
async fn pipeline_results_keep_their_positions() {
    let (store, router) = bridge().await;
    store.insert(b"y", b"not-a-number");

    let (status, body) = send(
        &router,
        post_json(
            "/pipeline",
            json!([["SET", "x", "1"], ["INCR", "y"], ["SELECT", "2"], ["GET", "x"]]),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"result": "OK"},
            {"error": "ERR value is not an integer or out of range"},
            {"error": "ERR unsupported command 'SELECT'"},
            {"result": "1"}
        ])
    );
    assert_eq!(store.value(b"x"), Some(b"1".to_vec()));
}

#[tokio::test]
async fn empty_pipeline_returns_empty_array() {
    let (store, router) = bridge().await;

    let (status, body) = send(&router, post_json("/pipeline", json!([]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = send(&router, post_json("/multi-exec", json!([]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    assert_eq!(store.connections(), 0);
}

#[tokio::test]
async fn transaction_applies_all_commands() {
    let (store, router) = bridge().await;

    let (status, body) = send(
        &router,
        post_json("/multi-exec", json!([["SET", "t", "5"], ["INCR", "t"], ["GET", "t"]])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"result": "OK"}, {"result": 6}, {"result": "6"}]));
    assert_eq!(store.value(b"t"), Some(b"6".to_vec()));
}

#[tokio::test]
async fn transaction_with_invalid_command_aborts_everywhere() {
    let (store, router) = bridge().await;

    let (status, body) = send(
        &router,
        post_json("/multi-exec", json!([["SET", "t", "1"], ["INCR"]])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body.as_array().expect("array");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], results[1]);
    assert!(results[0]["error"]
        .as_str()
        .expect("error")
        .starts_with("EXECABORT"));
    assert_eq!(store.value(b"t"), None);
}

#[tokio::test]
async fn transaction_with_unsupported_command_never_reaches_store() {
    let (store, router) = bridge().await;

    let (status, body) = send(
        &router,
        post_json("/multi-exec", json!([["SET", "t", "1"], ["SUBSCRIBE", "news"]])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body.as_array().expect("array");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], results[1]);
    assert!(results[0]["error"].is_string());
    assert_eq!(store.commands(), 0);
    assert_eq!(store.value(b"t"), None);
}

#[tokio::test]
async fn missing_or_wrong_token_is_unauthorized() {
    let (store, router) = bridge().await;

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from(json!(["GET", "a"]).to_string()))
        .expect("request");
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Unauthorized"}));

    let request = Request::builder()
        .method("POST")
        .uri("/pipeline")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::from(json!([["GET", "a"]]).to_string()))
        .expect("request");
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/get/a?_token=wrong")
        .body(Body::empty())
        .expect("request");
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(store.connections(), 0);
    assert_eq!(store.commands(), 0);
}

#[tokio::test]
async fn query_token_is_accepted() {
    let (store, router) = bridge().await;
    store.insert(b"a", b"hello");

    let request = Request::builder()
        .method("GET")
        .uri(format!("/get/a?_token={}", TOKEN))
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "hello"}));
}

#[tokio::test]
async fn path_commands_append_body_as_last_argument() {
    let (store, router) = bridge().await;

    let (status, body) = send(&router, post("/set/greeting", "hello world")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "OK"}));
    assert_eq!(store.value(b"greeting"), Some(b"hello world".to_vec()));

    let request = Request::builder()
        .method("GET")
        .uri("/get/greeting")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .expect("request");
    let (_, body) = send(&router, request).await;
    assert_eq!(body, json!({"result": "hello world"}));
}

#[tokio::test]
async fn base64_encoding_preserves_binary_values() {
    let (store, router) = bridge().await;
    let raw: &[u8] = &[0x00, 0xff, 0xfe, b'\r', b'\n'];

    let (status, _) = send(&router, post("/set/blob", raw.to_vec())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.value(b"blob"), Some(raw.to_vec()));

    let mut request = post_json("/", json!(["GET", "blob"]));
    request
        .headers_mut()
        .insert("upstash-encoding", "base64".parse().expect("header"));
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "AP/+DQo="}));

    let mut request = post_json("/pipeline", json!([["SET", "n", "1"], ["INCR", "n"]]));
    request
        .headers_mut()
        .insert("upstash-encoding", "base64".parse().expect("header"));
    let (_, body) = send(&router, request).await;
    assert_eq!(body, json!([{"result": "T0s="}, {"result": 2}]));
}

#[tokio::test]
async fn unreachable_store_is_service_unavailable() {
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = reserved.local_addr().expect("addr").to_string();
    drop(reserved);

    let router = build_router(pool_for(&addr), AuthGate::new(AuthToken::new(TOKEN)));
    let (status, body) = send(&router, post_json("/", json!(["GET", "a"]))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn broken_session_fails_request_then_recovers() {
    let (store, router) = bridge().await;

    let (status, _) = send(&router, post_json("/", json!(["SET", "k", "v"]))).await;
    assert_eq!(status, StatusCode::OK);

    store.drop_connections();
    let (status, _) = send(&router, post_json("/", json!(["GET", "k"]))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = send(&router, post_json("/", json!(["GET", "k"]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "v"}));
    assert_eq!(store.connections(), 2);
}

#[tokio::test]
async fn encoded_slash_stays_inside_path_argument() {
    let (store, router) = bridge().await;

    let (status, body) = send(&router, post("/set/user%2F1/v", Body::empty())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "OK"}));
    assert_eq!(store.value(b"user/1"), Some(b"v".to_vec()));
    assert_eq!(store.value(b"user"), None);

    let (_, body) = send(&router, post("/get/user%2F1", Body::empty())).await;
    assert_eq!(body, json!({"result": "v"}));
}

#[tokio::test]
async fn commands_unknown_to_the_bridge_reach_the_store() {
    let (store, router) = bridge().await;

    let (status, body) = send(&router, post_json("/", json!(["XADD", "s", "*", "f", "v"]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "ERR unknown command 'xadd'"}));
    assert_eq!(store.commands(), 1);

    let (status, body) = send(
        &router,
        post_json("/pipeline", json!([["NOSUCHCOMMAND"], ["SET", "k", "v"]])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{"error": "ERR unknown command 'nosuchcommand'"}, {"result": "OK"}])
    );
}

#[tokio::test]
async fn non_bearer_authorization_is_rejected_even_with_query_token() {
    let (store, router) = bridge().await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/get/a?_token={}", TOKEN))
        .header(header::AUTHORIZATION, "Basic dXNlcjpwdw==")
        .body(Body::empty())
        .expect("request");
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::AUTHORIZATION, format!("bearer {}", TOKEN))
        .body(Body::from(json!(["PING"]).to_string()))
        .expect("request");
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "PONG"}));
    assert_eq!(store.commands(), 1);
}

#[tokio::test]
async fn abandoned_request_still_completes_and_releases_session() {
    let store = MockStore::start().await.expect("mock store");
    let pool = pool_for(store.addr());
    let router = build_router(pool.clone(), AuthGate::new(AuthToken::new(TOKEN)));

    let request = post_json(
        "/pipeline",
        json!([["DEBUG", "SLEEP", "0.3"], ["SET", "late", "1"]]),
    );
    let abandoned = tokio::time::timeout(Duration::from_millis(50), router.oneshot(request)).await;
    assert!(abandoned.is_err(), "request should still be running");
    assert_eq!(pool.stats().active, 1);

    let mut settled = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = pool.stats();
        if stats.active == 0 && stats.idle == 1 {
            settled = true;
            break;
        }
    }
    assert!(settled, "session not returned: {:?}", pool.stats());
    assert_eq!(store.value(b"late"), Some(b"1".to_vec()));
}
