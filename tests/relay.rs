//! UI relay tests

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use jarvis_voice::relay::{RelayHub, UiRelay, router};
use jarvis_voice::{ConversationTurn, Error, TurnSink};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn post_turn(hub: RelayHub, body: Value) -> (StatusCode, Value) {
    let response = router(hub)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/prompt_response")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_prompt_response_acknowledges_and_publishes() {
    let hub = RelayHub::new();
    let mut subscriber = hub.subscribe();

    let turn = json!({"role": "assistant", "content": "Lights on."});
    let (status, body) = post_turn(hub.clone(), turn.clone()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "data": turn}));
    assert_eq!(subscriber.recv().await.unwrap(), turn);
}

#[tokio::test]
async fn test_prompt_response_without_subscribers() {
    let (status, body) = post_turn(RelayHub::new(), json!({"role": "user", "content": "hi"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn test_prompt_response_rejects_non_json() {
    let response = router(RelayHub::new())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/prompt_response")
                .header("content-type", "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_notify_posts_role_and_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt_response"))
        .and(body_json(json!({"role": "user", "content": "turn on the lights"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(1)
        .mount(&server)
        .await;

    let relay = UiRelay::new(format!("{}/prompt_response", server.uri()));
    relay
        .notify(&ConversationTurn::user("turn on the lights"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_notify_reports_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let relay = UiRelay::new(format!("{}/prompt_response", server.uri()));
    let err = relay
        .notify(&ConversationTurn::assistant("hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Relay(_)), "{err:?}");
}

#[tokio::test]
async fn test_unreachable_relay_is_error() {
    let relay = UiRelay::new("http://127.0.0.1:1/prompt_response");
    assert!(relay.notify(&ConversationTurn::user("hi")).await.is_err());
}

#[tokio::test]
async fn test_sink_delivers_to_running_server() {
    let hub = RelayHub::new();
    let mut subscriber = hub.subscribe();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, router(hub)).await });

    let relay = UiRelay::new(format!("http://{addr}/prompt_response"));
    relay.record(&ConversationTurn::assistant("It's noon."));

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, json!({"role": "assistant", "content": "It's noon."}));

    server.abort();
}
