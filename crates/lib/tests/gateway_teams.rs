//! Integration tests: start the gateway on a free port with an in-memory backend and drive
//! it over HTTP. No cluster is required. Server tasks are left running when tests end.

use async_trait::async_trait;
use kontrol::allowlist::AllowList;
use kontrol::auth::{compute_digest, SharedSecret};
use kontrol::backend::{BackendError, CallCounts, ClusterBackend, MemoryBackend, PodRecord};
use kontrol::command::Dispatcher;
use kontrol::config::Settings;
use kontrol::gateway::{self, GatewayState};
use kontrol::render::ResponseFormat;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

// "secret\n"
const SECRET: &str = "c2VjcmV0Cg==";
const PERMISSIONS: &str = "verbs: [get, delete, describe]\nresources: [pod, pods]\nnamespaces: [default, nginx]\n";

fn settings(insecure_commands: bool, response_format: ResponseFormat) -> Settings {
    Settings {
        bind: "127.0.0.1".to_string(),
        port: 0,
        max_body_bytes: 64 * 1024,
        secret: SharedSecret::new(SECRET),
        allowlist: Arc::new(AllowList::from_yaml_str(PERMISSIONS).expect("permissions parse")),
        response_format,
        insecure_commands,
        backend_timeout: Duration::from_secs(5),
    }
}

fn seeded_backend() -> Arc<MemoryBackend> {
    let mut running = PodRecord::new("nginx", "nginx-ingress-controller-bsdad");
    running.phase = "Running".to_string();
    running.images = vec!["quay.io/kubernetes-ingress-controller/nginx-ingress-controller:0.25.0".to_string()];
    Arc::new(MemoryBackend::with_pods([
        running,
        PodRecord::new("nginx", "nginx-ingress-controller-a12fb"),
        PodRecord::new("default", "web-0"),
    ]))
}

/// Start the gateway on 127.0.0.1:<free port>; returns its base URL.
async fn start(settings: Settings, backend: Arc<dyn ClusterBackend>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    let state = GatewayState::new(settings, Dispatcher::new(backend));
    tokio::spawn(async move {
        let _ = gateway::serve(listener, state).await;
    });
    format!("http://127.0.0.1:{}", port)
}

fn activity(text: &str) -> String {
    serde_json::to_string(&json!({
        "type": "message",
        "id": "1",
        "channelId": "msteams",
        "from": { "id": "id", "name": "Daniel Cole", "aadObjectId": "id" },
        "conversation": { "isGroup": true, "id": "id", "name": null, "conversationType": "channel" },
        "textFormat": "plain",
        "text": text,
    }))
    .expect("serialize activity")
}

async fn post_signed(base: &str, body: &str) -> reqwest::Response {
    let digest = compute_digest(body.as_bytes(), &SharedSecret::new(SECRET)).expect("sign");
    reqwest::Client::new()
        .post(format!("{}/teams", base))
        .header("Content-Type", "application/json")
        .header("Authorization", format!("HMAC {}", digest))
        .header("X-Request-Id", "test-request")
        .body(body.to_string())
        .send()
        .await
        .expect("send")
}

#[tokio::test]
async fn health_responds() {
    let base = start(settings(false, ResponseFormat::Teams), seeded_backend()).await;
    let resp = reqwest::get(format!("{}/healthz", base)).await.expect("get");
    assert!(resp.status().is_success());
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json, json!({ "health": true }));
}

#[tokio::test]
async fn teams_requires_auth_header() {
    let backend = seeded_backend();
    let base = start(settings(false, ResponseFormat::Teams), backend.clone()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/teams", base))
        .body(activity("<at>kontrol</at> delete pod nginx web-0\n"))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(backend.calls().total(), 0);
}

#[tokio::test]
async fn teams_rejects_digest_for_other_body() {
    let backend = seeded_backend();
    let base = start(settings(false, ResponseFormat::Teams), backend.clone()).await;
    let signed = activity("<at>kontrol</at> get pods nginx\n");
    let digest = compute_digest(signed.as_bytes(), &SharedSecret::new(SECRET)).unwrap();
    let tampered = activity("<at>kontrol</at> delete pod nginx nginx-ingress-controller-a12fb\n");
    let resp = reqwest::Client::new()
        .post(format!("{}/teams", base))
        .header("Authorization", format!("HMAC {}", digest))
        .body(tampered)
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(backend.calls(), CallCounts::default());
}

#[tokio::test]
async fn teams_rejects_undecodable_digest() {
    let base = start(settings(false, ResponseFormat::Teams), seeded_backend()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/teams", base))
        .header("Authorization", "HMAC ***")
        .body(activity("<at>kontrol</at> get pods nginx\n"))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn teams_get_pods_replies_with_card() {
    let base = start(settings(false, ResponseFormat::Teams), seeded_backend()).await;
    let resp = post_signed(&base, &activity("<at>kontrol</at> get pods nginx\n")).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json["type"], "message");
    let card = &json["attachments"][0]["content"];
    assert_eq!(card["type"], "AdaptiveCard");
    // header plus one container per pod in the namespace
    assert_eq!(card["body"].as_array().map(|b| b.len()), Some(3));
}

#[tokio::test]
async fn teams_delete_pod_replies_ok() {
    let backend = seeded_backend();
    let base = start(settings(false, ResponseFormat::Teams), backend.clone()).await;
    let resp = post_signed(&base, &activity("<at>kontrol</at> delete pod default web-0\n")).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json, json!({ "type": "message", "text": "ok" }));
    assert_eq!(backend.calls(), CallCounts { get: 0, list: 0, delete: 1 });
    assert!(!backend.contains("default", "web-0").await);
}

#[tokio::test]
async fn teams_unknown_command_is_not_available() {
    let backend = seeded_backend();
    let base = start(settings(false, ResponseFormat::Teams), backend.clone()).await;
    let resp = post_signed(&base, &activity("<at>teams-kontrol</at> debug last time\n")).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let text = resp.text().await.expect("body");
    assert_eq!(
        text,
        r#"{"type":"message","text":"Daniel Cole - that command is not available. Please specify a valid command."}"#
    );
    assert_eq!(backend.calls().total(), 0);
}

#[tokio::test]
async fn teams_missing_pod_is_reported() {
    let base = start(settings(false, ResponseFormat::Teams), seeded_backend()).await;
    let resp = post_signed(&base, &activity("<at>kontrol</at> get pod nginx gone\n")).await;
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(
        json["text"],
        "Daniel Cole - pod \"gone\" not found in namespace \"nginx\""
    );
}

#[tokio::test]
async fn teams_rejects_non_json_payload() {
    let base = start(settings(false, ResponseFormat::Teams), seeded_backend()).await;
    let resp = post_signed(&base, "get pods nginx").await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn teams_other_methods_are_authenticated_first() {
    let base = start(settings(false, ResponseFormat::Teams), seeded_backend()).await;
    let resp = reqwest::get(format!("{}/teams", base)).await.expect("get");
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let digest = compute_digest(b"", &SharedSecret::new(SECRET)).expect("sign");
    let resp = reqwest::Client::new()
        .get(format!("{}/teams", base))
        .header("Authorization", format!("HMAC {}", digest))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn teams_misconfigured_secret_is_server_error() {
    let backend = seeded_backend();
    let mut s = settings(false, ResponseFormat::Teams);
    s.secret = SharedSecret::new("%%%");
    let base = start(s, backend.clone()).await;
    let resp = post_signed(&base, &activity("<at>kontrol</at> get pods nginx\n")).await;
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(backend.calls().total(), 0);
}

fn padded_activity(text: &str, padding: usize) -> String {
    serde_json::to_string(&json!({
        "type": "message",
        "from": { "id": "id", "name": "Daniel Cole" },
        "text": text,
        "padding": "x".repeat(padding),
    }))
    .expect("serialize activity")
}

#[tokio::test]
async fn teams_body_over_limit_is_rejected() {
    let backend = seeded_backend();
    let mut s = settings(false, ResponseFormat::Teams);
    s.max_body_bytes = 256;
    let base = start(s, backend.clone()).await;
    let resp = post_signed(&base, &padded_activity("<at>kontrol</at> get pods nginx\n", 1024)).await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls().total(), 0);
}

#[tokio::test]
async fn teams_body_limit_follows_configuration() {
    let mut s = settings(false, ResponseFormat::Teams);
    s.max_body_bytes = 4 * 1024 * 1024;
    let base = start(s, seeded_backend()).await;
    // larger than axum's 2 MiB default extractor limit
    let body = padded_activity("<at>kontrol</at> get pods nginx\n", 3 * 1024 * 1024);
    let resp = post_signed(&base, &body).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json["attachments"][0]["content"]["type"], "AdaptiveCard");
}

#[tokio::test]
async fn command_endpoint_absent_unless_enabled() {
    let backend = seeded_backend();
    let base = start(settings(false, ResponseFormat::Teams), backend.clone()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/command", base))
        .body("delete pod default web-0")
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(backend.calls().total(), 0);
}

async fn post_command(base: &str, body: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/command", base))
        .body(body.to_string())
        .send()
        .await
        .expect("send")
}

#[tokio::test]
async fn command_endpoint_status_mapping() {
    let backend = seeded_backend();
    let base = start(settings(true, ResponseFormat::Json), backend.clone()).await;

    let resp = post_command(&base, "get pods nginx\n").await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json["kind"], "collection");
    assert_eq!(json["pods"].as_array().map(|p| p.len()), Some(2));

    let resp = post_command(&base, "get pod nginx gone").await;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let resp = post_command(&base, "get pox nginx").await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = post_command(&base, "describe pods nginx x").await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let before = backend.calls();
    let resp = post_command(&base, "delete pods nginx").await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls(), before);

    let resp = post_command(&base, "delete pod nginx nginx-ingress-controller-a12fb").await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json, json!({ "kind": "empty" }));
}

struct SlowBackend;

#[async_trait]
impl ClusterBackend for SlowBackend {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodRecord, BackendError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(PodRecord::new(namespace, name))
    }

    async fn list_pods(&self, _namespace: &str) -> Result<Vec<PodRecord>, BackendError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn delete_pod(&self, _namespace: &str, _name: &str) -> Result<(), BackendError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn slow_backend_times_out() {
    let mut s = settings(true, ResponseFormat::Json);
    s.backend_timeout = Duration::from_millis(100);
    let base = start(s, Arc::new(SlowBackend)).await;
    let resp = post_command(&base, "get pods nginx").await;
    assert_eq!(resp.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);

    let resp = post_signed(&base, &activity("<at>kontrol</at> get pods nginx\n")).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json["text"], "Daniel Cole - the command timed out");
}

const BACKEND_CAUSE: &str = "dial tcp 10.96.0.1:443: connection refused";

struct UnreachableBackend;

#[async_trait]
impl ClusterBackend for UnreachableBackend {
    async fn get_pod(&self, _namespace: &str, _name: &str) -> Result<PodRecord, BackendError> {
        Err(BackendError::Transport(BACKEND_CAUSE.to_string()))
    }

    async fn list_pods(&self, _namespace: &str) -> Result<Vec<PodRecord>, BackendError> {
        Err(BackendError::Transport(BACKEND_CAUSE.to_string()))
    }

    async fn delete_pod(&self, _namespace: &str, _name: &str) -> Result<(), BackendError> {
        Err(BackendError::Status(500))
    }
}

#[tokio::test]
async fn command_backend_failure_is_bad_gateway() {
    let base = start(settings(true, ResponseFormat::Json), Arc::new(UnreachableBackend)).await;

    let resp = post_command(&base, "get pods nginx").await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    let text = resp.text().await.expect("body");
    assert!(!text.contains(BACKEND_CAUSE), "{}", text);

    let resp = post_command(&base, "delete pod nginx web-0").await;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn teams_backend_failure_hides_cause() {
    let base = start(settings(false, ResponseFormat::Teams), Arc::new(UnreachableBackend)).await;
    let resp = post_signed(&base, &activity("<at>kontrol</at> get pod nginx web-0\n")).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: Value = resp.json().await.expect("parse JSON");
    assert_eq!(json["text"], "Daniel Cole - cluster backend request failed");
    assert!(json.get("attachments").is_none());
}
