use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{Value, json};

use tableside_core::{OperationType, ResourceKey};
use tableside_offline::{
    ConnectivityMonitor, ConnectivityProbe, HttpProbe, HttpRemote, InMemoryStore, RemoteError,
    ResourceFetcher, SubmitOutcome, SyncConfig, SyncEngine,
};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    authorization: Option<String>,
    body: String,
}

#[derive(Default)]
struct FakeApi {
    requests: Mutex<Vec<Recorded>>,
    unhealthy: AtomicBool,
}

impl FakeApi {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn handle(
    State(api): State<Arc<FakeApi>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_string();

    if path == "/health" {
        return if api.unhealthy.load(Ordering::SeqCst) {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        } else {
            StatusCode::OK.into_response()
        };
    }

    api.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });

    match (method, path.as_str()) {
        (Method::GET, "/api/tables") => Json(json!([{"id": "T1", "status": "free"}])).into_response(),
        (Method::GET, _) => StatusCode::NOT_FOUND.into_response(),
        (Method::POST, "/api/bills/B-locked/pay") => {
            (StatusCode::CONFLICT, "bill already settled").into_response()
        }
        (Method::PATCH, _) => StatusCode::NO_CONTENT.into_response(),
        _ => (StatusCode::CREATED, Json(json!({"ok": true}))).into_response(),
    }
}

struct TestServer {
    base_url: String,
    api: Arc<FakeApi>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let api = Arc::new(FakeApi::default());
        let app = Router::new().fallback(handle).with_state(api.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, api, handle }
    }

    fn config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_api_url(self.base_url.clone())
            .with_auth_token("secret-token")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn operations_reach_their_endpoints_with_bearer_auth() {
    let server = TestServer::spawn().await;
    let remote = HttpRemote::new(&server.config()).unwrap();

    let created = remote
        .send(OperationType::CreateOrder, &json!({"tableId": "T1", "items": []}))
        .await
        .unwrap();
    assert_eq!(created, json!({"ok": true}));

    // 204 with an empty body reads as null.
    let updated = remote
        .send(
            OperationType::UpdateItemStatus,
            &json!({"orderId": "O1", "itemId": 3, "status": "served"}),
        )
        .await
        .unwrap();
    assert_eq!(updated, Value::Null);

    let requests = server.api.requests();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].path, "/api/orders");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer secret-token"));
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["tableId"], "T1");

    assert_eq!(requests[1].method, Method::PATCH);
    assert_eq!(requests[1].path, "/api/orders/O1/items/3/status");
}

#[tokio::test]
async fn rejected_calls_surface_status_and_body() {
    let server = TestServer::spawn().await;
    let remote = HttpRemote::new(&server.config()).unwrap();

    let err = remote
        .send(OperationType::PayBill, &json!({"billId": "B-locked", "amount": 42}))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RemoteError::Status {
            status: 409,
            body: "bill already settled".into(),
        }
    );
}

#[tokio::test]
async fn invalid_payload_never_hits_the_network() {
    let server = TestServer::spawn().await;
    let remote = HttpRemote::new(&server.config()).unwrap();

    let err = remote
        .send(OperationType::AssignWaiter, &json!({"waiterId": "W1"}))
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::InvalidPayload(_)));
    assert!(server.api.requests().is_empty());
}

#[tokio::test]
async fn fetcher_reads_collections_under_api_prefix() {
    let server = TestServer::spawn().await;
    let remote = HttpRemote::new(&server.config()).unwrap();

    let tables = remote.fetch(&ResourceKey::Tables).await.unwrap();
    assert_eq!(tables[0]["id"], "T1");

    let err = remote.fetch(&ResourceKey::Staff).await.unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 404, .. }));

    let paths: Vec<_> = server.api.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/api/tables", "/api/staff"]);
}

#[tokio::test]
async fn health_probe_tracks_server_state() {
    let server = TestServer::spawn().await;
    let probe = HttpProbe::new(&server.config()).unwrap();

    assert!(probe.fetch_now().await.unwrap());

    server.api.unhealthy.store(true, Ordering::SeqCst);
    assert!(!probe.fetch_now().await.unwrap());
}

#[tokio::test]
async fn unreachable_server_reads_as_offline() {
    // Bind and drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = SyncConfig::default().with_api_url(format!("http://{}", addr));
    let probe = HttpProbe::new(&config).unwrap();
    assert!(!probe.fetch_now().await.unwrap());

    let remote = HttpRemote::new(&config).unwrap();
    let err = remote.fetch(&ResourceKey::Tables).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)));
}

#[tokio::test]
async fn engine_applies_live_and_refreshes_cache_over_http() {
    let server = TestServer::spawn().await;
    let config = server.config();

    let remote = Arc::new(HttpRemote::new(&config).unwrap());
    let registry = remote.handler_registry().unwrap();
    let monitor = Arc::new(ConnectivityMonitor::new(Arc::new(
        HttpProbe::new(&config).unwrap(),
    )));
    let engine = Arc::new(
        SyncEngine::builder(InMemoryStore::arc(), monitor, registry, remote).build(),
    );

    let handle = engine.start().await;
    assert!(engine.is_online());

    let outcome = engine
        .submit(
            OperationType::UpdateTableStatus,
            json!({"tableId": "T1", "status": "occupied"}),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Applied { .. }));
    assert!(engine.pending().await.unwrap().is_empty());

    let cached = engine.cached(&ResourceKey::Tables).await.unwrap();
    assert_eq!(cached[0]["id"], "T1");

    let paths: Vec<_> = server
        .api
        .requests()
        .into_iter()
        .map(|r| format!("{} {}", r.method, r.path))
        .collect();
    assert!(paths.contains(&"PATCH /api/tables/T1/status".to_string()));
    assert!(paths.contains(&"GET /api/tables".to_string()));

    handle.shutdown().await;
}
