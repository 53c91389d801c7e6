//! HTTP API of a node
//!
//! Two routers share one [`NodeService`]:
//! - the client router (`/join`, `/ping`, `/set`, `/get`, `/delete`, ...)
//! - the cluster router (`/internal/*`), used only by peers
//!
//! Client requests are turned into an [`Operation`] and dispatched through
//! [`NodeService::dispatch`]. Every response body carries an `error` flag,
//! including responses to malformed JSON.

use crate::common::{request_tracing_middleware, Error, Metrics, RequestId};
use crate::node::keystore::KeyStore;
use crate::node::membership::MembershipManager;
use crate::node::protocol::*;
use crate::node::router::{KeyOp, Reply, Router as KeyRouter};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::warn;

/// Client operations
#[derive(Debug, Clone)]
pub enum Operation {
    Join(JoinRequest),
    Ping,
    Set(SetRequest),
    Get(KeyRequest),
    Delete(KeyRequest),
    Find(KeyRequest),
}

/// Shared state behind both routers
#[derive(Clone)]
pub struct NodeService {
    pub membership: Arc<MembershipManager>,
    pub router: Arc<KeyRouter>,
    pub store: Arc<KeyStore>,
    pub metrics: Arc<Metrics>,
}

impl NodeService {
    pub fn new(
        membership: Arc<MembershipManager>,
        router: Arc<KeyRouter>,
        store: Arc<KeyStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            membership,
            router,
            store,
            metrics,
        }
    }

    pub async fn dispatch(&self, op: Operation, request_id: Option<&str>) -> Response {
        match op {
            Operation::Join(req) => {
                match self.membership.handle_join(req.id, &req.address).await {
                    Ok(()) => Json(AckResponse::ok()).into_response(),
                    Err(e) => {
                        warn!("Join via node {} at {} failed: {}", req.id, req.address, e);
                        ack_error(&e)
                    }
                }
            }
            Operation::Ping => Json(self.membership.handle_ping()).into_response(),
            Operation::Set(req) => {
                let op = KeyOp::Set { value: req.value };
                match self.router.route(op, &req.key, request_id).await {
                    Ok(_) => Json(AckResponse::ok()).into_response(),
                    Err(e) => ack_error(&e),
                }
            }
            Operation::Get(req) => match self.router.route(KeyOp::Get, &req.key, request_id).await {
                Ok(Reply::Value(value)) => Json(GetResponse::found(value)).into_response(),
                Ok(other) => get_error(&Error::Internal(format!("unexpected reply {:?}", other))),
                Err(e) => get_error(&e),
            },
            Operation::Delete(req) => {
                match self.router.route(KeyOp::Delete, &req.key, request_id).await {
                    // deleting an absent key is not a failure
                    Ok(_) | Err(Error::NotFound(_)) => Json(AckResponse::ok()).into_response(),
                    Err(e) => ack_error(&e),
                }
            }
            Operation::Find(req) => match self.router.locate(&req.key) {
                Ok(owner) => Json(FindResponse {
                    error: false,
                    id: Some(owner.id),
                    address: owner.address.cluster,
                    api_address: owner.address.api,
                    message: None,
                })
                .into_response(),
                Err(e) => (
                    e.to_http_status(),
                    Json(FindResponse {
                        error: true,
                        id: None,
                        address: String::new(),
                        api_address: String::new(),
                        message: Some(e.to_string()),
                    }),
                )
                    .into_response(),
            },
        }
    }
}

fn ack_error(e: &Error) -> Response {
    (e.to_http_status(), Json(AckResponse::failed(e.to_string()))).into_response()
}

fn get_error(e: &Error) -> Response {
    (e.to_http_status(), Json(GetResponse::failed(e.to_string()))).into_response()
}

fn bad_json(rejection: JsonRejection) -> Error {
    Error::Validation(rejection.body_text())
}

fn request_id(ext: Option<Extension<RequestId>>) -> Option<String> {
    ext.map(|Extension(RequestId(id))| id)
}

// --- Client API ---

pub fn create_client_router(service: NodeService, max_body_bytes: usize) -> Router {
    let metrics = service.metrics.clone();
    Router::new()
        .route(ENDPOINT_JOIN, post(join))
        .route(ENDPOINT_PING, get(ping).post(ping))
        .route(ENDPOINT_SET, post(set_key))
        .route(ENDPOINT_GET, post(get_key))
        .route(ENDPOINT_DELETE, post(delete_key))
        .route(ENDPOINT_FIND, post(find_key))
        .route(ENDPOINT_MEMBERS, get(members))
        .route(ENDPOINT_METRICS, get(metrics_text))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::from_fn_with_state(
            metrics,
            request_tracing_middleware,
        ))
        .with_state(service)
}

async fn join(
    State(service): State<NodeService>,
    body: Result<Json<JoinRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => service.dispatch(Operation::Join(req), None).await,
        Err(rejection) => ack_error(&bad_json(rejection)),
    }
}

async fn ping(State(service): State<NodeService>) -> Response {
    service.dispatch(Operation::Ping, None).await
}

async fn set_key(
    State(service): State<NodeService>,
    rid: Option<Extension<RequestId>>,
    body: Result<Json<SetRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => {
            let rid = request_id(rid);
            service.dispatch(Operation::Set(req), rid.as_deref()).await
        }
        Err(rejection) => ack_error(&bad_json(rejection)),
    }
}

async fn get_key(
    State(service): State<NodeService>,
    rid: Option<Extension<RequestId>>,
    body: Result<Json<KeyRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => {
            let rid = request_id(rid);
            service.dispatch(Operation::Get(req), rid.as_deref()).await
        }
        Err(rejection) => get_error(&bad_json(rejection)),
    }
}

async fn delete_key(
    State(service): State<NodeService>,
    rid: Option<Extension<RequestId>>,
    body: Result<Json<KeyRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => {
            let rid = request_id(rid);
            service.dispatch(Operation::Delete(req), rid.as_deref()).await
        }
        Err(rejection) => ack_error(&bad_json(rejection)),
    }
}

async fn find_key(
    State(service): State<NodeService>,
    body: Result<Json<KeyRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => service.dispatch(Operation::Find(req), None).await,
        Err(rejection) => ack_error(&bad_json(rejection)),
    }
}

async fn members(State(service): State<NodeService>) -> impl IntoResponse {
    Json(service.membership.members())
}

async fn metrics_text(State(service): State<NodeService>) -> impl IntoResponse {
    service.metrics.local_keys.set(service.store.len() as u64);
    service
        .metrics
        .ring_members
        .set(service.membership.ring().len() as u64);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.metrics.to_prometheus(),
    )
}

// --- Cluster API ---

pub fn create_cluster_router(service: NodeService, max_body_bytes: usize) -> Router {
    let metrics = service.metrics.clone();
    Router::new()
        .route(ENDPOINT_INTERNAL_JOIN, post(internal_join))
        .route(ENDPOINT_INTERNAL_PING, get(internal_ping))
        .route(ENDPOINT_INTERNAL_SET, post(internal_set))
        .route(ENDPOINT_INTERNAL_GET, post(internal_get))
        .route(ENDPOINT_INTERNAL_DELETE, post(internal_delete))
        .route(ENDPOINT_INTERNAL_HANDOFF, post(internal_handoff))
        .route(ENDPOINT_INTERNAL_MEMBERS, get(members))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::from_fn_with_state(
            metrics,
            request_tracing_middleware,
        ))
        .with_state(service)
}

async fn internal_join(
    State(service): State<NodeService>,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => Json(service.membership.handle_peer_join(req)).into_response(),
        Err(rejection) => ack_error(&bad_json(rejection)),
    }
}

async fn internal_ping(State(service): State<NodeService>) -> impl IntoResponse {
    Json(service.membership.handle_ping())
}

async fn internal_set(
    State(service): State<NodeService>,
    body: Result<Json<SetRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return ack_error(&bad_json(rejection)),
    };
    let op = KeyOp::Set { value: req.value };
    match service.router.apply_local(&op, &req.key) {
        Ok(_) => Json(AckResponse::ok()).into_response(),
        Err(e) => ack_error(&e),
    }
}

async fn internal_get(
    State(service): State<NodeService>,
    body: Result<Json<KeyRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return get_error(&bad_json(rejection)),
    };
    match service.router.apply_local(&KeyOp::Get, &req.key) {
        Ok(Reply::Value(value)) => Json(GetResponse::found(value)).into_response(),
        Ok(other) => get_error(&Error::Internal(format!("unexpected reply {:?}", other))),
        Err(e) => get_error(&e),
    }
}

async fn internal_delete(
    State(service): State<NodeService>,
    body: Result<Json<KeyRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return ack_error(&bad_json(rejection)),
    };
    // NotFound stays a 404 here so the forwarding node can tell it apart
    match service.router.apply_local(&KeyOp::Delete, &req.key) {
        Ok(_) => Json(AckResponse::ok()).into_response(),
        Err(e) => ack_error(&e),
    }
}

async fn internal_handoff(
    State(service): State<NodeService>,
    body: Result<Json<SetRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return ack_error(&bad_json(rejection)),
    };
    match service.router.accept_handoff(&req.key, &req.value) {
        Ok(accepted) => Json(HandoffResponse {
            error: false,
            accepted,
        })
        .into_response(),
        Err(e) => ack_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use crate::node::peer_client::PeerClient;
    use crate::node::placement::ModuloPlacement;
    use crate::node::ring::{NodeId, RingEntry};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn service(id: u64, joined: bool) -> NodeService {
        let metrics = Arc::new(Metrics::new());
        let peers =
            PeerClient::new(Duration::from_millis(200), Duration::from_millis(100)).unwrap();
        let membership = Arc::new(MembershipManager::new(
            RingEntry::new(id, "127.0.0.1:1", "127.0.0.1:1"),
            Arc::new(ModuloPlacement),
            peers.clone(),
            Duration::from_secs(30),
            metrics.clone(),
        ));
        if joined {
            membership.handle_join(NodeId(id), "127.0.0.1:1").await.unwrap();
        }
        let store = Arc::new(KeyStore::new());
        let router = Arc::new(KeyRouter::new(
            membership.clone(),
            store.clone(),
            peers,
            metrics.clone(),
        ));
        NodeService::new(membership, router, store, metrics)
    }

    async fn call(app: &Router, method: &str, path: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_ping_healthy() {
        let app = create_client_router(service(1, false).await, 1024);
        let (status, body) = call(&app, "GET", "/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], false);
        assert_eq!(body["state"], "bootstrapping");
    }

    #[tokio::test]
    async fn test_set_get_delete_single_node() {
        let app = create_client_router(service(1, true).await, 1024);

        let (_, body) = call(&app, "POST", "/set", r#"{"key":"3","value":"abc"}"#).await;
        assert_eq!(body["error"], false);

        let (status, body) = call(&app, "POST", "/get", r#"{"key":"3"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "abc");
        assert_eq!(body["error"], false);

        let (_, body) = call(&app, "POST", "/delete", r#"{"key":"3"}"#).await;
        assert_eq!(body["error"], false);

        let (status, body) = call(&app, "POST", "/get", r#"{"key":"3"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["value"], "");
        assert_eq!(body["error"], true);
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_not_an_error() {
        let app = create_client_router(service(1, true).await, 1024);
        let (status, body) = call(&app, "POST", "/delete", r#"{"key":"missing"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], false);
    }

    #[tokio::test]
    async fn test_empty_ring_reports_error() {
        let app = create_client_router(service(1, false).await, 1024);
        let (status, body) = call(&app, "POST", "/set", r#"{"key":"k","value":"v"}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], true);
    }

    #[tokio::test]
    async fn test_validation_errors_carry_error_flag() {
        let app = create_client_router(service(1, true).await, 1024);

        let (status, body) = call(&app, "POST", "/set", r#"{"key":"","value":"v"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);

        let (status, body) = call(&app, "POST", "/get", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert_eq!(body["value"], "");
    }

    #[tokio::test]
    async fn test_join_self_then_find() {
        let app = create_client_router(service(2, false).await, 1024);
        let (_, body) = call(&app, "POST", "/join", r#"{"id":"2","address":"127.0.0.1:1"}"#).await;
        assert_eq!(body["error"], false);

        let (_, body) = call(&app, "POST", "/find", r#"{"key":"anything"}"#).await;
        assert_eq!(body["error"], false);
        assert_eq!(body["id"], "2");
    }

    #[tokio::test]
    async fn test_join_unreachable_peer() {
        let app = create_client_router(service(1, false).await, 1024);
        let (status, body) =
            call(&app, "POST", "/join", r#"{"id":"2","address":"127.0.0.1:1"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], true);
    }

    #[tokio::test]
    async fn test_request_id_echoed() {
        let app = create_client_router(service(1, false).await, 1024);
        let request = Request::builder()
            .uri("/ping")
            .header(crate::common::REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(crate::common::REQUEST_ID_HEADER).unwrap(),
            "abc-123"
        );
    }

    #[tokio::test]
    async fn test_internal_get_miss_is_404() {
        let svc = service(1, false).await;
        let app = create_cluster_router(svc.clone(), 1024);
        let (status, body) = call(&app, "POST", "/internal/get", r#"{"key":"k"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], true);

        // internal ops bypass routing, even on an empty ring
        let (_, body) = call(&app, "POST", "/internal/set", r#"{"key":"k","value":"v"}"#).await;
        assert_eq!(body["error"], false);
        assert_eq!(svc.store.get("k").unwrap(), "v");
    }

    #[tokio::test]
    async fn test_internal_join_admits_sender() {
        let svc = service(1, false).await;
        let app = create_cluster_router(svc.clone(), 4096);
        let sync = SyncRequest {
            from: RingEntry::new(2, "127.0.0.1:1", "127.0.0.1:1"),
            members: vec![],
        };
        let (status, body) = call(
            &app,
            "POST",
            "/internal/join",
            &serde_json::to_string(&sync).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["from"]["id"], "1");
        assert_eq!(body["members"].as_array().unwrap().len(), 2);
        assert!(svc.membership.ring().contains(NodeId(2)));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = create_client_router(service(1, true).await, 1024);
        call(&app, "GET", "/ping", "").await;
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("ringkv_ring_members 1"));
    }

    #[tokio::test]
    async fn test_internal_handoff_keeps_newer_state() {
        let svc = service(1, false).await;
        let app = create_cluster_router(svc.clone(), 1024);

        call(&app, "POST", "/internal/set", r#"{"key":"k","value":"new"}"#).await;
        let (status, body) =
            call(&app, "POST", "/internal/handoff", r#"{"key":"k","value":"old"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], false);
        assert_eq!(svc.store.get("k").unwrap(), "new");

        let (status, _) = call(&app, "POST", "/internal/delete", r#"{"key":"d"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) =
            call(&app, "POST", "/internal/handoff", r#"{"key":"d","value":"ghost"}"#).await;
        assert_eq!(body["accepted"], false);
        assert!(svc.store.get("d").is_err());

        let (_, body) =
            call(&app, "POST", "/internal/handoff", r#"{"key":"m","value":"moved"}"#).await;
        assert_eq!(body["error"], false);
        assert_eq!(body["accepted"], true);
        assert_eq!(svc.store.get("m").unwrap(), "moved");
    }

    #[tokio::test]
    async fn test_unmatched_paths_share_one_metrics_label() {
        let app = create_client_router(service(1, true).await, 1024);
        for i in 0..20 {
            call(&app, "GET", &format!("/junk/{}", i), "").await;
        }
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("/junk/"));
        assert!(text.contains("ringkv_endpoint_requests_total{path=\"unmatched\"} 20"));
    }
}
