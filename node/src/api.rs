//! # HTTP API
//!
//! Builds the axum router that exposes the bootstrap node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                  | Description                              |
//! |--------|-----------------------|------------------------------------------|
//! | GET    | `/health`             | Liveness probe                           |
//! | GET    | `/status`             | Node status summary                      |
//! | GET    | `/api/resolve/:name`  | Local index, then the full resolver chain |
//! | POST   | `/api/submit`         | Submit a version 1 record                |
//! | POST   | `/api/submit/v2`      | Submit a version 2 record                |
//! | GET    | `/api/names`          | Full index listing for peer sync         |
//! | POST   | `/api/nonce`          | Issue a submission nonce                 |
//!
//! Rejections carry the error class in the body. A replayed nonce answers
//! `409 Conflict`, as does a name held by another owner.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use moniker_protocol::config::{PROTOCOL_VERSION, RECORD_VERSION_LEGACY, RECORD_VERSION_QUANTUM};
use moniker_protocol::crypto::ClassicalPublicKey;
use moniker_protocol::network::service::{submit_accepted, submit_rejected};
use moniker_protocol::network::{
    BootstrapNode, NamesResponse, NodeStats, NonceRequest, ResolveError, ResolveResponse,
    SubmitRequest, SubmitResponse,
};
use moniker_protocol::record::RecordJson;
use moniker_protocol::ErrorClass;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<BootstrapNode>,
    pub metrics: SharedMetrics,
    /// The node's reported software version.
    pub version: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/api/resolve/:name", get(resolve_handler))
        .route("/api/submit", post(submit_v1_handler))
        .route("/api/submit/v2", post(submit_v2_handler))
        .route("/api/names", get(names_handler))
        .route("/api/nonce", post(nonce_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub protocol_version: String,
    #[serde(flatten)]
    pub stats: NodeStats,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

/// Body of every non-submit error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub class: ErrorClass,
    pub error: String,
}

impl ErrorBody {
    fn response(status: StatusCode, class: ErrorClass, error: impl Into<String>) -> Response {
        (
            status,
            Json(ErrorBody {
                class,
                error: error.into(),
            }),
        )
            .into_response()
    }
}

/// HTTP status for a rejection of the given class.
pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::ReplayDetected | ErrorClass::NameTaken => StatusCode::CONFLICT,
        ErrorClass::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorClass::Unreachable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.node.stats();
    state.metrics.index_entries.set(stats.index_entries as i64);
    Json(StatusResponse {
        version: state.version.clone(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        stats,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn resolve_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let timer = state.metrics.resolution_latency_seconds.start_timer();
    let result = state.node.resolve(&name).await;
    timer.observe_duration();

    match result {
        Ok(resolution) => {
            let source = resolution.source.to_string();
            state
                .metrics
                .resolutions_total
                .with_label_values(&[source.as_str()])
                .inc();
            let body = ResolveResponse {
                record: RecordJson::from(resolution.record.record()),
                source,
                quantum_secure: resolution.record.is_quantum(),
                latency_ms: resolution.latency.as_millis() as u64,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            state.metrics.resolution_failures_total.inc();
            let status = match &e {
                ResolveError::InvalidName(_) => StatusCode::BAD_REQUEST,
                ResolveError::NotFound(_) => StatusCode::NOT_FOUND,
            };
            ErrorBody::response(status, e.class(), e.to_string())
        }
    }
}

async fn submit_v1_handler(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    submit(state, payload, RECORD_VERSION_LEGACY).await
}

async fn submit_v2_handler(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    submit(state, payload, RECORD_VERSION_QUANTUM).await
}

async fn submit(
    state: AppState,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
    route_version: u8,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            state
                .metrics
                .records_rejected_total
                .with_label_values(&[ErrorClass::MalformedInput.as_str()])
                .inc();
            let body = SubmitResponse {
                accepted: false,
                name: String::new(),
                hash: None,
                revision: None,
                quantum_secure: false,
                class: Some(ErrorClass::MalformedInput),
                reason: Some(rejection.body_text()),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let name = request.record.name.clone();
    match state.node.submit(request, Some(route_version)).await {
        Ok(outcome) => {
            if outcome.index.changed() {
                state.metrics.records_accepted_total.inc();
            }
            state.metrics.index_entries.set(state.node.index().len() as i64);
            (StatusCode::OK, Json(submit_accepted(&outcome))).into_response()
        }
        Err(e) => {
            let class = e.class();
            if class == ErrorClass::ReplayDetected {
                state.metrics.replay_attempts_total.inc();
            }
            state
                .metrics
                .records_rejected_total
                .with_label_values(&[class.as_str()])
                .inc();
            (status_for(class), Json(submit_rejected(name, &e))).into_response()
        }
    }
}

async fn names_handler(State(state): State<AppState>) -> impl IntoResponse {
    let records: Vec<RecordJson> = state
        .node
        .index()
        .records()
        .iter()
        .map(|r| RecordJson::from(r.record()))
        .collect();
    Json(NamesResponse {
        count: records.len(),
        records,
    })
}

async fn nonce_handler(
    State(state): State<AppState>,
    payload: Result<Json<NonceRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ErrorBody::response(
                StatusCode::BAD_REQUEST,
                ErrorClass::MalformedInput,
                rejection.body_text(),
            )
        }
    };
    match ClassicalPublicKey::from_hex(&request.owner_key) {
        Ok(key) => (StatusCode::OK, Json(state.node.issue_nonce(&key))).into_response(),
        Err(e) => {
            warn!(error = %e, "nonce requested for an invalid owner key");
            ErrorBody::response(StatusCode::BAD_REQUEST, ErrorClass::MalformedInput, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use moniker_protocol::identity::{generate_keypair, Identity, KeyKind};
    use moniker_protocol::network::{BootstrapConfig, NonceResponse, Substrate};
    use moniker_protocol::pow::{FixedCostPow, SearchControl};
    use moniker_protocol::record::{NameRecord, RecordBuilder};
    use moniker_protocol::verify::RecordVerifier;
    use tower::ServiceExt;

    fn test_app_state() -> AppState {
        let node = BootstrapNode::new(
            BootstrapConfig::default(),
            RecordVerifier::for_network(Default::default()),
            Substrate::in_memory(),
            None,
        );
        AppState {
            node: Arc::new(node),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
            version: "0.1.0-test".into(),
        }
    }

    /// A cheap legacy record: seven characters need two zero nibbles.
    fn legacy_record(name: &str) -> (Identity, NameRecord) {
        let identity = generate_keypair(KeyKind::Legacy, None).unwrap();
        let record = RecordBuilder::new(name, format!("bafy-{name}"))
            .build(&identity, &FixedCostPow, &SearchControl::default())
            .unwrap();
        (identity, record)
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    /// Sends a POST request with a JSON body and returns the (status, body_bytes).
    async fn post_json(router: &Router, path: &str, body: String) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_node_stats() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["version"], "0.1.0-test");
        assert_eq!(json["network"], "devnet");
        assert_eq!(json["index_entries"], 0);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn resolve_unknown_name_is_404() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/api/resolve/nobody-here").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["class"], "unreachable");
    }

    #[tokio::test]
    async fn resolve_invalid_name_is_400() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/api/resolve/no_underscores").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["class"], "malformed_input");
    }

    #[tokio::test]
    async fn submit_then_resolve_and_list() {
        let state = test_app_state();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);
        let (_, record) = legacy_record("api-submitted");

        let body = serde_json::to_string(&SubmitRequest::new(&record)).unwrap();
        let (status, bytes) = post_json(&router, "/api/submit", body).await;
        assert_eq!(status, StatusCode::OK);
        let response: SubmitResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(response.accepted);
        assert_eq!(response.revision, Some(0));
        assert_eq!(metrics.records_accepted_total.get(), 1);
        assert_eq!(metrics.index_entries.get(), 1);

        let (status, bytes) = get(&router, "/api/resolve/API-SUBMITTED").await;
        assert_eq!(status, StatusCode::OK);
        let resolved: ResolveResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(resolved.source, "index");
        assert_eq!(NameRecord::try_from(resolved.record).unwrap(), record);

        let (status, bytes) = get(&router, "/api/names").await;
        assert_eq!(status, StatusCode::OK);
        let names: NamesResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(names.count, 1);
        assert_eq!(names.records[0].name, "api-submitted");
    }

    #[tokio::test]
    async fn v1_record_on_v2_route_is_rejected() {
        let router = create_router(test_app_state());
        let (_, record) = legacy_record("wrong-route");
        let body = serde_json::to_string(&SubmitRequest::new(&record)).unwrap();
        let (status, bytes) = post_json(&router, "/api/submit/v2", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let response: SubmitResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!response.accepted);
        assert_eq!(response.class, Some(ErrorClass::MalformedInput));
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let state = test_app_state();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);
        let (status, bytes) = post_json(&router, "/api/submit", "{\"record\": 7}".into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let response: SubmitResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response.class, Some(ErrorClass::MalformedInput));
        assert_eq!(
            metrics
                .records_rejected_total
                .with_label_values(&["malformed_input"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn rival_owner_gets_409() {
        let router = create_router(test_app_state());
        let (_, first) = legacy_record("contested");
        let (_, rival) = legacy_record("contested");

        let body = serde_json::to_string(&SubmitRequest::new(&first)).unwrap();
        assert_eq!(post_json(&router, "/api/submit", body).await.0, StatusCode::OK);

        let body = serde_json::to_string(&SubmitRequest::new(&rival)).unwrap();
        let (status, bytes) = post_json(&router, "/api/submit", body).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let response: SubmitResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response.class, Some(ErrorClass::NameTaken));
    }

    #[tokio::test]
    async fn replayed_nonce_is_409() {
        let state = test_app_state();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);
        let (identity, record) = legacy_record("nonce-guarded");
        let owner = identity.classical();

        let body = serde_json::to_string(&NonceRequest {
            owner_key: owner.public_key().to_hex(),
        })
        .unwrap();
        let (status, bytes) = post_json(&router, "/api/nonce", body).await;
        assert_eq!(status, StatusCode::OK);
        let issued: NonceResponse = serde_json::from_slice(&bytes).unwrap();

        let request = SubmitRequest::new(&record)
            .with_nonce(&record, owner, issued.nonce)
            .unwrap();
        let body = serde_json::to_string(&request).unwrap();
        assert_eq!(post_json(&router, "/api/submit", body.clone()).await.0, StatusCode::OK);

        let (status, bytes) = post_json(&router, "/api/submit", body).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let response: SubmitResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response.class, Some(ErrorClass::ReplayDetected));
        assert_eq!(metrics.replay_attempts_total.get(), 1);
    }

    #[tokio::test]
    async fn nonce_for_bad_key_is_400() {
        let router = create_router(test_app_state());
        let body = serde_json::to_string(&NonceRequest {
            owner_key: "not-hex".into(),
        })
        .unwrap();
        let (status, _) = post_json(&router, "/api/nonce", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn class_to_status() {
        assert_eq!(status_for(ErrorClass::ReplayDetected), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorClass::Storage), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorClass::Unreachable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorClass::InsufficientWork), StatusCode::BAD_REQUEST);
    }
}
