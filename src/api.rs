//! REST API server
//!
//! Exposes the orchestration engine over HTTP. Callers get the declared
//! answer key out of the final state plus an explicit failure marker when
//! a run did not complete - never a raw stack trace.

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::classifier::{InteractionClassifier, InteractionType};
use crate::composer::Node;
use crate::config::Config;
use crate::engine::{Engine, RunReport};
use crate::pipeline::{self, FINAL_RECOMMENDATION_KEY, QUICK_ANSWER_KEY};
use crate::rpc::{self, RpcRequest};
use crate::state::{SessionStore, SharedState};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdviseRequest {
    pub task: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_preferences: Option<Value>,
    /// Force the full workflow even for quick-looking queries.
    #[serde(default)]
    pub full_analysis: bool,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub full_pipeline: Arc<Node>,
    pub quick_pipeline: Arc<Node>,
    pub sessions: Arc<dyn SessionStore>,
}

impl ApiState {
    pub fn new(
        engine: Arc<Engine>,
        config: &Config,
        sessions: Arc<dyn SessionStore>,
    ) -> crate::Result<Self> {
        let full_pipeline = Arc::new(pipeline::default_pipeline(config)?);
        let quick_pipeline = Arc::new(Node::Unit(pipeline::quick_query_unit(config)));
        Ok(Self {
            engine,
            full_pipeline,
            quick_pipeline,
            sessions,
        })
    }
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn resolve_session_id(value: Option<&str>) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => Uuid::new_v4(),
    }
}

fn answer_payload(report: &RunReport, answer_key: &str, kind: &str, session_id: Uuid) -> Value {
    let mut payload = json!({
        "type": kind,
        "run_id": report.run_id,
        "session_id": session_id,
        "answer": report.output(answer_key),
        "state_keys": report.final_state.keys().collect::<Vec<_>>(),
        "trace_records": report.trace.len(),
    });

    if let Some(failure) = &report.failure {
        payload["failure"] = json!({
            "node": failure.node,
            "error": failure.error,
        });
        // Surface the best output that did get produced.
        if let Some(last_key) = report.last_populated_key() {
            payload["last_populated_key"] = json!(last_key);
            payload["last_populated_value"] = report
                .output(last_key)
                .cloned()
                .unwrap_or(Value::Null);
        }
    }

    payload
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<ApiState>) -> Json<Value> {
    Json(state.engine.metrics().snapshot())
}

async fn advise(
    State(state): State<ApiState>,
    Json(req): Json<AdviseRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received advise request: {}", req.task);

    let session_id = resolve_session_id(req.session_id.as_deref());

    // Seed from the stored session, then overlay explicit preferences.
    let mut initial_state = match state.sessions.load(session_id).await {
        Ok(Some(stored)) => stored,
        Ok(None) => SharedState::new(),
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Session load failed: {}", e))),
            );
        }
    };
    if let Some(preferences) = &req.user_preferences {
        initial_state.set("user_preferences", preferences.clone());
    } else if !initial_state.contains("user_preferences") {
        initial_state.set("user_preferences", json!({}));
    }

    let interaction = if req.full_analysis {
        InteractionType::FullAnalysis
    } else {
        InteractionClassifier::classify(&req.task)
    };
    info!("Interaction type: {:?}", interaction);

    let (root, answer_key, kind) = match interaction {
        InteractionType::QuickQuery => (&state.quick_pipeline, QUICK_ANSWER_KEY, "quick_query"),
        InteractionType::FullAnalysis => {
            (&state.full_pipeline, FINAL_RECOMMENDATION_KEY, "full_analysis")
        }
    };

    let report = state.engine.run(root, initial_state, &req.task).await;

    if let Err(e) = state.sessions.save(session_id, &report.final_state).await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Session save failed: {}", e))),
        );
    }

    let payload = answer_payload(&report, answer_key, kind, session_id);
    if report.is_success() {
        (StatusCode::OK, Json(ApiResponse::success(payload)))
    } else {
        // The failure marker travels in the payload; the HTTP layer only
        // signals that the run did not complete.
        let mut response = ApiResponse::success(payload);
        response.success = false;
        response.error = report.failure.map(|f| f.error);
        (StatusCode::OK, Json(response))
    }
}

async fn rpc_endpoint(
    State(state): State<ApiState>,
    Json(request): Json<RpcRequest>,
) -> Json<rpc::RpcResponse> {
    Json(rpc::handle_request(state.engine.registry(), request).await)
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/advise", post(advise))
        .route("/rpc", post(rpc_endpoint))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerateResponse, ScriptedBackend};
    use crate::state::InMemorySessionStore;
    use crate::tools::create_default_registry;

    fn test_state(backend: ScriptedBackend) -> ApiState {
        let engine = Arc::new(Engine::new(
            Arc::new(create_default_registry()),
            Arc::new(backend),
        ));
        ApiState::new(engine, &Config::default(), Arc::new(InMemorySessionStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_quick_query_round_trip() {
        let backend = ScriptedBackend::new(vec![
            GenerateResponse::tool_call("get_stock_price", json!({"symbol": "AAPL"})),
            GenerateResponse::final_text("AAPL is trading at $178.50."),
        ]);
        let state = test_state(backend);

        let (status, Json(response)) = advise(
            State(state),
            Json(AdviseRequest {
                task: "What is the current price of AAPL?".into(),
                session_id: None,
                user_preferences: None,
                full_analysis: false,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["type"], json!("quick_query"));
        assert_eq!(data["answer"], json!("AAPL is trading at $178.50."));
    }

    #[tokio::test]
    async fn test_failed_run_surfaces_marker_not_trace() {
        // Backend that always demands an unbound tool; the quick unit
        // exhausts its rounds and fails with IncompleteError.
        let backend = ScriptedBackend::new(vec![
            GenerateResponse::tool_call(
                "calculate_var",
                json!({"portfolio_value": 1.0, "holdings": {}})
            );
            20
        ]);
        let state = test_state(backend);

        let (_status, Json(response)) = advise(
            State(state),
            Json(AdviseRequest {
                task: "What is the price of AAPL today?".into(),
                session_id: None,
                user_preferences: None,
                full_analysis: false,
            }),
        )
        .await;

        assert!(!response.success);
        let data = response.data.unwrap();
        assert!(data["failure"]["node"].is_string());
        assert!(response.error.unwrap().contains("decision rounds"));
    }

    #[tokio::test]
    async fn test_session_state_persists_between_requests() {
        let backend = ScriptedBackend::always("noted");
        let state = test_state(backend);
        let sessions = state.sessions.clone();

        let (_status, Json(response)) = advise(
            State(state),
            Json(AdviseRequest {
                task: "What is the price of MSFT now?".into(),
                session_id: Some("client-42".into()),
                user_preferences: Some(json!({"risk_tolerance": "low"})),
                full_analysis: false,
            }),
        )
        .await;

        assert!(response.success);
        let session_id = stable_uuid_from_string("client-42");
        let stored = sessions.load(session_id).await.unwrap().unwrap();
        assert_eq!(
            stored.get("user_preferences"),
            Some(&json!({"risk_tolerance": "low"}))
        );
        assert!(stored.contains(QUICK_ANSWER_KEY));
    }
}
