use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;

use crate::error::BenchError;
use crate::middleware;
use crate::models::benchmark::{BenchmarkRequest, StreamEvent};
use crate::orchestrator::BenchmarkOrchestrator;
use crate::store::{validate_api_key, CredentialStore, ResultHistory};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_HISTORY_LIMIT: usize = 20;
const DEFAULT_RESULTS_LIMIT: usize = 50;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BenchmarkOrchestrator>,
    pub credentials: Arc<dyn CredentialStore>,
    pub history: Arc<dyn ResultHistory>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyPayload {
    api_key: String,
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Benchmark, history and model discovery routes
pub fn speed_test_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/speed-test/run", post(run_handler))
        .route("/api/speed-test/stream", post(stream_handler))
        .route("/api/speed-test/history", get(history_handler))
        .route("/api/speed-test/models", get(models_handler))
        .route("/api/speed-test/popular-models", get(popular_models_handler))
        .route("/api/test-results", get(test_results_handler))
        .with_state(state)
}

/// Gateway key management routes
pub fn credential_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/openrouter/api-key", post(save_api_key_handler))
        .route("/api/openrouter/api-key/status", get(api_key_status_handler))
        .route("/api/openrouter/test-connection", post(test_connection_handler))
        .with_state(state)
}

/// Build the application with all routes and middleware
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(speed_test_routes(state.clone()))
        .merge(credential_routes(state))
        .layer(middleware::cors_layer())
        .layer(axum::middleware::from_fn(middleware::timing_middleware))
}

/// Unwrap a JSON body, reporting malformed input as a validation error
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, BenchError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| BenchError::Validation(rejection.body_text()))
}

fn success(data: impl serde::Serialize) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": data,
    }))
}

/// GET / - Welcome message
async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Welcome to LLM Speed Test API",
        "version": VERSION
    }))
}

/// GET /health - Health check with timestamp
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// POST /api/speed-test/run - Batch benchmark
///
/// Runs every model concurrently and returns once all have finished.
async fn run_handler(
    State(state): State<AppState>,
    payload: Result<Json<BenchmarkRequest>, JsonRejection>,
) -> Result<Json<Value>, BenchError> {
    let request = json_body(payload)?;
    tracing::info!(
        "Request to /api/speed-test/run: models={}, max_tokens={}",
        request.models.len(),
        request.max_tokens
    );

    let comparison = state.orchestrator.run_benchmark(request).await?;
    Ok(success(comparison))
}

/// POST /api/speed-test/stream - Streaming benchmark over SSE
///
/// Each event is named after its `type` tag. Whole-request errors are
/// returned as JSON before the stream opens.
async fn stream_handler(
    State(state): State<AppState>,
    payload: Result<Json<BenchmarkRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, BenchError> {
    let request = json_body(payload)?;
    tracing::info!(
        "Request to /api/speed-test/stream: models={}, max_tokens={}",
        request.models.len(),
        request.max_tokens
    );

    let events = state
        .orchestrator
        .clone()
        .spawn_streaming_benchmark(request)?;

    let stream = events.map(|event| Ok::<_, Infallible>(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.kind())
        .json_data(event)
        .unwrap_or_else(|e| {
            tracing::warn!(model = %event.model(), error = %e, "Failed to encode stream event");
            Event::default().event("error").data(e.to_string())
        })
}

/// GET /api/speed-test/history - Most recent results
async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, BenchError> {
    recent_results(&state, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
}

/// GET /api/test-results - Most recent results, larger default page
async fn test_results_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, BenchError> {
    recent_results(&state, query.limit.unwrap_or(DEFAULT_RESULTS_LIMIT))
}

fn recent_results(state: &AppState, limit: usize) -> Result<Json<Value>, BenchError> {
    let results = state
        .history
        .recent(limit)
        .map_err(|e| BenchError::Persistence(format!("{:#}", e)))?;
    Ok(success(results))
}

/// GET /api/speed-test/models - Gateway model catalogue
async fn models_handler(State(state): State<AppState>) -> Result<Json<Value>, BenchError> {
    let models = state.orchestrator.available_models().await?;
    tracing::debug!("Gateway lists {} models", models.len());
    Ok(success(models))
}

/// GET /api/speed-test/popular-models - Shortlisted models the gateway offers
async fn popular_models_handler(State(state): State<AppState>) -> Json<Value> {
    success(state.orchestrator.popular_models().await)
}

/// POST /api/openrouter/api-key - Validate and store the gateway key
async fn save_api_key_handler(
    State(state): State<AppState>,
    payload: Result<Json<ApiKeyPayload>, JsonRejection>,
) -> Result<Json<Value>, BenchError> {
    let payload = json_body(payload)?;
    let settings = state.orchestrator.settings();
    let api_key = payload.api_key.trim();

    validate_api_key(api_key, &settings.api_key_prefix)?;
    state
        .credentials
        .put_credential(&settings.provider_name, api_key)
        .map_err(|e| BenchError::Persistence(format!("{:#}", e)))?;

    tracing::info!(provider = %settings.provider_name, "Stored gateway API key");
    Ok(success(json!({ "provider": settings.provider_name })))
}

/// GET /api/openrouter/api-key/status - Whether a usable key is stored
async fn api_key_status_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, BenchError> {
    let settings = state.orchestrator.settings();
    let credential = state.credentials.get_credential(&settings.provider_name)?;

    let configured = credential
        .map(|c| validate_api_key(&c.value, &settings.api_key_prefix).is_ok())
        .unwrap_or(false);

    Ok(success(json!({ "configured": configured })))
}

/// POST /api/openrouter/test-connection - Try a key without storing it
async fn test_connection_handler(
    State(state): State<AppState>,
    payload: Result<Json<ApiKeyPayload>, JsonRejection>,
) -> Result<Json<Value>, BenchError> {
    let payload = json_body(payload)?;
    let connected = state.orchestrator.test_connection(&payload.api_key).await?;
    Ok(success(json!({ "connected": connected })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GatewaySettings;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn create_test_state(store: Arc<MemoryStore>) -> AppState {
        // Nothing listens on port 1; these tests never reach the gateway
        let orchestrator = Arc::new(BenchmarkOrchestrator::new(
            GatewaySettings::new("http://127.0.0.1:1"),
            store.clone(),
            store.clone(),
        ));
        AppState {
            orchestrator,
            credentials: store.clone(),
            history: store,
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_handler() {
        let response = root_handler().await;
        assert_eq!(response.0["message"], "Welcome to LLM Speed Test API");
        assert_eq!(response.0["version"], VERSION);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.0["status"], "healthy");
        assert!(response.0["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_run_rejects_empty_models() {
        let app = build_app(create_test_state(Arc::new(MemoryStore::new())));

        let response = app
            .oneshot(post_json(
                "/api/speed-test/run",
                json!({"prompt": "hi", "models": []}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["type"], "validation_error");
    }

    #[tokio::test]
    async fn test_run_rejects_malformed_body() {
        let app = build_app(create_test_state(Arc::new(MemoryStore::new())));

        let response = app
            .oneshot(post_json("/api/speed-test/run", json!({"models": ["a/x"]})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_without_credential() {
        let app = build_app(create_test_state(Arc::new(MemoryStore::new())));

        let response = app
            .oneshot(post_json(
                "/api/speed-test/run",
                json!({"prompt": "hi", "models": ["a/x"]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let body = body_json(response).await;
        assert_eq!(body["type"], "credential_not_found");
    }

    #[tokio::test]
    async fn test_stream_errors_before_opening() {
        let store = Arc::new(MemoryStore::with_credential("OpenRouter", "changeme"));
        let app = build_app(create_test_state(store));

        let response = app
            .oneshot(post_json(
                "/api/speed-test/stream",
                json!({"prompt": "hi", "models": ["a/x"]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["type"], "invalid_credential");
    }

    #[tokio::test]
    async fn test_save_api_key_and_status() {
        let store = Arc::new(MemoryStore::new());
        let app = build_app(create_test_state(store.clone()));

        let status = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/openrouter/api-key/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(status).await["data"]["configured"], false);

        let rejected = app
            .clone()
            .oneshot(post_json(
                "/api/openrouter/api-key",
                json!({"apiKey": "your-api-key"}),
            ))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        assert!(store.get_credential("OpenRouter").unwrap().is_none());

        let saved = app
            .clone()
            .oneshot(post_json(
                "/api/openrouter/api-key",
                json!({"apiKey": " sk-or-v1-abc "}),
            ))
            .await
            .unwrap();
        assert_eq!(saved.status(), StatusCode::OK);
        assert_eq!(
            store.get_credential("OpenRouter").unwrap().unwrap().value,
            "sk-or-v1-abc"
        );

        let status = app
            .oneshot(
                Request::builder()
                    .uri("/api/openrouter/api-key/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(status).await["data"]["configured"], true);
    }

    #[tokio::test]
    async fn test_history_respects_limit() {
        use crate::models::benchmark::ResultRecord;
        use crate::store::ResultSink;

        let store = Arc::new(MemoryStore::new());
        for model in ["a/x", "b/y", "c/z"] {
            store
                .record(&ResultRecord {
                    prompt: "hi".to_string(),
                    provider: "OpenRouter".to_string(),
                    model: model.to_string(),
                    response_time_ms: 10,
                    response_text: String::new(),
                    status: "completed".to_string(),
                })
                .unwrap();
        }
        let app = build_app(create_test_state(store));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/speed-test/history?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["model"], "c/z");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/test-results")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_connection_rejects_bad_key_shape() {
        let app = build_app(create_test_state(Arc::new(MemoryStore::new())));

        let response = app
            .oneshot(post_json(
                "/api/openrouter/test-connection",
                json!({"apiKey": "sk-ant-123"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
