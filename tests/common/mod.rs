//! Local mock chat-completion gateway for integration tests.
//!
//! Behaviour is selected by the model id prefix:
//! - `fail/*`  → 401
//! - `slow/*`  → 120 ms before the response (or before each stream frame)
//! - `empty/*` → stream without any text
//! - `abort/*` → one content frame, then a provider error frame
//! - anything else → "Hello from <model>" in three frames

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use llm_speedtest::orchestrator::BenchmarkOrchestrator;
use llm_speedtest::provider::GatewaySettings;
use llm_speedtest::routes::AppState;
use llm_speedtest::store::{CredentialStore, ResultHistory, ResultSink};

pub const TEST_KEY: &str = "sk-or-v1-integration-test";
pub const SLOW_DELAY: Duration = Duration::from_millis(120);
const FRAME_DELAY: Duration = Duration::from_millis(10);

pub const CATALOGUE: &[&str] = &[
    "moonshotai/kimi-k2",
    "some/other-model",
    "z-ai/glm-4.5",
    "z-ai/glm-4.5-air",
];

pub struct MockGateway {
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockGateway {
    /// Bind to an ephemeral port and serve until dropped
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let app = Router::new()
            .route("/chat/completions", post(handle_chat))
            .route("/models", get(handle_models));

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            port,
        })
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings::new(self.url())
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Orchestrator plus the matching router state over one store
pub fn app_state<S>(gateway: &MockGateway, store: Arc<S>) -> AppState
where
    S: CredentialStore + ResultSink + ResultHistory + 'static,
{
    let orchestrator = Arc::new(BenchmarkOrchestrator::new(
        gateway.settings(),
        store.clone(),
        store.clone(),
    ));
    AppState {
        orchestrator,
        credentials: store.clone(),
        history: store,
    }
}

async fn handle_models() -> Json<Value> {
    let data: Vec<Value> = CATALOGUE
        .iter()
        .map(|id| json!({"id": id, "name": id, "context_length": 131072}))
        .collect();
    Json(json!({ "data": data }))
}

async fn handle_chat(Json(body): Json<Value>) -> Response {
    let model = body["model"].as_str().unwrap_or_default().to_string();
    let streaming = body["stream"].as_bool().unwrap_or(false);

    if model.starts_with("fail/") {
        return (StatusCode::UNAUTHORIZED, "User not found").into_response();
    }

    if streaming {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from_stream(sse_body(model)))
            .unwrap();
    }

    if model.starts_with("slow/") {
        tokio::time::sleep(SLOW_DELAY).await;
    }

    let content = if model.starts_with("empty/") {
        String::new()
    } else {
        format!("Hello from {}", model)
    };

    Json(json!({
        "id": format!("gen-{}", uuid::Uuid::new_v4()),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 3, "total_tokens": 6}
    }))
    .into_response()
}

fn frame(value: Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", value))
}

fn content_frame(text: &str) -> Bytes {
    frame(json!({"choices": [{"index": 0, "delta": {"content": text}}]}))
}

fn sse_body(model: String) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let delay = if model.starts_with("slow/") { SLOW_DELAY } else { FRAME_DELAY };

        yield Ok(Bytes::from_static(b": OPENROUTER PROCESSING\n\n"));
        yield Ok(frame(json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]})));

        if model.starts_with("abort/") {
            tokio::time::sleep(delay).await;
            yield Ok(content_frame("partial"));
            yield Ok(frame(json!({"error": {"code": 502, "message": "Provider overloaded"}})));
        } else {
            if model.starts_with("empty/") {
                tokio::time::sleep(delay).await;
            } else {
                let model_suffix = format!(" {}", model);
                for text in ["Hello", " from", model_suffix.as_str()] {
                    tokio::time::sleep(delay).await;
                    yield Ok(content_frame(text));
                }
            }

            yield Ok(frame(json!({
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": null, "total_tokens": 3}
            })));
            yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
        }
    }
}
