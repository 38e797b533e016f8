use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use crate::error::BenchError;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse, ModelDescriptor, ModelList};
use crate::streaming::{parse_payload, SseDecoder, StreamDelta};

/// Where and how to reach the chat-completion gateway
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Base URL without trailing slash, e.g. `https://openrouter.ai/api/v1`
    pub base_url: String,
    /// Provider name credentials and results are stored under
    pub provider_name: String,
    /// Prefix every valid API key starts with
    pub api_key_prefix: String,
    pub connect_timeout_secs: u64,
    pub max_idle_connections: usize,
    /// `HTTP-Referer` attribution header
    pub referer: Option<String>,
    /// `X-Title` attribution header
    pub title: Option<String>,
}

impl GatewaySettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider_name: "OpenRouter".to_string(),
            api_key_prefix: "sk-or-".to_string(),
            connect_timeout_secs: 30,
            max_idle_connections: 20,
            referer: None,
            title: None,
        }
    }
}

/// Result of a batch completion; exactly one of `response`/`error` is set
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub response_time_ms: u64,
    pub response: Option<ChatCompletionResponse>,
    pub error: Option<String>,
}

/// HTTP client for one gateway credential.
///
/// Performs exactly one exchange per call: there is no retry or backoff, and
/// no whole-request timeout (only the TCP connect timeout applies).
pub struct ProviderClient {
    /// Shared HTTP client with connection pooling
    client: Client,
    base_url: String,
    api_key: String,
    referer: Option<String>,
    title: Option<String>,
}

impl ProviderClient {
    /// Create a new client for the given API key
    pub fn new(settings: &GatewaySettings, api_key: impl Into<String>) -> Result<Self, BenchError> {
        let client = Client::builder()
            .pool_max_idle_per_host(settings.max_idle_connections)
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|e| {
                BenchError::Internal(anyhow::anyhow!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            referer: settings.referer.clone(),
            title: settings.title.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn with_headers(&self, mut builder: RequestBuilder) -> RequestBuilder {
        builder = builder
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            builder = builder.header("X-Title", title);
        }
        builder
    }

    /// Send a chat-completion request and fail on any non-success status
    async fn send_chat(&self, request: &ChatCompletionRequest) -> Result<Response, BenchError> {
        let url = self.endpoint("chat/completions");
        tracing::debug!(
            url = %url,
            model = %request.model,
            stream = request.stream.unwrap_or(false),
            "Sending chat completion request"
        );

        let response = self
            .with_headers(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = %status, model = %request.model, "Received HTTP response");
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            model = %request.model,
            response_body = %error_text,
            "Gateway returned error response"
        );
        Err(BenchError::Upstream {
            status: status.as_u16(),
            message: error_text,
        })
    }

    /// Run one blocking chat completion.
    ///
    /// Never fails: HTTP and transport errors are returned in the result.
    /// `response_time_ms` spans from the call start until the body (or the
    /// error) is fully available.
    pub async fn complete(&self, request: &ChatCompletionRequest) -> CompletionResult {
        let start = Instant::now();

        let result = async {
            let response = self.send_chat(request).await?;
            let body = response.bytes().await.map_err(transport_error)?;
            serde_json::from_slice::<ChatCompletionResponse>(&body)
                .map_err(|e| BenchError::Decode(e.to_string()))
        }
        .await;

        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => CompletionResult {
                response_time_ms,
                response: Some(response),
                error: None,
            },
            Err(e) => {
                tracing::warn!(
                    model = %request.model,
                    response_time_ms,
                    error = %e,
                    "Completion failed"
                );
                CompletionResult {
                    response_time_ms,
                    response: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Run one streaming chat completion.
    ///
    /// `on_chunk` is invoked synchronously for every frame carrying content
    /// or reasoning text, before the next frame is read. Returns once the
    /// body ends or the gateway sends `[DONE]`. Transport and frame errors
    /// are returned to the caller.
    pub async fn stream_complete<F>(
        &self,
        request: &ChatCompletionRequest,
        mut on_chunk: F,
    ) -> Result<(), BenchError>
    where
        F: FnMut(StreamDelta),
    {
        let mut request = request.clone();
        request.stream = Some(true);

        let response = self.send_chat(&request).await?;
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transport_error)?;
            for payload in decoder.feed(&chunk) {
                if dispatch(&payload, &mut on_chunk)?.is_break() {
                    tracing::debug!(model = %request.model, "Received stream termination marker");
                    return Ok(());
                }
            }
        }

        for payload in decoder.finish() {
            if dispatch(&payload, &mut on_chunk)?.is_break() {
                break;
            }
        }

        tracing::debug!(model = %request.model, "Stream ended");
        Ok(())
    }

    /// List the gateway's model catalogue.
    ///
    /// Any failure yields an empty list.
    pub async fn list_models(&self) -> Vec<ModelDescriptor> {
        match self.fetch_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "Error fetching models");
                Vec::new()
            }
        }
    }

    async fn fetch_models(&self) -> Result<Vec<ModelDescriptor>, BenchError> {
        let url = self.endpoint("models");
        let response = self
            .with_headers(self.client.get(&url))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BenchError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let list: ModelList = response.json().await.map_err(transport_error)?;
        Ok(list.data)
    }

    /// Whether the key can read a non-empty catalogue
    pub async fn test_connection(&self) -> bool {
        !self.list_models().await.is_empty()
    }
}

fn dispatch<F>(payload: &str, on_chunk: &mut F) -> Result<ControlFlow<()>, BenchError>
where
    F: FnMut(StreamDelta),
{
    match parse_payload(payload)? {
        ControlFlow::Break(()) => Ok(ControlFlow::Break(())),
        ControlFlow::Continue(Some(delta)) => {
            on_chunk(delta);
            Ok(ControlFlow::Continue(()))
        }
        ControlFlow::Continue(None) => Ok(ControlFlow::Continue(())),
    }
}

/// Categorize a reqwest error for logs and outcome messages
fn transport_error(e: reqwest::Error) -> BenchError {
    let error_kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    };

    tracing::warn!(error_kind = error_kind, error = %e, "HTTP request error");
    BenchError::Transport(format!("{} (kind: {})", e, error_kind))
}
