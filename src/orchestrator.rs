//! Concurrent benchmark orchestration.
//!
//! One prompt is fanned out to every requested model. All per-model units of
//! work run concurrently on the calling task and are joined without
//! short-circuiting: a provider failure is captured into that model's
//! outcome (or terminal stream event) and never affects its siblings.

use chrono::Utc;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::BenchError;
use crate::metrics::MetricsTracker;
use crate::models::benchmark::{
    result_status, BenchmarkComparison, BenchmarkRequest, ModelOutcome, ResultRecord, StreamEvent,
};
use crate::models::openai::ModelDescriptor;
use crate::provider::{GatewaySettings, ProviderClient};
use crate::store::{validate_credential, CredentialStore, ResultSink};

/// Shortlist offered as quick picks, in display order
const POPULAR_MODELS: &[&str] = &[
    "z-ai/glm-4.5",
    "deepseek/deepseek-chat-v3.1",
    "moonshotai/kimi-k2",
    "qwen/qwen3-coder",
    "z-ai/glm-4.5-air",
];

/// Entry point for batch and streaming benchmark runs
pub struct BenchmarkOrchestrator {
    settings: GatewaySettings,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn ResultSink>,
}

impl BenchmarkOrchestrator {
    pub fn new(
        settings: GatewaySettings,
        credentials: Arc<dyn CredentialStore>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            settings,
            credentials,
            sink,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Resolve and check the provider key, then build a client for it.
    ///
    /// Performs no network activity.
    fn connect(&self) -> Result<ProviderClient, BenchError> {
        let provider = &self.settings.provider_name;
        let credential = self
            .credentials
            .get_credential(provider)?
            .ok_or_else(|| BenchError::CredentialNotFound(provider.clone()))?;

        validate_credential(&credential, &self.settings.api_key_prefix)?;
        ProviderClient::new(&self.settings, credential.value.trim())
    }

    /// Run every model once with a blocking completion and join the results.
    ///
    /// Fails only on validation or credential errors. Per-model failures are
    /// reported inside the returned outcomes, which are in completion order.
    pub async fn run_benchmark(
        &self,
        request: BenchmarkRequest,
    ) -> Result<BenchmarkComparison, BenchError> {
        request.validate()?;
        let client = self.connect()?;

        let run_id = Uuid::new_v4();
        tracing::info!(
            run_id = %run_id,
            models = request.models.len(),
            "Starting benchmark run"
        );

        let start_time = Utc::now().timestamp_millis();
        let clock = Instant::now();

        let results = {
            let mut units: FuturesUnordered<_> = request
                .models
                .iter()
                .map(|model| self.run_model(&client, &request, model))
                .collect();

            let mut results = Vec::with_capacity(request.models.len());
            while let Some(outcome) = units.next().await {
                results.push(outcome);
            }
            results
        };

        let total_time = clock.elapsed().as_millis() as u64;
        let end_time = start_time + total_time as i64;

        for outcome in &results {
            self.record(ResultRecord {
                prompt: request.prompt.clone(),
                provider: self.settings.provider_name.clone(),
                model: outcome.model.clone(),
                response_time_ms: outcome.response_time,
                response_text: outcome
                    .response
                    .as_ref()
                    .and_then(|response| response.content())
                    .unwrap_or_default()
                    .to_string(),
                status: outcome.status(),
            })
            .await;
        }

        let failed = results.iter().filter(|o| !o.is_success()).count();
        tracing::info!(
            run_id = %run_id,
            total_time_ms = total_time,
            succeeded = results.len() - failed,
            failed,
            "Benchmark run finished"
        );

        Ok(BenchmarkComparison {
            prompt: request.prompt,
            results,
            start_time,
            end_time,
            total_time,
        })
    }

    async fn run_model(
        &self,
        client: &ProviderClient,
        request: &BenchmarkRequest,
        model: &str,
    ) -> ModelOutcome {
        let result = client
            .complete(&request.to_chat_request(model, false))
            .await;

        tracing::debug!(
            model = %model,
            response_time_ms = result.response_time_ms,
            success = result.error.is_none(),
            "Model finished"
        );

        ModelOutcome {
            model: model.to_string(),
            response_time: result.response_time_ms,
            response: result.response,
            error: result.error,
        }
    }

    /// Stream every model concurrently, delivering events through `on_event`
    /// in arrival order.
    ///
    /// Resolves once every model has emitted its terminal event. Fails only on
    /// validation or credential errors, in which case no event is emitted.
    pub async fn run_streaming_benchmark<F>(
        &self,
        request: BenchmarkRequest,
        mut on_event: F,
    ) -> Result<(), BenchError>
    where
        F: FnMut(StreamEvent),
    {
        request.validate()?;
        let client = self.connect()?;

        let (events, mut receiver) = mpsc::unbounded();
        let producers = self.stream_all(&client, &request, events);
        let consumer = async {
            while let Some(event) = receiver.next().await {
                on_event(event);
            }
        };

        futures::join!(producers, consumer);
        Ok(())
    }

    /// Start a streaming run on a background task and hand back its events.
    ///
    /// Validation and credential errors are returned before anything is
    /// spawned. The receiver ends after the last model's terminal event.
    pub fn spawn_streaming_benchmark(
        self: Arc<Self>,
        request: BenchmarkRequest,
    ) -> Result<UnboundedReceiver<StreamEvent>, BenchError> {
        request.validate()?;
        let client = self.connect()?;

        let (events, receiver) = mpsc::unbounded();
        tokio::spawn(async move {
            self.stream_all(&client, &request, events).await;
        });

        Ok(receiver)
    }

    async fn stream_all(
        &self,
        client: &ProviderClient,
        request: &BenchmarkRequest,
        events: UnboundedSender<StreamEvent>,
    ) {
        let run_id = Uuid::new_v4();
        tracing::info!(
            run_id = %run_id,
            models = request.models.len(),
            "Starting streaming benchmark run"
        );

        let units = request
            .models
            .iter()
            .map(|model| self.stream_model(client, request, model, events.clone()));
        futures::future::join_all(units).await;

        tracing::info!(run_id = %run_id, "Streaming benchmark run finished");
    }

    async fn stream_model(
        &self,
        client: &ProviderClient,
        request: &BenchmarkRequest,
        model: &str,
        events: UnboundedSender<StreamEvent>,
    ) {
        emit(
            &events,
            StreamEvent::Start {
                model: model.to_string(),
            },
        );

        let start = Instant::now();
        let mut tracker = MetricsTracker::new(start);
        let mut text = String::new();

        let result = client
            .stream_complete(&request.to_chat_request(model, true), |delta| {
                let has_text = delta.has_text();
                let sample = tracker.on_delta(has_text, Instant::now());

                if let Some(content) = &delta.content {
                    text.push_str(content);
                }
                if has_text {
                    emit(
                        &events,
                        StreamEvent::Chunk {
                            model: model.to_string(),
                            content: delta.content,
                            reasoning: delta.reasoning,
                        },
                    );
                }
                if let Some(sample) = sample {
                    emit(
                        &events,
                        StreamEvent::Metrics {
                            model: model.to_string(),
                            latency: sample.latency_ms,
                            tokens_per_second: sample.tokens_per_second,
                            total_tokens: sample.total_tokens,
                        },
                    );
                }
            })
            .await;

        let response_time = start.elapsed().as_millis() as u64;
        let error = match result {
            Ok(()) => {
                emit(
                    &events,
                    StreamEvent::Complete {
                        model: model.to_string(),
                        total_tokens: tracker.token_count(),
                        response_time,
                    },
                );
                None
            }
            Err(e) => {
                tracing::warn!(model = %model, response_time_ms = response_time, error = %e, "Model stream failed");
                let message = e.to_string();
                emit(
                    &events,
                    StreamEvent::Error {
                        model: model.to_string(),
                        error: message.clone(),
                    },
                );
                Some(message)
            }
        };

        self.record(ResultRecord {
            prompt: request.prompt.clone(),
            provider: self.settings.provider_name.clone(),
            model: model.to_string(),
            response_time_ms: response_time,
            response_text: text,
            status: result_status(error.as_deref()),
        })
        .await;
    }

    /// Forward one outcome to the result sink on the blocking pool; failures
    /// are logged only
    async fn record(&self, record: ResultRecord) {
        let sink = Arc::clone(&self.sink);
        let model = record.model.clone();

        let result = tokio::task::spawn_blocking(move || sink.record(&record)).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(model = %model, error = %e, "Failed to persist benchmark result")
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "Result sink task failed")
            }
        }
    }

    /// The gateway's model catalogue (empty if the gateway cannot be read)
    pub async fn available_models(&self) -> Result<Vec<ModelDescriptor>, BenchError> {
        let client = self.connect()?;
        Ok(client.list_models().await)
    }

    /// Check a candidate key against the gateway without storing it
    pub async fn test_connection(&self, api_key: &str) -> Result<bool, BenchError> {
        let api_key = api_key.trim();
        crate::store::validate_api_key(api_key, &self.settings.api_key_prefix)?;

        let client = ProviderClient::new(&self.settings, api_key)?;
        let connected = client.test_connection().await;
        tracing::info!(connected, "Tested gateway connection");
        Ok(connected)
    }

    /// Shortlisted models that the gateway currently offers
    pub async fn popular_models(&self) -> Vec<String> {
        let models = match self.available_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "Error getting popular models");
                return Vec::new();
            }
        };

        POPULAR_MODELS
            .iter()
            .filter(|id| models.iter().any(|model| model.id == **id))
            .map(|id| id.to_string())
            .collect()
    }
}

fn emit(events: &UnboundedSender<StreamEvent>, event: StreamEvent) {
    // Receiver gone means nobody is listening anymore; the run still completes
    let _ = events.unbounded_send(event);
}
