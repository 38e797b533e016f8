//! Per-model streaming metrics.
//!
//! A tracker is created when a model's stream starts and dropped when it
//! ends. It is owned by that model's unit of work only, so it needs no
//! synchronization.

use std::time::{Duration, Instant};

/// Metrics derived from one delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSample {
    /// First-token latency in milliseconds, present only on the first delta
    pub latency_ms: Option<u64>,
    /// Deltas per second since the first delta; always finite and >= 0
    pub tokens_per_second: f64,
    /// Deltas seen so far
    pub total_tokens: u64,
}

/// Accumulates token arrival times for one model.
///
/// A "token" here is one delta event carrying text, not a tokenizer unit.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    start: Instant,
    first_token: Option<Instant>,
    token_count: u64,
}

impl MetricsTracker {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            first_token: None,
            token_count: 0,
        }
    }

    /// Record a delta arriving at `now`.
    ///
    /// Deltas without text produce no sample and leave the tracker unchanged.
    pub fn on_delta(&mut self, has_content: bool, now: Instant) -> Option<MetricsSample> {
        if !has_content {
            return None;
        }

        let latency_ms = match self.first_token {
            Some(_) => None,
            None => {
                self.first_token = Some(now);
                Some(now.saturating_duration_since(self.start).as_millis() as u64)
            }
        };

        self.token_count += 1;

        Some(MetricsSample {
            latency_ms,
            tokens_per_second: self.tokens_per_second(now),
            total_tokens: self.token_count,
        })
    }

    /// Rolling rate as of `now`; 0 before the first delta or when no time has elapsed
    pub fn tokens_per_second(&self, now: Instant) -> f64 {
        let Some(first) = self.first_token else {
            return 0.0;
        };

        let elapsed_secs = now.saturating_duration_since(first).as_secs_f64();
        if elapsed_secs <= 0.0 {
            return 0.0;
        }

        let rate = self.token_count as f64 / elapsed_secs;
        if rate.is_finite() {
            rate
        } else {
            0.0
        }
    }

    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    pub fn first_token_latency(&self) -> Option<Duration> {
        self.first_token
            .map(|first| first.saturating_duration_since(self.start))
    }
}
