//! Per-request latency and cost accounting, mirrored into `metrics`.

use crate::api_types::Usage;
use lumen_core::config::TelemetryConfig;
use lumen_core::Metrics;
use std::time::Instant;

/// Wall-clock timer started when a request enters the engine.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimer {
    started: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

#[derive(Debug, Clone)]
pub struct CostModel {
    per_attempt_usd: f64,
    input_per_mtok: f64,
    output_per_mtok: f64,
}

impl From<&TelemetryConfig> for CostModel {
    fn from(cfg: &TelemetryConfig) -> Self {
        Self {
            per_attempt_usd: cfg.cost_per_attempt_usd,
            input_per_mtok: cfg.input_rate_per_mtok,
            output_per_mtok: cfg.output_rate_per_mtok,
        }
    }
}

impl CostModel {
    /// Flat estimate used for the reported metrics.
    pub fn attempt_cost(&self, attempts: u32) -> f64 {
        self.per_attempt_usd * attempts as f64
    }

    /// Token-rate estimate when the provider reports usage.
    pub fn token_cost(&self, usage: &Usage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_mtok
            + usage.output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }

    pub fn metrics(&self, timer: &RequestTimer, attempts: u32, grounding_score: f32) -> Metrics {
        Metrics {
            latency_ms: (timer.elapsed_ms() * 100.0).round() / 100.0,
            estimated_cost: self.attempt_cost(attempts),
            grounding_score,
        }
    }
}

/// Count a finished request by outcome and record its latency and attempts.
pub fn record_request(outcome: &'static str, attempts: u32, latency_ms: f64) {
    metrics::counter!("lumen_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("lumen_request_latency_ms").record(latency_ms);
    metrics::histogram!("lumen_request_attempts").record(attempts as f64);
}

pub fn record_route(route: &'static str) {
    metrics::counter!("lumen_routes_total", "route" => route).increment(1);
}
