//! Tracing initialization and Prometheus metrics.

use crate::error::{ApiError, ApiResult};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use toolmesh_context::TruncationRecorder;
use toolmesh_core::{TruncationKind, TruncationOutcome};

/// Initialize the tracing subscriber from `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Server metrics, exposed at `/metrics` in Prometheus text format.
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub webhook_deliveries: IntCounterVec,
    pub rate_limited: IntCounterVec,
    pub context_operations: IntCounterVec,
    pub truncations: IntCounterVec,
}

impl Metrics {
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("toolmesh_http_requests_total", "HTTP requests by status class"),
            &["method", "status"],
        )
        .map_err(internal)?;
        let webhook_deliveries = IntCounterVec::new(
            Opts::new(
                "toolmesh_webhook_deliveries_total",
                "Inbound webhook deliveries by provider and outcome",
            ),
            &["provider", "outcome"],
        )
        .map_err(internal)?;
        let rate_limited = IntCounterVec::new(
            Opts::new("toolmesh_rate_limited_total", "Requests rejected by the rate limiter"),
            &["client_kind"],
        )
        .map_err(internal)?;
        let context_operations = IntCounterVec::new(
            Opts::new(
                "toolmesh_context_operations_total",
                "Context manager operations by kind",
            ),
            &["operation"],
        )
        .map_err(internal)?;
        let truncations = IntCounterVec::new(
            Opts::new(
                "toolmesh_truncations_total",
                "Truncation passes by strategy and outcome",
            ),
            &["strategy", "outcome"],
        )
        .map_err(internal)?;

        registry
            .register(Box::new(http_requests.clone()))
            .map_err(internal)?;
        registry
            .register(Box::new(webhook_deliveries.clone()))
            .map_err(internal)?;
        registry
            .register(Box::new(rate_limited.clone()))
            .map_err(internal)?;
        registry
            .register(Box::new(context_operations.clone()))
            .map_err(internal)?;
        registry
            .register(Box::new(truncations.clone()))
            .map_err(internal)?;

        Ok(Self {
            registry,
            http_requests,
            webhook_deliveries,
            rate_limited,
            context_operations,
            truncations,
        })
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> ApiResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(internal)?;
        String::from_utf8(buffer).map_err(|e| ApiError::internal(e.to_string()))
    }
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    ApiError::internal(format!("metrics: {e}"))
}

/// The context manager reports every truncation pass through this sink.
impl TruncationRecorder for Metrics {
    fn record_truncation(&self, strategy: TruncationKind, outcome: TruncationOutcome) {
        self.truncations
            .with_label_values(&[strategy.as_str(), outcome.as_str()])
            .inc();
    }
}
