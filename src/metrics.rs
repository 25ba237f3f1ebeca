//!
//! Prometheus metrics for request accounting and token usage.
//!
//! The registry is the only process-wide state in the proxy. It is built
//! once at AppState construction and handed to handlers through the state;
//! counter and histogram families are internally safe for concurrent
//! increments.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Labels for the request counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /** hashed user label or "unknown" */
    pub user: String,
    /** declared model name */
    pub model: String,
    /** endpoint path */
    pub endpoint: String,
    /** terminal status: ok or error */
    pub status: String,
}

///
/// Labels for the duration histogram.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DurationLabels {
    /** hashed user label or "unknown" */
    pub user: String,
    /** declared model name */
    pub model: String,
    /** endpoint path */
    pub endpoint: String,
}

///
/// Labels for the token counters.
///
/// Encoded as key/value pairs rather than a derived struct because the wire
/// label is `type`, which is a Rust keyword.
pub type TokenLabels = Vec<(&'static str, String)>;

///
/// Application metrics handle.
pub struct AppMetrics {
    /** the process-wide registry */
    registry: Registry,
    /** llm_requests_total{user,model,endpoint,status} */
    requests: Family<RequestLabels, Counter>,
    /** llm_request_duration_seconds{user,model,endpoint} */
    durations: Family<DurationLabels, Histogram>,
    /** llm_tokens_total{user,model,type} */
    llm_tokens: Family<TokenLabels, Counter>,
    /** inference_tokens_total{user,model,type} */
    inference_tokens: Family<TokenLabels, Counter>,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Histogram buckets for request duration, 0.1s through 60s */
const DURATION_BUCKETS: [f64; 10] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0];

/* --- start of code -------------------------------------------------------------------------- */

fn token_labels(user: &str, model: &str, kind: &str) -> TokenLabels {
    vec![
        ("user", user.to_string()),
        ("model", model.to_string()),
        ("type", kind.to_string()),
    ]
}

fn duration_histogram() -> Histogram {
    Histogram::new(DURATION_BUCKETS.into_iter())
}

impl AppMetrics {
    ///
    /// Build the registry and register every metric family.
    ///
    /// # Returns
    ///  * Metrics handle ready for concurrent use
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests = Family::<RequestLabels, Counter>::default();
        registry.register("llm_requests", "Requests handled by the proxy", requests.clone());

        let durations = Family::<DurationLabels, Histogram>::new_with_constructor(
            duration_histogram as fn() -> Histogram,
        );
        registry.register(
            "llm_request_duration_seconds",
            "Request duration in seconds",
            durations.clone(),
        );

        let llm_tokens = Family::<TokenLabels, Counter>::default();
        registry.register("llm_tokens", "Tokens through the proxy", llm_tokens.clone());

        let inference_tokens = Family::<TokenLabels, Counter>::default();
        registry.register(
            "inference_tokens",
            "Tokens consumed by inference backends",
            inference_tokens.clone(),
        );

        Self { registry, requests, durations, llm_tokens, inference_tokens }
    }

    ///
    /// Count one finished request.
    ///
    /// # Arguments
    ///  * `user` - hashed user label
    ///  * `model` - declared model name
    ///  * `endpoint` - endpoint path
    ///  * `status` - "ok" or "error"
    pub fn record_request(&self, user: &str, model: &str, endpoint: &str, status: &str) {
        self.requests
            .get_or_create(&RequestLabels {
                user: user.to_string(),
                model: model.to_string(),
                endpoint: endpoint.to_string(),
                status: status.to_string(),
            })
            .inc();
    }

    ///
    /// Observe a request duration.
    ///
    /// # Arguments
    ///  * `user` - hashed user label
    ///  * `model` - declared model name
    ///  * `endpoint` - endpoint path
    ///  * `seconds` - wall-clock duration
    pub fn record_duration(&self, user: &str, model: &str, endpoint: &str, seconds: f64) {
        self.durations
            .get_or_create(&DurationLabels {
                user: user.to_string(),
                model: model.to_string(),
                endpoint: endpoint.to_string(),
            })
            .observe(seconds);
    }

    ///
    /// Count token usage for one request.
    ///
    /// Both token counters advance together; they differ only in what scrapes
    /// them downstream.
    ///
    /// # Arguments
    ///  * `user` - hashed user label
    ///  * `model` - declared model name
    ///  * `input_tokens` - prompt tokens
    ///  * `output_tokens` - completion tokens
    pub fn record_tokens(&self, user: &str, model: &str, input_tokens: u64, output_tokens: u64) {
        for (kind, count) in [("input", input_tokens), ("output", output_tokens)] {
            let labels = token_labels(user, model, kind);
            self.llm_tokens.get_or_create(&labels).inc_by(count);
            self.inference_tokens.get_or_create(&labels).inc_by(count);
        }
    }

    ///
    /// Render the registry in text exposition format.
    ///
    /// # Returns
    ///  * The exposition body
    ///  * `ProxyError::Http` if encoding fails
    pub fn render(&self) -> Result<String> {
        let mut body = String::new();
        encode(&mut body, &self.registry)
            .map_err(|e| ProxyError::Http(format!("Failed to encode metrics: {}", e)))?;
        Ok(body)
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}
