//!
//! In-memory usage telemetry and the /stats snapshot.
//!
//! Keeps a bounded ring buffer of per-request usage records (FIFO eviction
//! at 1000 entries) plus aggregate counters. The snapshot is a best-effort
//! view: it is not linearizable with in-flight recordings. Records can
//! optionally be forwarded fire-and-forget to an external endpoint.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::TelemetryConfig;

/* --- types ----------------------------------------------------------------------------------- */

///
/// One request's usage record.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /** completion time */
    pub timestamp: DateTime<Utc>,
    /** endpoint path */
    pub endpoint: String,
    /** declared model name */
    pub model: String,
    /** hashed user label */
    pub user: String,
    /** prompt tokens */
    pub input_tokens: u64,
    /** completion tokens */
    pub output_tokens: u64,
    /** wall-clock duration in milliseconds */
    pub duration_ms: u64,
    /** terminal status: ok or error */
    pub status: String,
}

///
/// Telemetry store shared across request handlers.
pub struct TelemetryStore {
    /** whether records are kept at all */
    enabled: bool,
    /** optional external endpoint records are POSTed to */
    endpoint: Option<String>,
    /** client for endpoint forwarding */
    forward_client: reqwest::Client,
    /** ring buffer of recent records */
    records: Mutex<VecDeque<UsageRecord>>,
    /** total requests observed */
    total_requests: AtomicU64,
    /** total requests that ended in error */
    total_errors: AtomicU64,
    /** cumulative input tokens */
    total_input_tokens: AtomicU64,
    /** cumulative output tokens */
    total_output_tokens: AtomicU64,
    /** cumulative duration in milliseconds */
    total_duration_ms: AtomicU64,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Ring buffer capacity; oldest records are evicted first */
const RING_CAPACITY: usize = 1000;

/** Number of recent records included in the /stats snapshot */
const SNAPSHOT_RECENT: usize = 10;

/* --- start of code -------------------------------------------------------------------------- */

impl TelemetryStore {
    ///
    /// Create the store from configuration.
    ///
    /// # Arguments
    ///  * `config` - telemetry settings
    ///
    /// # Returns
    ///  * New telemetry store
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            endpoint: config.endpoint.clone(),
            forward_client: reqwest::Client::new(),
            records: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    ///
    /// Record one finished request.
    ///
    /// Updates the aggregates, appends to the ring buffer, and (when an
    /// endpoint is configured) spawns a fire-and-forget forward. Forwarding
    /// failures are logged at debug and never affect the request path.
    ///
    /// # Arguments
    ///  * `record` - the usage record
    pub fn record(&self, record: UsageRecord) {
        if !self.enabled {
            return;
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if record.status != "ok" {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_input_tokens.fetch_add(record.input_tokens, Ordering::Relaxed);
        self.total_output_tokens.fetch_add(record.output_tokens, Ordering::Relaxed);
        self.total_duration_ms.fetch_add(record.duration_ms, Ordering::Relaxed);

        if let Some(ref endpoint) = self.endpoint {
            let client = self.forward_client.clone();
            let endpoint = endpoint.clone();
            let payload = record.clone();
            tokio::spawn(async move {
                if let Err(e) = client.post(&endpoint).json(&payload).send().await {
                    tracing::debug!("Telemetry forward failed: {}", e);
                }
            });
        }

        if let Ok(mut records) = self.records.lock() {
            if records.len() == RING_CAPACITY {
                records.pop_front();
            }
            records.push_back(record);
        }
    }

    ///
    /// Snapshot for the /stats endpoint.
    ///
    /// # Returns
    ///  * Counts, totals, averages, and the last 10 usage records
    pub fn snapshot(&self) -> Value {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_input = self.total_input_tokens.load(Ordering::Relaxed);
        let total_output = self.total_output_tokens.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);

        let recent: Vec<UsageRecord> = self
            .records
            .lock()
            .map(|records| records.iter().rev().take(SNAPSHOT_RECENT).rev().cloned().collect())
            .unwrap_or_default();

        let averages = if total_requests > 0 {
            json!({
                "input_tokens": total_input / total_requests,
                "output_tokens": total_output / total_requests,
                "duration_ms": total_duration_ms / total_requests,
            })
        } else {
            json!({ "input_tokens": 0, "output_tokens": 0, "duration_ms": 0 })
        };

        json!({
            "enabled": self.enabled,
            "requests": {
                "total": total_requests,
                "errors": total_errors,
            },
            "tokens": {
                "input": total_input,
                "output": total_output,
            },
            "averages": averages,
            "recent": recent,
        })
    }
}
