//! Prometheus metrics for the scraper
//!
//! This module provides metrics tracking for:
//! - Fetch: getEntities requests by outcome, tiles marked successful
//! - Scheduler: iteration duration, failure-cycle strikes, tiles still needed
//! - Persistence: portals upserted, dropped batches
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Metrics Storage
// ============================================================================

struct ScraperMetrics {
    fetches: CounterVec,
    tiles_succeeded: Counter,
    strikes: Counter,
    needed_tiles: Gauge,
    iteration_duration: Histogram,
    portals_upserted: Counter,
    persist_failures: Counter,
    details_updated: CounterVec,
}

static SCRAPER_METRICS: OnceLock<ScraperMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails, subsequent metric
/// operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = intelwatcher::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = ScraperMetrics {
        fetches: register_counter_vec!(
            "intelwatcher_fetches_total",
            "getEntities requests by outcome",
            &["outcome"]
        )?,
        tiles_succeeded: register_counter!(
            "intelwatcher_tiles_succeeded_total",
            "Tiles marked successful"
        )?,
        strikes: register_counter!(
            "intelwatcher_failure_cycles_total",
            "Failure-cycle strikes recorded during reconciliation"
        )?,
        needed_tiles: register_gauge!(
            "intelwatcher_needed_tiles",
            "Tiles neither successful nor exhausted"
        )?,
        iteration_duration: register_histogram!(
            "intelwatcher_iteration_duration_seconds",
            "Duration of one scheduler iteration, cooldown excluded",
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        portals_upserted: register_counter!(
            "intelwatcher_portals_upserted_total",
            "Portal records handed to the store"
        )?,
        persist_failures: register_counter!(
            "intelwatcher_persist_failures_total",
            "Portal batches dropped because the store failed"
        )?,
        details_updated: register_counter_vec!(
            "intelwatcher_details_total",
            "Portal detail lookups by outcome",
            &["outcome"]
        )?,
    };

    SCRAPER_METRICS
        .set(metrics)
        .map_err(|_| "Scraper metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCRAPER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one getEntities request outcome (`ok`, `payload_error`, `transport_error`)
pub fn record_fetch(outcome: &str) {
    if let Some(m) = SCRAPER_METRICS.get() {
        m.fetches.with_label_values(&[outcome]).inc();
    }
}

pub fn record_tiles_succeeded(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCRAPER_METRICS.get() {
        m.tiles_succeeded.inc_by(count as f64);
    }
}

pub fn record_strikes(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCRAPER_METRICS.get() {
        m.strikes.inc_by(count as f64);
    }
}

pub fn set_needed_tiles(count: usize) {
    if let Some(m) = SCRAPER_METRICS.get() {
        m.needed_tiles.set(count as f64);
    }
}

pub fn record_iteration(duration: Duration) {
    if let Some(m) = SCRAPER_METRICS.get() {
        m.iteration_duration.observe(duration.as_secs_f64());
    }
}

pub fn record_portals_upserted(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCRAPER_METRICS.get() {
        m.portals_upserted.inc_by(count as f64);
    }
}

pub fn record_persist_failure() {
    if let Some(m) = SCRAPER_METRICS.get() {
        m.persist_failures.inc();
    }
}

/// Record a portal detail lookup (`updated` or `failed`)
pub fn record_detail(outcome: &str) {
    if let Some(m) = SCRAPER_METRICS.get() {
        m.details_updated.with_label_values(&[outcome]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
