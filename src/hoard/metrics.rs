//! Prometheus counters for allocator events
//!
//! Counters are process-wide and shared by every [`Hoard`](super::Hoard)
//! instance; `init_metrics` is idempotent.

use crate::error::Error;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref ALLOCATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hoard_allocations_total", "Successful allocations"),
        &["heap"]
    ).unwrap();

    pub static ref RELEASES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hoard_releases_total", "Successful releases"),
        &["heap"]
    ).unwrap();

    pub static ref SUPERBLOCKS_MINTED: IntCounter = IntCounter::new(
        "hoard_superblocks_minted_total",
        "Superblocks carved from the address space"
    ).unwrap();

    pub static ref SUPERBLOCKS_RECYCLED: IntCounter = IntCounter::new(
        "hoard_superblocks_recycled_total",
        "Superblocks taken from the global heap"
    ).unwrap();

    pub static ref HANDBACKS: IntCounter = IntCounter::new(
        "hoard_handbacks_total",
        "Superblocks returned to the global heap"
    ).unwrap();

    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hoard_errors_total", "Failed allocator calls"),
        &["kind"]
    ).unwrap();
}

/// Register allocator metrics
pub fn init_metrics() {
    let registered = [
        METRICS_REGISTRY.register(Box::new(ALLOCATIONS_TOTAL.clone())),
        METRICS_REGISTRY.register(Box::new(RELEASES_TOTAL.clone())),
        METRICS_REGISTRY.register(Box::new(SUPERBLOCKS_MINTED.clone())),
        METRICS_REGISTRY.register(Box::new(SUPERBLOCKS_RECYCLED.clone())),
        METRICS_REGISTRY.register(Box::new(HANDBACKS.clone())),
        METRICS_REGISTRY.register(Box::new(ERRORS_TOTAL.clone())),
    ];

    // Re-registration reports AlreadyReg; only the first call logs
    if registered.iter().all(|r| r.is_ok()) {
        info!("Allocator metrics registered");
    }
}

pub fn record_allocation(heap: usize) {
    let label = heap.to_string();
    ALLOCATIONS_TOTAL.with_label_values(&[label.as_str()]).inc();
}

pub fn record_release(heap: usize) {
    let label = heap.to_string();
    RELEASES_TOTAL.with_label_values(&[label.as_str()]).inc();
}

pub fn record_error(err: &Error) {
    ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}
