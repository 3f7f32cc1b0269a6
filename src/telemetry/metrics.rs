//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"kennel"` meter.

use opentelemetry::metrics::{Counter, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("kennel")
}

/// Counter: orchestrator log lines pumped.
pub fn log_lines() -> Counter<u64> {
    meter()
        .u64_counter("kennel.log.lines")
        .with_description("Orchestrator log lines read")
        .build()
}

/// Counter: classified log events.
/// Labels: `kind`.
pub fn log_events() -> Counter<u64> {
    meter()
        .u64_counter("kennel.log.events")
        .with_description("Log lines classified into events")
        .build()
}

/// Counter: remote calls that failed after retries.
/// Labels: `operation` ("status" | "cancel" | "delete_instance" | "fetch" | "persist").
pub fn remote_failures() -> Counter<u64> {
    meter()
        .u64_counter("kennel.remote.failures")
        .with_description("Remote calls that failed and were degraded")
        .build()
}

/// Counter: cost estimates produced.
/// Labels: `path` ("fast" | "slow" | "cached" | "failed").
pub fn cost_estimates() -> Counter<u64> {
    meter()
        .u64_counter("kennel.cost.estimates")
        .with_description("Submission cost estimates by computation path")
        .build()
}
