//! Metric instrument factories for deputy.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"deputy"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for deputy instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("deputy")
}

/// Counter: number of work items submitted.
/// Labels: `item_type`, `result` ("created" | "duplicate" | "invalid").
pub fn items_created() -> Counter<u64> {
    meter()
        .u64_counter("deputy.items.created")
        .with_description("Number of work item creation requests")
        .build()
}

/// Counter: work item state transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("deputy.items.state_transitions")
        .with_description("Number of work item state transitions")
        .build()
}

/// Counter: human approval decisions.
/// Labels: `verdict` ("approved" | "rejected" | "expired").
pub fn approval_decisions() -> Counter<u64> {
    meter()
        .u64_counter("deputy.approvals.decisions")
        .with_description("Number of approval decisions")
        .build()
}

/// Counter: backend executions.
/// Labels: `item_type`, `result` ("success" | "failure").
pub fn executions() -> Counter<u64> {
    meter()
        .u64_counter("deputy.executions")
        .with_description("Number of execution backend invocations")
        .build()
}

/// Counter: items moved out of the error queue for another attempt.
/// Labels: `mode` ("automatic" | "manual").
pub fn retries() -> Counter<u64> {
    meter()
        .u64_counter("deputy.retries")
        .with_description("Number of retried work items")
        .build()
}

/// Counter: scheduler job runs.
/// Labels: `job`, `result` ("ok" | "error" | "panic").
pub fn job_runs() -> Counter<u64> {
    meter()
        .u64_counter("deputy.scheduler.job_runs")
        .with_description("Number of scheduler job runs")
        .build()
}

/// Histogram: execution duration in milliseconds.
/// Labels: `item_type`.
pub fn execution_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("deputy.execution.duration_ms")
        .with_description("Execution backend duration in milliseconds")
        .with_unit("ms")
        .build()
}
