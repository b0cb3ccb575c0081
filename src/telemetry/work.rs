//! Work item span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! flowing through the engine and for scheduler job runs.

use tracing::Span;

use crate::model::{ItemType, State, WorkId};

/// Start a span for one state transition of an item.
pub fn start_transition_span(id: WorkId, from: State, to: State) -> Span {
    tracing::debug_span!(
        "work.transition",
        "work.id" = %id.0,
        "work.from" = %from,
        "work.to" = %to,
    )
}

/// Start a span for backend execution of an item.
///
/// The `work.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_execution_span(item_type: ItemType, id: WorkId, backend: &str) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.type" = %item_type,
        "work.id" = %id.0,
        "work.backend" = backend,
        "work.state" = tracing::field::Empty,
    )
}

/// Start a span for one run of a scheduler job.
pub fn start_job_span(job: &str) -> Span {
    tracing::info_span!("scheduler.job", "job.name" = job)
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: State, to: State) {
    span.record("work.state", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
