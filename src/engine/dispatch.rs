//! Dispatch: hand ready items to their execution backend and retire them.

use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{Instrument, error, info, warn};

use super::{Engine, transition::Change};
use crate::backend::BackendRegistry;
use crate::error::Result;
use crate::model::{Actor, Outcome, State, Verdict, WorkId, WorkItem};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_execution_span};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub completed: Vec<WorkId>,
    pub failed: Vec<WorkId>,
    pub skipped: Vec<WorkId>,
}

/// Approved, and by a human decision that approved it.
fn is_cleared(item: &WorkItem) -> bool {
    item.state == State::Approved
        && item
            .approval
            .as_ref()
            .and_then(|a| a.decision.as_ref())
            .is_some_and(|d| d.verdict == Verdict::Approved)
}

impl Engine {
    /// Execute every ready item: approved items, and non-sensitive items
    /// needing action whose type has a backend.
    pub async fn dispatch(&self, backends: &BackendRegistry) -> Result<DispatchReport> {
        let mut ready = self.list_by_state(Some(State::Approved))?;
        ready.extend(
            self.list_by_state(Some(State::NeedsAction))?
                .into_iter()
                .filter(|i| !i.requires_approval && backends.get(i.item_type).is_some()),
        );
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        let mut report = DispatchReport::default();
        for candidate in ready {
            let id = candidate.id;
            match self.execute_one(id, backends).await {
                Ok(Some(State::Done)) => report.completed.push(id),
                Ok(Some(_)) => report.failed.push(id),
                Ok(None) => report.skipped.push(id),
                Err(e) => {
                    error!(id = %id, error = %e, "dispatch failed");
                    report.failed.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Run one item under its lock. Returns the state it ended in, or None
    /// if it was no longer ready.
    async fn execute_one(&self, id: WorkId, backends: &BackendRegistry) -> Result<Option<State>> {
        let actor = Actor::system("dispatcher");
        let _guard = self.item_locks.lock(&id).await;
        let item = self.store.get(id)?;

        let ready = match item.state {
            State::Approved => true,
            State::NeedsAction => !item.requires_approval,
            _ => false,
        };
        if !ready || item.unrecoverable {
            return Ok(None);
        }
        if item.requires_approval && !is_cleared(&item) {
            warn!(id = %id, "sensitive item without an approving decision, not executing");
            return Ok(None);
        }

        let Some(backend) = backends.get(item.item_type).cloned() else {
            if item.state == State::Approved {
                let msg = format!("no execution backend registered for {}", item.item_type);
                let item = self.queue_for_retry_locked(item, &msg, &actor)?;
                return Ok(Some(item.state));
            }
            return Ok(None);
        };

        let span = start_execution_span(item.item_type, id, backend.name());
        let item_type = item.item_type;
        let from = item.state;
        let start = Instant::now();
        let result = backend.execute(&item).instrument(span.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        metrics::execution_duration_ms().record(
            duration_ms as f64,
            &[KeyValue::new("item_type", item_type.as_str())],
        );

        match result {
            Ok(data) => {
                record_state_transition(&span, from, State::Done);
                metrics::executions().add(
                    1,
                    &[
                        KeyValue::new("item_type", item_type.as_str()),
                        KeyValue::new("result", "success"),
                    ],
                );
                let outcome = Outcome {
                    backend: backend.name().to_string(),
                    data,
                    duration_ms,
                };
                let change = Change::new("execute")
                    .details(format!("{} succeeded in {duration_ms}ms", backend.name()))
                    .mutate(move |item| item.outcome = Some(outcome));
                let item = self.apply_transition(item, State::Done, &actor, change, Utc::now())?;
                info!(id = %id, backend = backend.name(), duration_ms, "execution completed");
                Ok(Some(item.state))
            }
            Err(e) => {
                record_state_transition(&span, from, State::ErrorQueue);
                metrics::executions().add(
                    1,
                    &[
                        KeyValue::new("item_type", item_type.as_str()),
                        KeyValue::new("result", "failure"),
                    ],
                );
                error!(id = %id, backend = backend.name(), error = %e, duration_ms, "execution failed");
                let item = self.queue_for_retry_locked(item, &e.to_string(), &actor)?;
                Ok(Some(item.state))
            }
        }
    }
}
