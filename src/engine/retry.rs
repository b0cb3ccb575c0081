//! Retry / Error Queue: bounded retries with exponential backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{info, warn};

use super::{Engine, transition::Change};
use crate::error::{Error, Result};
use crate::model::{Actor, LogEntry, State, WorkId, WorkItem};
use crate::telemetry::metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures allowed before an item needs a human.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the automatic retry following failure number `attempt`
    /// (1-based): `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

/// Where an error queue entry stands with respect to automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "until", rename_all = "snake_case")]
pub enum Eligibility {
    /// The sweep will retry it on its next run.
    Due,
    /// Backing off until the given time.
    Waiting(DateTime<Utc>),
    /// No automatic retry scheduled; a human must retry it.
    Manual,
    /// Retry budget spent; the sweep will mark it unrecoverable.
    Exhausted,
    /// Terminal. Only resubmission moves on.
    Unrecoverable,
}

#[derive(Debug, Clone)]
pub struct ErrorQueueEntry {
    pub item: WorkItem,
    pub eligibility: Eligibility,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    pub retried: Vec<WorkId>,
    pub exhausted: Vec<WorkId>,
}

impl Engine {
    /// Record an execution failure and move the item to the error queue.
    pub async fn queue_for_retry(&self, id: WorkId, error: &str, actor: &Actor) -> Result<WorkItem> {
        let _guard = self.item_locks.lock(&id).await;
        let item = self.store.get(id)?;
        self.queue_for_retry_locked(item, error, actor)
    }

    /// Caller holds the item lock.
    pub(crate) fn queue_for_retry_locked(
        &self,
        item: WorkItem,
        error: &str,
        actor: &Actor,
    ) -> Result<WorkItem> {
        if !matches!(item.state, State::NeedsAction | State::Approved) {
            return Err(Error::InvalidTransition {
                from: item.state,
                to: State::ErrorQueue,
            });
        }

        let now = Utc::now();
        let attempt = item.retry_count + 1;
        let next_retry_at = if self.retry.is_exhausted(attempt) {
            None
        } else {
            chrono::Duration::from_std(self.retry.backoff(attempt))
                .ok()
                .map(|d| now + d)
        };
        let error = error.to_string();
        let change = Change::new("queue_for_retry")
            .details(format!("attempt {attempt} failed: {error}"))
            .failed()
            .mutate(move |item| {
                item.retry_count = attempt;
                item.last_error = Some(error);
                item.next_retry_at = next_retry_at;
            });
        let item = self.apply_transition(item, State::ErrorQueue, actor, change, now)?;
        warn!(
            id = %item.id,
            retry_count = item.retry_count,
            next_retry_at = ?item.next_retry_at,
            error = item.last_error.as_deref().unwrap_or(""),
            "queued for retry"
        );
        Ok(item)
    }

    /// Error queue contents with their retry eligibility.
    pub fn list_error_queue(&self, now: DateTime<Utc>) -> Result<Vec<ErrorQueueEntry>> {
        Ok(self
            .list_by_state(Some(State::ErrorQueue))?
            .into_iter()
            .map(|item| ErrorQueueEntry {
                eligibility: self.eligibility(&item, now),
                item,
            })
            .collect())
    }

    fn eligibility(&self, item: &WorkItem, now: DateTime<Utc>) -> Eligibility {
        if item.unrecoverable {
            Eligibility::Unrecoverable
        } else if self.retry.is_exhausted(item.retry_count) {
            Eligibility::Exhausted
        } else {
            match item.next_retry_at {
                None => Eligibility::Manual,
                Some(at) if at <= now => Eligibility::Due,
                Some(at) => Eligibility::Waiting(at),
            }
        }
    }

    /// Move an error queue item back to `Needs_Action`. Sensitive items are
    /// routed straight into a fresh approval round.
    pub async fn retry_failed_action(&self, id: WorkId, actor: &Actor) -> Result<WorkItem> {
        let _guard = self.item_locks.lock(&id).await;
        let item = self.store.get(id)?;
        if item.unrecoverable {
            return Err(Error::Unrecoverable(id));
        }
        if item.state != State::ErrorQueue {
            return Err(Error::InvalidTransition {
                from: item.state,
                to: State::NeedsAction,
            });
        }

        let attempt = item.retry_count + 1;
        let mut item = self.apply_transition(
            item,
            State::NeedsAction,
            actor,
            Change::new("retry").details(format!("attempt {attempt} scheduled")),
            Utc::now(),
        )?;
        if item.requires_approval {
            item = self.request_approval(item, actor)?;
        }

        let mode = if actor.is_human() { "manual" } else { "automatic" };
        metrics::retries().add(1, &[KeyValue::new("mode", mode)]);
        info!(id = %id, state = %item.state, mode, "retrying failed action");
        Ok(item)
    }

    /// Mark an error queue item as needing human intervention. Idempotent.
    pub async fn mark_unrecoverable(&self, id: WorkId, actor: &Actor) -> Result<WorkItem> {
        let _guard = self.item_locks.lock(&id).await;
        let item = self.store.get(id)?;
        if item.unrecoverable {
            return Ok(item);
        }
        if item.state != State::ErrorQueue {
            return Err(Error::InvalidTransition {
                from: item.state,
                to: State::ErrorQueue,
            });
        }

        let entry = LogEntry::new(
            "mark_unrecoverable",
            actor.clone(),
            format!("gave up after {} attempts", item.retry_count),
        )
        .states(Some(State::ErrorQueue), State::ErrorQueue);
        let mut after = item;
        after.unrecoverable = true;
        after.next_retry_at = None;
        let item = self.commit(Some(State::ErrorQueue), after, entry)?;
        warn!(id = %id, retry_count = item.retry_count, "marked unrecoverable");
        Ok(item)
    }

    /// Retry sweep: retry due items, give up on exhausted ones.
    pub async fn retry_due(&self, now: DateTime<Utc>) -> Result<RetryReport> {
        let actor = Actor::system("retry_sweep");
        let mut report = RetryReport::default();
        for entry in self.list_error_queue(now)? {
            let id = entry.item.id;
            let outcome = match entry.eligibility {
                Eligibility::Due => self
                    .retry_failed_action(id, &actor)
                    .await
                    .map(|_| report.retried.push(id)),
                Eligibility::Exhausted => self
                    .mark_unrecoverable(id, &actor)
                    .await
                    .map(|_| report.exhausted.push(id)),
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                warn!(id = %id, error = %e, "retry sweep skipped item");
            }
        }
        Ok(report)
    }
}
