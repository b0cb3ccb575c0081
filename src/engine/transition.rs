//! The transition contract: graph and guard checks, then a write-ahead commit.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, error};

use super::Engine;
use crate::error::{Error, Result};
use crate::model::{Actor, Approval, Decision, LogEntry, State, Verdict, WorkItem};
use crate::telemetry::metrics;
use crate::telemetry::work::start_transition_span;

type Mutation = Box<dyn FnOnce(&mut WorkItem) + Send>;

/// Describes one mutation: its audit action, details, and any header edits
/// that ride along with the state change.
pub(crate) struct Change {
    action: String,
    details: Option<String>,
    failure: bool,
    mutate: Option<Mutation>,
}

impl Change {
    pub(crate) fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            details: None,
            failure: false,
            mutate: None,
        }
    }

    pub(crate) fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Record the entry with a failure result.
    pub(crate) fn failed(mut self) -> Self {
        self.failure = true;
        self
    }

    pub(crate) fn mutate(mut self, f: impl FnOnce(&mut WorkItem) + Send + 'static) -> Self {
        self.mutate = Some(Box::new(f));
        self
    }

    pub(crate) fn into_entry(self, actor: &Actor, default_details: String) -> (LogEntry, Option<Mutation>) {
        let mut entry = LogEntry::new(
            self.action,
            actor.clone(),
            self.details.unwrap_or(default_details),
        );
        if self.failure {
            entry = entry.failure();
        }
        (entry, self.mutate)
    }
}

impl Engine {
    /// Move `item` to `target`. The caller holds the item lock and passed in
    /// the freshly loaded record.
    ///
    /// Targeting the current state is a no-op success with no log entry.
    pub(crate) fn apply_transition(
        &self,
        item: WorkItem,
        target: State,
        actor: &Actor,
        change: Change,
        now: DateTime<Utc>,
    ) -> Result<WorkItem> {
        let from = item.state;
        if from == target {
            return Ok(item);
        }
        if item.unrecoverable {
            return Err(Error::Unrecoverable(item.id));
        }
        if !from.can_transition_to(target) {
            return Err(Error::InvalidTransition { from, to: target });
        }
        if target.is_decision() && !actor.is_human() {
            return Err(Error::HumanRequired(actor.to_string()));
        }
        if from == State::PendingApproval {
            let expired = item.approval.as_ref().is_none_or(|a| a.is_expired(now));
            if target.is_decision() && expired {
                return Err(Error::ApprovalExpired(item.id));
            }
            // Pending approvals only leave for the error queue by expiring.
            if target == State::ErrorQueue && !expired {
                return Err(Error::InvalidTransition { from, to: target });
            }
        }
        if from == State::NeedsAction && target == State::Done && item.requires_approval {
            return Err(Error::InvalidTransition { from, to: target });
        }

        let span = start_transition_span(item.id, from, target);
        let _entered = span.enter();

        let mut after = item;
        after.state = target;
        match target {
            State::PendingApproval => {
                after.approval = Some(Approval {
                    reason: self.gate.reason(
                        after.item_type,
                        &after.fields,
                        after.requires_approval,
                    ),
                    requested_at: now,
                    expires_at: now + self.gate.ttl,
                    decision: None,
                });
            }
            State::Approved | State::Rejected => {
                let verdict = if target == State::Approved {
                    Verdict::Approved
                } else {
                    Verdict::Rejected
                };
                if let Some(approval) = after.approval.as_mut() {
                    approval.decision = Some(Decision {
                        verdict,
                        decided_by: actor.to_string(),
                        decided_at: now,
                    });
                }
            }
            State::NeedsAction if from == State::ErrorQueue => {
                after.next_retry_at = None;
            }
            _ => {}
        }

        let (entry, mutate) = change.into_entry(actor, format!("{from} -> {target}"));
        if let Some(mutate) = mutate {
            mutate(&mut after);
        }
        let entry = entry.states(Some(from), target);
        let committed = self.commit(Some(from), after, entry)?;

        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", target.as_str()),
            ],
        );
        debug!(id = %committed.id, %from, to = %target, actor = %actor, "transition committed");
        Ok(committed)
    }

    /// Write-ahead commit: append the audit entry, then persist the item.
    ///
    /// `previous` is the state the item is currently persisted under, or None
    /// for a new item. If persisting fails after the entry was appended, a
    /// `commit_aborted` entry for the same revision voids it and the stored
    /// item is unchanged.
    pub(crate) fn commit(
        &self,
        previous: Option<State>,
        mut item: WorkItem,
        mut entry: LogEntry,
    ) -> Result<WorkItem> {
        item.revision += 1;
        item.updated_at = Utc::now();
        entry.item_id = Some(item.id);
        entry.revision = Some(item.revision);

        self.log.append(&entry)?;

        let stored = match previous {
            None => self.store.insert(&item),
            Some(prev) => self.store.put(&item, prev),
        };
        if let Err(e) = stored {
            let abort = LogEntry::aborted(
                entry.actor.clone(),
                item.id,
                item.revision,
                format!(
                    "{} at revision {} was not committed: {e}",
                    entry.action_type, item.revision
                ),
            );
            if let Err(log_err) = self.log.append(&abort) {
                error!(id = %item.id, error = %log_err, "failed to record aborted commit");
            }
            error!(id = %item.id, action = %entry.action_type, error = %e, "commit aborted");
            return Err(e);
        }
        Ok(item)
    }
}
