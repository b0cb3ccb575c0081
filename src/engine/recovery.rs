//! Reconciliation of physical location and the audit log against committed
//! state.
//!
//! A document's folder is the physical truth. After a crash between the
//! header rewrite and the move, or after someone moves documents by hand, the
//! two disagree. Recovery brings the header in line with the folder and logs a
//! reconciliation entry for each mismatch, with two exceptions:
//!
//! * A pending item found in `Approved/` or `Rejected/` is a human decision
//!   made in the vault. It goes through the normal decision checks.
//! * Any other arrival in `Approved/` or `Rejected/` did not pass the approval
//!   gate. The document is moved back and a failure entry is written.
//!
//! Recovery also voids write-ahead entries that were logged but never
//! persisted (a crash between append and store commit), and finishes triage
//! for items whose creation stopped in `Intake` or before the approval gate.
//! A failure on one item is logged and the pass moves on.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use super::{Engine, needs_triage, transition::Change};
use crate::error::{Error, Result};
use crate::model::log::committed;
use crate::model::{Actor, Approval, LogEntry, State, WorkId};
use crate::store::Located;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    /// Header rewritten to match the folder.
    pub reconciled: Vec<WorkId>,
    /// Decisions taken by moving documents in the vault.
    pub decisions: Vec<WorkId>,
    /// Moves that bypassed the approval gate and were undone.
    pub refused: Vec<WorkId>,
    /// Items with logged revisions that never reached the store.
    pub voided: Vec<WorkId>,
    /// Items whose interrupted triage was completed.
    pub resumed: Vec<WorkId>,
    /// Items recovery could not settle this pass.
    pub failed: Vec<WorkId>,
}

impl RecoveryReport {
    fn changed(&self) -> bool {
        !(self.reconciled.is_empty()
            && self.decisions.is_empty()
            && self.refused.is_empty()
            && self.voided.is_empty()
            && self.resumed.is_empty()
            && self.failed.is_empty())
    }
}

impl Engine {
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let located = self.store.scan()?;
        let mut report = RecoveryReport {
            scanned: located.len(),
            ..Default::default()
        };

        self.void_unpersisted(&mut report).await?;

        for found in located.iter().filter(|l| l.is_mismatched()) {
            let id = found.item.id;
            let _guard = self.item_locks.lock(&id).await;
            // Re-read under the lock; the mismatch may have been resolved.
            let current = match self.store.find(id) {
                Ok(Some(current)) if current.is_mismatched() => current,
                Ok(_) => continue,
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to re-read document");
                    report.failed.push(id);
                    continue;
                }
            };
            if let Err(e) = self.reconcile(current, &mut report) {
                warn!(id = %id, error = %e, "reconciliation failed");
                report.failed.push(id);
            }
        }

        let stalled = located.iter().filter(|l| {
            l.location == State::Intake
                || (l.location == State::NeedsAction && l.item.requires_approval)
        });
        for found in stalled {
            let id = found.item.id;
            let _guard = self.item_locks.lock(&id).await;
            let outcome = self.store.get(id).and_then(|item| {
                if needs_triage(&item) {
                    self.finish_triage(item).map(Some)
                } else {
                    Ok(None)
                }
            });
            match outcome {
                Ok(Some(item)) => {
                    info!(id = %id, state = %item.state, "resumed interrupted triage");
                    report.resumed.push(id);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to resume triage");
                    report.failed.push(id);
                }
            }
        }

        if report.changed() {
            info!(
                scanned = report.scanned,
                reconciled = report.reconciled.len(),
                decisions = report.decisions.len(),
                refused = report.refused.len(),
                voided = report.voided.len(),
                resumed = report.resumed.len(),
                failed = report.failed.len(),
                "recovery complete"
            );
        }
        Ok(report)
    }

    /// Append `commit_aborted` for every logged revision the store never
    /// received, so each item's committed entries match its revision again.
    async fn void_unpersisted(&self, report: &mut RecoveryReport) -> Result<()> {
        let mut logged: HashMap<WorkId, Vec<LogEntry>> = HashMap::new();
        for day in self.log.partitions()? {
            for entry in self.log.read_partition(day)? {
                if let Some(id) = entry.item_id {
                    logged.entry(id).or_default().push(entry);
                }
            }
        }

        for (id, entries) in logged {
            let Ok(stored) = self.store.get(id) else {
                continue;
            };
            if unpersisted(&committed(entries), stored.revision).is_empty() {
                continue;
            }

            let _guard = self.item_locks.lock(&id).await;
            let revisions = match self.store.get(id).and_then(|item| {
                Ok(unpersisted(&self.log.committed_for(id)?, item.revision))
            }) {
                Ok(revisions) => revisions,
                Err(Error::NotFound(_)) => continue,
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to compare log and store");
                    report.failed.push(id);
                    continue;
                }
            };
            if revisions.is_empty() {
                continue;
            }
            for revision in &revisions {
                let abort = LogEntry::aborted(
                    Actor::system("recovery"),
                    id,
                    *revision,
                    format!("revision {revision} was logged but never persisted"),
                );
                self.log.append(&abort)?;
            }
            warn!(id = %id, revisions = ?revisions, "voided unpersisted revisions");
            report.voided.push(id);
        }
        Ok(())
    }

    /// Caller holds the item lock.
    fn reconcile(&self, found: Located, report: &mut RecoveryReport) -> Result<()> {
        let Located { item, location } = found;
        let id = item.id;
        let header = item.state;

        if location.is_decision() {
            if header == State::PendingApproval {
                let vault = Actor::human("vault");
                let change = Change::new("reconcile_decision")
                    .details(format!("document moved to {location} in the vault"));
                match self.apply_transition(item.clone(), location, &vault, change, Utc::now()) {
                    Ok(_) => {
                        info!(id = %id, decision = %location, "vault decision recorded");
                        report.decisions.push(id);
                        return Ok(());
                    }
                    Err(e) => warn!(id = %id, error = %e, "vault decision refused"),
                }
            }

            // Undo the move: persist the header state from where it was found.
            let entry = LogEntry::new(
                "reconcile_refused",
                Actor::system("recovery"),
                format!("document found in {location} without a decision; moved back to {header}"),
            )
            .failure()
            .states(Some(location), header);
            self.commit(Some(location), item, entry)?;
            warn!(id = %id, found = %location, restored = %header, "refused move into decision folder");
            report.refused.push(id);
            return Ok(());
        }

        let now = Utc::now();
        let entry = LogEntry::new(
            "reconcile",
            Actor::system("recovery"),
            format!("header said {header}, document found in {location}"),
        )
        .states(Some(header), location);
        let mut after = item;
        after.state = location;
        if location == State::PendingApproval
            && after.approval.as_ref().is_none_or(|a| a.decision.is_some())
        {
            after.approval = Some(Approval {
                reason: self
                    .gate
                    .reason(after.item_type, &after.fields, after.requires_approval),
                requested_at: now,
                expires_at: now + self.gate.ttl,
                decision: None,
            });
        }
        let item = self.commit(Some(location), after, entry)?;
        info!(id = %id, from = %header, to = %location, "reconciled");
        report.reconciled.push(id);

        // A sensitive item dropped back into Needs_Action must not bypass the gate.
        if item.state == State::NeedsAction && item.requires_approval {
            self.request_approval(item, &Actor::system("recovery"))?;
        }
        Ok(())
    }
}

/// Revisions in `committed` the store never received: anything past the
/// stored revision, plus all but the last entry of a revision logged twice.
fn unpersisted(committed: &[LogEntry], stored: u64) -> Vec<u64> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for revision in committed.iter().filter_map(|e| e.revision) {
        *counts.entry(revision).or_default() += 1;
    }
    let mut out: Vec<u64> = counts
        .into_iter()
        .flat_map(|(revision, n)| {
            let keep = usize::from(revision <= stored);
            std::iter::repeat_n(revision, n - keep)
        })
        .collect();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(revision: u64) -> LogEntry {
        let mut entry = LogEntry::new("transition", Actor::system("test"), "");
        entry.item_id = Some(WorkId::new());
        entry.revision = Some(revision);
        entry
    }

    #[test]
    fn revisions_past_the_store_are_unpersisted() {
        let logged = [at(1), at(2), at(3)];
        assert_eq!(unpersisted(&logged, 3), Vec::<u64>::new());
        assert_eq!(unpersisted(&logged, 1), vec![2, 3]);
    }

    #[test]
    fn a_reused_revision_keeps_only_its_last_entry() {
        let logged = [at(1), at(2), at(2), at(3)];
        assert_eq!(unpersisted(&logged, 3), vec![2]);
    }
}
