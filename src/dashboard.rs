//! Dashboard Projector: read-only aggregation over the store and the log.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::audit::AuditLog;
use crate::error::Result;
use crate::model::{ItemType, LogEntry, LogResult, Priority, State, WorkId, WorkItem};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Every state is present, zero included.
    pub counts: BTreeMap<State, usize>,
    pub active_plans: usize,
    pub pending: Vec<PendingRow>,
    pub errors: Vec<ErrorRow>,
    pub recent: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct PendingRow {
    pub id: WorkId,
    pub item_type: ItemType,
    pub priority: Priority,
    pub summary: String,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ErrorRow {
    pub id: WorkId,
    pub item_type: ItemType,
    pub summary: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub unrecoverable: bool,
}

/// Build a snapshot. Never mutates the store or the log.
pub fn project(
    store: &dyn Store,
    log: &dyn AuditLog,
    recent: usize,
    now: DateTime<Utc>,
) -> Result<DashboardSnapshot> {
    let mut items = store.list(None)?;
    items.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
    });

    let mut counts: BTreeMap<State, usize> = State::ALL.iter().map(|&s| (s, 0)).collect();
    for item in &items {
        *counts.entry(item.state).or_default() += 1;
    }

    let active_plans = items
        .iter()
        .filter(|i| i.item_type == ItemType::Plan && i.state == State::NeedsAction)
        .count();

    let pending = items
        .iter()
        .filter(|i| i.state == State::PendingApproval)
        .map(|i| PendingRow {
            id: i.id,
            item_type: i.item_type,
            priority: i.priority,
            summary: i.summary(),
            reason: i.approval.as_ref().and_then(|a| a.reason.clone()),
            expires_at: i.approval.as_ref().map(|a| a.expires_at),
        })
        .collect();

    let errors = items
        .iter()
        .filter(|i| i.state == State::ErrorQueue)
        .map(error_row)
        .collect();

    Ok(DashboardSnapshot {
        generated_at: now,
        counts,
        active_plans,
        pending,
        errors,
        recent: log.recent(recent)?,
    })
}

fn error_row(item: &WorkItem) -> ErrorRow {
    ErrorRow {
        id: item.id,
        item_type: item.item_type,
        summary: item.summary(),
        retry_count: item.retry_count,
        last_error: item.last_error.clone(),
        unrecoverable: item.unrecoverable,
    }
}

impl DashboardSnapshot {
    pub fn count(&self, state: State) -> usize {
        self.counts.get(&state).copied().unwrap_or_default()
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Dashboard\n");
        let _ = writeln!(
            out,
            "*Updated {}*\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        out.push_str("## Status\n\n| State | Items |\n|---|---|\n");
        for (state, count) in &self.counts {
            let _ = writeln!(out, "| {state} | {count} |");
        }
        let _ = writeln!(out, "\nActive plans: {}\n", self.active_plans);

        out.push_str("## Pending Approval\n\n");
        if self.pending.is_empty() {
            out.push_str("Nothing awaiting approval.\n\n");
        } else {
            out.push_str("| Id | Type | Priority | Summary | Reason | Expires |\n|---|---|---|---|---|---|\n");
            for row in &self.pending {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} |",
                    row.id,
                    row.item_type,
                    row.priority,
                    cell(&row.summary),
                    row.reason.as_deref().unwrap_or("-"),
                    row.expires_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
            out.push('\n');
        }

        out.push_str("## Error Queue\n\n");
        if self.errors.is_empty() {
            out.push_str("No failed items.\n\n");
        } else {
            out.push_str("| Id | Type | Summary | Retries | Last error | Status |\n|---|---|---|---|---|---|\n");
            for row in &self.errors {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} |",
                    row.id,
                    row.item_type,
                    cell(&row.summary),
                    row.retry_count,
                    cell(row.last_error.as_deref().unwrap_or("-")),
                    if row.unrecoverable { "unrecoverable" } else { "retryable" },
                );
            }
            out.push('\n');
        }

        out.push_str("## Recent Activity\n\n");
        if self.recent.is_empty() {
            out.push_str("No activity yet.\n");
        }
        for entry in self.recent.iter().rev() {
            let mark = match entry.result {
                LogResult::Success => "",
                LogResult::Failure => " **failed**",
            };
            let item = entry
                .item_id
                .map(|id| format!(" `{id}`"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "- {} {}{item} by {}: {}{mark}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.action_type,
                entry.actor,
                cell(&entry.details),
            );
        }
        out
    }
}

/// Keep table cells on one line.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
