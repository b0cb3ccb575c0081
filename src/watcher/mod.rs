//! Watcher Interface: producers that turn external events into work items.
//!
//! Watchers only see the engine's create operation. Transient failures inside
//! `poll` are returned to the scheduler, which tries again on the next tick.

pub mod drop_folder;

pub use drop_folder::DropFolderWatcher;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::engine::{CreateResult, Engine};
use crate::error::{Error, Result};
use crate::model::{Actor, LogEntry, NewWorkItem};

#[async_trait]
pub trait Watcher: Send + Sync {
    fn name(&self) -> &str;

    /// Observe the source once and return what it has to offer. Repeats are
    /// fine; the engine deduplicates by fingerprint.
    async fn poll(&self) -> Result<Vec<NewWorkItem>>;
}

/// Counts from one ingest pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub created: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Poll `watcher` once and submit everything it found.
///
/// Invalid submissions are audit-logged and skipped; the rest of the batch
/// still goes through. Store errors abort the pass.
pub async fn ingest(engine: &Engine, watcher: &dyn Watcher) -> Result<IngestReport> {
    let batch = watcher.poll().await?;
    let mut report = IngestReport::default();

    for new in batch {
        let item_type = new.item_type();
        let external_id = new.source().external_id.clone().unwrap_or_default();
        match engine.create_item(new).await {
            Ok(CreateResult::Created(item)) => {
                debug!(watcher = watcher.name(), id = %item.id, "ingested");
                report.created += 1;
            }
            Ok(CreateResult::Duplicate(_)) => report.duplicates += 1,
            Err(Error::Validation(msg)) => {
                warn!(watcher = watcher.name(), %external_id, error = %msg, "rejected submission");
                report.rejected += 1;
                engine.append_log(
                    LogEntry::new(
                        "submission_rejected",
                        Actor::watcher(watcher.name()),
                        format!("{item_type} {external_id:?}: {msg}"),
                    )
                    .failure(),
                )?;
            }
            Err(e) => return Err(e),
        }
    }

    if report.created > 0 || report.rejected > 0 {
        info!(
            watcher = watcher.name(),
            created = report.created,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "ingest pass"
        );
    }
    Ok(report)
}
