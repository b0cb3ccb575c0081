//! Audit Logger: append-only, day-partitioned record of every mutation.
//!
//! Entries are immutable. Readers only ever scan partitions forward, oldest
//! partition first.

pub mod journal;
pub mod memory;

pub use journal::JournalLog;
pub use memory::MemoryLog;

use chrono::NaiveDate;

use crate::error::Result;
use crate::model::log::committed;
use crate::model::{LogEntry, WorkId};

/// Durable, append-only audit sink.
///
/// `append` must be atomic with respect to concurrent appends and must not
/// return before the entry is durable.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: &LogEntry) -> Result<()>;

    /// Known partitions, oldest first.
    fn partitions(&self) -> Result<Vec<NaiveDate>>;

    /// Entries of one partition in append order.
    fn read_partition(&self, day: NaiveDate) -> Result<Vec<LogEntry>>;

    /// The most recent `n` entries, oldest first.
    fn recent(&self, n: usize) -> Result<Vec<LogEntry>> {
        let mut out = Vec::new();
        for day in self.partitions()?.into_iter().rev() {
            if out.len() >= n {
                break;
            }
            let mut entries = self.read_partition(day)?;
            let take = (n - out.len()).min(entries.len());
            let mut tail = entries.split_off(entries.len() - take);
            tail.append(&mut out);
            out = tail;
        }
        Ok(out)
    }

    /// Every entry referencing `id`, in append order.
    fn entries_for(&self, id: WorkId) -> Result<Vec<LogEntry>> {
        let mut out = Vec::new();
        for day in self.partitions()? {
            out.extend(
                self.read_partition(day)?
                    .into_iter()
                    .filter(|e| e.item_id == Some(id)),
            );
        }
        Ok(out)
    }

    /// The entries for `id` whose mutation was persisted: aborted write-ahead
    /// entries and their markers are left out. Its length equals the item's
    /// revision.
    fn committed_for(&self, id: WorkId) -> Result<Vec<LogEntry>> {
        Ok(committed(self.entries_for(id)?))
    }
}
