//! In-memory audit log for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use super::AuditLog;
use crate::error::{Error, Result};
use crate::model::LogEntry;

#[derive(Default)]
pub struct MemoryLog {
    partitions: Mutex<BTreeMap<NaiveDate, Vec<LogEntry>>>,
    /// When set, every append fails. Used to exercise write-ahead failures.
    fail_appends: std::sync::atomic::AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Every entry, oldest partition first.
    pub fn all(&self) -> Vec<LogEntry> {
        self.partitions
            .lock()
            .map(|p| p.values().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl AuditLog for MemoryLog {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        if self.fail_appends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Other("audit log unavailable".into()));
        }
        let mut partitions = self
            .partitions
            .lock()
            .map_err(|_| Error::Other("audit log lock poisoned".into()))?;
        partitions
            .entry(entry.timestamp.date_naive())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn partitions(&self) -> Result<Vec<NaiveDate>> {
        let partitions = self
            .partitions
            .lock()
            .map_err(|_| Error::Other("audit log lock poisoned".into()))?;
        Ok(partitions.keys().copied().collect())
    }

    fn read_partition(&self, day: NaiveDate) -> Result<Vec<LogEntry>> {
        let partitions = self
            .partitions
            .lock()
            .map_err(|_| Error::Other("audit log lock poisoned".into()))?;
        Ok(partitions.get(&day).cloned().unwrap_or_default())
    }
}
