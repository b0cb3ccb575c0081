//! File-backed audit log: one JSON-lines file per UTC day.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::warn;

use super::AuditLog;
use crate::error::{Error, Result};
use crate::model::LogEntry;

const PARTITION_FORMAT: &str = "%Y-%m-%d";

/// Journal rooted at `<dir>/YYYY-MM-DD.json`.
pub struct JournalLog {
    dir: PathBuf,
    writer: Mutex<()>,
}

impl JournalLog {
    /// Open (creating if needed) the journal directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writer: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn partition_path(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.json", day.format(PARTITION_FORMAT)))
    }
}

impl AuditLog for JournalLog {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self
            .writer
            .lock()
            .map_err(|_| Error::Other("audit writer lock poisoned".into()))?;
        let path = self.partition_path(entry.timestamp.date_naive());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn partitions(&self) -> Result<Vec<NaiveDate>> {
        let mut days = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(day) = NaiveDate::parse_from_str(stem, PARTITION_FORMAT) {
                days.push(day);
            }
        }
        days.sort();
        Ok(days)
    }

    fn read_partition(&self, day: NaiveDate) -> Result<Vec<LogEntry>> {
        let path = self.partition_path(day);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    partition = %day,
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed audit entry"
                ),
            }
        }
        Ok(entries)
    }
}
