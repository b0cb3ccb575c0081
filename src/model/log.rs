//! Audit log entries and the actors that cause them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::work::{State, WorkId};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Who caused a mutation. Serialized as `kind:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Actor {
    pub kind: ActorKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Human,
    System,
    Watcher,
}

impl Actor {
    pub fn human(name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Human,
            name: name.into(),
        }
    }

    pub fn system(name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::System,
            name: name.into(),
        }
    }

    pub fn watcher(name: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Watcher,
            name: name.into(),
        }
    }

    pub fn is_human(&self) -> bool {
        self.kind == ActorKind::Human
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ActorKind::Human => "human",
            ActorKind::System => "system",
            ActorKind::Watcher => "watcher",
        };
        write!(f, "{kind}:{}", self.name)
    }
}

impl FromStr for Actor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| Error::Validation(format!("actor must be kind:name, got {s:?}")))?;
        if name.is_empty() {
            return Err(Error::Validation(format!("actor name is empty in {s:?}")));
        }
        let kind = match kind {
            "human" => ActorKind::Human,
            "system" => ActorKind::System,
            "watcher" => ActorKind::Watcher,
            other => return Err(Error::Validation(format!("unknown actor kind: {other}"))),
        };
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.to_string()
    }
}

impl TryFrom<String> for Actor {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogResult {
    Success,
    Failure,
}

/// Immutable audit record. Item-scoped entries carry `item_id` and the
/// revision they committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub actor: Actor,
    pub details: String,
    pub result: LogResult,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<WorkId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<State>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl LogEntry {
    pub fn new(action_type: impl Into<String>, actor: Actor, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action_type: action_type.into(),
            actor,
            details: details.into(),
            result: LogResult::Success,
            item_id: None,
            from: None,
            to: None,
            revision: None,
        }
    }

    pub fn failure(mut self) -> Self {
        self.result = LogResult::Failure;
        self
    }

    pub fn states(mut self, from: Option<State>, to: State) -> Self {
        self.from = from;
        self.to = Some(to);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Marks the write-ahead entry for `revision` of `id` as never committed.
    pub fn aborted(actor: Actor, id: WorkId, revision: u64, details: impl Into<String>) -> Self {
        let mut entry = Self::new(COMMIT_ABORTED, actor, details).failure();
        entry.item_id = Some(id);
        entry.revision = Some(revision);
        entry
    }

    /// Does this entry void an earlier write-ahead entry?
    pub fn is_abort(&self) -> bool {
        self.action_type == COMMIT_ABORTED && self.item_id.is_some() && self.revision.is_some()
    }

    /// Does this entry record a mutation of an item? Only entries that
    /// survive [`committed`] were actually persisted.
    pub fn is_commit(&self) -> bool {
        self.item_id.is_some() && self.revision.is_some() && !self.is_abort()
    }
}

pub const COMMIT_ABORTED: &str = "commit_aborted";

/// Drop abort markers and the write-ahead entries they void, keeping append
/// order. Each marker voids the earliest unvoided commit of its item and
/// revision seen before it.
pub fn committed(entries: impl IntoIterator<Item = LogEntry>) -> Vec<LogEntry> {
    let mut out: Vec<Option<LogEntry>> = Vec::new();
    for entry in entries {
        if entry.is_abort() {
            let voided = out.iter().position(|e| {
                e.as_ref().is_some_and(|e| {
                    e.is_commit() && e.item_id == entry.item_id && e.revision == entry.revision
                })
            });
            if let Some(i) = voided {
                out[i] = None;
            }
        } else if entry.is_commit() {
            out.push(Some(entry));
        }
    }
    out.into_iter().flatten().collect()
}
