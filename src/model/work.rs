//! Work items: identity, type, lifecycle state, and the intake builder.
//!
//! A work item is one external event that needs processing. It has identity
//! (id + fingerprint), provenance (which watcher saw it), priority, a
//! structured header, an opaque body, and lifecycle state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::Plan;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of intake tracked by the engine.
///
/// Everything except `body` is the structured header; `body` is opaque
/// content the engine never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,

    #[serde(rename = "type")]
    pub item_type: ItemType,

    /// Current lifecycle state. Always exactly one value of [`State`].
    pub state: State,

    pub priority: Priority,

    /// Where this item came from.
    pub source: SourceRef,

    /// Dedup fingerprint over (type, source). None means no dedup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,

    /// Structured header fields supplied by the producer (subject, recipient,
    /// amount, ...). Always a JSON object.
    #[serde(default = "empty_fields")]
    pub fields: serde_json::Value,

    pub requires_approval: bool,

    /// Present once the item has been routed through the approval gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the retry sweep may next move this item out of the error queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Terminal sub-state of the error queue. Only resubmission moves on.
    #[serde(default)]
    pub unrecoverable: bool,

    /// Item this one was derived from (proposal, plan, resubmission).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<WorkId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,

    /// Number of committed mutations. Each one wrote exactly one audit entry.
    #[serde(default)]
    pub revision: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Opaque content. Persisted below the header, not inside it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

fn empty_fields() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl WorkItem {
    /// Terminal items are never mutated again; only resubmission moves on.
    pub fn is_terminal(&self) -> bool {
        self.state == State::Done || self.unrecoverable
    }

    /// Look up a header field as a string, if present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    /// One-line description for dashboards and listings.
    pub fn summary(&self) -> String {
        for key in ["subject", "title", "original_name", "description"] {
            if let Some(value) = self.field_str(key) {
                return value.to_string();
            }
        }
        if let Some(plan) = &self.plan {
            return plan.title.clone();
        }
        self.body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .unwrap_or("-")
            .chars()
            .take(60)
            .collect()
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short display: first 8 chars of UUID
        f.pad(&self.0.to_string()[..8])
    }
}

impl FromStr for WorkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(WorkId)
            .map_err(|e| Error::Validation(format!("invalid work id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Item type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    FileDrop,
    Email,
    Task,
    Plan,
    ApprovalRequest,
    SocialPost,
    LedgerAction,
}

impl ItemType {
    pub const ALL: [ItemType; 7] = [
        ItemType::FileDrop,
        ItemType::Email,
        ItemType::Task,
        ItemType::Plan,
        ItemType::ApprovalRequest,
        ItemType::SocialPost,
        ItemType::LedgerAction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::FileDrop => "file_drop",
            ItemType::Email => "email",
            ItemType::Task => "task",
            ItemType::Plan => "plan",
            ItemType::ApprovalRequest => "approval_request",
            ItemType::SocialPost => "social_post",
            ItemType::LedgerAction => "ledger_action",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown item type: {s}")))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Persisted, not yet triaged.
    Intake,
    /// Ready for processing.
    NeedsAction,
    /// Waiting on a human decision.
    PendingApproval,
    /// Human approved; ready for execution.
    Approved,
    /// Human rejected; may only be archived.
    Rejected,
    /// Archived.
    Done,
    /// Execution failed or approval expired.
    ErrorQueue,
}

impl State {
    pub const ALL: [State; 7] = [
        State::Intake,
        State::NeedsAction,
        State::PendingApproval,
        State::Approved,
        State::Rejected,
        State::Done,
        State::ErrorQueue,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Intake, NeedsAction)
                | (NeedsAction, PendingApproval)
                | (NeedsAction, Done)
                | (NeedsAction, ErrorQueue)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, ErrorQueue) // approval expired
                | (Approved, Done)
                | (Approved, ErrorQueue)
                | (Rejected, Done)
                | (ErrorQueue, NeedsAction) // retry
                | (ErrorQueue, Done)
        )
    }

    /// Targets that only a human may move an item into.
    pub fn is_decision(self) -> bool {
        matches!(self, State::Approved | State::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Intake => "intake",
            State::NeedsAction => "needs_action",
            State::PendingApproval => "pending_approval",
            State::Approved => "approved",
            State::Rejected => "rejected",
            State::Done => "done",
            State::ErrorQueue => "error_queue",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.to_ascii_lowercase().replace('-', "_");
        State::ALL
            .into_iter()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| Error::Validation(format!("unknown state: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Declaration order doubles as sort order: high first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.pad(s)
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(Error::Validation(format!("unknown priority: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Provenance and fingerprint
// ---------------------------------------------------------------------------

/// Where a work item came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Producing watcher (e.g., "drop_folder", "planner").
    pub watcher: String,

    /// The external event id (file name, message id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Dedup key derived from (type, source reference).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// None when the source carries no external id.
    pub fn compute(item_type: ItemType, source: &SourceRef) -> Option<Self> {
        let external_id = source.external_id.as_deref()?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(item_type.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(source.watcher.as_bytes());
        hasher.update(&[0]);
        hasher.update(external_id.as_bytes());
        Some(Self(hasher.finalize().to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Approval and outcome metadata
// ---------------------------------------------------------------------------

/// Approval bookkeeping for the current approval round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    /// Policy rule that made the item sensitive, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl Approval {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.decision.is_none() && now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn target(self) -> State {
        match self {
            Verdict::Approved => State::Approved,
            Verdict::Rejected => State::Rejected,
        }
    }
}

/// Result of a successful execution, stored with the item when it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Backend that executed the item.
    pub backend: String,
    /// Arbitrary result data. Opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new work items. The engine's public API for submitting intake.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub(crate) item_type: ItemType,
    pub(crate) source: SourceRef,
    pub(crate) priority: Option<Priority>,
    pub(crate) fields: serde_json::Value,
    pub(crate) body: String,
    pub(crate) requires_approval: bool,
    pub(crate) parent_id: Option<WorkId>,
    pub(crate) plan: Option<Plan>,
}

impl NewWorkItem {
    pub fn new(item_type: ItemType, watcher: impl Into<String>) -> Self {
        Self {
            item_type,
            source: SourceRef {
                watcher: watcher.into(),
                external_id: None,
            },
            priority: None,
            fields: empty_fields(),
            body: String::new(),
            requires_approval: false,
            parent_id: None,
            plan: None,
        }
    }

    pub fn external_id(mut self, id: impl Into<String>) -> Self {
        self.source.external_id = Some(id.into());
        self
    }

    /// Explicit priority. Without one the classifier decides.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if let Some(map) = self.fields.as_object_mut() {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn fields(mut self, fields: serde_json::Value) -> Self {
        self.fields = fields;
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn requires_approval(mut self, yes: bool) -> Self {
        self.requires_approval = yes;
        self
    }

    pub fn parent(mut self, parent_id: WorkId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn get_fields(&self) -> &serde_json::Value {
        &self.fields
    }

    pub fn get_body(&self) -> &str {
        &self.body
    }

    /// Reject malformed submissions before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.source.watcher.trim().is_empty() {
            return Err(Error::Validation("source watcher must not be empty".into()));
        }
        if let Some(ext) = &self.source.external_id
            && (ext.trim().is_empty() || ext.contains('\n'))
        {
            return Err(Error::Validation(format!(
                "external id must be a non-empty single line, got {ext:?}"
            )));
        }
        if !self.fields.is_object() {
            return Err(Error::Validation("header fields must be an object".into()));
        }
        match (&self.plan, self.item_type) {
            (Some(plan), ItemType::Plan) => plan.validate(),
            (None, ItemType::Plan) => Err(Error::Validation("plan item without steps".into())),
            (Some(_), other) => Err(Error::Validation(format!(
                "only plan items carry steps, got {other}"
            ))),
            (None, _) => Ok(()),
        }
    }
}
