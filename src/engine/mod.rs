//! Core engine. The public API for creating and managing work items.
//!
//! The engine owns handles to the store and the audit log. Every state change
//! goes through here; watchers, the scheduler, and the CLI never touch the
//! store directly. Mutations of one item are serialized by a per-id lock, and
//! creation of one external event by a per-fingerprint lock.

pub mod approval;
pub mod dispatch;
pub mod plan;
pub mod recovery;
pub mod retry;
pub(crate) mod transition;

pub use approval::{ApprovalGate, ApprovalPolicy, Condition, DecisionResult, PolicyRule};
pub use dispatch::DispatchReport;
pub use recovery::RecoveryReport;
pub use retry::{Eligibility, ErrorQueueEntry, RetryPolicy, RetryReport};

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::audit::{AuditLog, JournalLog, MemoryLog};
use crate::capability::{Classification, Classifier, Drafter, RuleClassifier, TemplateDrafter};
use crate::dashboard::{self, DashboardSnapshot};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::model::*;
use crate::store::{MemoryStore, Store, VaultStore};
use crate::telemetry::metrics;
use transition::Change;

/// The work engine. Owns all state and enforces all invariants.
pub struct Engine {
    store: Arc<dyn Store>,
    log: Arc<dyn AuditLog>,
    gate: ApprovalGate,
    retry: RetryPolicy,
    classifier: Arc<dyn Classifier>,
    drafter: Arc<dyn Drafter>,
    item_locks: KeyedLocks<WorkId>,
    fingerprint_locks: KeyedLocks<Fingerprint>,
}

/// What happened when an item was submitted.
#[derive(Debug)]
pub enum CreateResult {
    /// New work item created and triaged.
    Created(WorkItem),
    /// The fingerprint was already known; nothing was created.
    Duplicate(WorkId),
}

impl CreateResult {
    pub fn id(&self) -> WorkId {
        match self {
            CreateResult::Created(item) => item.id,
            CreateResult::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CreateResult::Duplicate(_))
    }
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, log: Arc<dyn AuditLog>) -> Self {
        Self {
            store,
            log,
            gate: ApprovalGate::default(),
            retry: RetryPolicy::default(),
            classifier: Arc::new(RuleClassifier),
            drafter: Arc::new(TemplateDrafter),
            item_locks: KeyedLocks::new(),
            fingerprint_locks: KeyedLocks::new(),
        }
    }

    /// Create an engine with in-memory storage (for testing).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryLog::new()))
    }

    /// Open an engine over a vault directory; the journal lives in `Logs/`.
    pub fn open_vault(root: &Path) -> Result<Self> {
        let store = VaultStore::open(root)?;
        let log = JournalLog::open(root.join("Logs"))?;
        Ok(Self::new(Arc::new(store), Arc::new(log)))
    }

    pub fn with_gate(mut self, gate: ApprovalGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_drafter(mut self, drafter: Arc<dyn Drafter>) -> Self {
        self.drafter = drafter;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Submit new work. Deduplicates, classifies, gates, then triages.
    pub async fn create_item(&self, new: NewWorkItem) -> Result<CreateResult> {
        let actor = Actor::watcher(new.source.watcher.clone());
        self.create_as(new, &actor, "create").await
    }

    pub(crate) async fn create_as(
        &self,
        new: NewWorkItem,
        actor: &Actor,
        action: &str,
    ) -> Result<CreateResult> {
        if let Err(e) = new.validate() {
            metrics::items_created().add(
                1,
                &[
                    KeyValue::new("item_type", new.item_type.as_str()),
                    KeyValue::new("result", "invalid"),
                ],
            );
            return Err(e);
        }

        let fingerprint = Fingerprint::compute(new.item_type, &new.source);
        let _fp_guard = match &fingerprint {
            Some(fp) => Some(self.fingerprint_locks.lock(fp).await),
            None => None,
        };

        if let Some(fp) = &fingerprint
            && let Some(existing) = self.store.find_by_fingerprint(fp)?
        {
            return self.resume_or_duplicate(new.item_type, existing).await;
        }

        let Classification {
            item_type,
            priority: classified,
        } = match self.classifier.classify(&new).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "classifier failed, using submitted type");
                Classification {
                    item_type: new.item_type,
                    priority: Priority::default(),
                }
            }
        };
        let priority = new.priority.unwrap_or(classified);
        let requires_approval = self
            .gate
            .reason(item_type, &new.fields, new.requires_approval)
            .is_some();

        let now = Utc::now();
        let item = WorkItem {
            id: WorkId::new(),
            item_type,
            state: State::Intake,
            priority,
            source: new.source,
            fingerprint,
            fields: new.fields,
            requires_approval,
            approval: None,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
            unrecoverable: false,
            parent_id: new.parent_id,
            outcome: None,
            plan: new.plan,
            revision: 0,
            created_at: now,
            updated_at: now,
            body: new.body,
        };

        let entry = LogEntry::new(
            action,
            actor.clone(),
            format!("{item_type} from {}", item.source.watcher),
        )
        .states(None, State::Intake);
        // Locked before it exists, so recovery cannot triage it under us.
        let guard = self.item_locks.lock(&item.id).await;
        let item = match self.commit(None, item, entry) {
            Ok(item) => item,
            Err(Error::DuplicateItem(existing)) => {
                drop(guard);
                return self.resume_or_duplicate(item_type, existing).await;
            }
            Err(e) => return Err(e),
        };
        let item = self.finish_triage(item)?;

        metrics::items_created().add(
            1,
            &[
                KeyValue::new("item_type", item_type.as_str()),
                KeyValue::new("result", "created"),
            ],
        );
        info!(
            id = %item.id,
            item_type = %item_type,
            priority = %item.priority,
            state = %item.state,
            "work item created"
        );
        Ok(CreateResult::Created(item))
    }

    /// Advance an item whose creation stopped short of its first resting
    /// state: still in `Intake`, or sensitive and not yet gated. Caller holds
    /// the item lock.
    pub(crate) fn finish_triage(&self, mut item: WorkItem) -> Result<WorkItem> {
        let triage = Actor::system("triage");
        if item.state == State::Intake {
            item = self.apply_transition(
                item,
                State::NeedsAction,
                &triage,
                Change::new("triage"),
                Utc::now(),
            )?;
        }
        if item.state == State::NeedsAction && item.requires_approval {
            item = self.request_approval(item, &triage)?;
        }
        Ok(item)
    }

    /// A resubmitted event whose first creation failed mid-triage picks up
    /// where it stopped; anything else is a plain duplicate.
    async fn resume_or_duplicate(&self, item_type: ItemType, existing: WorkId) -> Result<CreateResult> {
        let _guard = self.item_locks.lock(&existing).await;
        let item = self.store.get(existing)?;
        if !needs_triage(&item) {
            return Ok(self.duplicate(item_type, existing));
        }
        let item = self.finish_triage(item)?;
        info!(id = %item.id, state = %item.state, "resumed interrupted triage");
        Ok(CreateResult::Created(item))
    }

    fn duplicate(&self, item_type: ItemType, existing: WorkId) -> CreateResult {
        metrics::items_created().add(
            1,
            &[
                KeyValue::new("item_type", item_type.as_str()),
                KeyValue::new("result", "duplicate"),
            ],
        );
        info!(existing = %existing, item_type = %item_type, "duplicate submission");
        CreateResult::Duplicate(existing)
    }

    /// Start a new item from a terminal one. The original is left untouched.
    pub async fn resubmit(&self, id: WorkId, actor: &Actor) -> Result<WorkItem> {
        let original = self.store.get(id)?;
        if !original.is_terminal() {
            return Err(Error::Validation(format!(
                "only done or unrecoverable items can be resubmitted; {id} is {}",
                original.state
            )));
        }

        let mut new = NewWorkItem::new(original.item_type, "resubmission")
            .priority(original.priority)
            .fields(original.fields.clone())
            .body(original.body.clone())
            .requires_approval(original.requires_approval)
            .parent(id);
        if let Some(mut plan) = original.plan.clone() {
            for step in &mut plan.steps {
                step.status = StepStatus::Pending;
            }
            new = new.plan(plan);
        }

        match self.create_as(new, actor, "resubmit").await? {
            CreateResult::Created(item) => Ok(item),
            CreateResult::Duplicate(existing) => Err(Error::DuplicateItem(existing)),
        }
    }

    /// Internal planning operation: draft a new item derived from `parent_id`.
    /// The draft passes through the approval gate like any other item.
    pub async fn propose(
        &self,
        parent_id: WorkId,
        item_type: ItemType,
        fields: serde_json::Value,
        actor: &Actor,
    ) -> Result<CreateResult> {
        let parent = self.store.get(parent_id)?;
        let body = self
            .drafter
            .draft(&parent, item_type, &fields)
            .await
            .map_err(|e| Error::Execution(format!("drafting failed: {e}")))?;
        let new = NewWorkItem::new(item_type, "planner")
            .fields(fields)
            .body(body)
            .parent(parent_id);
        self.create_as(new, actor, "propose").await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, id: WorkId) -> Result<WorkItem> {
        self.store.get(id)
    }

    /// Items in `state` (or all), high priority first, then oldest first.
    pub fn list_by_state(&self, state: Option<State>) -> Result<Vec<WorkItem>> {
        let mut items = self.store.list(state)?;
        items.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(items)
    }

    /// Resolve a full id or a unique prefix of one.
    pub fn resolve_id(&self, text: &str) -> Result<WorkId> {
        if let Ok(id) = text.parse::<WorkId>() {
            return Ok(id);
        }
        let prefix = text.to_ascii_lowercase();
        let matches: Vec<WorkId> = self
            .store
            .list(None)?
            .into_iter()
            .map(|i| i.id)
            .filter(|id| id.0.to_string().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(Error::Validation(format!("no work item matches {text:?}"))),
            _ => Err(Error::Validation(format!(
                "{text:?} is ambiguous ({} matches)",
                matches.len()
            ))),
        }
    }

    /// Full history of `id`, aborted attempts included.
    pub fn logs_for(&self, id: WorkId) -> Result<Vec<LogEntry>> {
        self.log.entries_for(id)
    }

    /// Only the entries whose mutation was persisted, one per revision.
    pub fn committed_logs_for(&self, id: WorkId) -> Result<Vec<LogEntry>> {
        self.log.committed_for(id)
    }

    pub fn recent_logs(&self, n: usize) -> Result<Vec<LogEntry>> {
        self.log.recent(n)
    }

    pub fn dashboard(&self, recent: usize) -> Result<DashboardSnapshot> {
        dashboard::project(self.store.as_ref(), self.log.as_ref(), recent, Utc::now())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Move an item along the transition graph.
    ///
    /// Entering the error queue always records why: from `Pending_Approval`
    /// only as an expiry, otherwise as a failure charged to the retry budget.
    pub async fn transition_item(&self, id: WorkId, target: State, actor: &Actor) -> Result<WorkItem> {
        let _guard = self.item_locks.lock(&id).await;
        let item = self.store.get(id)?;
        if target == State::ErrorQueue && item.state != State::ErrorQueue && !item.unrecoverable {
            return match item.state {
                State::PendingApproval => self.expire_locked(item, actor, Utc::now()),
                _ => self.queue_for_retry_locked(
                    item,
                    &format!("moved to the error queue by {actor}"),
                    actor,
                ),
            };
        }
        self.apply_transition(item, target, actor, Change::new("transition"), Utc::now())
    }

    /// Route a sensitive item into a fresh approval round.
    pub(crate) fn request_approval(&self, item: WorkItem, actor: &Actor) -> Result<WorkItem> {
        let item = self.apply_transition(
            item,
            State::PendingApproval,
            actor,
            Change::new("request_approval"),
            Utc::now(),
        )?;
        if let Some(approval) = &item.approval {
            info!(
                id = %item.id,
                reason = approval.reason.as_deref().unwrap_or("-"),
                expires_at = %approval.expires_at,
                "approval requested"
            );
        }
        Ok(item)
    }
}

/// Still in `Intake`, or sensitive and sitting in `Needs_Action` ungated.
pub(crate) fn needs_triage(item: &WorkItem) -> bool {
    item.state == State::Intake || (item.state == State::NeedsAction && item.requires_approval)
}
