//! Approval Gate: which actions need a human decision, and the decision
//! operations themselves.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Engine, transition::Change};
use crate::error::{Error, Result};
use crate::model::{Actor, Decision, ItemType, LogEntry, State, Verdict, WorkId, WorkItem};
use crate::telemetry::metrics;

// ---------------------------------------------------------------------------
// Policy table
// ---------------------------------------------------------------------------

/// Named rule marking matching actions as sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    /// Item types the rule applies to. Empty means every type.
    #[serde(default)]
    pub item_types: Vec<ItemType>,
    pub condition: Condition,
}

impl PolicyRule {
    pub fn new(name: impl Into<String>, item_types: &[ItemType], condition: Condition) -> Self {
        Self {
            name: name.into(),
            item_types: item_types.to_vec(),
            condition,
        }
    }

    pub fn matches(&self, item_type: ItemType, fields: &serde_json::Value) -> bool {
        (self.item_types.is_empty() || self.item_types.contains(&item_type))
            && self.condition.holds(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Always,
    /// Numeric header field above `limit`.
    AmountOver { field: String, limit: f64 },
    /// Some recipient in the header field is not known. Known entries
    /// starting with `@` match a whole domain.
    RecipientNotIn { field: String, known: Vec<String> },
    /// List header field longer than `limit`.
    CountOver { field: String, limit: usize },
}

impl Condition {
    pub fn holds(&self, fields: &serde_json::Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::AmountOver { field, limit } => {
                let amount = match fields.get(field) {
                    Some(serde_json::Value::Number(n)) => n.as_f64(),
                    Some(serde_json::Value::String(s)) => {
                        s.trim().trim_start_matches('$').replace(',', "").parse().ok()
                    }
                    _ => None,
                };
                amount.is_some_and(|a| a > *limit)
            }
            Condition::RecipientNotIn { field, known } => recipients(fields.get(field))
                .iter()
                .any(|r| !is_known(r, known)),
            Condition::CountOver { field, limit } => match fields.get(field) {
                Some(serde_json::Value::Array(list)) => list.len() > *limit,
                Some(serde_json::Value::Number(n)) => n.as_u64().is_some_and(|c| c > *limit as u64),
                _ => false,
            },
        }
    }
}

/// Addresses from a string (comma separated) or list field.
fn recipients(value: Option<&serde_json::Value>) -> Vec<String> {
    let raw: Vec<&str> = match value {
        Some(serde_json::Value::String(s)) => s.split(',').collect(),
        Some(serde_json::Value::Array(list)) => list.iter().filter_map(|v| v.as_str()).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|r| {
            let r = r.trim();
            // "Name <addr>" -> "addr"
            match (r.find('<'), r.rfind('>')) {
                (Some(start), Some(end)) if start < end => &r[start + 1..end],
                _ => r,
            }
            .to_ascii_lowercase()
        })
        .filter(|r| !r.is_empty())
        .collect()
}

fn is_known(address: &str, known: &[String]) -> bool {
    known.iter().any(|k| {
        let k = k.to_ascii_lowercase();
        if k.starts_with('@') {
            address.ends_with(&k)
        } else {
            address == k
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub rules: Vec<PolicyRule>,
}

impl ApprovalPolicy {
    /// First rule matching the action, if any.
    pub fn matching_rule(&self, item_type: ItemType, fields: &serde_json::Value) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.matches(item_type, fields))
            .map(|r| r.name.as_str())
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                PolicyRule::new("public_post", &[ItemType::SocialPost], Condition::Always),
                PolicyRule::new("payment", &[ItemType::LedgerAction], Condition::Always),
                PolicyRule::new(
                    "approval_request",
                    &[ItemType::ApprovalRequest],
                    Condition::Always,
                ),
                PolicyRule::new(
                    "unknown_recipient",
                    &[ItemType::Email],
                    Condition::RecipientNotIn {
                        field: "to".into(),
                        known: Vec::new(),
                    },
                ),
                PolicyRule::new(
                    "bulk_operation",
                    &[],
                    Condition::CountOver {
                        field: "recipients".into(),
                        limit: 10,
                    },
                ),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Policy plus approval window.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    pub policy: ApprovalPolicy,
    pub ttl: Duration,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self {
            policy: ApprovalPolicy::default(),
            ttl: Duration::hours(24),
        }
    }
}

impl ApprovalGate {
    pub fn new(policy: ApprovalPolicy, ttl: Duration) -> Self {
        Self { policy, ttl }
    }

    /// Why an action needs approval, or None if it does not.
    pub fn reason(
        &self,
        item_type: ItemType,
        fields: &serde_json::Value,
        explicit: bool,
    ) -> Option<String> {
        match self.policy.matching_rule(item_type, fields) {
            Some(rule) => Some(rule.to_string()),
            None if explicit => Some("requested".to_string()),
            None => None,
        }
    }
}

/// Outcome of a human decision request.
#[derive(Debug)]
pub enum DecisionResult {
    /// The decision was recorded and the item moved.
    Decided(WorkItem),
    /// The item already carries a decision; nothing changed.
    AlreadyDecided(WorkItem),
}

impl DecisionResult {
    pub fn item(&self) -> &WorkItem {
        match self {
            DecisionResult::Decided(item) | DecisionResult::AlreadyDecided(item) => item,
        }
    }
}

impl Engine {
    pub async fn approve(&self, id: WorkId, actor: &Actor) -> Result<DecisionResult> {
        self.decide(id, Verdict::Approved, actor).await
    }

    pub async fn reject(&self, id: WorkId, actor: &Actor) -> Result<DecisionResult> {
        self.decide(id, Verdict::Rejected, actor).await
    }

    /// Record a decision exactly once per approval round.
    async fn decide(&self, id: WorkId, verdict: Verdict, actor: &Actor) -> Result<DecisionResult> {
        let _guard = self.item_locks.lock(&id).await;
        let item = self.store.get(id)?;

        if let Some(Decision { verdict: prior, .. }) =
            item.approval.as_ref().and_then(|a| a.decision.as_ref())
        {
            info!(id = %id, ?prior, requested = ?verdict, "duplicate decision ignored");
            return Ok(DecisionResult::AlreadyDecided(item));
        }

        let target = verdict.target();
        let item = self.apply_transition(
            item,
            target,
            actor,
            Change::new(verdict_action(verdict)),
            Utc::now(),
        )?;
        metrics::approval_decisions().add(
            1,
            &[opentelemetry::KeyValue::new("verdict", target.as_str())],
        );
        Ok(DecisionResult::Decided(item))
    }

    /// Proactive expiry sweep: pending approvals past their window move to
    /// the error queue with `last_error = "ApprovalExpired"`.
    pub async fn expire_approvals(&self, now: DateTime<Utc>) -> Result<Vec<WorkId>> {
        let actor = Actor::system("approval_sweep");
        let mut expired = Vec::new();

        for candidate in self.store.list(Some(State::PendingApproval))? {
            if !candidate.approval.as_ref().is_none_or(|a| a.is_expired(now)) {
                continue;
            }
            let _guard = self.item_locks.lock(&candidate.id).await;
            let item = self.store.get(candidate.id)?;
            if item.state != State::PendingApproval
                || !item.approval.as_ref().is_none_or(|a| a.is_expired(now))
            {
                continue;
            }

            match self.expire_locked(item, &actor, now) {
                Ok(_) => expired.push(candidate.id),
                Err(e) => warn!(id = %candidate.id, error = %e, "failed to expire approval"),
            }
        }
        Ok(expired)
    }

    /// Move a pending item whose window has elapsed to the error queue.
    /// Caller holds the item lock; an unexpired approval is refused.
    pub(crate) fn expire_locked(
        &self,
        item: WorkItem,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<WorkItem> {
        let change = Change::new("expire_approval")
            .details("approval window elapsed without a decision")
            .mutate(|item| {
                item.last_error = Some("ApprovalExpired".to_string());
                item.next_retry_at = None;
            });
        let item = self.apply_transition(item, State::ErrorQueue, actor, change, now)?;
        warn!(id = %item.id, "approval expired");
        metrics::approval_decisions().add(1, &[opentelemetry::KeyValue::new("verdict", "expired")]);
        Ok(item)
    }

    /// Record a tooling-level audit entry that is not tied to an item.
    pub fn append_log(&self, entry: LogEntry) -> Result<()> {
        if entry.item_id.is_some() {
            return Err(Error::Validation(
                "item-scoped entries are written by transitions only".into(),
            ));
        }
        self.log.append(&entry)
    }
}

fn verdict_action(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Approved => "approve",
        Verdict::Rejected => "reject",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_policy_flags_public_posts_and_payments() {
        let policy = ApprovalPolicy::default();
        assert_eq!(
            policy.matching_rule(ItemType::SocialPost, &json!({})),
            Some("public_post")
        );
        assert_eq!(
            policy.matching_rule(ItemType::LedgerAction, &json!({"amount": 5})),
            Some("payment")
        );
        assert_eq!(policy.matching_rule(ItemType::FileDrop, &json!({})), None);
    }

    #[test]
    fn unknown_recipient_needs_a_recipient() {
        let policy = ApprovalPolicy::default();
        assert_eq!(policy.matching_rule(ItemType::Email, &json!({})), None);
        assert_eq!(
            policy.matching_rule(ItemType::Email, &json!({"to": "Bob <bob@example.com>"})),
            Some("unknown_recipient")
        );
    }

    #[test]
    fn known_recipients_and_domains_pass() {
        let cond = Condition::RecipientNotIn {
            field: "to".into(),
            known: vec!["alice@example.com".into(), "@corp.test".into()],
        };
        assert!(!cond.holds(&json!({"to": "Alice <ALICE@example.com>, x@corp.test"})));
        assert!(cond.holds(&json!({"to": ["alice@example.com", "eve@evil.test"]})));
    }

    #[test]
    fn bulk_operations_count_recipients() {
        let policy = ApprovalPolicy::default();
        let ten: Vec<String> = (0..10).map(|i| format!("u{i}@x.test")).collect();
        let eleven: Vec<String> = (0..11).map(|i| format!("u{i}@x.test")).collect();
        assert_eq!(
            policy.matching_rule(ItemType::Task, &json!({ "recipients": ten })),
            None
        );
        assert_eq!(
            policy.matching_rule(ItemType::Task, &json!({ "recipients": eleven })),
            Some("bulk_operation")
        );
    }

    #[test]
    fn amount_over_accepts_numeric_strings() {
        let cond = Condition::AmountOver {
            field: "amount".into(),
            limit: 100.0,
        };
        assert!(cond.holds(&json!({"amount": "$1,250.00"})));
        assert!(!cond.holds(&json!({"amount": 99.5})));
        assert!(!cond.holds(&json!({"amount": "n/a"})));
    }

    #[test]
    fn explicit_flag_without_rule_is_requested() {
        let gate = ApprovalGate::default();
        assert_eq!(
            gate.reason(ItemType::Task, &json!({}), true).as_deref(),
            Some("requested")
        );
        assert_eq!(gate.reason(ItemType::Task, &json!({}), false), None);
    }

    #[test]
    fn policy_loads_from_toml() {
        let text = r#"
            [[rules]]
            name = "big_payment"
            item_types = ["ledger_action"]
            condition = { kind = "amount_over", field = "amount", limit = 500.0 }
        "#;
        let policy: ApprovalPolicy = toml::from_str(text).unwrap();
        assert_eq!(policy.rules.len(), 1);
        assert!(policy.rules[0].matches(ItemType::LedgerAction, &json!({"amount": 501})));
    }
}
