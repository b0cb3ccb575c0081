//! Approval gate: decisions, double decisions, expiry.

use chrono::{Duration, Utc};
use deputy::engine::{ApprovalGate, ApprovalPolicy, Condition, CreateResult, DecisionResult, Engine, PolicyRule};
use deputy::error::Error;
use deputy::model::{Actor, ItemType, NewWorkItem, State, Verdict, WorkItem};
use serde_json::json;

async fn pending_post(engine: &Engine) -> WorkItem {
    let created = engine
        .create_item(
            NewWorkItem::new(ItemType::SocialPost, "planner").field("text", "Launching today"),
        )
        .await
        .unwrap();
    let CreateResult::Created(item) = created else {
        panic!("expected a new item");
    };
    assert_eq!(item.state, State::PendingApproval);
    item
}

#[tokio::test]
async fn approval_records_the_decision() {
    let engine = Engine::in_memory();
    let item = pending_post(&engine).await;

    let result = engine.approve(item.id, &Actor::human("alice")).await.unwrap();
    let DecisionResult::Decided(item) = result else {
        panic!("first decision should be recorded");
    };
    assert_eq!(item.state, State::Approved);
    let decision = item.approval.unwrap().decision.unwrap();
    assert_eq!(decision.verdict, Verdict::Approved);
    assert_eq!(decision.decided_by, "human:alice");
}

#[tokio::test]
async fn second_decision_is_ignored() {
    let engine = Engine::in_memory();
    let item = pending_post(&engine).await;
    let alice = Actor::human("alice");

    engine.approve(item.id, &alice).await.unwrap();
    let revision = engine.get(item.id).unwrap().revision;

    let again = engine.approve(item.id, &alice).await.unwrap();
    assert!(matches!(again, DecisionResult::AlreadyDecided(_)));
    let flip = engine.reject(item.id, &Actor::human("bob")).await.unwrap();
    assert!(matches!(flip, DecisionResult::AlreadyDecided(_)));

    let item = engine.get(item.id).unwrap();
    assert_eq!(item.state, State::Approved);
    assert_eq!(item.revision, revision);
}

#[tokio::test]
async fn concurrent_decisions_yield_exactly_one() {
    let engine = std::sync::Arc::new(Engine::in_memory());
    let item = pending_post(&engine).await;

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.approve(item.id, &Actor::human("a")).await.unwrap() })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.reject(item.id, &Actor::human("b")).await.unwrap() })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];
    let decided = results
        .iter()
        .filter(|r| matches!(r, DecisionResult::Decided(_)))
        .count();
    assert_eq!(decided, 1);
}

#[tokio::test]
async fn sweep_expires_stale_approvals_into_error_queue() {
    let engine = Engine::in_memory();
    let item = pending_post(&engine).await;

    // Inside the window nothing happens.
    assert!(engine.expire_approvals(Utc::now()).await.unwrap().is_empty());

    let later = Utc::now() + Duration::hours(25);
    let expired = engine.expire_approvals(later).await.unwrap();
    assert_eq!(expired, vec![item.id]);

    let item = engine.get(item.id).unwrap();
    assert_eq!(item.state, State::ErrorQueue);
    assert_eq!(item.last_error.as_deref(), Some("ApprovalExpired"));
    assert_eq!(item.next_retry_at, None);
    let last = engine.logs_for(item.id).unwrap().pop().unwrap();
    assert_eq!(last.action_type, "expire_approval");
    assert_eq!(last.actor, Actor::system("approval_sweep"));

    // Sweeping again is a no-op.
    assert!(engine.expire_approvals(later).await.unwrap().is_empty());
}

#[tokio::test]
async fn decision_after_window_fails_with_approval_expired() {
    let engine = Engine::in_memory().with_gate(ApprovalGate::new(
        ApprovalPolicy::default(),
        Duration::zero(),
    ));
    let item = pending_post(&engine).await;

    let err = engine
        .approve(item.id, &Actor::human("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ApprovalExpired(id) if id == item.id));
    assert_eq!(engine.get(item.id).unwrap().state, State::PendingApproval);
}

#[tokio::test]
async fn expired_item_moved_by_hand_records_the_expiry() {
    let engine = Engine::in_memory().with_gate(ApprovalGate::new(
        ApprovalPolicy::default(),
        Duration::zero(),
    ));
    let item = pending_post(&engine).await;

    let queued = engine
        .transition_item(item.id, State::ErrorQueue, &Actor::human("op"))
        .await
        .unwrap();
    assert_eq!(queued.state, State::ErrorQueue);
    assert_eq!(queued.last_error.as_deref(), Some("ApprovalExpired"));
    assert_eq!(queued.next_retry_at, None);
}

#[tokio::test]
async fn pending_items_cannot_be_pushed_to_error_queue_early() {
    let engine = Engine::in_memory();
    let item = pending_post(&engine).await;
    let err = engine
        .transition_item(item.id, State::ErrorQueue, &Actor::system("ops"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn custom_policy_flags_large_amounts_only() {
    let policy = ApprovalPolicy {
        rules: vec![PolicyRule::new(
            "large_invoice",
            &[ItemType::Task],
            Condition::AmountOver {
                field: "amount".into(),
                limit: 100.0,
            },
        )],
    };
    let engine = Engine::in_memory().with_gate(ApprovalGate::new(policy, Duration::hours(1)));

    let small = engine
        .create_item(NewWorkItem::new(ItemType::Task, "ledger").fields(json!({"amount": 40})))
        .await
        .unwrap();
    let large = engine
        .create_item(NewWorkItem::new(ItemType::Task, "ledger").fields(json!({"amount": "$1,250"})))
        .await
        .unwrap();

    assert_eq!(engine.get(small.id()).unwrap().state, State::NeedsAction);
    let large = engine.get(large.id()).unwrap();
    assert_eq!(large.state, State::PendingApproval);
    assert_eq!(
        large.approval.and_then(|a| a.reason).as_deref(),
        Some("large_invoice")
    );
}

#[tokio::test]
async fn known_recipients_do_not_need_approval() {
    let policy = ApprovalPolicy {
        rules: vec![PolicyRule::new(
            "unknown_recipient",
            &[ItemType::Email],
            Condition::RecipientNotIn {
                field: "to".into(),
                known: vec!["@example.com".into()],
            },
        )],
    };
    let engine = Engine::in_memory().with_gate(ApprovalGate::new(policy, Duration::hours(1)));

    let internal = engine
        .create_item(
            NewWorkItem::new(ItemType::Email, "gmail")
                .external_id("a")
                .field("to", "bob@example.com"),
        )
        .await
        .unwrap();
    let external = engine
        .create_item(
            NewWorkItem::new(ItemType::Email, "gmail")
                .external_id("b")
                .field("to", "eve@elsewhere.org"),
        )
        .await
        .unwrap();

    assert_eq!(engine.get(internal.id()).unwrap().state, State::NeedsAction);
    assert_eq!(engine.get(external.id()).unwrap().state, State::PendingApproval);
}
