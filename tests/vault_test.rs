//! Vault persistence and recovery: documents on disk, folders as state.

use std::fs;
use std::path::{Path, PathBuf};

use deputy::engine::{CreateResult, Engine};
use deputy::model::{Actor, ItemType, LogResult, NewWorkItem, State, Verdict, WorkId, WorkItem};
use deputy::store::document;

fn doc(root: &Path, folder: &str, id: WorkId) -> PathBuf {
    root.join(folder).join(format!("{}.md", id.0))
}

async fn created(engine: &Engine, new: NewWorkItem) -> WorkItem {
    match engine.create_item(new).await.unwrap() {
        CreateResult::Created(item) => item,
        CreateResult::Duplicate(_) => panic!("unexpected duplicate"),
    }
}

#[tokio::test]
async fn items_are_filed_by_state() {
    let vault = tempfile::tempdir().unwrap();
    let root = vault.path();
    let engine = Engine::open_vault(root).unwrap();

    let task = created(&engine, NewWorkItem::new(ItemType::Task, "cli").body("Call the bank")).await;
    let post = created(&engine, NewWorkItem::new(ItemType::SocialPost, "planner")).await;

    assert!(doc(root, "Needs_Action", task.id).exists());
    assert!(doc(root, "Pending_Approval", post.id).exists());
    assert!(!doc(root, "Intake", task.id).exists());

    engine
        .transition_item(task.id, State::Done, &Actor::human("alice"))
        .await
        .unwrap();
    assert!(doc(root, "Done", task.id).exists());
    assert!(!doc(root, "Needs_Action", task.id).exists());

    let text = fs::read_to_string(doc(root, "Done", task.id)).unwrap();
    assert!(text.starts_with("---\n"));
    let on_disk = document::parse(&text).unwrap();
    assert_eq!(on_disk.state, State::Done);
    assert_eq!(on_disk.body, "Call the bank");

    // One partition file for today's entries.
    let logs: Vec<_> = fs::read_dir(root.join("Logs")).unwrap().collect();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn active_plans_live_in_plans_folder() {
    let vault = tempfile::tempdir().unwrap();
    let engine = Engine::open_vault(vault.path()).unwrap();
    let CreateResult::Created(plan) = engine
        .create_plan(
            None,
            "Onboard client",
            vec![deputy::model::Step::new("Send welcome pack")],
            &Actor::system("planner"),
        )
        .await
        .unwrap()
    else {
        panic!("expected a new plan");
    };

    assert!(doc(vault.path(), "Plans", plan.id).exists());
    assert_eq!(
        engine.list_by_state(Some(State::NeedsAction)).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn reopening_restores_items_logs_and_dedup() {
    let vault = tempfile::tempdir().unwrap();
    let new = || NewWorkItem::new(ItemType::Email, "gmail").external_id("msg-9");

    let id = {
        let engine = Engine::open_vault(vault.path()).unwrap();
        created(&engine, new()).await.id
    };

    let engine = Engine::open_vault(vault.path()).unwrap();
    let item = engine.get(id).unwrap();
    assert_eq!(item.item_type, ItemType::Email);
    assert_eq!(engine.logs_for(id).unwrap().len() as u64, item.revision);

    let again = engine.create_item(new()).await.unwrap();
    assert!(again.is_duplicate());
    assert_eq!(again.id(), id);
}

#[tokio::test]
async fn moving_a_pending_document_is_a_decision() {
    let vault = tempfile::tempdir().unwrap();
    let root = vault.path();
    let engine = Engine::open_vault(root).unwrap();
    let post = created(&engine, NewWorkItem::new(ItemType::SocialPost, "planner")).await;

    fs::rename(
        doc(root, "Pending_Approval", post.id),
        doc(root, "Approved", post.id),
    )
    .unwrap();

    let report = engine.recover().await.unwrap();
    assert_eq!(report.decisions, vec![post.id]);

    let item = engine.get(post.id).unwrap();
    assert_eq!(item.state, State::Approved);
    let decision = item.approval.unwrap().decision.unwrap();
    assert_eq!(decision.verdict, Verdict::Approved);
    assert_eq!(decision.decided_by, "human:vault");
    let last = engine.logs_for(post.id).unwrap().pop().unwrap();
    assert_eq!(last.action_type, "reconcile_decision");

    // Settled: a second pass finds nothing.
    let report = engine.recover().await.unwrap();
    assert!(report.decisions.is_empty() && report.reconciled.is_empty());
}

#[tokio::test]
async fn moves_that_skip_the_gate_are_undone() {
    let vault = tempfile::tempdir().unwrap();
    let root = vault.path();
    let engine = Engine::open_vault(root).unwrap();
    let task = created(&engine, NewWorkItem::new(ItemType::Task, "cli")).await;

    fs::rename(doc(root, "Needs_Action", task.id), doc(root, "Approved", task.id)).unwrap();

    let report = engine.recover().await.unwrap();
    assert_eq!(report.refused, vec![task.id]);
    assert!(doc(root, "Needs_Action", task.id).exists());
    assert!(!doc(root, "Approved", task.id).exists());

    let item = engine.get(task.id).unwrap();
    assert_eq!(item.state, State::NeedsAction);
    let entries = engine.logs_for(task.id).unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.action_type, "reconcile_refused");
    assert_eq!(last.result, LogResult::Failure);
    assert_eq!(entries.len() as u64, item.revision);
}

#[tokio::test]
async fn other_moves_are_trusted_and_logged() {
    let vault = tempfile::tempdir().unwrap();
    let root = vault.path();
    let engine = Engine::open_vault(root).unwrap();
    let task = created(&engine, NewWorkItem::new(ItemType::Task, "cli")).await;

    fs::rename(doc(root, "Needs_Action", task.id), doc(root, "Done", task.id)).unwrap();

    let report = engine.recover().await.unwrap();
    assert_eq!(report.reconciled, vec![task.id]);
    let item = engine.get(task.id).unwrap();
    assert_eq!(item.state, State::Done);

    let text = fs::read_to_string(doc(root, "Done", task.id)).unwrap();
    assert_eq!(document::parse(&text).unwrap().state, State::Done);
    let last = engine.logs_for(task.id).unwrap().pop().unwrap();
    assert_eq!(last.action_type, "reconcile");
    assert_eq!(last.from, Some(State::NeedsAction));
    assert_eq!(last.to, Some(State::Done));
}

#[tokio::test]
async fn sensitive_item_dropped_into_needs_action_is_gated_again() {
    let vault = tempfile::tempdir().unwrap();
    let root = vault.path();
    let engine = Engine::open_vault(root).unwrap();
    let post = created(&engine, NewWorkItem::new(ItemType::SocialPost, "planner")).await;

    fs::rename(
        doc(root, "Pending_Approval", post.id),
        doc(root, "Needs_Action", post.id),
    )
    .unwrap();
    engine.recover().await.unwrap();

    let item = engine.get(post.id).unwrap();
    assert_eq!(item.state, State::PendingApproval);
    assert!(doc(root, "Pending_Approval", post.id).exists());
}

#[tokio::test]
async fn failed_header_write_leaves_document_where_it_was() {
    let vault = tempfile::tempdir().unwrap();
    let root = vault.path();
    let engine = Engine::open_vault(root).unwrap();
    let task = created(&engine, NewWorkItem::new(ItemType::Task, "cli")).await;

    // A directory squatting on the temp name makes the header write fail.
    let blocker = root
        .join("Needs_Action")
        .join(format!(".{}.md.tmp", task.id.0));
    fs::create_dir(&blocker).unwrap();

    let alice = Actor::human("alice");
    assert!(engine.transition_item(task.id, State::Done, &alice).await.is_err());
    assert!(doc(root, "Needs_Action", task.id).exists());
    assert!(!doc(root, "Done", task.id).exists());
    assert_eq!(engine.get(task.id).unwrap().state, State::NeedsAction);
    assert!(engine.list_by_state(Some(State::Done)).unwrap().is_empty());

    // Nothing for recovery to finish on its behalf.
    let report = engine.recover().await.unwrap();
    assert!(report.reconciled.is_empty() && report.voided.is_empty());
    assert_eq!(engine.get(task.id).unwrap().state, State::NeedsAction);

    fs::remove_dir(&blocker).unwrap();
    let done = engine.transition_item(task.id, State::Done, &alice).await.unwrap();
    assert!(doc(root, "Done", task.id).exists());
    let on_disk = document::parse(&fs::read_to_string(doc(root, "Done", task.id)).unwrap()).unwrap();
    assert_eq!(on_disk.revision, done.revision);
    assert_eq!(
        engine.committed_logs_for(task.id).unwrap().len() as u64,
        done.revision
    );
}
