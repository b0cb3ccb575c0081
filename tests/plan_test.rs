//! Plans: creation, step progress, dependencies, completion.

use deputy::engine::{CreateResult, Engine};
use deputy::error::Error;
use deputy::model::{Actor, ItemType, NewWorkItem, State, Step, StepOwner, StepStatus, WorkItem};

fn planner() -> Actor {
    Actor::system("planner")
}

async fn plan(engine: &Engine, steps: Vec<Step>) -> WorkItem {
    match engine
        .create_plan(None, "Quarterly close", steps, &planner())
        .await
        .unwrap()
    {
        CreateResult::Created(item) => item,
        CreateResult::Duplicate(_) => panic!("unexpected duplicate"),
    }
}

#[tokio::test]
async fn new_plan_is_active_with_pending_steps() {
    let engine = Engine::in_memory();
    let item = plan(
        &engine,
        vec![Step::new("Export ledger"), Step::new("Reconcile").after([0])],
    )
    .await;

    assert_eq!(item.item_type, ItemType::Plan);
    assert_eq!(item.state, State::NeedsAction);
    assert_eq!(item.summary(), "Quarterly close");
    let plan = item.plan.unwrap();
    assert_eq!(plan.progress(), (0, 2));
    assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
    assert_eq!(engine.logs_for(item.id).unwrap()[0].action_type, "create_plan");
}

#[tokio::test]
async fn steps_wait_on_their_dependencies() {
    let engine = Engine::in_memory();
    let item = plan(
        &engine,
        vec![Step::new("Export ledger"), Step::new("Reconcile").after([0])],
    )
    .await;

    let err = engine
        .update_step(item.id, 1, StepStatus::InProgress, &planner())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    engine
        .update_step(item.id, 0, StepStatus::Done, &planner())
        .await
        .unwrap();
    let item = engine
        .update_step(item.id, 1, StepStatus::InProgress, &planner())
        .await
        .unwrap();
    assert_eq!(item.plan.unwrap().progress(), (1, 2));
    assert_eq!(item.state, State::NeedsAction);
}

#[tokio::test]
async fn completing_the_last_step_archives_the_plan() {
    let engine = Engine::in_memory();
    let item = plan(&engine, vec![Step::new("One"), Step::new("Two")]).await;

    engine
        .update_step(item.id, 0, StepStatus::Done, &planner())
        .await
        .unwrap();
    let item = engine
        .update_step(item.id, 1, StepStatus::Done, &planner())
        .await
        .unwrap();

    assert_eq!(item.state, State::Done);
    let actions: Vec<String> = engine
        .logs_for(item.id)
        .unwrap()
        .into_iter()
        .map(|e| e.action_type)
        .collect();
    assert_eq!(
        actions,
        ["create_plan", "triage", "update_step", "update_step", "complete_plan"]
    );
    assert_eq!(item.revision, 5);
}

#[tokio::test]
async fn human_steps_need_a_human() {
    let engine = Engine::in_memory();
    let item = plan(
        &engine,
        vec![
            Step::new("Sign contract").owned_by(StepOwner::Human),
            Step::new("Send payment").with_approval(),
        ],
    )
    .await;

    for index in [0, 1] {
        let err = engine
            .update_step(item.id, index, StepStatus::Done, &planner())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HumanRequired(_)));
    }

    // Starting them is fine; only completion is gated.
    engine
        .update_step(item.id, 0, StepStatus::InProgress, &planner())
        .await
        .unwrap();
    engine
        .update_step(item.id, 0, StepStatus::Done, &Actor::human("alice"))
        .await
        .unwrap();
}

#[tokio::test]
async fn repeating_a_status_is_a_no_op() {
    let engine = Engine::in_memory();
    let item = plan(&engine, vec![Step::new("One"), Step::new("Two")]).await;

    let same = engine
        .update_step(item.id, 0, StepStatus::Pending, &planner())
        .await
        .unwrap();
    assert_eq!(same.revision, item.revision);
}

#[tokio::test]
async fn archived_plans_reject_updates() {
    let engine = Engine::in_memory();
    let item = plan(&engine, vec![Step::new("Only")]).await;
    engine
        .update_step(item.id, 0, StepStatus::Done, &planner())
        .await
        .unwrap();

    let err = engine
        .update_step(item.id, 0, StepStatus::Blocked, &planner())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn out_of_range_steps_and_non_plans_are_rejected() {
    let engine = Engine::in_memory();
    let item = plan(&engine, vec![Step::new("Only")]).await;
    assert!(matches!(
        engine.update_step(item.id, 5, StepStatus::Done, &planner()).await,
        Err(Error::Validation(_))
    ));

    let task = engine
        .create_item(NewWorkItem::new(ItemType::Task, "test"))
        .await
        .unwrap();
    assert!(matches!(
        engine.update_step(task.id(), 0, StepStatus::Done, &planner()).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn forward_dependencies_are_invalid() {
    let engine = Engine::in_memory();
    let err = engine
        .create_plan(
            None,
            "Broken",
            vec![Step::new("First").after([1]), Step::new("Second")],
            &planner(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn one_plan_per_parent() {
    let engine = Engine::in_memory();
    let email = engine
        .create_item(NewWorkItem::new(ItemType::Email, "gmail").external_id("m-1"))
        .await
        .unwrap()
        .id();

    let first = engine
        .create_plan(Some(email), "Reply", vec![Step::new("Draft")], &planner())
        .await
        .unwrap();
    let second = engine
        .create_plan(Some(email), "Reply again", vec![Step::new("Draft")], &planner())
        .await
        .unwrap();

    assert!(second.is_duplicate());
    assert_eq!(first.id(), second.id());
    assert_eq!(engine.get(first.id()).unwrap().parent_id, Some(email));
}
