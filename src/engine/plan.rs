//! Plan items: creation and step progress.

use chrono::Utc;
use tracing::info;

use super::{CreateResult, Engine, transition::Change};
use crate::error::{Error, Result};
use crate::model::{
    Actor, ItemType, LogEntry, NewWorkItem, Plan, State, Step, StepStatus, WorkId, WorkItem,
};

impl Engine {
    /// Create a plan, optionally derived from `parent`. One plan per parent:
    /// repeating the call for the same parent returns the existing plan.
    pub async fn create_plan(
        &self,
        parent: Option<WorkId>,
        title: &str,
        steps: Vec<Step>,
        actor: &Actor,
    ) -> Result<CreateResult> {
        let mut new = NewWorkItem::new(ItemType::Plan, "planner")
            .field("title", title)
            .plan(Plan::new(title, steps));
        if let Some(parent) = parent {
            self.store.get(parent)?;
            new = new.parent(parent).external_id(parent.0.to_string());
        }
        self.create_as(new, actor, "create_plan").await
    }

    /// Set the status of one step. Completing the last open step archives
    /// the plan.
    pub async fn update_step(
        &self,
        plan_id: WorkId,
        index: usize,
        status: StepStatus,
        actor: &Actor,
    ) -> Result<WorkItem> {
        let _guard = self.item_locks.lock(&plan_id).await;
        let item = self.store.get(plan_id)?;

        let Some(plan) = item.plan.as_ref() else {
            return Err(Error::Validation(format!("{plan_id} is not a plan")));
        };
        if !matches!(item.state, State::NeedsAction | State::Approved) {
            return Err(Error::Validation(format!(
                "plan {plan_id} is not active (state {})",
                item.state
            )));
        }
        let Some(step) = plan.steps.get(index) else {
            return Err(Error::Validation(format!(
                "plan {plan_id} has no step {index}"
            )));
        };
        if step.status == status {
            return Ok(item);
        }
        if status.needs_dependencies() {
            let unmet = plan.unmet_dependencies(index);
            if !unmet.is_empty() {
                return Err(Error::Validation(format!(
                    "step {index} waits on steps {unmet:?}"
                )));
            }
        }
        if status == StepStatus::Done && step.needs_human() && !actor.is_human() {
            return Err(Error::HumanRequired(actor.to_string()));
        }

        let previous = step.status;
        let description = step.description.clone();
        let entry = LogEntry::new(
            "update_step",
            actor.clone(),
            format!("step {index} ({description}): {previous} -> {status}"),
        );
        let state = item.state;
        let mut after = item;
        if let Some(plan) = after.plan.as_mut() {
            plan.steps[index].status = status;
        }
        let item = self.commit(Some(state), after, entry)?;

        let complete = item.plan.as_ref().is_some_and(Plan::is_complete);
        if !complete {
            return Ok(item);
        }
        let (_, total) = item.plan.as_ref().map(Plan::progress).unwrap_or_default();
        let item = self.apply_transition(
            item,
            State::Done,
            actor,
            Change::new("complete_plan").details(format!("all {total} steps done")),
            Utc::now(),
        )?;
        info!(id = %plan_id, steps = total, "plan complete");
        Ok(item)
    }
}
