//! Plans: an item subtype carrying an ordered sequence of steps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(title: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            title: title.into(),
            steps,
        }
    }

    /// Steps must exist, and each may only depend on steps before it.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("plan title must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(Error::Validation("plan must have at least one step".into()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(bad) = step.depends_on.iter().find(|&&d| d >= index) {
                return Err(Error::Validation(format!(
                    "step {index} depends on step {bad}, which does not precede it"
                )));
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Done)
    }

    /// Number of steps marked done.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .count();
        (done, self.steps.len())
    }

    /// Dependencies of `index` that are not yet done.
    pub fn unmet_dependencies(&self, index: usize) -> Vec<usize> {
        self.steps
            .get(index)
            .map(|step| {
                step.depends_on
                    .iter()
                    .copied()
                    .filter(|&d| self.steps.get(d).is_some_and(|s| s.status != StepStatus::Done))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub owner: StepOwner,
    /// Completion must come from a human actor.
    #[serde(default)]
    pub requires_approval: bool,
    /// Indices of prior steps that must be done first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<usize>,
}

impl Step {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Pending,
            owner: StepOwner::Automated,
            requires_approval: false,
            depends_on: Vec::new(),
        }
    }

    pub fn owned_by(mut self, owner: StepOwner) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn after(mut self, deps: impl IntoIterator<Item = usize>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    /// Human-owned and approval-flagged steps can only be finished by a human.
    pub fn needs_human(&self) -> bool {
        self.requires_approval || self.owner == StepOwner::Human
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl StepStatus {
    /// Moving into these states requires every dependency to be done.
    pub fn needs_dependencies(self) -> bool {
        matches!(self, StepStatus::InProgress | StepStatus::Done)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Done => "done",
            StepStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl FromStr for StepStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" => Ok(StepStatus::InProgress),
            "done" => Ok(StepStatus::Done),
            "blocked" => Ok(StepStatus::Blocked),
            _ => Err(Error::Validation(format!("unknown step status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOwner {
    #[default]
    Automated,
    Human,
}
