//! Error types for deputy.

use thiserror::Error;

use crate::model::{State, WorkId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(WorkId),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: State, to: State },

    /// Fingerprint collision. Non-fatal: callers resolve it to the existing id.
    #[error("duplicate work item, existing id {0}")]
    DuplicateItem(WorkId),

    #[error("approval window for {0} has expired")]
    ApprovalExpired(WorkId),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("work item {0} is unrecoverable")]
    Unrecoverable(WorkId),

    #[error("transition requires a human actor, got {0}")]
    HumanRequired(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
