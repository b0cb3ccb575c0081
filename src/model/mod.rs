//! Domain types: work items, plans, and audit entries.

pub mod log;
pub mod plan;
pub mod work;

pub use log::{Actor, ActorKind, LogEntry, LogResult};
pub use plan::{Plan, Step, StepOwner, StepStatus};
pub use work::{
    Approval, Decision, Fingerprint, ItemType, NewWorkItem, Outcome, Priority, SourceRef, State,
    Verdict, WorkId, WorkItem,
};
