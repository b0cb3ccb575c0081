//! # deputy
//!
//! Durable work-item intake with human approval gating.
//!
//! Watchers turn external events into work items. The engine moves each item
//! along a fixed state graph, routing sensitive actions through a human
//! decision before any execution backend runs. Failures land in an error
//! queue with bounded, backed-off retries. Every mutation is written ahead to
//! a day-partitioned audit log, and items live as Markdown documents in
//! per-state vault folders.

pub mod audit;
pub mod backend;
pub mod capability;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod locks;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod watcher;
