//! Built-in jobs: watcher ingest and engine maintenance.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{Activation, Job};
use crate::backend::BackendRegistry;
use crate::config::Settings;
use crate::engine::Engine;
use crate::error::Result;
use crate::watcher::{self, Watcher};

/// Polls one watcher and feeds the engine.
pub struct WatchJob {
    name: String,
    engine: Arc<Engine>,
    watcher: Arc<dyn Watcher>,
    activation: Activation,
}

impl WatchJob {
    pub fn new(engine: Arc<Engine>, watcher: Arc<dyn Watcher>, activation: Activation) -> Self {
        Self {
            name: format!("watch:{}", watcher.name()),
            engine,
            watcher,
            activation,
        }
    }
}

#[async_trait]
impl Job for WatchJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn activation(&self) -> Activation {
        self.activation
    }

    async fn run(&self) -> Result<()> {
        watcher::ingest(&self.engine, self.watcher.as_ref()).await?;
        Ok(())
    }
}

/// Executes ready items.
pub struct DispatchJob {
    engine: Arc<Engine>,
    backends: Arc<BackendRegistry>,
    every: Duration,
}

impl DispatchJob {
    pub fn new(engine: Arc<Engine>, backends: Arc<BackendRegistry>, every: Duration) -> Self {
        Self {
            engine,
            backends,
            every,
        }
    }
}

#[async_trait]
impl Job for DispatchJob {
    fn name(&self) -> &str {
        "dispatch"
    }

    fn activation(&self) -> Activation {
        Activation::Every(self.every)
    }

    async fn run(&self) -> Result<()> {
        let report = self.engine.dispatch(&self.backends).await?;
        if !report.completed.is_empty() || !report.failed.is_empty() {
            info!(
                completed = report.completed.len(),
                failed = report.failed.len(),
                "dispatch pass"
            );
        }
        Ok(())
    }
}

/// Expires pending approvals past their window.
pub struct ApprovalSweepJob {
    engine: Arc<Engine>,
    every: Duration,
}

impl ApprovalSweepJob {
    pub fn new(engine: Arc<Engine>, every: Duration) -> Self {
        Self { engine, every }
    }
}

#[async_trait]
impl Job for ApprovalSweepJob {
    fn name(&self) -> &str {
        "approval_sweep"
    }

    fn activation(&self) -> Activation {
        Activation::Every(self.every)
    }

    async fn run(&self) -> Result<()> {
        let expired = self.engine.expire_approvals(Utc::now()).await?;
        debug!(expired = expired.len(), "approval sweep");
        Ok(())
    }
}

/// Retries due error queue items and gives up on exhausted ones.
pub struct RetrySweepJob {
    engine: Arc<Engine>,
    every: Duration,
}

impl RetrySweepJob {
    pub fn new(engine: Arc<Engine>, every: Duration) -> Self {
        Self { engine, every }
    }
}

#[async_trait]
impl Job for RetrySweepJob {
    fn name(&self) -> &str {
        "retry_sweep"
    }

    fn activation(&self) -> Activation {
        Activation::Every(self.every)
    }

    async fn run(&self) -> Result<()> {
        let report = self.engine.retry_due(Utc::now()).await?;
        debug!(
            retried = report.retried.len(),
            exhausted = report.exhausted.len(),
            "retry sweep"
        );
        Ok(())
    }
}

/// Reconciles folder location against committed state.
pub struct ReconcileJob {
    engine: Arc<Engine>,
    every: Duration,
}

impl ReconcileJob {
    pub fn new(engine: Arc<Engine>, every: Duration) -> Self {
        Self { engine, every }
    }
}

#[async_trait]
impl Job for ReconcileJob {
    fn name(&self) -> &str {
        "reconcile"
    }

    fn activation(&self) -> Activation {
        Activation::Every(self.every)
    }

    async fn run(&self) -> Result<()> {
        self.engine.recover().await?;
        Ok(())
    }
}

/// Rewrites the dashboard document.
pub struct DashboardJob {
    engine: Arc<Engine>,
    path: PathBuf,
    recent: usize,
    every: Duration,
}

impl DashboardJob {
    pub fn new(engine: Arc<Engine>, path: PathBuf, recent: usize, every: Duration) -> Self {
        Self {
            engine,
            path,
            recent,
            every,
        }
    }
}

#[async_trait]
impl Job for DashboardJob {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn activation(&self) -> Activation {
        Activation::Every(self.every)
    }

    async fn run(&self) -> Result<()> {
        let snapshot = self.engine.dashboard(self.recent)?;
        let tmp = self.path.with_extension("md.tmp");
        tokio::fs::write(&tmp, snapshot.render_markdown()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// The standard job set for a vault.
pub fn standard_jobs(
    engine: &Arc<Engine>,
    backends: Arc<BackendRegistry>,
    watchers: Vec<(Arc<dyn Watcher>, Activation)>,
    settings: &Settings,
    dashboard_path: PathBuf,
) -> Vec<Arc<dyn Job>> {
    let s = &settings.schedule;
    let secs = Duration::from_secs;

    let mut jobs: Vec<Arc<dyn Job>> = watchers
        .into_iter()
        .map(|(w, activation)| {
            Arc::new(WatchJob::new(Arc::clone(engine), w, activation)) as Arc<dyn Job>
        })
        .collect();
    jobs.push(Arc::new(DispatchJob::new(
        Arc::clone(engine),
        backends,
        secs(s.dispatch_secs),
    )));
    jobs.push(Arc::new(ApprovalSweepJob::new(
        Arc::clone(engine),
        secs(s.approval_sweep_secs),
    )));
    jobs.push(Arc::new(RetrySweepJob::new(
        Arc::clone(engine),
        secs(s.retry_sweep_secs),
    )));
    jobs.push(Arc::new(ReconcileJob::new(
        Arc::clone(engine),
        secs(s.reconcile_secs),
    )));
    jobs.push(Arc::new(DashboardJob::new(
        Arc::clone(engine),
        dashboard_path,
        settings.dashboard.recent_entries,
        secs(s.dashboard_secs),
    )));
    jobs
}
