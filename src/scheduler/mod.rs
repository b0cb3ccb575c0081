//! Scheduler / Orchestrator: runs named jobs on independent schedules.
//!
//! Each job gets its own task, its own run-lock, and its own panic boundary.
//! A failing job is traced, counted, and written to the audit log, then runs
//! again on its next tick; siblings are unaffected. Two runs of the same job
//! never overlap. Shutdown is job-granular: loops stop between runs, and
//! in-flight runs get a grace period before being aborted.

pub mod jobs;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{Actor, LogEntry};
use crate::telemetry::metrics;
use crate::telemetry::work::start_job_span;

/// When a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Fixed interval, measured start to start.
    Every(Duration),
    /// Back to back, with `idle` between the end of one run and the next.
    Continuous { idle: Duration },
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    fn activation(&self) -> Activation;
    async fn run(&self) -> Result<()>;
}

/// Per-job counters, as reported by [`Orchestrator::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub runs: u64,
    pub failures: u64,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// How one run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Failed(String),
    Panicked(String),
    /// The previous run of the same job was still in flight.
    Skipped,
}

struct JobSlot {
    job: Arc<dyn Job>,
    run_lock: tokio::sync::Mutex<()>,
    status: Mutex<JobStatus>,
}

impl JobSlot {
    fn update(&self, f: impl FnOnce(&mut JobStatus)) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut status);
    }
}

pub struct Orchestrator {
    engine: Arc<Engine>,
    slots: Vec<Arc<JobSlot>>,
    grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(engine: Arc<Engine>, grace: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            engine,
            slots: Vec::new(),
            grace,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a job. Names must be unique.
    pub fn add(&mut self, job: Arc<dyn Job>) -> Result<()> {
        if self.slot(job.name()).is_some() {
            return Err(Error::Config(format!("duplicate job name: {}", job.name())));
        }
        let status = JobStatus {
            name: job.name().to_string(),
            ..Default::default()
        };
        self.slots.push(Arc::new(JobSlot {
            job,
            run_lock: tokio::sync::Mutex::new(()),
            status: Mutex::new(status),
        }));
        Ok(())
    }

    fn slot(&self, name: &str) -> Option<&Arc<JobSlot>> {
        self.slots.iter().find(|s| s.job.name() == name)
    }

    /// Spawn one loop per job. Each job runs immediately, then per its
    /// activation.
    pub fn start(&self) -> Result<()> {
        let names: Vec<&str> = self.slots.iter().map(|s| s.job.name()).collect();
        self.engine.append_log(LogEntry::new(
            "orchestrator_start",
            Actor::system("orchestrator"),
            format!("jobs: {}", names.join(", ")),
        ))?;

        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        for slot in &self.slots {
            let slot = Arc::clone(slot);
            let engine = Arc::clone(&self.engine);
            let shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(job_loop(slot, engine, shutdown)));
        }
        info!(jobs = self.slots.len(), "orchestrator started");
        Ok(())
    }

    /// Run a job now. Skipped if a run of it is already in flight.
    pub async fn trigger(&self, name: &str) -> Result<RunOutcome> {
        let slot = self
            .slot(name)
            .ok_or_else(|| Error::Validation(format!("no such job: {name}")))?;
        Ok(run_once(slot, &self.engine).await)
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.slots
            .iter()
            .map(|s| s.status.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .collect()
    }

    /// Stop all loops, wait up to the grace period, then abort stragglers.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let clean = tokio::time::timeout(self.grace, futures::future::join_all(handles))
            .await
            .is_ok();
        if !clean {
            warn!(grace_secs = self.grace.as_secs(), "jobs still running after grace period, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        let entry = LogEntry::new(
            "orchestrator_stop",
            Actor::system("orchestrator"),
            if clean {
                "all jobs stopped".to_string()
            } else {
                "aborted jobs after grace period".to_string()
            },
        );
        if let Err(e) = self.engine.append_log(entry) {
            error!(error = %e, "failed to record orchestrator stop");
        }
        info!(clean, "orchestrator stopped");
    }
}

async fn job_loop(slot: Arc<JobSlot>, engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let started = Instant::now();
        run_once(&slot, &engine).await;

        let wait = match slot.job.activation() {
            Activation::Every(interval) => interval.saturating_sub(started.elapsed()),
            Activation::Continuous { idle } => idle,
        };
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
    debug!(job = slot.job.name(), "job loop stopped");
}

/// One isolated run: run-lock, panic boundary, bookkeeping.
async fn run_once(slot: &JobSlot, engine: &Engine) -> RunOutcome {
    let name = slot.job.name();
    let Ok(_running) = slot.run_lock.try_lock() else {
        debug!(job = name, "previous run still in flight, skipping");
        return RunOutcome::Skipped;
    };
    slot.update(|s| s.running = true);

    let span = start_job_span(name);
    let result = AssertUnwindSafe(slot.job.run())
        .catch_unwind()
        .instrument(span)
        .await;
    let outcome = match result {
        Ok(Ok(())) => RunOutcome::Ok,
        Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
        Err(panic) => RunOutcome::Panicked(panic_message(panic.as_ref())),
    };

    let label = match &outcome {
        RunOutcome::Ok => "ok",
        RunOutcome::Failed(_) => "error",
        RunOutcome::Panicked(_) => "panic",
        RunOutcome::Skipped => "skipped",
    };
    metrics::job_runs().add(
        1,
        &[
            KeyValue::new("job", name.to_string()),
            KeyValue::new("result", label),
        ],
    );

    let failure = match &outcome {
        RunOutcome::Failed(msg) | RunOutcome::Panicked(msg) => Some(msg.clone()),
        _ => None,
    };
    slot.update(|s| {
        s.running = false;
        s.runs += 1;
        s.last_run_at = Some(Utc::now());
        if let Some(msg) = &failure {
            s.failures += 1;
            s.last_error = Some(msg.clone());
        }
    });

    if let Some(msg) = failure {
        error!(job = name, result = label, error = %msg, "job failed");
        let entry = LogEntry::new(
            "job_failed",
            Actor::system("orchestrator"),
            format!("{name} ({label}): {msg}"),
        )
        .failure();
        if let Err(e) = engine.append_log(entry) {
            error!(job = name, error = %e, "failed to record job failure");
        }
    }
    outcome
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
