//! Orchestrator: isolation, no overlap, graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deputy::engine::Engine;
use deputy::error::{Error, Result};
use deputy::scheduler::{Activation, Job, Orchestrator, RunOutcome};
use tokio::sync::Notify;

struct CountJob {
    name: &'static str,
    runs: AtomicUsize,
}

impl CountJob {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Job for CountJob {
    fn name(&self) -> &str {
        self.name
    }

    fn activation(&self) -> Activation {
        Activation::Every(Duration::from_millis(10))
    }

    async fn run(&self) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct PanicJob;

#[async_trait]
impl Job for PanicJob {
    fn name(&self) -> &str {
        "panicky"
    }

    fn activation(&self) -> Activation {
        Activation::Every(Duration::from_millis(10))
    }

    async fn run(&self) -> Result<()> {
        panic!("watcher exploded");
    }
}

struct FailJob;

#[async_trait]
impl Job for FailJob {
    fn name(&self) -> &str {
        "failing"
    }

    fn activation(&self) -> Activation {
        Activation::Continuous {
            idle: Duration::from_millis(10),
        }
    }

    async fn run(&self) -> Result<()> {
        Err(Error::Execution("mailbox unreachable".into()))
    }
}

/// Blocks until released.
struct GateJob {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Job for GateJob {
    fn name(&self) -> &str {
        "gated"
    }

    fn activation(&self) -> Activation {
        Activation::Every(Duration::from_secs(3600))
    }

    async fn run(&self) -> Result<()> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

struct SleepyJob;

#[async_trait]
impl Job for SleepyJob {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn activation(&self) -> Activation {
        Activation::Every(Duration::from_secs(3600))
    }

    async fn run(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn failing_jobs_do_not_affect_siblings() {
    let engine = Arc::new(Engine::in_memory());
    let counter = CountJob::new("counter");
    let mut orchestrator = Orchestrator::new(engine.clone(), Duration::from_secs(1));
    orchestrator.add(counter.clone()).unwrap();
    orchestrator.add(Arc::new(PanicJob)).unwrap();
    orchestrator.add(Arc::new(FailJob)).unwrap();

    orchestrator.start().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    orchestrator.shutdown().await;

    assert!(counter.runs.load(Ordering::SeqCst) >= 2);
    for status in orchestrator.status() {
        assert!(status.runs >= 2, "{} ran {} times", status.name, status.runs);
        assert!(!status.running);
        match status.name.as_str() {
            "counter" => assert_eq!(status.failures, 0),
            "panicky" => {
                assert_eq!(status.failures, status.runs);
                assert_eq!(status.last_error.as_deref(), Some("watcher exploded"));
            }
            "failing" => {
                assert_eq!(status.failures, status.runs);
                assert!(status.last_error.unwrap().contains("mailbox unreachable"));
            }
            other => panic!("unexpected job {other}"),
        }
    }

    let actions: Vec<String> = engine
        .recent_logs(1000)
        .unwrap()
        .into_iter()
        .map(|e| e.action_type)
        .collect();
    assert_eq!(actions.first().map(String::as_str), Some("orchestrator_start"));
    assert_eq!(actions.last().map(String::as_str), Some("orchestrator_stop"));
    assert!(actions.iter().any(|a| a == "job_failed"));
}

#[tokio::test]
async fn runs_of_one_job_never_overlap() {
    let engine = Arc::new(Engine::in_memory());
    let gate = Arc::new(GateJob {
        started: Notify::new(),
        release: Notify::new(),
    });
    let mut orchestrator = Orchestrator::new(engine, Duration::from_secs(1));
    orchestrator.add(gate.clone()).unwrap();
    let orchestrator = Arc::new(orchestrator);

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.trigger("gated").await.unwrap() })
    };
    gate.started.notified().await;

    assert_eq!(orchestrator.trigger("gated").await.unwrap(), RunOutcome::Skipped);
    assert!(orchestrator.status()[0].running);

    gate.release.notify_one();
    assert_eq!(first.await.unwrap(), RunOutcome::Ok);
    assert_eq!(orchestrator.status()[0].runs, 1);
}

#[tokio::test]
async fn shutdown_aborts_after_grace_period() {
    let engine = Arc::new(Engine::in_memory());
    let mut orchestrator = Orchestrator::new(engine.clone(), Duration::from_millis(50));
    orchestrator.add(Arc::new(SleepyJob)).unwrap();
    orchestrator.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = tokio::time::Instant::now();
    orchestrator.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let last = engine.recent_logs(1).unwrap().pop().unwrap();
    assert_eq!(last.action_type, "orchestrator_stop");
    assert!(last.details.contains("aborted"));
}

#[tokio::test]
async fn job_names_are_unique_and_triggerable() {
    let engine = Arc::new(Engine::in_memory());
    let mut orchestrator = Orchestrator::new(engine, Duration::from_secs(1));
    orchestrator.add(CountJob::new("dup")).unwrap();
    assert!(orchestrator.add(CountJob::new("dup")).is_err());

    assert_eq!(orchestrator.trigger("dup").await.unwrap(), RunOutcome::Ok);
    assert!(orchestrator.trigger("missing").await.is_err());
}
