//! Integration tests for the queue loop: retries, cancellation, events and
//! the audit trail.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use install_queue::audit::{AuditLogger, JsonlAuditWriter};
use install_queue::config::RetryPolicy;
use install_queue::engine::{ExecutionEngine, ExitObservation, Executor, SimulatedExecutor};
use install_queue::models::job::{Job, JobState};
use install_queue::orchestrator::runner::CANCELLED_MESSAGE;
use install_queue::orchestrator::{
    run_queue, CoordinatorState, EntryMode, JobQueue, QueueEvent, RestartCoordinator, RunOptions,
};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{engine, items, memory_store};

/// Executor that cancels a token as soon as it runs anything.
struct CancellingExecutor {
    token: CancellationToken,
}

impl Executor for CancellingExecutor {
    fn name(&self) -> &'static str {
        "cancelling"
    }

    fn execute<'a>(
        &'a self,
        _job: &'a Job,
    ) -> Pin<Box<dyn Future<Output = ExitObservation> + Send + 'a>> {
        Box::pin(async move {
            self.token.cancel();
            ExitObservation::exited(0)
        })
    }
}

// ── Outcomes ────────────────────────────────────────────

/// A failing installer does not stop the queue.
#[tokio::test]
async fn failures_do_not_stop_the_queue() {
    let store = memory_store().await;
    let executor = Arc::new(
        SimulatedExecutor::default()
            .with_exit_code("a.msi", 1603)
            .with_unobservable("b.exe"),
    );
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi", "b.exe", "c.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());

    let report = run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .unwrap();

    assert!(!report.halted_for_restart);
    assert!(!report.cancelled);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.unknown, 1);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(executor.invocations().len(), 3);
    assert_eq!(queue.jobs()[0].exit_code, Some(1603));
    assert!(queue.jobs()[0].message.is_some());
    assert!(queue.session().retired_at.is_some());
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

/// Unknown outcomes are re-run up to the configured number of extra attempts.
#[tokio::test]
async fn unknown_outcomes_follow_retry_policy() {
    let store = memory_store().await;
    let executor = Arc::new(SimulatedExecutor::default().with_unobservable("flaky.exe"));
    let mut queue = JobQueue::enqueue(&store, &items(&["flaky.exe", "next.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());
    let options = RunOptions {
        retry: RetryPolicy {
            unknown_attempts: 2,
        },
        ..RunOptions::default()
    };

    let report = run_queue(&mut queue, &engine(&executor), &mut coordinator, &options)
        .await
        .unwrap();

    assert_eq!(report.summary.unknown, 1);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(queue.jobs()[0].attempts, 3);
    assert_eq!(queue.jobs()[1].attempts, 1);
    assert_eq!(executor.invocations().len(), 4);
}

/// With the default policy every installer runs exactly once.
#[tokio::test]
async fn default_policy_runs_each_installer_once() {
    let store = memory_store().await;
    let executor = Arc::new(SimulatedExecutor::default().with_unobservable("flaky.exe"));
    let mut queue = JobQueue::enqueue(&store, &items(&["flaky.exe"])).await.unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());

    run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(executor.invocations().len(), 1);
    assert_eq!(queue.jobs()[0].attempts, 1);
}

// ── Cancellation ────────────────────────────────────────

/// A cancelled run skips every pending job without launching any.
#[tokio::test]
async fn cancelled_run_skips_everything() {
    let store = memory_store().await;
    let executor = Arc::new(SimulatedExecutor::default());
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi", "b.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());
    let options = RunOptions::default();
    options.cancel.cancel();

    let report = run_queue(&mut queue, &engine(&executor), &mut coordinator, &options)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.summary.skipped, 2);
    assert!(executor.invocations().is_empty());
    for job in queue.jobs() {
        assert_eq!(job.state, JobState::Skipped);
        assert_eq!(job.message.as_deref(), Some(CANCELLED_MESSAGE));
        assert_eq!(job.attempts, 0);
    }
    assert!(queue.session().retired_at.is_some());
}

/// Cancelling mid-run lets the running installer finish and skips the rest.
#[tokio::test]
async fn cancel_mid_run_finishes_current_job() {
    let store = memory_store().await;
    let options = RunOptions::default();
    let executor = CancellingExecutor {
        token: options.cancel.clone(),
    };
    let engine = ExecutionEngine::new(Arc::new(executor));
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi", "b.msi", "c.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());

    let report = run_queue(&mut queue, &engine, &mut coordinator, &options)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.skipped, 2);
    assert_eq!(queue.jobs()[0].state, JobState::Succeeded);
}

// ── Events ──────────────────────────────────────────────

/// Events follow the job lifecycle and stop at the restart halt.
#[tokio::test]
async fn events_follow_the_run() {
    let store = memory_store().await;
    let executor = Arc::new(SimulatedExecutor::default().with_exit_code("b.msi", 3010));
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi", "b.msi", "c.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());
    coordinator.begin(EntryMode::Fresh).await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let options = RunOptions {
        events: Some(tx),
        ..RunOptions::default()
    };

    let report = run_queue(&mut queue, &engine(&executor), &mut coordinator, &options)
        .await
        .unwrap();
    drop(options);
    assert!(report.halted_for_restart);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 5);
    assert!(matches!(
        &events[0],
        QueueEvent::JobStarted { position: 0, attempt: 1, display_name, .. } if display_name == "a"
    ));
    assert!(matches!(
        &events[1],
        QueueEvent::JobFinished { state: JobState::Succeeded, exit_code: Some(0), .. }
    ));
    assert!(matches!(&events[2], QueueEvent::JobStarted { position: 1, .. }));
    assert!(matches!(
        &events[3],
        QueueEvent::JobFinished { state: JobState::SucceededRestartRequired, exit_code: Some(3010), .. }
    ));
    assert!(matches!(&events[4], QueueEvent::RestartRequired { remaining: 1, .. }));
}

/// A completed run ends with a summary event.
#[tokio::test]
async fn completion_event_carries_summary() {
    let store = memory_store().await;
    let executor = Arc::new(SimulatedExecutor::default());
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi"])).await.unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let options = RunOptions {
        events: Some(tx),
        ..RunOptions::default()
    };

    let report = run_queue(&mut queue, &engine(&executor), &mut coordinator, &options)
        .await
        .unwrap();
    drop(options);

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    assert_eq!(
        last,
        Some(QueueEvent::QueueCompleted {
            session_id: report.session_id,
            summary: report.summary,
        })
    );
}

// ── Audit ───────────────────────────────────────────────

/// Job starts and outcomes are appended to the audit log.
#[tokio::test]
async fn audit_log_records_each_job() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(JsonlAuditWriter::new(dir.path().to_path_buf()).unwrap());
    let store = memory_store().await;
    let executor = Arc::new(SimulatedExecutor::default().with_exit_code("b.msi", 1603));
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi", "b.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());
    let options = RunOptions {
        audit: Some(writer.clone() as Arc<dyn AuditLogger>),
        ..RunOptions::default()
    };

    run_queue(&mut queue, &engine(&executor), &mut coordinator, &options)
        .await
        .unwrap();

    let path = writer.path_for(chrono::Utc::now().date_naive());
    let content = std::fs::read_to_string(path).expect("audit file");
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["event_type"], "job_started");
    assert_eq!(lines[1]["event_type"], "job_finished");
    assert_eq!(lines[1]["outcome"], "succeeded");
    assert_eq!(lines[3]["outcome"], "failed");
    assert_eq!(lines[3]["exit_code"], 1603);
    assert_eq!(lines[3]["source_path"], "/downloads/b.msi");
    assert_eq!(lines[3]["session_id"], queue.session().id.as_str());
}
