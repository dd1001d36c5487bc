//! Integration tests for `RestartCoordinator` entry decisions, abandoning
//! and the relaunch hook.

use std::sync::Arc;

use install_queue::engine::SimulatedExecutor;
use install_queue::models::job::JobState;
use install_queue::orchestrator::{
    run_queue, ChannelNotifier, CoordinatorState, Entry, EntryMode, JobQueue, RestartCoordinator,
    RunOptions, RunReport, StartupHook,
};
use install_queue::persistence::store::Store;
use install_queue::AppError;

use super::test_helpers::{engine, items, memory_store, relaunch_command, report, RecordingHook};

/// Run a three-job session whose first installer requires a restart.
async fn halt(store: &Store, hook: &Arc<RecordingHook>) -> RunReport {
    let executor = Arc::new(SimulatedExecutor::default().with_exit_code("a.msi", 3010));
    let mut queue = JobQueue::enqueue(store, &items(&["a.msi", "b.msi", "c.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone())
        .with_relaunch(Arc::clone(hook) as Arc<dyn StartupHook>, relaunch_command());
    coordinator.begin(EntryMode::Fresh).await.unwrap();
    let report = run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .unwrap();
    assert!(report.halted_for_restart);
    assert_eq!(coordinator.state(), CoordinatorState::AwaitingUserLaunch);
    report
}

// ── Halting ─────────────────────────────────────────────

/// A halt registers the relaunch command once.
#[tokio::test]
async fn halt_registers_relaunch_command() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());

    let report = halt(&store, &hook).await;

    assert_eq!(
        hook.registrations(),
        ["install-queue-launcher --config config.toml"]
    );
    let session = store.sessions().get(&report.session_id).await.unwrap();
    assert!(session.restart_pending);
    assert_eq!(session.cursor, 1);
    let marker = store.markers().latest().await.unwrap().expect("marker");
    assert_eq!(Some(marker), report.marker);
}

/// A failing relaunch hook does not stop the marker from being written.
#[tokio::test]
async fn hook_failure_still_halts() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::failing());

    let report = halt(&store, &hook).await;

    assert!(hook.registrations().is_empty());
    assert!(store.markers().latest().await.unwrap().is_some());
    assert_eq!(report.summary.succeeded_restart_required, 1);
}

/// The notifier receives the pending job count.
#[tokio::test]
async fn halt_raises_resume_notice() {
    let store = memory_store().await;
    let executor = Arc::new(SimulatedExecutor::default().with_exit_code("a.msi", 1641));
    let (notifier, mut rx) = ChannelNotifier::new();
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi", "b.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone()).with_notifier(Arc::new(notifier));

    run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .unwrap();

    let notice = rx.try_recv().expect("notice");
    assert_eq!(notice.session_id, queue.session().id);
    assert_eq!(notice.pending_jobs, 1);
}

/// Only a restart-required outcome can halt a session.
#[tokio::test]
async fn halt_requires_restart_outcome() {
    let store = memory_store().await;
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi", "b.msi"]))
        .await
        .unwrap();
    let mut coordinator = RestartCoordinator::new(store.clone());

    let err = coordinator
        .on_restart_required(&mut queue)
        .await
        .expect_err("nothing ran");
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let job = queue.next().unwrap();
    queue
        .advance(&job.id, &report(JobState::Succeeded, Some(0)))
        .await
        .unwrap();
    let err = coordinator
        .on_restart_required(&mut queue)
        .await
        .expect_err("plain success");
    assert!(matches!(err, AppError::InvalidTransition(_)));
    assert!(store.markers().latest().await.unwrap().is_none());
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

// ── Entry decisions ─────────────────────────────────────

/// A fresh run discards the marker but keeps the halted session's records.
#[tokio::test]
async fn fresh_entry_abandons_marker() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    let halted = halt(&store, &hook).await;

    let mut coordinator = RestartCoordinator::new(store.clone())
        .with_relaunch(Arc::clone(&hook) as Arc<dyn StartupHook>, relaunch_command());
    let entry = coordinator.begin(EntryMode::Fresh).await.unwrap();

    let Entry::Fresh {
        abandoned: Some(marker),
        inconsistency: None,
    } = entry
    else {
        panic!("expected abandoned marker");
    };
    assert_eq!(marker.session_id, halted.session_id);
    assert_eq!(coordinator.state(), CoordinatorState::Abandoned);
    assert_eq!(hook.unregistrations(), 1);
    assert!(store.markers().latest().await.unwrap().is_none());

    let jobs = store.jobs().list(&halted.session_id).await.unwrap();
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[1].state, JobState::Pending);
}

/// A session started after abandoning may itself halt for a restart.
#[tokio::test]
async fn abandoned_coordinator_can_halt_again() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    halt(&store, &hook).await;

    let executor = Arc::new(SimulatedExecutor::default().with_exit_code("x.msi", 3010));
    let mut coordinator = RestartCoordinator::new(store.clone());
    coordinator.begin(EntryMode::Fresh).await.unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Abandoned);

    let mut queue = JobQueue::enqueue(&store, &items(&["x.msi", "y.msi"]))
        .await
        .unwrap();
    let report = run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.halted_for_restart);
    assert_eq!(coordinator.state(), CoordinatorState::AwaitingUserLaunch);
    let marker = store.markers().latest().await.unwrap().unwrap();
    assert_eq!(marker.session_id, queue.session().id);
}

/// Resume entry clears the restart flag and keeps the marker until done.
#[tokio::test]
async fn resume_entry_keeps_marker_until_finished() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    let halted = halt(&store, &hook).await;

    let mut coordinator = RestartCoordinator::new(store.clone())
        .with_relaunch(Arc::clone(&hook) as Arc<dyn StartupHook>, relaunch_command());
    let Entry::Resume(mut queue) = coordinator.begin(EntryMode::Resume).await.unwrap() else {
        panic!("expected resume");
    };
    assert_eq!(coordinator.state(), CoordinatorState::Resuming);
    assert!(!queue.session().restart_pending);
    assert!(store.markers().latest().await.unwrap().is_some());
    assert_eq!(queue.next().unwrap().display_name, "b");

    let executor = Arc::new(SimulatedExecutor::default());
    run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(coordinator.state(), CoordinatorState::Resumed);
    assert!(store.markers().latest().await.unwrap().is_none());
    assert_eq!(hook.unregistrations(), 1);
    let session = store.sessions().get(&halted.session_id).await.unwrap();
    assert!(session.retired_at.is_some());
}

/// A resumed session that needs another restart halts again.
#[tokio::test]
async fn resumed_session_can_halt_again() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    let halted = halt(&store, &hook).await;
    let first_marker = halted.marker.unwrap();

    let executor = Arc::new(SimulatedExecutor::default().with_exit_code("b.msi", 3010));
    let mut coordinator = RestartCoordinator::new(store.clone())
        .with_relaunch(Arc::clone(&hook) as Arc<dyn StartupHook>, relaunch_command());
    let Entry::Resume(mut queue) = coordinator.begin(EntryMode::Resume).await.unwrap() else {
        panic!("expected resume");
    };
    let report = run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.halted_for_restart);
    assert_eq!(queue.remaining(), 1);
    let markers = store.markers().list().await.unwrap();
    assert_eq!(markers.len(), 1);
    assert_ne!(markers[0].id, first_marker.id);
    assert_eq!(markers[0].session_id, first_marker.session_id);
    assert_eq!(hook.registrations().len(), 2);
}

/// Resume without a marker is an ordinary fresh entry.
#[tokio::test]
async fn resume_without_marker_is_fresh() {
    let store = memory_store().await;
    let mut coordinator = RestartCoordinator::new(store);

    let entry = coordinator.begin(EntryMode::Resume).await.unwrap();
    assert!(matches!(
        entry,
        Entry::Fresh {
            abandoned: None,
            inconsistency: None
        }
    ));
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

/// The entry decision is made once per process.
#[tokio::test]
async fn begin_twice_is_refused() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    halt(&store, &hook).await;

    let mut coordinator = RestartCoordinator::new(store);
    coordinator.begin(EntryMode::Resume).await.unwrap();
    let err = coordinator
        .begin(EntryMode::Resume)
        .await
        .err()
        .expect("second begin");
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

/// Finishing a resume requires one in progress.
#[tokio::test]
async fn finish_resume_requires_resuming() {
    let store = memory_store().await;
    let mut queue = JobQueue::enqueue(&store, &items(&["a.msi"])).await.unwrap();
    let mut coordinator = RestartCoordinator::new(store);

    let err = coordinator
        .finish_resume(&mut queue)
        .await
        .expect_err("nothing resumed");
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

// ── Abandon ─────────────────────────────────────────────

/// Explicit abandon discards the marker once.
#[tokio::test]
async fn abandon_discards_marker() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    let halted = halt(&store, &hook).await;

    let mut coordinator = RestartCoordinator::new(store.clone())
        .with_relaunch(Arc::clone(&hook) as Arc<dyn StartupHook>, relaunch_command());
    let marker = coordinator.abandon().await.unwrap().expect("marker");
    assert_eq!(marker.session_id, halted.session_id);
    assert_eq!(coordinator.state(), CoordinatorState::Abandoned);
    assert_eq!(hook.unregistrations(), 1);
    assert!(store.sessions().get(&halted.session_id).await.is_ok());

    let err = coordinator.abandon().await.expect_err("already abandoned");
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let mut other = RestartCoordinator::new(store);
    assert!(other.abandon().await.unwrap().is_none());
    assert_eq!(other.state(), CoordinatorState::Idle);
}

// ── Unreadable markers ──────────────────────────────────

/// Overwrite every marker timestamp with text that is not a timestamp.
async fn corrupt_markers(store: &Store) {
    sqlx::query("UPDATE resume_marker SET written_at = 'garbage'")
        .execute(store.db().as_ref())
        .await
        .unwrap();
}

/// A marker row that cannot be parsed is discarded and reported on resume.
#[tokio::test]
async fn unreadable_marker_is_discarded_on_resume() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    let halted = halt(&store, &hook).await;
    corrupt_markers(&store).await;

    let mut coordinator = RestartCoordinator::new(store.clone())
        .with_relaunch(Arc::clone(&hook) as Arc<dyn StartupHook>, relaunch_command());
    let entry = coordinator.begin(EntryMode::Resume).await.expect("begin");
    let Entry::Fresh {
        abandoned: None,
        inconsistency: Some(found),
    } = entry
    else {
        panic!("expected fresh entry with a reported inconsistency");
    };
    assert!(found.session_id.is_none());
    assert!(found.reason.contains("resume marker unreadable"), "reason: {}", found.reason);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert_eq!(hook.unregistrations(), 1);

    assert!(store.markers().latest().await.unwrap().is_none());
    assert!(store.sessions().get(&halted.session_id).await.is_ok());
}

/// A fresh run is not blocked by an unreadable marker.
#[tokio::test]
async fn unreadable_marker_does_not_block_fresh_run() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    halt(&store, &hook).await;
    corrupt_markers(&store).await;

    let mut coordinator = RestartCoordinator::new(store.clone());
    let entry = coordinator.begin(EntryMode::Fresh).await.expect("begin");
    assert!(matches!(
        entry,
        Entry::Fresh {
            abandoned: None,
            inconsistency: Some(_)
        }
    ));
    assert!(store.markers().latest().await.unwrap().is_none());

    let mut queue = JobQueue::enqueue(&store, &items(&["d.msi"])).await.unwrap();
    let executor = Arc::new(SimulatedExecutor::default());
    let report = run_queue(
        &mut queue,
        &engine(&executor),
        &mut coordinator,
        &RunOptions::default(),
    )
    .await
    .expect("run");
    assert_eq!(report.summary.succeeded, 1);
}

/// Abandoning clears unreadable markers and the launcher sees none.
#[tokio::test]
async fn unreadable_marker_is_cleared_by_abandon() {
    let store = memory_store().await;
    let hook = Arc::new(RecordingHook::default());
    halt(&store, &hook).await;
    corrupt_markers(&store).await;

    assert!(RestartCoordinator::pending_notice(&store)
        .await
        .expect("notice check")
        .is_none());

    let mut coordinator = RestartCoordinator::new(store.clone());
    assert!(coordinator.abandon().await.expect("abandon").is_none());
    assert!(store.markers().latest().await.unwrap().is_none());
}

// ── Launcher check ──────────────────────────────────────

/// The launcher notice reflects the marker without changing anything.
#[tokio::test]
async fn pending_notice_is_read_only() {
    let store = memory_store().await;
    assert!(RestartCoordinator::pending_notice(&store)
        .await
        .unwrap()
        .is_none());

    let hook = Arc::new(RecordingHook::default());
    let halted = halt(&store, &hook).await;

    let notice = RestartCoordinator::pending_notice(&store)
        .await
        .unwrap()
        .expect("notice");
    assert_eq!(notice.session_id, halted.session_id);
    assert_eq!(notice.pending_jobs, 2);
    assert!(notice.headline().contains("2 installers left"));
    assert!(store.markers().latest().await.unwrap().is_some());

    store.sessions().delete(&halted.session_id).await.unwrap();
    assert!(RestartCoordinator::pending_notice(&store)
        .await
        .unwrap()
        .is_none());
}
