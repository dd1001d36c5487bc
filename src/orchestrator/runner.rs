//! Queue loop: next, run, advance, inspect.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::{self, AuditEntry, AuditEventType, AuditLogger};
use crate::config::RetryPolicy;
use crate::engine::{ExecutionEngine, ExecutionReport};
use crate::models::job::{Job, JobState};
use crate::models::marker::ResumeMarker;
use crate::models::summary::RunSummary;
use crate::Result;

use super::coordinator::{CoordinatorState, RestartCoordinator};
use super::queue::JobQueue;

/// Reason recorded on jobs skipped by cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled before start";

/// Progress signal for a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// An installer attempt is starting.
    JobStarted {
        /// Owning session.
        session_id: String,
        /// Job being started.
        job_id: String,
        /// Position in the session.
        position: u32,
        /// Installer display name.
        display_name: String,
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A job reached a terminal state.
    JobFinished {
        /// Owning session.
        session_id: String,
        /// Finished job.
        job_id: String,
        /// Recorded state.
        state: JobState,
        /// Raw exit code, if observed.
        exit_code: Option<i32>,
        /// Failure detail.
        message: Option<String>,
    },
    /// The session halted for a host restart.
    RestartRequired {
        /// Halted session.
        session_id: String,
        /// Jobs left for after the restart.
        remaining: usize,
    },
    /// Every job in the session is terminal.
    QueueCompleted {
        /// Completed session.
        session_id: String,
        /// Final counts.
        summary: RunSummary,
    },
}

/// Caller choices for one run.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Retry policy for `Unknown` outcomes.
    pub retry: RetryPolicy,
    /// Cancelled to skip every job that has not started yet.
    pub cancel: CancellationToken,
    /// Optional progress channel.
    pub events: Option<UnboundedSender<QueueEvent>>,
    /// Optional audit trail.
    pub audit: Option<Arc<dyn AuditLogger>>,
}

/// Outcome of [`run_queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Session that was run.
    pub session_id: String,
    /// Counts of terminal outcomes in the session so far.
    pub summary: RunSummary,
    /// Whether the run stopped for a host restart.
    pub halted_for_restart: bool,
    /// Marker written when halted.
    pub marker: Option<ResumeMarker>,
    /// Whether pending jobs were skipped by cancellation.
    pub cancelled: bool,
}

/// Run `queue` until it completes, halts for a restart or is cancelled.
///
/// Individual job failures never stop the loop. After a restart-required
/// outcome the coordinator writes the marker and no further job starts in
/// this process. When a resumed session completes, its marker is cleared.
///
/// # Errors
///
/// Returns `AppError::Db` or `AppError::InvalidTransition` if an outcome
/// cannot be persisted; the job already recorded stays recorded.
pub async fn run_queue(
    queue: &mut JobQueue,
    engine: &ExecutionEngine,
    coordinator: &mut RestartCoordinator,
    options: &RunOptions,
) -> Result<RunReport> {
    let session_id = queue.session().id.clone();
    drive(queue, engine, coordinator, options)
        .instrument(info_span!("run_queue", session_id))
        .await
}

async fn drive(
    queue: &mut JobQueue,
    engine: &ExecutionEngine,
    coordinator: &mut RestartCoordinator,
    options: &RunOptions,
) -> Result<RunReport> {
    let session_id = queue.session().id.clone();
    let mut cancelled = false;

    while let Some(job) = queue.next() {
        if options.cancel.is_cancelled() {
            cancelled = true;
            skip_remaining(queue, options).await?;
            break;
        }

        let report = attempt(queue, engine, options, &job).await?;
        queue.advance(&job.id, &report).await?;
        finished(options, &job, &report);

        if report.state == JobState::SucceededRestartRequired {
            let marker = coordinator.on_restart_required(queue).await?;
            emit(
                options,
                QueueEvent::RestartRequired {
                    session_id: session_id.clone(),
                    remaining: queue.remaining(),
                },
            );
            return Ok(RunReport {
                session_id,
                summary: queue.summary(),
                halted_for_restart: true,
                marker: Some(marker),
                cancelled: false,
            });
        }
    }

    if coordinator.state() == CoordinatorState::Resuming {
        coordinator.finish_resume(queue).await?;
    } else {
        queue.retire().await?;
    }

    let summary = queue.summary();
    info!(
        succeeded = summary.succeeded,
        succeeded_restart_required = summary.succeeded_restart_required,
        failed = summary.failed,
        unknown = summary.unknown,
        skipped = summary.skipped,
        "queue completed"
    );
    emit(
        options,
        QueueEvent::QueueCompleted {
            session_id: session_id.clone(),
            summary,
        },
    );

    Ok(RunReport {
        session_id,
        summary,
        halted_for_restart: false,
        marker: None,
        cancelled,
    })
}

/// Run one job, re-running `Unknown` outcomes as the retry policy allows.
async fn attempt(
    queue: &mut JobQueue,
    engine: &ExecutionEngine,
    options: &RunOptions,
    job: &Job,
) -> Result<ExecutionReport> {
    loop {
        let running = queue.mark_running(&job.id).await?;
        emit(
            options,
            QueueEvent::JobStarted {
                session_id: running.session_id.clone(),
                job_id: running.id.clone(),
                position: running.position,
                display_name: running.display_name.clone(),
                attempt: running.attempts,
            },
        );
        audit::record(
            options.audit.as_deref(),
            AuditEntry::new(AuditEventType::JobStarted)
                .with_session(running.session_id.clone())
                .with_job(running.id.clone(), running.source_path.display().to_string()),
        );

        let report = engine.run(&running).await;
        let retry = report.state == JobState::Unknown
            && running.attempts <= options.retry.unknown_attempts
            && !options.cancel.is_cancelled();
        if !retry {
            return Ok(report);
        }
        warn!(
            job_id = running.id,
            attempt = running.attempts,
            "installer outcome unknown, retrying"
        );
    }
}

async fn skip_remaining(queue: &mut JobQueue, options: &RunOptions) -> Result<()> {
    while let Some(job) = queue.next() {
        queue.skip(&job.id, CANCELLED_MESSAGE).await?;
        info!(job_id = job.id, "job skipped");
        if let Some(skipped) = queue.job(&job.id) {
            let at = skipped.ended_at.unwrap_or_else(Utc::now);
            let report = ExecutionReport {
                state: skipped.state,
                exit_code: None,
                message: skipped.message.clone(),
                started_at: at,
                ended_at: at,
            };
            finished(options, skipped, &report);
        }
    }
    Ok(())
}

fn finished(options: &RunOptions, job: &Job, report: &ExecutionReport) {
    emit(
        options,
        QueueEvent::JobFinished {
            session_id: job.session_id.clone(),
            job_id: job.id.clone(),
            state: report.state,
            exit_code: report.exit_code,
            message: report.message.clone(),
        },
    );
    let mut entry = AuditEntry::new(AuditEventType::JobFinished)
        .with_session(job.session_id.clone())
        .with_job(job.id.clone(), job.source_path.display().to_string())
        .with_times(report.started_at, report.ended_at)
        .with_outcome(report.state.as_str(), report.exit_code);
    if let Some(message) = &report.message {
        entry = entry.with_message(message.clone());
    }
    audit::record(options.audit.as_deref(), entry);
}

fn emit(options: &RunOptions, event: QueueEvent) {
    if let Some(tx) = &options.events {
        if tx.send(event).is_err() {
            warn!("queue event receiver dropped");
        }
    }
}
