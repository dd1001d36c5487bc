//! Restart coordination across process lifetimes.
//!
//! Every process start goes through [`RestartCoordinator::begin`], which
//! looks for a resume marker before any session is created or reloaded.
//!
//! ```text
//! Idle ──restart required──► AwaitingUserLaunch ──resume──► Resuming ──done──► Resumed
//!                                   │                          │
//!                                   └──fresh run──► Abandoned  └──restart required again
//! ```
//!
//! A session interrupted without a marker (the host went down mid-install)
//! is resumed straight from `Idle`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::{self, AuditEntry, AuditEventType, AuditLogger};
use crate::models::job::JobState;
use crate::models::marker::ResumeMarker;
use crate::persistence::store::Store;
use crate::{AppError, Result};

use super::notify::{ConsoleNotifier, Notifier, ResumeNotice};
use super::queue::{JobQueue, INTERRUPTED_MESSAGE};
use super::startup::{DisabledHook, RelaunchCommand, StartupHook};

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No session is waiting on a restart.
    Idle,
    /// A marker is persisted; the queue is halted until the next launch.
    AwaitingUserLaunch,
    /// A halted session has been reloaded and is continuing.
    Resuming,
    /// The resumed session finished and its marker is cleared.
    Resumed,
    /// The user started fresh and the marker was discarded.
    Abandoned,
}

impl CoordinatorState {
    /// Check whether moving to `next` is allowed.
    ///
    /// Besides the basic lifecycle, a resumed session may halt for another
    /// restart, a fresh session started after abandoning may halt too, an
    /// unusable marker drops the coordinator back to `Idle`, and an
    /// interrupted session without a marker resumes from `Idle`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Resuming | Self::Abandoned, Self::AwaitingUserLaunch)
                | (
                    Self::AwaitingUserLaunch,
                    Self::Resuming | Self::Abandoned | Self::Idle
                )
                | (Self::Idle, Self::Resuming)
                | (Self::Resuming, Self::Resumed)
        )
    }

    /// Lower-case name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingUserLaunch => "awaiting_user_launch",
            Self::Resuming => "resuming",
            Self::Resumed => "resumed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// How the current process was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// Ignore any marker and start a new session.
    Fresh,
    /// Load the marker and continue its session.
    Resume,
}

/// A marker or store that could not be trusted and was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerInconsistency {
    /// Session the marker referenced, when one was readable.
    pub session_id: Option<String>,
    /// Why it was discarded.
    pub reason: String,
}

/// Result of [`RestartCoordinator::begin`].
pub enum Entry {
    /// A halted session was reloaded; continue running it.
    Resume(JobQueue),
    /// Nothing to resume; the caller may start a new session.
    Fresh {
        /// Marker discarded because the user chose a fresh run.
        abandoned: Option<ResumeMarker>,
        /// Marker or store discarded because it could not be loaded.
        inconsistency: Option<MarkerInconsistency>,
    },
}

/// Decides fresh-versus-resume and manages the resume marker.
pub struct RestartCoordinator {
    store: Store,
    hook: Arc<dyn StartupHook>,
    notifier: Arc<dyn Notifier>,
    relaunch: Option<RelaunchCommand>,
    audit: Option<Arc<dyn AuditLogger>>,
    store_recovery: Option<String>,
    state: CoordinatorState,
}

impl RestartCoordinator {
    /// Coordinator with no relaunch hook and console notices.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            hook: Arc::new(DisabledHook),
            notifier: Arc::new(ConsoleNotifier),
            relaunch: None,
            audit: None,
            store_recovery: None,
            state: CoordinatorState::Idle,
        }
    }

    /// Register `command` through `hook` whenever a restart is required.
    #[must_use]
    pub fn with_relaunch(mut self, hook: Arc<dyn StartupHook>, command: RelaunchCommand) -> Self {
        self.hook = hook;
        self.relaunch = Some(command);
        self
    }

    /// Deliver resume notices through `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Record marker events in `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Report that the store was unreadable and replaced at open.
    #[must_use]
    pub fn with_store_recovery(mut self, reason: Option<String>) -> Self {
        self.store_recovery = reason;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Store this coordinator writes to.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Process-entry decision.
    ///
    /// Recovers jobs left running by a dead process, then looks for a
    /// marker. In `Resume` mode a valid marker reloads its session; in
    /// `Fresh` mode any marker is abandoned. A marker whose session cannot
    /// be loaded, or that cannot be read at all, is discarded and reported,
    /// and the caller starts fresh. Without any marker, `Resume` mode picks
    /// up the newest session that was interrupted with jobs still pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if called more than once, or
    /// `AppError::Db` if the store cannot be read or the marker cannot be
    /// discarded.
    pub async fn begin(&mut self, mode: EntryMode) -> Result<Entry> {
        if self.state != CoordinatorState::Idle {
            return Err(AppError::InvalidTransition(format!(
                "entry already decided ({})",
                self.state.as_str()
            )));
        }

        self.decide_entry(mode)
            .instrument(info_span!("begin", mode = ?mode))
            .await
    }

    async fn decide_entry(&mut self, mode: EntryMode) -> Result<Entry> {
        let stranded = self.recover_interrupted().await;

        let store_replaced = self.store_recovery.take().map(|reason| {
            warn!(reason, "store was unreadable and has been replaced");
            self.log_inconsistency(None, &reason);
            MarkerInconsistency {
                session_id: None,
                reason,
            }
        });

        let (marker, unreadable) = self.read_marker().await?;
        let recovered = store_replaced.or(unreadable).or(stranded);

        let Some(marker) = marker else {
            if mode == EntryMode::Resume {
                if let Some(mut queue) = self.find_interrupted().await {
                    self.transition(CoordinatorState::Resuming)?;
                    queue.acknowledge_restart().await?;
                    info!(
                        session_id = queue.session().id,
                        remaining = queue.remaining(),
                        "resuming interrupted session without a marker"
                    );
                    return Ok(Entry::Resume(queue));
                }
                info!("no resume marker found");
            } else if let Some(queue) = self.find_interrupted().await {
                warn!(
                    session_id = queue.session().id,
                    remaining = queue.remaining(),
                    "an interrupted session still has pending installers; run `resume` to continue it"
                );
            }
            return Ok(Entry::Fresh {
                abandoned: None,
                inconsistency: recovered,
            });
        };
        self.state = CoordinatorState::AwaitingUserLaunch;

        if mode == EntryMode::Fresh {
            self.discard_for_fresh_run(&marker).await?;
            return Ok(Entry::Fresh {
                abandoned: Some(marker),
                inconsistency: recovered,
            });
        }

        match JobQueue::load(&self.store, &marker.session_id).await {
            Ok(mut queue) => {
                self.transition(CoordinatorState::Resuming)?;
                queue.acknowledge_restart().await?;
                info!(
                    session_id = marker.session_id,
                    remaining = queue.remaining(),
                    "resuming session"
                );
                Ok(Entry::Resume(queue))
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(session_id = marker.session_id, reason, "discarding unusable resume marker");
                self.store.markers().delete(&marker.id).await?;
                self.unregister_hook().await;
                self.log_inconsistency(Some(&marker.session_id), &reason);
                self.transition(CoordinatorState::Idle)?;
                Ok(Entry::Fresh {
                    abandoned: None,
                    inconsistency: Some(MarkerInconsistency {
                        session_id: Some(marker.session_id),
                        reason,
                    }),
                })
            }
        }
    }

    /// Explicitly discard the pending marker without resuming.
    ///
    /// Session and job records are kept. Returns the discarded marker, if
    /// there was one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if a session is already being
    /// resumed or halted in this process, or `AppError::Db` on store failure.
    pub async fn abandon(&mut self) -> Result<Option<ResumeMarker>> {
        if !matches!(
            self.state,
            CoordinatorState::Idle | CoordinatorState::AwaitingUserLaunch
        ) {
            return Err(AppError::InvalidTransition(format!(
                "cannot abandon while {}",
                self.state.as_str()
            )));
        }
        let (marker, _unreadable) = self.read_marker().await?;
        let Some(marker) = marker else {
            return Ok(None);
        };
        self.state = CoordinatorState::AwaitingUserLaunch;
        self.discard_for_fresh_run(&marker).await?;
        Ok(Some(marker))
    }

    /// Halt `queue` for a host restart.
    ///
    /// Writes the marker and the session's restart flag in one transaction,
    /// then registers the relaunch entry and raises the resume notice. Hook
    /// and notice failures are logged and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the coordinator cannot enter
    /// `AwaitingUserLaunch`, or `AppError::Db` if the marker is not written.
    pub async fn on_restart_required(&mut self, queue: &mut JobQueue) -> Result<ResumeMarker> {
        if !self
            .state
            .can_transition_to(CoordinatorState::AwaitingUserLaunch)
        {
            return Err(AppError::InvalidTransition(format!(
                "cannot halt for restart while {}",
                self.state.as_str()
            )));
        }
        let last = queue
            .session()
            .cursor
            .checked_sub(1)
            .and_then(|i| queue.jobs().get(i as usize));
        if last.map(|j| j.state) != Some(JobState::SucceededRestartRequired) {
            return Err(AppError::InvalidTransition(
                "last recorded job did not require a restart".into(),
            ));
        }

        let marker = ResumeMarker::new(queue.session().id.clone());
        queue.pause_for_restart(&marker).await?;
        self.transition(CoordinatorState::AwaitingUserLaunch)?;
        info!(
            session_id = marker.session_id,
            remaining = queue.remaining(),
            "restart required, session halted"
        );

        if let Some(command) = &self.relaunch {
            if let Err(err) = self.hook.register(command).await {
                warn!(hook = self.hook.name(), %err, "auto-relaunch registration failed; resume manually");
            }
        }

        let notice = ResumeNotice {
            session_id: marker.session_id.clone(),
            pending_jobs: queue.remaining(),
            written_at: marker.written_at,
        };
        if let Err(err) = self.notifier.resume_available(&notice).await {
            warn!(%err, "failed to deliver resume notice");
        }

        audit::record(
            self.audit.as_deref(),
            AuditEntry::new(AuditEventType::MarkerWritten)
                .with_session(marker.session_id.clone())
                .with_message(format!("{} job(s) remaining", queue.remaining())),
        );
        Ok(marker)
    }

    /// Complete a resumed session: clear its marker, remove the relaunch
    /// entry and retire the session if every job is terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless a session is being
    /// resumed, or `AppError::Db` if the marker cannot be cleared.
    pub async fn finish_resume(&mut self, queue: &mut JobQueue) -> Result<()> {
        if !self.state.can_transition_to(CoordinatorState::Resumed) {
            return Err(AppError::InvalidTransition(format!(
                "no session is being resumed ({})",
                self.state.as_str()
            )));
        }
        queue.clear_restart().await?;
        self.unregister_hook().await;
        self.transition(CoordinatorState::Resumed)?;
        audit::record(
            self.audit.as_deref(),
            AuditEntry::new(AuditEventType::MarkerCleared).with_session(queue.session().id.clone()),
        );
        info!(session_id = queue.session().id, "resume complete, marker cleared");
        queue.retire().await?;
        Ok(())
    }

    /// Read-only check used by the relaunch helper.
    ///
    /// Returns `None` when no marker exists, the marker is unreadable, or its
    /// session is unreadable.
    ///
    /// # Errors
    ///
    /// Returns any non-database error raised while reading the marker.
    pub async fn pending_notice(store: &Store) -> Result<Option<ResumeNotice>> {
        let marker = match store.markers().latest().await {
            Ok(marker) => marker,
            Err(AppError::Db(reason)) => {
                warn!(reason, "resume marker unreadable");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let Some(marker) = marker else {
            return Ok(None);
        };
        let readable = match store.sessions().get(&marker.session_id).await {
            Ok(_) => store.jobs().list(&marker.session_id).await,
            Err(err) => Err(err),
        };
        let jobs = match readable {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(session_id = marker.session_id, %err, "resume marker references unreadable session");
                return Ok(None);
            }
        };
        Ok(Some(ResumeNotice {
            pending_jobs: jobs.iter().filter(|j| j.state == JobState::Pending).count(),
            session_id: marker.session_id,
            written_at: marker.written_at,
        }))
    }

    fn transition(&mut self, next: CoordinatorState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "coordinator cannot move from {} to {}",
                self.state.as_str(),
                next.as_str()
            )));
        }
        info!(from = self.state.as_str(), to = next.as_str(), "coordinator state changed");
        self.state = next;
        Ok(())
    }

    async fn discard_for_fresh_run(&mut self, marker: &ResumeMarker) -> Result<()> {
        self.store.markers().delete(&marker.id).await?;
        self.unregister_hook().await;
        self.transition(CoordinatorState::Abandoned)?;
        warn!(
            session_id = marker.session_id,
            "resume marker abandoned; pending installers will not run"
        );
        audit::record(
            self.audit.as_deref(),
            AuditEntry::new(AuditEventType::MarkerAbandoned)
                .with_session(marker.session_id.clone()),
        );
        Ok(())
    }

    async fn unregister_hook(&self) {
        if self.relaunch.is_none() {
            return;
        }
        if let Err(err) = self.hook.unregister().await {
            warn!(hook = self.hook.name(), %err, "failed to remove auto-relaunch entry");
        }
    }

    fn log_inconsistency(&self, session_id: Option<&str>, reason: &str) {
        let mut entry = AuditEntry::new(AuditEventType::MarkerInconsistency).with_message(reason);
        if let Some(id) = session_id {
            entry = entry.with_session(id);
        }
        audit::record(self.audit.as_deref(), entry);
    }

    /// Read the newest marker, discarding every marker if the rows are
    /// malformed.
    async fn read_marker(&self) -> Result<(Option<ResumeMarker>, Option<MarkerInconsistency>)> {
        let reason = match self.store.markers().latest().await {
            Ok(marker) => return Ok((marker, None)),
            Err(AppError::Db(reason)) => reason,
            Err(err) => return Err(err),
        };
        let removed = self.store.markers().delete_all().await?;
        warn!(reason, removed, "resume markers unreadable and discarded");
        self.unregister_hook().await;
        let reason = format!("resume marker unreadable: {reason}");
        self.log_inconsistency(None, &reason);
        Ok((
            None,
            Some(MarkerInconsistency {
                session_id: None,
                reason,
            }),
        ))
    }

    /// Settle jobs whose process died mid-install, in every session.
    ///
    /// A running job whose session cannot be loaded is recorded as
    /// `Unknown` directly, so it never holds the running slot; the session
    /// is reported.
    async fn recover_interrupted(&self) -> Option<MarkerInconsistency> {
        let running = match self.store.jobs().list_running().await {
            Ok(running) => running,
            Err(err) => {
                warn!(%err, "cannot scan for interrupted jobs");
                return None;
            }
        };
        let mut stranded = None;
        for mut job in running {
            let Err(err) = JobQueue::load(&self.store, &job.session_id).await else {
                continue;
            };
            let reason = format!("interrupted job {} in unreadable session: {err}", job.id);
            warn!(session_id = job.session_id, reason, "settling interrupted job in place");

            job.state = JobState::Unknown;
            job.message = Some(INTERRUPTED_MESSAGE.into());
            job.ended_at = Some(Utc::now());
            if let Err(err) = self.store.jobs().put(&job).await {
                warn!(job_id = job.id, %err, "cannot settle interrupted job");
                continue;
            }

            self.log_inconsistency(Some(&job.session_id), &reason);
            stranded.get_or_insert(MarkerInconsistency {
                session_id: Some(job.session_id),
                reason,
            });
        }
        stranded
    }

    /// Newest session interrupted without a marker that still has a
    /// pending job.
    ///
    /// Sessions still flagged `restart_pending` had their marker abandoned
    /// and are left alone.
    async fn find_interrupted(&self) -> Option<JobQueue> {
        let sessions = match self.store.sessions().list().await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(%err, "cannot scan for interrupted sessions");
                return None;
            }
        };
        for session in sessions {
            if session.retired_at.is_some() || session.restart_pending || session.is_exhausted() {
                continue;
            }
            match JobQueue::load(&self.store, &session.id).await {
                Ok(queue) if queue.next().is_some() => return Some(queue),
                Ok(_) => {}
                Err(err) => warn!(session_id = session.id, %err, "skipping unreadable session"),
            }
        }
        None
    }
}
