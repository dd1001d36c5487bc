//! User-facing "resume available" notices.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::Result;

/// Tells the user a halted session can be resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeNotice {
    /// Session waiting to resume.
    pub session_id: String,
    /// Jobs not yet attempted.
    pub pending_jobs: usize,
    /// When the session was halted.
    pub written_at: DateTime<Utc>,
}

impl ResumeNotice {
    /// One-line description suitable for a console banner.
    #[must_use]
    pub fn headline(&self) -> String {
        format!(
            "installation session {} is waiting to resume ({} installer{} left)",
            self.session_id,
            self.pending_jobs,
            if self.pending_jobs == 1 { "" } else { "s" }
        )
    }
}

/// Delivers resume notices to the user.
pub trait Notifier: Send + Sync {
    /// Deliver one notice.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the notice cannot be delivered.
    fn resume_available<'a>(
        &'a self,
        notice: &'a ResumeNotice,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Prints notices to stderr and the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn resume_available<'a>(
        &'a self,
        notice: &'a ResumeNotice,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                session_id = notice.session_id,
                pending_jobs = notice.pending_jobs,
                "resume available"
            );
            let mut stderr = std::io::stderr().lock();
            writeln!(stderr, "{}", notice.headline())
                .and_then(|()| {
                    writeln!(
                        stderr,
                        "run `install-queue resume` to continue or `install-queue abandon` to discard it"
                    )
                })
                .map_err(|err| crate::AppError::Io(format!("failed to print notice: {err}")))
        })
    }
}

/// Forwards notices over a channel; used by embedders and tests.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ResumeNotice>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResumeNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn resume_available<'a>(
        &'a self,
        notice: &'a ResumeNotice,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.tx.send(notice.clone()).is_err() {
                warn!("notice receiver dropped");
            }
            Ok(())
        })
    }
}
