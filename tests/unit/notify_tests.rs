//! Unit tests for resume notices.

use chrono::Utc;

use install_queue::orchestrator::{ChannelNotifier, ConsoleNotifier, Notifier, ResumeNotice};

fn notice(pending_jobs: usize) -> ResumeNotice {
    ResumeNotice {
        session_id: "s1".into(),
        pending_jobs,
        written_at: Utc::now(),
    }
}

/// The headline names the session and pluralises the count.
#[test]
fn headline_text() {
    assert_eq!(
        notice(1).headline(),
        "installation session s1 is waiting to resume (1 installer left)"
    );
    assert_eq!(
        notice(3).headline(),
        "installation session s1 is waiting to resume (3 installers left)"
    );
}

/// The channel notifier forwards the notice unchanged.
#[tokio::test]
async fn channel_notifier_delivers() {
    let (notifier, mut rx) = ChannelNotifier::new();
    let sent = notice(2);
    notifier.resume_available(&sent).await.expect("notify");
    assert_eq!(rx.recv().await, Some(sent));
}

/// A dropped receiver does not fail delivery.
#[tokio::test]
async fn channel_notifier_tolerates_dropped_receiver() {
    let (notifier, rx) = ChannelNotifier::new();
    drop(rx);
    assert!(notifier.resume_available(&notice(1)).await.is_ok());
}

/// The console notifier prints without error.
#[tokio::test]
async fn console_notifier_succeeds() {
    assert!(ConsoleNotifier.resume_available(&notice(1)).await.is_ok());
}
