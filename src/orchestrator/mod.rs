//! Queue orchestration.
//!
//! Covers the persisted job queue, the restart coordinator with its
//! relaunch hooks and notices, and the loop that runs a queue to a halt.

pub mod coordinator;
pub mod notify;
pub mod queue;
pub mod runner;
pub mod startup;

pub use coordinator::{CoordinatorState, Entry, EntryMode, MarkerInconsistency, RestartCoordinator};
pub use notify::{ChannelNotifier, ConsoleNotifier, Notifier, ResumeNotice};
pub use queue::JobQueue;
pub use runner::{run_queue, QueueEvent, RunOptions, RunReport};
pub use startup::{platform_hook, AutostartHook, DisabledHook, RelaunchCommand, RunKeyHook, StartupHook};
