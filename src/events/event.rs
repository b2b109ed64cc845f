//! # Runtime events emitted by the task manager, server, and scheduler.
//!
//! [`EventKind`] classifies events across the runtime's domains:
//! - **Task lifecycle**: starting, stopped, failed, killed, queue-full
//! - **Sessions**: opened, closed, evicted, rejected
//! - **Scheduler**: cron fired / suppressed (dedup window hit)
//! - **Interrupts**: deferred work dropped by the busy guard
//! - **Runtime**: shutdown and reboot requests
//!
//! Each event carries a globally unique, monotonically increasing sequence
//! number (`seq`); use it to restore order when events are observed through
//! independent subscriber queues.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Task lifecycle ===
    /// A task was admitted and its body is starting. Sets `task`.
    TaskStarting,
    /// A task completed or exited after cancellation. Sets `task`.
    TaskStopped,
    /// A task body returned an error. Sets `task`, `reason`.
    TaskFailed,
    /// A task was cancelled through `kill`. Sets `task`.
    TaskKilled,
    /// Module-task admission was refused: queue full. Sets `task`, `reason`.
    QueueFull,

    // === Sessions ===
    /// A client connection was admitted. Sets `session`.
    SessionOpened,
    /// A session ended (exit, error, or teardown). Sets `session`.
    SessionClosed,
    /// An idle session was closed to admit a new client. Sets `session`.
    SessionEvicted,
    /// A connection was refused: capacity full, nothing evictable. Sets `session`.
    SessionRejected,

    // === Scheduler ===
    /// A cron spec matched and its action ran. Sets `task` (action), `reason` (spec).
    CronFired,
    /// A cron match was suppressed by the fire-once window. Sets `task`.
    CronSuppressed,

    // === Interrupts ===
    /// A deferred interrupt occurrence was dropped by the busy guard. Sets `reason`.
    IrqDropped,

    // === Runtime ===
    /// OS termination signal observed; graceful shutdown begins.
    ShutdownRequested,
    /// A reboot was requested (shell `reboot` or fatal server defect). Sets `reason`.
    RebootRequested,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task tag, if applicable.
    pub task: Option<Arc<str>>,
    /// Session id, if applicable.
    pub session: Option<Arc<str>>,
    /// Human-readable detail (errors, spec text, drop cause).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with the current timestamp and the
    /// next global sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            session: None,
            reason: None,
        }
    }

    /// Attaches a task tag.
    #[inline]
    pub fn with_task(mut self, tag: impl Into<Arc<str>>) -> Self {
        self.task = Some(tag.into());
        self
    }

    /// Attaches a session id.
    #[inline]
    pub fn with_session(mut self, id: impl Into<Arc<str>>) -> Self {
        self.session = Some(id.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::now(EventKind::TaskStarting);
        let b = Event::now(EventKind::TaskStopped);
        assert!(b.seq > a.seq, "seq must increase: {} then {}", a.seq, b.seq);
    }

    #[test]
    fn test_builders_attach_fields() {
        let ev = Event::now(EventKind::CronFired)
            .with_task("system heartbeat")
            .with_reason("*:12:0:0");
        assert_eq!(ev.task.as_deref(), Some("system heartbeat"));
        assert_eq!(ev.reason.as_deref(), Some("*:12:0:0"));
        assert!(ev.session.is_none());
    }
}
