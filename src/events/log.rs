//! Structured-log subscriber: renders runtime events through `tracing`.

use async_trait::async_trait;
use tracing::{info, warn};

use super::event::{Event, EventKind};
use super::set::Subscribe;

/// Default observability sink: one `tracing` line per event.
///
/// Task and session failures log at `warn`, everything else at `info`.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let session = e.session.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskStarting => info!(seq = e.seq, task, "task starting"),
            EventKind::TaskStopped => info!(seq = e.seq, task, "task stopped"),
            EventKind::TaskFailed => warn!(seq = e.seq, task, reason, "task failed"),
            EventKind::TaskKilled => info!(seq = e.seq, task, "task killed"),
            EventKind::QueueFull => warn!(seq = e.seq, task, reason, "task queue full"),
            EventKind::SessionOpened => info!(seq = e.seq, session, "session opened"),
            EventKind::SessionClosed => info!(seq = e.seq, session, "session closed"),
            EventKind::SessionEvicted => info!(seq = e.seq, session, "idle session evicted"),
            EventKind::SessionRejected => warn!(seq = e.seq, session, "connection rejected: busy"),
            EventKind::CronFired => info!(seq = e.seq, action = task, spec = reason, "cron fired"),
            EventKind::CronSuppressed => {
                info!(seq = e.seq, action = task, "cron fire suppressed (window)")
            }
            EventKind::IrqDropped => warn!(seq = e.seq, reason, "deferred irq dropped"),
            EventKind::ShutdownRequested => info!(seq = e.seq, "shutdown requested"),
            EventKind::RebootRequested => warn!(seq = e.seq, reason, "reboot requested"),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
