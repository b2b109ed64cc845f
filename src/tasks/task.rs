//! # Task abstraction for cooperative units of work.
//!
//! A [`Task`] is an async, cancelable unit with a stable tag. Its body
//! receives a [`TaskCtx`] carrying the cancellation token and the task's
//! output slot, and must yield at suspension points ([`TaskCtx::step`]) so
//! cancellation is observed promptly. The shared handle type is [`TaskRef`].
//!
//! ## Rules
//! - Cancellation is cooperative only: the body observes the flag at its
//!   next suspension point and finalizes; there is no hard interruption.
//! - The output slot holds the most recent status line, overwritten each
//!   step (`task show <tag>` reads it).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Shared handle to a task implementation.
pub type TaskRef = Arc<dyn Task>;

/// Execution context handed to a task body.
///
/// Cloneable; all clones share the same cancellation token and output slot.
#[derive(Clone)]
pub struct TaskCtx {
    token: CancellationToken,
    out: Arc<RwLock<String>>,
}

impl TaskCtx {
    /// Creates a context from a cancellation token and an output slot.
    pub(crate) fn new(token: CancellationToken, out: Arc<RwLock<String>>) -> Self {
        Self { token, out }
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Cooperative suspension point: sleeps for `delay`, returning `false`
    /// if cancellation arrived during the sleep.
    pub async fn step(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.token.cancelled() => false,
        }
    }

    /// Overwrites the task's last-output line.
    pub fn set_output(&self, msg: impl Into<String>) {
        if let Ok(mut slot) = self.out.write() {
            *slot = msg.into();
        }
    }
}

/// Asynchronous, cancelable unit of work.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use nodevisor::{Task, TaskCtx, TaskError};
///
/// struct Probe;
///
/// #[async_trait]
/// impl Task for Probe {
///     fn name(&self) -> &str { "probe" }
///
///     async fn run(&self, ctx: TaskCtx) -> Result<(), TaskError> {
///         if ctx.is_cancelled() {
///             return Ok(());
///         }
///         ctx.set_output("probe: ok");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Stable task tag. Module-issued tasks use `<module>.<function>`;
    /// system tasks use dot-free tags and bypass the admission queue.
    fn name(&self) -> &str;

    /// Executes the task until completion or observed cancellation.
    async fn run(&self, ctx: TaskCtx) -> Result<(), TaskError>;
}
