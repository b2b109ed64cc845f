//! # Function-backed task (`TaskFn`).
//!
//! [`TaskFn`] wraps a closure `F: Fn(TaskCtx) -> Fut`, producing a fresh
//! future per start. No shared mutable state is implied; if a closure needs
//! state across steps, it captures an `Arc` explicitly.
//!
//! ## Example
//! ```
//! use nodevisor::{TaskCtx, TaskError, TaskFn, TaskRef};
//!
//! let t: TaskRef = TaskFn::arc("heartbeat", |ctx: TaskCtx| async move {
//!     if ctx.is_cancelled() {
//!         return Ok(());
//!     }
//!     ctx.set_output("alive");
//!     Ok::<_, TaskError>(())
//! });
//!
//! assert_eq!(t.name(), "heartbeat");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;
use crate::tasks::task::{Task, TaskCtx, TaskRef};

/// Closure-backed task implementation.
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: Fn(TaskCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    /// Creates a new function-backed task.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the task and returns it as a shared [`TaskRef`].
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> TaskRef {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(TaskCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: TaskCtx) -> Result<(), TaskError> {
        (self.f)(ctx).await
    }
}
