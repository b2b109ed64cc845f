//! Error types used by the nodevisor runtime, tasks, and command execution.
//!
//! This module defines three error enums:
//!
//! - [`RuntimeError`] — errors raised by the runtime orchestration itself.
//! - [`TaskError`] — errors raised by individual cooperative task bodies.
//! - [`ExecError`] — errors crossing the command-dispatcher boundary; every
//!   variant renders to a single reply line so no internal detail ever
//!   reaches a remote client.
//!
//! All types provide `as_label()` for logs/metrics; [`ExecError`] additionally
//! provides [`ExecError::to_reply`], the canonical client-facing form.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the runtime orchestration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some tasks remained stuck.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Tags of tasks that did not stop in time.
        stuck: Vec<String>,
    },

    /// The session server could not bind or its accept loop died.
    ///
    /// With no supervising OS process, the runtime reacts with the safe
    /// reboot sequence instead of terminating.
    #[error("session server failed: {reason}")]
    ServerFailed {
        /// What went wrong.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::ServerFailed { .. } => "runtime_server_failed",
        }
    }
}

/// Errors produced by cooperative task bodies.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Non-recoverable error; the task will not be restarted.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The task failed this step; a looped task stops on it.
    #[error("step failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The task observed its cancellation flag and exited.
    #[error("task cancelled")]
    Canceled,
}

impl TaskError {
    /// Returns a short stable label (snake_case) for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }
}

/// Errors crossing the command-dispatcher boundary.
///
/// This is the user-visible error taxonomy: every command, shell, or cron
/// failure is one of these, and each renders to one reply line with a
/// recognizable `[ERR]` marker via [`ExecError::to_reply`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ExecError {
    /// Malformed command line. Reported; the session continues.
    #[error("parse error: {0}")]
    Parse(String),

    /// Bad credential. The session is terminated.
    #[error("authentication failed")]
    Auth,

    /// Unknown module, function, config key, or task tag. Non-fatal.
    #[error("not found: {target}")]
    NotFound {
        /// What could not be resolved.
        target: String,
    },

    /// Task queue or session capacity is full. Non-fatal, explicit busy reply.
    #[error("resource exhausted: queue limit {limit}")]
    ResourceExhausted {
        /// The configured bound that was hit.
        limit: usize,
    },

    /// Module code failed at runtime. Caught at the dispatcher, module kept.
    #[error("{module}->{function}: {error}")]
    Runtime {
        /// Module that was executing.
        module: String,
        /// Function that was executing.
        function: String,
        /// Failure message.
        error: String,
    },

    /// Allocation failure or stale module state. Triggers module-cache
    /// eviction; the caller may retry the command.
    #[error("memory error in module {module}")]
    Memory {
        /// Module whose cached instance is evicted.
        module: String,
    },

    /// I/O failure on a session. Terminates only that session.
    #[error("network error: {0}")]
    Network(String),
}

impl ExecError {
    /// Returns a short stable label (snake_case) for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::Parse(_) => "exec_parse",
            ExecError::Auth => "exec_auth",
            ExecError::NotFound { .. } => "exec_not_found",
            ExecError::ResourceExhausted { .. } => "exec_resource_exhausted",
            ExecError::Runtime { .. } => "exec_runtime",
            ExecError::Memory { .. } => "exec_memory",
            ExecError::Network(_) => "exec_network",
        }
    }

    /// True if the failure indicates corrupted module state: the dispatcher
    /// evicts the module from its load cache so the next call reloads it.
    pub fn evicts_module(&self) -> bool {
        match self {
            ExecError::Memory { .. } => true,
            ExecError::Runtime { error, .. } => {
                error.contains("allocation failed") || error.contains("not loaded")
            }
            _ => false,
        }
    }

    /// Canonical single-line client reply. Never exposes call-stack detail.
    pub fn to_reply(&self) -> String {
        format!("[ERR] {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_is_single_line_with_marker() {
        let err = ExecError::Runtime {
            module: "rgb".into(),
            function: "toggle".into(),
            error: "bad state".into(),
        };
        let reply = err.to_reply();
        assert!(reply.starts_with("[ERR] "), "missing marker: {reply}");
        assert!(!reply.contains('\n'), "reply must be one line: {reply}");
    }

    #[test]
    fn test_eviction_matches_allocation_and_stale_module() {
        let alloc = ExecError::Runtime {
            module: "oled".into(),
            function: "show".into(),
            error: "memory allocation failed, allocating 2049 bytes".into(),
        };
        assert!(alloc.evicts_module());

        let stale = ExecError::Runtime {
            module: "oled".into(),
            function: "show".into(),
            error: "module oled not loaded".into(),
        };
        assert!(stale.evicts_module());

        let plain = ExecError::Runtime {
            module: "oled".into(),
            function: "show".into(),
            error: "invalid argument".into(),
        };
        assert!(!plain.evicts_module());

        assert!(ExecError::Memory { module: "oled".into() }.evicts_module());
    }

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(ExecError::Auth.as_label(), "exec_auth");
        assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
        assert_eq!(
            RuntimeError::GraceExceeded {
                grace: Duration::from_secs(5),
                stuck: vec![]
            }
            .as_label(),
            "runtime_grace_exceeded"
        );
    }
}
