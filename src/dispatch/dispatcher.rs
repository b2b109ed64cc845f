//! # Command dispatcher - tokenized line to typed handler call.
//!
//! Entry point for every command regardless of origin (shell line, cron
//! action, REST path, IRQ command pipe). Resolution order:
//!
//! ```text
//! tokens ──► ">json"? strip, remember          (structured output marker)
//!        ──► "modules"                          (builtin listing)
//!        ──► "task list|show|kill"              (admin intercept, never
//!        │                                       reaches module resolution)
//!        ──► "<mod> <func> ... &" / "&&[ms]"    (register with TaskManager,
//!        │                                       report Start / Busy)
//!        └─► inline: resolve (module, function) ► bind args ► call ► format
//! ```
//!
//! ## Failure semantics
//! - Resolution and runtime failures are caught here and rendered as one
//!   reply line; nothing propagates to the session loop.
//! - A panicking handler is contained (`catch_unwind`) and treated as a
//!   runtime fault.
//! - Faults indicating allocation failure or stale module state evict the
//!   module instance so the next call reloads it fresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use tracing::warn;

use crate::dispatch::registry::ModuleRegistry;
use crate::dispatch::value::CallArgs;
use crate::error::{ExecError, TaskError};
use crate::tasks::{Task, TaskCtx, TaskManager};

const USAGE: &str = "Shell: for hints type help.\nShell: for exec: [1]module [2]function [3...]optional params";

/// Command dispatcher: module resolution, task admission, output formatting.
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    tasks: Arc<TaskManager>,
    min_step: Duration,
}

impl Dispatcher {
    /// Creates the dispatcher over a populated registry and the task manager.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        tasks: Arc<TaskManager>,
        min_step: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            tasks,
            min_step: min_step.max(Duration::from_millis(20)),
        })
    }

    /// The module registry (REST listing, shell help).
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Executes one command line. Returns `(healthy, reply)`; `healthy` is
    /// false for parse/resolution/runtime faults, which are already rendered
    /// into the reply.
    pub async fn execute_line(self: &Arc<Self>, line: &str) -> (bool, String) {
        let mut tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return (false, USAGE.to_string());
        }

        let structured = tokens.last().map(|t| t == ">json").unwrap_or(false);
        if structured {
            tokens.pop();
        }
        if tokens.is_empty() {
            return (false, USAGE.to_string());
        }

        if tokens[0] == "modules" {
            let mut names = self.registry.loaded();
            names.push("task".to_string());
            let reply = if structured {
                json!(names).to_string()
            } else {
                names.join("\n")
            };
            return (true, reply);
        }

        if tokens[0] == "task" {
            return self.task_admin(&tokens, structured).await;
        }

        if tokens.len() > 2 {
            let suffix = tokens
                .last()
                .filter(|t| is_task_suffix(t.as_str()))
                .cloned();
            if let Some(suffix) = suffix {
                tokens.pop();
                return self.spawn_background(tokens, structured, &suffix).await;
            }
        }

        self.run_inline(&tokens, structured).await
    }

    /// Executes `<module> <function> [...]` synchronously and formats the
    /// result. Shared by the inline path, background task steps, cron
    /// actions, and the REST surface.
    pub async fn run_inline(&self, tokens: &[String], structured: bool) -> (bool, String) {
        let (module, function, args) = match split_call(tokens) {
            Ok(parts) => parts,
            Err(e) => return (false, e.to_reply()),
        };
        let instance = match self.registry.resolve(&module) {
            Ok(instance) => instance,
            Err(e) => return (false, e.to_reply()),
        };

        let fut = instance.call(&function, &args);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => (true, value.render(structured)),
            Ok(Err(e)) => {
                if e.evicts_module() {
                    self.registry.evict(&module);
                    warn!(module = %module, "module evicted after fault");
                }
                (false, e.to_reply())
            }
            Err(_) => {
                // A panicked handler means corrupted module state.
                self.registry.evict(&module);
                let e = ExecError::Runtime {
                    module,
                    function,
                    error: "module panicked".into(),
                };
                (false, e.to_reply())
            }
        }
    }

    /// Runs a semicolon-separated command pipe (boot hooks, IRQ callbacks).
    /// `#`-prefixed segments and the `n/a` placeholder are skipped.
    pub async fn exec_pipe(self: &Arc<Self>, raw: &str) -> bool {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("n/a") {
            return true;
        }
        let mut healthy = true;
        for segment in raw.split(';') {
            let segment = segment.trim();
            if segment.is_empty() || segment.starts_with('#') {
                continue;
            }
            let (state, reply) = self.execute_line(segment).await;
            if !state {
                warn!(command = segment, reply = %reply, "pipe command failed");
                healthy = false;
            }
        }
        healthy
    }

    /// Module/function listing for `help [lm]`.
    pub fn help_lines(&self, all: bool) -> Vec<String> {
        let names: Vec<String> = if all {
            self.registry.all().iter().map(|n| n.to_string()).collect()
        } else {
            self.registry.loaded()
        };
        let mut lines = Vec::new();
        for name in names {
            lines.push(format!("   {name}"));
            if let Ok(module) = self.registry.resolve(&name) {
                let pad = " ".repeat(name.len());
                for function in module.functions() {
                    lines.push(format!("   {pad}{function}"));
                }
            }
        }
        lines
    }

    /// `task list|show|kill` administrative intercept.
    async fn task_admin(&self, tokens: &[String], structured: bool) -> (bool, String) {
        match tokens.get(1).map(String::as_str) {
            Some("list") => {
                let rows = self.tasks.list().await;
                if structured {
                    let active: Vec<&str> = rows
                        .iter()
                        .filter(|(_, running)| *running)
                        .map(|(t, _)| t.as_str())
                        .collect();
                    let inactive: Vec<&str> = rows
                        .iter()
                        .filter(|(_, running)| !*running)
                        .map(|(t, _)| t.as_str())
                        .collect();
                    return (
                        true,
                        json!({ "active": active, "inactive": inactive }).to_string(),
                    );
                }
                let mut lines = vec![
                    "---- node tasks ----".to_string(),
                    format!(
                        "#queue: {} #load: {}%\n",
                        self.tasks.queue_free().await,
                        self.tasks.load()
                    ),
                    "#Active   #tag".to_string(),
                ];
                for (tag, _) in rows.iter().filter(|(_, r)| *r) {
                    lines.push(format!("Yes       {tag}"));
                }
                for (tag, _) in rows.iter().filter(|(_, r)| !*r) {
                    lines.push(format!("No        {tag}"));
                }
                (true, lines.join("\n"))
            }
            Some("show") if tokens.len() > 2 => (true, self.tasks.show(&tokens[2]).await),
            Some("kill") if tokens.len() > 2 => {
                let (_state, msg) = self.tasks.kill(&tokens[2]).await;
                (true, msg)
            }
            _ => (
                true,
                "Invalid task cmd! Help: task list / kill <tag> / show <tag>".to_string(),
            ),
        }
    }

    /// Registers the call as a background task instead of running it inline.
    async fn spawn_background(
        self: &Arc<Self>,
        tokens: Vec<String>,
        structured: bool,
        suffix: &str,
    ) -> (bool, String) {
        let looped = suffix.matches('&').count() == 2;
        let digits: String = suffix.chars().filter(char::is_ascii_digit).collect();
        let step = digits
            .parse::<u64>()
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
            .max(self.min_step);

        let (module, function, _args) = match split_call(&tokens) {
            Ok(parts) => parts,
            Err(e) => return (false, e.to_reply()),
        };
        let tag = format!("{module}.{function}");
        let call = BackgroundCall {
            tag: tag.clone(),
            dispatcher: Arc::clone(self),
            tokens,
            structured,
            looped,
            step,
        };

        match self.tasks.spawn_module(Arc::new(call)).await {
            Ok(true) => (true, format!("Start {tag}")),
            Ok(false) => (true, format!("{tag} is Busy")),
            // Queue-full is a valid, handled command: report, don't escalate.
            Err(e) => (true, e.to_reply()),
        }
    }
}

/// True for `&`, `&&`, `&200`, `&&500` style admission suffixes.
fn is_task_suffix(token: &str) -> bool {
    token.starts_with('&')
        && token.chars().all(|c| c == '&' || c.is_ascii_digit())
        && token.matches('&').count() <= 2
}

/// Splits tokens into `(module, function, args)`.
///
/// Accepts both the parenthesized form `mod func(a, b, k=v)` and the bare
/// form `mod func a b`; omitted parentheses imply a zero-argument call.
fn split_call(tokens: &[String]) -> Result<(String, String, CallArgs), ExecError> {
    if tokens.len() < 2 {
        return Err(ExecError::Parse(
            "expected: <module> <function>[(args)]".into(),
        ));
    }
    let module = tokens[0].clone();
    let rest = tokens[1..].join(" ");

    if let Some(open) = rest.find('(') {
        let function = rest[..open].trim().to_string();
        let close = rest
            .rfind(')')
            .ok_or_else(|| ExecError::Parse("missing ')'".into()))?;
        if close < open || function.is_empty() {
            return Err(ExecError::Parse(format!("malformed call '{rest}'")));
        }
        let args = CallArgs::parse(&rest[open + 1..close], true)?;
        Ok((module, function, args))
    } else {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let function = parts.next().unwrap_or_default().trim().to_string();
        if function.is_empty() {
            return Err(ExecError::Parse("missing function name".into()));
        }
        let args = CallArgs::parse(parts.next().unwrap_or_default(), false)?;
        Ok((module, function, args))
    }
}

/// Background wrapper around a dispatcher call (tag `<module>.<function>`).
///
/// One-shot or looped; each step re-invokes the call after a bounded sleep
/// and overwrites the task output with the latest reply. A failing step
/// stops a looped call.
struct BackgroundCall {
    tag: String,
    dispatcher: Arc<Dispatcher>,
    tokens: Vec<String>,
    structured: bool,
    looped: bool,
    step: Duration,
}

#[async_trait]
impl Task for BackgroundCall {
    fn name(&self) -> &str {
        &self.tag
    }

    async fn run(&self, ctx: TaskCtx) -> Result<(), TaskError> {
        loop {
            if !ctx.step(self.step).await {
                return Err(TaskError::Canceled);
            }
            let (state, out) = self
                .dispatcher
                .run_inline(&self.tokens, self.structured)
                .await;
            ctx.set_output(out.clone());
            if !state {
                return Err(TaskError::Fail { error: out });
            }
            if !self.looped {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::registry::CmdValue;
    use crate::events::Bus;
    use tokio_util::sync::CancellationToken;

    struct Counter;

    #[async_trait]
    impl crate::dispatch::registry::CommandModule for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }
        fn functions(&self) -> Vec<&'static str> {
            vec!["status", "boom", "oom"]
        }
        async fn call(&self, function: &str, args: &CallArgs) -> Result<CmdValue, ExecError> {
            match function {
                "status" => Ok(CmdValue::Map(vec![
                    ("count".into(), args.len().to_string()),
                    ("state".into(), "on".into()),
                ])),
                "boom" => Err(ExecError::Runtime {
                    module: "counter".into(),
                    function: "boom".into(),
                    error: "bad input".into(),
                }),
                "oom" => Err(ExecError::Memory {
                    module: "counter".into(),
                }),
                other => Err(ExecError::NotFound {
                    target: format!("counter.{other}"),
                }),
            }
        }
    }

    fn dispatcher(queue: usize) -> Arc<Dispatcher> {
        let mut registry = ModuleRegistry::new();
        registry.register("counter", || Ok(Arc::new(Counter) as _));
        let tasks = TaskManager::new(Bus::new(64), CancellationToken::new(), queue);
        Dispatcher::new(Arc::new(registry), tasks, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_inline_plain_and_structured_output() {
        let d = dispatcher(4);
        let (ok, plain) = d.execute_line("counter status(1, 2)").await;
        assert!(ok);
        assert_eq!(plain, " count: 2\n state: on");

        let (ok, js) = d.execute_line("counter status >json").await;
        assert!(ok);
        let parsed: serde_json::Value = serde_json::from_str(&js).expect("json output");
        assert_eq!(parsed["state"], "on");
    }

    #[tokio::test]
    async fn test_task_admin_never_reaches_module_resolution() {
        let d = dispatcher(4);
        let (ok, reply) = d.execute_line("task list").await;
        assert!(ok);
        assert!(reply.contains("#queue:"), "got: {reply}");

        let (ok, reply) = d.execute_line("task kill ghost.*").await;
        assert!(ok, "kill of unknown tag is handled, not an error");
        assert!(reply.contains("No task found"));

        let (ok, reply) = d.execute_line("task explode").await;
        assert!(ok);
        assert!(reply.contains("Invalid task cmd"));
    }

    #[tokio::test]
    async fn test_background_start_and_busy() {
        let d = dispatcher(4);
        let (ok, reply) = d.execute_line("counter status x &&100").await;
        assert!(ok);
        assert_eq!(reply, "Start counter.status");

        let (ok, reply) = d.execute_line("counter status x &&100").await;
        assert!(ok);
        assert_eq!(reply, "counter.status is Busy");

        // The looped task keeps refreshing its output slot.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let (_, shown) = d.execute_line("task show counter.status").await;
        assert!(shown.contains("state: on"), "got: {shown}");

        let (ok, reply) = d.execute_line("task kill counter.*").await;
        assert!(ok);
        assert!(reply.contains("counter.status"), "got: {reply}");
    }

    #[tokio::test]
    async fn test_background_queue_full_reports_busy_reply() {
        let d = dispatcher(1);
        let (ok, first) = d.execute_line("counter status a &&50").await;
        assert!(ok);
        assert_eq!(first, "Start counter.status");

        // Different tag, same bounded queue: handled reply, no escalation.
        let (ok, second) = d.execute_line("counter boom b &").await;
        assert!(ok, "queue-full must be a handled command");
        assert!(second.contains("resource exhausted"), "got: {second}");
    }

    #[tokio::test]
    async fn test_runtime_fault_is_one_line_and_module_survives() {
        let d = dispatcher(4);
        let (ok, reply) = d.execute_line("counter boom").await;
        assert!(!ok);
        assert!(reply.starts_with("[ERR] "), "got: {reply}");
        assert_eq!(d.registry().loaded(), vec!["counter".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_fault_evicts_module_cache() {
        let d = dispatcher(4);
        let (_, _) = d.execute_line("counter status").await;
        assert_eq!(d.registry().loaded(), vec!["counter".to_string()]);

        let (ok, reply) = d.execute_line("counter oom").await;
        assert!(!ok);
        assert!(reply.contains("memory error"), "got: {reply}");
        assert!(d.registry().loaded().is_empty(), "instance must be evicted");

        // Retry reloads the module fresh.
        let (ok, _) = d.execute_line("counter status").await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_exec_pipe_skips_comments_and_na() {
        let d = dispatcher(4);
        assert!(d.exec_pipe("n/a").await);
        assert!(d.exec_pipe("#counter boom; counter status").await);
        assert!(!d.exec_pipe("counter boom; counter status").await);
    }

    #[test]
    fn test_task_suffix_detection() {
        assert!(is_task_suffix("&"));
        assert!(is_task_suffix("&&"));
        assert!(is_task_suffix("&200"));
        assert!(is_task_suffix("&&500"));
        assert!(!is_task_suffix(">json"));
        assert!(!is_task_suffix("&&&"));
        assert!(!is_task_suffix("a&b"));
    }
}
