//! # Task manager - live-task registry and bounded admission.
//!
//! Owns every cooperative task in the runtime, keyed by tag. Admission,
//! busy-detection, listing, output inspection, and cooperative cancellation
//! all go through here; no other component holds a task reference across a
//! suspension point.
//!
//! ## Architecture
//! ```text
//! Shell "mod func &"  ──► Dispatcher ──► spawn_module()   (queue-bounded)
//! boot / IRQ / server ───────────────► spawn_system()    (unbounded)
//!                                          │
//!                                          ▼
//!                        HashMap<tag, TaskHandle>   (join, cancel, done, out)
//!                                          │
//!            task list / show / kill ──────┘   (wildcard: module.*)
//! ```
//!
//! ## Rules
//! - Tag uniqueness: a tag busy (not Done) at admission time is never
//!   started again; the caller is told `false`, not an error.
//! - Module tasks (tag contains `.`) are admitted against a bounded queue;
//!   hitting the bound is `ResourceExhausted`, never blocking.
//! - System tasks (dot-free tags) are exempt from the queue bound.
//! - Admission is decided inside one registry lock section, atomically with
//!   respect to cooperative yields.
//! - Cancellation is cooperative: `kill` sets the token and joins; the body
//!   finalizes at its next suspension point.
//! - Finished (Done) handles stay listed for `task show` until the passive
//!   sweep evicts the oldest beyond the queue size.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::task::{TaskCtx, TaskRef};

/// Handle to one registered task.
struct TaskHandle {
    /// Join handle for the task's future.
    join: JoinHandle<()>,
    /// Per-task cancellation token (child of the runtime token).
    cancel: CancellationToken,
    /// Monotonic Done flag: set once, never reverts.
    done: Arc<AtomicBool>,
    /// Most recent status line, overwritten each step.
    out: Arc<StdRwLock<String>>,
}

impl TaskHandle {
    fn running(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }

    fn output(&self) -> String {
        self.out.read().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Live-task registry with bounded module-task admission.
pub struct TaskManager {
    tasks: RwLock<HashMap<String, TaskHandle>>,
    bus: Bus,
    runtime_token: CancellationToken,
    queue_size: usize,
    /// Smoothed load percentage derived by the idle task.
    load: AtomicI64,
}

impl TaskManager {
    /// Creates a new registry bound to the runtime cancellation token.
    pub fn new(bus: Bus, runtime_token: CancellationToken, queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            tasks: RwLock::new(HashMap::new()),
            bus,
            runtime_token,
            queue_size: queue_size.max(1),
            load: AtomicI64::new(0),
        })
    }

    /// True iff a task with this tag exists and is not yet Done.
    pub async fn is_busy(&self, tag: &str) -> bool {
        self.tasks
            .read()
            .await
            .get(tag)
            .map(TaskHandle::running)
            .unwrap_or(false)
    }

    /// Admits a system task (dot-free tag convention): never limited by the
    /// module queue. Returns `false` without error if the tag is busy.
    pub async fn spawn_system(&self, task: TaskRef) -> bool {
        match self.admit(task, false).await {
            Ok(started) => started,
            // Unreachable for unlimited admission; kept total.
            Err(_) => false,
        }
    }

    /// Admits a module-issued task (tag `<module>.<function>`).
    ///
    /// Returns `Ok(false)` if the tag is busy, `ResourceExhausted` if the
    /// number of live module tasks already equals the queue size. The
    /// registry is left unchanged on failure.
    pub async fn spawn_module(&self, task: TaskRef) -> Result<bool, ExecError> {
        self.admit(task, true).await
    }

    /// Single-lock admission: busy check, optional queue check, spawn, insert.
    async fn admit(&self, task: TaskRef, module_limited: bool) -> Result<bool, ExecError> {
        let tag = task.name().to_string();
        {
            let mut map = self.tasks.write().await;
            if let Some(existing) = map.get(&tag) {
                if existing.running() {
                    return Ok(false);
                }
            }
            if module_limited {
                let live = map
                    .iter()
                    .filter(|(t, h)| t.contains('.') && h.running())
                    .count();
                if live >= self.queue_size {
                    drop(map);
                    self.bus.publish(
                        Event::now(EventKind::QueueFull)
                            .with_task(tag.as_str())
                            .with_reason(format!("queue limit {}", self.queue_size)),
                    );
                    return Err(ExecError::ResourceExhausted {
                        limit: self.queue_size,
                    });
                }
            }

            let cancel = self.runtime_token.child_token();
            let done = Arc::new(AtomicBool::new(false));
            let out = Arc::new(StdRwLock::new(String::new()));
            let ctx = TaskCtx::new(cancel.clone(), Arc::clone(&out));

            let bus = self.bus.clone();
            let done_flag = Arc::clone(&done);
            let task_tag = tag.clone();
            let join = tokio::spawn(async move {
                bus.publish(Event::now(EventKind::TaskStarting).with_task(task_tag.as_str()));
                let result = task.run(ctx).await;
                done_flag.store(true, Ordering::SeqCst);
                match result {
                    Ok(()) | Err(TaskError::Canceled) => {
                        bus.publish(Event::now(EventKind::TaskStopped).with_task(task_tag.as_str()));
                    }
                    Err(e) => {
                        bus.publish(
                            Event::now(EventKind::TaskFailed)
                                .with_task(task_tag.as_str())
                                .with_reason(e.to_string()),
                        );
                    }
                }
            });

            map.insert(
                tag,
                TaskHandle {
                    join,
                    cancel,
                    done,
                    out,
                },
            );
        }
        self.gc_passive().await;
        Ok(true)
    }

    /// Snapshot of every registered tag with its running state, sorted.
    pub async fn list(&self) -> Vec<(String, bool)> {
        let map = self.tasks.read().await;
        let mut rows: Vec<(String, bool)> = map
            .iter()
            .map(|(tag, handle)| (tag.clone(), handle.running()))
            .collect();
        rows.sort_unstable();
        rows
    }

    /// Number of live module-issued tasks (dotted tags).
    pub async fn module_queue_len(&self) -> usize {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|(tag, handle)| tag.contains('.') && handle.running())
            .count()
    }

    /// Remaining module-task admission headroom.
    pub async fn queue_free(&self) -> usize {
        self.queue_size.saturating_sub(self.module_queue_len().await)
    }

    /// Buffered output of one task, or of every task of a module (`module.*`).
    pub async fn show(&self, pattern: &str) -> String {
        let map = self.tasks.read().await;
        let tags = Self::resolve_tags(&map, pattern);
        match tags.len() {
            0 => format!("No task found: {pattern}"),
            1 => map
                .get(&tags[0])
                .map(TaskHandle::output)
                .unwrap_or_default(),
            _ => tags
                .iter()
                .filter_map(|t| map.get(t).map(|h| format!("{t}: {}", h.output())))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Cooperatively cancels one task or a module group (`module.*`).
    ///
    /// Sets each cancellation token, then joins: the bodies observe the flag
    /// at their next suspension point and finalize. A pattern matching no
    /// task reports "not found" rather than raising.
    pub async fn kill(&self, pattern: &str) -> (bool, String) {
        let victims: Vec<(String, TaskHandle)> = {
            let mut map = self.tasks.write().await;
            let tags = Self::resolve_tags(&map, pattern);
            tags.into_iter()
                .filter_map(|tag| map.remove(&tag).map(|handle| (tag, handle)))
                .collect()
        };
        if victims.is_empty() {
            return (false, format!("No task found: {pattern}"));
        }

        let mut killed = Vec::with_capacity(victims.len());
        for (tag, handle) in victims {
            handle.cancel.cancel();
            let _ = handle.join.await;
            self.bus
                .publish(Event::now(EventKind::TaskKilled).with_task(tag.as_str()));
            killed.push(tag);
        }
        (true, format!("Kill: {}", killed.join(", ")))
    }

    /// Teardown: cancel everything, then join everything.
    pub async fn cancel_all(&self) {
        let handles: Vec<(String, TaskHandle)> = {
            let mut map = self.tasks.write().await;
            map.drain().collect()
        };
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (_, handle) in handles {
            let _ = handle.join.await;
        }
    }

    /// Teardown with a grace window: cancel everything, join until the
    /// deadline, report the tags that failed to stop in time.
    pub async fn cancel_all_within(&self, grace: std::time::Duration) -> Result<(), Vec<String>> {
        let handles: Vec<(String, TaskHandle)> = {
            let mut map = self.tasks.write().await;
            map.drain().collect()
        };
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }

        let deadline = tokio::time::Instant::now() + grace;
        let mut stuck = Vec::new();
        for (tag, handle) in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle.join).await.is_err() {
                stuck.push(tag);
            }
        }
        if stuck.is_empty() {
            Ok(())
        } else {
            stuck.sort_unstable();
            Err(stuck)
        }
    }

    /// Tags of tasks still running (stuck-task report during shutdown).
    pub async fn running_tags(&self) -> Vec<String> {
        let map = self.tasks.read().await;
        let mut tags: Vec<String> = map
            .iter()
            .filter(|(_, h)| h.running())
            .map(|(t, _)| t.clone())
            .collect();
        tags.sort_unstable();
        tags
    }

    /// Smoothed system load percentage (idle-task drift estimate).
    pub fn load(&self) -> i64 {
        self.load.load(Ordering::Relaxed)
    }

    /// Folds a new drift sample into the smoothed load average.
    pub fn update_load(&self, sample_pct: i64) {
        let prev = self.load.load(Ordering::Relaxed);
        self.load.store((prev + sample_pct) / 2, Ordering::Relaxed);
    }

    /// Passive sweep: evicts Done handles once they reach the queue size,
    /// keeping the registry bounded. Live tasks are never touched.
    async fn gc_passive(&self) {
        let mut map = self.tasks.write().await;
        let mut done_tags: Vec<String> = map
            .iter()
            .filter(|(_, h)| !h.running())
            .map(|(t, _)| t.clone())
            .collect();
        if done_tags.len() >= self.queue_size {
            done_tags.sort_unstable();
            let excess = done_tags.len() - self.queue_size + 1;
            for tag in done_tags.into_iter().take(excess) {
                map.remove(&tag);
            }
        }
    }

    /// Exact tag, or `module.*` expansion to every tag of that module.
    fn resolve_tags(map: &HashMap<String, TaskHandle>, pattern: &str) -> Vec<String> {
        if map.contains_key(pattern) {
            return vec![pattern.to_string()];
        }
        if let Some(module) = pattern.strip_suffix(".*") {
            let prefix = format!("{module}.");
            let mut tags: Vec<String> = map
                .keys()
                .filter(|tag| tag.starts_with(&prefix))
                .cloned()
                .collect();
            tags.sort_unstable();
            return tags;
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::task_fn::TaskFn;
    use std::time::Duration;

    fn manager(queue: usize) -> Arc<TaskManager> {
        TaskManager::new(Bus::new(64), CancellationToken::new(), queue)
    }

    fn ticker(tag: &'static str) -> TaskRef {
        TaskFn::arc(tag, |ctx: TaskCtx| async move {
            while ctx.step(Duration::from_millis(10)).await {
                ctx.set_output("ticking");
            }
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_tag_uniqueness_among_live_tasks() {
        let mgr = manager(4);
        assert!(mgr.spawn_system(ticker("idle")).await);
        assert!(!mgr.spawn_system(ticker("idle")).await, "busy tag re-admitted");
        assert!(mgr.is_busy("idle").await);

        let (ok, _) = mgr.kill("idle").await;
        assert!(ok);
        assert!(!mgr.is_busy("idle").await);
    }

    #[tokio::test]
    async fn test_module_queue_bound_is_exhausted_not_blocking() {
        let mgr = manager(2);
        assert!(mgr.spawn_module(ticker("led.fade")).await.expect("admit 1"));
        assert!(mgr.spawn_module(ticker("oled.clock")).await.expect("admit 2"));

        let refused = mgr.spawn_module(ticker("buzzer.beep")).await;
        assert!(
            matches!(refused, Err(ExecError::ResourceExhausted { limit: 2 })),
            "third module task must hit the bound"
        );
        assert!(!mgr.is_busy("buzzer.beep").await, "registry unchanged on refusal");

        // System tasks are exempt from the module queue.
        assert!(mgr.spawn_system(ticker("server")).await);
    }

    #[tokio::test]
    async fn test_kill_wildcard_and_not_found() {
        let mgr = manager(4);
        assert!(mgr.spawn_module(ticker("led.fade")).await.expect("admit"));
        assert!(mgr.spawn_module(ticker("led.blink")).await.expect("admit"));

        let (ok, msg) = mgr.kill("led.*").await;
        assert!(ok, "group kill failed: {msg}");
        assert!(msg.contains("led.blink") && msg.contains("led.fade"));

        let (ok, msg) = mgr.kill("nonexistent.*").await;
        assert!(!ok);
        assert!(msg.contains("No task found"), "got: {msg}");
    }

    #[tokio::test]
    async fn test_list_reflects_registry_exactly() {
        let mgr = manager(4);
        assert!(mgr.spawn_system(ticker("idle")).await);
        assert!(mgr.spawn_module(ticker("led.fade")).await.expect("admit"));

        let rows = mgr.list().await;
        let tags: Vec<&str> = rows.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, vec!["idle", "led.fade"]);
        assert!(rows.iter().all(|(_, running)| *running));

        mgr.kill("led.*").await;
        let tags: Vec<String> = mgr.list().await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec!["idle".to_string()]);
    }

    #[tokio::test]
    async fn test_show_reads_last_output() {
        let mgr = manager(4);
        let task = TaskFn::arc("probe.once", |ctx: TaskCtx| async move {
            ctx.set_output("probe: 42");
            Ok(())
        });
        assert!(mgr.spawn_module(task).await.expect("admit"));
        // Let the one-shot body run to completion.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mgr.show("probe.once").await, "probe: 42");
        assert_eq!(mgr.show("ghost.*").await, "No task found: ghost.*");
    }

    #[tokio::test]
    async fn test_done_state_is_monotonic_and_frees_tag() {
        let mgr = manager(4);
        let task = TaskFn::arc("net.scan", |_ctx: TaskCtx| async move { Ok(()) });
        assert!(mgr.spawn_module(task).await.expect("admit"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!mgr.is_busy("net.scan").await, "finished task still busy");

        // Finished tag may be reused.
        let again = TaskFn::arc("net.scan", |_ctx: TaskCtx| async move { Ok(()) });
        assert!(mgr.spawn_module(again).await.expect("re-admit after done"));
    }

    #[tokio::test]
    async fn test_random_create_cancel_keeps_single_live_tag() {
        let mgr = manager(8);
        // Interleave creates and kills; after every operation at most one
        // live task per tag may exist.
        for round in 0..20u32 {
            let tag: &'static str = if round % 2 == 0 { "a.x" } else { "b.y" };
            let _ = mgr.spawn_module(ticker(tag)).await;
            if round % 3 == 0 {
                let _ = mgr.kill(tag).await;
            }
            let rows = mgr.list().await;
            let mut live: Vec<&str> = rows
                .iter()
                .filter(|(_, running)| *running)
                .map(|(t, _)| t.as_str())
                .collect();
            let before = live.len();
            live.dedup();
            assert_eq!(before, live.len(), "duplicate live tag after round {round}");
        }
    }
}
