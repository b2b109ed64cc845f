//! # Interrupt-deferred execution.
//!
//! Timer "interrupts" never run command logic in posting context: the
//! poster drops a unit of work into a single-slot queue and the cooperative
//! loop drains it. A busy guard discards an occurrence when the previous
//! occurrence's deferred work has not completed yet, bounding interrupt
//! pressure instead of queueing it.
//!
//! ```text
//! TimerIrq (period)  ──┐                       ┌─► exec_pipe(command pipe)
//!                      ├─► IrqSlot::post ──► IrqDrain ──┤
//! CronIrq (tick)     ──┘    (cap 1 + guard)   └─► Scheduler::tick_now
//!        guard busy / slot full ──► occurrence dropped (IrqDropped event)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dispatch::Dispatcher;
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::sched::Scheduler;
use crate::tasks::{Task, TaskCtx};

/// One deferred unit of interrupt work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrqWork {
    /// Execute a command pipe (the configured timer callback).
    Pipe(Arc<str>),
    /// Evaluate one cron scheduler tick.
    CronTick,
}

impl IrqWork {
    fn label(&self) -> &str {
        match self {
            IrqWork::Pipe(_) => "timer pipe",
            IrqWork::CronTick => "cron tick",
        }
    }
}

/// Posting side of the deferral queue. Cheap to clone; every clone shares
/// the slot and the busy guard.
#[derive(Clone)]
pub struct IrqSlot {
    tx: mpsc::Sender<IrqWork>,
    busy: Arc<AtomicBool>,
    bus: Bus,
}

impl IrqSlot {
    /// Creates the slot and its drain receiver.
    pub fn new(bus: Bus) -> (Self, mpsc::Receiver<IrqWork>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                tx,
                busy: Arc::new(AtomicBool::new(false)),
                bus,
            },
            rx,
        )
    }

    /// Posts deferred work; an occurrence arriving while the previous one
    /// is still pending or executing is dropped, not queued.
    pub fn post(&self, work: IrqWork) -> bool {
        if self.busy.load(Ordering::SeqCst) {
            self.drop_occurrence(&work, "previous occurrence still executing");
            return false;
        }
        match self.tx.try_send(work) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(work)) => {
                self.drop_occurrence(&work, "slot full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(work)) => {
                self.drop_occurrence(&work, "drain gone");
                false
            }
        }
    }

    fn drop_occurrence(&self, work: &IrqWork, why: &str) {
        self.bus.publish(
            Event::now(EventKind::IrqDropped).with_reason(format!("{}: {why}", work.label())),
        );
    }

    fn busy_guard(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.busy)
    }
}

/// Cooperative drain: executes deferred work on the main loop.
pub struct IrqDrain {
    rx: tokio::sync::Mutex<mpsc::Receiver<IrqWork>>,
    busy: Arc<AtomicBool>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Option<Arc<Scheduler>>,
}

impl IrqDrain {
    /// Creates the drain task over the slot's receiver.
    pub fn new(
        slot: &IrqSlot,
        rx: mpsc::Receiver<IrqWork>,
        dispatcher: Arc<Dispatcher>,
        scheduler: Option<Arc<Scheduler>>,
    ) -> Self {
        Self {
            rx: tokio::sync::Mutex::new(rx),
            busy: slot.busy_guard(),
            dispatcher,
            scheduler,
        }
    }
}

#[async_trait]
impl Task for IrqDrain {
    fn name(&self) -> &str {
        "irq"
    }

    async fn run(&self, ctx: TaskCtx) -> Result<(), TaskError> {
        let mut rx = self.rx.lock().await;
        loop {
            let work = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                work = rx.recv() => match work {
                    Some(work) => work,
                    None => return Ok(()),
                },
            };

            self.busy.store(true, Ordering::SeqCst);
            match &work {
                IrqWork::Pipe(pipe) => {
                    let healthy = self.dispatcher.exec_pipe(pipe).await;
                    ctx.set_output(format!(
                        "timer pipe: {}",
                        if healthy { "ok" } else { "failed" }
                    ));
                }
                IrqWork::CronTick => {
                    if let Some(scheduler) = &self.scheduler {
                        let fired = scheduler.tick_now().await;
                        if fired {
                            ctx.set_output("cron tick: fired");
                        }
                    }
                }
            }
            self.busy.store(false, Ordering::SeqCst);
        }
    }
}

/// Periodic timer interrupt posting the configured command pipe.
pub struct TimerIrq {
    slot: IrqSlot,
    pipe: Arc<str>,
    period: Duration,
}

impl TimerIrq {
    /// Creates the ticker for `timirqcbf`-style command pipes.
    pub fn new(slot: IrqSlot, pipe: impl Into<Arc<str>>, period: Duration) -> Self {
        Self {
            slot,
            pipe: pipe.into(),
            period: period.max(Duration::from_millis(100)),
        }
    }
}

#[async_trait]
impl Task for TimerIrq {
    fn name(&self) -> &str {
        "timirq"
    }

    async fn run(&self, ctx: TaskCtx) -> Result<(), TaskError> {
        ctx.set_output(format!("period {}ms", self.period.as_millis()));
        while ctx.step(self.period).await {
            self.slot.post(IrqWork::Pipe(Arc::clone(&self.pipe)));
        }
        Ok(())
    }
}

/// Periodic cron tick poster.
pub struct CronIrq {
    slot: IrqSlot,
    period: Duration,
}

impl CronIrq {
    /// Creates the cron ticker at the scheduler's tick granularity.
    pub fn new(slot: IrqSlot, period: Duration) -> Self {
        Self {
            slot,
            period: period.max(Duration::from_millis(100)),
        }
    }
}

#[async_trait]
impl Task for CronIrq {
    fn name(&self) -> &str {
        "cron"
    }

    async fn run(&self, ctx: TaskCtx) -> Result<(), TaskError> {
        ctx.set_output(format!("tick {}ms", self.period.as_millis()));
        while ctx.step(self.period).await {
            self.slot.post(IrqWork::CronTick);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CallArgs, CmdValue, CommandModule, ModuleRegistry};
    use crate::error::ExecError;
    use crate::tasks::{TaskManager, TaskRef};
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    struct Probe(Arc<AtomicUsize>);

    #[async_trait]
    impl CommandModule for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }
        fn functions(&self) -> Vec<&'static str> {
            vec!["ping"]
        }
        async fn call(&self, function: &str, _args: &CallArgs) -> Result<CmdValue, ExecError> {
            match function {
                "ping" => {
                    self.0.fetch_add(1, Ordering::SeqCst);
                    Ok(CmdValue::Text("pong".into()))
                }
                other => Err(ExecError::NotFound {
                    target: format!("probe.{other}"),
                }),
            }
        }
    }

    fn wired() -> (IrqSlot, mpsc::Receiver<IrqWork>, Arc<Dispatcher>, Arc<AtomicUsize>, Bus) {
        let bus = Bus::new(64);
        let (slot, rx) = IrqSlot::new(bus.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let mut registry = ModuleRegistry::new();
        registry.register("probe", move || {
            Ok(Arc::new(Probe(Arc::clone(&probe_calls))) as _)
        });
        let tasks = TaskManager::new(bus.clone(), CancellationToken::new(), 4);
        let dispatcher = Dispatcher::new(Arc::new(registry), tasks, Duration::from_millis(20));
        (slot, rx, dispatcher, calls, bus)
    }

    #[tokio::test]
    async fn test_busy_guard_drops_second_occurrence() {
        let (slot, _rx, _dispatcher, _calls, bus) = wired();
        let mut events = bus.subscribe();

        // First post fills the single slot (no drain running).
        assert!(slot.post(IrqWork::CronTick));
        // Second occurrence is discarded, not queued.
        assert!(!slot.post(IrqWork::CronTick));

        let dropped = events.recv().await.expect("drop event");
        assert_eq!(dropped.kind, EventKind::IrqDropped);
    }

    #[tokio::test]
    async fn test_guard_flag_blocks_while_executing() {
        let (slot, _rx, _dispatcher, _calls, _bus) = wired();
        slot.busy.store(true, Ordering::SeqCst);
        assert!(!slot.post(IrqWork::CronTick), "busy guard must discard");
        slot.busy.store(false, Ordering::SeqCst);
        assert!(slot.post(IrqWork::CronTick));
    }

    #[tokio::test]
    async fn test_drain_executes_deferred_pipe() {
        let (slot, rx, dispatcher, calls, bus) = wired();
        let tasks = TaskManager::new(bus, CancellationToken::new(), 4);
        let drain: TaskRef = Arc::new(IrqDrain::new(&slot, rx, dispatcher, None));
        assert!(tasks.spawn_system(drain).await);

        assert!(slot.post(IrqWork::Pipe(Arc::from("probe ping; #probe skipped"))));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "pipe ran on the main loop");

        let (ok, _) = tasks.kill("irq").await;
        assert!(ok, "drain observes cancellation");
    }
}
