//! # Runtime - boot orchestration and lifecycle.
//!
//! The [`Runtime`] value is the process context: every component receives
//! explicit references from it, nothing is a global. [`Runtime::run`] boots
//! the node and drives the control loop:
//!
//! ```text
//! boot()
//!   ├─ idle task                       (load probe, network self-heal)
//!   ├─ boot-hook command pipe          (persisted `boothook`)
//!   ├─ server task (+ web task)        (bounded session accept loops)
//!   └─ irq slot + drain + tickers      (timer pipe, cron tick)
//!
//! control loop
//!   ├─ termination signal ─► notify clients, cancel all, grace window
//!   ├─ RebootRequested(soft) ─► teardown, boot() again in-process
//!   ├─ RebootRequested(hard) ─► teardown, return (watchdog restarts)
//!   └─ `server` task failure ─► safe reboot sequence
//! ```

mod builder;
mod shutdown;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind, SubscriberSet};
use crate::irq::{CronIrq, IrqDrain, IrqSlot, TimerIrq};
use crate::net::NetworkLink;
use crate::sched::{BuiltinJob, Scheduler, SolarTable};
use crate::server::SessionServer;
use crate::store::ConfigStore;
use crate::tasks::{IdleTask, TaskFn, TaskManager};

pub use builder::RuntimeBuilder;

/// The runtime context, constructed once by [`RuntimeBuilder::build`].
pub struct Runtime {
    pub(crate) cfg: Config,
    pub(crate) store: Arc<ConfigStore>,
    pub(crate) bus: Bus,
    pub(crate) subs: Arc<SubscriberSet>,
    pub(crate) tasks: Arc<TaskManager>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) server: Arc<SessionServer>,
    pub(crate) scheduler: Option<Arc<Scheduler>>,
    pub(crate) solar: Arc<SolarTable>,
    pub(crate) net: Arc<dyn NetworkLink>,
    pub(crate) runtime_token: CancellationToken,
}

impl Runtime {
    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The command dispatcher (embedders drive commands directly with it).
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The task manager.
    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    /// The persisted config store.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// The event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The session server.
    pub fn server(&self) -> &Arc<SessionServer> {
        &self.server
    }

    /// The solar table (platform layers install fetched times here).
    pub fn solar(&self) -> &Arc<SolarTable> {
        &self.solar
    }

    /// Boots the node and runs until shutdown or hard reboot.
    pub async fn run(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let mut control = self.bus.subscribe();
        self.boot().await;

        loop {
            tokio::select! {
                _ = shutdown::wait_for_shutdown_signal() => {
                    self.bus.publish(Event::now(EventKind::ShutdownRequested));
                    let result = self.teardown("shutting down").await;
                    self.runtime_token.cancel();
                    return result;
                }
                event = control.recv() => {
                    match event {
                        Ok(ev) if ev.kind == EventKind::RebootRequested => {
                            let hard = ev.reason.as_deref() == Some("hard");
                            if let Err(e) = self.teardown("rebooting").await {
                                error!(error = %e, "teardown incomplete before reboot");
                            }
                            if hard {
                                // No supervising OS process: the external
                                // watchdog/flasher restarts the firmware.
                                self.runtime_token.cancel();
                                return Ok(());
                            }
                            info!("soft reboot: re-running boot sequence");
                            self.boot().await;
                        }
                        Ok(ev)
                            if ev.kind == EventKind::TaskFailed
                                && matches!(ev.task.as_deref(), Some("server" | "web")) =>
                        {
                            // A dead accept loop is an internal defect; the
                            // safe reaction is the reboot sequence.
                            self.bus.publish(
                                Event::now(EventKind::RebootRequested)
                                    .with_reason("session server fault"),
                            );
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }

    /// Spawns the system tasks; the boot order follows the node bring-up:
    /// idle probe, boot hook, session servers, interrupt tickers.
    pub async fn boot(self: &Arc<Self>) {
        let idle = Arc::new(IdleTask::new(
            &self.tasks,
            Arc::clone(&self.net),
            self.cfg.idle_period,
        ));
        let _ = self.tasks.spawn_system(idle).await;

        if let Some(hook) = self.store.get_str("boothook") {
            self.dispatcher.exec_pipe(&hook).await;
        }

        {
            let server = Arc::clone(&self.server);
            let task = TaskFn::arc("server", move |ctx| {
                let server = Arc::clone(&server);
                async move { server.serve_shell(&ctx).await }
            });
            let _ = self.tasks.spawn_system(task).await;
        }

        if self.cfg.web_enabled {
            let server = Arc::clone(&self.server);
            let task = TaskFn::arc("web", move |ctx| {
                let server = Arc::clone(&server);
                async move { server.serve_web(&ctx).await }
            });
            let _ = self.tasks.spawn_system(task).await;
        }

        let timer_pipe = self
            .store
            .get_str("timirqcbf")
            .filter(|pipe| !pipe.trim().is_empty() && !pipe.starts_with("n/a"))
            .filter(|_| self.store.get_bool("timirq").unwrap_or(false));
        if timer_pipe.is_some() || self.scheduler.is_some() {
            let (slot, rx) = IrqSlot::new(self.bus.clone());
            let drain = IrqDrain::new(
                &slot,
                rx,
                Arc::clone(&self.dispatcher),
                self.scheduler.clone(),
            );
            let _ = self.tasks.spawn_system(Arc::new(drain)).await;

            if let Some(pipe) = timer_pipe {
                let timer = TimerIrq::new(slot.clone(), pipe, self.cfg.timer_period);
                let _ = self.tasks.spawn_system(Arc::new(timer)).await;
            }
            if self.scheduler.is_some() {
                let cron = CronIrq::new(slot, self.cfg.cron_tick);
                let _ = self.tasks.spawn_system(Arc::new(cron)).await;
            }
        }
    }

    /// Notifies clients, closes sessions, cancels every task within the
    /// grace window.
    async fn teardown(&self, reason: &str) -> Result<(), RuntimeError> {
        self.server.reply_all(reason).await;
        self.server.close_all().await;
        match self.tasks.cancel_all_within(self.cfg.grace).await {
            Ok(()) => Ok(()),
            Err(stuck) => {
                warn!(?stuck, "tasks exceeded the shutdown grace window");
                Err(RuntimeError::GraceExceeded {
                    grace: self.cfg.grace,
                    stuck,
                })
            }
        }
    }

    /// Number of attached event subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }
}

/// Built-in cron job: refresh the solar time-of-day table.
pub struct SolarRefreshJob {
    net: Arc<dyn NetworkLink>,
    solar: Arc<SolarTable>,
}

impl SolarRefreshJob {
    /// Creates the refresh job over the platform link.
    pub fn new(net: Arc<dyn NetworkLink>, solar: Arc<SolarTable>) -> Self {
        Self { net, solar }
    }
}

#[async_trait]
impl BuiltinJob for SolarRefreshJob {
    fn name(&self) -> &'static str {
        "suntime"
    }

    async fn run(&self) -> bool {
        match self.net.solar_times().await {
            Some(times) => {
                self.solar.set(times);
                true
            }
            None => false,
        }
    }
}

/// Built-in cron job: synchronize the node clock.
pub struct ClockSyncJob {
    net: Arc<dyn NetworkLink>,
}

impl ClockSyncJob {
    /// Creates the clock sync job over the platform link.
    pub fn new(net: Arc<dyn NetworkLink>) -> Self {
        Self { net }
    }
}

#[async_trait]
impl BuiltinJob for ClockSyncJob {
    fn name(&self) -> &'static str {
        "ntp_sync"
    }

    async fn run(&self) -> bool {
        self.net.sync_clock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::SolarTimes;

    #[tokio::test]
    async fn test_builder_wires_system_module_and_store() {
        let runtime = RuntimeBuilder::new().build();
        let (ok, reply) = runtime.dispatcher().execute_line("system info").await;
        assert!(ok, "system module must be pre-registered: {reply}");
        assert!(reply.contains("version"), "got: {reply}");
        assert_eq!(runtime.config().device_id, "node01");
    }

    #[tokio::test]
    async fn test_builder_arms_scheduler_from_store() {
        let store = ConfigStore::with_defaults();
        store.put_raw("cron", "true");
        store.put_raw("crontasks", "*:12:0:0!system heartbeat");
        let runtime = RuntimeBuilder::new().with_store(store).build();

        let scheduler = runtime.scheduler.as_ref().expect("cron armed");
        // Two builtins (solar refresh, clock sync) plus the user rule.
        assert_eq!(scheduler.len(), 3);
    }

    #[tokio::test]
    async fn test_solar_refresh_job_installs_table() {
        struct FixedLink;
        #[async_trait]
        impl NetworkLink for FixedLink {
            async fn self_heal(&self) -> bool {
                true
            }
            async fn solar_times(&self) -> Option<SolarTimes> {
                Some(SolarTimes::from_hms((6, 0, 0), (18, 0, 0)))
            }
            async fn sync_clock(&self) -> bool {
                true
            }
        }

        let solar = Arc::new(SolarTable::new());
        let job = SolarRefreshJob::new(Arc::new(FixedLink), Arc::clone(&solar));
        assert!(job.run().await);
        assert_eq!(
            solar.get(),
            Some(SolarTimes::from_hms((6, 0, 0), (18, 0, 0)))
        );
    }

    #[tokio::test]
    async fn test_teardown_reports_clean_stop() {
        let runtime = RuntimeBuilder::new().build();
        // Only the idle task; no listeners bound in this test.
        let idle = Arc::new(IdleTask::new(
            runtime.tasks(),
            Arc::clone(&runtime.net),
            std::time::Duration::from_millis(50),
        ));
        assert!(runtime.tasks().spawn_system(idle).await);
        assert!(runtime.teardown("test stop").await.is_ok());
        assert!(runtime.tasks().list().await.is_empty());
    }
}
