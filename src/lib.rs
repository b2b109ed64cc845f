//! # nodevisor
//!
//! **nodevisor** is a cooperative runtime supervisor for network-attached
//! microcontroller nodes: it boots the device, exposes a line-oriented
//! remote shell over TCP, dispatches named command-module calls, runs user
//! code as bounded background tasks, and fires time-based (cron-like,
//! solar-aware) triggers — on a single-threaded executor with no
//! parallelism underneath.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!       TCP client          TCP client              timer tick
//!           │                   │                       │
//!           ▼                   ▼                       ▼
//! ┌───────────────────────────────────────┐   ┌──────────────────┐
//! │  SessionServer (bounded, N sessions)  │   │ IrqSlot (cap 1 + │
//! │  - admit / evict-idle / reject-busy   │   │  busy guard)     │
//! │  - per-session Shell state machine    │   └────────┬─────────┘
//! │    (auth, configure mode, builtins)   │            ▼
//! │  - optional HTTP variant (/, /rest)   │      IrqDrain task
//! └──────────────────┬────────────────────┘      │          │
//!                    ▼                           ▼          ▼
//! ┌───────────────────────────────────────┐  command   Scheduler
//! │  Dispatcher                           │◄── pipe    (cron tick:
//! │  - task admin intercept               │            tolerance window,
//! │  - `&` / `&&ms` background admission  │◄─────────── fire-once dedup,
//! │  - (module, function) → typed handler │            solar tags)
//! └──────────────────┬────────────────────┘
//!                    ▼
//! ┌───────────────────────────────────────┐
//! │  TaskManager (registry by tag)        │
//! │  - module tasks: bounded queue        │
//! │  - system tasks: idle / server / irq  │
//! │  - cooperative cancel, show, kill     │
//! └──────────────────┬────────────────────┘
//!                    ▼
//!              Bus ──► SubscriberSet ──► LogWriter (tracing)
//! ```
//!
//! ### Lifecycle
//! ```text
//! RuntimeBuilder::build() ──► Runtime::run()
//!   boot: idle task ► boot-hook pipe ► server task(s) ► irq tickers
//!   loop: OS signal        ─► notify clients, cancel all (grace) ─► exit
//!         reboot (soft)    ─► teardown ─► boot again in-process
//!         reboot (hard)    ─► teardown ─► return to the watchdog
//!         server task died ─► safe reboot sequence
//! ```
//!
//! ## Example
//! ```no_run
//! use nodevisor::{ConfigStore, RuntimeBuilder};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ConfigStore::open("node_config.json".into());
//!     let runtime = RuntimeBuilder::new().with_store(store).build();
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod dispatch;
mod error;
mod events;
mod irq;
mod modules;
mod net;
mod runtime;
mod sched;
mod server;
mod shell;
mod store;
mod tasks;

// ---- Public re-exports ----

pub use config::Config;
pub use dispatch::{
    ArgValue, CallArgs, CmdValue, CommandModule, Dispatcher, ModuleFactory, ModuleRegistry,
};
pub use error::{ExecError, RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind, LogWriter, Subscribe, SubscriberSet};
pub use irq::{CronIrq, IrqDrain, IrqSlot, IrqWork, TimerIrq};
pub use modules::SystemModule;
pub use net::{NetworkLink, NullLink};
pub use runtime::{ClockSyncJob, Runtime, RuntimeBuilder, SolarRefreshJob};
pub use sched::{
    parse_crontab, parse_when, BuiltinJob, ClockNow, CronAction, CronRule, CronWhen, Scheduler,
    SolarTable, SolarTag, SolarTimes, TimeField, WeekdayField,
};
pub use server::{Session, SessionServer};
pub use shell::{AuthState, Shell, ShellAction};
pub use store::{CfgValue, ConfigStore};
pub use tasks::{IdleTask, Task, TaskCtx, TaskFn, TaskManager, TaskRef};
