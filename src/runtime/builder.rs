//! # Runtime builder.
//!
//! Wires the runtime context once at startup: the store, event system,
//! task manager, module registry, dispatcher, scheduler, and session
//! server, each holding explicit references to what it needs. There are no
//! process-wide singletons; the [`Runtime`] value is the context.
//!
//! Must be called from within a tokio runtime (subscriber workers and the
//! bus listener are spawned during build).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatch::{CommandModule, Dispatcher, ModuleRegistry};
use crate::error::ExecError;
use crate::events::{Bus, LogWriter, Subscribe, SubscriberSet};
use crate::modules::SystemModule;
use crate::net::{NetworkLink, NullLink};
use crate::runtime::{ClockSyncJob, Runtime, SolarRefreshJob};
use crate::sched::{Scheduler, SolarTable};
use crate::server::SessionServer;
use crate::store::ConfigStore;
use crate::tasks::TaskManager;

/// Builder for the runtime context.
pub struct RuntimeBuilder {
    store: Option<ConfigStore>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    net: Option<Arc<dyn NetworkLink>>,
    registry: ModuleRegistry,
}

impl RuntimeBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            store: None,
            subscribers: Vec::new(),
            net: None,
            registry: ModuleRegistry::new(),
        }
    }

    /// Uses the given config store (defaults-only store otherwise).
    pub fn with_store(mut self, store: ConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets event subscribers. Without any, a `tracing` log writer is used.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the platform network link (no-op link otherwise).
    pub fn with_network(mut self, net: Arc<dyn NetworkLink>) -> Self {
        self.net = Some(net);
        self
    }

    /// Declares a peripheral command module.
    pub fn register_module<F>(mut self, name: &'static str, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CommandModule>, ExecError> + Send + Sync + 'static,
    {
        self.registry.register(name, factory);
        self
    }

    /// Builds the runtime context.
    pub fn build(self) -> Arc<Runtime> {
        let store = Arc::new(self.store.unwrap_or_else(ConfigStore::with_defaults));
        let cfg = Config::from_store(&store);
        let net: Arc<dyn NetworkLink> = self.net.unwrap_or_else(|| Arc::new(NullLink));

        let bus = Bus::new(cfg.bus_capacity);
        let mut subscribers = self.subscribers;
        if subscribers.is_empty() {
            subscribers.push(Arc::new(LogWriter));
        }
        let subs = Arc::new(SubscriberSet::new(subscribers));
        Self::spawn_bus_listener(&bus, &subs);

        let runtime_token = CancellationToken::new();
        let tasks = TaskManager::new(bus.clone(), runtime_token.clone(), cfg.queue_size());
        let solar = Arc::new(SolarTable::new());

        let mut registry = self.registry;
        {
            let tasks = Arc::clone(&tasks);
            let store = Arc::clone(&store);
            let solar = Arc::clone(&solar);
            let version = cfg.version.clone();
            registry.register("system", move || {
                Ok(Arc::new(SystemModule::new(
                    Arc::clone(&tasks),
                    Arc::clone(&store),
                    Arc::clone(&solar),
                    version.clone(),
                )) as Arc<dyn CommandModule>)
            });
        }
        let registry = Arc::new(registry);
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            cfg.magic_min_step,
        );

        let scheduler = if cfg.cron_enabled {
            let mut scheduler = Scheduler::new(
                Arc::clone(&dispatcher),
                Arc::clone(&solar),
                bus.clone(),
                cfg.tolerance_secs(),
                store.get_int("utc").unwrap_or(0),
            );
            scheduler.add_builtin(
                "*:3:0:0",
                Arc::new(SolarRefreshJob::new(Arc::clone(&net), Arc::clone(&solar))),
            );
            scheduler.add_builtin("*:3:5:0", Arc::new(ClockSyncJob::new(Arc::clone(&net))));
            if let Some(crontab) = store.get_str("crontasks") {
                scheduler.load_crontab(&crontab);
            }
            Some(Arc::new(scheduler))
        } else {
            None
        };

        let server = SessionServer::new(
            cfg.clone(),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            bus.clone(),
        );

        Arc::new(Runtime {
            cfg,
            store,
            bus,
            subs,
            tasks,
            dispatcher,
            server,
            scheduler,
            solar,
            net,
            runtime_token,
        })
    }

    /// Forwards bus events into the subscriber fan-out (fire and forget).
    fn spawn_bus_listener(bus: &Bus, subs: &Arc<SubscriberSet>) {
        let mut rx = bus.subscribe();
        let subs = Arc::clone(subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => subs.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
