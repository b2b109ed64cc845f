//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings bundle for the node runtime.
//! The values are normally derived from the persisted [`ConfigStore`]
//! (`Config::from_store`) at boot, but every field is public so tests and
//! embedders can construct a config directly.
//!
//! ## Sentinel values
//! - `task_queue = 0` → no module-task admission (every background call is
//!   rejected busy); clamped to 1 by [`Config::queue_size`]
//! - `session_limit = 0` → clamped to 1 (at least one client must fit)
//! - `magic_min_step` is a hard floor: shorter loop delays are clamped up
//!   to bound scheduler pressure

use std::time::Duration;

use crate::store::ConfigStore;

/// Global configuration for the node runtime.
///
/// Field groups:
/// - **Identity**: `device_id`, `version`
/// - **Shell/server**: `port`, `web_port`, `web_enabled`, `session_limit`,
///   `session_timeout`, `read_size`, `auth`, `password`
/// - **Task manager**: `task_queue`, `magic_min_step`, `idle_period`
/// - **Scheduler**: `cron_enabled`, `cron_tick`, `cron_tolerance`
/// - **Timer IRQ**: `timer_period`
/// - **Shutdown**: `grace`
/// - **Events**: `bus_capacity`
#[derive(Clone, Debug)]
pub struct Config {
    /// Device identity shown in the prompt and `hello` reply.
    pub device_id: String,
    /// Runtime version string reported by `version`.
    pub version: String,

    /// TCP port of the line shell server.
    pub port: u16,
    /// TCP port of the optional HTTP variant.
    pub web_port: u16,
    /// Whether the HTTP variant is served at all.
    pub web_enabled: bool,
    /// Maximum concurrent sessions (shell + web combined).
    pub session_limit: usize,
    /// Idle time after which a session may be evicted for a new client.
    pub session_timeout: Duration,
    /// Bounded per-read buffer size for session input.
    pub read_size: usize,
    /// Whether sessions must authenticate before commands are accepted.
    pub auth: bool,
    /// Shared secret checked when `auth` is set.
    pub password: String,

    /// Module-task admission bound: max live `<module>.<function>` tasks.
    pub task_queue: usize,
    /// Minimum step interval for looped module tasks.
    pub magic_min_step: Duration,
    /// Idle task period (load probe granularity).
    pub idle_period: Duration,

    /// Whether the cron scheduler runs.
    pub cron_enabled: bool,
    /// Cron evaluation tick period.
    pub cron_tick: Duration,
    /// Symmetric match window around a spec's scheduled second-of-day.
    pub cron_tolerance: Duration,

    /// Period of the generic timer interrupt (command-pipe executor).
    pub timer_period: Duration,

    /// Maximum wait for tasks to stop during shutdown/reboot.
    pub grace: Duration,
    /// Event bus ring buffer capacity (min 1, clamped by the bus).
    pub bus_capacity: usize,
}

impl Config {
    /// Builds a runtime config from the persisted store, falling back to
    /// defaults for any missing or mistyped key.
    pub fn from_store(store: &ConfigStore) -> Self {
        let d = Config::default();
        Self {
            device_id: store.get_str("devfid").unwrap_or(d.device_id),
            version: d.version.clone(),
            port: store.get_int("socport").map(|p| p as u16).unwrap_or(d.port),
            web_port: store.get_int("webport").map(|p| p as u16).unwrap_or(d.web_port),
            web_enabled: store.get_bool("webui").unwrap_or(d.web_enabled),
            session_limit: store
                .get_int("sessions")
                .map(|n| n as usize)
                .unwrap_or(d.session_limit),
            session_timeout: store
                .get_int("soctout")
                .map(|s| Duration::from_secs(s.max(5) as u64))
                .unwrap_or(d.session_timeout),
            read_size: d.read_size,
            auth: store.get_bool("auth").unwrap_or(d.auth),
            password: store.get_str("appwd").unwrap_or(d.password),
            task_queue: store
                .get_int("aioqueue")
                .map(|n| n as usize)
                .unwrap_or(d.task_queue),
            magic_min_step: d.magic_min_step,
            idle_period: d.idle_period,
            cron_enabled: store.get_bool("cron").unwrap_or(d.cron_enabled),
            cron_tick: d.cron_tick,
            cron_tolerance: d.cron_tick,
            timer_period: store
                .get_int("timirqseq")
                .map(|ms| Duration::from_millis(ms.max(100) as u64))
                .unwrap_or(d.timer_period),
            grace: d.grace,
            bus_capacity: d.bus_capacity,
        }
    }

    /// Module-task admission bound, clamped to a working minimum of 1.
    #[inline]
    pub fn queue_size(&self) -> usize {
        self.task_queue.max(1)
    }

    /// Session bound, clamped to a working minimum of 1.
    #[inline]
    pub fn session_cap(&self) -> usize {
        self.session_limit.max(1)
    }

    /// Cron tolerance in whole seconds (min 1).
    #[inline]
    pub fn tolerance_secs(&self) -> u32 {
        (self.cron_tolerance.as_secs() as u32).max(1)
    }
}

impl Default for Config {
    /// Defaults mirror a small-node deployment:
    /// two concurrent sessions, a five-deep module-task queue, 5 s cron tick
    /// with equal tolerance, 20 ms looped-task floor, 30 s idle eviction.
    fn default() -> Self {
        Self {
            device_id: "node01".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            port: 9008,
            web_port: 8080,
            web_enabled: false,
            session_limit: 2,
            session_timeout: Duration::from_secs(30),
            read_size: 2048,
            auth: false,
            password: "ADmin123".into(),
            task_queue: 5,
            magic_min_step: Duration::from_millis(20),
            idle_period: Duration::from_millis(300),
            cron_enabled: false,
            cron_tick: Duration::from_secs(5),
            cron_tolerance: Duration::from_secs(5),
            timer_period: Duration::from_secs(1),
            grace: Duration::from_secs(5),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let cfg = Config::default();
        assert_eq!(cfg.session_cap(), 2);
        assert_eq!(cfg.queue_size(), 5);
        assert_eq!(cfg.tolerance_secs(), 5);
        assert!(cfg.magic_min_step >= Duration::from_millis(20));
    }

    #[test]
    fn test_zero_limits_clamp_to_one() {
        let cfg = Config {
            task_queue: 0,
            session_limit: 0,
            cron_tolerance: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.queue_size(), 1);
        assert_eq!(cfg.session_cap(), 1);
        assert_eq!(cfg.tolerance_secs(), 1);
    }

    #[test]
    fn test_from_store_reads_persisted_keys() {
        let store = ConfigStore::with_defaults();
        store.put_raw("devfid", "bench01");
        store.put_raw("socport", "9011");
        store.put_raw("auth", "true");
        let cfg = Config::from_store(&store);
        assert_eq!(cfg.device_id, "bench01");
        assert_eq!(cfg.port, 9011);
        assert!(cfg.auth);
    }
}
