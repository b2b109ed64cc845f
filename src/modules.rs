//! Built-in command modules.
//!
//! `system` is the module every node ships with: runtime vitals, clock,
//! solar table inspection, heartbeat. Peripheral modules register the same
//! way from the embedder's boot code; their internals live behind the
//! platform layer.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::dispatch::{ArgValue, CallArgs, CmdValue, CommandModule};
use crate::error::ExecError;
use crate::sched::{ClockNow, SolarTable};
use crate::store::ConfigStore;
use crate::tasks::TaskManager;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Runtime vitals and clock module (`system ...`).
pub struct SystemModule {
    tasks: Arc<TaskManager>,
    store: Arc<ConfigStore>,
    solar: Arc<SolarTable>,
    version: String,
    started: Instant,
}

impl SystemModule {
    /// Creates the module over the shared runtime parts.
    pub fn new(
        tasks: Arc<TaskManager>,
        store: Arc<ConfigStore>,
        solar: Arc<SolarTable>,
        version: String,
    ) -> Self {
        Self {
            tasks,
            store,
            solar,
            version,
            started: Instant::now(),
        }
    }

    fn utc_offset(&self) -> i64 {
        self.store.get_int("utc").unwrap_or(0)
    }

    fn clock(&self) -> String {
        let now = ClockNow::now(self.utc_offset());
        format!(
            "{} {:02}:{:02}:{:02}",
            WEEKDAYS[usize::from(now.weekday.min(6))],
            now.hour,
            now.minute,
            now.second
        )
    }

    fn uptime(&self) -> String {
        let total = self.started.elapsed().as_secs();
        let (days, rest) = (total / 86_400, total % 86_400);
        format!(
            "{days}d {:02}:{:02}:{:02}",
            rest / 3600,
            (rest % 3600) / 60,
            rest % 60
        )
    }

    fn hms(sec: u32) -> String {
        format!("{:02}:{:02}:{:02}", sec / 3600, (sec % 3600) / 60, sec % 60)
    }
}

#[async_trait]
impl CommandModule for SystemModule {
    fn name(&self) -> &'static str {
        "system"
    }

    fn functions(&self) -> Vec<&'static str> {
        vec!["info", "top", "clock", "uptime", "sun", "heartbeat", "help"]
    }

    async fn call(&self, function: &str, args: &CallArgs) -> Result<CmdValue, ExecError> {
        match function {
            "info" => Ok(CmdValue::Map(vec![
                ("version".into(), self.version.clone()),
                (
                    "device".into(),
                    self.store.get_str("devfid").unwrap_or_else(|| "n/a".into()),
                ),
                ("uptime".into(), self.uptime()),
                ("clock".into(), self.clock()),
            ])),
            "top" => Ok(CmdValue::Map(vec![
                ("load [%]".into(), self.tasks.load().to_string()),
                (
                    "queue free".into(),
                    self.tasks.queue_free().await.to_string(),
                ),
                (
                    "tasks".into(),
                    self.tasks.list().await.len().to_string(),
                ),
            ])),
            "clock" => Ok(CmdValue::Text(self.clock())),
            "uptime" => Ok(CmdValue::Text(self.uptime())),
            "sun" => match self.solar.get() {
                Some(times) => Ok(CmdValue::Map(vec![
                    ("sunrise".into(), Self::hms(times.sunrise)),
                    ("sunset".into(), Self::hms(times.sunset)),
                ])),
                None => Ok(CmdValue::Text("sun table not synced yet".into())),
            },
            "heartbeat" => {
                // Optional echo argument for link probing.
                let suffix = args
                    .at(0)
                    .map(|v| match v {
                        ArgValue::Str(s) => format!(" {s}"),
                        other => format!(" {other}"),
                    })
                    .unwrap_or_default();
                Ok(CmdValue::Text(format!("<3 heartbeat <3{suffix}")))
            }
            "help" => Ok(CmdValue::List(
                self.functions().iter().map(|f| f.to_string()).collect(),
            )),
            other => Err(ExecError::NotFound {
                target: format!("system.{other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use tokio_util::sync::CancellationToken;

    fn module() -> SystemModule {
        let tasks = TaskManager::new(Bus::new(16), CancellationToken::new(), 4);
        SystemModule::new(
            tasks,
            Arc::new(ConfigStore::with_defaults()),
            Arc::new(SolarTable::new()),
            "0.3.0".into(),
        )
    }

    #[tokio::test]
    async fn test_info_and_top_shape() {
        let sys = module();
        let info = sys.call("info", &CallArgs::default()).await.expect("info");
        match info {
            CmdValue::Map(pairs) => {
                assert!(pairs.iter().any(|(k, _)| k == "version"));
                assert!(pairs.iter().any(|(k, v)| k == "device" && v == "node01"));
            }
            other => panic!("info must be a map, got {other:?}"),
        }

        let top = sys.call("top", &CallArgs::default()).await.expect("top");
        let rendered = top.render(false);
        assert!(rendered.contains("queue free"), "got: {rendered}");
    }

    #[tokio::test]
    async fn test_heartbeat_and_unknown_function() {
        let sys = module();
        let beat = sys
            .call("heartbeat", &CallArgs::default())
            .await
            .expect("heartbeat");
        assert_eq!(beat, CmdValue::Text("<3 heartbeat <3".into()));

        let missing = sys.call("nope", &CallArgs::default()).await;
        assert!(matches!(missing, Err(ExecError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_sun_before_sync_is_informative() {
        let sys = module();
        let sun = sys.call("sun", &CallArgs::default()).await.expect("sun");
        assert_eq!(sun, CmdValue::Text("sun table not synced yet".into()));
    }
}
