//! # Persisted key/value configuration store.
//!
//! The node keeps its deployment parameters (identity, ports, feature flags,
//! IRQ command pipes, crontab text) in a flat key/value map persisted as a
//! JSON file. The store is a collaborator of the runtime core: the shell's
//! configure mode reads and writes it, the boot sequence derives
//! [`Config`](crate::Config) from it, and the scheduler reads its crontab.
//!
//! ## Rules
//! - Values are typed ([`CfgValue`]: bool / int / string); `put` coerces the
//!   incoming raw string to the type of the existing value.
//! - Unknown keys are rejected (the key set is fixed by the defaults).
//! - File persistence is best effort: a failed write is logged and ignored,
//!   the in-memory map stays authoritative.
//! - Accessors take sync locks and never await while holding them, so all
//!   mutation happens atomically between cooperative suspension points.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExecError;

/// One typed configuration value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CfgValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Free-form string.
    Str(String),
}

impl std::fmt::Display for CfgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CfgValue::Bool(b) => write!(f, "{b}"),
            CfgValue::Int(i) => write!(f, "{i}"),
            CfgValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl CfgValue {
    /// Coerces a raw string to the same type as `self`.
    fn coerce_like(&self, raw: &str) -> Result<CfgValue, ExecError> {
        let raw = raw.trim();
        match self {
            CfgValue::Bool(_) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Ok(CfgValue::Bool(true)),
                "false" | "0" | "off" => Ok(CfgValue::Bool(false)),
                other => Err(ExecError::Parse(format!("expected bool, got '{other}'"))),
            },
            CfgValue::Int(_) => raw
                .parse::<i64>()
                .map(CfgValue::Int)
                .map_err(|_| ExecError::Parse(format!("expected int, got '{raw}'"))),
            CfgValue::Str(_) => Ok(CfgValue::Str(raw.to_string())),
        }
    }
}

/// Process-wide configuration store.
pub struct ConfigStore {
    values: RwLock<HashMap<String, CfgValue>>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// Creates a store seeded with the node defaults, no file backing.
    pub fn with_defaults() -> Self {
        Self {
            values: RwLock::new(Self::defaults()),
            path: None,
        }
    }

    /// Creates a file-backed store: defaults, overlaid with whatever the
    /// file already holds (unknown file keys are dropped as obsolete).
    pub fn open(path: PathBuf) -> Self {
        let mut values = Self::defaults();
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, CfgValue>>(&text) {
                Ok(saved) => {
                    for (key, value) in saved {
                        if values.contains_key(&key) {
                            values.insert(key, value);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "config file unreadable, using defaults"),
            },
            Err(_) => {} // first boot
        }
        Self {
            values: RwLock::new(values),
            path: Some(path),
        }
    }

    /// The fixed key set every node ships with.
    fn defaults() -> HashMap<String, CfgValue> {
        let mut map = HashMap::new();
        let entries: [(&str, CfgValue); 17] = [
            ("devfid", CfgValue::Str("node01".into())),
            ("hwuid", CfgValue::Str("n/a".into())),
            ("appwd", CfgValue::Str("ADmin123".into())),
            ("auth", CfgValue::Bool(false)),
            ("socport", CfgValue::Int(9008)),
            ("soctout", CfgValue::Int(30)),
            ("sessions", CfgValue::Int(2)),
            ("aioqueue", CfgValue::Int(5)),
            ("webui", CfgValue::Bool(false)),
            ("webport", CfgValue::Int(8080)),
            ("cron", CfgValue::Bool(false)),
            ("crontasks", CfgValue::Str("n/a".into())),
            ("timirq", CfgValue::Bool(false)),
            ("timirqcbf", CfgValue::Str("n/a".into())),
            ("timirqseq", CfgValue::Int(1000)),
            ("boothook", CfgValue::Str("n/a".into())),
            ("utc", CfgValue::Int(0)),
        ];
        for (key, value) in entries {
            map.insert(key.to_string(), value);
        }
        map
    }

    /// Returns the value for `key`, if the key exists.
    pub fn get(&self, key: &str) -> Option<CfgValue> {
        self.values
            .read()
            .ok()
            .and_then(|map| map.get(key).cloned())
    }

    /// String accessor (any value renders through `Display`).
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    /// Integer accessor; `None` if missing or not an int.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(CfgValue::Int(i)) => Some(i),
            _ => None,
        }
    }

    /// Bool accessor; `None` if missing or not a bool.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(CfgValue::Bool(b)) => Some(b),
            _ => None,
        }
    }

    /// Sets `key` from a raw string, coercing to the existing value's type.
    ///
    /// Unknown keys are rejected with `NotFound`; a coercion failure is a
    /// `Parse` error. On success the file backing (if any) is rewritten,
    /// best effort.
    pub fn put(&self, key: &str, raw: &str) -> Result<(), ExecError> {
        {
            let mut map = self
                .values
                .write()
                .map_err(|_| ExecError::Runtime {
                    module: "config".into(),
                    function: "put".into(),
                    error: "store lock poisoned".into(),
                })?;
            let current = map.get(key).ok_or_else(|| ExecError::NotFound {
                target: format!("config key '{key}'"),
            })?;
            let coerced = current.coerce_like(raw)?;
            map.insert(key.to_string(), coerced);
        }
        self.save();
        Ok(())
    }

    /// Best-effort `put` for seeding and tests; returns success.
    pub fn put_raw(&self, key: &str, raw: &str) -> bool {
        self.put(key, raw).is_ok()
    }

    /// All key/value pairs, sorted by key, rendered for `dump`.
    pub fn dump(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = match self.values.read() {
            Ok(map) => map.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
            Err(_) => Vec::new(),
        };
        pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Rewrites the backing file, best effort.
    fn save(&self) {
        let Some(path) = &self.path else { return };
        let snapshot = match self.values.read() {
            Ok(map) => map.clone(),
            Err(_) => return,
        };
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(error = %e, path = %path.display(), "config save failed");
                }
            }
            Err(e) => warn!(error = %e, "config serialize failed"),
        }
    }
}
