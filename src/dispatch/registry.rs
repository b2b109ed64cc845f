//! # Static command-module registry with unload-on-fault recovery.
//!
//! A load module is a named command namespace exposing callable functions.
//! The registry maps module names to factories declared at startup; module
//! instances are constructed lazily on first call and cached. Evicting a
//! cached instance (after an allocation failure or stale-state fault) makes
//! the next invocation rebuild it fresh — the node's only recovery mechanism
//! for corrupted module state short of reboot.
//!
//! ## Rules
//! - The factory table is fixed after startup; only the instance cache
//!   mutates at runtime.
//! - Resolution failures are `NotFound`, never a panic.
//! - Cache access takes sync locks and never awaits while holding them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::dispatch::value::CallArgs;
use crate::error::ExecError;

/// Result value of a command call, formatted late (plain or structured).
#[derive(Clone, Debug, PartialEq)]
pub enum CmdValue {
    /// Free-form text, passed through unchanged.
    Text(String),
    /// Ordered key/value result; the structured-output candidate.
    Map(Vec<(String, String)>),
    /// Plain sequence (module listings, help output).
    List(Vec<String>),
}

impl CmdValue {
    /// Renders for the client: compact human-readable block, or JSON when
    /// the command carried the structured-output marker.
    pub fn render(&self, structured: bool) -> String {
        match self {
            CmdValue::Text(text) => text.clone(),
            CmdValue::Map(pairs) => {
                if structured {
                    let obj: serde_json::Map<String, JsonValue> = pairs
                        .iter()
                        .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
                        .collect();
                    JsonValue::Object(obj).to_string()
                } else {
                    pairs
                        .iter()
                        .map(|(k, v)| format!(" {k}: {v}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            CmdValue::List(items) => {
                if structured {
                    json!(items).to_string()
                } else {
                    items.join("\n")
                }
            }
        }
    }
}

/// A named command namespace.
#[async_trait]
pub trait CommandModule: Send + Sync {
    /// Module name as addressed on the command line.
    fn name(&self) -> &'static str;

    /// Callable function names, for `help lm` and binding errors.
    fn functions(&self) -> Vec<&'static str>;

    /// Invokes `function` with bound arguments.
    async fn call(&self, function: &str, args: &CallArgs) -> Result<CmdValue, ExecError>;
}

/// Constructs a fresh module instance.
pub type ModuleFactory = Box<dyn Fn() -> Result<Arc<dyn CommandModule>, ExecError> + Send + Sync>;

/// Startup-declared module table plus the runtime instance cache.
pub struct ModuleRegistry {
    factories: HashMap<&'static str, ModuleFactory>,
    loaded: RwLock<HashMap<&'static str, Arc<dyn CommandModule>>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Declares a module. Called during startup wiring only.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn CommandModule>, ExecError> + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    /// Resolves a module, instantiating and caching it on first use.
    pub fn resolve(&self, module: &str) -> Result<Arc<dyn CommandModule>, ExecError> {
        if let Ok(loaded) = self.loaded.read() {
            if let Some(instance) = loaded.get(module) {
                return Ok(Arc::clone(instance));
            }
        }
        let (key, factory) = self
            .factories
            .get_key_value(module)
            .ok_or_else(|| ExecError::NotFound {
                target: format!("module '{module}'"),
            })?;
        let instance = factory()?;
        if let Ok(mut loaded) = self.loaded.write() {
            loaded.insert(*key, Arc::clone(&instance));
        }
        Ok(instance)
    }

    /// Drops a cached instance so the next call reloads it fresh.
    pub fn evict(&self, module: &str) -> bool {
        self.loaded
            .write()
            .map(|mut loaded| loaded.remove(module).is_some())
            .unwrap_or(false)
    }

    /// Names of currently instantiated modules, sorted.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .loaded
            .read()
            .map(|loaded| loaded.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Every declared module name, sorted.
    pub fn all(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
