//! Command dispatch: typed argument binding, the static module registry,
//! and the dispatcher glue every command surface funnels through.
//!
//! Internal modules:
//! - [`value`]: [`ArgValue`] tagged values and [`CallArgs`] binding;
//! - [`registry`]: [`CommandModule`] contract, [`ModuleRegistry`] with
//!   lazy load and unload-on-fault recovery, [`CmdValue`] formatting;
//! - [`dispatcher`]: line execution, task-admin intercept, background
//!   admission, command pipes.

mod dispatcher;
mod registry;
mod value;

pub use dispatcher::Dispatcher;
pub use registry::{CmdValue, CommandModule, ModuleFactory, ModuleRegistry};
pub use value::{ArgValue, CallArgs};
