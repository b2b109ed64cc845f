//! Runtime event system: typed events, broadcast bus, subscriber fan-out.
//!
//! Internal modules:
//! - [`event`]: [`Event`] / [`EventKind`] with global sequence numbers;
//! - [`bus`]: broadcast channel wrapper;
//! - [`set`]: [`Subscribe`] contract and bounded fan-out workers;
//! - [`log`]: built-in `tracing` subscriber.

mod bus;
mod event;
mod log;
mod set;

pub use bus::Bus;
pub use event::{Event, EventKind};
pub use log::LogWriter;
pub use set::{Subscribe, SubscriberSet};
