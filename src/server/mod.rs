//! Session serving: bounded TCP accept/evict loops, per-session transport,
//! and the minimal HTTP variant.
//!
//! Internal modules:
//! - [`session`]: one connection (bounded read, flush guard, idle clock);
//! - [`server`]: admission, eviction, shell drive loop, reply-all;
//! - [`web`]: `GET /` and `GET /rest/...` over shared admission.

mod server;
mod session;
mod web;

pub use server::SessionServer;
pub use session::Session;
