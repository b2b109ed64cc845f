//! Network collaborator seam.
//!
//! The runtime core never talks to Wi-Fi hardware or remote time APIs
//! directly; it consumes this trait. The idle task calls `self_heal`
//! periodically, and the scheduler's built-in cron entries drive
//! `solar_times` / `sync_clock`.

use async_trait::async_trait;

use crate::sched::SolarTimes;

/// Station-network and time services provided by the platform layer.
#[async_trait]
pub trait NetworkLink: Send + Sync + 'static {
    /// Checks and repairs the station association; true if healthy.
    async fn self_heal(&self) -> bool;

    /// Fetches today's sunrise/sunset time-of-day table.
    async fn solar_times(&self) -> Option<SolarTimes>;

    /// Synchronizes the node clock (NTP or equivalent); true on success.
    async fn sync_clock(&self) -> bool;
}

/// No-op link for nodes without a platform layer (and for tests).
pub struct NullLink;

#[async_trait]
impl NetworkLink for NullLink {
    async fn self_heal(&self) -> bool {
        true
    }

    async fn solar_times(&self) -> Option<SolarTimes> {
        None
    }

    async fn sync_clock(&self) -> bool {
        false
    }
}
