//! # Solar time-of-day table.
//!
//! Sunrise/sunset are not literal clock times: the platform link refreshes
//! them periodically (a built-in cron entry drives the refresh), and the
//! scheduler resolves solar tags against the latest table. Offsets are
//! applied in minutes and wrap across midnight in both directions.

use std::sync::RwLock;

use crate::sched::spec::SolarTag;

/// Seconds in one day.
pub const DAY_SECS: u32 = 86_400;

/// Today's solar times, as seconds since midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SolarTimes {
    /// Sunrise, seconds since midnight.
    pub sunrise: u32,
    /// Sunset, seconds since midnight.
    pub sunset: u32,
}

impl SolarTimes {
    /// Builds a table entry from `(h, m, s)` pairs.
    pub fn from_hms(sunrise: (u32, u32, u32), sunset: (u32, u32, u32)) -> Self {
        let secs = |(h, m, s): (u32, u32, u32)| (h * 3600 + m * 60 + s) % DAY_SECS;
        Self {
            sunrise: secs(sunrise),
            sunset: secs(sunset),
        }
    }
}

/// Shared, periodically refreshed solar table.
pub struct SolarTable {
    times: RwLock<Option<SolarTimes>>,
}

impl SolarTable {
    /// Creates an empty table (solar specs stay dormant until a refresh).
    pub fn new() -> Self {
        Self {
            times: RwLock::new(None),
        }
    }

    /// Installs a freshly fetched table.
    pub fn set(&self, times: SolarTimes) {
        if let Ok(mut slot) = self.times.write() {
            *slot = Some(times);
        }
    }

    /// Current table, if any refresh has succeeded yet.
    pub fn get(&self) -> Option<SolarTimes> {
        self.times.read().ok().and_then(|slot| *slot)
    }

    /// Resolves a tag plus signed minute offset to seconds-since-midnight,
    /// wrapping across midnight. `None` while the table is unpopulated.
    pub fn resolve(&self, tag: SolarTag, offset_min: i32) -> Option<u32> {
        let times = self.get()?;
        let base = match tag {
            SolarTag::Sunrise => times.sunrise,
            SolarTag::Sunset => times.sunset,
        };
        let shifted =
            (i64::from(base) + i64::from(offset_min) * 60).rem_euclid(i64::from(DAY_SECS));
        Some(shifted as u32)
    }
}

impl Default for SolarTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpopulated_table_resolves_nothing() {
        let table = SolarTable::new();
        assert_eq!(table.resolve(SolarTag::Sunrise, 0), None);
    }

    #[test]
    fn test_offset_applies_and_wraps_midnight() {
        let table = SolarTable::new();
        table.set(SolarTimes::from_hms((6, 30, 0), (23, 50, 0)));

        assert_eq!(table.resolve(SolarTag::Sunrise, 0), Some(6 * 3600 + 30 * 60));
        assert_eq!(
            table.resolve(SolarTag::Sunrise, -45),
            Some(5 * 3600 + 45 * 60),
            "negative offset shifts earlier"
        );
        assert_eq!(
            table.resolve(SolarTag::Sunset, 30),
            Some(20 * 60),
            "sunset 23:50 + 30min wraps to 00:20"
        );
        assert_eq!(
            table.resolve(SolarTag::Sunrise, -7 * 60),
            Some(DAY_SECS - 30 * 60),
            "sunrise 06:30 - 7h wraps back to 23:30"
        );
    }
}
