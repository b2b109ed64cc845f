//! Cron scheduling: entry grammar, solar table, tick evaluation.
//!
//! Internal modules:
//! - [`spec`]: `WD:H:M:S!action` / solar-tag grammar with weekday ranges;
//! - [`solar`]: sunrise/sunset time-of-day table with offset wrap;
//! - [`scheduler`]: tolerance-window matching, fire-once dedup, builtins.

mod scheduler;
mod solar;
mod spec;

pub use scheduler::{BuiltinJob, ClockNow, CronAction, Scheduler};
pub use solar::{SolarTable, SolarTimes, DAY_SECS};
pub use spec::{parse_crontab, parse_when, CronRule, CronWhen, SolarTag, TimeField, WeekdayField};
