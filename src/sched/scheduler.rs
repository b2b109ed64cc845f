//! # Cron scheduler - tolerance-window matching with fire-once dedup.
//!
//! Every evaluation tick compares "now" (weekday + seconds-since-midnight)
//! against each configured entry:
//!
//! ```text
//! tick(now)
//!   ├─ prune fire cache        (records outside the tolerance window)
//!   └─ for each entry:
//!        ├─ resolve solar tag → (wd=*, sec-of-day), offset wrapped
//!        ├─ wildcard sub-fields of the spec follow "now"'s components
//!        ├─ weekday: * / exact / wrapping range must cover today
//!        ├─ |spec_sec − now_sec| ≤ tolerance
//!        ├─ non-wildcard-second spec already in cache → suppress
//!        └─ fire: command pipe via Dispatcher, or builtin job;
//!           record identity (resolved sec + action text)
//! ```
//!
//! ## Rules
//! - Entries are evaluated in configured order; each matching entry fires
//!   once per qualifying tick, deduplicated across ticks within the window.
//! - Built-in entries (solar-table refresh, clock sync) precede user rules.
//! - A tick never suspends mid-evaluation except inside the fired action
//!   itself; cache mutation happens strictly between suspension points.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::events::{Bus, Event, EventKind};
use crate::sched::solar::SolarTable;
use crate::sched::spec::{parse_crontab, parse_when, CronWhen, TimeField, WeekdayField};

/// Wall-clock "now" reduced to scheduler terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockNow {
    /// Weekday, 0=Monday..6=Sunday.
    pub weekday: u8,
    /// Hour 0..=23.
    pub hour: u32,
    /// Minute 0..=59.
    pub minute: u32,
    /// Second 0..=59.
    pub second: u32,
}

impl ClockNow {
    /// Derives local calendar time from a unix timestamp and the node's
    /// configured UTC offset. 1970-01-01 was a Thursday (weekday 3).
    pub fn from_unix(epoch_secs: i64, utc_offset_min: i64) -> Self {
        let local = epoch_secs + utc_offset_min * 60;
        let sec_of_day = local.rem_euclid(86_400) as u32;
        let days = local.div_euclid(86_400);
        Self {
            weekday: (days + 3).rem_euclid(7) as u8,
            hour: sec_of_day / 3600,
            minute: (sec_of_day % 3600) / 60,
            second: sec_of_day % 60,
        }
    }

    /// Local "now" from the system clock.
    pub fn now(utc_offset_min: i64) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::from_unix(epoch, utc_offset_min)
    }

    /// Seconds since local midnight.
    pub fn secs_of_day(&self) -> u32 {
        self.hour * 3600 + self.minute * 60 + self.second
    }
}

/// Periodic internal housekeeping fired by built-in cron entries.
#[async_trait]
pub trait BuiltinJob: Send + Sync + 'static {
    /// Stable job name (fire-cache identity and logs).
    fn name(&self) -> &'static str;

    /// Runs the job; false is reported but never fatal.
    async fn run(&self) -> bool;
}

/// What a cron entry does on match.
#[derive(Clone)]
pub enum CronAction {
    /// Command pipe executed through the dispatcher.
    Command(String),
    /// Built-in function reference.
    Builtin(Arc<dyn BuiltinJob>),
}

impl CronAction {
    fn key(&self) -> &str {
        match self {
            CronAction::Command(cmd) => cmd,
            CronAction::Builtin(job) => job.name(),
        }
    }
}

/// One scheduler entry.
#[derive(Clone)]
pub struct CronEntry {
    when: CronWhen,
    action: CronAction,
}

/// Fire-once record: `(identity, resolved second-of-day)`.
struct FireRecord {
    id: String,
    spec_sec: u32,
}

/// Time-spec scheduler over the command dispatcher.
pub struct Scheduler {
    entries: Vec<CronEntry>,
    solar: Arc<SolarTable>,
    dispatcher: Arc<Dispatcher>,
    bus: Bus,
    tolerance: u32,
    utc_offset_min: i64,
    fire_cache: Mutex<Vec<FireRecord>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        solar: Arc<SolarTable>,
        bus: Bus,
        tolerance_secs: u32,
        utc_offset_min: i64,
    ) -> Self {
        Self {
            entries: Vec::new(),
            solar,
            dispatcher,
            bus,
            tolerance: tolerance_secs.max(1),
            utc_offset_min,
            fire_cache: Mutex::new(Vec::new()),
        }
    }

    /// Appends a built-in entry. The spec string is trusted startup wiring;
    /// a typo there is a programming error worth surfacing loudly.
    pub fn add_builtin(&mut self, when: &str, job: Arc<dyn BuiltinJob>) {
        match parse_when(when) {
            Ok(when) => self.entries.push(CronEntry {
                when,
                action: CronAction::Builtin(job),
            }),
            Err(e) => warn!(spec = when, error = %e, "builtin cron spec rejected"),
        }
    }

    /// Parses and appends user crontab text. Bad entries are skipped and
    /// logged; good ones still arm.
    pub fn load_crontab(&mut self, raw: &str) {
        let (rules, errors) = parse_crontab(raw);
        for e in errors {
            warn!(error = %e, "crontab entry rejected");
        }
        for rule in rules {
            self.entries.push(CronEntry {
                when: rule.when,
                action: CronAction::Command(rule.action),
            });
        }
    }

    /// Number of armed entries (builtins included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluates one tick at the system clock.
    pub async fn tick_now(&self) -> bool {
        self.tick(&ClockNow::now(self.utc_offset_min)).await
    }

    /// Evaluates one tick at an explicit time. Returns true if anything fired.
    pub async fn tick(&self, now: &ClockNow) -> bool {
        let now_sec = now.secs_of_day();
        self.prune_cache(now_sec);

        let mut fired = false;
        for entry in &self.entries {
            fired |= self.evaluate(entry, now, now_sec).await;
        }
        fired
    }

    async fn evaluate(&self, entry: &CronEntry, now: &ClockNow, now_sec: u32) -> bool {
        let resolved = match entry.when {
            CronWhen::Clock {
                weekday,
                hour,
                minute,
                second,
            } => {
                let h = field_or(hour, now.hour);
                let m = field_or(minute, now.minute);
                let s = field_or(second, now.second);
                Some((
                    weekday,
                    h * 3600 + m * 60 + s,
                    matches!(second, TimeField::Any),
                ))
            }
            CronWhen::Solar { tag, offset_min } => self
                .solar
                .resolve(tag, offset_min)
                .map(|sec| (WeekdayField::Any, sec, false)),
        };
        let Some((wd_field, spec_sec, sec_wildcard)) = resolved else {
            return false; // solar table not populated yet
        };

        if !wd_field.matches(now.weekday) {
            return false;
        }
        let lower = now_sec.saturating_sub(self.tolerance);
        let upper = now_sec + self.tolerance;
        if !(lower..=upper).contains(&spec_sec) {
            return false;
        }

        let action_key = entry.action.key();
        let id = format!(
            "{wd_field}:{spec_sec}|{}",
            action_key.replace(' ', "")
        );
        if !sec_wildcard && self.cache_contains(&id) {
            self.bus
                .publish(Event::now(EventKind::CronSuppressed).with_task(action_key));
            return false;
        }

        let ok = match &entry.action {
            CronAction::Command(cmd) => self.dispatcher.exec_pipe(cmd).await,
            CronAction::Builtin(job) => job.run().await,
        };
        let mut event = Event::now(EventKind::CronFired).with_task(action_key);
        if !ok {
            event = event.with_reason("action reported failure");
        }
        self.bus.publish(event);

        if !sec_wildcard {
            if let Ok(mut cache) = self.fire_cache.lock() {
                cache.push(FireRecord { id, spec_sec });
            }
        }
        true
    }

    fn cache_contains(&self, id: &str) -> bool {
        self.fire_cache
            .lock()
            .map(|cache| cache.iter().any(|rec| rec.id == id))
            .unwrap_or(false)
    }

    /// Drops records whose resolved second has left the tolerance window.
    fn prune_cache(&self, now_sec: u32) {
        let tol = self.tolerance;
        if let Ok(mut cache) = self.fire_cache.lock() {
            cache.retain(|rec| {
                rec.spec_sec + tol >= now_sec && rec.spec_sec <= now_sec + tol
            });
        }
    }
}

fn field_or(field: TimeField, now_component: u32) -> u32 {
    match field {
        TimeField::Any => now_component,
        TimeField::Exact(v) => v,
    }
}
