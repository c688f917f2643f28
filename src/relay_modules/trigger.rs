use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

/// The weekly window during which a trigger's alerts are treated as scheduled
/// test alerts and not forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionSchedule {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SuppressionSchedule {
    /// True when `now` falls on the schedule's weekday and its time of day lies
    /// within `[start, end]`, both boundaries included.
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let time_of_day = now.time();
        now.weekday() == self.weekday && time_of_day >= self.start && time_of_day <= self.end
    }
}

/// A rule binding an alert key to an outbound request and local actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub key: String,
    pub name: String,
    pub schedule: SuppressionSchedule,
    /// Query parameters for the alarm API, in configuration order.
    pub request: Vec<(String, String)>,
    pub local: bool,
}

pub fn is_suppressed(trigger: &Trigger, now: NaiveDateTime) -> bool {
    trigger.schedule.contains(now)
}

/// Ordered, immutable set of triggers loaded at startup.
#[derive(Debug, Clone)]
pub struct TriggerTable {
    triggers: Vec<Trigger>,
}

impl TriggerTable {
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Self { triggers }
    }

    /// First trigger whose key equals `key` exactly.
    pub fn match_key(&self, key: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|trigger| trigger.key == key)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter()
    }
}
