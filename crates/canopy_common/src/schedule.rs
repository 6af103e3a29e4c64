//! Schedule table: cron-style triggers with misfire grace windows.
//!
//! All times are in the fixed UTC reference; timezone and DST handling are
//! deliberately out of scope. A trigger is a (day-of-week set, hour, minute)
//! specification with minute granularity, so each entry has at most one
//! nominal occurrence per matching day.

use chrono::{DateTime, Datelike, Days, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CanopyError;
use crate::outputs::{OutputId, OutputState};

/// Default misfire grace, matching the historical deployment (one minute).
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 60;

/// Cron-style trigger time. `days` is a set of weekdays (0 = Monday ..
/// 6 = Sunday); `None` means every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    #[serde(default)]
    pub days: Option<Vec<u8>>,
    pub hour: u32,
    pub minute: u32,
}

impl CronSpec {
    /// Every day at `hour:minute`.
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            days: None,
            hour,
            minute,
        }
    }

    pub fn matches_day(&self, weekday: Weekday) -> bool {
        match &self.days {
            None => true,
            Some(days) => days
                .iter()
                .any(|d| u32::from(*d) == weekday.num_days_from_monday()),
        }
    }

    /// The most recent nominal occurrence at or before `now`, if any day in
    /// the last week matches.
    pub fn prev_occurrence(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        for back in 0..=7u64 {
            let day = now.date_naive().checked_sub_days(Days::new(back))?;
            if !self.matches_day(day.weekday()) {
                continue;
            }
            let nominal = Utc.from_utc_datetime(&day.and_hms_opt(self.hour, self.minute, 0)?);
            if nominal <= now {
                return Some(nominal);
            }
        }
        None
    }

    fn validate(&self, name: &str) -> Result<(), CanopyError> {
        if self.hour > 23 || self.minute > 59 {
            return Err(CanopyError::Schedule(format!(
                "'{}': invalid trigger time {:02}:{:02}",
                name, self.hour, self.minute
            )));
        }
        if let Some(days) = &self.days {
            if days.is_empty() {
                return Err(CanopyError::Schedule(format!("'{}' never fires: empty day set", name)));
            }
            if days.iter().any(|d| *d > 6) {
                return Err(CanopyError::Schedule(format!("'{}': day-of-week out of range", name)));
            }
        }
        Ok(())
    }
}

/// What a trigger does when it fires. Catch-up replay and live firing both
/// go through this single definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Set every output of a named group, sequentially.
    SetGroup { group: String, state: OutputState },
    /// Set a single output.
    SetOutput { output: OutputId, state: OutputState },
    /// Misting routine: tier fans run inverse to the pump so the spray is
    /// not blown off the plants.
    Mist { on: bool },
}

/// One schedule table entry. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub name: String,
    #[serde(flatten)]
    pub spec: CronSpec,
    pub action: ActionSpec,
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,
}

fn default_misfire_grace() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}

impl ScheduledAction {
    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.misfire_grace_secs as i64)
    }
}

/// Validated, immutable schedule table. Loaded once at startup.
#[derive(Debug, Clone)]
pub struct ScheduleTable {
    entries: Vec<ScheduledAction>,
}

impl ScheduleTable {
    pub fn new(entries: Vec<ScheduledAction>) -> Result<Self, CanopyError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(CanopyError::Schedule(format!(
                    "duplicate schedule entry name '{}'",
                    entry.name
                )));
            }
            entry.spec.validate(&entry.name)?;
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScheduledAction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    #[test]
    fn prev_occurrence_same_day() {
        let spec = CronSpec::daily(12, 0);
        let now = at(2024, 6, 3, 13, 5);
        assert_eq!(spec.prev_occurrence(now), Some(at(2024, 6, 3, 12, 0)));
    }

    #[test]
    fn prev_occurrence_rolls_to_previous_day() {
        let spec = CronSpec::daily(18, 15);
        let now = at(2024, 6, 3, 13, 5);
        assert_eq!(spec.prev_occurrence(now), Some(at(2024, 6, 2, 18, 15)));
    }

    #[test]
    fn prev_occurrence_exactly_at_nominal_minute() {
        let spec = CronSpec::daily(12, 0);
        let now = at(2024, 6, 3, 12, 0);
        assert_eq!(spec.prev_occurrence(now), Some(now));
    }

    #[test]
    fn prev_occurrence_honors_day_set() {
        // 2024-06-03 is a Monday (day 0).
        let spec = CronSpec {
            days: Some(vec![4]), // Friday
            hour: 9,
            minute: 30,
        };
        let now = at(2024, 6, 3, 13, 0);
        assert_eq!(spec.prev_occurrence(now), Some(at(2024, 5, 31, 9, 30)));
    }

    #[test]
    fn table_rejects_duplicate_names() {
        let entry = ScheduledAction {
            name: "mist_on_first".into(),
            spec: CronSpec::daily(13, 0),
            action: ActionSpec::Mist { on: true },
            misfire_grace_secs: 60,
        };
        let err = ScheduleTable::new(vec![entry.clone(), entry]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn table_rejects_invalid_times() {
        let entry = ScheduledAction {
            name: "bad".into(),
            spec: CronSpec::daily(24, 0),
            action: ActionSpec::Mist { on: true },
            misfire_grace_secs: 60,
        };
        assert!(ScheduleTable::new(vec![entry]).is_err());
    }

    #[test]
    fn table_rejects_empty_day_set() {
        let entry = ScheduledAction {
            name: "never".into(),
            spec: CronSpec {
                days: Some(vec![]),
                hour: 1,
                minute: 0,
            },
            action: ActionSpec::Mist { on: false },
            misfire_grace_secs: 60,
        };
        assert!(ScheduleTable::new(vec![entry]).is_err());
    }

    #[test]
    fn entry_parses_from_toml() {
        let entry: ScheduledAction = toml::from_str(
            r#"
            name = "main_lights_on_am"
            hour = 12
            minute = 0
            action = { kind = "set_group", group = "main_lights", state = "ON" }
            "#,
        )
        .unwrap();
        assert_eq!(entry.misfire_grace_secs, DEFAULT_MISFIRE_GRACE_SECS);
        assert_eq!(
            entry.action,
            ActionSpec::SetGroup {
                group: "main_lights".into(),
                state: OutputState::On
            }
        );
    }
}
