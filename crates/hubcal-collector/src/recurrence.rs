//! RRULE expansion inside a bounded window.
//!
//! Each occurrence keeps the master's wall-clock time of day; only the
//! calendar date changes. Callers add the master's duration to get the end.

use chrono::{Duration, NaiveDateTime, Utc};
use hubcal_core::{DateTimeWithZone, TimeWindow, Tz};
use rrule::RRuleSet;

use crate::error::{CollectorError, CollectorResult};

/// Upper bound on occurrences produced for one master event.
pub const MAX_OCCURRENCES: u16 = 1000;

const ICAL_STAMP: &str = "%Y%m%dT%H%M%S";

/// A recurrence rule as found on a feed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceRule {
    /// RRULE value, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub rrule: String,
    /// EXDATE values in the master's zone (`YYYYMMDDTHHMMSS`, optionally `Z`).
    pub exdates: Vec<String>,
}

impl RecurrenceRule {
    /// Creates a rule without exceptions.
    pub fn new(rrule: impl Into<String>) -> Self {
        Self {
            rrule: rrule.into(),
            exdates: Vec::new(),
        }
    }
}

fn dtstart_line(prop: &str, local: NaiveDateTime, tz: Tz) -> String {
    if tz == Tz::UTC {
        format!("{prop}:{}Z", local.format(ICAL_STAMP))
    } else {
        format!("{prop};TZID={}:{}", tz.name(), local.format(ICAL_STAMP))
    }
}

fn build_rule_text(start: &DateTimeWithZone, rule: &RecurrenceRule) -> String {
    let tz = start.time_zone();
    let mut lines = vec![
        dtstart_line("DTSTART", start.local_time(), tz),
        format!("RRULE:{}", rule.rrule.trim()),
    ];
    for value in &rule.exdates {
        let value = value.trim();
        if let Some(utc) = value.strip_suffix('Z') {
            lines.push(format!("EXDATE:{utc}Z"));
        } else if let Ok(local) = NaiveDateTime::parse_from_str(value, ICAL_STAMP) {
            lines.push(dtstart_line("EXDATE", local, tz));
        }
    }
    lines.join("\n")
}

/// Expands `rule` from `start`, returning occurrence starts inside `window`.
///
/// Occurrences are re-stamped to the occurrence's date in the master's zone
/// with the master's local time of day.
pub fn expand_occurrences(
    start: &DateTimeWithZone,
    rule: &RecurrenceRule,
    window: &TimeWindow,
) -> CollectorResult<Vec<DateTimeWithZone>> {
    let text = build_rule_text(start, rule);
    let set: RRuleSet = text
        .parse()
        .map_err(|e| CollectorError::parse(format!("bad recurrence rule {}: {e}", rule.rrule)))?;

    // after/before are exclusive
    let tz: rrule::Tz = Utc.into();
    let after = (window.start - Duration::seconds(1)).with_timezone(&tz);
    let before = (window.end + Duration::seconds(1)).with_timezone(&tz);
    let result = set.after(after).before(before).all(MAX_OCCURRENCES);

    let master_tz = start.time_zone();
    let time_of_day = start.local_time().time();
    Ok(result
        .dates
        .iter()
        .map(|occ| {
            let date = occ.with_timezone(&master_tz).date_naive();
            DateTimeWithZone::from_local(date.and_time(time_of_day), master_tz)
        })
        .filter(|occ| window.contains(occ.universal_time()))
        .collect())
}
