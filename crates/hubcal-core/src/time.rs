//! Zoned time types for hub aggregation.
//!
//! This module provides [`DateTimeWithZone`], the pairing of a wall-clock time
//! with the timezone it was observed in, plus the helpers every collector and
//! store uses to answer "is this event still current for the hub?":
//!
//! - [`resolve_zone`]: IANA names and the short Windows-style names hubs are
//!   configured with (`eastern`, `Pacific Standard Time`, ...)
//! - [`midnight_in_tz`]: the start of "today" in a hub's timezone
//! - [`TimeWindow`]: the inclusive expansion window for recurring events
//! - [`DateKey`]: the per-day bucket key used by the presentation index

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

/// Format used for zoneless wall-clock times and dedup keys.
pub const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Short and Windows-style zone names mapped to IANA identifiers.
const WINDOWS_ZONES: &[(&str, &str)] = &[
    ("eastern", "America/New_York"),
    ("us eastern", "America/Indiana/Indianapolis"),
    ("central", "America/Chicago"),
    ("mountain", "America/Denver"),
    ("us mountain", "America/Phoenix"),
    ("arizona", "America/Phoenix"),
    ("pacific", "America/Los_Angeles"),
    ("alaskan", "America/Anchorage"),
    ("hawaiian", "Pacific/Honolulu"),
    ("atlantic", "America/Halifax"),
    ("newfoundland", "America/St_Johns"),
    ("gmt", "Europe/London"),
    ("utc", "UTC"),
    ("w. europe", "Europe/Berlin"),
    ("central europe", "Europe/Budapest"),
    ("romance", "Europe/Paris"),
    ("e. europe", "Europe/Chisinau"),
    ("aus eastern", "Australia/Sydney"),
    ("new zealand", "Pacific/Auckland"),
    ("tokyo", "Asia/Tokyo"),
    ("india", "Asia/Kolkata"),
    ("china", "Asia/Shanghai"),
];

/// Resolves a configured timezone name.
///
/// Accepts IANA identifiers (`America/New_York`), and the Windows-style names
/// used by older hub metadata, with or without the ` Standard Time` suffix and
/// in any case (`eastern`, `Eastern Standard Time`).
///
/// # Errors
///
/// Returns [`CoreError::UnknownTimezone`] when no mapping exists.
pub fn resolve_zone(name: &str) -> CoreResult<Tz> {
    let trimmed = name.trim();
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Ok(tz);
    }

    let lowered = trimmed.to_lowercase();
    let short = lowered
        .strip_suffix(" standard time")
        .unwrap_or(&lowered)
        .trim();

    WINDOWS_ZONES
        .iter()
        .find(|(windows, _)| *windows == short)
        .and_then(|(_, iana)| iana.parse::<Tz>().ok())
        .ok_or_else(|| CoreError::unknown_timezone(name))
}

/// Converts a wall-clock time to UTC in the given zone.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Times inside a
/// DST gap are moved forward by the gap length, matching what a clock on the
/// wall would read.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
                LocalResult::None => Utc.from_utc_datetime(&local),
            }
        }
    }
}

/// A wall-clock time paired with the timezone it belongs to.
///
/// The canonical UTC instant is computed once at construction, so every
/// comparison is between instants and never between naive local times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTimeWithZone {
    utc: DateTime<Utc>,
    tz: Tz,
}

impl DateTimeWithZone {
    /// Creates a zoned time from a wall-clock time observed in `tz`.
    pub fn from_local(local: NaiveDateTime, tz: Tz) -> Self {
        Self {
            utc: local_to_utc(local, tz),
            tz,
        }
    }

    /// Creates a zoned time from a UTC instant, to be viewed in `tz`.
    pub fn from_utc(utc: DateTime<Utc>, tz: Tz) -> Self {
        Self { utc, tz }
    }

    /// Creates a zoned time at local midnight of `date`.
    pub fn from_date(date: NaiveDate, tz: Tz) -> Self {
        Self::from_local(date.and_time(NaiveTime::MIN), tz)
    }

    /// Returns the canonical UTC instant.
    pub fn universal_time(&self) -> DateTime<Utc> {
        self.utc
    }

    /// Returns the wall-clock time in this value's zone.
    pub fn local_time(&self) -> NaiveDateTime {
        self.utc.with_timezone(&self.tz).naive_local()
    }

    /// Returns the local calendar date.
    pub fn local_date(&self) -> NaiveDate {
        self.local_time().date()
    }

    /// Returns the timezone.
    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// Returns the same instant viewed from another zone.
    pub fn in_zone(&self, tz: Tz) -> Self {
        Self { utc: self.utc, tz }
    }

    /// Adds a duration, keeping the zone.
    pub fn plus(&self, duration: Duration) -> Self {
        Self {
            utc: self.utc + duration,
            tz: self.tz,
        }
    }
}

impl PartialOrd for DateTimeWithZone {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DateTimeWithZone {
    fn cmp(&self, other: &Self) -> Ordering {
        self.utc
            .cmp(&other.utc)
            .then_with(|| self.tz.name().cmp(other.tz.name()))
    }
}

impl fmt::Display for DateTimeWithZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.local_time().format(LOCAL_FORMAT), self.tz.name())
    }
}

/// Stored form. `utc` is authoritative; `local` is kept for readers and
/// only used when `utc` is missing, where a repeated local hour resolves to
/// its earlier instant.
#[derive(Serialize, Deserialize)]
struct ZonedRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    utc: Option<DateTime<Utc>>,
    local: String,
    tz: String,
}

impl Serialize for DateTimeWithZone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ZonedRepr {
            utc: Some(self.utc),
            local: self.local_time().format(LOCAL_FORMAT).to_string(),
            tz: self.tz.name().to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DateTimeWithZone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ZonedRepr::deserialize(deserializer)?;
        let tz = resolve_zone(&repr.tz).map_err(serde::de::Error::custom)?;
        if let Some(utc) = repr.utc {
            return Ok(Self::from_utc(utc, tz));
        }
        let local = NaiveDateTime::parse_from_str(&repr.local, LOCAL_FORMAT)
            .map_err(serde::de::Error::custom)?;
        Ok(Self::from_local(local, tz))
    }
}

/// Returns the most recent local midnight in `tz` at instant `now`.
pub fn midnight_in_tz(now: DateTime<Utc>, tz: Tz) -> DateTimeWithZone {
    let today = now.with_timezone(&tz).date_naive();
    DateTimeWithZone::from_date(today, tz)
}

/// Returns true if a wall-clock start in `tz` is at or after today's midnight.
pub fn is_current_or_future(local_start: NaiveDateTime, tz: Tz, now: DateTime<Utc>) -> bool {
    local_to_utc(local_start, tz) >= midnight_in_tz(now, tz).universal_time()
}

/// Formats a wall-clock time the way zoneless stores and dedup keys do.
pub fn format_local(local: &NaiveDateTime) -> String {
    local.format(LOCAL_FORMAT).to_string()
}

/// An inclusive window of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (inclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new window, swapping the bounds if given in reverse.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// The recurrence horizon: local midnight today through `days` days later.
    pub fn horizon(now: DateTime<Utc>, tz: Tz, days: u32) -> Self {
        let midnight = midnight_in_tz(now, tz);
        let end_date = midnight.local_date() + Duration::days(i64::from(days));
        Self::new(
            midnight.universal_time(),
            DateTimeWithZone::from_date(end_date, tz).universal_time(),
        )
    }

    /// Returns true if `instant` lies inside the window, bounds included.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// Returns the window length.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

static DATEKEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^d(\d{4})(\d{2})(\d{2})$").expect("datekey regex is valid"));

/// Key for one calendar day in the zoneless presentation index (`d20100704`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(NaiveDate);

impl DateKey {
    /// Creates a key for a date.
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Returns the key for the date part of a wall-clock time.
    pub fn from_local(local: &NaiveDateTime) -> Self {
        Self(local.date())
    }

    /// Returns the date.
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0.format("%Y%m%d"))
    }
}

impl FromStr for DateKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DATEKEY_RE
            .captures(s)
            .ok_or_else(|| CoreError::invalid_datekey(s))?;
        let part = |i: usize| caps[i].parse::<u32>().ok();
        let date = match (caps[1].parse::<i32>().ok(), part(2), part(3)) {
            (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        };
        date.map(Self).ok_or_else(|| CoreError::invalid_datekey(s))
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
