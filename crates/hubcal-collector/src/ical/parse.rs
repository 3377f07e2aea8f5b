//! iCalendar feed parsing.
//!
//! Turns feed text into [`FeedEvent`] values that still carry the feed's own
//! time representation; conversion to the hub's zone happens in the
//! collector.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use hubcal_core::{DateTimeWithZone, Tz, resolve_zone};
use icalendar::{Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, EventLike};
use regex::Regex;
use tracing::{debug, trace};

use crate::error::{CollectorError, CollectorResult};
use crate::recurrence::RecurrenceRule;

static PRODID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^PRODID:(.+)$").expect("prodid regex is valid"));

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^VERSION:").expect("version regex is valid"));

/// A DTSTART or DTEND value as written in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedTime {
    /// Date only: an all-day event.
    Date(NaiveDate),
    /// UTC instant (`...Z`).
    Utc(DateTime<Utc>),
    /// Wall-clock time with no zone, taken as hub local.
    Floating(NaiveDateTime),
    /// Wall-clock time with a TZID parameter.
    Zoned { local: NaiveDateTime, tzid: String },
}

impl FeedTime {
    /// Returns true for date-only values.
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// Interprets the value, keeping the zone it was written in.
    ///
    /// Unresolvable TZIDs, floating times and dates fall back to `hub_tz`.
    pub fn to_zoned(&self, hub_tz: Tz) -> DateTimeWithZone {
        match self {
            Self::Date(date) => DateTimeWithZone::from_date(*date, hub_tz),
            Self::Utc(utc) => DateTimeWithZone::from_utc(*utc, Tz::UTC),
            Self::Floating(local) => DateTimeWithZone::from_local(*local, hub_tz),
            Self::Zoned { local, tzid } => {
                DateTimeWithZone::from_local(*local, resolve_tzid(tzid).unwrap_or(hub_tz))
            }
        }
    }
}

impl From<DatePerhapsTime> for FeedTime {
    fn from(value: DatePerhapsTime) -> Self {
        match value {
            DatePerhapsTime::Date(date) => Self::Date(date),
            DatePerhapsTime::DateTime(CalendarDateTime::Utc(utc)) => Self::Utc(utc),
            DatePerhapsTime::DateTime(CalendarDateTime::Floating(local)) => Self::Floating(local),
            DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
                Self::Zoned {
                    local: date_time,
                    tzid,
                }
            }
        }
    }
}

/// Resolves a TZID, including vendor-prefixed ones such as
/// `/mozilla.org/20050126_1/America/New_York`.
pub fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let tzid = tzid.trim().trim_matches('"');
    if let Ok(tz) = resolve_zone(tzid) {
        return Some(tz);
    }
    let parts: Vec<&str> = tzid.split('/').filter(|p| !p.is_empty()).collect();
    (1..parts.len())
        .rev()
        .find_map(|n| resolve_zone(&parts[parts.len() - n..].join("/")).ok())
}

/// One VEVENT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEvent {
    /// UID, if present.
    pub uid: Option<String>,
    /// SUMMARY, if present.
    pub summary: Option<String>,
    /// DESCRIPTION, unescaped.
    pub description: String,
    /// LOCATION, unescaped.
    pub location: String,
    /// URL property.
    pub url: Option<String>,
    /// CATEGORIES, comma-joined.
    pub categories: String,
    /// GEO as `(lat, lon)`.
    pub geo: Option<(String, String)>,
    /// DTSTART.
    pub start: Option<FeedTime>,
    /// DTEND.
    pub end: Option<FeedTime>,
    /// RRULE and EXDATEs.
    pub recurrence: Option<RecurrenceRule>,
    /// RECURRENCE-ID of an edited instance of a recurring event.
    pub recurrence_id: Option<String>,
}

/// A parsed feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    /// PRODID, or `unknown`.
    pub prodid: String,
    /// Whether a VERSION property was present.
    pub has_version: bool,
    /// Events in feed order.
    pub events: Vec<FeedEvent>,
}

/// Reverses RFC 5545 text escaping.
pub fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Returns the feed's PRODID, or `unknown`.
pub fn find_prodid(text: &str) -> String {
    PRODID_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_geo(value: &str) -> Option<(String, String)> {
    let (lat, lon) = value.split_once(';')?;
    let (lat, lon) = (lat.trim(), lon.trim());
    (!lat.is_empty() && !lon.is_empty()).then(|| (lat.to_string(), lon.to_string()))
}

fn parse_event(event: &icalendar::Event) -> FeedEvent {
    let recurrence = event.property_value("RRULE").map(|rrule| RecurrenceRule {
        rrule: rrule.to_string(),
        exdates: event
            .property_value("EXDATE")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
    });

    let parsed = FeedEvent {
        uid: event.get_uid().map(str::to_string),
        summary: event.get_summary().map(unescape_text),
        description: event.get_description().map(unescape_text).unwrap_or_default(),
        location: event.get_location().map(unescape_text).unwrap_or_default(),
        url: event.property_value("URL").map(|u| u.trim().to_string()),
        categories: event
            .property_value("CATEGORIES")
            .map(unescape_text)
            .unwrap_or_default(),
        geo: event.property_value("GEO").and_then(parse_geo),
        start: event.get_start().map(FeedTime::from),
        end: event.get_end().map(FeedTime::from),
        recurrence,
        recurrence_id: event
            .property_value("RECURRENCE-ID")
            .map(|v| v.trim().to_string()),
    };
    trace!(uid = ?parsed.uid, summary = ?parsed.summary, "parsed feed event");
    parsed
}

/// Parses feed text.
///
/// # Errors
///
/// Returns a parse error if the text is not an iCalendar document.
pub fn parse_feed(text: &str) -> CollectorResult<ParsedFeed> {
    if !text.contains("BEGIN:VCALENDAR") {
        return Err(CollectorError::parse("not an iCalendar document"));
    }
    let calendar = text
        .parse::<Calendar>()
        .map_err(|e| CollectorError::parse(format!("failed to parse iCalendar: {e}")))?;

    let events: Vec<FeedEvent> = calendar
        .iter()
        .filter_map(|component| match component {
            CalendarComponent::Event(event) => Some(parse_event(event)),
            _ => None,
        })
        .collect();

    debug!(count = events.len(), "parsed feed");
    Ok(ParsedFeed {
        prodid: find_prodid(text),
        has_version: VERSION_RE.is_match(text),
        events,
    })
}
