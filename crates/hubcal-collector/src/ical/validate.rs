//! Structural validation score for a feed.
//!
//! Counts required properties: VERSION and PRODID on the calendar, UID,
//! DTSTART and SUMMARY on each event. The score is the percentage present.

use super::parse::ParsedFeed;

/// Returns a 0-100 score. A feed is valid at 100.
pub fn validation_score(feed: &ParsedFeed) -> u8 {
    let mut total = 2u64;
    let mut passed = u64::from(feed.has_version) + u64::from(feed.prodid != "unknown");

    for event in &feed.events {
        total += 3;
        passed += u64::from(event.uid.as_deref().is_some_and(|u| !u.trim().is_empty()));
        passed += u64::from(event.start.is_some());
        passed += u64::from(event.summary.as_deref().is_some_and(|s| !s.trim().is_empty()));
    }

    // passed <= total, so the quotient fits
    u8::try_from(passed * 100 / total).unwrap_or(100)
}
