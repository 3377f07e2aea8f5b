//! iCalendar feeds: cleanup, parsing, validation and collection.

pub mod collector;
pub mod parse;
pub mod quirk;
pub mod validate;

pub use collector::collect_ical;
pub use parse::{FeedEvent, FeedTime, ParsedFeed, parse_feed, resolve_tzid};
pub use quirk::{FeedQuirk, UnescapeSemicolons, prepare_feed_text, quirk_for};
pub use validate::validation_score;
