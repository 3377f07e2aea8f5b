//! Canonical URL, description and categories for feed events.
//!
//! Feed events reach us with links in whatever field the curator's calendar
//! tool put them. The normalizer picks one URL with a fixed precedence:
//!
//! 1. the event's own `URL` property, if it is an http(s) URL
//! 2. the feed-level URL configured for the feed
//! 3. the description, if the whole description is a bare URL
//! 4. the location, if the whole location is a bare URL
//! 5. a `url=` key embedded in the description
//!
//! Categories are the event's own, plus the feed-level list, plus any
//! `category=` key in the description, as an ordered set.

use std::collections::HashMap;
use std::sync::LazyLock;

use hubcal_core::{FeedSpec, category_tags, join_categories};
use regex::Regex;

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(url|category)=([^\s]+)").expect("key/value regex is valid")
});

/// Finds `url=...` and `category=...` pairs in free text.
///
/// Values run to the next whitespace, so `url = http://...` does not match.
/// The first occurrence of a key wins.
pub fn find_keys_and_values(text: &str) -> HashMap<String, String> {
    let mut found = HashMap::new();
    for caps in KEY_VALUE_RE.captures_iter(text) {
        found
            .entry(caps[1].to_string())
            .or_insert_with(|| caps[2].to_string());
    }
    found
}

/// Returns true if `text`, trimmed, is a single http(s) URL.
pub fn is_bare_url(text: &str) -> bool {
    let text = text.trim();
    (text.starts_with("http://") || text.starts_with("https://"))
        && !text.chars().any(char::is_whitespace)
        && url::Url::parse(text).is_ok()
}

/// Link-bearing fields of a feed event.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlCandidates<'a> {
    /// The event's `URL` property.
    pub event_url: Option<&'a str>,
    /// The feed-level URL.
    pub feed_url: Option<&'a str>,
    /// Event description.
    pub description: &'a str,
    /// Event location.
    pub location: &'a str,
}

/// Picks the event URL by precedence. Returns an empty string if none fits.
pub fn resolve_url(candidates: &UrlCandidates<'_>) -> String {
    let event_url = candidates.event_url.map(str::trim).filter(|u| is_bare_url(u));
    let feed_url = candidates.feed_url.map(str::trim).filter(|u| !u.is_empty());
    let description = Some(candidates.description.trim()).filter(|d| is_bare_url(d));
    let location = Some(candidates.location.trim()).filter(|l| is_bare_url(l));

    event_url
        .or(feed_url)
        .or(description)
        .or(location)
        .map(str::to_string)
        .or_else(|| find_keys_and_values(candidates.description).remove("url"))
        .unwrap_or_default()
}

/// Appends a "for more info" sentence unless the description already
/// mentions `url`.
pub fn with_more_info(description: &str, url: &str) -> String {
    if url.is_empty() || description.contains(url) {
        return description.to_string();
    }
    let description = description.trim_end();
    if description.is_empty() {
        format!("For more info: {url}")
    } else {
        format!("{description}\n\nFor more info: {url}")
    }
}

/// Canonical fields of a feed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Chosen URL, possibly empty.
    pub url: String,
    /// Description, with a pointer to the URL when it did not mention it.
    pub description: String,
    /// Location, trimmed.
    pub location: String,
    /// Comma-joined categories.
    pub categories: String,
}

/// Normalizes one feed event's link, description and categories.
pub fn normalize_feed_event(
    event_url: Option<&str>,
    description: &str,
    location: &str,
    event_categories: &str,
    feed: &FeedSpec,
) -> Normalized {
    let url = resolve_url(&UrlCandidates {
        event_url,
        feed_url: feed.url_override.as_deref(),
        description,
        location,
    });

    let meta = find_keys_and_values(description);
    let mut tags = category_tags(event_categories);
    if let Some(feed_categories) = feed.categories.as_deref() {
        tags.extend(category_tags(feed_categories));
    }
    if let Some(category) = meta.get("category") {
        tags.extend(category_tags(category));
    }

    Normalized {
        description: with_more_info(description, &url),
        url,
        location: location.trim().to_string(),
        categories: join_categories(tags),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod keys {
        use super::*;

        #[test]
        fn finds_two_pairs() {
            let text = "Four score and seven years ago.\n\n\
                        url=http://americancivilwar.com/north/lincoln.html\n\
                        category=government,speech\n";
            let found = find_keys_and_values(text);
            assert_eq!(found.len(), 2);
            assert_eq!(found["url"], "http://americancivilwar.com/north/lincoln.html");
            assert_eq!(found["category"], "government,speech");
        }

        #[test]
        fn spaced_pair_does_not_match() {
            let text = "url = http://americancivilwar.com/north/lincoln.html\ncategory=government";
            let found = find_keys_and_values(text);
            assert!(!found.contains_key("url"));
            assert_eq!(found["category"], "government");
        }

        #[test]
        fn first_occurrence_wins() {
            let found = find_keys_and_values("url=http://a url=http://b");
            assert_eq!(found["url"], "http://a");
        }
    }

    mod url {
        use super::*;

        #[test]
        fn bare_url_detection() {
            assert!(is_bare_url(" http://example.org/x "));
            assert!(is_bare_url("https://example.org"));
            assert!(!is_bare_url("see http://example.org"));
            assert!(!is_bare_url("message:%3C001@net%3E"));
        }

        #[test]
        fn precedence_order() {
            let mut c = UrlCandidates {
                event_url: Some("http://event"),
                feed_url: Some("http://feed"),
                description: "http://desc",
                location: "http://loc",
            };
            assert_eq!(resolve_url(&c), "http://event");

            c.event_url = Some("message:abc");
            assert_eq!(resolve_url(&c), "http://feed");

            c.feed_url = None;
            assert_eq!(resolve_url(&c), "http://desc");

            c.description = "Bring snacks. url=http://key";
            assert_eq!(resolve_url(&c), "http://loc");

            c.location = "Town Hall";
            assert_eq!(resolve_url(&c), "http://key");

            c.description = "Bring snacks.";
            assert_eq!(resolve_url(&c), "");
        }
    }

    mod description {
        use super::*;

        #[test]
        fn more_info_is_appended_once() {
            assert_eq!(
                with_more_info("Live music.", "http://a"),
                "Live music.\n\nFor more info: http://a"
            );
            assert_eq!(with_more_info("See http://a", "http://a"), "See http://a");
            assert_eq!(with_more_info("", "http://a"), "For more info: http://a");
            assert_eq!(with_more_info("Live music.", ""), "Live music.");
        }
    }

    #[test]
    fn feed_event_categories_are_unioned() {
        let feed = FeedSpec::new("http://a.org/cal.ics", "A")
            .with_categories("music,arts")
            .with_url_override("http://a.org");
        let normalized = normalize_feed_event(
            None,
            "Jam session category=folk,music",
            " Main St ",
            "music",
            &feed,
        );
        assert_eq!(normalized.url, "http://a.org");
        assert_eq!(normalized.categories, "music,arts,folk");
        assert_eq!(normalized.location, "Main St");
        assert!(normalized.description.ends_with("For more info: http://a.org"));
    }
}
