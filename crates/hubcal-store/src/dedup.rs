//! Cross-source deduplication.
//!
//! Every flavor's zoned store is converted to the hub's wall clock and
//! events sharing a key are collapsed into one. The first event seen for a
//! key (flavors in the order given, ical first) is the representative; its
//! categories become the sorted union of every duplicate's tags and its
//! `urls_and_sources` map gains every duplicate's pair.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use hubcal_core::{Tz, ZonelessEvent, format_local};
use tracing::debug;

use crate::event_store::{ZonedEventStore, ZonelessEventStore};

/// How events are matched across sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupMode {
    /// Exact title plus start time.
    #[default]
    Exact,
    /// Title case-folded, whitespace-collapsed and stripped of punctuation,
    /// plus start time.
    NormalizedTitle,
}

impl DedupMode {
    /// Returns the matching key of an event.
    pub fn key(&self, event: &ZonelessEvent) -> String {
        match self {
            Self::Exact => event.title_and_time(),
            Self::NormalizedTitle => {
                format!("{}{}", normalize_title(&event.event.title), format_local(&event.dtstart))
            }
        }
    }
}

fn normalize_title(title: &str) -> String {
    let folded: String = title
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Group {
    event: ZonelessEvent,
    tags: BTreeSet<String>,
}

/// Merges zoned stores into the hub's zoneless store.
///
/// Events before midnight today (hub zone) are dropped and the result is
/// sorted by start, then title.
pub fn merge_zoned_stores(
    hub: &str,
    tz: Tz,
    stores: &[ZonedEventStore],
    now: DateTime<Utc>,
    mode: DedupMode,
) -> ZonelessEventStore {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();
    let mut input = 0usize;

    for store in stores {
        for zoned in &store.events {
            input += 1;
            let event = zoned.to_zoneless(tz);
            let key = mode.key(&event);
            match groups.get_mut(&key) {
                Some(group) => {
                    group.tags.extend(event.event.tags());
                    for (url, source) in event.urls_and_sources {
                        group.event.urls_and_sources.entry(url).or_insert(source);
                    }
                }
                None => {
                    let tags = event.event.tags().into_iter().collect();
                    order.push(key.clone());
                    groups.insert(key, Group { event, tags });
                }
            }
        }
    }

    let mut merged = ZonelessEventStore::new(hub, tz);
    for key in order {
        let Some(Group { mut event, tags }) = groups.remove(&key) else {
            continue;
        };
        let union = tags.into_iter().collect::<Vec<_>>().join(",");
        if union != event.event.categories {
            event.original_categories = Some(std::mem::replace(&mut event.event.categories, union));
        }
        merged.events.push(event);
    }

    let unique = merged.len();
    merged.exclude_past(now);
    merged.sort();
    debug!(
        hub,
        input,
        unique,
        kept = merged.len(),
        "merged zoned stores"
    );
    merged
}
