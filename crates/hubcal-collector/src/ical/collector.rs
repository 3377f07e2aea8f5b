//! Collection of a hub's registered iCalendar feeds.
//!
//! Feeds are fetched concurrently and assembled in registration order. A
//! feed that cannot be fetched keeps its previous events and counters; a
//! feed that fetches but does not parse, or has no events, is skipped for
//! this run.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use futures_util::{StreamExt, stream};
use hubcal_core::{
    DateTimeWithZone, Event, FeedSpec, HubSettings, SourceFlavor, TimeWindow, ZonedEvent,
    midnight_in_tz,
};
use hubcal_store::{FeedRegistry, IcalStats, ZonedEventStore};
use tracing::{debug, info, trace, warn};

use super::parse::{FeedEvent, ParsedFeed, parse_feed};
use super::quirk::prepare_feed_text;
use super::validate::validation_score;
use crate::adapter::{CollectOptions, TEST_MAX_FEEDS};
use crate::error::{CollectorError, CollectorResult};
use crate::fetch::HttpFetcher;
use crate::normalize::normalize_feed_event;
use crate::recurrence::expand_occurrences;
use crate::retry::fetch_with_retry;
use crate::shutdown::StopSignal;

/// Everything a feed pass needs, shared by all feeds of a run.
struct FeedContext<'a> {
    settings: &'a HubSettings,
    fetcher: &'a dyn HttpFetcher,
    options: &'a CollectOptions,
    stop: &'a StopSignal,
    now: DateTime<Utc>,
    midnight: DateTimeWithZone,
    window: TimeWindow,
}

/// Result of one feed pass.
#[derive(Debug)]
enum FeedOutcome {
    /// Parsed; events and fresh stats.
    Collected {
        events: Vec<ZonedEvent>,
        stats: IcalStats,
    },
    /// Fetched but unusable; stats record why.
    Skipped { stats: IcalStats },
    /// Could not be fetched.
    Failed { error: CollectorError },
    /// Shutdown was requested before the feed started.
    Cancelled,
}

/// Collects every registered feed of a hub into the ical zoned store.
///
/// `registry` should hold the stats of the previous run; it is updated in
/// place. `previous` is the last saved ical store, used to carry forward the
/// events of feeds that fail to fetch.
///
/// # Errors
///
/// Returns a cancellation error when `stop` is raised before every feed has
/// been started.
pub async fn collect_ical(
    settings: &HubSettings,
    fetcher: &dyn HttpFetcher,
    registry: &mut FeedRegistry,
    previous: Option<&ZonedEventStore>,
    now: DateTime<Utc>,
    options: &CollectOptions,
    stop: &StopSignal,
) -> CollectorResult<ZonedEventStore> {
    let midnight = midnight_in_tz(now, settings.tz);
    let ctx = FeedContext {
        settings,
        fetcher,
        options,
        stop,
        now,
        midnight,
        window: TimeWindow::horizon(now, settings.tz, options.horizon_days),
    };

    let mut seen = HashSet::new();
    let mut feeds: Vec<&FeedSpec> = settings
        .feeds
        .iter()
        .filter(|feed| seen.insert(feed.url.as_str()))
        .collect();
    if options.test_mode {
        feeds.truncate(TEST_MAX_FEEDS);
    }
    info!(hub = %settings.id, count = feeds.len(), "collecting ical feeds");

    let ctx = &ctx;
    let pending: Vec<_> = feeds
        .iter()
        .copied()
        .enumerate()
        .map(|(index, feed)| async move { (index, collect_feed(ctx, feed).await) })
        .collect();
    let mut outcomes: Vec<(usize, FeedOutcome)> = stream::iter(pending)
        .buffer_unordered(options.max_concurrent_feeds.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|(index, _)| *index);

    let mut store = ZonedEventStore::new(&settings.id, SourceFlavor::Ical, settings.tz);
    let mut cancelled = false;
    for ((_, outcome), feed) in outcomes.into_iter().zip(&feeds) {
        match outcome {
            FeedOutcome::Collected { events, stats } => {
                debug!(hub = %settings.id, feed = %feed.url, count = events.len(), "feed collected");
                for event in events {
                    store.add(event);
                }
                registry.record(&feed.url, stats);
            }
            FeedOutcome::Skipped { stats } => registry.record(&feed.url, stats),
            FeedOutcome::Failed { error } => {
                let carried = carry_forward(previous, &feed.url, midnight);
                warn!(
                    hub = %settings.id,
                    feed = %feed.url,
                    source = %feed.source,
                    carried = carried.len(),
                    error = %error,
                    "feed failed, keeping previous events"
                );
                for event in carried {
                    store.add(event);
                }
                let mut stats = registry
                    .stats(&feed.url)
                    .cloned()
                    .unwrap_or_else(|| IcalStats::new(&feed.source));
                stats.dday_error = error.to_string();
                stats.whenchecked = Some(now);
                registry.record(&feed.url, stats);
            }
            FeedOutcome::Cancelled => cancelled = true,
        }
    }

    if cancelled {
        return Err(CollectorError::cancelled("ical collection stopped").with_feed(settings.id.as_str()));
    }
    info!(hub = %settings.id, count = store.len(), "ical collection finished");
    Ok(store)
}

fn carry_forward(
    previous: Option<&ZonedEventStore>,
    url: &str,
    midnight: DateTimeWithZone,
) -> Vec<ZonedEvent> {
    previous
        .map(|store| {
            store
                .events
                .iter()
                .filter(|e| e.feed.as_deref() == Some(url) && e.dtstart >= midnight)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

async fn collect_feed(ctx: &FeedContext<'_>, feed: &FeedSpec) -> FeedOutcome {
    if ctx.stop.is_requested() {
        return FeedOutcome::Cancelled;
    }

    let fetched = match fetch_with_retry(ctx.fetcher, &feed.url, &ctx.options.retry).await {
        Ok(fetched) => fetched,
        Err(error) => return FeedOutcome::Failed { error },
    };

    let mut stats = IcalStats::new(&feed.source);
    stats.contenttype = fetched.content_type;
    stats.whenchecked = Some(ctx.now);

    let text = prepare_feed_text(&fetched.body, ctx.settings.quirk);
    let parsed = match parse_feed(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(hub = %ctx.settings.id, feed = %feed.url, source = %feed.source, error = %e, "cannot parse feed");
            stats.dday_error = e.to_string();
            return FeedOutcome::Skipped { stats };
        }
    };

    stats.prodid = parsed.prodid.clone();
    stats.score = validation_score(&parsed);
    stats.valid = stats.score == 100;

    if parsed.events.is_empty() {
        warn!(hub = %ctx.settings.id, feed = %feed.url, source = %feed.source, "feed has no events");
        return FeedOutcome::Skipped { stats };
    }

    let events = feed_events(ctx, feed, &parsed, &mut stats);
    FeedOutcome::Collected { events, stats }
}

/// Exceptions from edited instances, keyed by the master's UID.
fn override_exdates(parsed: &ParsedFeed) -> HashMap<&str, Vec<String>> {
    let mut exdates: HashMap<&str, Vec<String>> = HashMap::new();
    for event in &parsed.events {
        if let (Some(uid), Some(rid)) = (event.uid.as_deref(), event.recurrence_id.as_deref()) {
            exdates.entry(uid).or_default().push(rid.to_string());
        }
    }
    exdates
}

fn feed_events(
    ctx: &FeedContext<'_>,
    feed: &FeedSpec,
    parsed: &ParsedFeed,
    stats: &mut IcalStats,
) -> Vec<ZonedEvent> {
    let tz = ctx.settings.tz;
    let hub_lat_lon = ctx.settings.place().and_then(|p| p.lat_lon.clone());
    let overrides = override_exdates(parsed);

    let mut seen = HashSet::new();
    let mut recurring_uids = BTreeSet::new();
    let mut events = Vec::new();

    for item in &parsed.events {
        let Some(start) = item.start.as_ref() else {
            trace!(feed = %feed.url, uid = ?item.uid, "event without DTSTART skipped");
            continue;
        };
        let summary = item.summary.clone().unwrap_or_default();
        if !seen.insert((summary.clone(), start.clone())) {
            continue;
        }

        let dtstart = start.to_zoned(tz);
        let duration = item
            .end
            .as_ref()
            .map(|end| end.to_zoned(tz).universal_time() - dtstart.universal_time())
            .filter(|d| *d > Duration::zero())
            .unwrap_or_else(Duration::zero);
        let event = build_event(item, summary, feed, start.is_date(), hub_lat_lon.as_ref());

        let rule = item.recurrence.as_ref().filter(|_| item.recurrence_id.is_none());
        match rule {
            None => {
                if dtstart < ctx.midnight {
                    continue;
                }
                events.push(zoned(event, dtstart, duration, ctx, feed));
                stats.singlecount += 1;
                stats.futurecount += 1;
                stats.loaded += 1;
            }
            Some(rule) => {
                let mut rule = rule.clone();
                if let Some(extra) = item.uid.as_deref().and_then(|uid| overrides.get(uid)) {
                    rule.exdates.extend(extra.iter().cloned());
                }
                let occurrences = match expand_occurrences(&dtstart, &rule, &ctx.window) {
                    Ok(occurrences) => occurrences,
                    Err(e) => {
                        warn!(feed = %feed.url, uid = ?item.uid, error = %e, "cannot expand recurrence");
                        continue;
                    }
                };
                recurring_uids.insert(item.uid.clone().unwrap_or_else(|| event.title.clone()));
                for occurrence in occurrences {
                    if occurrence < ctx.midnight {
                        continue;
                    }
                    events.push(zoned(event.clone(), occurrence, duration, ctx, feed));
                    stats.recurringinstancecount += 1;
                    stats.futurecount += 1;
                    stats.loaded += 1;
                }
            }
        }
    }

    stats.recurringcount = recurring_uids.len() as u64;
    events
}

fn build_event(
    item: &FeedEvent,
    title: String,
    feed: &FeedSpec,
    allday: bool,
    hub_lat_lon: Option<&(String, String)>,
) -> Event {
    let normalized = normalize_feed_event(
        item.url.as_deref(),
        &item.description,
        &item.location,
        &item.categories,
        feed,
    );
    let (lat, lon) = item
        .geo
        .clone()
        .or_else(|| hub_lat_lon.cloned())
        .map_or((None, None), |(lat, lon)| (Some(lat), Some(lon)));

    Event::new(title, &feed.source)
        .with_url(normalized.url)
        .with_allday(allday)
        .with_coordinates(lat, lon)
        .with_categories(normalized.categories)
        .with_description(normalized.description)
        .with_location(normalized.location)
}

fn zoned(
    event: Event,
    start: DateTimeWithZone,
    duration: Duration,
    ctx: &FeedContext<'_>,
    feed: &FeedSpec,
) -> ZonedEvent {
    let tz = ctx.settings.tz;
    ZonedEvent::new(event, start.in_zone(tz), start.plus(duration).in_zone(tz)).with_feed(&feed.url)
}
