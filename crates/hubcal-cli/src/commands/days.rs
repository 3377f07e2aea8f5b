//! Per-day summary of a hub's merged events.

use std::fmt::Write;

use hubcal_store::ZonelessEventStore;

use crate::commands::Stores;
use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Prints the datekey index of a hub's merged store.
pub async fn run(config: &AppConfig, hub: &str, events: bool) -> CliResult<()> {
    if config.directory().get(hub).is_none() {
        return Err(CliError::UnknownHub(hub.to_string()));
    }

    let stores = Stores::open(config);
    match ZonelessEventStore::load(stores.blobs.as_ref(), hub).await? {
        Some(store) => print!("{}", render(&store, events)),
        None => println!("{hub}: not aggregated yet"),
    }
    Ok(())
}

/// Renders one line per day, optionally followed by the day's events.
pub fn render(store: &ZonelessEventStore, events: bool) -> String {
    let mut out = String::new();
    let index = store.datekey_index();
    let _ = writeln!(
        out,
        "{}: {} events on {} days ({})",
        store.hub,
        store.len(),
        index.len(),
        store.tz
    );
    for (day, day_events) in &index {
        let _ = writeln!(out, "{day}  {}", day_events.len());
        if !events {
            continue;
        }
        for event in day_events {
            let when = if event.event.allday {
                "all day".to_string()
            } else {
                event.dtstart.format("%H:%M").to_string()
            };
            let _ = writeln!(out, "    {when:<8} {} [{}]", event.event.title, event.event.source);
        }
    }
    out
}
