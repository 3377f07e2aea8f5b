//! Core types: zoned time, events, source flavors, hub configuration, tracing

pub mod error;
pub mod event;
pub mod flavor;
pub mod hub;
pub mod time;
pub mod tracing;

pub use error::{CoreError, CoreResult};
pub use event::{Event, ZonedEvent, ZonelessEvent, category_tags, join_categories};
pub use flavor::SourceFlavor;
pub use hub::{
    FeedSpec, HubConfigSource, HubDefinition, HubDirectory, HubKind, HubScope, HubSettings,
    PlaceScope, QuirkKind, StaticHubSource,
};
pub use time::{
    DateKey, DateTimeWithZone, LOCAL_FORMAT, TimeWindow, format_local, is_current_or_future,
    local_to_utc, midnight_in_tz, resolve_zone,
};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};

pub use chrono_tz::Tz;

use std::future::Future;
use std::pin::Pin;

/// A boxed future for async trait methods.
///
/// Store, fetcher and adapter traits are used as trait objects, so their
/// async methods return boxed futures instead of `impl Future`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
