//! Event collection for calendar hubs.
//!
//! Every hub draws events from one or more source flavors:
//!
//! - [`ical`] - the hub's registered iCalendar feeds, fetched concurrently
//!   and isolated from one another
//! - [`sources`] - REST directory services (eventful, upcoming, eventbrite,
//!   facebook), driven page by page through [`SourceAdapter`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────┐
//! │ iCal feeds   │   │ directory services (REST)│
//! └──────┬───────┘   └────────────┬─────────────┘
//!        │ HttpFetcher            │ HttpFetcher
//!        ▼                        ▼
//! ┌──────────────┐   ┌──────────────────────────┐
//! │ collect_ical │   │ SourceAdapter+drive_pages│
//! └──────┬───────┘   └────────────┬─────────────┘
//!        │                        │ convert_listings()
//!        └───────────┬────────────┘
//!                    ▼
//!           ┌─────────────────┐
//!           │ ZonedEventStore │ ──▶ blob + ICS export + stats
//!           └─────────────────┘
//! ```
//!
//! [`EventCollector`] runs one flavor for one hub and persists the result.

pub mod adapter;
pub mod collector;
pub mod error;
pub mod export;
pub mod fetch;
pub mod ical;
pub mod normalize;
pub mod recurrence;
pub mod retry;
pub mod shutdown;
pub mod sources;

pub use adapter::{
    CollectOptions, ConvertedListings, FirstPage, ListingTime, PageQuery, RawListing,
    SourceAdapter, convert_listings, drive_pages, page_count, search_horizon_days,
};
pub use collector::EventCollector;
pub use error::{CollectorError, CollectorErrorCode, CollectorResult};
pub use export::{export_ics, ics_blob_name, save_ics};
pub use fetch::{FetchedBody, HttpFetcher, ReqwestFetcher, StaticFetcher, StaticResponse};
pub use ical::collect_ical;
pub use normalize::normalize_feed_event;
pub use recurrence::{RecurrenceRule, expand_occurrences};
pub use retry::{RetryPolicy, fetch_with_retry};
pub use shutdown::StopSignal;
pub use sources::{Credentials, adapter_for};
