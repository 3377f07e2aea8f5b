//! Persistence for hubcal: table and blob seams, event stores, the
//! cross-source deduplicator and the feed registry.

pub mod blob;
pub mod dedup;
pub mod error;
pub mod event_store;
pub mod fs;
pub mod registry;
pub mod table;

pub use blob::{BlobStore, MemoryBlobStore};
pub use dedup::{DedupMode, merge_zoned_stores};
pub use error::{StoreError, StoreResult};
pub use event_store::{STORE_VERSION, ZonedEventStore, ZonelessEventStore, sort_events};
pub use fs::{FsBlobStore, FsTableStore};
pub use registry::{
    FeedRegistry, ICAL_STATS_BLOB, IcalStats, METADATA_TABLE, NonIcalStats, summary_entity,
};
pub use table::{InsertOutcome, MemoryTableStore, Properties, TableEntity, TableStore};
