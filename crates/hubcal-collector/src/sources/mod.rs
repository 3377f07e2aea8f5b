//! REST directory adapters.

pub mod eventbrite;
pub mod eventful;
pub mod facebook;
pub mod upcoming;
pub mod xml;

use std::sync::Arc;

use hubcal_core::SourceFlavor;
use serde::{Deserialize, Serialize};

pub use eventbrite::EventbriteAdapter;
pub use eventful::EventfulAdapter;
pub use facebook::FacebookAdapter;
pub use upcoming::UpcomingAdapter;

use crate::adapter::SourceAdapter;
use crate::fetch::HttpFetcher;

/// API credentials for the directory services. A missing key means the
/// flavor is not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub eventful_app_key: Option<String>,
    pub upcoming_api_key: Option<String>,
    pub eventbrite_app_key: Option<String>,
    pub facebook_access_token: Option<String>,
}

impl Credentials {
    /// Returns the credential for a flavor, if set and non-blank.
    pub fn for_flavor(&self, flavor: SourceFlavor) -> Option<&str> {
        let key = match flavor {
            SourceFlavor::Ical => None,
            SourceFlavor::Eventful => self.eventful_app_key.as_deref(),
            SourceFlavor::Upcoming => self.upcoming_api_key.as_deref(),
            SourceFlavor::Eventbrite => self.eventbrite_app_key.as_deref(),
            SourceFlavor::Facebook => self.facebook_access_token.as_deref(),
        };
        key.map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Builds the adapter for a non-ical flavor, or `None` when the flavor has
/// no credential or is the ical flavor.
pub fn adapter_for(
    flavor: SourceFlavor,
    fetcher: Arc<dyn HttpFetcher>,
    credentials: &Credentials,
) -> Option<Box<dyn SourceAdapter>> {
    let key = credentials.for_flavor(flavor)?;
    let adapter: Box<dyn SourceAdapter> = match flavor {
        SourceFlavor::Ical => return None,
        SourceFlavor::Eventful => Box::new(EventfulAdapter::new(fetcher, key)),
        SourceFlavor::Upcoming => Box::new(UpcomingAdapter::new(fetcher, key)),
        SourceFlavor::Eventbrite => Box::new(EventbriteAdapter::new(fetcher, key)),
        SourceFlavor::Facebook => Box::new(FacebookAdapter::new(fetcher, key)),
    };
    Some(adapter)
}
