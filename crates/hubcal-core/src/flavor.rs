//! Source flavors: the kinds of upstream an event can come from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One of the source kinds a hub can aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFlavor {
    /// iCalendar feeds registered for the hub.
    Ical,
    /// The eventful.com search API.
    Eventful,
    /// The upcoming.org search API.
    Upcoming,
    /// The eventbrite.com search API.
    Eventbrite,
    /// The facebook graph event search.
    Facebook,
}

impl SourceFlavor {
    /// Every flavor, ical first.
    pub const ALL: [SourceFlavor; 5] = [
        Self::Ical,
        Self::Eventful,
        Self::Upcoming,
        Self::Eventbrite,
        Self::Facebook,
    ];

    /// The flavors served by REST directory APIs.
    pub const NON_ICAL: [SourceFlavor; 4] = [
        Self::Eventful,
        Self::Upcoming,
        Self::Eventbrite,
        Self::Facebook,
    ];

    /// Returns the lowercase name used in blob and record names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ical => "ical",
            Self::Eventful => "eventful",
            Self::Upcoming => "upcoming",
            Self::Eventbrite => "eventbrite",
            Self::Facebook => "facebook",
        }
    }

    /// Returns true for the iCalendar flavor.
    pub fn is_ical(&self) -> bool {
        matches!(self, Self::Ical)
    }
}

impl fmt::Display for SourceFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFlavor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|flavor| flavor.as_str() == lowered)
            .ok_or_else(|| CoreError::unknown_flavor(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for flavor in SourceFlavor::ALL {
            assert_eq!(flavor.as_str().parse::<SourceFlavor>().unwrap(), flavor);
        }
        assert_eq!(" Eventful ".parse::<SourceFlavor>().unwrap(), SourceFlavor::Eventful);
    }

    #[test]
    fn unknown_flavor_is_rejected() {
        assert!("meetup".parse::<SourceFlavor>().is_err());
    }

    #[test]
    fn only_ical_is_ical() {
        assert!(SourceFlavor::Ical.is_ical());
        assert!(SourceFlavor::NON_ICAL.iter().all(|f| !f.is_ical()));
    }

    #[test]
    fn serde_is_lowercase() {
        let json = serde_json::to_string(&SourceFlavor::Eventbrite).unwrap();
        assert_eq!(json, "\"eventbrite\"");
    }
}
