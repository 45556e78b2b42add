use serde::{Deserialize, Serialize};
use time::Date;

use crate::util::{deserialize_date, deserialize_id, serialize_date};

/// Single event that scans are attributed to
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct Event {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub venue: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// First day of the event, inclusive
    #[serde(
        default,
        deserialize_with = "deserialize_date",
        serialize_with = "serialize_date"
    )]
    pub start_date: Option<Date>,

    /// Last day of the event, inclusive
    #[serde(
        default,
        deserialize_with = "deserialize_date",
        serialize_with = "serialize_date"
    )]
    pub end_date: Option<Date>,

    #[serde(default, alias = "is_active")]
    pub active: bool,

    #[serde(default, alias = "required_reciept")]
    pub required_receipt: bool,
}

impl Event {
    /// Whether `day` falls within the event's inclusive date range.
    ///
    /// Events missing either bound never qualify.
    pub fn runs_on(&self, day: Date) -> bool {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => start <= day && day <= end,
            _ => false,
        }
    }
}

/// Picks the event happening on `today`.
///
/// The first qualifying event in list order wins, even when several ranges
/// overlap.
pub fn resolve_active(events: &[Event], today: Date) -> Option<&Event> {
    events.iter().find(|e| e.runs_on(today))
}
