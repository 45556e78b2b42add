use serde::{Deserialize, Serialize};
use time::Date;

use crate::util::{deserialize_date, deserialize_id, serialize_date};

/// Attendee category, used to pick the visual asset set of a badge.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub enum ParticipantType {
    #[default]
    Participant,
    Facilitator,
    Speaker,
    Organizer,
    Guest,
    /// Any category the console has no dedicated assets for
    #[serde(other)]
    Other,
}

/// A struct representing a registered participant, as projected by the API.
///
/// ID-card data and certificate data come from different endpoints that
/// name the same things differently; both spellings are accepted.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct Participant {
    /// Unique participant ID, also the QR payload of the badge
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,

    /// Display name
    #[serde(default, alias = "full_name")]
    pub name: Option<String>,

    #[serde(default)]
    pub nickname: Option<String>,

    #[serde(default)]
    pub school: Option<String>,

    #[serde(default, alias = "division_name")]
    pub division: Option<String>,

    #[serde(default, alias = "district_name")]
    pub district: Option<String>,

    #[serde(default)]
    pub participant_type: ParticipantType,

    /// Profile picture; absent means the placeholder avatar
    #[serde(default, alias = "participant_image_url")]
    pub image_url: Option<String>,

    #[serde(default)]
    pub left_logo_url: Option<String>,

    #[serde(default)]
    pub right_logo_url: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub subtitle: Option<String>,

    /// Venue and dates of the attended event, present on certificate data
    #[serde(default)]
    pub venue: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_date",
        serialize_with = "serialize_date"
    )]
    pub start_date: Option<Date>,

    #[serde(
        default,
        deserialize_with = "deserialize_date",
        serialize_with = "serialize_date"
    )]
    pub end_date: Option<Date>,
}

impl Participant {
    /// Trimmed display name, `None` when missing or blank.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

/// Attendance summary returned after a successful check-in.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttendanceResult {
    #[serde(default, alias = "name")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub time_in: Option<String>,
    #[serde(default)]
    pub time_out: Option<String>,
}

impl AttendanceResult {
    /// Name used in the spoken greeting.
    pub fn greeting_name(&self) -> &str {
        self.nickname
            .as_deref()
            .or(self.full_name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("participant")
    }
}
