use std::sync::OnceLock;

use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serializer};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    UtcOffset,
};

/// The machine's local offset, UTC when it cannot be determined.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Parses an API date into a local calendar day.
///
/// The API sends either `2025-06-01` or a full timestamp such as
/// `2025-05-31T16:00:00.000Z`. Timestamps are moved to the local offset
/// before the day is taken, so they compare against `today()`.
pub fn parse_date(value: &str) -> Option<Date> {
    parse_date_in(value, local_offset())
}

pub fn parse_date_in(value: &str, offset: UtcOffset) -> Option<Date> {
    let value = value.trim();
    if let Ok(instant) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(instant.to_offset(offset).date());
    }
    let day = value.get(..10).unwrap_or(value);
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

pub fn format_date(date: &Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

pub fn serialize_date<S>(x: &Option<Date>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match x {
        Some(x) => s.serialize_str(&format_date(x)),
        None => s.serialize_none(),
    }
}

pub fn deserialize_date<'de, D>(d: D) -> Result<Option<Date>, D::Error>
where
    D: Deserializer<'de>,
{
    let x = Option::<String>::deserialize(d)?;
    Ok(x.as_deref().and_then(parse_date))
}

/// Accepts an identifier sent either as a JSON string or a JSON number.
pub fn deserialize_id<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Float(f64),
    }

    match Option::<RawId>::deserialize(d)? {
        None => Ok(None),
        Some(RawId::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawId::Text(s)) => Ok(Some(s)),
        Some(RawId::Int(i)) => Ok(Some(i.to_string())),
        Some(RawId::Float(f)) if f.fract() == 0.0 => Ok(Some((f as i64).to_string())),
        Some(RawId::Float(f)) => Err(de::Error::custom(format!("invalid id {}", f))),
    }
}

/// Today's calendar date in the machine's local offset, falling back to UTC.
pub fn today() -> Date {
    OffsetDateTime::now_utc().to_offset(local_offset()).date()
}

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Builds a download file name from a display name.
///
/// Whitespace runs become `_`. Path separators, quotes and control
/// characters are dropped. An empty or missing name yields `fallback`.
pub fn download_file_name(name: Option<&str>, fallback: &str, extension: &str) -> String {
    let stem = name
        .map(|n| {
            n.trim()
                .chars()
                .filter(|c| !matches!(c, '/' | '\\' | '"') && !c.is_control())
                .collect::<String>()
        })
        .map(|n| whitespace().replace_all(&n, "_").into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_owned());

    format!("{}.{}", stem, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, offset};

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2025-06-01"), Some(date!(2025 - 06 - 01)));
        assert_eq!(parse_date("June 1st"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_timestamps_use_local_day() {
        let stamp = "2025-06-02T16:00:00.000Z";
        assert_eq!(parse_date_in(stamp, offset!(+8)), Some(date!(2025 - 06 - 03)));
        assert_eq!(parse_date_in(stamp, UtcOffset::UTC), Some(date!(2025 - 06 - 02)));
        assert_eq!(parse_date_in(stamp, offset!(-5)), Some(date!(2025 - 06 - 02)));
        assert_eq!(
            parse_date_in("2025-06-02T01:00:00+02:00", UtcOffset::UTC),
            Some(date!(2025 - 06 - 01))
        );
        // Plain days are never shifted
        assert_eq!(parse_date_in("2025-06-02", offset!(-11)), Some(date!(2025 - 06 - 02)));
    }

    #[test]
    fn test_download_file_name() {
        assert_eq!(
            download_file_name(Some("  Juan  Dela Cruz "), "participant", "pdf"),
            "Juan_Dela_Cruz.pdf"
        );
        assert_eq!(
            download_file_name(Some("a/b"), "participant", "pdf"),
            "ab.pdf"
        );
        assert_eq!(download_file_name(Some("   "), "certificate", "pdf"), "certificate.pdf");
        assert_eq!(download_file_name(None, "participant", "pdf"), "participant.pdf");
        assert_eq!(
            download_file_name(Some("Ana \"Red\" Reyes\r\n"), "participant", "pdf"),
            "Ana_Red_Reyes.pdf"
        );
    }

    #[test]
    fn test_deserialize_id() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default, deserialize_with = "deserialize_id")]
            id: Option<String>,
        }

        let numeric: Holder = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(numeric.id.as_deref(), Some("42"));

        let text: Holder = serde_json::from_str(r#"{"id": "P123"}"#).unwrap();
        assert_eq!(text.id.as_deref(), Some("P123"));

        let missing: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(missing.id, None);

        let null: Holder = serde_json::from_str(r#"{"id": null}"#).unwrap();
        assert_eq!(null.id, None);
    }
}
