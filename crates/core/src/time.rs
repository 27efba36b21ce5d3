use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Native datetime column format.
pub const SQL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Timestamps stored inside a JSON multivalue document.
pub const JSON_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Directory generalized time.
pub const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%S%.3fZ";

const SQL_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const ISO_LOCAL_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const GENERALIZED_PARSE_FORMAT: &str = "%Y%m%d%H%M%S%.fZ";

/// Backend-specific, null-safe conversion between timestamps and their
/// stored text form.
pub trait TimeCodec {
    fn encode_time(&self, value: &DateTime<Utc>) -> String;

    fn decode_time(&self, value: &str) -> Option<DateTime<Utc>>;
}

pub fn format_time(value: &DateTime<Utc>, format: &str) -> String {
    value.format(format).to_string()
}

pub fn parse_with(value: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), format)
        .ok()
        .map(|naive| naive.and_utc())
}

/// ISO-8601 with an explicit offset, or a local ISO timestamp read as UTC.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    parse_with(value, ISO_LOCAL_PARSE_FORMAT)
}

pub fn parse_legacy_sql(value: &str) -> Option<DateTime<Utc>> {
    parse_with(value, SQL_PARSE_FORMAT)
}

pub fn parse_generalized(value: &str) -> Option<DateTime<Utc>> {
    parse_with(value, GENERALIZED_PARSE_FORMAT)
}

/// Tries every representation this crate writes.
pub fn parse_any(value: &str) -> Option<DateTime<Utc>> {
    parse_iso(value)
        .or_else(|| parse_legacy_sql(value))
        .or_else(|| parse_generalized(value))
}

pub fn truncate_millis(value: &DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap() + chrono::Duration::milliseconds(250)
    }

    #[test]
    fn sql_format_is_space_separated_with_millis() {
        assert_eq!(format_time(&sample(), SQL_TIME_FORMAT), "2024-03-09 14:05:07.250");
        assert_eq!(parse_legacy_sql("2024-03-09 14:05:07.250"), Some(sample()));
    }

    #[test]
    fn iso_without_offset_reads_as_utc() {
        assert_eq!(parse_iso("2024-03-09T14:05:07.250"), Some(sample()));
        assert_eq!(parse_iso("2024-03-09T14:05:07.250Z"), Some(sample()));
        assert_eq!(parse_iso("2024-03-09T16:05:07.250+02:00"), Some(sample()));
    }

    #[test]
    fn generalized_time_round_trips() {
        let text = format_time(&sample(), GENERALIZED_TIME_FORMAT);
        assert_eq!(text, "20240309140507.250Z");
        assert_eq!(parse_generalized(&text), Some(sample()));
    }

    #[test]
    fn non_timestamps_are_rejected() {
        assert_eq!(parse_any("2024-03-09"), None);
        assert_eq!(parse_any("john.doe"), None);
        assert_eq!(parse_any("12345"), None);
    }
}
