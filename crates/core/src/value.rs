use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Timestamp(DateTime<Utc>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(n) => Some(i64::from(*n)),
            AttributeValue::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            AttributeValue::Timestamp(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, AttributeValue::Text(s) if s.is_empty())
    }

    /// Representation-tolerant equality: values read back from a store may
    /// come back in a different but equivalent shape than they were written.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        use AttributeValue::*;
        match (self, other) {
            (Timestamp(a), Timestamp(b)) => time::truncate_millis(a) == time::truncate_millis(b),
            (Timestamp(t), Text(s)) | (Text(s), Timestamp(t)) => time::parse_any(s)
                .map(|parsed| time::truncate_millis(&parsed) == time::truncate_millis(t))
                .unwrap_or(false),
            (Boolean(b), Text(s)) | (Text(s), Boolean(b)) => s.eq_ignore_ascii_case(&b.to_string()),
            (Boolean(b), Integer(_) | Long(_)) | (Integer(_) | Long(_), Boolean(b)) => {
                let n = self.as_long().or_else(|| other.as_long());
                n == Some(i64::from(*b))
            }
            (Integer(_) | Long(_), Integer(_) | Long(_)) => self.as_long() == other.as_long(),
            (Integer(_) | Long(_), Text(s)) | (Text(s), Integer(_) | Long(_)) => {
                let n = self.as_long().or_else(|| other.as_long());
                s.trim().parse::<i64>().ok() == n
            }
            (Text(a), Text(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Integer(n) => write!(f, "{n}"),
            AttributeValue::Long(n) => write!(f, "{n}"),
            AttributeValue::Timestamp(t) => f.write_str(&time::format_time(t, time::JSON_TIME_FORMAT)),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Boolean(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Long(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Timestamp(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn numeric_widths_match() {
        assert!(AttributeValue::Integer(7).matches(&AttributeValue::Long(7)));
        assert!(AttributeValue::Text("7".into()).matches(&AttributeValue::Integer(7)));
        assert!(!AttributeValue::Long(8).matches(&AttributeValue::Integer(7)));
    }

    #[test]
    fn booleans_match_literals_and_bits() {
        assert!(AttributeValue::Boolean(true).matches(&AttributeValue::Text("TRUE".into())));
        assert!(AttributeValue::Integer(0).matches(&AttributeValue::Boolean(false)));
        assert!(!AttributeValue::Long(1).matches(&AttributeValue::Boolean(false)));
    }

    #[test]
    fn timestamps_match_at_millisecond_precision() {
        let base = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        let fine = base + chrono::Duration::microseconds(120_456);
        let coarse = base + chrono::Duration::milliseconds(120);
        assert!(AttributeValue::Timestamp(fine).matches(&AttributeValue::Timestamp(coarse)));
        assert!(AttributeValue::Text("2023-01-02 03:04:05.120".into()).matches(&AttributeValue::Timestamp(fine)));
    }

    #[test]
    fn text_compares_exactly() {
        assert!(AttributeValue::from("abc").matches(&AttributeValue::from("abc")));
        assert!(!AttributeValue::from("abc").matches(&AttributeValue::from("ABC")));
    }
}
