use crate::attribute::{AttributeData, find_attribute};
use crate::value::AttributeValue;

/// Backend-neutral search filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equality { attribute: String, value: AttributeValue },
    Presence { attribute: String },
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        final_: Option<String>,
    },
    GreaterOrEqual { attribute: String, value: AttributeValue },
    LessOrEqual { attribute: String, value: AttributeValue },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn equality(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Filter::Equality {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn presence(attribute: impl Into<String>) -> Self {
        Filter::Presence { attribute: attribute.into() }
    }

    pub fn substring(attribute: impl Into<String>, initial: Option<&str>, any: &[&str], final_: Option<&str>) -> Self {
        Filter::Substring {
            attribute: attribute.into(),
            initial: initial.map(str::to_string),
            any: any.iter().map(|s| s.to_string()).collect(),
            final_: final_.map(str::to_string),
        }
    }

    pub fn greater_or_equal(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Filter::GreaterOrEqual {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn less_or_equal(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Filter::LessOrEqual {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Evaluates the filter against an in-memory attribute set.
    /// Multivalued attributes match when any of their values does.
    pub fn matches(&self, attributes: &[AttributeData]) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(attributes)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(attributes)),
            Filter::Not(filter) => !filter.matches(attributes),
            Filter::Presence { attribute } => {
                find_attribute(attributes, attribute).is_some_and(|a| !a.is_empty_values())
            }
            Filter::Equality { attribute, value } => {
                any_value(attributes, attribute, |candidate| candidate.matches(value))
            }
            Filter::GreaterOrEqual { attribute, value } => {
                any_value(attributes, attribute, |candidate| compare(candidate, value).is_some_and(|o| o.is_ge()))
            }
            Filter::LessOrEqual { attribute, value } => {
                any_value(attributes, attribute, |candidate| compare(candidate, value).is_some_and(|o| o.is_le()))
            }
            Filter::Substring {
                attribute,
                initial,
                any,
                final_,
            } => any_value(attributes, attribute, |candidate| {
                substring_matches(&candidate.to_string(), initial.as_deref(), any, final_.as_deref())
            }),
        }
    }
}

fn any_value(attributes: &[AttributeData], name: &str, test: impl Fn(&AttributeValue) -> bool) -> bool {
    find_attribute(attributes, name).is_some_and(|a| a.values.iter().any(test))
}

fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (AttributeValue::Timestamp(a), AttributeValue::Timestamp(b)) => Some(a.cmp(b)),
        _ => match (left.as_long(), right.as_long()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(left.to_string().cmp(&right.to_string())),
        },
    }
}

fn substring_matches(value: &str, initial: Option<&str>, any: &[String], final_: Option<&str>) -> bool {
    let value = value.to_ascii_lowercase();
    let mut rest = value.as_str();
    if let Some(initial) = initial {
        let initial = initial.to_ascii_lowercase();
        match rest.strip_prefix(initial.as_str()) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_ascii_lowercase();
        match rest.find(part.as_str()) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    match final_ {
        Some(final_) => rest.ends_with(&final_.to_ascii_lowercase()),
        None => true,
    }
}
