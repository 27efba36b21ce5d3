use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

pub const OBJECT_CLASS: &str = "objectClass";
pub const USER_PASSWORD: &str = "userPassword";

/// A named, backend-agnostic set of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeData {
    pub name: String,
    pub values: Vec<AttributeValue>,
    pub multi_valued: bool,
}

impl AttributeData {
    pub fn new(name: impl Into<String>, values: Vec<AttributeValue>, multi_valued: bool) -> Self {
        Self {
            name: name.into(),
            values,
            multi_valued,
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::new(name, vec![value.into()], false)
    }

    pub fn multi(name: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self::new(name, values, true)
    }

    /// An attribute that only carries a name, used to clear a slot.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), false)
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn first_value(&self) -> Option<&AttributeValue> {
        self.values.first()
    }

    pub fn text_values(&self) -> Vec<String> {
        self.values.iter().map(|v| v.to_string()).collect()
    }

    /// No values at all, or a single empty string.
    pub fn is_empty_values(&self) -> bool {
        match self.values.as_slice() {
            [] => true,
            [only] => only.is_empty_text(),
            _ => false,
        }
    }

    /// Value-set equality; ordering is ignored for multivalued attributes.
    pub fn values_match(&self, other: &AttributeData) -> bool {
        if self.is_empty_values() && other.is_empty_values() {
            return true;
        }
        if self.values.len() != other.values.len() {
            return false;
        }
        if !(self.multi_valued || other.multi_valued) {
            return self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.matches(b));
        }

        let mut used = vec![false; other.values.len()];
        for value in &self.values {
            let hit = other
                .values
                .iter()
                .enumerate()
                .position(|(i, candidate)| !used[i] && value.matches(candidate));
            match hit {
                Some(i) => used[i] = true,
                None => return false,
            }
        }
        true
    }
}

pub fn find_attribute<'a>(attributes: &'a [AttributeData], name: &str) -> Option<&'a AttributeData> {
    attributes.iter().find(|a| a.is_named(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationType {
    Add,
    Replace,
    Remove,
    ForceUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeModification {
    Add(AttributeData),
    Replace {
        attribute: AttributeData,
        previous: AttributeData,
    },
    Remove(AttributeData),
    ForceUpdate(AttributeData),
}

impl AttributeModification {
    pub fn kind(&self) -> ModificationType {
        match self {
            Self::Add(_) => ModificationType::Add,
            Self::Replace { .. } => ModificationType::Replace,
            Self::Remove(_) => ModificationType::Remove,
            Self::ForceUpdate(_) => ModificationType::ForceUpdate,
        }
    }

    pub fn attribute(&self) -> &AttributeData {
        match self {
            Self::Add(a) | Self::Remove(a) | Self::ForceUpdate(a) => a,
            Self::Replace { attribute, .. } => attribute,
        }
    }

    pub fn name(&self) -> &str {
        &self.attribute().name
    }
}

/// Raw attributes of one stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub dn: String,
    pub attributes: Vec<AttributeData>,
}

impl EntryData {
    pub fn new(dn: impl Into<String>, attributes: Vec<AttributeData>) -> Self {
        Self {
            dn: dn.into(),
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeData> {
        find_attribute(&self.attributes, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_counts_as_empty() {
        assert!(AttributeData::named("mail").is_empty_values());
        assert!(AttributeData::single("mail", "").is_empty_values());
        assert!(!AttributeData::single("mail", "a@b.c").is_empty_values());
        assert!(!AttributeData::multi("mail", vec!["".into(), "".into()]).is_empty_values());
    }

    #[test]
    fn multivalued_comparison_ignores_order() {
        let a = AttributeData::multi("role", vec!["admin".into(), "user".into()]);
        let b = AttributeData::multi("ROLE", vec!["user".into(), "admin".into()]);
        assert!(a.values_match(&b));
        assert!(b.is_named("role"));
    }

    #[test]
    fn multivalued_comparison_respects_duplicates() {
        let a = AttributeData::multi("role", vec!["admin".into(), "admin".into()]);
        let b = AttributeData::multi("role", vec!["admin".into(), "user".into()]);
        assert!(!a.values_match(&b));
    }

    #[test]
    fn single_valued_comparison_is_positional() {
        let a = AttributeData::new("pair", vec!["x".into(), "y".into()], false);
        let b = AttributeData::new("pair", vec!["y".into(), "x".into()], false);
        assert!(!a.values_match(&b));
    }
}
