use std::collections::{HashMap, HashSet};

use jans_orm_core::attribute::find_attribute;
use jans_orm_core::{AttributeData, AttributeFlags, AttributeModification, EntityDescriptor, OBJECT_CLASS};

/// How a schema-mode update treats the values it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaUpdateMode {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRule {
    pub name: String,
    pub flags: AttributeFlags,
}

/// Per-attribute policy for one diff run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffRules {
    /// Mapped attributes in declaration order.
    pub attributes: Vec<AttributeRule>,
    /// Present when unmapped attributes belong to an attributes-list field;
    /// keyed by lower-cased name.
    pub attributes_list: Option<HashMap<String, AttributeFlags>>,
    pub schema_update: Option<SchemaUpdateMode>,
    pub force_update: bool,
    /// The backend keeps every mapped attribute as a slot of one row.
    pub stores_full_entry: bool,
}

impl DiffRules {
    pub fn for_descriptor<T: 'static>(descriptor: &EntityDescriptor<T>, stores_full_entry: bool) -> Self {
        Self {
            attributes: descriptor
                .properties()
                .iter()
                .map(|p| AttributeRule {
                    name: p.attribute.clone(),
                    flags: p.flags,
                })
                .collect(),
            attributes_list: descriptor.attributes_list().map(|list| {
                list.configured()
                    .map(|(name, flags)| (name.to_string(), flags))
                    .collect()
            }),
            schema_update: None,
            force_update: descriptor.is_force_update(),
            stores_full_entry,
        }
    }

    pub fn with_schema_update(mut self, mode: Option<SchemaUpdateMode>) -> Self {
        self.schema_update = mode;
        self
    }

    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = self.force_update || force_update;
        self
    }

    fn list_flags(&self, name: &str) -> AttributeFlags {
        self.attributes_list
            .as_ref()
            .and_then(|configuration| configuration.get(&name.to_ascii_lowercase()).copied())
            .unwrap_or_default()
    }
}

/// Ordered modifications that turn `current` into `to_persist`.
///
/// Mapped attributes come first in declaration order, then attributes-list
/// removals in `current` order, then attributes-list additions and
/// replacements in `to_persist` order. `objectClass` is never compared.
pub fn diff(to_persist: &[AttributeData], current: &[AttributeData], rules: &DiffRules) -> Vec<AttributeModification> {
    if let Some(mode) = rules.schema_update {
        return schema_changes(to_persist, rules, mode);
    }

    let mut changes = Vec::new();
    let mut mapped = HashSet::with_capacity(rules.attributes.len() + 1);
    mapped.insert(OBJECT_CLASS.to_ascii_lowercase());

    for rule in &rules.attributes {
        mapped.insert(rule.name.to_ascii_lowercase());
        if rule.flags.ignore_during_update {
            continue;
        }
        let change = attribute_change(
            &rule.name,
            rule.flags,
            find_attribute(to_persist, &rule.name),
            find_attribute(current, &rule.name),
            rules,
        );
        changes.extend(change);
    }

    if rules.attributes_list.is_none() {
        return changes;
    }

    let mut seen = HashSet::new();
    for stored in current {
        let key = stored.name.to_ascii_lowercase();
        if mapped.contains(&key) || !seen.insert(key) {
            continue;
        }
        let flags = rules.list_flags(&stored.name);
        let wanted = find_attribute(to_persist, &stored.name);
        if flags.ignore_during_update || wanted.is_some_and(|a| !a.is_empty_values()) {
            continue;
        }
        changes.extend(attribute_change(&stored.name, flags, wanted, Some(stored), rules));
    }

    let mut seen = HashSet::new();
    for wanted in to_persist {
        let key = wanted.name.to_ascii_lowercase();
        if mapped.contains(&key) || wanted.is_empty_values() || !seen.insert(key) {
            continue;
        }
        let flags = rules.list_flags(&wanted.name);
        if flags.ignore_during_update {
            continue;
        }
        changes.extend(attribute_change(
            &wanted.name,
            flags,
            Some(wanted),
            find_attribute(current, &wanted.name),
            rules,
        ));
    }
    changes
}

fn schema_changes(to_persist: &[AttributeData], rules: &DiffRules, mode: SchemaUpdateMode) -> Vec<AttributeModification> {
    to_persist
        .iter()
        .filter(|attribute| !attribute.is_named(OBJECT_CLASS) && !attribute.is_empty_values())
        .filter(|attribute| {
            !rules
                .attributes
                .iter()
                .any(|rule| rule.flags.ignore_during_update && attribute.is_named(&rule.name))
        })
        .map(|attribute| match mode {
            SchemaUpdateMode::Add => AttributeModification::Add(attribute.clone()),
            SchemaUpdateMode::Remove => AttributeModification::Remove(attribute.clone()),
        })
        .collect()
}

fn attribute_change(
    name: &str,
    flags: AttributeFlags,
    wanted_raw: Option<&AttributeData>,
    stored_raw: Option<&AttributeData>,
    rules: &DiffRules,
) -> Option<AttributeModification> {
    let wanted = wanted_raw.filter(|a| !a.is_empty_values());
    let stored = stored_raw.filter(|a| !a.is_empty_values());
    match (wanted, stored) {
        (Some(wanted), Some(stored)) => (!wanted.values_match(stored)).then(|| AttributeModification::Replace {
            attribute: wanted.clone(),
            previous: stored.clone(),
        }),
        (Some(wanted), None) if rules.force_update => Some(AttributeModification::ForceUpdate(wanted.clone())),
        (Some(wanted), None) => Some(AttributeModification::Add(wanted.clone())),
        (None, _) if flags.update_only => None,
        (None, Some(_)) if flags.ignore_during_read => None,
        (None, Some(stored)) => Some(AttributeModification::Remove(stored.clone())),
        (None, None) if rules.force_update => Some(AttributeModification::Remove(
            stored_raw.cloned().unwrap_or_else(|| AttributeData::named(name)),
        )),
        (None, None) => match (wanted_raw, stored_raw) {
            // An empty value left behind on a store that keeps attributes individually.
            (None, Some(stored)) if !rules.stores_full_entry && !flags.ignore_during_read => {
                Some(AttributeModification::Remove(stored.clone()))
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use jans_orm_core::{AttributeValue, ModificationType};
    use proptest::prelude::*;

    use super::*;

    fn rule(name: &str, flags: AttributeFlags) -> AttributeRule {
        AttributeRule {
            name: name.to_string(),
            flags,
        }
    }

    fn rules() -> DiffRules {
        DiffRules {
            attributes: vec![
                rule("uid", AttributeFlags::default()),
                rule("mail", AttributeFlags::default().multi_valued(true)),
                rule("jansLastLogon", AttributeFlags::default().update_only()),
                rule("jansCreationTimestamp", AttributeFlags::default().ignore_during_update()),
                rule("jansMemberOf", AttributeFlags::default().ignore_during_read()),
            ],
            ..DiffRules::default()
        }
    }

    fn kinds(changes: &[AttributeModification]) -> Vec<(ModificationType, &str)> {
        changes.iter().map(|c| (c.kind(), c.name())).collect()
    }

    #[test]
    fn identical_sets_produce_nothing() {
        let attributes = vec![
            AttributeData::single("uid", "jdoe"),
            AttributeData::multi("mail", vec!["a@x".into(), "b@x".into()]),
        ];
        let reordered = vec![
            AttributeData::multi("MAIL", vec!["b@x".into(), "a@x".into()]),
            AttributeData::single("UID", "jdoe"),
        ];
        assert!(diff(&attributes, &reordered, &rules()).is_empty());
    }

    #[test]
    fn narrowing_a_list_to_empty_is_one_remove() {
        let current = vec![AttributeData::multi("mail", vec!["x".into()])];
        let changes = diff(&[AttributeData::multi("mail", Vec::new())], &current, &rules());
        assert_eq!(kinds(&changes), vec![(ModificationType::Remove, "mail")]);
        assert_eq!(changes[0].attribute().values, vec![AttributeValue::from("x")]);
    }

    #[test]
    fn changed_and_new_values() {
        let current = vec![AttributeData::single("uid", "old")];
        let to_persist = vec![
            AttributeData::single("uid", "new"),
            AttributeData::multi("mail", vec!["a@x".into()]),
        ];
        let changes = diff(&to_persist, &current, &rules());
        assert_eq!(kinds(&changes), vec![(ModificationType::Replace, "uid"), (ModificationType::Add, "mail")]);
        match &changes[0] {
            AttributeModification::Replace { previous, .. } => assert_eq!(previous.values, vec!["old".into()]),
            other => panic!("expected replace, got {other:?}"),
        }
    }

    #[test]
    fn update_only_attributes_are_never_removed() {
        let current = vec![
            AttributeData::single("jansLastLogon", "20240101000000.000Z"),
            AttributeData::single("uid", "jdoe"),
        ];
        let changes = diff(&[AttributeData::single("uid", "jdoe")], &current, &rules());
        assert!(changes.is_empty());

        let forced = diff(&[], &[], &rules().with_force_update(true));
        assert!(forced.iter().all(|c| c.name() != "jansLastLogon"));
    }

    #[test]
    fn ignored_attributes_are_left_alone() {
        let current = vec![
            AttributeData::single("jansCreationTimestamp", "a"),
            AttributeData::single("jansMemberOf", "inum=1,ou=groups,o=jans"),
        ];
        let to_persist = vec![AttributeData::single("jansCreationTimestamp", "b")];
        assert!(diff(&to_persist, &current, &rules()).is_empty());
    }

    #[test]
    fn force_update_sets_or_clears_every_slot() {
        let to_persist = vec![AttributeData::single("uid", "jdoe")];
        let changes = diff(&to_persist, &[], &rules().with_force_update(true));
        assert_eq!(kinds(&changes), vec![
            (ModificationType::ForceUpdate, "uid"),
            (ModificationType::Remove, "mail"),
            (ModificationType::Remove, "jansMemberOf"),
        ]);
    }

    #[test]
    fn empty_stored_value_is_removed_only_on_attribute_stores() {
        let current = vec![AttributeData::single("uid", "")];
        assert_eq!(kinds(&diff(&[], &current, &rules())), vec![(ModificationType::Remove, "uid")]);
        let full_row = DiffRules {
            stores_full_entry: true,
            ..rules()
        };
        assert!(diff(&[], &current, &full_row).is_empty());
    }

    #[test]
    fn schema_mode_uses_carried_values_only() {
        let to_persist = vec![
            AttributeData::multi("mail", vec!["c@x".into()]),
            AttributeData::single("jansCreationTimestamp", "skip"),
        ];
        let add = diff(&to_persist, &[], &rules().with_schema_update(Some(SchemaUpdateMode::Add)));
        assert_eq!(kinds(&add), vec![(ModificationType::Add, "mail")]);
        let remove = diff(&to_persist, &[], &rules().with_schema_update(Some(SchemaUpdateMode::Remove)));
        assert_eq!(kinds(&remove), vec![(ModificationType::Remove, "mail")]);
    }

    #[test]
    fn attributes_list_items_are_diffed_individually() {
        let rules = DiffRules {
            attributes_list: Some(HashMap::from([
                ("jansextmanaged".to_string(), AttributeFlags::default().update_only()),
                ("jansexthidden".to_string(), AttributeFlags::default().ignore_during_read()),
            ])),
            ..rules()
        };
        let current = vec![
            AttributeData::single("uid", "jdoe"),
            AttributeData::single("nickname", "jd"),
            AttributeData::single("jansExtManaged", "keep"),
            AttributeData::single("jansExtHidden", "keep"),
            AttributeData::single("locale", "en"),
            AttributeData::single(OBJECT_CLASS, "jansPerson"),
        ];
        let to_persist = vec![
            AttributeData::single("uid", "jdoe"),
            AttributeData::single("title", "dr"),
            AttributeData::single("locale", "fr"),
        ];
        let changes = diff(&to_persist, &current, &rules);
        assert_eq!(kinds(&changes), vec![
            (ModificationType::Remove, "nickname"),
            (ModificationType::Add, "title"),
            (ModificationType::Replace, "locale"),
        ]);
    }

    // ========================================================================
    // Properties
    // ========================================================================

    fn attribute_strategy() -> impl Strategy<Value = AttributeData> {
        let names = prop::sample::select(vec!["uid", "mail", "jansLastLogon", "jansMemberOf", "nickname", "locale"]);
        let values = prop::collection::vec(prop::sample::select(vec!["", "a", "b", "c"]), 0..3);
        (names, values, any::<bool>()).prop_map(|(name, values, multi_valued)| {
            AttributeData::new(name, values.into_iter().map(AttributeValue::from).collect(), multi_valued)
        })
    }

    fn rules_strategy() -> impl Strategy<Value = DiffRules> {
        (any::<bool>(), any::<bool>()).prop_map(|(with_list, stores_full_entry)| DiffRules {
            attributes_list: with_list.then(HashMap::new),
            stores_full_entry,
            ..rules()
        })
    }

    fn dedup(attributes: Vec<AttributeData>) -> Vec<AttributeData> {
        let mut seen = HashSet::new();
        attributes
            .into_iter()
            .filter(|a| seen.insert(a.name.to_ascii_lowercase()))
            .collect()
    }

    proptest! {
        #[test]
        fn diff_against_itself_is_empty(
            attributes in prop::collection::vec(attribute_strategy(), 0..6),
            rules in rules_strategy(),
        ) {
            let attributes = dedup(attributes);
            prop_assert!(diff(&attributes, &attributes, &rules).is_empty());
        }

        #[test]
        fn diff_is_deterministic(
            to_persist in prop::collection::vec(attribute_strategy(), 0..6),
            current in prop::collection::vec(attribute_strategy(), 0..6),
            rules in rules_strategy(),
        ) {
            let (to_persist, current) = (dedup(to_persist), dedup(current));
            prop_assert_eq!(diff(&to_persist, &current, &rules), diff(&to_persist, &current, &rules));
        }

        #[test]
        fn empty_values_are_never_written_and_update_only_never_removed(
            to_persist in prop::collection::vec(attribute_strategy(), 0..6),
            current in prop::collection::vec(attribute_strategy(), 0..6),
            rules in rules_strategy(),
        ) {
            let (to_persist, current) = (dedup(to_persist), dedup(current));
            for change in diff(&to_persist, &current, &rules) {
                match &change {
                    AttributeModification::Add(a) | AttributeModification::ForceUpdate(a) => {
                        prop_assert!(!a.is_empty_values())
                    }
                    AttributeModification::Replace { attribute, .. } => {
                        prop_assert!(!attribute.is_empty_values())
                    }
                    AttributeModification::Remove(a) => {
                        prop_assert!(!a.is_named("jansLastLogon"))
                    }
                }
            }
        }
    }
}
