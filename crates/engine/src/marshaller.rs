use chrono::{DateTime, Utc};
use jans_orm_core::descriptor::{FieldAccessor, PropertyMapping};
use jans_orm_core::{
    AttributeData, AttributeValue, CustomAttribute, EntityDescriptor, OBJECT_CLASS, PersistenceError, TimeCodec,
};
use tracing::{debug, warn};

/// Mapped fields in declaration order, then attributes-list items. Unset
/// fields and empty lists produce nothing. `objectClass` is left to the caller.
pub fn to_attributes<T>(descriptor: &EntityDescriptor<T>, entry: &T) -> Result<Vec<AttributeData>, PersistenceError>
where
    T: 'static,
{
    let mut attributes = Vec::with_capacity(descriptor.properties().len());
    for property in descriptor.properties() {
        if let Some(values) = read_property(property, entry)? {
            attributes.push(AttributeData::new(property.attribute.clone(), values, property.is_multi_valued()));
        }
    }

    if let Some(list) = descriptor.attributes_list() {
        for item in (list.get)(entry) {
            if item.name.is_empty() || item.values.is_empty() {
                continue;
            }
            if item.name.eq_ignore_ascii_case(OBJECT_CLASS) || descriptor.property(&item.name).is_some() {
                debug!(attribute = %item.name, "attributes-list item shadows a mapped attribute, skipped");
                continue;
            }
            let mut attribute = item.to_attribute();
            if let Some(multi_valued) = list.flags_for(&item.name).multi_valued {
                attribute.multi_valued = multi_valued;
            }
            attributes.push(attribute);
        }
    }
    Ok(attributes)
}

fn read_property<T>(property: &PropertyMapping<T>, entry: &T) -> Result<Option<Vec<AttributeValue>>, PersistenceError> {
    let values = match &property.accessor {
        FieldAccessor::Text(get, _) => get(entry)
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| vec![AttributeValue::Text(s.clone())]),
        FieldAccessor::Boolean(get, _) => get(entry).map(|b| vec![AttributeValue::Boolean(b)]),
        FieldAccessor::Integer(get, _) => get(entry).map(|n| vec![AttributeValue::Integer(n)]),
        FieldAccessor::Long(get, _) => get(entry).map(|n| vec![AttributeValue::Long(n)]),
        FieldAccessor::Timestamp(get, _) => get(entry).map(|t| vec![AttributeValue::Timestamp(t)]),
        FieldAccessor::TextList(get, _) => non_empty(get(entry).iter().cloned().map(AttributeValue::Text).collect()),
        FieldAccessor::TimestampList(get, _) => non_empty(get(entry).iter().copied().map(AttributeValue::Timestamp).collect()),
        FieldAccessor::Enum { get, .. } => non_empty(get(entry).into_iter().map(AttributeValue::from).collect()),
        FieldAccessor::Json { get, .. } => get(entry)
            .map_err(|e| {
                PersistenceError::EntryConversion(format!("failed to serialise attribute '{}': {e}", property.attribute))
            })?
            .map(|json| vec![AttributeValue::Text(json)]),
    };
    Ok(values)
}

fn non_empty(values: Vec<AttributeValue>) -> Option<Vec<AttributeValue>> {
    (!values.is_empty()).then_some(values)
}

/// Rebuilds an entry from stored attributes.
///
/// Object classes outside the type's own list become custom classes,
/// unmapped attributes fold into the attributes-list field when the type has
/// one, and everything else is dropped. A decode failure is an error for
/// `required` fields only; other fields are left unset with a warning.
pub fn from_attributes<T>(
    descriptor: &EntityDescriptor<T>,
    dn: &str,
    attributes: &[AttributeData],
    codec: &dyn TimeCodec,
) -> Result<T, PersistenceError>
where
    T: Default + 'static,
{
    let mut entry = T::default();
    descriptor.set_dn(&mut entry, dn);

    let mut custom_classes: Vec<String> = Vec::new();
    let mut leftovers = Vec::new();
    for attribute in attributes {
        if attribute.is_named(OBJECT_CLASS) {
            for class in attribute.text_values() {
                if !descriptor.is_type_object_class(&class)
                    && !custom_classes.iter().any(|c| c.eq_ignore_ascii_case(&class))
                {
                    custom_classes.push(class);
                }
            }
            continue;
        }

        if let Some(property) = descriptor.property(&attribute.name) {
            if property.flags.ignore_during_read {
                continue;
            }
            if let Err(reason) = write_property(property, &mut entry, attribute, codec) {
                if property.flags.required {
                    return Err(PersistenceError::EntryConversion(format!(
                        "entry '{dn}': attribute '{}': {reason}",
                        property.attribute
                    )));
                }
                warn!(dn, attribute = %property.attribute, reason = %reason, "failed to decode optional attribute");
            }
            continue;
        }

        if let Some(list) = descriptor.attributes_list() {
            let flags = list.flags_for(&attribute.name);
            if flags.ignore_during_read || attribute.is_empty_values() {
                continue;
            }
            let mut item = CustomAttribute::from_attribute(attribute.clone());
            if let Some(multi_valued) = flags.multi_valued {
                item.multi_valued = multi_valued;
            }
            leftovers.push(item);
        }
    }

    if !custom_classes.is_empty() {
        descriptor.set_custom_object_classes(&mut entry, custom_classes);
    }
    if let Some(list) = descriptor.attributes_list() {
        if list.sort_by_name {
            leftovers.sort_by_key(|item| item.name.to_ascii_lowercase());
        }
        *(list.set)(&mut entry) = leftovers;
    }
    Ok(entry)
}

fn write_property<T>(
    property: &PropertyMapping<T>,
    entry: &mut T,
    attribute: &AttributeData,
    codec: &dyn TimeCodec,
) -> Result<(), String> {
    let first = attribute.values.first();
    match &property.accessor {
        FieldAccessor::Text(_, set) => *set(entry) = first.map(|v| decode_text(v, codec)),
        FieldAccessor::Boolean(_, set) => *set(entry) = first.map(decode_boolean).transpose()?,
        FieldAccessor::Integer(_, set) => {
            *set(entry) = first
                .map(|v| decode_long(v).and_then(|n| i32::try_from(n).map_err(|_| format!("{n} is out of range"))))
                .transpose()?
        }
        FieldAccessor::Long(_, set) => *set(entry) = first.map(decode_long).transpose()?,
        FieldAccessor::Timestamp(_, set) => *set(entry) = first.map(|v| decode_timestamp(v, codec)).transpose()?,
        FieldAccessor::TextList(_, set) => *set(entry) = attribute.values.iter().map(|v| decode_text(v, codec)).collect(),
        FieldAccessor::TimestampList(_, set) => {
            *set(entry) = attribute
                .values
                .iter()
                .map(|v| decode_timestamp(v, codec))
                .collect::<Result<_, _>>()?
        }
        FieldAccessor::Enum { set, .. } => {
            let values: Vec<String> = attribute.values.iter().map(|v| decode_text(v, codec)).collect();
            set(entry, values.as_slice())?
        }
        FieldAccessor::Json { set, .. } => {
            if let Some(value) = first {
                let text = decode_text(value, codec);
                set(entry, text.as_str()).map_err(|e| format!("invalid JSON: {e}"))?
            }
        }
    }
    Ok(())
}

fn decode_text(value: &AttributeValue, codec: &dyn TimeCodec) -> String {
    match value {
        AttributeValue::Text(s) => s.clone(),
        AttributeValue::Timestamp(t) => codec.encode_time(t),
        other => other.to_string(),
    }
}

fn decode_boolean(value: &AttributeValue) -> Result<bool, String> {
    match value {
        AttributeValue::Boolean(b) => Ok(*b),
        AttributeValue::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        AttributeValue::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        AttributeValue::Integer(0) | AttributeValue::Long(0) => Ok(false),
        AttributeValue::Integer(1) | AttributeValue::Long(1) => Ok(true),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

fn decode_long(value: &AttributeValue) -> Result<i64, String> {
    match value {
        AttributeValue::Integer(n) => Ok(i64::from(*n)),
        AttributeValue::Long(n) => Ok(*n),
        // Small integer columns hand back 0 and 1 as booleans.
        AttributeValue::Boolean(b) => Ok(i64::from(*b)),
        AttributeValue::Text(s) => s.trim().parse().map_err(|_| format!("'{s}' is not a number")),
        other => Err(format!("'{other}' is not a number")),
    }
}

fn decode_timestamp(value: &AttributeValue, codec: &dyn TimeCodec) -> Result<DateTime<Utc>, String> {
    match value {
        AttributeValue::Timestamp(t) => Ok(*t),
        AttributeValue::Text(s) => codec.decode_time(s).ok_or_else(|| format!("'{s}' is not a timestamp")),
        other => Err(format!("'{other}' is not a timestamp")),
    }
}
