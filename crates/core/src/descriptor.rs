use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::attribute::{AttributeData, OBJECT_CLASS};
use crate::error::PersistenceError;
use crate::value::AttributeValue;

pub type Getter<T, V> = fn(&T) -> &V;
pub type Setter<T, V> = fn(&mut T) -> &mut V;

/// Closed set of wire values for an enum-backed attribute.
pub trait AttributeEnum: Sized + Send + Sync + 'static {
    fn value(&self) -> &'static str;

    fn from_value(value: &str) -> Option<Self>;
}

/// A business type that can be stored as a directory-style entry.
pub trait Entry: Default + Send + Sync + 'static {
    fn descriptor() -> Result<EntityDescriptor<Self>, PersistenceError>;
}

/// One element of an attributes-list field: stored as its own top-level attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomAttribute {
    pub name: String,
    pub values: Vec<AttributeValue>,
    pub multi_valued: bool,
}

impl CustomAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
            multi_valued: false,
        }
    }

    pub fn multi(name: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            values,
            multi_valued: true,
        }
    }

    pub fn to_attribute(&self) -> AttributeData {
        AttributeData::new(self.name.clone(), self.values.clone(), self.multi_valued)
    }

    pub fn from_attribute(attribute: AttributeData) -> Self {
        Self {
            name: attribute.name,
            values: attribute.values,
            multi_valued: attribute.multi_valued,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeFlags {
    pub ignore_during_read: bool,
    pub ignore_during_update: bool,
    pub update_only: bool,
    pub required: bool,
    pub multi_valued: Option<bool>,
}

impl AttributeFlags {
    pub fn ignore_during_read(mut self) -> Self {
        self.ignore_during_read = true;
        self
    }

    pub fn ignore_during_update(mut self) -> Self {
        self.ignore_during_update = true;
        self
    }

    pub fn update_only(mut self) -> Self {
        self.update_only = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multi_valued(mut self, multi_valued: bool) -> Self {
        self.multi_valued = Some(multi_valued);
        self
    }
}

type EnumGet<T> = Arc<dyn Fn(&T) -> Vec<&'static str> + Send + Sync>;
type EnumSet<T> = Arc<dyn Fn(&mut T, &[String]) -> Result<(), String> + Send + Sync>;
type JsonGet<T> = Arc<dyn Fn(&T) -> Result<Option<String>, serde_json::Error> + Send + Sync>;
type JsonSet<T> = Arc<dyn Fn(&mut T, &str) -> Result<(), serde_json::Error> + Send + Sync>;

/// How a field is read from and written back to an instance.
pub enum FieldAccessor<T> {
    Text(Getter<T, Option<String>>, Setter<T, Option<String>>),
    Boolean(Getter<T, Option<bool>>, Setter<T, Option<bool>>),
    Integer(Getter<T, Option<i32>>, Setter<T, Option<i32>>),
    Long(Getter<T, Option<i64>>, Setter<T, Option<i64>>),
    Timestamp(Getter<T, Option<DateTime<Utc>>>, Setter<T, Option<DateTime<Utc>>>),
    TextList(Getter<T, Vec<String>>, Setter<T, Vec<String>>),
    TimestampList(Getter<T, Vec<DateTime<Utc>>>, Setter<T, Vec<DateTime<Utc>>>),
    Enum { list: bool, get: EnumGet<T>, set: EnumSet<T> },
    Json { get: JsonGet<T>, set: JsonSet<T> },
}

impl<T> Clone for FieldAccessor<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Text(g, s) => Self::Text(*g, *s),
            Self::Boolean(g, s) => Self::Boolean(*g, *s),
            Self::Integer(g, s) => Self::Integer(*g, *s),
            Self::Long(g, s) => Self::Long(*g, *s),
            Self::Timestamp(g, s) => Self::Timestamp(*g, *s),
            Self::TextList(g, s) => Self::TextList(*g, *s),
            Self::TimestampList(g, s) => Self::TimestampList(*g, *s),
            Self::Enum { list, get, set } => Self::Enum {
                list: *list,
                get: Arc::clone(get),
                set: Arc::clone(set),
            },
            Self::Json { get, set } => Self::Json {
                get: Arc::clone(get),
                set: Arc::clone(set),
            },
        }
    }
}

impl<T> FieldAccessor<T> {
    pub fn is_list(&self) -> bool {
        match self {
            Self::TextList(..) | Self::TimestampList(..) => true,
            Self::Enum { list, .. } => *list,
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(..) => "text",
            Self::Boolean(..) => "boolean",
            Self::Integer(..) => "integer",
            Self::Long(..) => "long",
            Self::Timestamp(..) => "timestamp",
            Self::TextList(..) => "text list",
            Self::TimestampList(..) => "timestamp list",
            Self::Enum { list: false, .. } => "enum",
            Self::Enum { list: true, .. } => "enum list",
            Self::Json { .. } => "json",
        }
    }
}

pub struct PropertyMapping<T> {
    pub attribute: String,
    pub accessor: FieldAccessor<T>,
    pub flags: AttributeFlags,
}

impl<T> Clone for PropertyMapping<T> {
    fn clone(&self) -> Self {
        Self {
            attribute: self.attribute.clone(),
            accessor: self.accessor.clone(),
            flags: self.flags,
        }
    }
}

impl<T> PropertyMapping<T> {
    pub fn is_multi_valued(&self) -> bool {
        self.flags.multi_valued.unwrap_or_else(|| self.accessor.is_list())
    }
}

pub struct AttributesListMapping<T> {
    pub get: Getter<T, Vec<CustomAttribute>>,
    pub set: Setter<T, Vec<CustomAttribute>>,
    pub sort_by_name: bool,
    configuration: HashMap<String, AttributeFlags>,
}

impl<T> Clone for AttributesListMapping<T> {
    fn clone(&self) -> Self {
        Self {
            get: self.get,
            set: self.set,
            sort_by_name: self.sort_by_name,
            configuration: self.configuration.clone(),
        }
    }
}

impl<T> AttributesListMapping<T> {
    pub fn flags_for(&self, attribute: &str) -> AttributeFlags {
        self.configuration
            .get(&attribute.to_ascii_lowercase())
            .copied()
            .unwrap_or_default()
    }

    /// Sub-attributes that carry explicit flags, keyed by lower-cased name.
    pub fn configured(&self) -> impl Iterator<Item = (&str, AttributeFlags)> {
        self.configuration.iter().map(|(name, flags)| (name.as_str(), *flags))
    }
}

/// Static mapping between a business type and its stored attributes.
pub struct EntityDescriptor<T> {
    object_classes: Vec<String>,
    dn: (Getter<T, Option<String>>, Setter<T, Option<String>>),
    custom_object_classes: Option<(Getter<T, Vec<String>>, Setter<T, Vec<String>>)>,
    properties: Vec<PropertyMapping<T>>,
    attributes_list: Option<AttributesListMapping<T>>,
    force_update: bool,
}

impl<T> Clone for EntityDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            object_classes: self.object_classes.clone(),
            dn: self.dn,
            custom_object_classes: self.custom_object_classes,
            properties: self.properties.clone(),
            attributes_list: self.attributes_list.clone(),
            force_update: self.force_update,
        }
    }
}

impl<T: 'static> EntityDescriptor<T> {
    pub fn builder<I, S>(object_classes: I) -> EntityDescriptorBuilder<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EntityDescriptorBuilder {
            object_classes: object_classes.into_iter().map(Into::into).collect(),
            dn: Vec::new(),
            custom_object_classes: None,
            properties: Vec::new(),
            attributes_list: None,
            force_update: false,
        }
    }

    pub fn type_object_classes(&self) -> &[String] {
        &self.object_classes
    }

    pub fn properties(&self) -> &[PropertyMapping<T>] {
        &self.properties
    }

    pub fn property(&self, attribute: &str) -> Option<&PropertyMapping<T>> {
        self.properties
            .iter()
            .find(|p| p.attribute.eq_ignore_ascii_case(attribute))
    }

    pub fn attributes_list(&self) -> Option<&AttributesListMapping<T>> {
        self.attributes_list.as_ref()
    }

    pub fn is_force_update(&self) -> bool {
        self.force_update
    }

    pub fn dn<'a>(&self, entry: &'a T) -> Option<&'a str> {
        (self.dn.0)(entry).as_deref()
    }

    pub fn set_dn(&self, entry: &mut T, dn: &str) {
        *(self.dn.1)(entry) = Some(dn.to_string());
    }

    pub fn custom_object_classes<'a>(&self, entry: &'a T) -> &'a [String] {
        match self.custom_object_classes {
            Some((get, _)) => get(entry),
            None => &[],
        }
    }

    pub fn set_custom_object_classes(&self, entry: &mut T, classes: Vec<String>) {
        if let Some((_, set)) = self.custom_object_classes {
            *set(entry) = classes;
        }
    }

    /// Intrinsic classes first, then the entry's custom ones, without duplicates.
    pub fn object_classes(&self, entry: &T) -> Vec<String> {
        let mut seen = HashSet::new();
        self.object_classes
            .iter()
            .chain(self.custom_object_classes(entry))
            .filter(|class| seen.insert(class.to_ascii_lowercase()))
            .cloned()
            .collect()
    }

    pub fn is_type_object_class(&self, class: &str) -> bool {
        self.object_classes.iter().any(|c| c.eq_ignore_ascii_case(class))
    }

    /// Attribute names to fetch for this type, or `None` when every stored
    /// attribute is needed to populate the attributes list.
    pub fn fetch_attributes(&self) -> Option<Vec<String>> {
        if self.attributes_list.is_some() {
            return None;
        }
        let mut names: Vec<String> = self
            .properties
            .iter()
            .filter(|p| !p.flags.ignore_during_read)
            .map(|p| p.attribute.clone())
            .collect();
        names.push(OBJECT_CLASS.to_string());
        Some(names)
    }
}

pub struct EntityDescriptorBuilder<T> {
    object_classes: Vec<String>,
    dn: Vec<(Getter<T, Option<String>>, Setter<T, Option<String>>)>,
    custom_object_classes: Option<(Getter<T, Vec<String>>, Setter<T, Vec<String>>)>,
    properties: Vec<PropertyMapping<T>>,
    attributes_list: Option<AttributesListMapping<T>>,
    force_update: bool,
}

impl<T: 'static> EntityDescriptorBuilder<T> {
    pub fn dn(mut self, get: Getter<T, Option<String>>, set: Setter<T, Option<String>>) -> Self {
        self.dn.push((get, set));
        self
    }

    pub fn custom_object_classes(mut self, get: Getter<T, Vec<String>>, set: Setter<T, Vec<String>>) -> Self {
        self.custom_object_classes = Some((get, set));
        self
    }

    pub fn force_update(mut self) -> Self {
        self.force_update = true;
        self
    }

    fn push(mut self, attribute: &str, accessor: FieldAccessor<T>, flags: AttributeFlags) -> Self {
        self.properties.push(PropertyMapping {
            attribute: attribute.to_string(),
            accessor,
            flags,
        });
        self
    }

    pub fn text(self, attribute: &str, get: Getter<T, Option<String>>, set: Setter<T, Option<String>>, flags: AttributeFlags) -> Self {
        self.push(attribute, FieldAccessor::Text(get, set), flags)
    }

    pub fn boolean(self, attribute: &str, get: Getter<T, Option<bool>>, set: Setter<T, Option<bool>>, flags: AttributeFlags) -> Self {
        self.push(attribute, FieldAccessor::Boolean(get, set), flags)
    }

    pub fn integer(self, attribute: &str, get: Getter<T, Option<i32>>, set: Setter<T, Option<i32>>, flags: AttributeFlags) -> Self {
        self.push(attribute, FieldAccessor::Integer(get, set), flags)
    }

    pub fn long(self, attribute: &str, get: Getter<T, Option<i64>>, set: Setter<T, Option<i64>>, flags: AttributeFlags) -> Self {
        self.push(attribute, FieldAccessor::Long(get, set), flags)
    }

    pub fn timestamp(
        self,
        attribute: &str,
        get: Getter<T, Option<DateTime<Utc>>>,
        set: Setter<T, Option<DateTime<Utc>>>,
        flags: AttributeFlags,
    ) -> Self {
        self.push(attribute, FieldAccessor::Timestamp(get, set), flags)
    }

    pub fn text_list(self, attribute: &str, get: Getter<T, Vec<String>>, set: Setter<T, Vec<String>>, flags: AttributeFlags) -> Self {
        self.push(attribute, FieldAccessor::TextList(get, set), flags)
    }

    pub fn timestamp_list(
        self,
        attribute: &str,
        get: Getter<T, Vec<DateTime<Utc>>>,
        set: Setter<T, Vec<DateTime<Utc>>>,
        flags: AttributeFlags,
    ) -> Self {
        self.push(attribute, FieldAccessor::TimestampList(get, set), flags)
    }

    pub fn enumerated<E: AttributeEnum>(
        self,
        attribute: &str,
        get: Getter<T, Option<E>>,
        set: Setter<T, Option<E>>,
        flags: AttributeFlags,
    ) -> Self {
        let accessor = FieldAccessor::Enum {
            list: false,
            get: Arc::new(move |entry: &T| get(entry).iter().map(AttributeEnum::value).collect()),
            set: Arc::new(move |entry: &mut T, values: &[String]| {
                let resolved = match values.first() {
                    Some(value) => Some(E::from_value(value).ok_or_else(|| format!("unknown enum value '{value}'"))?),
                    None => None,
                };
                *set(entry) = resolved;
                Ok(())
            }),
        };
        self.push(attribute, accessor, flags)
    }

    pub fn enum_list<E: AttributeEnum>(
        self,
        attribute: &str,
        get: Getter<T, Vec<E>>,
        set: Setter<T, Vec<E>>,
        flags: AttributeFlags,
    ) -> Self {
        let accessor = FieldAccessor::Enum {
            list: true,
            get: Arc::new(move |entry: &T| get(entry).iter().map(AttributeEnum::value).collect()),
            set: Arc::new(move |entry: &mut T, values: &[String]| {
                let resolved = values
                    .iter()
                    .map(|value| E::from_value(value).ok_or_else(|| format!("unknown enum value '{value}'")))
                    .collect::<Result<Vec<E>, String>>()?;
                *set(entry) = resolved;
                Ok(())
            }),
        };
        self.push(attribute, accessor, flags)
    }

    /// A field whose whole value is stored as one JSON document.
    pub fn json<V>(self, attribute: &str, get: Getter<T, Option<V>>, set: Setter<T, Option<V>>, flags: AttributeFlags) -> Self
    where
        V: Serialize + DeserializeOwned + 'static,
    {
        let accessor = FieldAccessor::Json {
            get: Arc::new(move |entry: &T| get(entry).as_ref().map(serde_json::to_string).transpose()),
            set: Arc::new(move |entry: &mut T, text: &str| {
                *set(entry) = Some(serde_json::from_str(text)?);
                Ok(())
            }),
        };
        self.push(attribute, accessor, flags)
    }

    pub fn attributes_list(
        mut self,
        get: Getter<T, Vec<CustomAttribute>>,
        set: Setter<T, Vec<CustomAttribute>>,
        sort_by_name: bool,
        configuration: &[(&str, AttributeFlags)],
    ) -> Self {
        self.attributes_list = Some(AttributesListMapping {
            get,
            set,
            sort_by_name,
            configuration: configuration
                .iter()
                .map(|(name, flags)| (name.to_ascii_lowercase(), *flags))
                .collect(),
        });
        self
    }

    pub fn build(self) -> Result<EntityDescriptor<T>, PersistenceError> {
        let type_name = std::any::type_name::<T>();
        if self.object_classes.is_empty() {
            return Err(PersistenceError::Configuration(format!(
                "entry type {type_name} declares no object classes"
            )));
        }
        let dn = match self.dn.as_slice() {
            [only] => *only,
            [] => {
                return Err(PersistenceError::Configuration(format!(
                    "entry type {type_name} has no DN property"
                )));
            }
            _ => {
                return Err(PersistenceError::Configuration(format!(
                    "entry type {type_name} should have only one DN property"
                )));
            }
        };

        let mut seen = HashSet::new();
        for property in &self.properties {
            let key = property.attribute.to_ascii_lowercase();
            if key.is_empty() || key == OBJECT_CLASS.to_ascii_lowercase() {
                return Err(PersistenceError::Configuration(format!(
                    "entry type {type_name} maps a {} field to reserved attribute '{}'",
                    property.accessor.kind_name(),
                    property.attribute
                )));
            }
            if !seen.insert(key) {
                return Err(PersistenceError::Configuration(format!(
                    "entry type {type_name} maps attribute '{}' more than once",
                    property.attribute
                )));
            }
        }

        Ok(EntityDescriptor {
            object_classes: self.object_classes,
            dn,
            custom_object_classes: self.custom_object_classes,
            properties: self.properties,
            attributes_list: self.attributes_list,
            force_update: self.force_update,
        })
    }
}
