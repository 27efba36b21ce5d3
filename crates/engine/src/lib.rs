pub mod diff;
pub mod marshaller;

pub use diff::{DiffRules, SchemaUpdateMode, diff};
pub use marshaller::{from_attributes, to_attributes};

use std::sync::Arc;

use jans_orm_core::attribute::find_attribute;
use jans_orm_core::{
    AttributeData, AttributeModification, AttributeValue, BatchHandler, EntityDescriptor, Entry, EntryData, Filter,
    OBJECT_CLASS, OperationService, PagedResult, PersistenceError, SchemaRegistry, SearchRequest,
    SearchReturnDataType, SortOrder, TimeCodec,
};
use tracing::{debug, warn};

/// Per-call overrides for [`EntryManager::merge_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Apply the entry's values as additions or removals without reading
    /// the stored entry first.
    pub schema_update: Option<SchemaUpdateMode>,
    /// Write every mapped attribute, clearing the ones the entry leaves unset.
    pub force_update: bool,
}

/// Typed persistence facade over one backend.
pub struct EntryManager<B: OperationService> {
    backend: B,
    registry: Arc<SchemaRegistry>,
}

impl<B: OperationService> EntryManager<B> {
    pub fn new(backend: B) -> Self {
        Self::with_registry(backend, Arc::new(SchemaRegistry::new()))
    }

    pub fn with_registry(backend: B, registry: Arc<SchemaRegistry>) -> Self {
        Self { backend, registry }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Validates and caches the descriptor of `T`.
    pub fn register<T: Entry>(&self) -> Result<(), PersistenceError> {
        self.registry.register::<T>()
    }

    fn descriptor<T: Entry>(&self) -> Result<Arc<EntityDescriptor<T>>, PersistenceError> {
        self.registry.describe::<T>()
    }

    pub fn object_classes<T: Entry>(&self, entry: &T) -> Result<Vec<String>, PersistenceError> {
        Ok(self.descriptor::<T>()?.object_classes(entry))
    }

    pub fn shutdown(&self) {
        self.backend.shutdown();
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Inserts `entry`. A duplicate key is retried exactly once.
    pub fn persist<T: Entry>(&self, entry: &T) -> Result<(), PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let dn = require_dn(&descriptor, entry)?;
        let object_classes = descriptor.object_classes(entry);
        let mut attributes = Vec::with_capacity(descriptor.properties().len() + 1);
        attributes.push(AttributeData::multi(
            OBJECT_CLASS,
            object_classes.iter().map(|c| AttributeValue::from(c.as_str())).collect(),
        ));
        attributes.extend(to_attributes(&descriptor, entry)?);

        match self.backend.add_entry(dn, &attributes) {
            Ok(()) => {
                debug!(dn, attributes = attributes.len(), "persisted entry");
                Ok(())
            }
            Err(e) if e.is_duplicate_key() => {
                warn!(dn, error = %e, "duplicate key on insert, retrying once");
                self.retry_persist(&descriptor, dn, &object_classes, &attributes)
            }
            Err(e) => Err(e),
        }
    }

    fn retry_persist<T: Entry>(
        &self,
        descriptor: &EntityDescriptor<T>,
        dn: &str,
        object_classes: &[String],
        attributes: &[AttributeData],
    ) -> Result<(), PersistenceError> {
        let capabilities = self.backend.capabilities();
        if capabilities.supports_upsert {
            let rules = DiffRules::for_descriptor(descriptor, capabilities.stores_full_entry).with_force_update(true);
            let changes = diff(attributes, &[], &rules);
            return match self.backend.update_entry(dn, object_classes, &changes) {
                Err(e) if e.is_not_found() => {
                    debug!(dn, "no row to update, inserting again");
                    self.backend.add_entry(dn, attributes)
                }
                other => other,
            };
        }

        match self.backend.delete(dn, object_classes) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(dn, "nothing to remove before re-insert"),
            Err(e) => return Err(e),
        }
        self.backend.add_entry(dn, attributes)
    }

    pub fn merge<T: Entry>(&self, entry: &T) -> Result<(), PersistenceError> {
        self.merge_with(entry, MergeOptions::default())
    }

    /// Writes only what differs from the stored entry.
    pub fn merge_with<T: Entry>(&self, entry: &T, options: MergeOptions) -> Result<(), PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let dn = require_dn(&descriptor, entry)?;
        let object_classes = descriptor.object_classes(entry);
        let capabilities = self.backend.capabilities();
        let rules = DiffRules::for_descriptor(&descriptor, capabilities.stores_full_entry)
            .with_schema_update(options.schema_update)
            .with_force_update(options.force_update);

        let attributes = to_attributes(&descriptor, entry)?;
        let current = if rules.schema_update.is_some() || rules.force_update {
            Vec::new()
        } else {
            self.backend
                .lookup(dn, &object_classes, descriptor.fetch_attributes().as_deref())?
        };

        let mut changes = Vec::new();
        if let Some(stored) = find_attribute(&current, OBJECT_CLASS) {
            let stored_classes = stored.text_values();
            if capabilities.single_object_class {
                if let (Some(stored_class), Some(wanted)) = (stored_classes.first(), object_classes.first()) {
                    if !stored_class.eq_ignore_ascii_case(wanted) {
                        return Err(PersistenceError::Unsupported(format!(
                            "entry '{dn}' is stored as '{stored_class}' and cannot become '{wanted}'"
                        )));
                    }
                }
            } else if !same_classes(&stored_classes, &object_classes) {
                changes.push(AttributeModification::Replace {
                    attribute: AttributeData::multi(
                        OBJECT_CLASS,
                        object_classes.iter().map(|c| AttributeValue::from(c.as_str())).collect(),
                    ),
                    previous: stored.clone(),
                });
            }
        }
        changes.extend(diff(&attributes, &current, &rules));

        if changes.is_empty() {
            debug!(dn, "entry unchanged, nothing to merge");
            return Ok(());
        }
        debug!(dn, changes = changes.len(), "merging entry");
        self.backend.update_entry(dn, &object_classes, &changes)
    }

    pub fn remove<T: Entry>(&self, entry: &T) -> Result<(), PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let dn = require_dn(&descriptor, entry)?;
        self.backend.delete(dn, &descriptor.object_classes(entry))
    }

    pub fn remove_by_dn<T: Entry>(&self, dn: &str) -> Result<(), PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        self.backend.delete(dn, descriptor.type_object_classes())
    }

    /// Removes up to `count` entries of `T` under `base_dn` (`0` for all).
    pub fn remove_matching<T: Entry>(
        &self,
        base_dn: &str,
        filter: Option<&Filter>,
        count: usize,
    ) -> Result<usize, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        self.backend
            .delete_by_filter(base_dn, descriptor.type_object_classes(), filter, count)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn find<T: Entry>(&self, dn: &str) -> Result<T, PersistenceError> {
        self.find_with_attributes(dn, None)
    }

    pub fn find_optional<T: Entry>(&self, dn: &str) -> Result<Option<T>, PersistenceError> {
        match self.find(dn) {
            Ok(entry) => Ok(Some(entry)),
            Err(PersistenceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Loads only `attributes` when given, otherwise everything `T` maps.
    pub fn find_with_attributes<T: Entry>(&self, dn: &str, attributes: Option<&[&str]>) -> Result<T, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let names: Option<Vec<String>> = match attributes {
            Some(names) => Some(names.iter().map(|n| n.to_string()).collect()),
            None => descriptor.fetch_attributes(),
        };
        let stored = self
            .backend
            .lookup(dn, descriptor.type_object_classes(), names.as_deref())?;
        from_attributes(&descriptor, dn, &stored, self.time_codec())
    }

    pub fn contains<T: Entry>(&self, dn: &str) -> Result<bool, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        match self
            .backend
            .lookup(dn, descriptor.type_object_classes(), Some(&[String::new()][..]))
        {
            Ok(_) => Ok(true),
            Err(PersistenceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn find_entries<T: Entry>(
        &self,
        base_dn: &str,
        filter: Option<Filter>,
        count: usize,
    ) -> Result<Vec<T>, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let request = self.request(&descriptor, base_dn, filter).with_range(0, count);
        let result = self.backend.search(&request, None)?;
        self.convert(&descriptor, result.entries)
    }

    /// One window of results plus the total number of matches.
    pub fn find_paged_entries<T: Entry>(
        &self,
        base_dn: &str,
        filter: Option<Filter>,
        order_by: &[SortOrder],
        start: usize,
        count: usize,
    ) -> Result<PagedResult<T>, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let mut request = self
            .request(&descriptor, base_dn, filter)
            .with_return_type(SearchReturnDataType::SearchCount)
            .with_range(start, count);
        request.order_by.extend(order_by.iter().cloned());
        let mut result = self.backend.search(&request, None)?;
        let entries = self.convert(&descriptor, std::mem::take(&mut result.entries))?;
        Ok(result.map_entries(entries))
    }

    /// Streams matches page by page through `handler` and returns the
    /// entries the handler chose to keep.
    pub fn find_entries_batched<T: Entry>(
        &self,
        base_dn: &str,
        filter: Option<Filter>,
        page_size: usize,
        count: usize,
        handler: &mut dyn BatchHandler<T>,
    ) -> Result<Vec<T>, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let request = self
            .request(&descriptor, base_dn, filter)
            .with_range(0, count)
            .with_page_size(page_size);
        let mut typed = TypedBatch {
            descriptor: &descriptor,
            codec: self.time_codec(),
            inner: handler,
        };
        let result = self.backend.search(&request, Some(&mut typed))?;
        self.convert(&descriptor, result.entries)
    }

    pub fn count_entries<T: Entry>(&self, base_dn: &str, filter: Option<Filter>) -> Result<usize, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        let request = self
            .request(&descriptor, base_dn, filter)
            .with_return_type(SearchReturnDataType::Count)
            .with_attributes(Some(vec![String::new()]));
        Ok(self.backend.search(&request, None)?.total_entries_count)
    }

    pub fn authenticate<T: Entry>(&self, dn: &str, password: &str) -> Result<bool, PersistenceError> {
        let descriptor = self.descriptor::<T>()?;
        self.backend
            .authenticate(dn, descriptor.type_object_classes(), password)
    }

    // ========================================================================
    // Raw entries
    // ========================================================================

    /// Every stored attribute of `dn`, untyped.
    pub fn export_entry(&self, dn: &str, object_classes: &[String]) -> Result<Vec<AttributeData>, PersistenceError> {
        self.backend.lookup(dn, object_classes, None)
    }

    /// Stores raw attributes as a new entry; `attributes` must carry `objectClass`.
    pub fn import_entry(&self, dn: &str, attributes: &[AttributeData]) -> Result<(), PersistenceError> {
        if find_attribute(attributes, OBJECT_CLASS).is_none_or(AttributeData::is_empty_values) {
            return Err(PersistenceError::Mapping(format!("imported entry '{dn}' has no object class")));
        }
        self.backend.add_entry(dn, attributes)
    }

    fn time_codec(&self) -> &dyn TimeCodec {
        &self.backend
    }

    fn request<T: Entry>(&self, descriptor: &EntityDescriptor<T>, base_dn: &str, filter: Option<Filter>) -> SearchRequest {
        SearchRequest::new(base_dn, descriptor.type_object_classes().to_vec())
            .with_filter(filter)
            .with_attributes(descriptor.fetch_attributes())
    }

    fn convert<T: Entry>(&self, descriptor: &EntityDescriptor<T>, entries: Vec<EntryData>) -> Result<Vec<T>, PersistenceError> {
        entries
            .iter()
            .map(|entry| from_attributes(descriptor, &entry.dn, &entry.attributes, self.time_codec()))
            .collect()
    }
}

fn require_dn<'a, T: 'static>(descriptor: &EntityDescriptor<T>, entry: &'a T) -> Result<&'a str, PersistenceError> {
    descriptor
        .dn(entry)
        .filter(|dn| !dn.trim().is_empty())
        .ok_or_else(|| {
            PersistenceError::Mapping(format!("entry of type {} has an empty DN", std::any::type_name::<T>()))
        })
}

fn same_classes(stored: &[String], wanted: &[String]) -> bool {
    stored.len() == wanted.len()
        && wanted
            .iter()
            .all(|class| stored.iter().any(|s| s.eq_ignore_ascii_case(class)))
}

/// Converts raw search pages into `T` before they reach the caller's handler.
struct TypedBatch<'a, T> {
    descriptor: &'a EntityDescriptor<T>,
    codec: &'a dyn TimeCodec,
    inner: &'a mut dyn BatchHandler<T>,
}

impl<T: Entry> BatchHandler<EntryData> for TypedBatch<'_, T> {
    fn collect_search_result(&mut self, page_len: usize) -> bool {
        self.inner.collect_search_result(page_len)
    }

    fn perform_action(&mut self, entries: &[EntryData]) -> Result<(), PersistenceError> {
        let typed = entries
            .iter()
            .map(|entry| from_attributes(self.descriptor, &entry.dn, &entry.attributes, self.codec))
            .collect::<Result<Vec<T>, _>>()?;
        self.inner.perform_action(&typed)
    }
}
