use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use jans_orm_core::attribute::find_attribute;
use jans_orm_core::dn::{is_descendant_or_self, normalize, parent};
use jans_orm_core::password::compare_credentials;
use jans_orm_core::time::{self, GENERALIZED_TIME_FORMAT};
use jans_orm_core::{
    AttributeData, AttributeModification, AttributeValue, BackendCapabilities, BatchHandler, EntryData, Filter,
    OBJECT_CLASS, OperationService, PagedResult, PersistenceError, SearchRequest, SearchScope, TimeCodec,
    USER_PASSWORD,
};
use tracing::debug;

/// In-memory directory keyed by normalised DN.
///
/// Values are kept as text the way a directory server returns them, every
/// attribute may carry several values and inserts never turn into updates.
#[derive(Default)]
pub struct TestDirectory {
    entries: Mutex<BTreeMap<String, EntryData>>,
    calls: Mutex<Vec<String>>,
}

impl TestDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend calls made so far, e.g. `["add", "delete", "add"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored attribute, bypassing the operation contract.
    pub fn stored(&self, dn: &str, attribute: &str) -> Option<AttributeData> {
        self.lock()
            .get(&normalize(dn))
            .and_then(|entry| entry.attribute(attribute).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, EntryData>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: &str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.to_string());
    }

    fn to_stored(&self, attribute: &AttributeData) -> AttributeData {
        let values = attribute
            .values
            .iter()
            .filter(|v| !v.is_empty_text())
            .map(|value| match value {
                AttributeValue::Timestamp(t) => AttributeValue::Text(self.encode_time(t)),
                other => AttributeValue::Text(other.to_string()),
            })
            .collect();
        AttributeData::multi(attribute.name.clone(), values)
    }
}

fn has_classes(entry: &EntryData, object_classes: &[String]) -> bool {
    let stored = entry.attribute(OBJECT_CLASS).map(AttributeData::text_values).unwrap_or_default();
    object_classes
        .iter()
        .all(|class| stored.iter().any(|s| s.eq_ignore_ascii_case(class)))
}

fn in_scope(entry_dn: &str, base_dn: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => normalize(entry_dn) == normalize(base_dn),
        SearchScope::OneLevel => parent(entry_dn).is_some_and(|p| normalize(&p) == normalize(base_dn)),
        SearchScope::Subtree => is_descendant_or_self(entry_dn, base_dn),
    }
}

fn project(attributes: &[AttributeData], names: Option<&[String]>) -> Vec<AttributeData> {
    match names {
        None => attributes.to_vec(),
        Some(names) => attributes
            .iter()
            .filter(|a| names.iter().any(|n| a.is_named(n)))
            .cloned()
            .collect(),
    }
}

fn put(attributes: &mut Vec<AttributeData>, attribute: AttributeData) {
    attributes.retain(|a| !a.is_named(&attribute.name));
    if !attribute.values.is_empty() {
        attributes.push(attribute);
    }
}

fn not_found(dn: &str) -> PersistenceError {
    PersistenceError::NotFound(format!("no such entry '{dn}'"))
}

impl TimeCodec for TestDirectory {
    fn encode_time(&self, value: &DateTime<Utc>) -> String {
        time::format_time(value, GENERALIZED_TIME_FORMAT)
    }

    fn decode_time(&self, value: &str) -> Option<DateTime<Utc>> {
        time::parse_generalized(value)
    }
}

impl OperationService for TestDirectory {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn add_entry(&self, dn: &str, attributes: &[AttributeData]) -> Result<(), PersistenceError> {
        self.record("add");
        let key = normalize(dn);
        let mut entries = self.lock();
        if entries.contains_key(&key) {
            return Err(PersistenceError::DuplicateKey(format!("entry '{dn}' already exists")));
        }
        let stored = attributes
            .iter()
            .map(|a| self.to_stored(a))
            .filter(|a| !a.values.is_empty())
            .collect();
        entries.insert(key, EntryData::new(dn, stored));
        Ok(())
    }

    fn update_entry(
        &self,
        dn: &str,
        _object_classes: &[String],
        modifications: &[AttributeModification],
    ) -> Result<(), PersistenceError> {
        self.record("update");
        let mut entries = self.lock();
        let entry = entries.get_mut(&normalize(dn)).ok_or_else(|| not_found(dn))?;
        let mut attributes = entry.attributes.clone();
        for modification in modifications {
            let incoming = self.to_stored(modification.attribute());
            match modification {
                AttributeModification::Add(_) => {
                    let mut merged = find_attribute(&attributes, &incoming.name)
                        .map(|a| a.values.clone())
                        .unwrap_or_default();
                    for value in incoming.values {
                        if !merged.iter().any(|v| v.matches(&value)) {
                            merged.push(value);
                        }
                    }
                    put(&mut attributes, AttributeData::multi(incoming.name, merged));
                }
                AttributeModification::Replace { .. } | AttributeModification::ForceUpdate(_) => {
                    put(&mut attributes, incoming);
                }
                AttributeModification::Remove(_) => {
                    let remaining = if incoming.values.is_empty() {
                        Vec::new()
                    } else {
                        find_attribute(&attributes, &incoming.name)
                            .map(|a| {
                                a.values
                                    .iter()
                                    .filter(|v| !incoming.values.iter().any(|r| r.matches(v)))
                                    .cloned()
                                    .collect()
                            })
                            .unwrap_or_default()
                    };
                    put(&mut attributes, AttributeData::multi(incoming.name, remaining));
                }
            }
        }
        entry.attributes = attributes;
        debug!(dn, modifications = modifications.len(), "directory entry modified");
        Ok(())
    }

    fn delete(&self, dn: &str, _object_classes: &[String]) -> Result<(), PersistenceError> {
        self.record("delete");
        self.lock()
            .remove(&normalize(dn))
            .map(|_| ())
            .ok_or_else(|| not_found(dn))
    }

    fn delete_by_filter(
        &self,
        base_dn: &str,
        object_classes: &[String],
        filter: Option<&Filter>,
        count: usize,
    ) -> Result<usize, PersistenceError> {
        self.record("delete_by_filter");
        let mut entries = self.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, e)| is_descendant_or_self(&e.dn, base_dn) && has_classes(e, object_classes))
            .filter(|(_, e)| filter.is_none_or(|f| f.matches(&e.attributes)))
            .map(|(key, _)| key.clone())
            .take(if count == 0 { usize::MAX } else { count })
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len())
    }

    fn lookup(
        &self,
        dn: &str,
        _object_classes: &[String],
        attributes: Option<&[String]>,
    ) -> Result<Vec<AttributeData>, PersistenceError> {
        self.record("lookup");
        let entries = self.lock();
        let entry = entries.get(&normalize(dn)).ok_or_else(|| not_found(dn))?;
        Ok(project(&entry.attributes, attributes))
    }

    fn search(
        &self,
        request: &SearchRequest,
        mut batch: Option<&mut dyn BatchHandler<EntryData>>,
    ) -> Result<PagedResult<EntryData>, PersistenceError> {
        self.record("search");
        let mut matched: Vec<EntryData> = self
            .lock()
            .values()
            .filter(|e| in_scope(&e.dn, &request.base_dn, request.scope))
            .filter(|e| has_classes(e, &request.object_classes))
            .filter(|e| request.filter.as_ref().is_none_or(|f| f.matches(&e.attributes)))
            .map(|e| EntryData::new(e.dn.clone(), project(&e.attributes, request.attributes.as_deref())))
            .collect();
        for order in request.order_by.iter().rev() {
            matched.sort_by(|a, b| {
                let key = |e: &EntryData| e.attribute(&order.attribute).and_then(|a| a.first_value()).map(|v| v.to_string());
                let ordering = key(a).cmp(&key(b));
                if order.descending { ordering.reverse() } else { ordering }
            });
        }

        let mut result = PagedResult {
            start: request.start,
            ..PagedResult::default()
        };
        if request.return_type.wants_count() {
            result.total_entries_count = matched.len();
        }
        if request.return_type.wants_entries() {
            let window: Vec<EntryData> = matched
                .into_iter()
                .skip(request.start)
                .take(if request.count == 0 { usize::MAX } else { request.count })
                .collect();
            let page_size = if request.page_size == 0 { window.len().max(1) } else { request.page_size };
            for page in window.chunks(page_size) {
                match batch.as_mut() {
                    Some(handler) => {
                        let collect = handler.collect_search_result(page.len());
                        handler.perform_action(page)?;
                        if collect {
                            result.entries.extend_from_slice(page);
                        }
                    }
                    None => result.entries.extend_from_slice(page),
                }
            }
        }
        result.entries_count = result.entries.len();
        Ok(result)
    }

    fn authenticate(&self, dn: &str, _object_classes: &[String], password: &str) -> Result<bool, PersistenceError> {
        self.record("authenticate");
        let entries = self.lock();
        let stored = entries
            .get(&normalize(dn))
            .and_then(|e| e.attribute(USER_PASSWORD))
            .and_then(AttributeData::first_value)
            .map(|v| v.to_string());
        Ok(stored.is_some_and(|stored| compare_credentials(password, &stored)))
    }

    fn shutdown(&self) {
        debug!(entries = self.len(), "directory shut down");
    }
}
