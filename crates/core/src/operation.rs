use crate::attribute::{AttributeData, AttributeModification, EntryData};
use crate::error::PersistenceError;
use crate::filter::Filter;
use crate::time::TimeCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    Base,
    OneLevel,
    #[default]
    Subtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchReturnDataType {
    #[default]
    Search,
    Count,
    SearchCount,
}

impl SearchReturnDataType {
    pub fn wants_entries(self) -> bool {
        matches!(self, Self::Search | Self::SearchCount)
    }

    pub fn wants_count(self) -> bool {
        matches!(self, Self::Count | Self::SearchCount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub attribute: String,
    pub descending: bool,
}

impl SortOrder {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            descending: false,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_dn: String,
    pub object_classes: Vec<String>,
    pub filter: Option<Filter>,
    pub scope: SearchScope,
    pub return_type: SearchReturnDataType,
    /// `None` returns every attribute; `Some([""])` returns only the DN.
    pub attributes: Option<Vec<String>>,
    pub order_by: Vec<SortOrder>,
    pub start: usize,
    /// Upper bound on returned entries, `0` for no bound.
    pub count: usize,
    /// Rows per round-trip, `0` for a single query.
    pub page_size: usize,
}

impl SearchRequest {
    pub fn new(base_dn: impl Into<String>, object_classes: Vec<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            object_classes,
            filter: None,
            scope: SearchScope::Subtree,
            return_type: SearchReturnDataType::Search,
            attributes: None,
            order_by: Vec::new(),
            start: 0,
            count: 0,
            page_size: 0,
        }
    }

    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_return_type(mut self, return_type: SearchReturnDataType) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn with_attributes(mut self, attributes: Option<Vec<String>>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn order_by(mut self, order: SortOrder) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_range(mut self, start: usize, count: usize) -> Self {
        self.start = start;
        self.count = count;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn primary_object_class(&self) -> Result<&str, PersistenceError> {
        self.object_classes
            .first()
            .map(String::as_str)
            .ok_or_else(|| PersistenceError::Search(format!("no object class given for search under '{}'", self.base_dn)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResult<T> {
    pub start: usize,
    pub entries: Vec<T>,
    pub entries_count: usize,
    pub total_entries_count: usize,
}

impl<T> Default for PagedResult<T> {
    fn default() -> Self {
        Self {
            start: 0,
            entries: Vec::new(),
            entries_count: 0,
            total_entries_count: 0,
        }
    }
}

impl<T> PagedResult<T> {
    pub fn map_entries<U>(self, entries: Vec<U>) -> PagedResult<U> {
        PagedResult {
            start: self.start,
            entries_count: entries.len(),
            entries,
            total_entries_count: self.total_entries_count,
        }
    }
}

/// Caller-supplied consumer of search pages.
pub trait BatchHandler<T> {
    /// Whether the page of `page_len` entries should also be kept in the
    /// returned result list.
    fn collect_search_result(&mut self, page_len: usize) -> bool {
        let _ = page_len;
        true
    }

    fn perform_action(&mut self, entries: &[T]) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    /// Duplicate inserts are retried as an update of the existing row.
    pub supports_upsert: bool,
    /// Every mapped attribute is a slot of one row; clearing an already empty
    /// slot is a no-op.
    pub stores_full_entry: bool,
    /// Only the first object class is stored.
    pub single_object_class: bool,
}

/// Storage operations every backend provides. All calls are synchronous and
/// none is retried internally.
pub trait OperationService: TimeCodec + Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    fn add_entry(&self, dn: &str, attributes: &[AttributeData]) -> Result<(), PersistenceError>;

    /// Applies all modifications atomically.
    fn update_entry(
        &self,
        dn: &str,
        object_classes: &[String],
        modifications: &[AttributeModification],
    ) -> Result<(), PersistenceError>;

    fn delete(&self, dn: &str, object_classes: &[String]) -> Result<(), PersistenceError>;

    /// Removes up to `count` matching entries (`0` for all) and returns how many went.
    fn delete_by_filter(
        &self,
        base_dn: &str,
        object_classes: &[String],
        filter: Option<&Filter>,
        count: usize,
    ) -> Result<usize, PersistenceError>;

    fn lookup(
        &self,
        dn: &str,
        object_classes: &[String],
        attributes: Option<&[String]>,
    ) -> Result<Vec<AttributeData>, PersistenceError>;

    fn search(
        &self,
        request: &SearchRequest,
        batch: Option<&mut dyn BatchHandler<EntryData>>,
    ) -> Result<PagedResult<EntryData>, PersistenceError>;

    fn authenticate(&self, dn: &str, object_classes: &[String], password: &str) -> Result<bool, PersistenceError>;

    fn shutdown(&self);
}
