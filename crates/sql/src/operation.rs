use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use jans_orm_core::attribute::find_attribute;
use jans_orm_core::dn::to_key;
use jans_orm_core::filter::Filter;
use jans_orm_core::password::{self, compare_credentials, create_storage_password};
use jans_orm_core::time::{self, SQL_TIME_FORMAT};
use jans_orm_core::{
    AttributeData, AttributeModification, AttributeValue, BackendCapabilities, BatchHandler, EntryData,
    OBJECT_CLASS, OperationService, PagedResult, PersistenceError, SearchRequest, SearchScope, TimeCodec,
    USER_PASSWORD,
};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info};

use crate::codec::{JsonCodec, codec_for};
use crate::config::SqlConfig;
use crate::error::classify;
use crate::filter::SqlFilterConverter;
use crate::pool::{ConnectionFactory, ConnectionPool, PoolStatus};
use crate::schema::{ColumnInfo, DN, DOC_ID, SchemaMetadata, TableMapping, introspect, quote};
use crate::value::{decode_scalar, decode_time_silent, to_binary_value, to_sql_value};

/// Legacy surrogate key some tables still carry next to `doc_id`.
const LEGACY_ID: &str = "id";

/// Relational realisation of the backend contract.
pub struct SqlOperationService {
    config: SqlConfig,
    pool: ConnectionPool,
    metadata: SchemaMetadata,
    codec: Box<dyn JsonCodec>,
}

impl SqlOperationService {
    pub fn new(config: SqlConfig) -> Result<Self, PersistenceError> {
        let pool = ConnectionPool::create(ConnectionFactory::new(&config), config.pool.clone())?;
        let metadata = {
            let conn = pool.get()?;
            introspect(&conn, &config.schema_name, config.engine_family)?
        };
        let codec = codec_for(config.engine_family);
        info!(
            schema = %config.schema_name,
            engine_family = %config.engine_family,
            tables = metadata.table_names().len(),
            "sql operation service ready"
        );
        Ok(Self {
            config,
            pool,
            metadata,
            codec,
        })
    }

    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, PersistenceError> {
        Self::new(SqlConfig::from_properties(properties)?)
    }

    pub fn config(&self) -> &SqlConfig {
        &self.config
    }

    pub fn metadata(&self) -> &SchemaMetadata {
        &self.metadata
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    fn with_connection<R>(
        &self,
        action: impl FnOnce(&Connection) -> Result<R, PersistenceError>,
    ) -> Result<R, PersistenceError> {
        let conn = self.pool.get()?;
        action(&conn)
    }

    fn table(&self, object_classes: &[String]) -> Result<&TableMapping, PersistenceError> {
        let object_class = object_classes
            .first()
            .ok_or_else(|| PersistenceError::Mapping("no object class given".to_string()))?;
        self.metadata.table(object_class)
    }

    /// Stored form of one attribute in `column`.
    fn bind(&self, column: &ColumnInfo, attribute: &AttributeData) -> Result<Value, PersistenceError> {
        let values = self.prepare_values(attribute);
        if values.is_empty() {
            return Ok(Value::Null);
        }
        if column.json || attribute.multi_valued || values.len() > 1 {
            return Ok(Value::Text(self.codec.encode(&values)));
        }
        if self.config.is_binary_attribute(&attribute.name) {
            return to_binary_value(&attribute.name, &values[0]);
        }
        Ok(to_sql_value(&values[0]))
    }

    fn prepare_values(&self, attribute: &AttributeData) -> Vec<AttributeValue> {
        match self.config.password_encryption_method {
            Some(method) if attribute.is_named(USER_PASSWORD) => attribute
                .values
                .iter()
                .map(|value| match value {
                    AttributeValue::Text(plain) if !password::is_hashed(plain) => {
                        AttributeValue::Text(create_storage_password(plain, method))
                    }
                    other => other.clone(),
                })
                .collect(),
            _ => attribute.values.clone(),
        }
    }

    fn decode_column(&self, table: &TableMapping, name: &str, value: Value) -> Result<Option<AttributeData>, PersistenceError> {
        let Some(column) = table.column(name) else {
            return Ok(None);
        };
        match value {
            Value::Text(stored) if column.json => {
                let values = self.codec.decode(&stored)?;
                Ok((!values.is_empty()).then(|| AttributeData::multi(column.name.clone(), values)))
            }
            Value::Text(stored) => match self.codec.decode_embedded(&stored) {
                Some(values) => Ok((!values.is_empty()).then(|| AttributeData::multi(column.name.clone(), values))),
                None => Ok(decode_scalar(column, Value::Text(stored)).map(|v| AttributeData::single(column.name.clone(), v))),
            },
            other => Ok(decode_scalar(column, other).map(|v| AttributeData::single(column.name.clone(), v))),
        }
    }

    fn query_entries(
        &self,
        conn: &Connection,
        table: &TableMapping,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<EntryData>, PersistenceError> {
        let started = Instant::now();
        let mut stmt = conn.prepare(sql).map_err(|e| classify("prepare select", e))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| classify("select", e))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().map_err(|e| classify("read row", e))? {
            let mut entry = EntryData::new(String::new(), Vec::new());
            for (i, name) in names.iter().enumerate() {
                let value: Value = row.get(i).map_err(|e| classify("read column", e))?;
                if name.eq_ignore_ascii_case(DN) {
                    if let Value::Text(stored) = value {
                        entry.dn = stored;
                    }
                    continue;
                }
                if name.eq_ignore_ascii_case(DOC_ID) || name.eq_ignore_ascii_case(LEGACY_ID) {
                    continue;
                }
                if let Some(attribute) = self.decode_column(table, name, value)? {
                    entry.attributes.push(attribute);
                }
            }
            entries.push(entry);
        }
        debug!(sql, rows = entries.len(), elapsed_ms = started.elapsed().as_millis() as u64, "executed query");
        Ok(entries)
    }

    fn execute(&self, conn: &Connection, context: &str, sql: &str, params: &[Value]) -> Result<usize, PersistenceError> {
        let started = Instant::now();
        let rows = conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(|e| classify(context, e))?;
        debug!(sql, rows, elapsed_ms = started.elapsed().as_millis() as u64, "executed statement");
        Ok(rows)
    }

    fn count(&self, table: &TableMapping, clause: &WhereClause) -> Result<usize, PersistenceError> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", table.qualified_name(), clause.sql);
        self.with_connection(|conn| {
            let started = Instant::now();
            let count: i64 = conn
                .query_row(&sql, params_from_iter(clause.params.iter()), |row| row.get(0))
                .map_err(|e| classify("count", e))?;
            debug!(sql = %sql, count, elapsed_ms = started.elapsed().as_millis() as u64, "executed count");
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    fn where_clause(
        &self,
        table: &TableMapping,
        base_dn: &str,
        scope: SearchScope,
        filter: Option<&Filter>,
    ) -> Result<WhereClause, PersistenceError> {
        let mut predicates = Vec::new();
        let mut params = Vec::new();
        if scope == SearchScope::Base {
            predicates.push(format!("{} = ?", quote(DN)));
            params.push(Value::Text(base_dn.to_string()));
        }
        if let Some(filter) = filter {
            let converted = SqlFilterConverter::new(table, self.codec.as_ref()).convert(filter)?;
            predicates.push(format!("({})", converted.sql));
            params.extend(converted.params);
        }
        let sql = if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        };
        Ok(WhereClause { sql, params })
    }

    fn order_clause(&self, table: &TableMapping, request: &SearchRequest) -> Result<String, PersistenceError> {
        if request.order_by.is_empty() {
            return Ok(if request.page_size > 0 || request.start > 0 {
                format!(" ORDER BY {}", quote(DOC_ID))
            } else {
                String::new()
            });
        }
        let mut terms = Vec::with_capacity(request.order_by.len());
        for order in &request.order_by {
            let column = table.column(&order.attribute).ok_or_else(|| {
                PersistenceError::Search(format!(
                    "sort attribute '{}' is not a column of '{}'",
                    order.attribute, table.table
                ))
            })?;
            terms.push(format!("{} {}", quote(&column.name), if order.descending { "DESC" } else { "ASC" }));
        }
        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }

    fn fetch_page(
        &self,
        table: &TableMapping,
        select: &str,
        clause: &WhereClause,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<EntryData>, PersistenceError> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let sql = format!("{select} LIMIT ? OFFSET ?");
        let mut params = clause.params.clone();
        params.push(Value::Integer(limit));
        params.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        self.with_connection(|conn| self.query_entries(conn, table, &sql, &params))
    }
}

struct WhereClause {
    sql: String,
    params: Vec<Value>,
}

fn projection(table: &TableMapping, attributes: Option<&[String]>) -> String {
    let Some(attributes) = attributes else {
        return "*".to_string();
    };
    let mut columns = vec![quote(DN), quote(DOC_ID)];
    for name in attributes {
        if name.is_empty() || name.eq_ignore_ascii_case(DN) || name.eq_ignore_ascii_case(DOC_ID) {
            continue;
        }
        if let Some(column) = table.column(name) {
            let quoted = quote(&column.name);
            if !columns.contains(&quoted) {
                columns.push(quoted);
            }
        }
    }
    columns.join(", ")
}

fn is_reserved(name: &str) -> bool {
    name.eq_ignore_ascii_case(DN) || name.eq_ignore_ascii_case(DOC_ID) || name.eq_ignore_ascii_case(OBJECT_CLASS)
}

/// Collects one page into the result list and hands it to the batch handler.
fn deliver(
    page: Vec<EntryData>,
    batch: &mut Option<&mut dyn BatchHandler<EntryData>>,
    entries: &mut Vec<EntryData>,
) -> Result<(), PersistenceError> {
    if page.is_empty() {
        return Ok(());
    }
    match batch {
        Some(handler) => {
            let collect = handler.collect_search_result(page.len());
            handler.perform_action(&page)?;
            if collect {
                entries.extend(page);
            }
        }
        None => entries.extend(page),
    }
    Ok(())
}

impl TimeCodec for SqlOperationService {
    fn encode_time(&self, value: &DateTime<Utc>) -> String {
        time::format_time(value, SQL_TIME_FORMAT)
    }

    fn decode_time(&self, value: &str) -> Option<DateTime<Utc>> {
        decode_time_silent(value)
    }
}

impl OperationService for SqlOperationService {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_upsert: true,
            stores_full_entry: true,
            single_object_class: true,
        }
    }

    fn add_entry(&self, dn: &str, attributes: &[AttributeData]) -> Result<(), PersistenceError> {
        let object_class = find_attribute(attributes, OBJECT_CLASS)
            .and_then(AttributeData::first_value)
            .map(|v| v.to_string())
            .ok_or_else(|| PersistenceError::Mapping(format!("entry '{dn}' has no object class")))?;
        let table = self.metadata.table(&object_class)?;
        let doc_id = to_key(dn)?;

        let mut columns = vec![quote(DOC_ID), quote(DN)];
        let mut params = vec![Value::Text(doc_id), Value::Text(dn.to_string())];
        if let Some(column) = table.column(OBJECT_CLASS) {
            columns.push(quote(&column.name));
            params.push(Value::Text(object_class.clone()));
        }
        for attribute in attributes {
            if is_reserved(&attribute.name) || attribute.is_empty_values() {
                continue;
            }
            let column = table.require_column(&attribute.name)?;
            let quoted = quote(&column.name);
            if columns.contains(&quoted) {
                return Err(PersistenceError::Mapping(format!(
                    "attribute '{}' appears twice in entry '{dn}'",
                    attribute.name
                )));
            }
            params.push(self.bind(column, attribute)?);
            columns.push(quoted);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.qualified_name(),
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        self.with_connection(|conn| self.execute(conn, &format!("insert '{dn}'"), &sql, &params))?;
        Ok(())
    }

    fn update_entry(
        &self,
        dn: &str,
        object_classes: &[String],
        modifications: &[AttributeModification],
    ) -> Result<(), PersistenceError> {
        if modifications.is_empty() {
            return Ok(());
        }
        let table = self.table(object_classes)?;
        let doc_id = to_key(dn)?;

        let mut assignments = Vec::with_capacity(modifications.len());
        let mut params = Vec::with_capacity(modifications.len() + 2);
        for modification in modifications {
            let attribute = modification.attribute();
            let column = table.require_column(&attribute.name)?;
            match modification {
                AttributeModification::Remove(_) => assignments.push(format!("{} = NULL", quote(&column.name))),
                AttributeModification::Add(_)
                | AttributeModification::Replace { .. }
                | AttributeModification::ForceUpdate(_) => {
                    let value = if attribute.is_named(OBJECT_CLASS) {
                        attribute
                            .first_value()
                            .map_or(Value::Null, |v| Value::Text(v.to_string()))
                    } else {
                        self.bind(column, attribute)?
                    };
                    assignments.push(format!("{} = ?", quote(&column.name)));
                    params.push(value);
                }
            }
        }
        params.push(Value::Text(doc_id));
        params.push(Value::Text(dn.to_string()));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ? AND {} = ?",
            table.qualified_name(),
            assignments.join(", "),
            quote(DOC_ID),
            quote(DN)
        );
        let rows = self.with_connection(|conn| self.execute(conn, &format!("update '{dn}'"), &sql, &params))?;
        match rows {
            1 => Ok(()),
            0 => Err(PersistenceError::NotFound(format!("entry '{dn}' was not updated: no such row"))),
            n => Err(PersistenceError::Backend {
                message: format!("update of '{dn}' touched {n} rows"),
                source: None,
            }),
        }
    }

    fn delete(&self, dn: &str, object_classes: &[String]) -> Result<(), PersistenceError> {
        let table = self.table(object_classes)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            table.qualified_name(),
            quote(DOC_ID),
            quote(DN)
        );
        let params = [Value::Text(to_key(dn)?), Value::Text(dn.to_string())];
        let rows = self.with_connection(|conn| self.execute(conn, &format!("delete '{dn}'"), &sql, &params))?;
        if rows == 0 {
            return Err(PersistenceError::NotFound(format!("entry '{dn}' does not exist")));
        }
        Ok(())
    }

    fn delete_by_filter(
        &self,
        base_dn: &str,
        object_classes: &[String],
        filter: Option<&Filter>,
        count: usize,
    ) -> Result<usize, PersistenceError> {
        let table = self.table(object_classes)?;
        let clause = self.where_clause(table, base_dn, SearchScope::Subtree, filter)?;
        let mut params = clause.params;
        let sql = if count > 0 {
            params.push(Value::Integer(i64::try_from(count).unwrap_or(i64::MAX)));
            format!(
                "DELETE FROM {table} WHERE {id} IN (SELECT {id} FROM {table}{predicate} LIMIT ?)",
                table = table.qualified_name(),
                id = quote(DOC_ID),
                predicate = clause.sql
            )
        } else {
            format!("DELETE FROM {}{}", table.qualified_name(), clause.sql)
        };
        let rows = self.with_connection(|conn| self.execute(conn, "delete by filter", &sql, &params))?;
        debug!(base_dn, table = %table.table, rows, "removed matching entries");
        Ok(rows)
    }

    fn lookup(
        &self,
        dn: &str,
        object_classes: &[String],
        attributes: Option<&[String]>,
    ) -> Result<Vec<AttributeData>, PersistenceError> {
        let table = self.table(object_classes)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? AND {} = ?",
            projection(table, attributes),
            table.qualified_name(),
            quote(DOC_ID),
            quote(DN)
        );
        let params = [Value::Text(to_key(dn)?), Value::Text(dn.to_string())];
        let entries = self.with_connection(|conn| self.query_entries(conn, table, &sql, &params))?;
        entries
            .into_iter()
            .next()
            .map(|entry| entry.attributes)
            .ok_or_else(|| PersistenceError::NotFound(format!("entry '{dn}' does not exist")))
    }

    fn search(
        &self,
        request: &SearchRequest,
        mut batch: Option<&mut dyn BatchHandler<EntryData>>,
    ) -> Result<PagedResult<EntryData>, PersistenceError> {
        let table = self.metadata.table(request.primary_object_class()?)?;
        let clause = self.where_clause(table, &request.base_dn, request.scope, request.filter.as_ref())?;
        let started = Instant::now();

        let mut result = PagedResult {
            start: request.start,
            ..PagedResult::default()
        };
        if request.return_type.wants_count() {
            result.total_entries_count = self.count(table, &clause)?;
        }

        if request.return_type.wants_entries() {
            let select = format!(
                "SELECT {} FROM {}{}{}",
                projection(table, request.attributes.as_deref()),
                table.qualified_name(),
                clause.sql,
                self.order_clause(table, request)?
            );
            let limit = (request.count > 0).then_some(request.count);

            if request.page_size == 0 {
                let page = self.fetch_page(table, &select, &clause, limit, request.start)?;
                deliver(page, &mut batch, &mut result.entries)?;
            } else {
                let mut fetched = 0usize;
                loop {
                    let current_limit = match limit {
                        Some(count) => request.page_size.min(count - fetched),
                        None => request.page_size,
                    };
                    let page = self.fetch_page(table, &select, &clause, Some(current_limit), request.start + fetched)?;
                    let last_count = page.len();
                    fetched += last_count;
                    debug!(page_len = last_count, fetched, "fetched search page");
                    deliver(page, &mut batch, &mut result.entries)?;
                    if limit.is_some_and(|count| fetched >= count) || last_count < current_limit {
                        break;
                    }
                }
            }
        }

        result.entries_count = result.entries.len();
        debug!(
            table = %table.table,
            entries = result.entries_count,
            total = result.total_entries_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );
        Ok(result)
    }

    fn authenticate(&self, dn: &str, object_classes: &[String], password: &str) -> Result<bool, PersistenceError> {
        let attributes = match self.lookup(dn, object_classes, Some(&[USER_PASSWORD.to_string()])) {
            Ok(attributes) => attributes,
            Err(PersistenceError::NotFound(_)) => {
                debug!(dn, "authentication against missing entry");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let stored = find_attribute(&attributes, USER_PASSWORD)
            .and_then(AttributeData::first_value)
            .map(|v| v.to_string());
        Ok(stored.is_some_and(|stored| compare_credentials(password, &stored)))
    }

    fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use jans_orm_core::{SearchReturnDataType, SortOrder};

    use super::*;
    use crate::config::{AUTH_USER_NAME, AUTH_USER_PASSWORD, CONNECTION_URI, PASSWORD_ENCRYPTION_METHOD, SCHEMA_NAME};

    const DDL: &str = "CREATE TABLE jansPerson (
        doc_id VARCHAR(64) NOT NULL PRIMARY KEY,
        dn VARCHAR(128),
        objectClass VARCHAR(48),
        uid VARCHAR(64),
        userPassword VARCHAR(256),
        jansActive SMALLINT,
        jansLoginCount INTEGER,
        jansRole JSON
    );";

    fn service(dir: &tempfile::TempDir, extra: &[(&str, &str)]) -> SqlOperationService {
        let path = dir.path().join("jans.db");
        Connection::open(&path).unwrap().execute_batch(DDL).unwrap();
        let mut properties = BTreeMap::from([
            (SCHEMA_NAME.to_string(), "jans".to_string()),
            (CONNECTION_URI.to_string(), format!("sqlite:{}", path.display())),
            (AUTH_USER_NAME.to_string(), "jans".to_string()),
            (AUTH_USER_PASSWORD.to_string(), String::new()),
        ]);
        for (key, value) in extra {
            properties.insert(key.to_string(), value.to_string());
        }
        SqlOperationService::from_properties(&properties).unwrap()
    }

    fn classes() -> Vec<String> {
        vec!["jansPerson".to_string()]
    }

    fn person(uid: &str) -> Vec<AttributeData> {
        vec![
            AttributeData::single(OBJECT_CLASS, "jansPerson"),
            AttributeData::single("uid", uid),
            AttributeData::single("jansActive", true),
            AttributeData::multi("jansRole", vec!["admin".into(), "user".into()]),
        ]
    }

    #[test]
    fn insert_then_lookup_decodes_typed_values() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[]);
        let dn = "inum=1,ou=people,o=jans";
        service.add_entry(dn, &person("jdoe")).unwrap();

        let attributes = service.lookup(dn, &classes(), None).unwrap();
        assert_eq!(find_attribute(&attributes, "uid").unwrap().values, vec!["jdoe".into()]);
        assert_eq!(
            find_attribute(&attributes, "jansActive").unwrap().values,
            vec![AttributeValue::Boolean(true)]
        );
        let roles = find_attribute(&attributes, "jansRole").unwrap();
        assert!(roles.multi_valued);
        assert_eq!(roles.values, vec!["admin".into(), "user".into()]);
        assert!(find_attribute(&attributes, DOC_ID).is_none());
        assert!(find_attribute(&attributes, "jansLoginCount").is_none());
    }

    #[test]
    fn dn_only_projection_returns_no_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[]);
        service.add_entry("inum=1,ou=people,o=jans", &person("jdoe")).unwrap();
        let attributes = service
            .lookup("inum=1,ou=people,o=jans", &classes(), Some(&[String::new()]))
            .unwrap();
        assert!(attributes.is_empty());
    }

    #[test]
    fn update_sets_and_clears_columns() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[]);
        let dn = "inum=1,ou=people,o=jans";
        service.add_entry(dn, &person("jdoe")).unwrap();
        service
            .update_entry(dn, &classes(), &[
                AttributeModification::Add(AttributeData::single("jansLoginCount", 3)),
                AttributeModification::Remove(AttributeData::multi("jansRole", vec!["admin".into()])),
            ])
            .unwrap();

        let attributes = service.lookup(dn, &classes(), None).unwrap();
        assert_eq!(
            find_attribute(&attributes, "jansLoginCount").unwrap().values,
            vec![AttributeValue::Integer(3)]
        );
        assert!(find_attribute(&attributes, "jansRole").is_none());
    }

    #[test]
    fn update_of_foreign_row_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[]);
        service.add_entry("inum=1,ou=people,o=jans", &person("jdoe")).unwrap();
        let result = service.update_entry("inum=1,ou=clients,o=jans", &classes(), &[AttributeModification::Add(
            AttributeData::single("uid", "x"),
        )]);
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
        assert!(matches!(
            service.add_entry("inum=1,ou=clients,o=jans", &person("x")),
            Err(PersistenceError::DuplicateKey(_))
        ));
    }

    #[test]
    fn multiple_values_in_scalar_column_are_json_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[]);
        let dn = "inum=1,ou=people,o=jans";
        let mut attributes = person("jdoe");
        attributes[1] = AttributeData::multi("uid", vec!["a".into(), "b".into()]);
        service.add_entry(dn, &attributes).unwrap();

        let raw = Connection::open(dir.path().join("jans.db")).unwrap();
        let stored: String = raw.query_row("SELECT uid FROM jansPerson", [], |r| r.get(0)).unwrap();
        assert_eq!(stored, r#"{"values":["a","b"]}"#);

        let uid = AttributeData::multi("uid", vec!["c".into(), "d".into()]);
        service
            .update_entry(dn, &classes(), &[AttributeModification::Replace {
                attribute: uid,
                previous: AttributeData::multi("uid", vec!["a".into(), "b".into()]),
            }])
            .unwrap();
        let stored: String = raw.query_row("SELECT uid FROM jansPerson", [], |r| r.get(0)).unwrap();
        assert_eq!(stored, r#"{"values":["c","d"]}"#);

        let attributes = service.lookup(dn, &classes(), None).unwrap();
        let uid = find_attribute(&attributes, "uid").unwrap();
        assert!(uid.multi_valued);
        assert_eq!(uid.values, vec!["c".into(), "d".into()]);
    }

    #[test]
    fn paged_search_honours_count_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[]);
        for i in 0..7 {
            service
                .add_entry(&format!("inum={i},ou=people,o=jans"), &person(&format!("user{i}")))
                .unwrap();
        }
        let request = SearchRequest::new("ou=people,o=jans", classes())
            .with_return_type(SearchReturnDataType::SearchCount)
            .order_by(SortOrder::descending("uid"))
            .with_range(1, 5)
            .with_page_size(2);
        let result = service.search(&request, None).unwrap();
        assert_eq!(result.total_entries_count, 7);
        let uids: Vec<String> = result
            .entries
            .iter()
            .map(|e| e.attribute("uid").unwrap().values[0].to_string())
            .collect();
        assert_eq!(uids, vec!["user5", "user4", "user3", "user2", "user1"]);
    }

    #[test]
    fn filter_delete_with_count_removes_at_most_count() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[]);
        for i in 0..4 {
            service
                .add_entry(&format!("inum={i},ou=people,o=jans"), &person("same"))
                .unwrap();
        }
        let filter = Filter::equality("uid", "same");
        assert_eq!(service.delete_by_filter("o=jans", &classes(), Some(&filter), 3).unwrap(), 3);
        assert_eq!(service.delete_by_filter("o=jans", &classes(), Some(&filter), 0).unwrap(), 1);
    }

    #[test]
    fn passwords_are_hashed_and_verified() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, &[(PASSWORD_ENCRYPTION_METHOD, "SSHA-256")]);
        let dn = "inum=1,ou=people,o=jans";
        let mut attributes = person("jdoe");
        attributes.push(AttributeData::single(USER_PASSWORD, "s3cret"));
        service.add_entry(dn, &attributes).unwrap();

        let stored = service.lookup(dn, &classes(), Some(&[USER_PASSWORD.to_string()])).unwrap();
        assert!(stored[0].values[0].to_string().starts_with("{SSHA256}"));
        assert!(service.authenticate(dn, &classes(), "s3cret").unwrap());
        assert!(!service.authenticate(dn, &classes(), "wrong").unwrap());
        assert!(!service.authenticate("inum=9,ou=people,o=jans", &classes(), "s3cret").unwrap());
    }
}
