use std::collections::HashMap;

use jans_orm_core::PersistenceError;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::EngineFamily;
use crate::error::classify;

pub const DOC_ID: &str = "doc_id";
pub const DN: &str = "dn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Lower-cased declared type without size arguments, e.g. `varchar`.
    pub type_name: String,
    pub json: bool,
    pub nullable: bool,
}

impl ColumnInfo {
    /// Small integer columns carry booleans.
    pub fn is_boolean_carrier(&self) -> bool {
        matches!(self.type_name.as_str(), "smallint" | "tinyint" | "boolean" | "bool" | "bit")
    }

    pub fn is_big_integer(&self) -> bool {
        self.type_name == "bigint"
    }
}

#[derive(Debug, Clone)]
pub struct TableMapping {
    pub schema: String,
    pub table: String,
    columns: Vec<ColumnInfo>,
    by_name: HashMap<String, usize>,
}

impl TableMapping {
    fn new(schema: &str, table: &str, columns: Vec<ColumnInfo>) -> Self {
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_ascii_lowercase(), i))
            .collect();
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
            by_name,
        }
    }

    pub fn column(&self, attribute: &str) -> Option<&ColumnInfo> {
        self.by_name
            .get(&attribute.to_ascii_lowercase())
            .map(|&i| &self.columns[i])
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote(&self.schema), quote(&self.table))
    }

    pub fn require_column(&self, attribute: &str) -> Result<&ColumnInfo, PersistenceError> {
        self.column(attribute).ok_or_else(|| {
            PersistenceError::Mapping(format!("table '{}' has no column for attribute '{attribute}'", self.table))
        })
    }
}

/// Table metadata discovered once per pool.
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    tables: HashMap<String, TableMapping>,
}

impl SchemaMetadata {
    pub fn table(&self, object_class: &str) -> Result<&TableMapping, PersistenceError> {
        self.tables
            .get(&object_class.to_ascii_lowercase())
            .ok_or_else(|| PersistenceError::Mapping(format!("no table for object class '{object_class}'")))
    }

    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.values().map(|t| t.table.as_str()).collect();
        names.sort_unstable();
        names
    }
}

pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub fn introspect(conn: &Connection, schema: &str, family: EngineFamily) -> Result<SchemaMetadata, PersistenceError> {
    let sql = format!(
        "SELECT name, COALESCE(sql, '') FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        quote(schema)
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| classify("list tables", e))?;
    let tables = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| classify("list tables", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| classify("list tables", e))?;

    let mut metadata = SchemaMetadata::default();
    for (table, ddl) in tables {
        let columns = table_columns(conn, schema, &table, &ddl, family)?;
        debug!(
            table = %table,
            columns = columns.len(),
            json_columns = columns.iter().filter(|c| c.json).count(),
            "introspected table"
        );
        metadata
            .tables
            .insert(table.to_ascii_lowercase(), TableMapping::new(schema, &table, columns));
    }
    info!(schema, tables = metadata.tables.len(), engine_family = %family, "loaded schema metadata");
    Ok(metadata)
}

fn table_columns(
    conn: &Connection,
    schema: &str,
    table: &str,
    ddl: &str,
    family: EngineFamily,
) -> Result<Vec<ColumnInfo>, PersistenceError> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?1, ?2) ORDER BY cid")
        .map_err(|e| classify("list columns", e))?;
    let rows = stmt
        .query_map([table, schema], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, bool>(2)?))
        })
        .map_err(|e| classify("list columns", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| classify("list columns", e))?;

    let ddl = ddl.to_ascii_lowercase();
    Ok(rows
        .into_iter()
        .map(|(name, declared, not_null)| {
            let type_name = base_type(&declared);
            let json = is_json_column(family, &type_name, &name, &ddl);
            ColumnInfo {
                name,
                type_name,
                json,
                nullable: !not_null,
            }
        })
        .collect())
}

fn base_type(declared: &str) -> String {
    declared
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// `json`/`jsonb` always; on MariaDB `JSON` is a `LONGTEXT` alias that
/// carries a `json_valid(<column>)` check.
fn is_json_column(family: EngineFamily, type_name: &str, column: &str, ddl: &str) -> bool {
    match type_name {
        "json" | "jsonb" => true,
        "longtext" if family == EngineFamily::MariaDb => has_json_check(ddl, &column.to_ascii_lowercase()),
        _ => false,
    }
}

fn has_json_check(ddl: &str, column: &str) -> bool {
    [
        format!("json_valid({column})"),
        format!("json_valid(\"{column}\")"),
        format!("json_valid(`{column}`)"),
    ]
    .iter()
    .any(|marker| ddl.contains(marker.as_str()))
}
