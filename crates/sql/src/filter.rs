use jans_orm_core::{AttributeValue, Filter, PersistenceError};
use rusqlite::types::Value;

use crate::codec::JsonCodec;
use crate::schema::{TableMapping, quote};
use crate::value::to_sql_value;

/// A WHERE fragment with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedExpression {
    pub sql: String,
    pub params: Vec<Value>,
}

impl ConvertedExpression {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }
}

pub struct SqlFilterConverter<'a> {
    table: &'a TableMapping,
    codec: &'a dyn JsonCodec,
}

impl<'a> SqlFilterConverter<'a> {
    pub fn new(table: &'a TableMapping, codec: &'a dyn JsonCodec) -> Self {
        Self { table, codec }
    }

    pub fn convert(&self, filter: &Filter) -> Result<ConvertedExpression, PersistenceError> {
        match filter {
            Filter::And(filters) => self.join(filters, " AND ", "1 = 1"),
            Filter::Or(filters) => match self.equalities_on_one_column(filters)? {
                Some(expression) => Ok(expression),
                None => self.join(filters, " OR ", "1 = 0"),
            },
            Filter::Not(inner) => {
                let inner = self.convert(inner)?;
                Ok(ConvertedExpression::new(format!("NOT ({})", inner.sql), inner.params))
            }
            Filter::Equality { attribute, value } => self.comparison(attribute, "=", value),
            Filter::GreaterOrEqual { attribute, value } => self.comparison(attribute, ">=", value),
            Filter::LessOrEqual { attribute, value } => self.comparison(attribute, "<=", value),
            Filter::Presence { attribute } => {
                let (column, json) = self.column(attribute)?;
                let sql = if json {
                    format!(
                        "({column} IS NOT NULL AND json_array_length({column}, '{}') > 0)",
                        self.codec.array_path()
                    )
                } else {
                    format!("{column} IS NOT NULL")
                };
                Ok(ConvertedExpression::new(sql, Vec::new()))
            }
            Filter::Substring {
                attribute,
                initial,
                any,
                final_,
            } => {
                let (column, json) = self.column(attribute)?;
                let mut pattern = String::new();
                if let Some(initial) = initial {
                    pattern.push_str(&escape_like(initial));
                }
                pattern.push('%');
                for part in any {
                    pattern.push_str(&escape_like(part));
                    pattern.push('%');
                }
                if let Some(final_) = final_ {
                    pattern.push_str(&escape_like(final_));
                }
                let sql = if json {
                    self.json_exists(&column, "LIKE ? ESCAPE '\\'")
                } else {
                    format!("{column} LIKE ? ESCAPE '\\'")
                };
                Ok(ConvertedExpression::new(sql, vec![Value::Text(pattern)]))
            }
        }
    }

    fn join(&self, filters: &[Filter], separator: &str, empty: &str) -> Result<ConvertedExpression, PersistenceError> {
        if filters.is_empty() {
            return Ok(ConvertedExpression::new(empty.to_string(), Vec::new()));
        }
        let mut parts = Vec::with_capacity(filters.len());
        let mut params = Vec::new();
        for filter in filters {
            let converted = self.convert(filter)?;
            parts.push(format!("({})", converted.sql));
            params.extend(converted.params);
        }
        Ok(ConvertedExpression::new(parts.join(separator), params))
    }

    /// `a = x OR a = y` on one scalar column becomes `a IN (x, y)`.
    fn equalities_on_one_column(&self, filters: &[Filter]) -> Result<Option<ConvertedExpression>, PersistenceError> {
        if filters.len() < 2 {
            return Ok(None);
        }
        let mut shared: Option<&str> = None;
        let mut values = Vec::with_capacity(filters.len());
        for filter in filters {
            let Filter::Equality { attribute, value } = filter else {
                return Ok(None);
            };
            match shared {
                Some(name) if !name.eq_ignore_ascii_case(attribute) => return Ok(None),
                _ => shared = Some(attribute.as_str()),
            }
            values.push(value);
        }
        let Some(attribute) = shared else {
            return Ok(None);
        };
        let (column, json) = self.column(attribute)?;
        if json {
            return Ok(None);
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        Ok(Some(ConvertedExpression::new(
            format!("{column} IN ({placeholders})"),
            values.into_iter().map(to_sql_value).collect(),
        )))
    }

    fn comparison(&self, attribute: &str, operator: &str, value: &AttributeValue) -> Result<ConvertedExpression, PersistenceError> {
        let (column, json) = self.column(attribute)?;
        let sql = if json {
            self.json_exists(&column, &format!("{operator} ?"))
        } else {
            format!("{column} {operator} ?")
        };
        Ok(ConvertedExpression::new(sql, vec![to_sql_value(value)]))
    }

    fn json_exists(&self, column: &str, predicate: &str) -> String {
        format!(
            "EXISTS (SELECT 1 FROM json_each({column}, '{}') WHERE json_each.value {predicate})",
            self.codec.array_path()
        )
    }

    fn column(&self, attribute: &str) -> Result<(String, bool), PersistenceError> {
        let column = self.table.column(attribute).ok_or_else(|| {
            PersistenceError::Search(format!(
                "filter attribute '{attribute}' is not a column of '{}'",
                self.table.table
            ))
        })?;
        Ok((quote(&column.name), column.json))
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::codec::{JsonArrayCodec, WrappedValuesCodec};
    use crate::config::EngineFamily;
    use crate::schema::{SchemaMetadata, introspect};

    fn metadata() -> SchemaMetadata {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "ATTACH DATABASE ':memory:' AS jans;
             CREATE TABLE jans.jansPerson (doc_id TEXT PRIMARY KEY, uid TEXT, jansLoginCount INTEGER, jansRole JSON);",
        )
        .unwrap();
        introspect(&conn, "jans", EngineFamily::Sqlite).unwrap()
    }

    #[test]
    fn scalar_equality_binds_value() {
        let metadata = metadata();
        let table = metadata.table("jansPerson").unwrap();
        let converted = SqlFilterConverter::new(table, &WrappedValuesCodec)
            .convert(&Filter::equality("UID", "jdoe"))
            .unwrap();
        assert_eq!(converted.sql, "\"uid\" = ?");
        assert_eq!(converted.params, vec![Value::Text("jdoe".into())]);
    }

    #[test]
    fn json_column_uses_json_each_with_codec_path() {
        let metadata = metadata();
        let table = metadata.table("jansPerson").unwrap();
        let filter = Filter::equality("jansRole", "admin");
        let wrapped = SqlFilterConverter::new(table, &WrappedValuesCodec).convert(&filter).unwrap();
        assert!(wrapped.sql.contains("json_each(\"jansRole\", '$.values')"));
        let bare = SqlFilterConverter::new(table, &JsonArrayCodec).convert(&filter).unwrap();
        assert!(bare.sql.contains("json_each(\"jansRole\", '$')"));
    }

    #[test]
    fn or_of_equalities_becomes_in() {
        let metadata = metadata();
        let table = metadata.table("jansPerson").unwrap();
        let converted = SqlFilterConverter::new(table, &WrappedValuesCodec)
            .convert(&Filter::or(vec![Filter::equality("uid", "a"), Filter::equality("uid", "b")]))
            .unwrap();
        assert_eq!(converted.sql, "\"uid\" IN (?, ?)");
        assert_eq!(converted.params.len(), 2);
    }

    #[test]
    fn substring_escapes_wildcards() {
        let metadata = metadata();
        let table = metadata.table("jansPerson").unwrap();
        let converted = SqlFilterConverter::new(table, &WrappedValuesCodec)
            .convert(&Filter::substring("uid", Some("50%"), &["a_b"], None))
            .unwrap();
        assert_eq!(converted.params, vec![Value::Text("50\\%%a\\_b%".into())]);
    }

    #[test]
    fn unknown_attribute_is_a_search_error() {
        let metadata = metadata();
        let table = metadata.table("jansPerson").unwrap();
        let result = SqlFilterConverter::new(table, &WrappedValuesCodec).convert(&Filter::presence("mail"));
        assert!(matches!(result, Err(PersistenceError::Search(_))));
    }
}
