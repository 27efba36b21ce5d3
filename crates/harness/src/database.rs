use std::collections::BTreeMap;
use std::path::PathBuf;

use jans_orm_core::PersistenceError;
use jans_orm_engine::EntryManager;
use jans_orm_sql::SqlOperationService;
use jans_orm_sql::config::{AUTH_USER_NAME, AUTH_USER_PASSWORD, CONNECTION_URI, ENGINE_FAMILY, SCHEMA_NAME};
use rusqlite::Connection;
use tempfile::TempDir;

pub const SCHEMA: &str = "jans";

/// Sample tables in MariaDB flavour: multivalued attributes live in
/// `LONGTEXT` columns guarded by `json_valid`, plus native `JSON` columns.
const DDL: &str = "
CREATE TABLE jansPerson (
    doc_id VARCHAR(64) NOT NULL PRIMARY KEY,
    dn VARCHAR(128),
    objectClass VARCHAR(48),
    inum VARCHAR(64),
    uid VARCHAR(64),
    displayName VARCHAR(128),
    mail LONGTEXT CHECK (json_valid(mail)),
    gender VARCHAR(16),
    jansActive SMALLINT,
    jansLoginCount INTEGER,
    jansCreationTimestamp DATETIME(3),
    jansLastLogonTime DATETIME(3),
    userPassword VARCHAR(256),
    jansAddress TEXT,
    memberOf LONGTEXT CHECK (json_valid(memberOf)),
    nickName VARCHAR(64)
);
CREATE TABLE jansClnt (
    doc_id VARCHAR(64) NOT NULL PRIMARY KEY,
    dn VARCHAR(128),
    objectClass VARCHAR(48),
    inum VARCHAR(64),
    displayName VARCHAR(128),
    jansRedirectURI JSON,
    jansScope JSON,
    jansDisabled SMALLINT,
    jansClntSecretExpAt DATETIME(3),
    jansAccessTknLife BIGINT
);
";

/// A throwaway database file with the sample tables and the property bag
/// that points a backend at it.
pub struct TestDatabase {
    dir: TempDir,
    properties: BTreeMap<String, String>,
}

impl TestDatabase {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_family("mariadb")
    }

    pub fn with_family(family: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("jans.db");
        Connection::open(&path)?.execute_batch(DDL)?;

        let properties = BTreeMap::from([
            (SCHEMA_NAME.to_string(), SCHEMA.to_string()),
            (CONNECTION_URI.to_string(), format!("sqlite:{}", path.display())),
            (AUTH_USER_NAME.to_string(), "jans".to_string()),
            (AUTH_USER_PASSWORD.to_string(), String::new()),
            (ENGINE_FAMILY.to_string(), family.to_string()),
            ("connection.driver-property.busy_timeout".to_string(), "5000".to_string()),
            ("connection.driver-property.synchronous".to_string(), "OFF".to_string()),
        ]);
        Ok(Self { dir, properties })
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("jans.db")
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn service(&self) -> Result<SqlOperationService, PersistenceError> {
        SqlOperationService::from_properties(&self.properties)
    }

    pub fn manager(&self) -> Result<EntryManager<SqlOperationService>, PersistenceError> {
        Ok(EntryManager::new(self.service()?))
    }

    /// Direct connection to the file, for asserting the stored form of rows.
    pub fn raw(&self) -> rusqlite::Result<Connection> {
        Connection::open(self.path())
    }

    /// Text stored in `column` of the row whose `doc_id` is `key`.
    pub fn stored_text(&self, table: &str, column: &str, key: &str) -> rusqlite::Result<Option<String>> {
        self.raw()?.query_row(
            &format!("SELECT \"{column}\" FROM \"{table}\" WHERE doc_id = ?1"),
            [key],
            |row| row.get(0),
        )
    }

    pub fn row_count(&self, table: &str) -> rusqlite::Result<i64> {
        self.raw()?
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
    }
}
