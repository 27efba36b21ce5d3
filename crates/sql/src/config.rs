use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use jans_orm_core::PersistenceError;
use jans_orm_core::password::PasswordEncryptionMethod;

pub const SCHEMA_NAME: &str = "db.schema.name";
pub const CONNECTION_URI: &str = "connection.uri";
pub const AUTH_USER_NAME: &str = "auth.userName";
pub const AUTH_USER_PASSWORD: &str = "auth.userPassword";
pub const ENGINE_FAMILY: &str = "connection.engine-family";
pub const DRIVER_CLASS_NAME: &str = "jdbc.driver.class-name";
pub const DRIVER_PROPERTY_PREFIX: &str = "connection.driver-property.";
pub const BINARY_ATTRIBUTES: &str = "binaryAttributes";
pub const CERTIFICATE_ATTRIBUTES: &str = "certificateAttributes";
pub const PASSWORD_ENCRYPTION_METHOD: &str = "password.encryption.method";

const POOL_MAX_TOTAL: &str = "connection.pool.max-total";
const POOL_MIN_IDLE: &str = "connection.pool.min-idle";
const POOL_MAX_WAIT: &str = "connection.pool.max-wait-time-millis";
const POOL_MIN_EVICTABLE_IDLE: &str = "connection.pool.min-evictable-idle-time-millis";
const POOL_TEST_ON_CREATE: &str = "connection.pool.test-on-create";
const POOL_CREATE_MAX_WAIT: &str = "connection.pool.create-max-wait-time-millis";

/// Database family whose JSON storage conventions the backend follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineFamily {
    #[default]
    Sqlite,
    MySql,
    MariaDb,
    PostgreSql,
}

impl EngineFamily {
    fn parse(value: &str) -> Result<Self, PersistenceError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::MySql),
            "mariadb" => Ok(Self::MariaDb),
            "postgresql" | "postgres" | "pgsql" => Ok(Self::PostgreSql),
            other => Err(PersistenceError::Configuration(format!("unknown engine family '{other}'"))),
        }
    }

    fn from_driver_class(class_name: &str) -> Self {
        let class_name = class_name.to_ascii_lowercase();
        if class_name.starts_with("org.mariadb.") {
            Self::MariaDb
        } else if class_name.starts_with("com.mysql.") {
            Self::MySql
        } else if class_name.starts_with("org.postgresql.") {
            Self::PostgreSql
        } else {
            Self::Sqlite
        }
    }
}

impl fmt::Display for EngineFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
            Self::PostgreSql => "postgresql",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_total: usize,
    pub min_idle: usize,
    pub max_wait: Duration,
    pub min_evictable_idle: Duration,
    pub test_on_create: bool,
    pub create_max_wait: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_total: 20,
            min_idle: 0,
            max_wait: Duration::from_millis(30_000),
            min_evictable_idle: Duration::from_millis(1_800_000),
            test_on_create: false,
            create_max_wait: Duration::from_millis(30_000),
        }
    }
}

#[derive(Clone)]
pub struct SqlConfig {
    pub schema_name: String,
    pub connection_uri: String,
    pub user_name: String,
    pub user_password: String,
    pub engine_family: EngineFamily,
    pub driver_class_name: Option<String>,
    pub driver_properties: BTreeMap<String, String>,
    pub pool: PoolSettings,
    pub binary_attributes: Vec<String>,
    pub certificate_attributes: Vec<String>,
    pub password_encryption_method: Option<PasswordEncryptionMethod>,
}

impl fmt::Debug for SqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlConfig")
            .field("schema_name", &self.schema_name)
            .field("connection_uri", &self.connection_uri)
            .field("user_name", &self.user_name)
            .field("engine_family", &self.engine_family)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl SqlConfig {
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, PersistenceError> {
        let schema_name = required(properties, SCHEMA_NAME)?;
        if !is_identifier(&schema_name) {
            return Err(PersistenceError::Configuration(format!("invalid schema name '{schema_name}'")));
        }
        let connection_uri = required(properties, CONNECTION_URI)?;
        let user_name = required(properties, AUTH_USER_NAME)?;
        let user_password = properties
            .get(AUTH_USER_PASSWORD)
            .cloned()
            .ok_or_else(|| missing(AUTH_USER_PASSWORD))?;

        let driver_class_name = optional(properties, DRIVER_CLASS_NAME);
        let engine_family = match optional(properties, ENGINE_FAMILY) {
            Some(family) => EngineFamily::parse(&family)?,
            None => driver_class_name
                .as_deref()
                .map(EngineFamily::from_driver_class)
                .unwrap_or_default(),
        };

        let mut driver_properties = BTreeMap::new();
        for (key, value) in properties {
            if let Some(name) = key.strip_prefix(DRIVER_PROPERTY_PREFIX) {
                if !is_identifier(name) || !is_pragma_value(value) {
                    return Err(PersistenceError::Configuration(format!(
                        "invalid driver property {name}={value}"
                    )));
                }
                driver_properties.insert(name.to_string(), value.trim().to_string());
            }
        }

        let defaults = PoolSettings::default();
        let pool = PoolSettings {
            max_total: number(properties, POOL_MAX_TOTAL, defaults.max_total)?,
            min_idle: number(properties, POOL_MIN_IDLE, defaults.min_idle)?,
            max_wait: millis(properties, POOL_MAX_WAIT, defaults.max_wait)?,
            min_evictable_idle: millis(properties, POOL_MIN_EVICTABLE_IDLE, defaults.min_evictable_idle)?,
            test_on_create: flag(properties, POOL_TEST_ON_CREATE, defaults.test_on_create)?,
            create_max_wait: millis(properties, POOL_CREATE_MAX_WAIT, defaults.create_max_wait)?,
        };
        if pool.max_total == 0 {
            return Err(PersistenceError::Configuration(format!("{POOL_MAX_TOTAL} must be positive")));
        }
        if pool.min_idle > pool.max_total {
            return Err(PersistenceError::Configuration(format!(
                "{POOL_MIN_IDLE} ({}) exceeds {POOL_MAX_TOTAL} ({})",
                pool.min_idle, pool.max_total
            )));
        }

        let password_encryption_method = optional(properties, PASSWORD_ENCRYPTION_METHOD)
            .map(|method| method.parse())
            .transpose()?;

        Ok(Self {
            schema_name,
            connection_uri,
            user_name,
            user_password,
            engine_family,
            driver_class_name,
            driver_properties,
            pool,
            binary_attributes: list(properties, BINARY_ATTRIBUTES),
            certificate_attributes: list(properties, CERTIFICATE_ATTRIBUTES),
            password_encryption_method,
        })
    }

    /// Path of the database file behind `connection.uri`.
    pub fn database_path(&self) -> &str {
        let uri = self.connection_uri.as_str();
        uri.strip_prefix("sqlite://")
            .or_else(|| uri.strip_prefix("sqlite:"))
            .unwrap_or(uri)
    }

    /// Binary and certificate attributes are both kept as raw bytes.
    pub fn is_binary_attribute(&self, name: &str) -> bool {
        self.binary_attributes
            .iter()
            .chain(&self.certificate_attributes)
            .any(|a| a.eq_ignore_ascii_case(name))
    }
}

fn missing(key: &str) -> PersistenceError {
    PersistenceError::Configuration(format!("property '{key}' is mandatory"))
}

fn optional(properties: &BTreeMap<String, String>, key: &str) -> Option<String> {
    properties
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(properties: &BTreeMap<String, String>, key: &str) -> Result<String, PersistenceError> {
    optional(properties, key).ok_or_else(|| missing(key))
}

fn number(properties: &BTreeMap<String, String>, key: &str, default: usize) -> Result<usize, PersistenceError> {
    match optional(properties, key) {
        Some(value) => value
            .parse()
            .map_err(|_| PersistenceError::Configuration(format!("property '{key}' is not a number: '{value}'"))),
        None => Ok(default),
    }
}

fn millis(properties: &BTreeMap<String, String>, key: &str, default: Duration) -> Result<Duration, PersistenceError> {
    match optional(properties, key) {
        Some(value) => value
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| PersistenceError::Configuration(format!("property '{key}' is not a number: '{value}'"))),
        None => Ok(default),
    }
}

fn flag(properties: &BTreeMap<String, String>, key: &str, default: bool) -> Result<bool, PersistenceError> {
    match optional(properties, key) {
        Some(value) => value
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| PersistenceError::Configuration(format!("property '{key}' is not a boolean: '{value}'"))),
        None => Ok(default),
    }
}

fn list(properties: &BTreeMap<String, String>, key: &str) -> Vec<String> {
    optional(properties, key)
        .map(|value| {
            value
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !value.starts_with(|c: char| c.is_ascii_digit())
}

fn is_pragma_value(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
