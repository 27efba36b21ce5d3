use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use jans_orm_core::PersistenceError;
use r2d2::{HandleError, ManageConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::config::{PoolSettings, SqlConfig};
use crate::schema::quote;

const CONNECTION_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Connection-level pragmas; everything else is applied to the attached schema.
const CONNECTION_PRAGMAS: &[&str] = &["busy_timeout", "foreign_keys", "recursive_triggers", "case_sensitive_like"];

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Describes how every pooled connection is prepared: an in-memory main
/// database with the store attached under the schema name, then the driver
/// properties as pragmas.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    schema: String,
    database_path: String,
    driver_properties: Vec<(String, String)>,
}

impl ConnectionFactory {
    pub fn new(config: &SqlConfig) -> Self {
        Self {
            schema: config.schema_name.clone(),
            database_path: config.database_path().to_string(),
            driver_properties: config
                .driver_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn prepare(&self, conn: &Connection, validate: bool) -> Result<(), rusqlite::Error> {
        conn.execute("ATTACH DATABASE ?1 AS ?2", [&self.database_path, &self.schema])?;
        for (name, value) in &self.driver_properties {
            let target = if CONNECTION_PRAGMAS.contains(&name.as_str()) {
                String::new()
            } else {
                format!("{}.", quote(&self.schema))
            };
            conn.execute_batch(&format!("PRAGMA {target}{name} = {value};"))?;
        }
        if validate {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        }
        Ok(())
    }

    fn manager(&self, settings: &PoolSettings) -> SqliteConnectionManager {
        let factory = self.clone();
        let validate = settings.test_on_create;
        SqliteConnectionManager::memory()
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(move |conn| factory.prepare(conn, validate))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub active: usize,
    pub closed: bool,
}

#[derive(Debug)]
struct TracingErrorHandler;

impl HandleError<rusqlite::Error> for TracingErrorHandler {
    fn handle_error(&self, error: rusqlite::Error) {
        warn!(error = %error, "pooled connection failed");
    }
}

/// Blocking connection pool over `r2d2`. Checkouts wait up to the
/// configured maximum and validate the connection before handing it out.
pub struct ConnectionPool {
    inner: RwLock<Option<Pool<SqliteConnectionManager>>>,
}

impl ConnectionPool {
    /// Establishes the first connection, retrying until `create_max_wait`
    /// has elapsed, then builds the pool and pre-fills `min_idle`.
    pub fn create(factory: ConnectionFactory, settings: PoolSettings) -> Result<Self, PersistenceError> {
        let manager = factory.manager(&settings);
        Self::first_connection(&manager, &settings)?;

        let idle_timeout = Some(settings.min_evictable_idle).filter(|timeout| !timeout.is_zero());
        let pool = Pool::builder()
            .max_size(to_u32(settings.max_total))
            .min_idle(Some(to_u32(settings.min_idle)))
            .connection_timeout(settings.max_wait.max(Duration::from_millis(1)))
            .idle_timeout(idle_timeout)
            .test_on_check_out(true)
            .error_handler(Box::new(TracingErrorHandler))
            .build(manager)
            .map_err(|e| PersistenceError::connection("failed to create connection pool", e))?;
        info!(
            idle = pool.state().idle_connections,
            max_total = settings.max_total,
            "connection pool created"
        );
        Ok(Self {
            inner: RwLock::new(Some(pool)),
        })
    }

    fn first_connection(manager: &SqliteConnectionManager, settings: &PoolSettings) -> Result<(), PersistenceError> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = manager.connect().and_then(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            });
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let elapsed = started.elapsed();
                    if elapsed >= settings.create_max_wait {
                        return Err(PersistenceError::connection(
                            format!(
                                "failed to create connection pool after {attempt} attempts in {} ms",
                                elapsed.as_millis()
                            ),
                            e,
                        ));
                    }
                    warn!(attempt, error = %e, "unable to open database connection, retrying");
                    thread::sleep(CONNECTION_RETRY_INTERVAL.min(settings.create_max_wait - elapsed));
                }
            }
        }
    }

    fn pool(&self) -> Option<Pool<SqliteConnectionManager>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get(&self) -> Result<PooledConnection, PersistenceError> {
        let pool = self.pool().ok_or_else(|| PersistenceError::Connection {
            message: "connection pool is shut down".to_string(),
            source: None,
        })?;
        pool.get()
            .map_err(|e| PersistenceError::connection("failed to check out a pooled connection", e))
    }

    pub fn status(&self) -> PoolStatus {
        match self.pool() {
            Some(pool) => {
                let state = pool.state();
                PoolStatus {
                    idle: state.idle_connections as usize,
                    active: state.connections.saturating_sub(state.idle_connections) as usize,
                    closed: false,
                }
            }
            None => PoolStatus {
                idle: 0,
                active: 0,
                closed: true,
            },
        }
    }

    /// Releases the pool; idle connections close now, checked-out ones when
    /// their guards drop.
    pub fn shutdown(&self) {
        let released = self.inner.write().unwrap_or_else(PoisonError::into_inner).take();
        if released.is_some() {
            info!("connection pool shut down");
        }
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn factory(dir: &tempfile::TempDir) -> ConnectionFactory {
        ConnectionFactory {
            schema: "jans".to_string(),
            database_path: dir.path().join("jans.db").to_string_lossy().into_owned(),
            driver_properties: vec![("busy_timeout".to_string(), "1000".to_string())],
        }
    }

    fn settings(max_total: usize) -> PoolSettings {
        PoolSettings {
            max_total,
            max_wait: Duration::from_millis(200),
            ..PoolSettings::default()
        }
    }

    #[test]
    fn checkout_returns_connection_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::create(factory(&dir), settings(2)).unwrap();
        {
            let conn = pool.get().unwrap();
            let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).unwrap();
            assert_eq!(one, 1);
            assert_eq!(pool.status().active, 1);
        }
        let status = pool.status();
        assert_eq!((status.active, status.idle), (0, 1));
    }

    #[test]
    fn attached_schema_is_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::create(factory(&dir), settings(2)).unwrap();
        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        first.execute_batch("CREATE TABLE jans.t (v TEXT); INSERT INTO jans.t VALUES ('x');").unwrap();
        let v: String = second.query_row("SELECT v FROM jans.t", [], |r| r.get(0)).unwrap();
        assert_eq!(v, "x");
    }

    #[test]
    fn exhausted_pool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::create(factory(&dir), settings(1)).unwrap();
        let _held = pool.get().unwrap();
        let started = Instant::now();
        assert!(matches!(pool.get(), Err(PersistenceError::Connection { .. })));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn waiting_caller_gets_released_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(ConnectionPool::create(factory(&dir), PoolSettings {
            max_wait: Duration::from_secs(5),
            ..settings(1)
        })
        .unwrap());
        let served = Arc::new(AtomicUsize::new(0));
        let held = pool.get().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            let served = Arc::clone(&served);
            thread::spawn(move || {
                let conn = pool.get().unwrap();
                served.fetch_add(1, Ordering::SeqCst);
                drop(conn);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(served.load(Ordering::SeqCst), 0);
        drop(held);
        waiter.join().unwrap();
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn min_idle_is_filled_at_creation() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::create(factory(&dir), PoolSettings {
            min_idle: 2,
            ..settings(3)
        })
        .unwrap();
        assert_eq!(pool.status().idle, 2);
    }

    #[test]
    fn unreachable_database_fails_after_window() {
        let dir = tempfile::tempdir().unwrap();
        let unreachable = ConnectionFactory {
            database_path: dir.path().join("missing").join("jans.db").to_string_lossy().into_owned(),
            ..factory(&dir)
        };
        let started = Instant::now();
        let result = ConnectionPool::create(unreachable, PoolSettings {
            create_max_wait: Duration::from_millis(300),
            ..settings(1)
        });
        match result {
            Err(PersistenceError::Connection { source, .. }) => assert!(source.is_some()),
            _ => panic!("expected connection error"),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn shutdown_rejects_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::create(factory(&dir), settings(1)).unwrap();
        pool.shutdown();
        assert!(pool.status().closed);
        assert!(matches!(pool.get(), Err(PersistenceError::Connection { .. })));
    }
}
