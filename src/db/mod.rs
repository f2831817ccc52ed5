//! SQLite persistence.
//!
//! One explicitly constructed [`Database`] handle is shared by every
//! component. Repositories are plain functions over `&Connection`, raw SQL
//! with rusqlite, no ORM; async callers reach them through
//! [`Database::call`], which runs the closure on the blocking pool.

pub mod changes;
pub mod init;
pub mod integrations;
pub mod meetings;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use changes::MeetingChangeRepository;
pub use init::migrate;
pub use integrations::IntegrationRepository;
pub use meetings::{MeetingRepository, StaleMeeting};

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database connection")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;

        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking thread pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("Database connection lock poisoned"))?;
            f(&guard)
        })
        .await
        .context("Database task panicked")?
    }
}

pub(crate) fn to_millis(time: &DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, millis))
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Wrap a decode error so it can travel out of a rusqlite row mapper.
pub(crate) fn conversion_error(index: usize, err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err.into())
}
