//! `SQLite`-backed persistence.
//!
//! One [`Store`] owns a single connection behind a mutex. Each public method
//! takes the lock for one statement or one transaction and releases it on
//! return. Cloning a [`Store`] shares the connection.
//!
//! Foreign keys are enforced (`PRAGMA foreign_keys = ON` in the embedded
//! schema), so every analysis, appointment and chat log references an
//! existing user.
//!
//! Operations are grouped by table:
//!
//! - [`users`]: registration, lookup, last-login bookkeeping
//! - [`analyses`]: stored results and doctor annotations
//! - [`appointments`]: booking and status changes
//! - [`chat_logs`]: append-only assistant transcript

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

pub mod analyses;
pub mod appointments;
pub mod chat_logs;
pub mod users;

pub use analyses::{Analysis, AnalysisDetails, AnalysisResults, Annotation};
pub use appointments::{Appointment, AppointmentStatus, NewAppointment};
pub use chat_logs::{ChatLog, NewChatLog};
pub use users::{NewUser, User, UserProfile};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors from the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored JSON could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another thread panicked while holding the connection.
    #[error("database connection lock poisoned")]
    LockPoisoned,

    /// A unique field is already taken.
    #[error("{field} already registered")]
    Duplicate {
        /// Which field collided.
        field: &'static str,
    },

    /// A referenced row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of row.
        entity: &'static str,
        /// Requested id.
        id: i64,
    },
}

impl StoreError {
    pub(crate) const fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// Handle to the application database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Opens or creates the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize_connection(&conn)?;
        tracing::info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database for tests and demos.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema fails.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Runs a trivial query; used by the health endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database does not answer.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
