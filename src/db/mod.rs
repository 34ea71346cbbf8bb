pub mod ddl;
pub mod error;
pub mod query;
pub mod schema;

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use ddl::quote_ident;
pub use error::{ConstraintKind, Result, SqlContext, StageError};

/// One open connection to a SQLite file
pub struct Handle {
    pub(crate) conn: Connection,
    path: PathBuf,
    foreign_keys: bool,
}

impl Handle {
    /// Open an existing database file.
    ///
    /// `foreign_keys` controls `PRAGMA foreign_keys`: the authoritative handle
    /// enforces them, the preview handle only reports them.
    pub fn open<P: AsRef<Path>>(path: P, foreign_keys: bool) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        if !path.exists() {
            return Err(StageError::connection(format!(
                "Database file not found: {}",
                path_str
            )));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|e| {
                StageError::connection(format!("Failed to open database {}: {}", path_str, e))
            })?;

        Self::configure(conn, path.to_path_buf(), foreign_keys)
    }

    /// Create a new, empty database file
    pub fn create<P: AsRef<Path>>(path: P, foreign_keys: bool) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| {
            StageError::connection(format!(
                "Failed to create database {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::configure(conn, path.to_path_buf(), foreign_keys)
    }

    fn configure(conn: Connection, path: PathBuf, foreign_keys: bool) -> Result<Self> {
        let path_str = path.display().to_string();

        // SQLite opens lazily; reading the schema validates the file header
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not a database") || msg.contains("file is encrypted") {
                StageError::connection(format!("Invalid SQLite file: {}", path_str))
            } else {
                StageError::connection(format!("Failed to read database {}: {}", path_str, e))
            }
        })?;

        conn.pragma_update(None, "foreign_keys", foreign_keys)
            .map_err(|e| {
                StageError::connection(format!("Failed to configure foreign keys: {}", e))
            })?;

        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StageError::connection(format!("Failed to set busy timeout: {}", e)))?;

        Ok(Self {
            conn,
            path,
            foreign_keys,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn foreign_keys_enforced(&self) -> bool {
        self.foreign_keys
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Toggle enforcement; only takes effect outside a transaction
    pub(crate) fn set_foreign_keys(&mut self, enabled: bool) -> Result<()> {
        self.conn
            .pragma_update(None, "foreign_keys", enabled)
            .sql_context("PRAGMA foreign_keys")?;
        self.foreign_keys = enabled;
        Ok(())
    }

    /// Fold any WAL content back into the main file so a byte copy is complete
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .sql_context("PRAGMA wal_checkpoint(TRUNCATE)")
    }

    /// Close the connection, surfacing any error SQLite reports
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| {
            StageError::connection(format!(
                "Failed to close database {}: {}",
                path.display(),
                e
            ))
        })
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("path", &self.path)
            .field("foreign_keys", &self.foreign_keys)
            .finish()
    }
}
