mod recent;

use crate::db::{schema, Handle, Result, StageError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub use recent::{RecentConnections, DEFAULT_RECENT_LIMIT};

/// The authoritative database and its disposable preview copy
#[derive(Debug)]
pub struct Session {
    /// `None` only after a failed commit; the file must be reopened
    pub(crate) authoritative: Option<Handle>,
    pub(crate) preview: Handle,
    // Declared after `preview` so the directory outlives the connection
    preview_dir: TempDir,
    path: PathBuf,
    editing_table: Option<String>,
}

impl Session {
    /// Open `path` and derive a fresh preview copy in a temporary directory
    pub fn open(path: &Path, preview_root: Option<&Path>) -> Result<Self> {
        let authoritative = Handle::open(path, true)?;
        authoritative.checkpoint()?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("sqled-preview-");
        let preview_dir = match preview_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            StageError::connection(format!("Failed to create preview directory: {}", e))
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "preview.db".into());
        let preview_path = preview_dir.path().join(file_name);
        fs::copy(path, &preview_path).map_err(|e| {
            StageError::connection(format!(
                "Failed to copy {} to preview: {}",
                path.display(),
                e
            ))
        })?;

        let preview = Handle::open(&preview_path, false)?;
        tracing::info!(
            path = %path.display(),
            preview = %preview_path.display(),
            "opened database"
        );

        Ok(Self {
            authoritative: Some(authoritative),
            preview,
            preview_dir,
            path: path.to_path_buf(),
            editing_table: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preview(&self) -> &Handle {
        &self.preview
    }

    pub fn authoritative(&self) -> Result<&Handle> {
        self.authoritative.as_ref().ok_or_else(reopen_required)
    }

    pub fn editing_table(&self) -> Option<&str> {
        self.editing_table.as_deref()
    }

    /// Remember which table the schema editor is working on
    pub fn open_editor(&mut self, table: &str) -> Result<()> {
        let name = schema::canonical_table_name(self.preview.connection(), table)?;
        self.editing_table = Some(name);
        Ok(())
    }

    /// `table` if given, else the table open in the editor
    pub fn resolve_table(&self, table: Option<&str>) -> Result<String> {
        match table.filter(|t| !t.is_empty()).or(self.editing_table()) {
            Some(table) => Ok(table.to_string()),
            None => Err(StageError::MissingArgument("table")),
        }
    }

    pub(crate) fn forget_editing_table(&mut self, table: &str) {
        if self
            .editing_table
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(table))
        {
            self.editing_table = None;
        }
    }

    pub(crate) fn rename_editing_table(&mut self, from: &str, to: &str) {
        if self
            .editing_table
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(from))
        {
            self.editing_table = Some(to.to_string());
        }
    }

    /// Close both handles and delete the preview copy
    pub fn close(self) -> Result<()> {
        let Session {
            authoritative,
            preview,
            preview_dir,
            path,
            ..
        } = self;

        let preview_result = preview.close();
        let authoritative_result = authoritative.map_or(Ok(()), Handle::close);
        if let Err(e) = preview_dir.close() {
            tracing::warn!(error = %e, "failed to remove preview directory");
        }
        tracing::info!(path = %path.display(), "closed database");
        preview_result.and(authoritative_result)
    }
}

pub(crate) fn reopen_required() -> StageError {
    StageError::connection("The database connection was lost; reopen the database")
}

/// Owns the current session and the recent-connections list
pub struct ConnectionManager {
    session: Option<Session>,
    recent: RecentConnections,
    preview_root: Option<PathBuf>,
}

impl ConnectionManager {
    pub fn new(recent: RecentConnections, preview_root: Option<PathBuf>) -> Self {
        Self {
            session: None,
            recent,
            preview_root,
        }
    }

    /// Close whatever is open, then open `path` with a fresh preview
    pub fn open_database(&mut self, path: &Path) -> Result<&Session> {
        if let Err(e) = self.close_database() {
            tracing::warn!(error = %e, "previous database did not close cleanly");
        }
        let session = Session::open(path, self.preview_root.as_deref())?;
        self.recent.record(&path.display().to_string());
        Ok(self.session.insert(session))
    }

    /// Replace any file at `path` with an empty database and open it
    pub fn create_database(&mut self, path: &Path) -> Result<&Session> {
        if let Err(e) = self.close_database() {
            tracing::warn!(error = %e, "previous database did not close cleanly");
        }
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StageError::connection(format!(
                    "Failed to replace {}: {}",
                    path.display(),
                    e
                )))
            }
        }
        Handle::create(path, true)?.close()?;
        self.open_database(path)
    }

    pub fn close_database(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(no_database)
    }

    pub fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or_else(no_database)
    }

    pub fn recent_connections(&self) -> &[String] {
        self.recent.entries()
    }

    pub fn clear_connections(&mut self) {
        self.recent.clear();
    }
}

fn no_database() -> StageError {
    StageError::connection("There's no database currently open")
}
