use crate::db::error::{Result, StageError};
use crate::db::Handle;
use crate::session::{reopen_required, Session};
use crate::staging::integrity;
use std::fs::{self, File};
use std::io;
use std::path::Path;

impl Session {
    /// Make the preview the new authoritative file.
    ///
    /// Refuses with `UnresolvedViolations` while the preview has dangling
    /// references. Otherwise the authoritative handle is closed, the preview
    /// bytes replace the file via a sibling temp file and rename, and the
    /// handle is reopened. A failure after the close leaves the session
    /// without an authoritative handle until the database is reopened.
    pub fn commit(&mut self, table: &str) -> Result<()> {
        let violations = integrity::foreign_key_violations(self.preview.connection(), None)?;
        if !violations.is_empty() {
            tracing::info!(table, count = violations.len(), "commit blocked by foreign key violations");
            return Err(StageError::UnresolvedViolations { violations });
        }

        self.preview.checkpoint()?;

        let authoritative = self.authoritative.take().ok_or_else(reopen_required)?;
        let target = authoritative.path().to_path_buf();
        authoritative.close()?;

        replace_file(self.preview.path(), &target).map_err(|e| {
            tracing::error!(path = %target.display(), error = %e, "commit copy failed");
            StageError::connection(format!(
                "Failed to write {}: {}; reopen the database before continuing",
                target.display(),
                e
            ))
        })?;

        self.authoritative = Some(Handle::open(&target, true)?);
        tracing::info!(table, path = %target.display(), "committed staged edits");
        Ok(())
    }
}

/// Copy `source` over `target` so readers see either the old or new bytes
fn replace_file(source: &Path, target: &Path) -> io::Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut staged = tempfile::Builder::new()
        .prefix(".sqled-commit-")
        .tempfile_in(dir)?;
    io::copy(&mut File::open(source)?, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    if let Ok(metadata) = fs::metadata(target) {
        fs::set_permissions(staged.path(), metadata.permissions())?;
    }

    staged.persist(target).map_err(|e| e.error)?;
    Ok(())
}
