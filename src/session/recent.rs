use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecentFile {
    #[serde(rename = "recent-db", default)]
    recent: Vec<String>,
}

/// Most-recent-first list of opened database paths
#[derive(Debug)]
pub struct RecentConnections {
    file: Option<PathBuf>,
    entries: Vec<String>,
    limit: usize,
}

impl RecentConnections {
    /// Load from `file`, starting empty if it is missing or unreadable
    pub fn load(file: Option<PathBuf>, limit: usize) -> Self {
        let entries = match &file {
            Some(path) => match read_entries(path) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable recent connections file");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut recent = Self {
            file,
            entries,
            limit: limit.max(1),
        };
        recent.entries.truncate(recent.limit);
        recent
    }

    /// Keep the list in memory only
    pub fn in_memory(limit: usize) -> Self {
        Self::load(None, limit)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn record(&mut self, path: &str) {
        self.entries.retain(|p| p != path);
        self.entries.insert(0, path.to_string());
        self.entries.truncate(self.limit);
        self.persist();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.file else {
            return;
        };
        if let Err(e) = write_entries(path, &self.entries) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save recent connections");
        }
    }
}

fn read_entries(path: &Path) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let file: RecentFile = serde_json::from_slice(&bytes)?;
    Ok(file.recent)
}

fn write_entries(path: &Path, entries: &[String]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = RecentFile {
        recent: entries.to_vec(),
    };
    fs::write(path, serde_json::to_vec_pretty(&file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn most_recent_first_without_duplicates() {
        let mut recent = RecentConnections::in_memory(3);
        recent.record("a.db");
        recent.record("b.db");
        recent.record("a.db");
        assert_eq!(recent.entries(), ["a.db", "b.db"]);

        recent.record("c.db");
        recent.record("d.db");
        assert_eq!(recent.entries(), ["d.db", "c.db", "a.db"]);
    }

    #[test]
    fn survives_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("recent.json");

        let mut recent = RecentConnections::load(Some(file.clone()), 10);
        recent.record("/tmp/games.db");
        recent.record("/tmp/music.db");

        let reloaded = RecentConnections::load(Some(file.clone()), 10);
        assert_eq!(reloaded.entries(), ["/tmp/music.db", "/tmp/games.db"]);

        let mut reloaded = reloaded;
        reloaded.clear();
        assert!(RecentConnections::load(Some(file), 10).entries().is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("recent.json");
        fs::write(&file, b"{not json").unwrap();
        assert!(RecentConnections::load(Some(file), 10).entries().is_empty());
    }
}
