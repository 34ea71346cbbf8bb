use crate::session::{RecentConnections, DEFAULT_RECENT_LIMIT};
use directories::ProjectDirs;
use std::path::PathBuf;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Runtime settings for a router
#[derive(Debug, Clone)]
pub struct Config {
    /// Rows per `view-data` page
    pub page_size: usize,
    /// Cap on rows returned by `execute-sql`
    pub max_rows: usize,
    /// `None` keeps the recent-connections list in memory only
    pub recent_file: Option<PathBuf>,
    pub recent_limit: usize,
    /// Where preview directories are created; the system temp dir if unset
    pub preview_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_rows: DEFAULT_MAX_ROWS,
            recent_file: default_recent_file(),
            recent_limit: DEFAULT_RECENT_LIMIT,
            preview_dir: None,
        }
    }
}

impl Config {
    /// Settings that never touch the user's config directory
    pub fn ephemeral() -> Self {
        Self {
            recent_file: None,
            ..Self::default()
        }
    }

    pub fn load_recent(&self) -> RecentConnections {
        RecentConnections::load(self.recent_file.clone(), self.recent_limit)
    }
}

/// `recent.json` in the platform config directory
pub fn default_recent_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "sqled").map(|dirs| dirs.config_dir().join("recent.json"))
}
