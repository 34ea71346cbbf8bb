#![allow(dead_code)]

use rusqlite::Connection;
use sqled::session::{ConnectionManager, RecentConnections};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const GAMES_SCHEMA: &str = "
    CREATE TABLE Games (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL);
    CREATE TABLE Reviews (
        id INTEGER PRIMARY KEY,
        game_id INTEGER,
        score INTEGER,
        FOREIGN KEY (game_id) REFERENCES Games(id)
    );
    CREATE TABLE Tags (name TEXT PRIMARY KEY, note TEXT NOT NULL DEFAULT 'none') WITHOUT ROWID;
    INSERT INTO Games (title) VALUES ('Portal'), ('Celeste'), ('Hades');
    INSERT INTO Reviews VALUES (1, 1, 9), (2, 2, 10), (3, NULL, 5);
";

/// A scratch directory holding `games.db`
pub struct Fixture {
    pub dir: TempDir,
    pub db: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_schema(GAMES_SCHEMA)
    }

    pub fn with_schema(sql: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("games.db");
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(sql).unwrap();
        conn.close().unwrap();
        Self { dir, db }
    }

    /// Manager whose previews live inside the fixture directory
    pub fn manager(&self) -> ConnectionManager {
        let previews = self.dir.path().join("previews");
        fs::create_dir_all(&previews).unwrap();
        ConnectionManager::new(RecentConnections::in_memory(10), Some(previews))
    }

    pub fn open(&self) -> ConnectionManager {
        let mut manager = self.manager();
        manager.open_database(&self.db).unwrap();
        manager
    }

    pub fn bytes(&self) -> Vec<u8> {
        fs::read(&self.db).unwrap()
    }
}

/// Every row of `table` ordered by its first column
pub fn rows(conn: &Connection, table: &str) -> Vec<Vec<rusqlite::types::Value>> {
    let sql = format!("SELECT * FROM \"{}\" ORDER BY 1", table);
    let mut stmt = conn.prepare(&sql).unwrap();
    let width = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            (0..width).map(|i| row.get(i)).collect::<rusqlite::Result<Vec<_>>>()
        })
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    rows
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |r| r.get(0))
        .unwrap()
}

pub fn file_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}
