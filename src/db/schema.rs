use crate::db::ddl;
use crate::db::error::{Result, SqlContext, StageError};
use crate::db::quote_ident;
use crate::types::{
    ColumnConstraints, ColumnDescriptor, ColumnType, ForeignKeyRef, NewRowMeta, TableDescriptor,
    TableInfo, TableMeta,
};
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeMap, HashSet};

const LIST_TABLES: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name";

/// User tables in lexicographic order, internal `sqlite_` tables excluded
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(LIST_TABLES).sql_context(LIST_TABLES)?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .sql_context(LIST_TABLES)?
        .collect::<rusqlite::Result<Vec<String>>>()
        .sql_context(LIST_TABLES)?;
    Ok(names)
}

/// Tables with their column names and row counts
pub fn list_tables_with_columns(conn: &Connection) -> Result<Vec<TableInfo>> {
    list_tables(conn)?
        .into_iter()
        .map(|name| {
            let columns = table_columns(conn, &name)?
                .into_iter()
                .map(|c| c.name)
                .collect();
            let row_count = get_table_row_count(conn, &name).ok();
            Ok(TableInfo {
                name,
                columns,
                row_count,
            })
        })
        .collect()
}

fn get_table_row_count(conn: &Connection, table_name: &str) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table_name));
    let count: i64 = conn
        .query_row(&query, [], |row| row.get(0))
        .sql_context(&query)?;
    Ok(count as u64)
}

const TABLE_ENTRY: &str =
    "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE";

/// Catalog spelling and creation statement of a table, matched the way
/// SQLite matches identifiers (ASCII case-insensitively)
fn table_entry(conn: &Connection, table_name: &str) -> Result<(String, Option<String>)> {
    conn.query_row(TABLE_ENTRY, [table_name], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
        .sql_context(TABLE_ENTRY)?
        .ok_or_else(|| StageError::table_not_found(table_name))
}

/// Stored creation statement, or `NotFound` if the table does not exist
pub fn table_sql(conn: &Connection, table_name: &str) -> Result<Option<String>> {
    table_entry(conn, table_name).map(|(_, sql)| sql)
}

/// The table's name as the catalog spells it
pub fn canonical_table_name(conn: &Connection, table_name: &str) -> Result<String> {
    table_entry(conn, table_name).map(|(name, _)| name)
}

pub fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    match table_sql(conn, table_name) {
        Ok(_) => Ok(true),
        Err(StageError::NotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

struct RawColumn {
    name: String,
    declared_type: String,
    not_null: bool,
    default_value: Option<String>,
    pk_position: i64,
}

fn table_columns(conn: &Connection, table_name: &str) -> Result<Vec<RawColumn>> {
    let query = format!("PRAGMA table_info({})", quote_ident(table_name));
    let mut stmt = conn.prepare(&query).sql_context(&query)?;
    let columns = stmt
        .query_map([], |row| {
            Ok(RawColumn {
                name: row.get(1)?,
                declared_type: row.get(2)?,
                not_null: row.get(3)?,
                default_value: row.get(4)?,
                pk_position: row.get(5)?,
            })
        })
        .sql_context(&query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql_context(&query)?;
    Ok(columns)
}

/// Columns covered by a single-column UNIQUE index (including implicit ones)
fn unique_columns(conn: &Connection, table_name: &str) -> Result<HashSet<String>> {
    let query = format!("PRAGMA index_list({})", quote_ident(table_name));
    let mut stmt = conn.prepare(&query).sql_context(&query)?;
    let indexes = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: bool = row.get(2)?;
            let partial: bool = row.get(4)?;
            Ok((unique && !partial).then_some(name))
        })
        .sql_context(&query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql_context(&query)?;

    let mut unique = HashSet::new();
    for index_name in indexes.into_iter().flatten() {
        let info_query = format!("PRAGMA index_info({})", quote_ident(&index_name));
        let mut info = conn.prepare(&info_query).sql_context(&info_query)?;
        let columns = info
            .query_map([], |row| row.get::<_, Option<String>>(2))
            .sql_context(&info_query)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .sql_context(&info_query)?;
        if let [Some(column)] = columns.as_slice() {
            unique.insert(column.clone());
        }
    }
    Ok(unique)
}

/// One row of `PRAGMA foreign_key_list`
#[derive(Debug, Clone)]
pub(crate) struct ForeignKeyRow {
    pub id: i64,
    pub from: String,
    pub table: String,
    pub to: Option<String>,
}

pub(crate) fn foreign_key_rows(conn: &Connection, table_name: &str) -> Result<Vec<ForeignKeyRow>> {
    let query = format!("PRAGMA foreign_key_list({})", quote_ident(table_name));
    let mut stmt = conn.prepare(&query).sql_context(&query)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ForeignKeyRow {
                id: row.get(0)?,
                table: row.get(2)?,
                from: row.get(3)?,
                to: row.get(4)?,
            })
        })
        .sql_context(&query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql_context(&query)?;
    Ok(rows)
}

fn single_primary_key(columns: &[RawColumn]) -> Option<&RawColumn> {
    let mut keys = columns.iter().filter(|c| c.pk_position > 0);
    match (keys.next(), keys.next()) {
        (Some(key), None) => Some(key),
        _ => None,
    }
}

/// Resolve the parent column of a reference that names only the parent table
fn parent_column(conn: &Connection, fk: &ForeignKeyRow) -> String {
    if let Some(to) = &fk.to {
        return to.clone();
    }
    let parent = table_columns(conn, &fk.table).unwrap_or_default();
    single_primary_key(&parent)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "rowid".to_string())
}

/// Full structural description of a table
pub fn describe_table(conn: &Connection, table_name: &str) -> Result<TableDescriptor> {
    let (name, sql) = table_entry(conn, table_name)?;
    let raw = table_columns(conn, &name)?;
    let unique = unique_columns(conn, &name)?;
    let foreign_keys = list_foreign_keys(conn, &name)?;

    let (auto_increment, without_rowid) = match &sql {
        Some(sql) => (
            ddl::has_autoincrement(sql).map_err(|e| StageError::Sql(e.to_string()))?,
            ddl::is_without_rowid(sql).map_err(|e| StageError::Sql(e.to_string()))?,
        ),
        None => (false, false),
    };

    let primary_key = single_primary_key(&raw).map(|c| c.name.clone());

    let columns = raw
        .into_iter()
        .map(|c| {
            let is_pk = primary_key.as_deref() == Some(c.name.as_str());
            ColumnDescriptor {
                column_type: ColumnType::from_declared(&c.declared_type),
                unique: unique.contains(&c.name) || is_pk,
                primary_key: c.pk_position > 0,
                auto_increment: is_pk && auto_increment,
                foreign_key: foreign_keys.get(&c.name).cloned(),
                name: c.name,
                declared_type: c.declared_type,
                not_null: c.not_null,
                default_value: c.default_value,
            }
        })
        .collect();

    Ok(TableDescriptor {
        name,
        columns,
        primary_key,
        auto_increment,
        without_rowid,
        sql,
    })
}

/// Local column name to its parent `table.column`.
///
/// A column that takes part in more than one foreign key maps to the last one
/// `PRAGMA foreign_key_list` reports; `foreign_key_check` still covers all.
pub fn list_foreign_keys(
    conn: &Connection,
    table_name: &str,
) -> Result<BTreeMap<String, ForeignKeyRef>> {
    table_sql(conn, table_name)?;
    let mut map = BTreeMap::new();
    for fk in foreign_key_rows(conn, table_name)? {
        let column = parent_column(conn, &fk);
        map.insert(
            fk.from,
            ForeignKeyRef {
                table: fk.table,
                column,
            },
        );
    }
    Ok(map)
}

/// Per-column not-null, unique and default flags
pub fn list_constraints(
    conn: &Connection,
    table_name: &str,
) -> Result<BTreeMap<String, ColumnConstraints>> {
    let table = describe_table(conn, table_name)?;
    Ok(table
        .columns
        .into_iter()
        .map(|c| {
            (
                c.name,
                ColumnConstraints {
                    not_null: c.not_null,
                    unique: c.unique,
                    default_value: c.default_value,
                },
            )
        })
        .collect())
}

pub fn table_meta(conn: &Connection, table_name: &str) -> Result<TableMeta> {
    let table = describe_table(conn, table_name)?;
    Ok(TableMeta {
        name: table.name,
        sql: table.sql,
        primary_key: table.primary_key,
        auto_increment: table.auto_increment,
    })
}

/// Last value handed out by AUTOINCREMENT, 0 if none
pub fn last_sequence_value(conn: &Connection, table_name: &str) -> Result<i64> {
    const QUERY: &str = "SELECT seq FROM sqlite_sequence WHERE name = ? COLLATE NOCASE";
    if !table_exists(conn, "sqlite_sequence").unwrap_or(false) {
        return Ok(0);
    }
    let seq: Option<i64> = conn
        .query_row(QUERY, [table_name], |row| row.get(0))
        .optional()
        .sql_context(QUERY)?;
    Ok(seq.unwrap_or(0))
}

pub fn new_row_meta(conn: &Connection, table_name: &str) -> Result<NewRowMeta> {
    let table = describe_table(conn, table_name)?;
    let last_id = if table.auto_increment {
        last_sequence_value(conn, table_name)?
    } else {
        0
    };
    Ok(NewRowMeta {
        columns: table.column_names(),
        types: table.columns.iter().map(|c| c.column_type).collect(),
        defaults: table.columns.iter().map(|c| c.default_value.clone()).collect(),
        primary_key: table.primary_key,
        auto_increment: table.auto_increment,
        last_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Games (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL);
             CREATE TABLE Reviews (
                 id INTEGER PRIMARY KEY,
                 game_id INTEGER,
                 score REAL DEFAULT 5.0,
                 handle TEXT UNIQUE,
                 FOREIGN KEY(game_id) REFERENCES Games(id)
             );
             CREATE TABLE Tags (review INTEGER REFERENCES Reviews, label TEXT, PRIMARY KEY (review, label));
             INSERT INTO Games (title) VALUES ('Outer Wilds');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn lists_user_tables_only() {
        let conn = fixture();
        assert_eq!(list_tables(&conn).unwrap(), vec!["Games", "Reviews", "Tags"]);
    }

    #[test]
    fn describes_keys_and_constraints() {
        let conn = fixture();
        let games = describe_table(&conn, "Games").unwrap();
        assert_eq!(games.primary_key.as_deref(), Some("id"));
        assert!(games.auto_increment);
        assert!(games.column("id").unwrap().auto_increment);
        assert!(games.column("title").unwrap().not_null);

        let reviews = describe_table(&conn, "Reviews").unwrap();
        assert!(!reviews.auto_increment);
        let game_id = reviews.column("game_id").unwrap();
        assert_eq!(game_id.foreign_key.as_ref().unwrap().to_string(), "Games.id");
        assert!(reviews.column("handle").unwrap().unique);
        assert_eq!(
            reviews.column("score").unwrap().default_value.as_deref(),
            Some("5.0")
        );
        assert_eq!(reviews.column("score").unwrap().column_type, ColumnType::Real);
    }

    #[test]
    fn composite_keys_fall_back_to_rowid() {
        let conn = fixture();
        let tags = describe_table(&conn, "Tags").unwrap();
        assert_eq!(tags.primary_key, None);
        assert_eq!(tags.row_key(), "rowid");
        // Reference without a parent column resolves to the parent's key
        let fks = list_foreign_keys(&conn, "Tags").unwrap();
        assert_eq!(fks["review"].to_string(), "Reviews.id");
    }

    #[test]
    fn missing_tables_are_not_found() {
        let conn = fixture();
        assert!(matches!(
            describe_table(&conn, "Nope"),
            Err(StageError::NotFound { kind: "Table", .. })
        ));
        assert!(matches!(
            list_foreign_keys(&conn, "Nope"),
            Err(StageError::NotFound { .. })
        ));
    }

    #[test]
    fn reports_sequence_state() {
        let conn = fixture();
        let meta = new_row_meta(&conn, "Games").unwrap();
        assert_eq!(meta.columns, vec!["id", "title"]);
        assert_eq!(meta.types, vec![ColumnType::Integer, ColumnType::Text]);
        assert_eq!(meta.last_id, 1);
        assert_eq!(new_row_meta(&conn, "Reviews").unwrap().last_id, 0);
    }

    #[test]
    fn lookups_ignore_identifier_case() {
        let conn = fixture();
        assert_eq!(canonical_table_name(&conn, "games").unwrap(), "Games");
        let reviews = describe_table(&conn, "REVIEWS").unwrap();
        assert_eq!(reviews.name, "Reviews");
        assert_eq!(reviews.column("Game_ID").unwrap().name, "game_id");
        assert_eq!(last_sequence_value(&conn, "games").unwrap(), 1);
    }

    #[test]
    fn column_in_two_references_keeps_one_entry() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE a (id INTEGER PRIMARY KEY);
             CREATE TABLE b (id INTEGER PRIMARY KEY);
             CREATE TABLE c (x INTEGER REFERENCES a(id), FOREIGN KEY (x) REFERENCES b(id));",
        )
        .unwrap();
        let fks = list_foreign_keys(&conn, "c").unwrap();
        assert_eq!(fks.len(), 1);
        assert!(["a", "b"].contains(&fks["x"].table.as_str()));
        assert_eq!(foreign_key_rows(&conn, "c").unwrap().len(), 2);
    }
}
