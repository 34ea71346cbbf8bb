use crate::db::error::{Result, SqlContext};
use crate::db::quote_ident;
use crate::db::schema::{foreign_key_rows, ForeignKeyRow};
use crate::types::ForeignKeyViolation;
use rusqlite::Connection;
use std::collections::HashMap;

/// Run `PRAGMA foreign_key_check`, optionally limited to one table, and name
/// the referencing column(s) of each dangling reference.
///
/// Works whether or not `PRAGMA foreign_keys` is enabled on `conn`.
pub fn foreign_key_violations(
    conn: &Connection,
    table: Option<&str>,
) -> Result<Vec<ForeignKeyViolation>> {
    let query = match table {
        Some(table) => format!("PRAGMA foreign_key_check({})", quote_ident(table)),
        None => "PRAGMA foreign_key_check".to_string(),
    };

    let mut stmt = conn.prepare(&query).sql_context(&query)?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .sql_context(&query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql_context(&query)?;

    let mut keys: HashMap<String, Vec<ForeignKeyRow>> = HashMap::new();
    let mut violations = Vec::with_capacity(raw.len());

    for (child, rowid, parent, fkid) in raw {
        if !keys.contains_key(&child) {
            let rows = foreign_key_rows(conn, &child)?;
            keys.insert(child.clone(), rows);
        }
        // Composite keys list one row per column under the same id
        let columns: Vec<&str> = keys[&child]
            .iter()
            .filter(|fk| fk.id == fkid)
            .map(|fk| fk.from.as_str())
            .collect();

        for column in columns {
            violations.push(ForeignKeyViolation {
                table: child.clone(),
                rowid,
                column: column.to_string(),
                parent: parent.clone(),
            });
        }
    }

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn names_the_referencing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             CREATE TABLE parent (a INTEGER, b INTEGER, PRIMARY KEY (a, b));
             CREATE TABLE single (id INTEGER PRIMARY KEY);
             CREATE TABLE child (
                 id INTEGER PRIMARY KEY,
                 s INTEGER REFERENCES single(id),
                 pa INTEGER,
                 pb INTEGER,
                 FOREIGN KEY (pa, pb) REFERENCES parent(a, b)
             );
             INSERT INTO single VALUES (1);
             INSERT INTO child VALUES (10, 1, NULL, NULL);
             INSERT INTO child VALUES (11, 2, NULL, NULL);
             INSERT INTO child VALUES (12, 1, 5, 6);",
        )
        .unwrap();

        let mut found = foreign_key_violations(&conn, Some("child")).unwrap();
        found.sort_by(|a, b| (a.rowid, &a.column).cmp(&(b.rowid, &b.column)));
        let pairs: Vec<(Option<i64>, &str, &str)> = found
            .iter()
            .map(|v| (v.rowid, v.column.as_str(), v.parent.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Some(11), "s", "single"),
                (Some(12), "pa", "parent"),
                (Some(12), "pb", "parent"),
            ]
        );

        assert!(foreign_key_violations(&conn, Some("single")).unwrap().is_empty());
        assert_eq!(foreign_key_violations(&conn, None).unwrap().len(), 3);
    }
}
