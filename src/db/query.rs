use crate::db::error::{Result, SqlContext, StageError};
use crate::db::quote_ident;
use crate::types::{QueryResult, SqlOutcome, Value};
use rusqlite::{Connection, Params, Row, Statement};
use std::time::Instant;

fn read_values(row: &Row<'_>) -> rusqlite::Result<Vec<Value>> {
    let mut values = Vec::new();
    for i in 0..row.as_ref().column_count() {
        let value: rusqlite::types::Value = row.get(i)?;
        values.push(Value::from(value));
    }
    Ok(values)
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().iter().map(|s| s.to_string()).collect()
}

/// Run one raw statement: row-returning statements yield rows, others a change count
pub fn execute_sql(conn: &Connection, query: &str, max_rows: usize) -> Result<SqlOutcome> {
    if query.trim().is_empty() {
        return Err(StageError::MissingArgument("sql"));
    }

    let start = Instant::now();
    let mut stmt = conn.prepare(query).sql_context(query)?;

    if stmt.column_count() == 0 {
        let changes = stmt.execute([]).sql_context(query)?;
        return Ok(SqlOutcome::Changes {
            changes,
            last_insert_rowid: conn.last_insert_rowid(),
            exec_ms: start.elapsed().as_millis() as u64,
        });
    }

    let columns = column_names(&stmt);
    let mut rows = Vec::new();
    let mut truncated = false;
    let mut row_iter = stmt.query_map([], read_values).sql_context(query)?;

    while let Some(row_result) = row_iter.next() {
        if rows.len() >= max_rows {
            truncated = true;
            break;
        }
        rows.push(row_result.sql_context(query)?);
    }

    Ok(SqlOutcome::Rows(QueryResult {
        columns,
        rows,
        truncated,
        exec_ms: start.elapsed().as_millis() as u64,
    }))
}

/// Get one page of rows from a table
pub fn get_table_rows(
    conn: &Connection,
    table_name: &str,
    page: usize,
    page_size: usize,
) -> Result<QueryResult> {
    let start = Instant::now();
    let query = format!(
        "SELECT * FROM {} LIMIT ? OFFSET ?",
        quote_ident(table_name)
    );
    let offset = page.saturating_mul(page_size);

    let mut stmt = conn.prepare(&query).sql_context(&query)?;
    let columns = column_names(&stmt);
    let rows = stmt
        .query_map([page_size as i64, offset as i64], read_values)
        .sql_context(&query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .sql_context(&query)?;

    Ok(QueryResult {
        columns,
        rows,
        truncated: false,
        exec_ms: start.elapsed().as_millis() as u64,
    })
}

/// Fetch a single row as column names and values
pub fn read_row<P: Params>(
    conn: &Connection,
    query: &str,
    params: P,
) -> Result<Option<(Vec<String>, Vec<Value>)>> {
    let mut stmt = conn.prepare(query).sql_context(query)?;
    let columns = column_names(&stmt);
    let mut rows = stmt.query(params).sql_context(query)?;
    match rows.next().sql_context(query)? {
        Some(row) => Ok(Some((columns, read_values(row).sql_context(query)?))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
             WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 25)
             INSERT INTO t SELECT i, 'row ' || i FROM n;",
        )
        .unwrap();
        conn
    }

    #[test]
    fn pages_through_rows() {
        let conn = fixture();
        let page = get_table_rows(&conn, "t", 2, 10).unwrap();
        assert_eq!(page.columns, vec!["id", "name"]);
        assert_eq!(page.rows.len(), 5);
        assert_eq!(page.rows[0][0], Value::Integer(21));
    }

    #[test]
    fn raw_queries_are_capped() {
        let conn = fixture();
        match execute_sql(&conn, "SELECT * FROM t", 20).unwrap() {
            SqlOutcome::Rows(result) => {
                assert_eq!(result.rows.len(), 20);
                assert!(result.truncated);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn raw_writes_report_changes() {
        let conn = fixture();
        match execute_sql(&conn, "DELETE FROM t WHERE id > 20", 100).unwrap() {
            SqlOutcome::Changes { changes, .. } => assert_eq!(changes, 5),
            other => panic!("expected changes, got {:?}", other),
        }
        // PRAGMA and CTE queries return rows even without a leading SELECT
        assert!(matches!(
            execute_sql(&conn, "PRAGMA table_info(t)", 100).unwrap(),
            SqlOutcome::Rows(_)
        ));
    }

    #[test]
    fn blank_sql_is_a_missing_argument() {
        let conn = fixture();
        assert!(matches!(
            execute_sql(&conn, "   ", 10),
            Err(StageError::MissingArgument("sql"))
        ));
    }
}
