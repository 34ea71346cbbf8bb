//! Tentative edits against the preview copy.
//!
//! Every operation here runs in its own transaction on the preview handle.
//! Engine rejections roll the whole operation back; dangling foreign keys do
//! not, they are committed and reported so the user can fix them in place.

pub mod commit;
pub mod integrity;
pub mod schema;

use crate::db::error::{Result, SqlContext, StageError};
use crate::db::{query, quote_ident, schema as catalog};
use crate::session::Session;
use crate::types::{
    ColumnDescriptor, ForeignKeyViolation, QueryResult, SqlOutcome, TableDescriptor, Value,
};
use rusqlite::params_from_iter;
use serde::Serialize;

pub use schema::ColumnMapping;

/// SQLITE_MAX_VARIABLE_NUMBER for SQLite >= 3.32
const MAX_BOUND_PARAMS: usize = 32766;

/// Result of inserting a row of defaults
#[derive(Debug, Clone, Serialize)]
pub struct EmptyRow {
    pub columns: Vec<String>,
    /// Empty when a WITHOUT ROWID table's key came from a default expression
    pub row: Vec<Value>,
    pub rowid: Option<i64>,
    pub primary_key: Option<String>,
    pub violations: Vec<ForeignKeyViolation>,
}

fn require_column<'a>(table: &'a TableDescriptor, column: &str) -> Result<&'a ColumnDescriptor> {
    table
        .column(column)
        .ok_or_else(|| StageError::column_not_found(&table.name, column))
}

/// Columns usable in a WHERE clause to address rows
fn require_key_column(table: &TableDescriptor, column: &str) -> Result<()> {
    if column.eq_ignore_ascii_case("rowid") && !table.without_rowid {
        return Ok(());
    }
    require_column(table, column).map(|_| ())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Primary key values SQLite fills in itself
fn generates_own_value(table: &TableDescriptor, column: &ColumnDescriptor) -> bool {
    if !column.primary_key || table.primary_key.as_deref() != Some(column.name.as_str()) {
        return false;
    }
    column.auto_increment
        || (!table.without_rowid && column.declared_type.eq_ignore_ascii_case("INTEGER"))
}

fn foreign_key_outcome(table: &str, violations: Vec<ForeignKeyViolation>) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        tracing::debug!(table, count = violations.len(), "staged edit left dangling references");
        Err(StageError::ForeignKey {
            table: table.to_string(),
            violations,
        })
    }
}

impl Session {
    pub fn describe_preview_table(&self, table: &str) -> Result<TableDescriptor> {
        catalog::describe_table(self.preview.connection(), table)
    }

    /// Change one cell on the preview.
    ///
    /// Returns `ForeignKey` (with the edit kept) when the table has dangling
    /// references afterward, listing every violating cell of that table.
    pub fn stage_cell_edit(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
        pk_column: &str,
        pk_value: &Value,
    ) -> Result<()> {
        let descriptor = self.describe_preview_table(table)?;
        let target = require_column(&descriptor, column)?;
        require_key_column(&descriptor, pk_column)?;

        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote_ident(&descriptor.name),
            quote_ident(&target.name),
            quote_ident(pk_column)
        );

        let tx = self.preview.conn.transaction().sql_context("BEGIN")?;
        let changed = tx.execute(&sql, [value, pk_value]).sql_context(&sql)?;
        if changed == 0 {
            return Err(StageError::NotFound {
                kind: "Row",
                name: format!("{}.{} = {}", table, pk_column, pk_value.display(40)),
            });
        }
        let violations = integrity::foreign_key_violations(&tx, Some(&descriptor.name))?;
        tx.commit().sql_context("COMMIT")?;

        tracing::debug!(table, column, "staged cell edit");
        foreign_key_outcome(&descriptor.name, violations)
    }

    /// Insert a batch of rows; any failing row rolls back the whole batch
    pub fn stage_new_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<usize> {
        if columns.is_empty() {
            return Err(StageError::MissingArgument("columns"));
        }
        let descriptor = self.describe_preview_table(table)?;
        for column in columns {
            require_column(&descriptor, column)?;
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(StageError::Sql(format!(
                "Row {} has {} values but {} columns were given",
                i + 1,
                row.len(),
                columns.len()
            )));
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let row_placeholders = format!("({})", placeholders(columns.len()));
        let rows_per_statement = (MAX_BOUND_PARAMS / columns.len()).max(1);

        let tx = self.preview.conn.transaction().sql_context("BEGIN")?;
        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                column_list,
                vec![row_placeholders.as_str(); chunk.len()].join(", ")
            );
            inserted += tx
                .execute(&sql, params_from_iter(chunk.iter().flatten()))
                .sql_context(&sql)?;
        }
        let violations = integrity::foreign_key_violations(&tx, Some(table))?;
        tx.commit().sql_context("COMMIT")?;

        tracing::debug!(table, inserted, "staged new rows");
        foreign_key_outcome(table, violations)?;
        Ok(inserted)
    }

    /// Move an AUTOINCREMENT table's sequence forward to `last_id`
    pub fn stage_sequence_bump(&mut self, table: &str, last_id: i64) -> Result<usize> {
        let descriptor = self.describe_preview_table(table)?;
        if !descriptor.auto_increment {
            return Ok(0);
        }
        const SQL: &str = "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2 AND seq < ?1";
        let tx = self.preview.conn.transaction().sql_context("BEGIN")?;
        let changed = tx
            .execute(SQL, rusqlite::params![last_id, descriptor.name])
            .sql_context(SQL)?;
        tx.commit().sql_context("COMMIT")?;
        Ok(changed)
    }

    /// Delete rows by primary key (or rowid when the table has none)
    pub fn stage_row_deletion(&mut self, table: &str, row_ids: &[Value]) -> Result<usize> {
        let descriptor = self.describe_preview_table(table)?;
        if row_ids.is_empty() {
            return Ok(0);
        }
        let key = descriptor.row_key().to_string();
        require_key_column(&descriptor, &key)?;

        let tx = self.preview.conn.transaction().sql_context("BEGIN")?;
        let mut removed = 0;
        for chunk in row_ids.chunks(MAX_BOUND_PARAMS) {
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                quote_ident(table),
                quote_ident(&key),
                placeholders(chunk.len())
            );
            removed += tx
                .execute(&sql, params_from_iter(chunk.iter()))
                .sql_context(&sql)?;
        }
        tx.commit().sql_context("COMMIT")?;

        tracing::debug!(table, removed, "staged row deletion");
        Ok(removed)
    }

    /// Insert a row of defaults and report its foreign-key state immediately
    pub fn stage_empty_row_insert(&mut self, table: &str) -> Result<EmptyRow> {
        let descriptor = self.describe_preview_table(table)?;

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for column in &descriptor.columns {
            if generates_own_value(&descriptor, column) || column.default_value.is_some() {
                continue;
            }
            let required = column.not_null || (descriptor.without_rowid && column.primary_key);
            if required {
                columns.push(column.name.clone());
                values.push(column.column_type.sentinel());
            }
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", "),
                placeholders(columns.len())
            )
        };

        let tx = self.preview.conn.transaction().sql_context("BEGIN")?;
        tx.execute(&sql, params_from_iter(values.iter()))
            .sql_context(&sql)?;

        let (rowid, inserted) = if descriptor.without_rowid {
            // Address the row by its key columns, all of which were bound above
            let keys: Vec<(&String, &Value)> = columns
                .iter()
                .zip(values.iter())
                .filter(|(name, _)| descriptor.column(name).map_or(false, |c| c.primary_key))
                .collect();
            let key_count = descriptor.columns.iter().filter(|c| c.primary_key).count();
            if keys.len() == key_count && key_count > 0 {
                let filter = keys
                    .iter()
                    .map(|(name, _)| format!("{} = ?", quote_ident(name)))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let select = format!("SELECT * FROM {} WHERE {}", quote_ident(table), filter);
                let row = query::read_row(&tx, &select, params_from_iter(keys.iter().map(|(_, v)| *v)))?;
                (None, row)
            } else {
                (None, None)
            }
        } else {
            let rowid = tx.last_insert_rowid();
            let select = format!("SELECT * FROM {} WHERE rowid = ?", quote_ident(table));
            (Some(rowid), query::read_row(&tx, &select, [rowid])?)
        };

        let violations = integrity::foreign_key_violations(&tx, Some(table))?
            .into_iter()
            .filter(|v| rowid.is_none() || v.rowid == rowid)
            .collect();
        tx.commit().sql_context("COMMIT")?;

        let (columns, row) = inserted.unwrap_or_else(|| (descriptor.column_names(), Vec::new()));
        tracing::debug!(table, ?rowid, "staged empty row");
        Ok(EmptyRow {
            columns,
            row,
            rowid,
            primary_key: descriptor.primary_key,
            violations,
        })
    }

    /// Dangling references on the preview, for one table or all of them
    pub fn check_foreign_key_violations(
        &self,
        table: Option<&str>,
    ) -> Result<Vec<ForeignKeyViolation>> {
        if let Some(table) = table {
            catalog::table_sql(self.preview.connection(), table)?;
        }
        integrity::foreign_key_violations(self.preview.connection(), table)
    }

    /// One page of rows as the preview currently sees them
    pub fn view_data(&self, table: &str, page: usize, page_size: usize) -> Result<QueryResult> {
        catalog::table_sql(self.preview.connection(), table)?;
        query::get_table_rows(self.preview.connection(), table, page, page_size)
    }

    /// Run raw SQL against the preview; writes are staged like any other edit.
    ///
    /// A statement may not leave a transaction open on the preview: one that
    /// does (`BEGIN`, `SAVEPOINT`) is rolled back and rejected.
    pub fn execute_sql(&mut self, sql: &str, max_rows: usize) -> Result<SqlOutcome> {
        let conn = self.preview.connection();
        let outcome = query::execute_sql(conn, sql, max_rows);
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK").sql_context("ROLLBACK")?;
            tracing::warn!(sql, "rolled back transaction left open by raw sql");
            return Err(StageError::Sql(
                "Transaction control is not available in raw SQL; each statement is staged on its own"
                    .to_string(),
            ));
        }
        tracing::debug!(sql, "executed raw sql on preview");
        outcome
    }
}
