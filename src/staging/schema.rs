//! Structural changes. Unlike data edits these apply to the authoritative
//! file and the preview together: each handle gets its own transaction and
//! both commit only once both have succeeded.

use crate::db::error::{Result, SqlContext, StageError};
use crate::db::{ddl, quote_ident, schema as catalog};
use crate::import::CsvData;
use crate::session::{reopen_required, Session};
use crate::staging::integrity;
use crate::types::{ForeignKeyViolation, TableDescriptor, Value};
use rusqlite::{params_from_iter, Connection};
use serde::Deserialize;
use std::cell::Cell;
use std::collections::HashMap;

/// A column of the rebuilt table and where its data comes from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColumnMapping {
    /// Copied from the old column of the same name, if there is one
    Same(String),
    /// Copied from a differently named old column
    Renamed { name: String, from: String },
}

impl ColumnMapping {
    pub fn name(&self) -> &str {
        match self {
            ColumnMapping::Same(name) | ColumnMapping::Renamed { name, .. } => name,
        }
    }
}

/// One column of the rebuilt table
struct CopyColumn {
    target: String,
    /// Old column the data comes from, if any
    source: Option<String>,
    default: Option<Value>,
}

/// A table rebuild, resolved against the old table before any write
struct RebuildPlan {
    old_table: String,
    new_table: String,
    scratch: String,
    scratch_sql: String,
    columns: Vec<CopyColumn>,
    /// INTEGER PRIMARY KEY of the old table, if it has one
    old_rowid_alias: Option<String>,
    /// The old table has a rowid not shadowed by a column of that name
    old_rowid_readable: bool,
    /// Set by `apply`: every row kept its rowid
    keeps_rowids: Cell<bool>,
}

/// The INTEGER PRIMARY KEY column standing in for the rowid, if any
fn rowid_alias(table: &TableDescriptor) -> Option<&str> {
    if table.without_rowid {
        return None;
    }
    let pk = table.primary_key.as_deref()?;
    table
        .column(pk)
        .filter(|c| c.declared_type.eq_ignore_ascii_case("INTEGER"))
        .map(|c| c.name.as_str())
}

impl RebuildPlan {
    /// Whether `after` is the same dangling reference as `before`, seen
    /// through the rename and any rowid renumbering
    fn carries(&self, before: &ForeignKeyViolation, after: &ForeignKeyViolation) -> bool {
        let rebuilt = before.table.eq_ignore_ascii_case(&self.old_table);
        let table = if rebuilt { &self.new_table } else { &before.table };
        table.eq_ignore_ascii_case(&after.table)
            && before.parent.eq_ignore_ascii_case(&after.parent)
            && (before.rowid == after.rowid || (rebuilt && !self.keeps_rowids.get()))
    }

    /// Violations in `current` that no entry of `baseline` accounts for
    fn introduced(
        &self,
        mut baseline: Vec<ForeignKeyViolation>,
        current: Vec<ForeignKeyViolation>,
    ) -> Vec<ForeignKeyViolation> {
        current
            .into_iter()
            .filter(|after| {
                match baseline.iter().position(|before| self.carries(before, after)) {
                    Some(i) => {
                        baseline.swap_remove(i);
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }

    fn apply(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.scratch_sql, [])
            .sql_context(&self.scratch_sql)?;
        let created = catalog::describe_table(conn, &self.scratch)?;

        // A listed rowid alias decides the rowid itself; otherwise copy it explicitly
        let alias_target = rowid_alias(&created).and_then(|alias| {
            self.columns
                .iter()
                .find(|c| c.target.eq_ignore_ascii_case(alias))
        });
        let copy_rowid = self.old_rowid_readable
            && !created.without_rowid
            && created.column("rowid").is_none()
            && alias_target.is_none();
        let keeps_rowids = copy_rowid
            || matches!(
                (alias_target.and_then(|c| c.source.as_deref()), self.old_rowid_alias.as_deref()),
                (Some(source), Some(old)) if source.eq_ignore_ascii_case(old)
            );
        self.keeps_rowids.set(keeps_rowids);

        let mut targets = Vec::with_capacity(self.columns.len() + 1);
        let mut exprs = Vec::with_capacity(self.columns.len() + 1);
        let mut params = Vec::new();
        if copy_rowid {
            targets.push("rowid".to_string());
            exprs.push("rowid".to_string());
        }
        for column in &self.columns {
            let target = created
                .column(&column.target)
                .ok_or_else(|| StageError::column_not_found(&self.new_table, &column.target))?;

            let expr = match (&column.source, &column.default) {
                // Old NULLs are backfilled only where the new definition forbids them
                (Some(source), Some(default)) if target.not_null => {
                    params.push(default.clone());
                    format!("COALESCE({}, ?)", quote_ident(source))
                }
                (Some(source), _) => quote_ident(source),
                (None, default) => {
                    params.push(default.clone().unwrap_or_default());
                    "?".to_string()
                }
            };
            targets.push(quote_ident(&column.target));
            exprs.push(expr);
        }

        let copy = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote_ident(&self.scratch),
            targets.join(", "),
            exprs.join(", "),
            quote_ident(&self.old_table)
        );
        conn.execute(&copy, params_from_iter(params.iter()))
            .sql_context(&copy)?;

        let drop = format!("DROP TABLE {}", quote_ident(&self.old_table));
        conn.execute(&drop, []).sql_context(&drop)?;

        let rename = format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&self.scratch),
            quote_ident(&self.new_table)
        );
        conn.execute(&rename, []).sql_context(&rename)?;
        Ok(())
    }
}

fn require_text(value: &str, name: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        Err(StageError::MissingArgument(name))
    } else {
        Ok(())
    }
}

fn create_table_name(create_sql: &str) -> Result<String> {
    ddl::table_name(create_sql).map_err(|e| StageError::Sql(format!("Invalid table definition: {}", e)))
}

impl Session {
    /// Run `apply` against the preview and then the authoritative handle,
    /// committing both only when both succeed.
    ///
    /// With a `rebuild`, enforcement on the authoritative handle is switched
    /// off for the duration and the result is scanned for dangling references
    /// the rebuild introduced before anything commits.
    fn apply_to_both<F>(&mut self, rebuild: Option<&RebuildPlan>, apply: F) -> Result<()>
    where
        F: Fn(&Connection) -> Result<()>,
    {
        let authoritative = self.authoritative.as_mut().ok_or_else(reopen_required)?;
        let preview = &mut self.preview;
        let suspend_foreign_keys = rebuild.is_some();

        if suspend_foreign_keys {
            authoritative.set_foreign_keys(false)?;
        }

        let result = (|| -> Result<()> {
            let preview_tx = preview.conn.transaction().sql_context("BEGIN")?;
            apply(&preview_tx)?;

            let authoritative_tx = authoritative.conn.transaction().sql_context("BEGIN")?;
            let baseline = match rebuild {
                Some(_) => integrity::foreign_key_violations(&authoritative_tx, None)?,
                None => Vec::new(),
            };
            apply(&authoritative_tx)?;

            if let Some(plan) = rebuild {
                let current = integrity::foreign_key_violations(&authoritative_tx, None)?;
                let violations = plan.introduced(baseline, current);
                if !violations.is_empty() {
                    return Err(StageError::UnresolvedViolations { violations });
                }
            }

            authoritative_tx.commit().sql_context("COMMIT")?;
            if let Err(e) = preview_tx.commit() {
                tracing::error!(error = %e, "authoritative schema committed but preview did not");
                return Err(StageError::from_sqlite(e, "COMMIT"));
            }
            Ok(())
        })();

        if suspend_foreign_keys {
            if let Err(e) = authoritative.set_foreign_keys(true) {
                tracing::error!(error = %e, "failed to re-enable foreign keys");
                result?;
                return Err(e);
            }
        }
        result
    }

    /// Rebuild `table` from a new definition, carrying its rows across.
    ///
    /// Columns listed in `columns` that existed before are copied verbatim,
    /// except that a column the new definition makes NOT NULL has its NULLs
    /// replaced by its entry in `defaults`. Columns new to the table get their
    /// default or NULL.
    pub fn stage_schema_change(
        &mut self,
        table: &str,
        create_sql: &str,
        new_name: &str,
        columns: &[ColumnMapping],
        defaults: &HashMap<String, Value>,
    ) -> Result<()> {
        require_text(create_sql, "create_sql")?;
        require_text(new_name, "new_name")?;
        if columns.is_empty() {
            return Err(StageError::MissingArgument("columns"));
        }
        create_table_name(create_sql)?;

        let old = catalog::describe_table(self.authoritative()?.connection(), table)?;
        if !new_name.eq_ignore_ascii_case(&old.name)
            && catalog::table_exists(self.preview.connection(), new_name)?
        {
            return Err(StageError::Sql(format!("Table already exists: {}", new_name)));
        }

        let scratch = format!("_sqled_rebuild_{}", old.name);
        let scratch_sql = ddl::with_table_name(create_sql, &scratch)
            .map_err(|e| StageError::Sql(format!("Invalid table definition: {}", e)))?;

        let mut copy_columns = Vec::with_capacity(columns.len());
        for mapping in columns {
            let target = mapping.name();
            require_text(target, "columns")?;
            let source = match mapping {
                ColumnMapping::Renamed { from, .. } => {
                    let column = old
                        .column(from)
                        .ok_or_else(|| StageError::column_not_found(table, from))?;
                    Some(column.name.clone())
                }
                ColumnMapping::Same(name) => old.column(name).map(|c| c.name.clone()),
            };
            copy_columns.push(CopyColumn {
                target: target.to_string(),
                source,
                default: defaults.get(target).cloned(),
            });
        }

        let plan = RebuildPlan {
            old_table: old.name.clone(),
            new_table: new_name.to_string(),
            scratch,
            scratch_sql,
            columns: copy_columns,
            old_rowid_alias: rowid_alias(&old).map(str::to_string),
            old_rowid_readable: !old.without_rowid && old.column("rowid").is_none(),
            keeps_rowids: Cell::new(false),
        };

        self.apply_to_both(Some(&plan), |conn| plan.apply(conn))?;
        self.rename_editing_table(&old.name, new_name);
        tracing::info!(table, new_name, "rebuilt table");
        Ok(())
    }

    pub fn stage_table_create(&mut self, create_sql: &str) -> Result<String> {
        require_text(create_sql, "create_sql")?;
        let name = create_table_name(create_sql)?;
        self.apply_to_both(None, |conn| {
            conn.execute(create_sql, []).map(|_| ()).sql_context(create_sql)
        })?;
        tracing::info!(table = %name, "created table");
        Ok(name)
    }

    pub fn stage_table_drop(&mut self, table: &str) -> Result<()> {
        require_text(table, "table")?;
        catalog::table_sql(self.authoritative()?.connection(), table)?;
        let sql = format!("DROP TABLE {}", quote_ident(table));
        self.apply_to_both(None, |conn| conn.execute(&sql, []).map(|_| ()).sql_context(&sql))?;
        self.forget_editing_table(table);
        tracing::info!(table, "dropped table");
        Ok(())
    }

    pub fn stage_column_drop(&mut self, table: &str, column: &str) -> Result<()> {
        require_text(column, "column")?;
        let descriptor = catalog::describe_table(self.authoritative()?.connection(), table)?;
        if descriptor.column(column).is_none() {
            return Err(StageError::column_not_found(table, column));
        }
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        );
        self.apply_to_both(None, |conn| conn.execute(&sql, []).map(|_| ()).sql_context(&sql))?;
        tracing::info!(table, column, "dropped column");
        Ok(())
    }

    /// Create `table` with one TEXT column per CSV column and load every row
    pub fn stage_csv_table(&mut self, table: &str, data: &CsvData) -> Result<usize> {
        require_text(table, "table")?;
        if data.headers.is_empty() {
            return Err(StageError::MissingArgument("columns"));
        }

        let column_defs = data
            .headers
            .iter()
            .map(|h| format!("{} TEXT", quote_ident(h)))
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!("CREATE TABLE {} ({})", quote_ident(table), column_defs);
        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(table),
            vec!["?"; data.headers.len()].join(", ")
        );

        self.apply_to_both(None, |conn| {
            conn.execute(&create, []).sql_context(&create)?;
            let mut stmt = conn.prepare(&insert).sql_context(&insert)?;
            for record in &data.rows {
                stmt.execute(params_from_iter(record.iter()))
                    .sql_context(&insert)?;
            }
            Ok(())
        })?;

        tracing::info!(table, rows = data.rows.len(), "imported csv");
        Ok(data.rows.len())
    }
}
