//! Request/response interface for a front-end.
//!
//! A request is `{"command": <name>, "args": [...] | {...}}`; arguments may be
//! positional (see `positional_fields`) or named. Every request yields exactly
//! one `Response`.

use crate::config::Config;
use crate::db::error::{Result, StageError};
use crate::db::schema as catalog;
use crate::import::{self, CsvData, CsvOptions};
use crate::session::ConnectionManager;
use crate::staging::{ColumnMapping, EmptyRow};
use crate::types::{
    ColumnConstraints, ForeignKeyViolation, NewRowMeta, QueryResult, SqlOutcome, TableInfo,
    TableMeta, Value,
};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Data rows shown by `get-csv-data`
pub const CSV_PREVIEW_ROWS: usize = 10;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "kebab-case")]
pub enum Request {
    OpenDatabase {
        #[serde(default)]
        path: PathBuf,
    },
    /// Create (or replace) a database file and open it
    AddDatabase {
        #[serde(default)]
        path: PathBuf,
    },
    CloseDatabase {},
    RecentConnections {},
    ClearConnections {},
    OpenEditor {
        #[serde(default)]
        table: String,
    },
    RetrieveTables {},
    ViewData {
        #[serde(default)]
        table: String,
        #[serde(default)]
        page: usize,
    },
    GetTableMeta {
        #[serde(default)]
        table: Option<String>,
    },
    NewRowMeta {
        #[serde(default)]
        table: Option<String>,
    },
    GetForeignKeys {
        #[serde(default)]
        table: Option<String>,
    },
    GetConstraints {
        #[serde(default)]
        table: Option<String>,
    },
    CheckForeignKeys {
        #[serde(default)]
        table: Option<String>,
    },
    AddDataviewChanges {
        #[serde(default)]
        table: String,
        #[serde(default)]
        column: String,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        pk_column: String,
        #[serde(default)]
        pk_value: Value,
    },
    AddNewRows {
        #[serde(default)]
        table: String,
        #[serde(default)]
        rows: Vec<Vec<Value>>,
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        last_id: Option<i64>,
    },
    IncrementLastid {
        #[serde(default)]
        table: String,
        #[serde(default)]
        last_id: i64,
    },
    AddEmptyRow {
        #[serde(default)]
        table: String,
    },
    RemoveRows {
        #[serde(default)]
        rows: Vec<Value>,
        #[serde(default)]
        table: String,
    },
    CommitDataviewChanges {
        #[serde(default)]
        table: Option<String>,
    },
    UpdateTable {
        #[serde(default)]
        create_sql: String,
        #[serde(default)]
        new_name: String,
        #[serde(default)]
        columns: Vec<ColumnMapping>,
        #[serde(default)]
        defaults: HashMap<String, Value>,
        #[serde(default)]
        table: Option<String>,
    },
    AddTable {
        #[serde(default)]
        create_sql: String,
    },
    DeleteTable {
        #[serde(default)]
        table: String,
    },
    DeleteCol {
        #[serde(default)]
        column: String,
        #[serde(default)]
        table: Option<String>,
    },
    ExecuteSql {
        #[serde(default)]
        sql: String,
    },
    GetCsvData {
        #[serde(default)]
        path: PathBuf,
        #[serde(default)]
        separator: String,
        #[serde(default = "default_true")]
        has_header: bool,
    },
    CreateFromCsv {
        #[serde(default)]
        path: PathBuf,
        #[serde(default)]
        table: String,
        #[serde(default)]
        separator: String,
        #[serde(default = "default_true")]
        has_header: bool,
        #[serde(default)]
        columns: Option<Vec<String>>,
    },
}

/// Argument names in positional order
fn positional_fields(command: &str) -> Option<&'static [&'static str]> {
    let fields: &'static [&'static str] = match command {
        "close-database" | "recent-connections" | "clear-connections" | "retrieve-tables" => &[],
        "open-database" | "add-database" => &["path"],
        "open-editor" | "get-table-meta" | "new-row-meta" | "get-foreign-keys"
        | "get-constraints" | "check-foreign-keys" | "add-empty-row" | "delete-table"
        | "commit-dataview-changes" => &["table"],
        "view-data" => &["table", "page"],
        "add-dataview-changes" => &["table", "column", "value", "pk_column", "pk_value"],
        "add-new-rows" => &["table", "rows", "columns", "last_id"],
        "increment-lastid" => &["table", "last_id"],
        "remove-rows" => &["rows", "table"],
        "update-table" => &["create_sql", "new_name", "columns", "defaults", "table"],
        "add-table" => &["create_sql"],
        "delete-col" => &["column", "table"],
        "execute-sql" => &["sql"],
        "get-csv-data" => &["path", "separator", "has_header"],
        "create-from-csv" => &["path", "table", "separator", "has_header", "columns"],
        _ => return None,
    };
    Some(fields)
}

impl Request {
    /// Decode a request, naming positional arguments and treating a missing
    /// or null `args` as no arguments
    pub fn from_json(mut value: JsonValue) -> serde_json::Result<Self> {
        let JsonValue::Object(map) = &mut value else {
            return Err(serde_json::Error::custom("request must be a JSON object"));
        };
        let command = map
            .get("command")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        let args = match map.remove("args") {
            None | Some(JsonValue::Null) => JsonValue::Object(JsonMap::new()),
            Some(JsonValue::Array(values)) => match positional_fields(&command) {
                Some(fields) if values.len() > fields.len() => {
                    return Err(serde_json::Error::custom(format!(
                        "{} takes at most {} argument(s), got {}",
                        command,
                        fields.len(),
                        values.len()
                    )));
                }
                Some(fields) => JsonValue::Object(
                    fields.iter().map(|f| f.to_string()).zip(values).collect(),
                ),
                None => JsonValue::Array(values),
            },
            Some(other) => other,
        };
        map.insert("args".to_string(), args);
        serde_json::from_value(value)
    }

    pub fn parse(line: &str) -> serde_json::Result<Self> {
        Self::from_json(serde_json::from_str(line)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::OpenDatabase { .. } => "open-database",
            Request::AddDatabase { .. } => "add-database",
            Request::CloseDatabase {} => "close-database",
            Request::RecentConnections {} => "recent-connections",
            Request::ClearConnections {} => "clear-connections",
            Request::OpenEditor { .. } => "open-editor",
            Request::RetrieveTables {} => "retrieve-tables",
            Request::ViewData { .. } => "view-data",
            Request::GetTableMeta { .. } => "get-table-meta",
            Request::NewRowMeta { .. } => "new-row-meta",
            Request::GetForeignKeys { .. } => "get-foreign-keys",
            Request::GetConstraints { .. } => "get-constraints",
            Request::CheckForeignKeys { .. } => "check-foreign-keys",
            Request::AddDataviewChanges { .. } => "add-dataview-changes",
            Request::AddNewRows { .. } => "add-new-rows",
            Request::IncrementLastid { .. } => "increment-lastid",
            Request::AddEmptyRow { .. } => "add-empty-row",
            Request::RemoveRows { .. } => "remove-rows",
            Request::CommitDataviewChanges { .. } => "commit-dataview-changes",
            Request::UpdateTable { .. } => "update-table",
            Request::AddTable { .. } => "add-table",
            Request::DeleteTable { .. } => "delete-table",
            Request::DeleteCol { .. } => "delete-col",
            Request::ExecuteSql { .. } => "execute-sql",
            Request::GetCsvData { .. } => "get-csv-data",
            Request::CreateFromCsv { .. } => "create-from-csv",
        }
    }
}

/// Fields merged into a success response
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Done,
    Opened {
        path: String,
        tables: Vec<String>,
    },
    Connections {
        connections: Vec<String>,
    },
    Editor {
        table: String,
    },
    Tables {
        tables: Vec<TableInfo>,
    },
    Page {
        data: QueryResult,
        page: usize,
        page_size: usize,
    },
    TableMeta(TableMeta),
    NewRowMeta(NewRowMeta),
    ForeignKeys {
        /// column -> "table.column"
        foreign_keys: BTreeMap<String, String>,
    },
    Constraints {
        constraints: BTreeMap<String, ColumnConstraints>,
    },
    Violations {
        violations: Vec<ForeignKeyViolation>,
    },
    Inserted {
        inserted: usize,
    },
    Removed {
        removed: usize,
    },
    Sequence {
        updated: usize,
    },
    EmptyRow(EmptyRow),
    Created {
        table: String,
    },
    Sql {
        result: SqlOutcome,
    },
    Csv(CsvData),
    Imported {
        table: String,
        rows: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<ForeignKeyViolation>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Success(Payload),
    Err(Failure),
}

impl Response {
    /// Reply to input that could not be decoded as a request
    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Response::Err(Failure {
            error: format!("Invalid request: {}", message),
            detail: Some("BAD_REQUEST"),
            violations: None,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }
}

impl From<StageError> for Response {
    fn from(error: StageError) -> Self {
        Response::Err(Failure {
            error: error.to_string(),
            detail: Some(error.detail()),
            violations: error.violations().map(<[_]>::to_vec),
        })
    }
}

fn require(value: &str, name: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        Err(StageError::MissingArgument(name))
    } else {
        Ok(())
    }
}

fn require_path(path: &std::path::Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        Err(StageError::MissingArgument("path"))
    } else {
        Ok(())
    }
}

/// Dispatches requests against one connection manager
pub struct Router {
    manager: ConnectionManager,
    config: Config,
}

impl Router {
    pub fn new(config: Config) -> Self {
        let manager = ConnectionManager::new(config.load_recent(), config.preview_dir.clone());
        Self { manager, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ConnectionManager {
        &mut self.manager
    }

    pub fn handle(&mut self, request: Request) -> Response {
        let command = request.name();
        tracing::debug!(command, "handling request");
        match self.dispatch(request) {
            Ok(payload) => Response::Success(payload),
            Err(e) => {
                match &e {
                    StageError::ForeignKey { .. } => {
                        tracing::debug!(command, error = %e, "request staged with violations")
                    }
                    _ => tracing::warn!(command, error = %e, "request failed"),
                }
                Response::from(e)
            }
        }
    }

    /// Decode one JSON request and handle it
    pub fn handle_json(&mut self, line: &str) -> Response {
        match Request::parse(line) {
            Ok(request) => self.handle(request),
            Err(e) => {
                tracing::warn!(error = %e, "rejected malformed request");
                Response::bad_request(e)
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Payload> {
        match request {
            Request::OpenDatabase { path } => {
                require_path(&path)?;
                let session = self.manager.open_database(&path)?;
                Ok(Payload::Opened {
                    path: path.display().to_string(),
                    tables: catalog::list_tables(session.preview().connection())?,
                })
            }
            Request::AddDatabase { path } => {
                require_path(&path)?;
                self.manager.create_database(&path)?;
                Ok(Payload::Opened {
                    path: path.display().to_string(),
                    tables: Vec::new(),
                })
            }
            Request::CloseDatabase {} => {
                self.manager.close_database()?;
                Ok(Payload::Done)
            }
            Request::RecentConnections {} => Ok(Payload::Connections {
                connections: self.manager.recent_connections().to_vec(),
            }),
            Request::ClearConnections {} => {
                self.manager.clear_connections();
                Ok(Payload::Done)
            }
            Request::OpenEditor { table } => {
                require(&table, "table")?;
                self.manager.session_mut()?.open_editor(&table)?;
                Ok(Payload::Editor { table })
            }
            Request::RetrieveTables {} => {
                let session = self.manager.session()?;
                Ok(Payload::Tables {
                    tables: catalog::list_tables_with_columns(session.preview().connection())?,
                })
            }
            Request::ViewData { table, page } => {
                require(&table, "table")?;
                let page_size = self.config.page_size;
                let data = self.manager.session()?.view_data(&table, page, page_size)?;
                Ok(Payload::Page {
                    data,
                    page,
                    page_size,
                })
            }
            Request::GetTableMeta { table } => {
                let session = self.manager.session()?;
                let table = session.resolve_table(table.as_deref())?;
                Ok(Payload::TableMeta(catalog::table_meta(
                    session.preview().connection(),
                    &table,
                )?))
            }
            Request::NewRowMeta { table } => {
                let session = self.manager.session()?;
                let table = session.resolve_table(table.as_deref())?;
                Ok(Payload::NewRowMeta(catalog::new_row_meta(
                    session.preview().connection(),
                    &table,
                )?))
            }
            Request::GetForeignKeys { table } => {
                let session = self.manager.session()?;
                let table = session.resolve_table(table.as_deref())?;
                let foreign_keys = catalog::list_foreign_keys(session.preview().connection(), &table)?
                    .into_iter()
                    .map(|(column, parent)| (column, parent.to_string()))
                    .collect();
                Ok(Payload::ForeignKeys { foreign_keys })
            }
            Request::GetConstraints { table } => {
                let session = self.manager.session()?;
                let table = session.resolve_table(table.as_deref())?;
                Ok(Payload::Constraints {
                    constraints: catalog::list_constraints(session.preview().connection(), &table)?,
                })
            }
            Request::CheckForeignKeys { table } => {
                let session = self.manager.session()?;
                let table = table.filter(|t| !t.is_empty());
                Ok(Payload::Violations {
                    violations: session.check_foreign_key_violations(table.as_deref())?,
                })
            }
            Request::AddDataviewChanges {
                table,
                column,
                value,
                pk_column,
                pk_value,
            } => {
                require(&table, "table")?;
                require(&column, "column")?;
                require(&pk_column, "pk_column")?;
                self.manager
                    .session_mut()?
                    .stage_cell_edit(&table, &column, &value, &pk_column, &pk_value)?;
                Ok(Payload::Done)
            }
            Request::AddNewRows {
                table,
                rows,
                columns,
                last_id,
            } => {
                require(&table, "table")?;
                if rows.is_empty() {
                    return Err(StageError::MissingArgument("rows"));
                }
                let session = self.manager.session_mut()?;
                let outcome = session.stage_new_rows(&table, &columns, &rows);
                // Rows are kept on a foreign key error, so the sequence follows them
                if let (Some(last_id), Ok(_) | Err(StageError::ForeignKey { .. })) =
                    (last_id, &outcome)
                {
                    session.stage_sequence_bump(&table, last_id)?;
                }
                Ok(Payload::Inserted { inserted: outcome? })
            }
            Request::IncrementLastid { table, last_id } => {
                require(&table, "table")?;
                let updated = self
                    .manager
                    .session_mut()?
                    .stage_sequence_bump(&table, last_id)?;
                Ok(Payload::Sequence { updated })
            }
            Request::AddEmptyRow { table } => {
                require(&table, "table")?;
                let row = self.manager.session_mut()?.stage_empty_row_insert(&table)?;
                Ok(Payload::EmptyRow(row))
            }
            Request::RemoveRows { rows, table } => {
                require(&table, "table")?;
                if rows.is_empty() {
                    return Err(StageError::MissingArgument("rows"));
                }
                let removed = self
                    .manager
                    .session_mut()?
                    .stage_row_deletion(&table, &rows)?;
                Ok(Payload::Removed { removed })
            }
            Request::CommitDataviewChanges { table } => {
                let session = self.manager.session_mut()?;
                let table = table
                    .filter(|t| !t.is_empty())
                    .or_else(|| session.editing_table().map(str::to_string))
                    .unwrap_or_default();
                session.commit(&table)?;
                Ok(Payload::Done)
            }
            Request::UpdateTable {
                create_sql,
                new_name,
                columns,
                defaults,
                table,
            } => {
                let session = self.manager.session_mut()?;
                let table = session.resolve_table(table.as_deref())?;
                session.stage_schema_change(&table, &create_sql, &new_name, &columns, &defaults)?;
                Ok(Payload::Created { table: new_name })
            }
            Request::AddTable { create_sql } => {
                let table = self.manager.session_mut()?.stage_table_create(&create_sql)?;
                Ok(Payload::Created { table })
            }
            Request::DeleteTable { table } => {
                require(&table, "table")?;
                self.manager.session_mut()?.stage_table_drop(&table)?;
                Ok(Payload::Done)
            }
            Request::DeleteCol { column, table } => {
                let session = self.manager.session_mut()?;
                let table = session.resolve_table(table.as_deref())?;
                session.stage_column_drop(&table, &column)?;
                Ok(Payload::Done)
            }
            Request::ExecuteSql { sql } => {
                let max_rows = self.config.max_rows;
                let result = self.manager.session_mut()?.execute_sql(&sql, max_rows)?;
                Ok(Payload::Sql { result })
            }
            Request::GetCsvData {
                path,
                separator,
                has_header,
            } => {
                require_path(&path)?;
                let options = CsvOptions {
                    delimiter: import::parse_delimiter(&separator)?,
                    has_header,
                    column_names: None,
                };
                Ok(Payload::Csv(import::preview_csv(
                    &path,
                    &options,
                    CSV_PREVIEW_ROWS,
                )?))
            }
            Request::CreateFromCsv {
                path,
                table,
                separator,
                has_header,
                columns,
            } => {
                require_path(&path)?;
                require(&table, "table")?;
                let session = self.manager.session_mut()?;
                let options = CsvOptions {
                    delimiter: import::parse_delimiter(&separator)?,
                    has_header,
                    column_names: columns,
                };
                let data = import::read_csv(&path, &options)?;
                let rows = session.stage_csv_table(&table, &data)?;
                Ok(Payload::Imported { table, rows })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn positional_and_named_arguments_agree() {
        let positional = Request::parse(
            r#"{"command": "add-dataview-changes", "args": ["Games", "title", "Doom", "id", 1]}"#,
        )
        .unwrap();
        let named = Request::from_json(json!({
            "command": "add-dataview-changes",
            "args": {"table": "Games", "column": "title", "value": "Doom", "pk_column": "id", "pk_value": 1}
        }))
        .unwrap();
        assert_eq!(positional, named);
        assert_eq!(positional.name(), "add-dataview-changes");
    }

    #[test]
    fn trailing_optional_arguments_may_be_omitted() {
        let request = Request::parse(
            r#"{"command": "add-new-rows", "args": ["Games", [[1, "Doom"]], ["id", "title"]]}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            Request::AddNewRows {
                table: "Games".into(),
                rows: vec![vec![Value::Integer(1), Value::Text("Doom".into())]],
                columns: vec!["id".into(), "title".into()],
                last_id: None,
            }
        );

        let request = Request::parse(r#"{"command": "get-table-meta"}"#).unwrap();
        assert_eq!(request, Request::GetTableMeta { table: None });
        let request = Request::parse(r#"{"command": "close-database", "args": null}"#).unwrap();
        assert_eq!(request, Request::CloseDatabase {});
    }

    #[test]
    fn column_mappings_accept_names_and_renames() {
        let request = Request::parse(
            r#"{"command": "update-table", "args": {
                "create_sql": "CREATE TABLE t (a, c)",
                "new_name": "t",
                "columns": ["a", {"name": "c", "from": "b"}],
                "defaults": {"c": 0}
            }}"#,
        )
        .unwrap();
        match request {
            Request::UpdateTable {
                columns, defaults, ..
            } => {
                assert_eq!(
                    columns,
                    vec![
                        ColumnMapping::Same("a".into()),
                        ColumnMapping::Renamed {
                            name: "c".into(),
                            from: "b".into()
                        }
                    ]
                );
                assert_eq!(defaults.get("c"), Some(&Value::Integer(0)));
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn responses_carry_type_and_detail() {
        let ok = serde_json::to_value(Response::Success(Payload::Removed { removed: 2 })).unwrap();
        assert_eq!(ok, json!({"type": "success", "removed": 2}));

        let done = serde_json::to_value(Response::Success(Payload::Done)).unwrap();
        assert_eq!(done, json!({"type": "success"}));

        let err = serde_json::to_value(Response::from(StageError::MissingArgument("table"))).unwrap();
        assert_eq!(
            err,
            json!({"type": "err", "error": "Missing required argument: table", "detail": "MISSING_ARGUMENT"})
        );

        let bad = serde_json::to_value(Response::bad_request("nope")).unwrap();
        assert_eq!(bad["detail"], "BAD_REQUEST");
    }

    #[test]
    fn unknown_commands_are_bad_requests() {
        let mut router = Router::new(Config::ephemeral());
        let response = serde_json::to_value(router.handle_json(r#"{"command": "format-disk"}"#)).unwrap();
        assert_eq!(response["type"], "err");
        assert_eq!(response["detail"], "BAD_REQUEST");

        let response = serde_json::to_value(router.handle_json(r#"{"command": "retrieve-tables"}"#)).unwrap();
        assert_eq!(response["detail"], "CONNECTION");
    }
}
