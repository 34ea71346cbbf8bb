use crate::types::ForeignKeyViolation;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

// Extended result codes not re-exported by every libsqlite3-sys build
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;
const SQLITE_CONSTRAINT_DATATYPE: i32 = 3091;

/// Why the engine rejected a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    Unique,
    TypeMismatch,
    Unknown,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::TypeMismatch => "TYPE_MISMATCH",
            ConstraintKind::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Connection(String),

    #[error("Constraint violation ({kind}): {message}")]
    Constraint { kind: ConstraintKind, message: String },

    /// The write was kept; the listed cells hold dangling references
    #[error("Foreign key violation in {table}: {} dangling reference(s)", violations.len())]
    ForeignKey {
        table: String,
        violations: Vec<ForeignKeyViolation>,
    },

    #[error("Cannot save: {} unresolved foreign key violation(s)", violations.len())]
    UnresolvedViolations { violations: Vec<ForeignKeyViolation> },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("{0}")]
    Sql(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T, E = StageError> = std::result::Result<T, E>;

impl StageError {
    pub fn connection(message: impl Into<String>) -> Self {
        StageError::Connection(message.into())
    }

    pub fn table_not_found(name: &str) -> Self {
        StageError::NotFound {
            kind: "Table",
            name: name.to_string(),
        }
    }

    pub fn column_not_found(table: &str, column: &str) -> Self {
        StageError::NotFound {
            kind: "Column",
            name: format!("{}.{}", table, column),
        }
    }

    /// Classify an engine error raised while running `query`
    pub fn from_sqlite(error: rusqlite::Error, query: &str) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(err, msg) => {
                let message = msg.clone().unwrap_or_else(|| err.to_string());
                match (err.code, err.extended_code) {
                    (_, SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY) => {
                        StageError::Constraint {
                            kind: ConstraintKind::Unique,
                            message,
                        }
                    }
                    (_, SQLITE_CONSTRAINT_DATATYPE) | (rusqlite::ErrorCode::TypeMismatch, _) => {
                        StageError::Constraint {
                            kind: ConstraintKind::TypeMismatch,
                            message,
                        }
                    }
                    (rusqlite::ErrorCode::ConstraintViolation, _) => StageError::Constraint {
                        kind: ConstraintKind::Unknown,
                        message,
                    },
                    _ => StageError::Sql(format_sql_error(&error, query)),
                }
            }
            _ => StageError::Sql(format_sql_error(&error, query)),
        }
    }

    /// Tag sent to the UI alongside the message
    pub fn detail(&self) -> &'static str {
        match self {
            StageError::Connection(_) => "CONNECTION",
            StageError::Constraint { kind, .. } => match kind {
                ConstraintKind::Unique => "UNIQUE",
                ConstraintKind::TypeMismatch => "TYPE_MISMATCH",
                ConstraintKind::Unknown => "UNKNOWN",
            },
            StageError::ForeignKey { .. } => "FOREIGN_KEY",
            StageError::UnresolvedViolations { .. } => "UNRESOLVED_VIOLATIONS",
            StageError::NotFound { .. } => "NOT_FOUND",
            StageError::MissingArgument(_) => "MISSING_ARGUMENT",
            StageError::Sql(_) => "SQL",
            StageError::Csv(_) => "CSV",
        }
    }

    pub fn violations(&self) -> Option<&[ForeignKeyViolation]> {
        match self {
            StageError::ForeignKey { violations, .. }
            | StageError::UnresolvedViolations { violations } => Some(violations),
            _ => None,
        }
    }
}

/// Extension for attaching the failing statement to engine errors
pub trait SqlContext<T> {
    fn sql_context(self, query: &str) -> Result<T>;
}

impl<T> SqlContext<T> for std::result::Result<T, rusqlite::Error> {
    fn sql_context(self, query: &str) -> Result<T> {
        self.map_err(|e| StageError::from_sqlite(e, query))
    }
}

/// User-friendly SQL error formatting
pub fn format_sql_error(error: &rusqlite::Error, query: &str) -> String {
    match error {
        rusqlite::Error::SqliteFailure(err, Some(msg)) => {
            format_sqlite_error(err.extended_code, msg, query)
        }
        rusqlite::Error::SqliteFailure(err, None) => {
            format!("SQL error (code {}): {}", err.extended_code, err)
        }
        rusqlite::Error::InvalidColumnName(name) => {
            format!("Unknown column: '{}'", name)
        }
        rusqlite::Error::InvalidColumnType(_, expected, actual) => {
            format!("Type mismatch: expected {}, got {}", expected, actual)
        }
        rusqlite::Error::QueryReturnedNoRows => "Query returned no rows".to_string(),
        rusqlite::Error::MultipleStatement => {
            "Only one statement can be executed at a time".to_string()
        }
        _ => format!("SQL error: {}\n\nQuery: {}", error, truncate_query(query)),
    }
}

fn format_sqlite_error(code: i32, message: &str, query: &str) -> String {
    let mut result = String::new();

    // Primary result code lives in the low byte
    match code & 0xff {
        1 => {
            if let Some(table) = message.strip_prefix("no such table: ") {
                result.push_str(&format!("Unknown table: {}\n", table));
            } else if let Some(column) = message.strip_prefix("no such column: ") {
                result.push_str(&format!("Unknown column: {}\n", column));
            } else {
                result.push_str(&format!("SQL error: {}\n", message));
            }
        }
        5 => {
            result.push_str("Database is locked\n\n");
            result.push_str("Another process is using the database. Try again in a moment.");
        }
        8 => result.push_str("Database is read-only\n"),
        19 => result.push_str(&format!("Constraint violation: {}\n", message)),
        _ => result.push_str(&format!("SQL error (code {}): {}\n", code, message)),
    }

    result.push_str(&format!("\nQuery: {}", truncate_query(query)));
    result
}

fn truncate_query(query: &str) -> String {
    if query.chars().count() > 100 {
        let head: String = query.chars().take(97).collect();
        format!("{}...", head)
    } else {
        query.to_string()
    }
}
