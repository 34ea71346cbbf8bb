use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared column type, normalized to SQLite's affinity classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
}

impl ColumnType {
    /// Apply SQLite's affinity rules (section 3.1 of the datatype docs)
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            ColumnType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Real
        } else {
            ColumnType::Numeric
        }
    }

    /// Placeholder used for NOT NULL columns that have no default
    pub fn sentinel(self) -> Value {
        match self {
            ColumnType::Integer | ColumnType::Numeric => Value::Integer(0),
            ColumnType::Real => Value::Real(0.0),
            ColumnType::Text => Value::Text(String::new()),
            ColumnType::Blob => Value::Blob(Vec::new()),
        }
    }
}

/// Parent side of a foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

impl fmt::Display for ForeignKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Information about a table column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub declared_type: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub unique: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub foreign_key: Option<ForeignKeyRef>,
}

/// Structure of a table, derived from the catalog on every call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Single-column primary key; `None` for composite keys or rowid-only tables
    pub primary_key: Option<String>,
    pub auto_increment: bool,
    pub without_rowid: bool,
    pub sql: Option<String>,
}

impl TableDescriptor {
    /// Column by name, matched ASCII case-insensitively like SQLite does
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column used to address rows: the primary key, or `rowid`
    pub fn row_key(&self) -> &str {
        self.primary_key.as_deref().unwrap_or("rowid")
    }
}

/// Table listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: Option<u64>,
}

/// Per-column constraint flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnConstraints {
    pub not_null: bool,
    pub unique: bool,
    pub default_value: Option<String>,
}

/// Summary returned for `get-table-meta`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub sql: Option<String>,
    pub primary_key: Option<String>,
    pub auto_increment: bool,
}

/// Summary returned for `new-row-meta`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRowMeta {
    pub columns: Vec<String>,
    pub types: Vec<ColumnType>,
    pub primary_key: Option<String>,
    pub defaults: Vec<Option<String>>,
    pub auto_increment: bool,
    pub last_id: i64,
}

/// A dangling reference reported by `PRAGMA foreign_key_check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyViolation {
    pub table: String,
    /// `None` for WITHOUT ROWID tables
    pub rowid: Option<i64>,
    pub column: String,
    pub parent: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_follows_sqlite_rules() {
        assert_eq!(ColumnType::from_declared("BIGINT"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("varchar(20)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared(""), ColumnType::Blob);
        assert_eq!(ColumnType::from_declared("DOUBLE PRECISION"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("DECIMAL(10,2)"), ColumnType::Numeric);
        // "POINT" contains INT, as in SQLite itself
        assert_eq!(ColumnType::from_declared("POINT"), ColumnType::Integer);
    }
}
