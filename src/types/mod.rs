pub mod query;
pub mod table;

pub use query::{QueryResult, SqlOutcome, Value};
pub use table::{
    ColumnConstraints, ColumnDescriptor, ColumnType, ForeignKeyRef, ForeignKeyViolation,
    NewRowMeta, TableDescriptor, TableInfo, TableMeta,
};
