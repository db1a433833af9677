use serde::{Deserialize, Serialize};

/// A column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared type, e.g. `integer` or `character varying`.
    pub data_type: String,
    /// Whether the column accepts `NULL`.
    pub nullable: bool,
    /// Default expression, if any.
    pub default: Option<String>,
    /// Maximum character length for bounded text types.
    pub max_length: Option<i64>,
}

impl Column {
    /// Declared `json` or `jsonb`.
    pub fn is_json(&self) -> bool {
        matches!(self.data_type.as_str(), "json" | "jsonb")
    }
}

/// An index on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// A single-column foreign-key reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Referencing column on this table.
    pub column_name: String,
    /// Referenced table.
    pub reference_table: String,
    /// Referenced column.
    pub reference_column: String,
}

/// Columns and row count of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    /// Table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<Column>,
    /// Current number of rows.
    pub row_count: i64,
}

/// Full description of one table inside a [`SchemaSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<Column>,
    /// Indexes, including the primary key index.
    pub indexes: Vec<Index>,
    /// Outgoing foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
}

/// Every table of the exposed schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Tables in name order.
    pub tables: Vec<TableSchema>,
}
