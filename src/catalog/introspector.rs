//! Catalog queries against `information_schema` and `pg_catalog`.
//!
//! Every lookup is scoped to the configured schema and binds table names as
//! parameters, so no caller-supplied name reaches the SQL text here.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::catalog::types::{Column, ForeignKey, Index, SchemaSnapshot, TableSchema, TableSummary};
use crate::engine::session::{bool_column, integer_column, Session};
use crate::error::{EngineError, EngineResultExt, Error, Result};
use crate::sql::ident::Ident;
use crate::sql::statement::Fragment;
use crate::sql::value::GenericRow;

/// Column name assumed when a table has no primary key.
pub const FALLBACK_PRIMARY_KEY: &str = "id";

const LIST_TABLES: &str = "SELECT table_name::text AS name
FROM information_schema.tables
WHERE table_schema = ";

const LIST_COLUMNS: &str = "SELECT
    column_name::text AS name,
    data_type::text AS data_type,
    (is_nullable = 'YES') AS nullable,
    column_default::text AS \"default\",
    character_maximum_length::bigint AS max_length
FROM information_schema.columns
WHERE table_schema = ";

const PRIMARY_KEY: &str = "SELECT a.attname::text AS column_name
FROM pg_index i
JOIN pg_class c ON c.oid = i.indrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
WHERE i.indisprimary AND n.nspname = ";

const INDEXES: &str = "SELECT
    i.relname::text AS name,
    array_agg(a.attname::text ORDER BY array_position(ix.indkey::int2[], a.attnum)) AS columns,
    ix.indisunique AS \"unique\"
FROM pg_class t
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_index ix ON ix.indrelid = t.oid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
WHERE t.relkind IN ('r', 'p') AND n.nspname = ";

const FOREIGN_KEYS: &str = "SELECT
    tc.constraint_name::text AS name,
    kcu.column_name::text AS column_name,
    ccu.table_name::text AS reference_table,
    ccu.column_name::text AS reference_column
FROM information_schema.table_constraints AS tc
JOIN information_schema.key_column_usage AS kcu
    ON tc.constraint_name = kcu.constraint_name
    AND tc.table_schema = kcu.table_schema
JOIN information_schema.constraint_column_usage AS ccu
    ON ccu.constraint_name = tc.constraint_name
    AND ccu.table_schema = tc.table_schema
WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = ";

/// Schema introspection scoped to one PostgreSQL schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    schema: String,
}

impl Catalog {
    /// Introspect tables of `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// The schema this catalog looks at.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Schema-qualified, quoted identifier for `table`.
    pub fn relation(&self, table: &str) -> Ident {
        Ident::qualified(&self.schema, table)
    }

    /// Names of every table and view in the schema, sorted.
    pub fn list_tables<S: Session + ?Sized>(&self, session: &mut S) -> Result<Vec<String>> {
        let mut query = Fragment::new();
        query
            .sql(LIST_TABLES)
            .bind(self.schema.as_str())
            .sql(" ORDER BY table_name");
        let rows = session
            .query(&query.build())
            .context(|| "listing tables".to_string())?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Columns of `table` in ordinal order; empty when the table is missing.
    pub fn get_columns<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<Vec<Column>> {
        let mut query = Fragment::new();
        query
            .sql(LIST_COLUMNS)
            .bind(self.schema.as_str())
            .sql(" AND table_name = ")
            .bind(table)
            .sql(" ORDER BY ordinal_position");
        let rows = session
            .query(&query.build())
            .context(|| format!("reading columns of table {table}"))?;
        decode_rows(rows).context(|| format!("decoding columns of table {table}"))
    }

    /// Whether `table` exists in the schema.
    pub fn table_exists<S: Session + ?Sized>(&self, session: &mut S, table: &str) -> Result<bool> {
        let mut query = Fragment::new();
        query
            .sql("SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = ")
            .bind(self.schema.as_str())
            .sql(" AND table_name = ")
            .bind(table)
            .sql(") AS present");
        session
            .query_one(&query.build())
            .and_then(|row| match row {
                Some(row) => bool_column(&row, "present"),
                None => Ok(false),
            })
            .context(|| format!("checking whether table {table} exists"))
    }

    /// Fail with [`Error::NotFound`] unless `table` exists.
    pub fn require_table<S: Session + ?Sized>(&self, session: &mut S, table: &str) -> Result<()> {
        if self.table_exists(session, table)? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("table '{table}' not found")))
        }
    }

    /// Primary-key column of `table`, or [`FALLBACK_PRIMARY_KEY`] when it has
    /// none.
    ///
    /// Composite keys resolve to their first column.
    pub fn primary_key<S: Session + ?Sized>(&self, session: &mut S, table: &str) -> Result<String> {
        let mut query = Fragment::new();
        query
            .sql(PRIMARY_KEY)
            .bind(self.schema.as_str())
            .sql(" AND c.relname = ")
            .bind(table)
            .sql(" ORDER BY array_position(i.indkey::int2[], a.attnum)");
        let rows = session
            .query(&query.build())
            .context(|| format!("resolving primary key of table {table}"))?;

        let columns: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("column_name").and_then(Value::as_str))
            .collect();
        match columns.as_slice() {
            [] => {
                tracing::debug!(table, fallback = FALLBACK_PRIMARY_KEY, "no primary key");
                Ok(FALLBACK_PRIMARY_KEY.to_string())
            }
            [single] => Ok((*single).to_string()),
            [first, ..] => {
                tracing::warn!(
                    table,
                    key = ?columns,
                    "composite primary key, using its first column"
                );
                Ok((*first).to_string())
            }
        }
    }

    /// Indexes on `table`, sorted by name.
    pub fn indexes<S: Session + ?Sized>(&self, session: &mut S, table: &str) -> Result<Vec<Index>> {
        let mut query = Fragment::new();
        query
            .sql(INDEXES)
            .bind(self.schema.as_str())
            .sql(" AND t.relname = ")
            .bind(table)
            .sql(" GROUP BY i.relname, ix.indisunique ORDER BY i.relname");
        let rows = session
            .query(&query.build())
            .context(|| format!("reading indexes of table {table}"))?;
        decode_rows(rows).context(|| format!("decoding indexes of table {table}"))
    }

    /// Foreign keys declared on `table`.
    pub fn foreign_keys<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<Vec<ForeignKey>> {
        let mut query = Fragment::new();
        query
            .sql(FOREIGN_KEYS)
            .bind(self.schema.as_str())
            .sql(" AND tc.table_name = ")
            .bind(table)
            .sql(" ORDER BY tc.constraint_name, kcu.ordinal_position");
        let rows = session
            .query(&query.build())
            .context(|| format!("reading foreign keys of table {table}"))?;
        decode_rows(rows).context(|| format!("decoding foreign keys of table {table}"))
    }

    /// Columns and current row count of `table`.
    pub fn describe_table<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<TableSummary> {
        self.require_table(session, table)?;
        let columns = self.get_columns(session, table)?;

        let mut count = Fragment::new();
        count
            .sql("SELECT COUNT(*) AS total FROM ")
            .ident(&self.relation(table));
        let row_count = session
            .query_one(&count.build())
            .and_then(|row| row.map_or(Ok(0), |row| integer_column(&row, "total")))
            .context(|| format!("counting rows of table {table}"))?;

        Ok(TableSummary {
            name: table.to_string(),
            columns,
            row_count,
        })
    }

    /// Columns, indexes and foreign keys of every table.
    pub fn schema_snapshot<S: Session + ?Sized>(&self, session: &mut S) -> Result<SchemaSnapshot> {
        let mut snapshot = SchemaSnapshot::default();
        for name in self.list_tables(session)? {
            let columns = self.get_columns(session, &name)?;
            let indexes = self.indexes(session, &name)?;
            let foreign_keys = self.foreign_keys(session, &name)?;
            snapshot.tables.push(TableSchema {
                name,
                columns,
                indexes,
                foreign_keys,
            });
        }
        Ok(snapshot)
    }
}

/// Deserialize generic rows into a typed catalog record.
pub(crate) fn decode_rows<T: DeserializeOwned>(
    rows: Vec<GenericRow>,
) -> std::result::Result<Vec<T>, EngineError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(EngineError::from))
        .collect()
}
