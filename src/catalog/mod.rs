/// Catalog queries for tables, columns, keys and indexes.
pub mod introspector;
/// Serializable catalog records.
pub mod types;
