//! INSERT, UPDATE and DELETE statements built from untyped payloads.
//!
//! Payload values travel as a single `jsonb` document and are expanded with
//! `jsonb_populate_record`, so PostgreSQL converts each value to its column's
//! declared type.

use serde_json::Value;

use crate::catalog::types::Column;
use crate::error::{Error, Result};
use crate::rows::builder::key_predicate;
use crate::sql::ident::Ident;
use crate::sql::statement::{Fragment, Statement};
use crate::sql::value::GenericRow;

/// Keep only payload entries whose key names one of `columns`.
pub fn known_columns(payload: &GenericRow, columns: &[Column]) -> GenericRow {
    payload
        .iter()
        .filter(|(key, _)| columns.iter().any(|column| &column.name == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn column_list(names: &[Ident]) -> Fragment {
    let mut list = Fragment::new();
    for (idx, name) in names.iter().enumerate() {
        if idx > 0 {
            list.sql(", ");
        }
        list.ident(name);
    }
    list
}

/// `INSERT INTO <table> (<cols>) SELECT <cols> FROM jsonb_populate_record(..) RETURNING *`.
///
/// `values` must already be filtered to known columns.
pub fn insert_statement(relation: &Ident, values: &GenericRow) -> Result<Statement> {
    if values.is_empty() {
        return Err(Error::Validation(
            "no valid columns provided for insert".to_string(),
        ));
    }
    let names: Vec<Ident> = values.keys().map(|key| Ident::new(key)).collect();
    let columns = column_list(&names);

    let mut query = Fragment::new();
    query
        .sql("INSERT INTO ")
        .ident(relation)
        .sql(" (")
        .append(&columns)
        .sql(") SELECT ")
        .append(&columns)
        .sql(" FROM jsonb_populate_record(NULL::")
        .ident(relation)
        .sql(", ")
        .bind(Value::Object(values.clone()))
        .sql(") RETURNING *");
    Ok(query.build())
}

/// `UPDATE <table> AS t SET .. FROM jsonb_populate_record(..) AS r WHERE t."<pk>" = .. RETURNING t.*`.
pub fn update_statement(
    relation: &Ident,
    primary_key: &str,
    id: &str,
    changes: &GenericRow,
) -> Result<Statement> {
    if changes.is_empty() {
        return Err(Error::Validation("no columns provided for update".to_string()));
    }

    let assignments: Vec<Fragment> = changes
        .keys()
        .map(|key| {
            let column = Ident::new(key);
            let mut assignment = Fragment::new();
            assignment
                .ident(&column)
                .sql(" = r.")
                .ident(&column);
            assignment
        })
        .collect();

    let mut query = Fragment::new();
    query
        .sql("UPDATE ")
        .ident(relation)
        .sql(" AS t SET ")
        .append(&Fragment::join(&assignments, ", "))
        .sql(" FROM jsonb_populate_record(NULL::")
        .ident(relation)
        .sql(", ")
        .bind(Value::Object(changes.clone()))
        .sql(") AS r WHERE ")
        .append(&key_predicate(relation, primary_key, id))
        .sql(" RETURNING t.*");
    Ok(query.build())
}

/// `DELETE FROM <table> AS t WHERE t."<pk>" = .. RETURNING t.*`.
pub fn delete_statement(relation: &Ident, primary_key: &str, id: &str) -> Statement {
    let mut query = Fragment::new();
    query
        .sql("DELETE FROM ")
        .ident(relation)
        .sql(" AS t WHERE ")
        .append(&key_predicate(relation, primary_key, id))
        .sql(" RETURNING t.*");
    query.build()
}
