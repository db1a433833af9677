//! Generic row access for any table of the exposed schema.

/// SELECT and COUNT statement building.
pub mod builder;
/// INSERT, UPDATE and DELETE statement building.
pub mod mutator;

use serde::Serialize;

use crate::catalog::introspector::Catalog;
use crate::catalog::types::Column;
use crate::config::QueryConfig;
use crate::engine::session::{integer_column, Session};
use crate::error::{EngineResultExt, Error, Result};
use crate::query::params::QueryParams;
use crate::rows::builder::{by_id_statement, RowQuery};
use crate::rows::mutator::{delete_statement, insert_statement, known_columns, update_statement};
use crate::sql::value::GenericRow;

/// One page of rows plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowPage {
    /// Rows on this page.
    pub rows: Vec<GenericRow>,
    /// Rows matching the filters across all pages.
    pub total: i64,
    /// One-based page number.
    pub page: u64,
    /// Requested page size.
    pub page_size: u64,
    /// `ceil(total / page_size)`.
    pub total_pages: u64,
}

/// Optional projection and join for a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Columns to return; empty returns every column of the base table.
    pub columns: Vec<String>,
    /// Trusted join clause appended after the base table.
    pub join: Option<String>,
}

/// Row operations bound to a catalog and query settings.
#[derive(Debug, Clone, Copy)]
pub struct RowService<'a> {
    catalog: &'a Catalog,
    config: &'a QueryConfig,
}

impl<'a> RowService<'a> {
    /// Row operations over `catalog`'s schema.
    pub fn new(catalog: &'a Catalog, config: &'a QueryConfig) -> Self {
        Self { catalog, config }
    }

    /// Filtered, sorted, paginated listing with a total count.
    pub fn query<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
        params: &QueryParams,
        selection: &Selection,
    ) -> Result<RowPage> {
        self.catalog.require_table(session, table)?;
        let primary_key = self.catalog.primary_key(session, table)?;

        let mut query = RowQuery::new(
            self.catalog.relation(table),
            primary_key,
            &self.config.search_language,
        )
        .select(&selection.columns)?;
        if let Some(join) = &selection.join {
            query = query.join(join)?;
        }
        if !params.filters.is_empty() {
            let columns = self.catalog.get_columns(session, table)?;
            query = query.with_json_columns(
                columns
                    .into_iter()
                    .filter(Column::is_json)
                    .map(|column| column.name),
            );
        }

        let rows = session
            .query(&query.select_statement(params)?)
            .context(|| format!("querying table {table}"))?;
        let total = session
            .query_one(&query.count_statement(params)?)
            .and_then(|row| row.map_or(Ok(0), |row| integer_column(&row, "total")))
            .context(|| format!("counting rows of table {table}"))?;

        let page_size = params.pagination.page_size;
        let total_pages = total.max(0).unsigned_abs().div_ceil(page_size.max(1));
        Ok(RowPage {
            rows,
            total,
            page: params.pagination.page,
            page_size,
            total_pages,
        })
    }

    /// The row whose primary key equals `id`.
    pub fn get_by_id<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
        id: &str,
    ) -> Result<GenericRow> {
        self.catalog.require_table(session, table)?;
        let primary_key = self.catalog.primary_key(session, table)?;
        let statement = by_id_statement(&self.catalog.relation(table), &primary_key, id);
        session
            .query_one(&statement)
            .context(|| format!("fetching row {id} of table {table}"))?
            .ok_or_else(|| row_not_found(table, id))
    }

    /// Insert the payload entries that name existing columns.
    pub fn insert<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
        payload: &GenericRow,
    ) -> Result<GenericRow> {
        self.catalog.require_table(session, table)?;
        let columns = self.catalog.get_columns(session, table)?;
        let values = known_columns(payload, &columns);
        let skipped = payload.len() - values.len();
        if skipped > 0 {
            tracing::debug!(table, skipped, "ignoring payload keys with no matching column");
        }

        let statement = insert_statement(&self.catalog.relation(table), &values)?;
        session
            .query_one(&statement)
            .context(|| format!("inserting into table {table}"))?
            .ok_or_else(|| Error::NotFound(format!("insert into '{table}' returned no row")))
    }

    /// Apply `changes` to the row whose primary key equals `id`.
    pub fn update<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
        id: &str,
        changes: &GenericRow,
    ) -> Result<GenericRow> {
        self.catalog.require_table(session, table)?;
        let primary_key = self.catalog.primary_key(session, table)?;
        let statement =
            update_statement(&self.catalog.relation(table), &primary_key, id, changes)?;
        session
            .query_one(&statement)
            .context(|| format!("updating row {id} of table {table}"))?
            .ok_or_else(|| row_not_found(table, id))
    }

    /// Delete the row whose primary key equals `id` and return it.
    pub fn delete<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
        id: &str,
    ) -> Result<GenericRow> {
        self.catalog.require_table(session, table)?;
        let primary_key = self.catalog.primary_key(session, table)?;
        let statement = delete_statement(&self.catalog.relation(table), &primary_key, id);
        session
            .query_one(&statement)
            .context(|| format!("deleting row {id} of table {table}"))?
            .ok_or_else(|| row_not_found(table, id))
    }
}

fn row_not_found(table: &str, id: &str) -> Error {
    Error::NotFound(format!("row '{id}' not found in table '{table}'"))
}
