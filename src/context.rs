//! Process-wide entry point.
//!
//! A [`Context`] is built once at startup from an engine and configuration
//! and passed to whatever serves requests. Every public operation checks out
//! one session for its duration.

use serde_json::Value;
use uuid::Uuid;

use crate::adhoc::executor::{self, AdHocOutcome};
use crate::adhoc::gate::{self, Principal, WritePolicy};
use crate::catalog::introspector::Catalog;
use crate::catalog::types::{Column, SchemaSnapshot, TableSummary};
use crate::config::QueryConfig;
use crate::engine::migrations::{run_pending, MIGRATIONS};
use crate::engine::session::Engine;
use crate::error::{EngineResultExt, Result};
use crate::policy::manager::PolicyManager;
use crate::policy::model::{PolicyRecord, PolicyRequest};
use crate::query::params::QueryParams;
use crate::rows::{RowPage, RowService, Selection};
use crate::sql::value::GenericRow;

/// Engine, configuration, catalog and write gate shared by all operations.
pub struct Context<E: Engine> {
    engine: E,
    config: QueryConfig,
    catalog: Catalog,
    write_policy: Box<dyn WritePolicy>,
}

impl<E: Engine> Context<E> {
    /// Build a context; the write gate comes from `config.write_roles`.
    pub fn new(engine: E, config: QueryConfig) -> Self {
        let write_policy = gate::from_roles(&config.write_roles);
        Self::with_write_policy(engine, config, write_policy)
    }

    /// Build a context with an explicit write gate.
    pub fn with_write_policy(
        engine: E,
        config: QueryConfig,
        write_policy: Box<dyn WritePolicy>,
    ) -> Self {
        let catalog = Catalog::new(config.schema.clone());
        Self {
            engine,
            config,
            catalog,
            write_policy,
        }
    }

    /// Query settings in effect.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// The underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn session(&self) -> Result<E::Session> {
        self.engine
            .session()
            .context(|| "checking out a connection".to_string())
    }

    fn rows(&self) -> RowService<'_> {
        RowService::new(&self.catalog, &self.config)
    }

    fn policies(&self) -> PolicyManager<'_> {
        PolicyManager::new(&self.catalog)
    }

    /// Apply pending embedded migrations; returns the versions applied.
    pub fn run_migrations(&self) -> Result<Vec<&'static str>> {
        run_pending(&mut self.session()?, MIGRATIONS)
    }

    /// Tables of the exposed schema.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.catalog.list_tables(&mut self.session()?)
    }

    /// Columns of `table`.
    pub fn get_columns(&self, table: &str) -> Result<Vec<Column>> {
        self.catalog.get_columns(&mut self.session()?, table)
    }

    /// Columns and row count of `table`.
    pub fn describe_table(&self, table: &str) -> Result<TableSummary> {
        self.catalog.describe_table(&mut self.session()?, table)
    }

    /// Columns, indexes and foreign keys of every table.
    pub fn schema_snapshot(&self) -> Result<SchemaSnapshot> {
        self.catalog.schema_snapshot(&mut self.session()?)
    }

    /// Filtered, sorted, paginated rows of `table` from request pairs.
    pub fn query_rows<'a, I>(&self, table: &str, pairs: I) -> Result<RowPage>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.query_rows_with(table, pairs, &Selection::default())
    }

    /// [`Context::query_rows`] with a projection and join.
    pub fn query_rows_with<'a, I>(
        &self,
        table: &str,
        pairs: I,
        selection: &Selection,
    ) -> Result<RowPage>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let params = QueryParams::parse(pairs, &self.config)?;
        self.rows()
            .query(&mut self.session()?, table, &params, selection)
    }

    /// One row of `table` by primary key.
    pub fn get_row_by_id(&self, table: &str, id: &str) -> Result<GenericRow> {
        self.rows().get_by_id(&mut self.session()?, table, id)
    }

    /// Insert a row from an untyped payload.
    pub fn insert_row(&self, table: &str, payload: &GenericRow) -> Result<GenericRow> {
        self.rows().insert(&mut self.session()?, table, payload)
    }

    /// Update one row of `table` by primary key.
    pub fn update_row(&self, table: &str, id: &str, changes: &GenericRow) -> Result<GenericRow> {
        self.rows().update(&mut self.session()?, table, id, changes)
    }

    /// Delete one row of `table` by primary key and return it.
    pub fn delete_row(&self, table: &str, id: &str) -> Result<GenericRow> {
        self.rows().delete(&mut self.session()?, table, id)
    }

    /// Run caller-supplied SQL, gating writes on `principal`.
    pub fn execute_ad_hoc(
        &self,
        sql: &str,
        args: &[Value],
        principal: Option<&Principal>,
    ) -> Result<AdHocOutcome> {
        executor::execute(
            &mut self.session()?,
            sql,
            args,
            principal,
            self.config.classifier,
            self.write_policy.as_ref(),
        )
    }

    /// Policies, optionally only those on `table`.
    pub fn list_policies(&self, table: Option<&str>) -> Result<Vec<PolicyRecord>> {
        self.policies().list(&mut self.session()?, table)
    }

    /// One policy by id.
    pub fn get_policy(&self, id: Uuid) -> Result<PolicyRecord> {
        self.policies().get(&mut self.session()?, id)
    }

    /// Create a policy and its enforcement object.
    pub fn create_policy(&self, request: &PolicyRequest) -> Result<PolicyRecord> {
        self.policies().create(&mut self.session()?, request)
    }

    /// Replace a policy and its enforcement object.
    pub fn update_policy(&self, id: Uuid, request: &PolicyRequest) -> Result<PolicyRecord> {
        self.policies().update(&mut self.session()?, id, request)
    }

    /// Drop a policy's enforcement object and delete its metadata.
    pub fn delete_policy(&self, id: Uuid) -> Result<PolicyRecord> {
        self.policies().delete(&mut self.session()?, id)
    }
}
