//! PostgreSQL engine backed by diesel and an r2d2 pool.
//!
//! Row-returning statements are wrapped so that PostgreSQL renders each tuple
//! with `row_to_json`; the session then only ever loads a single text column
//! and hands back [`GenericRow`]s in column order.
//!
//! Statements carrying [`SqlValue::Untyped`] arguments go through SQL-level
//! `PREPARE`/`EXECUTE` instead of protocol binds: diesel declares a type for
//! every bind, while `EXECUTE` passes untyped literals and lets the server
//! infer each parameter from its use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use diesel::connection::{Connection, SimpleConnection, TransactionManager};
use diesel::pg::{Pg, PgConnection};
use diesel::query_builder::BoxedSqlQuery;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Bool, Double, Jsonb, Nullable, Text};
use diesel::{QueryableByName, RunQueryDsl};

use crate::config::DatabaseConfig;
use crate::engine::session::{Engine, Session};
use crate::error::EngineError;
use crate::sql::ident::quote_escaped_literal;
use crate::sql::statement::Statement;
use crate::sql::value::{GenericRow, SqlValue};

type PgPool = Pool<ConnectionManager<PgConnection>>;
type BoxedQuery<'a> = BoxedSqlQuery<'a, Pg, diesel::query_builder::SqlQuery>;

/// Pooled PostgreSQL engine.
#[derive(Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    /// Build the pool and open its initial connections.
    ///
    /// Building fails when no connection can be established within the
    /// checkout timeout, which doubles as the startup ping.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, EngineError> {
        let pool_config = &config.pool;
        let max_size = pool_config.max_connections.max(1);
        let min_idle = pool_config.max_idle.min(max_size);

        let manager = ConnectionManager::<PgConnection>::new(config.connection_url());
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(min_idle))
            .max_lifetime(Some(Duration::from_secs(
                pool_config.max_lifetime_minutes.saturating_mul(60),
            )))
            .connection_timeout(Duration::from_secs(pool_config.checkout_timeout_secs.max(1)))
            .build(manager)
            .map_err(|error| EngineError::Pool(error.to_string()))?;

        tracing::info!(
            host = %config.host,
            database = %config.name,
            max_connections = max_size,
            "connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Wrap an already-built pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Engine for PgEngine {
    type Session = PgSession;

    fn session(&self) -> Result<PgSession, EngineError> {
        let conn = self
            .pool
            .get()
            .map_err(|error| EngineError::Pool(error.to_string()))?;
        Ok(PgSession { conn })
    }
}

/// One pooled PostgreSQL connection.
pub struct PgSession {
    conn: PooledConnection<ConnectionManager<PgConnection>>,
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Text)]
    rowgate_row: String,
}

static NEXT_PREPARED: AtomicU64 = AtomicU64::new(0);

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Wrap a row-returning statement so each tuple comes back as JSON text.
fn wrap_row_query(sql: &str) -> String {
    let inner = trim_statement(sql);
    format!(
        "WITH rowgate_q AS ({inner}) SELECT row_to_json(rowgate_q)::text AS rowgate_row FROM rowgate_q"
    )
}

fn has_untyped(args: &[SqlValue]) -> bool {
    args.iter().any(|arg| matches!(arg, SqlValue::Untyped(_)))
}

/// A bind value as an `EXECUTE` argument. Everything but `NULL` becomes a
/// string literal of unknown type, converted to the parameter's inferred type.
fn argument_literal(arg: &SqlValue) -> String {
    match arg {
        SqlValue::Null | SqlValue::Untyped(None) => "NULL".to_string(),
        SqlValue::Bool(value) => quote_escaped_literal(&value.to_string()),
        SqlValue::Int(value) => quote_escaped_literal(&value.to_string()),
        SqlValue::Float(value) => quote_escaped_literal(&value.to_string()),
        SqlValue::Text(value) | SqlValue::Untyped(Some(value)) => quote_escaped_literal(value),
        SqlValue::Json(value) => quote_escaped_literal(&value.to_string()),
    }
}

/// `EXECUTE <name>(<literals>)`.
fn execute_call(name: &str, args: &[SqlValue]) -> String {
    if args.is_empty() {
        return format!("EXECUTE {name}");
    }
    let literals: Vec<String> = args.iter().map(argument_literal).collect();
    format!("EXECUTE {name}({})", literals.join(", "))
}

fn bind_all<'a>(sql: String, args: &[SqlValue]) -> BoxedQuery<'a> {
    let mut query = diesel::sql_query(sql).into_boxed::<Pg>();
    for arg in args {
        query = match arg.clone() {
            SqlValue::Null => query.bind::<Nullable<Text>, _>(None::<String>),
            SqlValue::Bool(value) => query.bind::<Bool, _>(value),
            SqlValue::Int(value) => query.bind::<BigInt, _>(value),
            SqlValue::Float(value) => query.bind::<Double, _>(value),
            SqlValue::Text(value) => query.bind::<Text, _>(value),
            SqlValue::Json(value) => query.bind::<Jsonb, _>(value),
            SqlValue::Untyped(value) => query.bind::<Nullable<Text>, _>(value),
        };
    }
    query
}

impl PgSession {
    /// Prepare `body` under a fresh name, run `run` with the matching
    /// `EXECUTE` text, then deallocate.
    fn with_prepared<T>(
        &mut self,
        body: &str,
        args: &[SqlValue],
        run: impl FnOnce(&mut PgConnection, &str) -> Result<T, DieselError>,
    ) -> Result<T, EngineError> {
        let name = format!(
            "rowgate_adhoc_{}",
            NEXT_PREPARED.fetch_add(1, Ordering::Relaxed)
        );
        self.conn.batch_execute(&format!("PREPARE {name} AS {body}"))?;
        let result = run(&mut *self.conn, &execute_call(&name, args));
        if let Err(error) = self.conn.batch_execute(&format!("DEALLOCATE {name}")) {
            tracing::warn!(%error, statement = %name, "deallocating prepared statement failed");
        }
        Ok(result?)
    }
}

impl Session for PgSession {
    fn execute(&mut self, statement: &Statement) -> Result<u64, EngineError> {
        tracing::debug!(sql = statement.sql(), binds = statement.args().len(), "execute");
        let affected = if has_untyped(statement.args()) {
            self.with_prepared(trim_statement(statement.sql()), statement.args(), |conn, call| {
                diesel::sql_query(call).execute(conn)
            })?
        } else {
            bind_all(statement.sql().to_string(), statement.args()).execute(&mut *self.conn)?
        };
        Ok(u64::try_from(affected).unwrap_or(u64::MAX))
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<GenericRow>, EngineError> {
        tracing::debug!(sql = statement.sql(), binds = statement.args().len(), "query");
        let rows: Vec<JsonRow> = if has_untyped(statement.args()) {
            self.with_prepared(&wrap_row_query(statement.sql()), statement.args(), |conn, call| {
                diesel::sql_query(call).load(conn)
            })?
        } else {
            bind_all(wrap_row_query(statement.sql()), statement.args()).load(&mut *self.conn)?
        };
        rows.into_iter()
            .map(|row| serde_json::from_str::<GenericRow>(&row.rowgate_row).map_err(Into::into))
            .collect()
    }

    fn batch_execute(&mut self, sql: &str) -> Result<(), EngineError> {
        tracing::debug!(sql, "batch execute");
        self.conn.batch_execute(sql)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), EngineError> {
        <PgConnection as Connection>::TransactionManager::begin_transaction(&mut *self.conn)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), EngineError> {
        <PgConnection as Connection>::TransactionManager::commit_transaction(&mut *self.conn)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), EngineError> {
        <PgConnection as Connection>::TransactionManager::rollback_transaction(&mut *self.conn)?;
        Ok(())
    }
}

impl From<DieselError> for EngineError {
    fn from(error: DieselError) -> Self {
        match error {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                EngineError::UniqueViolation(info.message().to_string())
            }
            DieselError::DatabaseError(_, info) => {
                let mut message = info.message().to_string();
                if let Some(details) = info.details() {
                    message.push_str(": ");
                    message.push_str(details);
                }
                EngineError::Database(message)
            }
            other => EngineError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_queries_are_wrapped_without_trailing_semicolon() {
        assert_eq!(
            wrap_row_query("SELECT 1 AS one;  "),
            "WITH rowgate_q AS (SELECT 1 AS one) SELECT row_to_json(rowgate_q)::text AS rowgate_row FROM rowgate_q"
        );
    }

    #[test]
    fn untyped_arguments_are_passed_as_execute_literals() {
        let args = [
            SqlValue::Untyped(Some("1".to_string())),
            SqlValue::Untyped(Some("it's".to_string())),
            SqlValue::Untyped(None),
            SqlValue::Int(7),
        ];
        assert!(has_untyped(&args));
        assert_eq!(
            execute_call("rowgate_adhoc_3", &args),
            "EXECUTE rowgate_adhoc_3(E'1', E'it''s', NULL, E'7')"
        );
        assert_eq!(execute_call("rowgate_adhoc_4", &[]), "EXECUTE rowgate_adhoc_4");
        assert!(!has_untyped(&[SqlValue::Text("x".to_string())]));
    }
}
