use crate::error::EngineError;
use crate::sql::statement::Statement;
use crate::sql::value::GenericRow;

/// One checked-out connection to the relational engine.
pub trait Session {
    /// Run a statement that returns no rows; yields the affected row count.
    fn execute(&mut self, statement: &Statement) -> Result<u64, EngineError>;

    /// Run a row-returning statement (including `... RETURNING`).
    fn query(&mut self, statement: &Statement) -> Result<Vec<GenericRow>, EngineError>;

    /// Run a row-returning statement and keep the first row.
    fn query_one(&mut self, statement: &Statement) -> Result<Option<GenericRow>, EngineError> {
        Ok(self.query(statement)?.into_iter().next())
    }

    /// Run one or more statements through the simple query protocol.
    fn batch_execute(&mut self, sql: &str) -> Result<(), EngineError>;

    /// Open a transaction.
    fn begin(&mut self) -> Result<(), EngineError>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<(), EngineError>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<(), EngineError>;
}

/// Source of sessions, usually a connection pool.
pub trait Engine: Send + Sync {
    /// Session type handed out by this engine.
    type Session: Session;

    /// Check out a session, blocking while the pool is saturated.
    fn session(&self) -> Result<Self::Session, EngineError>;
}

/// Run `body` inside a transaction on `session`.
///
/// Commits when `body` succeeds and rolls back otherwise; a rollback failure is
/// logged and the original error is returned.
pub fn transaction<S, T, E>(
    session: &mut S,
    body: impl FnOnce(&mut S) -> Result<T, E>,
) -> Result<T, E>
where
    S: Session + ?Sized,
    E: From<EngineError>,
{
    session.begin()?;
    match body(session) {
        Ok(value) => {
            session.commit()?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = session.rollback() {
                tracing::warn!(%rollback_error, "rollback failed");
            }
            Err(error)
        }
    }
}

/// Read an integer column from a single-row result, as produced by `COUNT(*)`.
pub(crate) fn integer_column(row: &GenericRow, column: &str) -> Result<i64, EngineError> {
    row.get(column)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| EngineError::Decode(format!("expected integer column '{column}'")))
}

/// Read a boolean column from a single-row result, as produced by `EXISTS`.
pub(crate) fn bool_column(row: &GenericRow, column: &str) -> Result<bool, EngineError> {
    row.get(column)
        .and_then(serde_json::Value::as_bool)
        .ok_or_else(|| EngineError::Decode(format!("expected boolean column '{column}'")))
}
