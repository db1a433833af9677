//! Ad-hoc SQL execution behind the classifier and the write gate.

use serde::Serialize;
use serde_json::Value;

use crate::adhoc::classifier::{classify, ClassifierMode, StatementKind};
use crate::adhoc::gate::{Principal, WritePolicy};
use crate::engine::session::Session;
use crate::error::{EngineResultExt, Error, Result};
use crate::sql::statement::Statement;
use crate::sql::value::{GenericRow, SqlValue};

/// Result of an ad-hoc statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AdHocOutcome {
    /// Rows returned by a read-only statement.
    Rows {
        /// Returned rows in engine order.
        rows: Vec<GenericRow>,
    },
    /// Summary of a mutating statement.
    Command {
        /// Rows inserted, updated or deleted.
        rows_affected: u64,
        /// PostgreSQL-style command tag, e.g. `UPDATE 3`.
        command: String,
    },
}

/// Classify, gate and run `sql` with positional `args`.
pub fn execute<S: Session + ?Sized>(
    session: &mut S,
    sql: &str,
    args: &[Value],
    principal: Option<&Principal>,
    mode: ClassifierMode,
    write_policy: &dyn WritePolicy,
) -> Result<AdHocOutcome> {
    if sql.trim().is_empty() {
        return Err(Error::Validation("SQL query is required".to_string()));
    }

    let kind = classify(sql, mode);
    if kind == StatementKind::Mutating {
        let principal = principal.ok_or_else(|| {
            Error::AccessDenied("write operations require an authenticated principal".to_string())
        })?;
        if !write_policy.allows_write(principal) {
            tracing::warn!(subject = %principal.subject, role = %principal.role, "ad-hoc write denied");
            return Err(Error::AccessDenied(
                "access denied by row-level security policy for write operations".to_string(),
            ));
        }
    }

    let statement = Statement::raw(sql, args.iter().map(SqlValue::untyped_from_json).collect());
    match kind {
        StatementKind::ReadOnly => {
            let rows = session
                .query(&statement)
                .context(|| "executing ad-hoc query".to_string())?;
            Ok(AdHocOutcome::Rows { rows })
        }
        StatementKind::Mutating => {
            let rows_affected = session
                .execute(&statement)
                .context(|| "executing ad-hoc statement".to_string())?;
            Ok(AdHocOutcome::Command {
                rows_affected,
                command: command_tag(sql, rows_affected),
            })
        }
    }
}

/// Modifiers PostgreSQL leaves out of `CREATE ...` command tags.
const CREATE_MODIFIERS: &[&str] = &[
    "OR", "REPLACE", "UNIQUE", "TEMP", "TEMPORARY", "UNLOGGED", "GLOBAL", "LOCAL",
];

/// Approximate the command tag PostgreSQL reports for `sql`.
pub fn command_tag(sql: &str, rows_affected: u64) -> String {
    let mut words = sql
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|ch: char| !ch.is_ascii_alphabetic())
                .to_ascii_uppercase()
        })
        .filter(|word| !word.is_empty());
    let Some(verb) = words.next() else {
        return String::new();
    };

    match verb.as_str() {
        "INSERT" => format!("INSERT 0 {rows_affected}"),
        "UPDATE" | "DELETE" | "MERGE" | "SELECT" | "COPY" | "FETCH" | "MOVE" => {
            format!("{verb} {rows_affected}")
        }
        "CREATE" | "ALTER" | "DROP" => {
            match words.find(|word| !CREATE_MODIFIERS.contains(&word.as_str())) {
                Some(object) => format!("{verb} {object}"),
                None => verb,
            }
        }
        _ => verb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tags_follow_postgres_conventions() {
        assert_eq!(command_tag("insert into t values (1)", 1), "INSERT 0 1");
        assert_eq!(command_tag("UPDATE t SET a = 1", 3), "UPDATE 3");
        assert_eq!(command_tag("DELETE FROM t", 0), "DELETE 0");
        assert_eq!(command_tag("create or replace view v as select 1", 0), "CREATE VIEW");
        assert_eq!(command_tag("CREATE UNIQUE INDEX i ON t (a)", 0), "CREATE INDEX");
        assert_eq!(command_tag("DROP TABLE t;", 0), "DROP TABLE");
        assert_eq!(command_tag("TRUNCATE t", 0), "TRUNCATE");
    }
}
