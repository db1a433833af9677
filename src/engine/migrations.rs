//! Embedded schema migrations.

use crate::engine::session::{transaction, Session};
use crate::error::{EngineResultExt, Result};
use crate::sql::statement::{Fragment, Statement};

/// One embedded migration script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Sortable version, the script's file stem.
    pub version: &'static str,
    /// SQL run through the simple query protocol.
    pub sql: &'static str,
}

impl Migration {
    /// Human-readable description derived from the version.
    pub fn description(&self) -> String {
        self.version.replace('_', " ")
    }
}

/// Migrations shipped with the crate, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_create_rls_policies",
        sql: include_str!("../../migrations/001_create_rls_policies.sql"),
    },
    Migration {
        version: "002_rls_policies_updated_at_trigger",
        sql: include_str!("../../migrations/002_rls_policies_updated_at_trigger.sql"),
    },
];

const CREATE_TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

/// Apply every migration in `migrations` whose version is not yet recorded.
///
/// Each pending migration runs in its own transaction together with the row
/// that records it. Returns the versions applied by this call.
pub fn run_pending<S: Session + ?Sized>(
    session: &mut S,
    migrations: &[Migration],
) -> Result<Vec<&'static str>> {
    session
        .batch_execute(CREATE_TRACKING_TABLE)
        .context(|| "creating schema_migrations".to_string())?;

    let applied = session
        .query(&Statement::fixed(
            "SELECT version FROM schema_migrations ORDER BY version",
        ))
        .context(|| "reading applied migrations".to_string())?;
    let applied: Vec<&str> = applied
        .iter()
        .filter_map(|row| row.get("version").and_then(serde_json::Value::as_str))
        .collect();

    let mut pending: Vec<&Migration> = migrations
        .iter()
        .filter(|migration| !applied.contains(&migration.version))
        .collect();
    pending.sort_by_key(|migration| migration.version);

    let mut newly_applied = Vec::with_capacity(pending.len());
    for migration in pending {
        transaction(session, |session| -> Result<()> {
            session
                .batch_execute(migration.sql)
                .context(|| format!("applying migration {}", migration.version))?;
            let mut record = Fragment::new();
            record
                .sql("INSERT INTO schema_migrations (version) VALUES (")
                .bind(migration.version)
                .sql(")");
            session
                .execute(&record.build())
                .context(|| format!("recording migration {}", migration.version))?;
            Ok(())
        })?;
        tracing::info!(
            version = migration.version,
            description = %migration.description(),
            "applied migration"
        );
        newly_applied.push(migration.version);
    }
    Ok(newly_applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, Error};
    use crate::sql::value::{GenericRow, SqlValue};

    /// Records every call; reports `applied` as already recorded versions and
    /// fails any batch containing `fail_on`.
    #[derive(Default)]
    struct Recorder {
        applied: Vec<&'static str>,
        fail_on: Option<&'static str>,
        log: Vec<String>,
    }

    impl Session for Recorder {
        fn execute(&mut self, statement: &Statement) -> std::result::Result<u64, EngineError> {
            let version = match statement.args().first() {
                Some(SqlValue::Text(version)) => version.clone(),
                other => format!("{other:?}"),
            };
            self.log.push(format!("{} [{version}]", statement.sql()));
            Ok(1)
        }

        fn query(
            &mut self,
            _statement: &Statement,
        ) -> std::result::Result<Vec<GenericRow>, EngineError> {
            Ok(self
                .applied
                .iter()
                .map(|version| {
                    let mut row = GenericRow::new();
                    row.insert("version".to_string(), serde_json::json!(version));
                    row
                })
                .collect())
        }

        fn batch_execute(&mut self, sql: &str) -> std::result::Result<(), EngineError> {
            if self.fail_on.is_some_and(|needle| sql.contains(needle)) {
                return Err(EngineError::Database("syntax error".to_string()));
            }
            self.log.push(sql.lines().next().unwrap_or_default().to_string());
            Ok(())
        }

        fn begin(&mut self) -> std::result::Result<(), EngineError> {
            self.log.push("BEGIN".to_string());
            Ok(())
        }

        fn commit(&mut self) -> std::result::Result<(), EngineError> {
            self.log.push("COMMIT".to_string());
            Ok(())
        }

        fn rollback(&mut self) -> std::result::Result<(), EngineError> {
            self.log.push("ROLLBACK".to_string());
            Ok(())
        }
    }

    const FIRST: Migration = Migration {
        version: "001_first",
        sql: "CREATE TABLE a (id INT)",
    };
    const SECOND: Migration = Migration {
        version: "002_second",
        sql: "CREATE TABLE b (id INT);\nINSERT INTO schema_migrations (version) VALUES ('elsewhere')",
    };

    fn recorded_versions(log: &[String]) -> Vec<&str> {
        log.iter()
            .filter(|line| line.starts_with("INSERT INTO schema_migrations (version) VALUES ($1)"))
            .filter_map(|line| line.rsplit('[').next())
            .map(|version| version.trim_end_matches(']'))
            .collect()
    }

    #[test]
    fn every_pending_migration_is_recorded_inside_its_transaction() {
        let mut session = Recorder::default();
        let applied = run_pending(&mut session, &[SECOND, FIRST]).unwrap();

        assert_eq!(applied, vec!["001_first", "002_second"]);
        assert_eq!(recorded_versions(&session.log), vec!["001_first", "002_second"]);
        let first = &session.log[1..5];
        assert_eq!(first[0], "BEGIN");
        assert_eq!(first[1], "CREATE TABLE a (id INT)");
        assert!(first[2].starts_with("INSERT INTO schema_migrations"));
        assert_eq!(first[3], "COMMIT");
    }

    #[test]
    fn recorded_versions_are_skipped() {
        let mut session = Recorder {
            applied: vec!["001_first"],
            ..Recorder::default()
        };
        let applied = run_pending(&mut session, &[FIRST, SECOND]).unwrap();

        assert_eq!(applied, vec!["002_second"]);
        assert_eq!(recorded_versions(&session.log), vec!["002_second"]);
    }

    #[test]
    fn failing_migration_rolls_back_and_stops() {
        let mut session = Recorder {
            fail_on: Some("CREATE TABLE a"),
            ..Recorder::default()
        };
        let err = run_pending(&mut session, &[FIRST, SECOND]).unwrap_err();

        assert!(matches!(err, Error::Execution { .. }), "got {err:?}");
        assert_eq!(session.log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(recorded_versions(&session.log).is_empty());
    }

    #[test]
    fn embedded_migrations_are_sorted_and_unique() {
        let versions: Vec<&str> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert!(MIGRATIONS[0].sql.contains("rls_policies"));
    }

    #[test]
    fn description_replaces_underscores() {
        assert_eq!(MIGRATIONS[0].description(), "001 create rls policies");
    }
}
