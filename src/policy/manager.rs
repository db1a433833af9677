//! Keeps `rls_policies` rows and live policy objects in step.
//!
//! Each mutating operation runs in one transaction: the metadata row and the
//! `CREATE POLICY` / `DROP POLICY` statements commit or roll back together.

use serde_json::Value;
use uuid::Uuid;

use crate::catalog::introspector::{decode_rows, Catalog};
use crate::engine::session::{bool_column, transaction, Session};
use crate::error::{EngineError, EngineResultExt, Error, Result};
use crate::policy::ddl::{create_policy, drop_policy, enable_row_level_security, validate_definition};
use crate::policy::model::{PolicyRecord, PolicyRequest, PolicySpec};
use crate::sql::statement::Fragment;
use crate::sql::value::{GenericRow, SqlValue};

const RETURNING: &str =
    " RETURNING id, name, table_name, action, roles, definition, description, created_at, updated_at";

const SELECT_POLICIES: &str = "SELECT id, name, table_name, action, roles, definition, description, created_at, updated_at FROM rls_policies";

/// Policy lifecycle operations over one catalog.
#[derive(Debug, Clone, Copy)]
pub struct PolicyManager<'a> {
    catalog: &'a Catalog,
}

impl<'a> PolicyManager<'a> {
    /// Manage policies on tables of `catalog`'s schema.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Every policy, optionally only those on `table`, ordered by table then
    /// name.
    pub fn list<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: Option<&str>,
    ) -> Result<Vec<PolicyRecord>> {
        let mut query = Fragment::new();
        query.sql(SELECT_POLICIES);
        if let Some(table) = table {
            query.sql(" WHERE table_name = ").bind(table);
        }
        query.sql(" ORDER BY table_name, name");

        let rows = session
            .query(&query.build())
            .context(|| "listing policies".to_string())?;
        decode_rows(rows).context(|| "decoding policies".to_string())
    }

    /// The policy with `id`.
    pub fn get<S: Session + ?Sized>(&self, session: &mut S, id: Uuid) -> Result<PolicyRecord> {
        let mut query = Fragment::new();
        query
            .sql(SELECT_POLICIES)
            .sql(" WHERE id = ")
            .bind(id.to_string())
            .sql("::uuid");
        let row = session
            .query_one(&query.build())
            .context(|| format!("reading policy {id}"))?
            .ok_or_else(|| Error::NotFound(format!("policy with id {id} not found")))?;
        decode_record(row).context(|| format!("decoding policy {id}"))
    }

    /// Persist a new policy and create its enforcement object.
    pub fn create<S: Session + ?Sized>(
        &self,
        session: &mut S,
        request: &PolicyRequest,
    ) -> Result<PolicyRecord> {
        let spec = request.validate()?;
        validate_definition(&spec.definition)?;

        let record = transaction(session, |session| -> Result<PolicyRecord> {
            self.require_policy_table(session, &spec.table_name)?;
            if self.name_taken(session, &spec.name, &spec.table_name, None)? {
                return Err(duplicate(&spec));
            }

            let mut insert = Fragment::new();
            insert
                .sql("INSERT INTO rls_policies (name, table_name, action, roles, definition, description) VALUES (")
                .bind(spec.name.as_str())
                .sql(", ")
                .bind(spec.table_name.as_str())
                .sql(", ")
                .bind(spec.action.as_str())
                .sql(", ")
                .bind(roles_document(&spec.roles))
                .sql(", ")
                .bind(spec.definition.as_str())
                .sql(", ")
                .bind(spec.description.clone())
                .sql(")")
                .sql(RETURNING);
            let record = self.write_metadata(session, &insert, &spec)?;

            self.apply(session, &record)?;
            Ok(record)
        })?;

        tracing::info!(
            policy = %record.name,
            table = %record.table_name,
            action = %record.action,
            "created policy"
        );
        Ok(record)
    }

    /// Replace a policy: update its metadata, drop the previous enforcement
    /// object and create the new one.
    pub fn update<S: Session + ?Sized>(
        &self,
        session: &mut S,
        id: Uuid,
        request: &PolicyRequest,
    ) -> Result<PolicyRecord> {
        let spec = request.validate()?;
        validate_definition(&spec.definition)?;

        let (previous, record) = transaction(session, |session| -> Result<(PolicyRecord, PolicyRecord)> {
            let previous = self.get(session, id)?;

            let table_changed = previous.table_name != spec.table_name;
            if table_changed {
                self.require_policy_table(session, &spec.table_name)?;
            }
            if (table_changed || previous.name != spec.name)
                && self.name_taken(session, &spec.name, &spec.table_name, Some(id))?
            {
                return Err(duplicate(&spec));
            }

            let mut update = Fragment::new();
            update
                .sql("UPDATE rls_policies SET name = ")
                .bind(spec.name.as_str())
                .sql(", table_name = ")
                .bind(spec.table_name.as_str())
                .sql(", action = ")
                .bind(spec.action.as_str())
                .sql(", roles = ")
                .bind(roles_document(&spec.roles))
                .sql(", definition = ")
                .bind(spec.definition.as_str())
                .sql(", description = ")
                .bind(spec.description.clone())
                .sql(", updated_at = NOW() WHERE id = ")
                .bind(id.to_string())
                .sql("::uuid")
                .sql(RETURNING);
            let record = self.write_metadata(session, &update, &spec)?;

            let relation = self.catalog.relation(&previous.table_name);
            session
                .execute(&drop_policy(&previous.name, &relation))
                .context(|| format!("dropping previous policy {}", previous.name))?;
            self.apply(session, &record)?;
            Ok((previous, record))
        })?;

        tracing::info!(
            policy = %record.name,
            table = %record.table_name,
            previous = %previous.name,
            "replaced policy"
        );
        Ok(record)
    }

    /// Drop the enforcement object, then remove the metadata row.
    pub fn delete<S: Session + ?Sized>(&self, session: &mut S, id: Uuid) -> Result<PolicyRecord> {
        let record = transaction(session, |session| -> Result<PolicyRecord> {
            let record = self.get(session, id)?;

            let relation = self.catalog.relation(&record.table_name);
            session
                .execute(&drop_policy(&record.name, &relation))
                .context(|| format!("dropping policy {}", record.name))?;

            let mut delete = Fragment::new();
            delete
                .sql("DELETE FROM rls_policies WHERE id = ")
                .bind(id.to_string())
                .sql("::uuid");
            session
                .execute(&delete.build())
                .context(|| format!("deleting policy {id}"))?;
            Ok(record)
        })?;

        tracing::info!(policy = %record.name, table = %record.table_name, "deleted policy");
        Ok(record)
    }

    /// `ENABLE ROW LEVEL SECURITY` on the record's table and create its policy.
    fn apply<S: Session + ?Sized>(&self, session: &mut S, record: &PolicyRecord) -> Result<()> {
        let relation = self.catalog.relation(&record.table_name);
        session
            .execute(&enable_row_level_security(&relation))
            .context(|| format!("enabling row level security on {}", record.table_name))?;
        session
            .execute(&create_policy(
                &record.name,
                &relation,
                record.action,
                &record.roles,
                &record.definition,
            ))
            .context(|| format!("creating policy {}", record.name))?;
        Ok(())
    }

    fn require_policy_table<S: Session + ?Sized>(&self, session: &mut S, table: &str) -> Result<()> {
        if self.catalog.table_exists(session, table)? {
            Ok(())
        } else {
            Err(Error::Validation(format!("table '{table}' does not exist")))
        }
    }

    fn name_taken<S: Session + ?Sized>(
        &self,
        session: &mut S,
        name: &str,
        table: &str,
        except: Option<Uuid>,
    ) -> Result<bool> {
        let mut query = Fragment::new();
        query
            .sql("SELECT EXISTS (SELECT 1 FROM rls_policies WHERE name = ")
            .bind(name)
            .sql(" AND table_name = ")
            .bind(table);
        if let Some(id) = except {
            query.sql(" AND id <> ").bind(id.to_string()).sql("::uuid");
        }
        query.sql(") AS present");

        session
            .query_one(&query.build())
            .and_then(|row| row.map_or(Ok(false), |row| bool_column(&row, "present")))
            .context(|| format!("checking policy name {name} on {table}"))
    }

    fn write_metadata<S: Session + ?Sized>(
        &self,
        session: &mut S,
        statement: &Fragment,
        spec: &PolicySpec,
    ) -> Result<PolicyRecord> {
        let row = match session.query_one(&statement.build()) {
            Ok(Some(row)) => row,
            Ok(None) => {
                return Err(Error::NotFound(format!(
                    "policy '{}' on '{}' was not written",
                    spec.name, spec.table_name
                )))
            }
            Err(EngineError::UniqueViolation(_)) => return Err(duplicate(spec)),
            Err(source) => return Err(Error::execution("writing policy metadata", source)),
        };
        decode_record(row).context(|| format!("decoding policy {}", spec.name))
    }
}

fn roles_document(roles: &[String]) -> SqlValue {
    SqlValue::Json(Value::Array(
        roles.iter().cloned().map(Value::String).collect(),
    ))
}

fn decode_record(row: GenericRow) -> std::result::Result<PolicyRecord, EngineError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

fn duplicate(spec: &PolicySpec) -> Error {
    Error::Conflict(format!(
        "policy with name '{}' already exists for table '{}'",
        spec.name, spec.table_name
    ))
}
