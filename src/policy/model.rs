use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::sql::ident::is_valid_relation_name;

/// The command a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Policy applies to SELECT queries only.
    Select,
    /// Policy applies to INSERT queries only.
    Insert,
    /// Policy applies to UPDATE queries only.
    Update,
    /// Policy applies to DELETE queries only.
    Delete,
    /// Policy applies to all DML commands.
    All,
}

impl PolicyAction {
    /// Lowercase name as stored in the metadata table.
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyAction::Select => "select",
            PolicyAction::Insert => "insert",
            PolicyAction::Update => "update",
            PolicyAction::Delete => "delete",
            PolicyAction::All => "all",
        }
    }

    /// Keyword used after `FOR` in `CREATE POLICY`.
    pub fn keyword(self) -> &'static str {
        match self {
            PolicyAction::Select => "SELECT",
            PolicyAction::Insert => "INSERT",
            PolicyAction::Update => "UPDATE",
            PolicyAction::Delete => "DELETE",
            PolicyAction::All => "ALL",
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for PolicyAction {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "select" => Ok(PolicyAction::Select),
            "insert" => Ok(PolicyAction::Insert),
            "update" => Ok(PolicyAction::Update),
            "delete" => Ok(PolicyAction::Delete),
            "all" => Ok(PolicyAction::All),
            other => Err(Error::Validation(format!(
                "unknown policy action '{other}', expected select, insert, update, delete or all"
            ))),
        }
    }
}

/// A persisted policy and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Metadata row id.
    pub id: Uuid,
    /// Policy name, unique per table.
    pub name: String,
    /// Table the policy is attached to.
    pub table_name: String,
    /// Command the policy applies to.
    pub action: PolicyAction,
    /// Roles the policy applies to, in the order given.
    pub roles: Vec<String>,
    /// SQL predicate placed in `USING` or `WITH CHECK`.
    pub definition: String,
    /// Free-form note.
    #[serde(default)]
    pub description: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied to create or replace a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRequest {
    /// Policy name.
    #[serde(default)]
    pub name: String,
    /// Target table.
    #[serde(default)]
    pub table_name: String,
    /// `select`, `insert`, `update`, `delete` or `all`, in any case.
    #[serde(default)]
    pub action: String,
    /// Roles the policy applies to.
    #[serde(default)]
    pub roles: Vec<String>,
    /// SQL predicate.
    #[serde(default)]
    pub definition: String,
    /// Optional note.
    #[serde(default)]
    pub description: Option<String>,
}

/// A request that passed field validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySpec {
    /// Policy name.
    pub name: String,
    /// Target table.
    pub table_name: String,
    /// Parsed action.
    pub action: PolicyAction,
    /// Non-empty roles.
    pub roles: Vec<String>,
    /// SQL predicate.
    pub definition: String,
    /// Optional note.
    pub description: Option<String>,
}

impl PolicyRequest {
    /// Check required fields and parse the action.
    pub fn validate(&self) -> Result<PolicySpec> {
        let name = self.name.trim();
        let table_name = self.table_name.trim();
        let definition = self.definition.trim();
        let roles: Vec<String> = self
            .roles
            .iter()
            .map(|role| role.trim())
            .filter(|role| !role.is_empty())
            .map(str::to_string)
            .collect();

        if name.is_empty()
            || table_name.is_empty()
            || self.action.trim().is_empty()
            || roles.is_empty()
            || definition.is_empty()
        {
            return Err(Error::Validation(
                "name, table_name, action, roles, and definition are required".to_string(),
            ));
        }
        if !is_valid_relation_name(name) || !is_valid_relation_name(table_name) {
            return Err(Error::Validation(
                "policy and table names must not contain NUL characters".to_string(),
            ));
        }

        Ok(PolicySpec {
            name: name.to_string(),
            table_name: table_name.to_string(),
            action: self.action.parse()?,
            roles,
            definition: definition.to_string(),
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PolicyRequest {
        PolicyRequest {
            name: "owner_select".to_string(),
            table_name: "documents".to_string(),
            action: "SELECT".to_string(),
            roles: vec!["authenticated".to_string()],
            definition: "owner_id = current_user".to_string(),
            description: None,
        }
    }

    #[test]
    fn action_parses_in_any_case_and_displays_as_keyword() {
        assert_eq!("Insert".parse::<PolicyAction>().unwrap(), PolicyAction::Insert);
        assert_eq!(PolicyAction::All.to_string(), "ALL");
        assert_eq!(PolicyAction::Update.as_str(), "update");
        assert!(matches!("merge".parse::<PolicyAction>(), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_requires_every_field() {
        assert!(request().validate().is_ok());
        for broken in [
            PolicyRequest { name: " ".to_string(), ..request() },
            PolicyRequest { table_name: String::new(), ..request() },
            PolicyRequest { action: String::new(), ..request() },
            PolicyRequest { roles: vec![" ".to_string()], ..request() },
            PolicyRequest { definition: String::new(), ..request() },
        ] {
            assert!(matches!(broken.validate(), Err(Error::Validation(_))));
        }
    }

    #[test]
    fn record_round_trips_through_json_rows() {
        let row = serde_json::json!({
            "id": "0b9f4a36-3c39-4c4e-9d59-4d1c2f0d7b11",
            "name": "p",
            "table_name": "docs",
            "action": "select",
            "roles": ["admin", "auditor"],
            "definition": "true",
            "description": null,
            "created_at": "2026-03-01T10:00:00.123456+00:00",
            "updated_at": "2026-03-01T10:00:00.123456+00:00"
        });
        let record: PolicyRecord = serde_json::from_value(row).unwrap();
        assert_eq!(record.roles, ["admin", "auditor"]);
        assert_eq!(record.action, PolicyAction::Select);
    }
}
