//! Write-policy gate for mutating ad-hoc statements.

use serde::{Deserialize, Serialize};

/// Role given to principals whose identity carries no role claim.
pub const DEFAULT_ROLE: &str = "user";

/// An authenticated caller, as established by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable subject identifier.
    pub subject: String,
    /// Role claim.
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl Principal {
    /// A principal with an explicit role.
    pub fn new(subject: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
        }
    }

    /// A principal with the default role.
    pub fn with_default_role(subject: impl Into<String>) -> Self {
        Self::new(subject, DEFAULT_ROLE)
    }
}

/// Decides whether a principal may run mutating ad-hoc SQL.
pub trait WritePolicy: Send + Sync {
    /// `true` when `principal` may write.
    fn allows_write(&self, principal: &Principal) -> bool;
}

/// Every authenticated principal may write.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedWriters;

impl WritePolicy for AuthenticatedWriters {
    fn allows_write(&self, _principal: &Principal) -> bool {
        true
    }
}

/// Only principals holding one of the listed roles may write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleWriters {
    roles: Vec<String>,
}

impl RoleWriters {
    /// Allow writes for `roles`.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl WritePolicy for RoleWriters {
    fn allows_write(&self, principal: &Principal) -> bool {
        self.roles.iter().any(|role| role == &principal.role)
    }
}

/// Gate for a configured role list: empty means any authenticated principal.
pub fn from_roles(roles: &[String]) -> Box<dyn WritePolicy> {
    let roles: Vec<&str> = roles
        .iter()
        .map(|role| role.trim())
        .filter(|role| !role.is_empty())
        .collect();
    if roles.is_empty() {
        Box::new(AuthenticatedWriters)
    } else {
        Box::new(RoleWriters::new(roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_role_list_allows_any_principal() {
        let gate = from_roles(&[" ".to_string()]);
        assert!(gate.allows_write(&Principal::with_default_role("u1")));
    }

    #[test]
    fn role_list_restricts_writers() {
        let gate = from_roles(&["admin".to_string()]);
        assert!(gate.allows_write(&Principal::new("u1", "admin")));
        assert!(!gate.allows_write(&Principal::new("u2", "user")));
    }

    #[test]
    fn missing_role_claim_defaults_to_user() {
        let principal: Principal = serde_json::from_str(r#"{"subject":"u1"}"#).unwrap();
        assert_eq!(principal.role, DEFAULT_ROLE);
    }
}
