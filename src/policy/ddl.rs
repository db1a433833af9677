//! Statements that create and drop row-level-security policy objects.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::error::{Error, Result};
use crate::policy::model::PolicyAction;
use crate::sql::ident::Ident;
use crate::sql::statement::{Fragment, Statement};

/// Role names that PostgreSQL treats as keywords in `TO ...`.
const ROLE_KEYWORDS: &[&str] = &["public", "current_user", "current_role", "session_user"];

/// Check that `definition` is a single SQL boolean expression.
pub fn validate_definition(definition: &str) -> Result<()> {
    let invalid = |detail: String| Error::Validation(format!("invalid policy definition: {detail}"));

    let mut parser = Parser::new(&PostgreSqlDialect {})
        .try_with_sql(definition)
        .map_err(|e| invalid(e.to_string()))?;
    parser.parse_expr().map_err(|e| invalid(e.to_string()))?;
    let trailing = parser.peek_token();
    if trailing.token != Token::EOF {
        return Err(invalid(format!("unexpected trailing input at '{}'", trailing.token)));
    }
    Ok(())
}

/// Render one role for the `TO` list.
fn role(fragment: &mut Fragment, role: &str) {
    match ROLE_KEYWORDS
        .iter()
        .find(|keyword| keyword.eq_ignore_ascii_case(role))
    {
        Some(&"public") => fragment.sql("public"),
        Some(&"current_user") => fragment.sql("current_user"),
        Some(&"current_role") => fragment.sql("current_role"),
        Some(_) => fragment.sql("session_user"),
        None => fragment.ident(&Ident::new(role)),
    };
}

/// `ALTER TABLE <table> ENABLE ROW LEVEL SECURITY`.
pub fn enable_row_level_security(relation: &Ident) -> Statement {
    let mut statement = Fragment::new();
    statement
        .sql("ALTER TABLE ")
        .ident(relation)
        .sql(" ENABLE ROW LEVEL SECURITY");
    statement.build()
}

/// `CREATE POLICY "<name>" ON <table> FOR <action> TO <roles> USING (<definition>)`.
///
/// `INSERT` policies use `WITH CHECK`. The definition is trusted SQL and is
/// placed verbatim.
pub fn create_policy(
    name: &str,
    relation: &Ident,
    action: PolicyAction,
    roles: &[String],
    definition: &str,
) -> Statement {
    let mut statement = Fragment::new();
    statement
        .sql("CREATE POLICY ")
        .ident(&Ident::new(name))
        .sql(" ON ")
        .ident(relation)
        .sql(" FOR ")
        .sql(action.keyword())
        .sql(" TO ");
    for (idx, name) in roles.iter().enumerate() {
        if idx > 0 {
            statement.sql(", ");
        }
        role(&mut statement, name);
    }
    statement
        .sql(match action {
            PolicyAction::Insert => " WITH CHECK (",
            _ => " USING (",
        })
        .trusted(definition)
        .sql(")");
    statement.build()
}

/// `DROP POLICY IF EXISTS "<name>" ON <table>`.
pub fn drop_policy(name: &str, relation: &Ident) -> Statement {
    let mut statement = Fragment::new();
    statement
        .sql("DROP POLICY IF EXISTS ")
        .ident(&Ident::new(name))
        .sql(" ON ")
        .ident(relation);
    statement.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_must_be_one_expression() {
        assert!(validate_definition("owner_id = current_user").is_ok());
        assert!(validate_definition("tenant_id IN (SELECT tenant_id FROM members WHERE user_id = auth.uid())").is_ok());
        assert!(matches!(
            validate_definition("true); DROP TABLE users; --"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(validate_definition("owner_id ="), Err(Error::Validation(_))));
    }

    #[test]
    fn create_quotes_names_and_keeps_role_keywords() {
        let statement = create_policy(
            "own rows",
            &Ident::qualified("public", "documents"),
            PolicyAction::Select,
            &["PUBLIC".to_string(), "app\"user".to_string()],
            "owner_id = current_user",
        );
        insta::assert_snapshot!(statement.sql(), @r#"CREATE POLICY "own rows" ON "public"."documents" FOR SELECT TO public, "app""user" USING (owner_id = current_user)"#);
        assert!(statement.args().is_empty());
    }

    #[test]
    fn insert_policies_use_with_check() {
        let statement = create_policy(
            "ins",
            &Ident::qualified("public", "documents"),
            PolicyAction::Insert,
            &["authenticated".to_string()],
            "owner_id = current_user",
        );
        assert!(statement.sql().ends_with("WITH CHECK (owner_id = current_user)"));
    }

    #[test]
    fn drop_and_enable_statements() {
        let relation = Ident::qualified("public", "documents");
        assert_eq!(
            drop_policy("p", &relation).sql(),
            r#"DROP POLICY IF EXISTS "p" ON "public"."documents""#
        );
        assert_eq!(
            enable_row_level_security(&relation).sql(),
            r#"ALTER TABLE "public"."documents" ENABLE ROW LEVEL SECURITY"#
        );
    }
}
