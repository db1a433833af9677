//! Read-only versus mutating classification of caller-supplied SQL.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Keywords that demote a `SELECT` to mutating under lexical classification.
const WRITE_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE"];

/// How ad-hoc SQL is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Prefix and keyword scan over the whitespace-stripped text.
    ///
    /// Over-classifies identifiers such as `updated_at` as mutating and can be
    /// evaded by read-looking statements that call side-effecting functions.
    #[default]
    Lexical,
    /// Full parse; read-only only when every statement is a plain query.
    Parsed,
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Returns rows and changes nothing.
    ReadOnly,
    /// Anything else; subject to the write gate.
    Mutating,
}

/// Classify `sql` with `mode`.
pub fn classify(sql: &str, mode: ClassifierMode) -> StatementKind {
    match mode {
        ClassifierMode::Lexical => classify_lexical(sql),
        ClassifierMode::Parsed => classify_parsed(sql),
    }
}

/// Strip every whitespace character, require a case-insensitive `SELECT`
/// prefix and reject any write keyword anywhere in the text.
pub fn classify_lexical(sql: &str) -> StatementKind {
    let compact: String = sql
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    if !compact.starts_with("SELECT") {
        return StatementKind::Mutating;
    }
    if WRITE_KEYWORDS
        .iter()
        .any(|keyword| compact.contains(keyword))
    {
        return StatementKind::Mutating;
    }
    StatementKind::ReadOnly
}

/// Parse with the PostgreSQL dialect. Unparseable text is mutating.
pub fn classify_parsed(sql: &str) -> StatementKind {
    let Ok(statements) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        return StatementKind::Mutating;
    };
    let read_only = !statements.is_empty()
        && statements.iter().all(|statement| match statement {
            Statement::Query(query) => query_is_read_only(query),
            _ => false,
        });
    if read_only {
        StatementKind::ReadOnly
    } else {
        StatementKind::Mutating
    }
}

fn query_is_read_only(query: &Query) -> bool {
    if let Some(with) = &query.with {
        if !with.cte_tables.iter().all(|cte| query_is_read_only(&cte.query)) {
            return false;
        }
    }
    // Row locks (`FOR UPDATE`) are writes for the gate's purposes.
    query.locks.is_empty() && set_expr_is_read_only(&query.body)
}

fn set_expr_is_read_only(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => query_is_read_only(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_read_only(left) && set_expr_is_read_only(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}
