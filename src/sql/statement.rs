//! Structured statement builder.
//!
//! A [`Fragment`] is a list of parts that only accepts static SQL, quoted
//! identifiers, quoted literals, bind values, or text explicitly marked as
//! trusted. Placeholders are numbered when the fragment is rendered, so
//! fragments compose in any order without renumbering by hand.

use std::fmt::Write;

use crate::sql::ident::{quote_literal, Ident};
use crate::sql::value::SqlValue;

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Static(&'static str),
    Ident(Ident),
    Literal(String),
    Bind(SqlValue),
    Trusted(String),
}

/// A composable piece of SQL with its bind values kept alongside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    parts: Vec<Part>,
}

impl Fragment {
    /// An empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append static SQL text.
    pub fn sql(&mut self, text: &'static str) -> &mut Self {
        self.parts.push(Part::Static(text));
        self
    }

    /// Append a quoted identifier.
    pub fn ident(&mut self, ident: &Ident) -> &mut Self {
        self.parts.push(Part::Ident(ident.clone()));
        self
    }

    /// Append a quoted string literal.
    pub fn literal(&mut self, value: &str) -> &mut Self {
        self.parts.push(Part::Literal(value.to_string()));
        self
    }

    /// Append a positional placeholder bound to `value`.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        self.parts.push(Part::Bind(value.into()));
        self
    }

    /// Append administrator-supplied SQL verbatim.
    ///
    /// Only for text that is trusted by contract: policy definitions and join
    /// clauses written by the embedding application.
    pub fn trusted(&mut self, text: &str) -> &mut Self {
        self.parts.push(Part::Trusted(text.to_string()));
        self
    }

    /// Append every part of `other`.
    pub fn append(&mut self, other: &Fragment) -> &mut Self {
        self.parts.extend(other.parts.iter().cloned());
        self
    }

    /// Join fragments with a static separator.
    pub fn join<'a>(
        fragments: impl IntoIterator<Item = &'a Fragment>,
        separator: &'static str,
    ) -> Self {
        let mut joined = Fragment::new();
        for (idx, fragment) in fragments.into_iter().enumerate() {
            if idx > 0 {
                joined.sql(separator);
            }
            joined.append(fragment);
        }
        joined
    }

    /// `true` when nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Number of bind placeholders in this fragment.
    pub fn bind_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, Part::Bind(_)))
            .count()
    }

    /// Render to SQL text with `$1..$n` placeholders.
    pub fn build(&self) -> Statement {
        let mut sql = String::new();
        let mut args = Vec::with_capacity(self.bind_count());
        for part in &self.parts {
            match part {
                Part::Static(text) => sql.push_str(text),
                Part::Ident(ident) => {
                    let _ = write!(sql, "{ident}");
                }
                Part::Literal(value) => sql.push_str(&quote_literal(value)),
                Part::Bind(value) => {
                    args.push(value.clone());
                    let _ = write!(sql, "${}", args.len());
                }
                Part::Trusted(text) => sql.push_str(text),
            }
        }
        Statement { sql, args }
    }
}

/// Rendered SQL plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    args: Vec<SqlValue>,
}

impl Statement {
    /// A statement with no bind values, for fixed catalog and DDL text.
    pub fn fixed(sql: &'static str) -> Self {
        Self {
            sql: sql.to_string(),
            args: Vec::new(),
        }
    }

    /// Caller-supplied SQL with caller-supplied arguments (ad-hoc execution).
    pub fn raw(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Positional arguments; `args()[0]` binds `$1`.
    pub fn args(&self) -> &[SqlValue] {
        &self.args
    }
}
