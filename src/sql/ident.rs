//! Identifier quoting and sanitization.
//!
//! Every table, column, policy and role name that ends up in SQL text passes
//! through [`Ident`]; there is no other way to put a caller-supplied name into a
//! statement.

use std::fmt;

/// A quoted SQL identifier, possibly schema- or table-qualified.
///
/// Each dotted part is wrapped in double quotes with embedded quotes doubled, so
/// `my"table` becomes `"my""table"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    parts: Vec<String>,
}

impl Ident {
    /// A single-part identifier. Dots are kept as part of the name.
    pub fn new(name: &str) -> Self {
        Self {
            parts: vec![name.to_string()],
        }
    }

    /// A `schema.relation` identifier.
    pub fn qualified(schema: &str, relation: &str) -> Self {
        Self {
            parts: vec![schema.to_string(), relation.to_string()],
        }
    }

    /// Split a dotted reference (`t.created_at`) into quoted parts.
    ///
    /// Quoted segments keep their dots: `"my.schema".docs` is two parts.
    pub fn parse_dotted(reference: &str) -> Self {
        Self {
            parts: split_dotted(reference)
                .into_iter()
                .map(|part| unquote_identifier(part).to_string())
                .collect(),
        }
    }

    /// Resolve a name as PostgreSQL reads it in SQL text: quoted parts keep
    /// their case, unquoted parts fold to lower case.
    pub fn parse_sql_name(name: &str) -> Self {
        Self {
            parts: split_dotted(name)
                .into_iter()
                .map(|part| {
                    if part.starts_with('"') {
                        unquote_identifier(part).replace("\"\"", "\"")
                    } else {
                        part.to_lowercase()
                    }
                })
                .collect(),
        }
    }

    /// The unquoted parts of this identifier.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The last unquoted part (column or relation name).
    pub fn terminal(&self) -> &str {
        self.parts.last().map_or("", String::as_str)
    }

    /// The qualifier when the identifier has more than one part.
    pub fn qualifier(&self) -> Option<&str> {
        if self.parts.len() > 1 {
            self.parts.get(self.parts.len() - 2).map(String::as_str)
        } else {
            None
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, part) in self.parts.iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            write!(f, "\"{}\"", part.replace('"', "\"\""))?;
        }
        Ok(())
    }
}

/// Return the identifier without surrounding double quotes.
pub fn unquote_identifier(ident: &str) -> &str {
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ident)
}

/// Split on dots that are not inside double quotes.
fn split_dotted(name: &str) -> Vec<&str> {
    let mut in_quotes = false;
    let mut start = 0usize;
    let mut parts = Vec::new();

    for (idx, ch) in name.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                parts.push(name[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(name[start..].trim());
    parts
}

/// True for characters allowed in caller-supplied column references.
fn is_reference_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

/// Returns `true` when `reference` is a non-empty `[A-Za-z0-9_.]` string with no
/// empty dotted segment.
pub fn is_valid_column_reference(reference: &str) -> bool {
    !reference.is_empty()
        && reference.chars().all(is_reference_char)
        && reference.split('.').all(|segment| !segment.is_empty())
}

/// Strip everything outside `[A-Za-z0-9_.]`.
///
/// Used for sort columns, where a bad value falls back to a default instead of
/// failing the request.
pub fn sanitize_column_reference(reference: &str) -> String {
    let kept: String = reference.chars().filter(|ch| is_reference_char(*ch)).collect();
    let segments: Vec<&str> = kept.split('.').filter(|s| !s.is_empty()).collect();
    segments.join(".")
}

/// Quote a string literal (`'it''s'`).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a string as an escape-string literal (`E'a\\b'`), which reads the
/// same whatever `standard_conforming_strings` is set to.
pub fn quote_escaped_literal(value: &str) -> String {
    format!("E'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Table names may contain anything but NUL once quoted.
pub fn is_valid_relation_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_each_part_and_doubles_embedded_quotes() {
        assert_eq!(Ident::new("users").to_string(), r#""users""#);
        assert_eq!(
            Ident::qualified("public", "my\"table").to_string(),
            r#""public"."my""table""#
        );
        assert_eq!(
            Ident::new("Robert\"; DROP TABLE users; --").to_string(),
            r#""Robert""; DROP TABLE users; --""#
        );
    }

    #[test]
    fn parse_dotted_handles_quoted_dots() {
        let ident = Ident::parse_dotted(r#""my.schema".docs"#);
        assert_eq!(ident.parts(), &["my.schema".to_string(), "docs".to_string()]);
        assert_eq!(ident.qualifier(), Some("my.schema"));
        assert_eq!(ident.terminal(), "docs");
        assert_eq!(Ident::parse_dotted("age").qualifier(), None);
    }

    #[test]
    fn column_reference_validation_uses_character_class() {
        assert!(is_valid_column_reference("created_at"));
        assert!(is_valid_column_reference("t.created_at"));
        assert!(!is_valid_column_reference("age; drop"));
        assert!(!is_valid_column_reference("a..b"));
        assert!(!is_valid_column_reference(""));
    }

    #[test]
    fn sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_column_reference("created_at"), "created_at");
        assert_eq!(sanitize_column_reference("name;--"), "name");
        assert_eq!(sanitize_column_reference("'; DROP"), "DROP");
        assert_eq!(sanitize_column_reference("();"), "");
        assert_eq!(sanitize_column_reference(".x.."), "x");
    }

    #[test]
    fn quote_literal_doubles_single_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_escaped_literal(r"it's a \' trap"), r"E'it''s a \\'' trap'");
    }

    #[test]
    fn sql_names_fold_unquoted_parts() {
        let ident = Ident::parse_sql_name(r#"Sales."Order""Lines""#);
        assert_eq!(ident.parts(), &["sales".to_string(), "Order\"Lines".to_string()]);
        assert_eq!(Ident::parse_sql_name("Orders").terminal(), "orders");
    }
}
