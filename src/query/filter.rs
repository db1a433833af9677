//! Filter predicates parsed from `column[__op]=value` request pairs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::sql::ident::{is_valid_column_reference, Ident};
use crate::sql::statement::Fragment;

/// Alias the base table is given in every generated row query.
pub const BASE_ALIAS: &str = "t";

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// Case-insensitive substring match.
    Like,
    /// Membership in a comma-separated list.
    In,
}

impl Operator {
    /// Parse an operator suffix. `ne` is accepted for [`Operator::Neq`].
    pub fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "eq" => Some(Self::Eq),
            "neq" | "ne" => Some(Self::Neq),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "like" => Some(Self::Like),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    /// Canonical suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::In => "in",
        }
    }

    fn comparison(self) -> &'static str {
        match self {
            Self::Eq | Self::In => " = ",
            Self::Neq => " != ",
            Self::Gt => " > ",
            Self::Gte => " >= ",
            Self::Lt => " < ",
            Self::Lte => " <= ",
            Self::Like => " ILIKE ",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// One raw string.
    Single(String),
    /// Trimmed, non-empty list elements for [`Operator::In`].
    List(Vec<String>),
}

/// How bound filter values are typed in the generated SQL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueTyping {
    /// Plain `$n`; the engine infers the parameter type.
    #[default]
    Untyped,
    /// Text binds converted to the column's declared type through the row type
    /// of the relation the column belongs to.
    RowType(RowTyping),
}

/// Relations whose row types convert filter values, keyed by query alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTyping {
    base: Ident,
    json_columns: BTreeSet<String>,
    joined: BTreeMap<String, Ident>,
}

impl RowTyping {
    /// Typing for a query over `base`, aliased [`BASE_ALIAS`].
    pub fn new(base: Ident) -> Self {
        Self {
            base,
            json_columns: BTreeSet::new(),
            joined: BTreeMap::new(),
        }
    }

    /// Mark base-table columns declared `json` or `jsonb`; their values are
    /// passed to the row type as JSON documents rather than strings.
    #[must_use]
    pub fn with_json_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Register a joined relation under the alias the join clause gives it.
    #[must_use]
    pub fn with_joined(mut self, alias: impl Into<String>, relation: Ident) -> Self {
        self.joined.insert(alias.into(), relation);
        self
    }

    /// Relation a column qualifier refers to. Bare columns belong to the base.
    pub fn relation_for(&self, qualifier: Option<&str>) -> Option<&Ident> {
        match qualifier {
            Some(BASE_ALIAS) | None => Some(&self.base),
            Some(alias) => self.joined.get(alias),
        }
    }

    fn is_json(&self, column: &Ident) -> bool {
        matches!(column.qualifier(), Some(BASE_ALIAS) | None)
            && self.json_columns.contains(column.terminal())
    }
}

/// A single predicate on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Column reference, optionally qualified (`u.name`).
    pub column: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Value to compare against.
    pub value: FilterValue,
}

/// Split a request key into column and operator.
///
/// `col__op` requires a known operator. For `col.suffix` an unknown suffix
/// means the whole key is a qualified column name.
pub fn parse_key(key: &str) -> Result<(String, Operator)> {
    if let Some((column, suffix)) = key.rsplit_once("__") {
        let operator = Operator::parse(suffix).ok_or_else(|| {
            Error::Validation(format!("unknown filter operator '{suffix}' in '{key}'"))
        })?;
        return Ok((column.to_string(), operator));
    }
    if let Some((column, suffix)) = key.rsplit_once('.') {
        if let Some(operator) = Operator::parse(suffix) {
            return Ok((column.to_string(), operator));
        }
    }
    Ok((key.to_string(), Operator::Eq))
}

impl Filter {
    /// Build a filter from one request pair.
    ///
    /// Returns `Ok(None)` for an empty value on a scalar operator, which the
    /// caller skips.
    pub fn from_pair(key: &str, value: &str) -> Result<Option<Self>> {
        let (column, operator) = parse_key(key)?;
        if !is_valid_column_reference(&column) {
            return Err(Error::Validation(format!(
                "invalid filter column '{column}'"
            )));
        }

        let value = match operator {
            Operator::In => {
                let items: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect();
                if items.is_empty() {
                    return Err(Error::Validation(format!(
                        "filter '{key}' needs at least one value"
                    )));
                }
                FilterValue::List(items)
            }
            _ if value.is_empty() => return Ok(None),
            _ => FilterValue::Single(value.to_string()),
        };

        Ok(Some(Self {
            column,
            operator,
            value,
        }))
    }

    /// Number of bind parameters this filter contributes.
    pub fn bind_count(&self) -> usize {
        match &self.value {
            FilterValue::Single(_) => 1,
            FilterValue::List(items) => items.len(),
        }
    }

    /// Render as a boolean SQL expression.
    pub fn render(&self, typing: &ValueTyping) -> Fragment {
        let column = column_ident(&self.column);
        let mut fragment = Fragment::new();

        match (&self.operator, &self.value) {
            (Operator::Like, FilterValue::Single(value)) => {
                fragment
                    .ident(&column)
                    .sql("::text")
                    .sql(self.operator.comparison())
                    .bind(format!("%{value}%"));
            }
            (_, FilterValue::List(items)) => {
                fragment.ident(&column).sql(" IN (");
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        fragment.sql(", ");
                    }
                    fragment.append(&typed_bind(&column, item, typing));
                }
                fragment.sql(")");
            }
            (operator, FilterValue::Single(value)) => {
                fragment
                    .ident(&column)
                    .sql(operator.comparison())
                    .append(&typed_bind(&column, value, typing));
            }
        }
        fragment
    }
}

/// Quote a column reference, qualifying bare names with the base alias.
pub fn column_ident(reference: &str) -> Ident {
    let ident = Ident::parse_dotted(reference);
    if ident.parts().len() == 1 {
        Ident::qualified(BASE_ALIAS, ident.terminal())
    } else {
        ident
    }
}

/// `$n`, or `$n` converted to `column`'s type through the row type of the
/// relation its qualifier names.
fn typed_bind(column: &Ident, value: &str, typing: &ValueTyping) -> Fragment {
    let mut fragment = Fragment::new();
    let ValueTyping::RowType(rows) = typing else {
        fragment.bind(value);
        return fragment;
    };
    let Some(row_type) = rows.relation_for(column.qualifier()) else {
        fragment.bind(value);
        return fragment;
    };

    let cast = if rows.is_json(column) { "::jsonb" } else { "::text" };
    let field = Ident::new(column.terminal());
    fragment
        .sql("(jsonb_populate_record(NULL::")
        .ident(row_type)
        .sql(", jsonb_build_object(")
        .literal(column.terminal())
        .sql(", ")
        .bind(value)
        .sql(cast)
        .sql("))).")
        .ident(&field);
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::value::SqlValue;

    #[test]
    fn key_parsing_covers_suffix_forms() {
        assert_eq!(parse_key("age__gte").unwrap(), ("age".to_string(), Operator::Gte));
        assert_eq!(parse_key("status.ne").unwrap(), ("status".to_string(), Operator::Neq));
        assert_eq!(parse_key("name").unwrap(), ("name".to_string(), Operator::Eq));
        assert_eq!(
            parse_key("u.name").unwrap(),
            ("u.name".to_string(), Operator::Eq)
        );
        assert!(matches!(parse_key("age__between"), Err(Error::Validation(_))));
    }

    #[test]
    fn empty_scalar_values_are_skipped() {
        assert_eq!(Filter::from_pair("status", "").unwrap(), None);
    }

    #[test]
    fn in_list_drops_blank_elements_and_rejects_empty_lists() {
        let filter = Filter::from_pair("status__in", " active, ,pending ").unwrap().unwrap();
        assert_eq!(
            filter.value,
            FilterValue::List(vec!["active".to_string(), "pending".to_string()])
        );
        assert_eq!(filter.bind_count(), 2);
        assert!(matches!(Filter::from_pair("status__in", ""), Err(Error::Validation(_))));
        assert!(matches!(Filter::from_pair("status__in", " , "), Err(Error::Validation(_))));
    }

    #[test]
    fn invalid_column_characters_are_rejected() {
        assert!(matches!(
            Filter::from_pair("age;drop__gt", "1"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn untyped_rendering_uses_plain_placeholders() {
        let filter = Filter::from_pair("age__gt", "30").unwrap().unwrap();
        assert_eq!(filter.render(&ValueTyping::Untyped).build().sql(), r#""t"."age" > $1"#);

        let like = Filter::from_pair("name__like", "ann").unwrap().unwrap();
        let statement = like.render(&ValueTyping::Untyped).build();
        assert_eq!(statement.sql(), r#""t"."name"::text ILIKE $1"#);
        assert_eq!(statement.args(), &[SqlValue::from("%ann%")]);
    }

    fn users_typing() -> ValueTyping {
        ValueTyping::RowType(
            RowTyping::new(Ident::qualified("public", "users"))
                .with_json_columns(["meta"])
                .with_joined("o", Ident::qualified("sales", "orders")),
        )
    }

    #[test]
    fn row_typed_rendering_converts_through_the_relation() {
        let filter = Filter::from_pair("age", "30").unwrap().unwrap();
        assert_eq!(
            filter.render(&users_typing()).build().sql(),
            r#""t"."age" = (jsonb_populate_record(NULL::"public"."users", jsonb_build_object('age', $1::text)))."age""#
        );
    }

    #[test]
    fn json_columns_are_passed_as_documents() {
        let filter = Filter::from_pair("meta", r#"{"k":1}"#).unwrap().unwrap();
        assert_eq!(
            filter.render(&users_typing()).build().sql(),
            r#""t"."meta" = (jsonb_populate_record(NULL::"public"."users", jsonb_build_object('meta', $1::jsonb)))."meta""#
        );
    }

    #[test]
    fn joined_columns_convert_through_the_joined_relation() {
        let filter = Filter::from_pair("o.total__gt", "5").unwrap().unwrap();
        assert_eq!(
            filter.render(&users_typing()).build().sql(),
            r#""o"."total" > (jsonb_populate_record(NULL::"sales"."orders", jsonb_build_object('total', $1::text)))."total""#
        );

        // A column named like a base json column is still text on the join.
        let filter = Filter::from_pair("o.meta", "x").unwrap().unwrap();
        assert!(filter.render(&users_typing()).build().sql().contains("$1::text"));
    }

    #[test]
    fn unknown_qualifiers_fall_back_to_plain_placeholders() {
        let filter = Filter::from_pair("x.total", "5").unwrap().unwrap();
        assert_eq!(filter.render(&users_typing()).build().sql(), r#""x"."total" = $1"#);
    }
}
