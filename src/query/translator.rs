//! Turn [`QueryParams`] into WHERE, ORDER BY and LIMIT/OFFSET fragments.

use crate::query::filter::{column_ident, ValueTyping};
use crate::query::params::{Pagination, QueryParams};
use crate::sql::statement::Fragment;

/// Renders query parameters against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translator {
    search_language: String,
    typing: ValueTyping,
}

impl Translator {
    /// A translator using `search_language` for free-text search and untyped
    /// placeholders.
    pub fn new(search_language: impl Into<String>) -> Self {
        Self {
            search_language: search_language.into(),
            typing: ValueTyping::Untyped,
        }
    }

    /// Use `typing` for filter values.
    #[must_use]
    pub fn with_typing(mut self, typing: ValueTyping) -> Self {
        self.typing = typing;
        self
    }

    /// ` WHERE ...`, or an empty fragment when there is nothing to filter.
    ///
    /// The search term, when present, always takes the first bind slot.
    pub fn where_clause(&self, params: &QueryParams) -> Fragment {
        let mut conditions = Vec::with_capacity(params.filters.len() + 1);

        if let Some(search) = &params.search {
            let mut condition = Fragment::new();
            condition
                .sql("to_tsvector(")
                .literal(&self.search_language)
                .sql(", to_jsonb(t)::text) @@ plainto_tsquery(")
                .literal(&self.search_language)
                .sql(", ")
                .bind(search.as_str())
                .sql(")");
            conditions.push(condition);
        }
        conditions.extend(params.filters.iter().map(|filter| filter.render(&self.typing)));

        let mut clause = Fragment::new();
        if !conditions.is_empty() {
            clause
                .sql(" WHERE ")
                .append(&Fragment::join(&conditions, " AND "));
        }
        clause
    }

    /// ` ORDER BY <sort> <dir>[, <default_key> <dir>]`.
    ///
    /// Sorting falls back to `default_key`, which is also appended as a
    /// tiebreaker so paging is deterministic.
    pub fn order_by(&self, params: &QueryParams, default_key: &str) -> Fragment {
        let sort = params.sort_by.as_deref().unwrap_or(default_key);
        let direction = params.direction.as_sql();

        let mut clause = Fragment::new();
        clause
            .sql(" ORDER BY ")
            .ident(&column_ident(sort))
            .sql(" ")
            .sql(direction);
        if column_ident(sort) != column_ident(default_key) {
            clause
                .sql(", ")
                .ident(&column_ident(default_key))
                .sql(" ")
                .sql(direction);
        }
        clause
    }

    /// ` LIMIT $n OFFSET $m` with both values bound.
    pub fn pagination(&self, pagination: &Pagination) -> Fragment {
        let mut clause = Fragment::new();
        clause
            .sql(" LIMIT ")
            .bind(to_i64(pagination.page_size))
            .sql(" OFFSET ")
            .bind(to_i64(pagination.offset));
        clause
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
