//! Request-parameter parsing: filters, sorting, paging and search.

use crate::config::QueryConfig;
use crate::error::Result;
use crate::query::filter::Filter;
use crate::sql::ident::sanitize_column_reference;

const RESERVED: &[&str] = &[
    "page",
    "page_size",
    "limit",
    "offset",
    "sort_by",
    "order_by",
    "sort_order",
    "order_dir",
    "q",
];

/// Whether `key` controls paging, sorting or search rather than filtering.
pub fn is_reserved(key: &str) -> bool {
    RESERVED
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(key))
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// `desc` in any case is descending; anything else is ascending.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }

    /// SQL keyword.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Resolved page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// One-based page number.
    pub page: u64,
    /// Rows per page; also the `LIMIT`.
    pub page_size: u64,
    /// Rows skipped.
    pub offset: u64,
}

/// Everything a row listing request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    /// Filters in request order; all are ANDed.
    pub filters: Vec<Filter>,
    /// Sanitized sort column; `None` sorts by the table's default key.
    pub sort_by: Option<String>,
    /// Sort direction, also used for the tiebreaker.
    pub direction: SortDirection,
    /// Page window.
    pub pagination: Pagination,
    /// Free-text search.
    pub search: Option<String>,
}

#[derive(Default)]
struct Directives<'a> {
    page: Option<&'a str>,
    page_size: Option<&'a str>,
    offset: Option<&'a str>,
    sort_by: Option<&'a str>,
    direction: Option<&'a str>,
    search: Option<&'a str>,
}

impl<'a> Directives<'a> {
    /// Record a reserved key. The first occurrence wins.
    fn set(&mut self, key: &str, value: &'a str) {
        let slot = match key.to_ascii_lowercase().as_str() {
            "page" => &mut self.page,
            "page_size" | "limit" => &mut self.page_size,
            "offset" => &mut self.offset,
            "sort_by" | "order_by" => &mut self.sort_by,
            "sort_order" | "order_dir" => &mut self.direction,
            "q" => &mut self.search,
            _ => return,
        };
        slot.get_or_insert(value);
    }
}

impl QueryParams {
    /// Parse an ordered multimap of request pairs.
    ///
    /// Malformed numbers fall back to defaults; malformed filters are
    /// rejected with [`Error::Validation`](crate::error::Error::Validation).
    pub fn parse<'a, I>(pairs: I, config: &QueryConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut directives = Directives::default();
        let mut filters = Vec::new();

        for (key, value) in pairs {
            if is_reserved(key) {
                directives.set(key, value);
            } else if let Some(filter) = Filter::from_pair(key, value)? {
                filters.push(filter);
            }
        }

        let sort_by = directives
            .sort_by
            .map(sanitize_column_reference)
            .filter(|column| !column.is_empty());
        let search = directives
            .search
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        Ok(Self {
            filters,
            sort_by,
            direction: directives.direction.map(SortDirection::parse).unwrap_or_default(),
            pagination: paginate(&directives, config),
            search,
        })
    }

    /// Parameters with no filters and the default page.
    pub fn first_page(config: &QueryConfig) -> Self {
        Self {
            filters: Vec::new(),
            sort_by: None,
            direction: SortDirection::Asc,
            pagination: paginate(&Directives::default(), config),
            search: None,
        }
    }
}

fn paginate(directives: &Directives<'_>, config: &QueryConfig) -> Pagination {
    let max_page_size = config.max_page_size.max(1);
    let default_page_size = config.default_page_size.clamp(1, max_page_size);

    let page_size = directives
        .page_size
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|size| (1..=max_page_size).contains(size))
        .unwrap_or(default_page_size);
    let requested_page = directives
        .page
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map_or(1, |page| u64::try_from(page.max(1)).unwrap_or(1));
    let explicit_offset = directives
        .offset
        .and_then(|raw| raw.trim().parse::<u64>().ok());

    match explicit_offset {
        Some(offset) => Pagination {
            page: offset / page_size + 1,
            page_size,
            offset,
        },
        None => Pagination {
            page: requested_page,
            page_size,
            offset: (requested_page - 1).saturating_mul(page_size),
        },
    }
}
