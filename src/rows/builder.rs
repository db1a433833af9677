//! SELECT and COUNT statements over one table.

use sqlparser::ast::{SetExpr, Statement as SqlStatement, TableFactor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{Error, Result};
use crate::query::filter::{column_ident, RowTyping, ValueTyping, BASE_ALIAS};
use crate::query::params::QueryParams;
use crate::query::translator::Translator;
use crate::sql::ident::{is_valid_column_reference, Ident};
use crate::sql::statement::{Fragment, Statement};

/// Builder for listing queries against a single base table aliased `t`.
#[derive(Debug, Clone)]
pub struct RowQuery {
    relation: Ident,
    primary_key: String,
    translator: Translator,
    typing: Option<RowTyping>,
    projection: Vec<Ident>,
    join: Option<String>,
}

impl RowQuery {
    /// Query `relation`, using `primary_key` as default sort and tiebreaker.
    ///
    /// Filter values are typed through the row type of the relation each
    /// filter column belongs to.
    pub fn new(relation: Ident, primary_key: impl Into<String>, search_language: &str) -> Self {
        Self {
            typing: Some(RowTyping::new(relation.clone())),
            relation,
            primary_key: primary_key.into(),
            translator: Translator::new(search_language),
            projection: Vec::new(),
            join: None,
        }
    }

    /// Replace the translator; its own value typing is used as is, e.g. to
    /// render untyped placeholders.
    #[must_use]
    pub fn with_translator(mut self, translator: Translator) -> Self {
        self.translator = translator;
        self.typing = None;
        self
    }

    /// Base-table columns declared `json`/`jsonb`.
    #[must_use]
    pub fn with_json_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.typing = self.typing.map(|typing| typing.with_json_columns(columns));
        self
    }

    /// Project only `columns` instead of `t.*`.
    pub fn select<I, S>(mut self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut projection = Vec::new();
        for column in columns {
            let column = column.as_ref().trim();
            if column.is_empty() {
                continue;
            }
            if !is_valid_column_reference(column) {
                return Err(Error::Validation(format!(
                    "invalid projection column '{column}'"
                )));
            }
            projection.push(column_ident(column));
        }
        self.projection = projection;
        Ok(self)
    }

    /// Add a join clause written by the embedding application.
    ///
    /// The text is placed verbatim after `FROM <table> t`. It is parsed once to
    /// learn which relation each join alias names, so filters on joined
    /// columns are typed like the joined column.
    pub fn join(mut self, trusted_clause: &str) -> Result<Self> {
        let clause = trusted_clause.trim();
        if clause.is_empty() {
            self.join = None;
            return Ok(self);
        }
        for (alias, relation) in joined_relations(clause)? {
            self.typing = self.typing.map(|typing| typing.with_joined(alias, relation));
        }
        self.join = Some(clause.to_string());
        Ok(self)
    }

    fn translator(&self) -> Translator {
        match &self.typing {
            Some(typing) => self
                .translator
                .clone()
                .with_typing(ValueTyping::RowType(typing.clone())),
            None => self.translator.clone(),
        }
    }

    /// Filters may only name the base alias or an alias the join declares.
    fn check_filter_qualifiers(&self, params: &QueryParams) -> Result<()> {
        let Some(typing) = &self.typing else {
            return Ok(());
        };
        for filter in &params.filters {
            let column = column_ident(&filter.column);
            if typing.relation_for(column.qualifier()).is_none() {
                return Err(Error::Validation(format!(
                    "filter column '{}' does not refer to the table or a joined table",
                    filter.column
                )));
            }
        }
        Ok(())
    }

    fn from_clause(&self) -> Fragment {
        let mut from = Fragment::new();
        from.sql(" FROM ").ident(&self.relation).sql(" t");
        if let Some(join) = &self.join {
            from.sql(" ").trusted(join);
        }
        from
    }

    /// `SELECT <cols> FROM <table> t [join] [WHERE] ORDER BY .. LIMIT $ OFFSET $`.
    pub fn select_statement(&self, params: &QueryParams) -> Result<Statement> {
        self.check_filter_qualifiers(params)?;
        let translator = self.translator();
        let mut query = Fragment::new();
        query.sql("SELECT ");
        if self.projection.is_empty() {
            query.sql("t.*");
        } else {
            for (idx, column) in self.projection.iter().enumerate() {
                if idx > 0 {
                    query.sql(", ");
                }
                query.ident(column);
            }
        }
        query
            .append(&self.from_clause())
            .append(&translator.where_clause(params))
            .append(&translator.order_by(params, &self.primary_key))
            .append(&translator.pagination(&params.pagination));
        Ok(query.build())
    }

    /// `SELECT COUNT(*) AS total FROM <table> t [join] [WHERE]`.
    pub fn count_statement(&self, params: &QueryParams) -> Result<Statement> {
        self.check_filter_qualifiers(params)?;
        let mut query = Fragment::new();
        query
            .sql("SELECT COUNT(*) AS total")
            .append(&self.from_clause())
            .append(&self.translator().where_clause(params));
        Ok(query.build())
    }
}

/// Alias and relation of every table a join clause brings in. Tables joined
/// without an alias are known by their own name.
fn joined_relations(clause: &str) -> Result<Vec<(String, Ident)>> {
    let sql = format!("SELECT 1 FROM rowgate_base {BASE_ALIAS} {clause}");
    let invalid = |detail: String| Error::Validation(format!("invalid join clause: {detail}"));
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql)
        .map_err(|e| invalid(e.to_string()))?;
    let [SqlStatement::Query(query)] = statements.as_slice() else {
        return Err(invalid("expected joins only".to_string()));
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(invalid("expected joins only".to_string()));
    };

    let mut relations = Vec::new();
    for from in &select.from {
        for join in &from.joins {
            if let TableFactor::Table { name, alias, .. } = &join.relation {
                let relation = Ident::parse_sql_name(&name.to_string());
                let alias = match alias {
                    Some(alias) if alias.name.quote_style.is_some() => alias.name.value.clone(),
                    Some(alias) => alias.name.value.to_lowercase(),
                    None => relation.terminal().to_string(),
                };
                relations.push((alias, relation));
            }
        }
    }
    Ok(relations)
}

/// `t."<pk>" = <id>` with the id typed like the key column.
pub(crate) fn key_predicate(relation: &Ident, primary_key: &str, id: &str) -> Fragment {
    let mut predicate = Fragment::new();
    let key = Ident::qualified(BASE_ALIAS, primary_key);
    predicate
        .ident(&key)
        .sql(" = (jsonb_populate_record(NULL::")
        .ident(relation)
        .sql(", jsonb_build_object(")
        .literal(primary_key)
        .sql(", ")
        .bind(id)
        .sql("::text))).")
        .ident(&Ident::new(primary_key));
    predicate
}

/// `SELECT t.* FROM <table> t WHERE t."<pk>" = $1`.
pub fn by_id_statement(relation: &Ident, primary_key: &str, id: &str) -> Statement {
    let mut query = Fragment::new();
    query
        .sql("SELECT t.* FROM ")
        .ident(relation)
        .sql(" t WHERE ")
        .append(&key_predicate(relation, primary_key, id));
    query.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        QueryParams::parse(pairs.iter().copied(), &QueryConfig::default()).unwrap()
    }

    #[test]
    fn select_and_count_share_filters_but_not_paging() {
        let query = RowQuery::new(Ident::qualified("public", "users"), "id", "english")
            .with_translator(Translator::new("english"));
        let params = params(&[("active", "true"), ("page", "2")]);

        let select = query.select_statement(&params).unwrap();
        assert_eq!(
            select.sql(),
            r#"SELECT t.* FROM "public"."users" t WHERE "t"."active" = $1 ORDER BY "t"."id" ASC LIMIT $2 OFFSET $3"#
        );
        assert_eq!(select.args().len(), 3);

        let count = query.count_statement(&params).unwrap();
        assert_eq!(
            count.sql(),
            r#"SELECT COUNT(*) AS total FROM "public"."users" t WHERE "t"."active" = $1"#
        );
        assert_eq!(count.args().len(), 1);
    }

    #[test]
    fn projection_and_join_are_rendered() {
        let query = RowQuery::new(Ident::qualified("public", "posts"), "id", "english")
            .with_translator(Translator::new("english"))
            .select(["title", "u.name"])
            .unwrap()
            .join("JOIN users u ON u.id = t.author_id")
            .unwrap();
        let select = query.select_statement(&params(&[])).unwrap();
        assert_eq!(
            select.sql(),
            r#"SELECT "t"."title", "u"."name" FROM "public"."posts" t JOIN users u ON u.id = t.author_id ORDER BY "t"."id" ASC LIMIT $1 OFFSET $2"#
        );
    }

    #[test]
    fn join_aliases_resolve_to_their_relations() {
        let relations = joined_relations(
            "JOIN Sales.Orders AS O ON O.user_id = t.id LEFT JOIN \"Audit\" ON true",
        )
        .unwrap();
        assert_eq!(
            relations,
            vec![
                ("o".to_string(), Ident::qualified("sales", "orders")),
                ("Audit".to_string(), Ident::new("Audit")),
            ]
        );
        assert!(matches!(
            joined_relations("JOIN orders o ON"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn filters_on_joined_columns_use_the_joined_row_type() {
        let query = RowQuery::new(Ident::qualified("public", "users"), "id", "english")
            .join("JOIN orders o ON o.user_id = t.id")
            .unwrap();
        let count = query.count_statement(&params(&[("o.total__gt", "5")])).unwrap();
        assert_eq!(
            count.sql(),
            r#"SELECT COUNT(*) AS total FROM "public"."users" t JOIN orders o ON o.user_id = t.id WHERE "o"."total" > (jsonb_populate_record(NULL::"orders", jsonb_build_object('total', $1::text)))."total""#
        );

        let err = query
            .select_statement(&params(&[("x.total__gt", "5")]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(message) if message.contains("x.total")));
    }

    #[test]
    fn json_columns_are_typed_as_documents() {
        let query = RowQuery::new(Ident::qualified("public", "docs"), "id", "english")
            .with_json_columns(["meta"]);
        let count = query.count_statement(&params(&[("meta", r#"{"k":1}"#)])).unwrap();
        assert!(count.sql().ends_with(r#"jsonb_build_object('meta', $1::jsonb)))."meta""#));
    }

    #[test]
    fn projection_rejects_expressions() {
        let result = RowQuery::new(Ident::qualified("public", "posts"), "id", "english")
            .select(["count(*)"]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn by_id_types_the_key_through_the_row_type() {
        let statement = by_id_statement(&Ident::qualified("public", "users"), "id", "42");
        assert_eq!(
            statement.sql(),
            r#"SELECT t.* FROM "public"."users" t WHERE "t"."id" = (jsonb_populate_record(NULL::"public"."users", jsonb_build_object('id', $1::text)))."id""#
        );
    }
}
