//! Filter compilation.
//!
//! A single [`ItemFilterRequest`] compiles into two query forms: a
//! [`SqlFilter`] applied to the canonical store, and a search-engine
//! `filter_by` expression string. Fixed fields exist on both paths; dynamic
//! attribute criteria compile only to SQL because the denormalized document
//! schema is fixed and carries no arbitrary attributes. That asymmetry is
//! intentional: callers that filter on attributes must use the relational
//! path.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use crate::attribute_store::{AttributeStore, AttributeValue};

/// A scalar criterion or an IN-list for one attribute key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Many(Vec<AttributeValue>),
    One(AttributeValue),
}

impl FilterValue {
    pub fn values(&self) -> &[AttributeValue] {
        match self {
            FilterValue::One(v) => std::slice::from_ref(v),
            FilterValue::Many(vs) => vs,
        }
    }
}

/// Heterogeneous filter criteria: typed columns plus an open map of dynamic
/// attribute criteria. Absent or empty fields mean "no constraint", never
/// "empty result".
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemFilterRequest {
    pub search: Option<String>,
    pub category_ids: Vec<i64>,
    pub brand_ids: Vec<i64>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub in_stock: Option<bool>,
    pub attributes: BTreeMap<String, FilterValue>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    fn as_search(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Accumulated WHERE clauses plus owned parameters, ready to run against the
/// items table.
#[derive(Debug, Default)]
pub struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl SqlFilter {
    pub fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = SqlValue>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    /// `" WHERE ..."` with a leading space, or empty when unconstrained.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn param_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.params.iter().map(|p| p as &dyn rusqlite::ToSql).collect()
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }
}

/// A validated relational sort. Only constructed through
/// [`FilterCompiler::resolve_sql_sort`], so the column name is always from
/// the allow-list and safe to interpolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlSort {
    pub column: &'static str,
    pub direction: SortDirection,
}

impl SqlSort {
    pub fn order_by_sql(&self) -> String {
        format!(" ORDER BY {} {}", self.column, self.direction.as_sql())
    }
}

const DEFAULT_SQL_SORT: SqlSort = SqlSort {
    column: "created_at",
    direction: SortDirection::Desc,
};

pub struct FilterCompiler;

impl FilterCompiler {
    /// Relational query augmentation. Typed-column predicates are applied
    /// directly; dynamic attribute criteria are delegated to the attribute
    /// store's correlated-existence builder.
    pub fn compile_sql(request: &ItemFilterRequest) -> SqlFilter {
        let mut sql = SqlFilter::default();

        if let Some(text) = non_empty(&request.search) {
            let pattern = format!("%{}%", text);
            sql.push(
                "(name LIKE ? OR description LIKE ?)",
                [SqlValue::Text(pattern.clone()), SqlValue::Text(pattern)],
            );
        }

        if !request.category_ids.is_empty() {
            let placeholders = placeholders(request.category_ids.len());
            sql.push(
                format!(
                    "EXISTS (SELECT 1 FROM item_categories ic \
                     WHERE ic.item_id = items.id AND ic.category_id IN ({}))",
                    placeholders
                ),
                request.category_ids.iter().map(|id| SqlValue::Integer(*id)),
            );
        }

        if !request.brand_ids.is_empty() {
            let placeholders = placeholders(request.brand_ids.len());
            sql.push(
                format!("brand_id IN ({})", placeholders),
                request.brand_ids.iter().map(|id| SqlValue::Integer(*id)),
            );
        }

        if let Some(min) = request.price_min {
            sql.push("price >= ?", [SqlValue::Real(min)]);
        }
        if let Some(max) = request.price_max {
            sql.push("price <= ?", [SqlValue::Real(max)]);
        }

        if let Some(active) = request.is_active {
            sql.push("is_active = ?", [SqlValue::Integer(active as i64)]);
        }
        if let Some(featured) = request.is_featured {
            sql.push("is_featured = ?", [SqlValue::Integer(featured as i64)]);
        }
        if let Some(in_stock) = request.in_stock {
            if in_stock {
                sql.push("stock_quantity > 0", []);
            } else {
                sql.push("stock_quantity <= 0", []);
            }
        }

        AttributeStore::push_filter(&mut sql, &request.attributes);

        sql
    }

    /// Search-engine filter expression: one clause per present fixed field,
    /// conjoined with `" && "`. Free text is the engine's query string, not
    /// part of the filter expression. Returns `None` when unconstrained.
    pub fn compile_search(request: &ItemFilterRequest) -> Option<String> {
        let mut clauses = Vec::new();

        match request.category_ids.as_slice() {
            [] => {}
            [id] => clauses.push(format!("category_ids:={}", id)),
            ids => clauses.push(format!("category_ids:[{}]", join_ids(ids))),
        }
        match request.brand_ids.as_slice() {
            [] => {}
            [id] => clauses.push(format!("brand_id:={}", id)),
            ids => clauses.push(format!("brand_id:[{}]", join_ids(ids))),
        }
        if let Some(min) = request.price_min {
            clauses.push(format!("price:>={}", format_number(min)));
        }
        if let Some(max) = request.price_max {
            clauses.push(format!("price:<={}", format_number(max)));
        }
        if let Some(active) = request.is_active {
            clauses.push(format!("is_active:={}", active));
        }
        if let Some(featured) = request.is_featured {
            clauses.push(format!("is_featured:={}", featured));
        }
        if let Some(in_stock) = request.in_stock {
            clauses.push(format!("in_stock:={}", in_stock));
        }

        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" && "))
        }
    }

    /// Validate a requested sort against the relational allow-list. Anything
    /// unrecognized silently falls back to `created_at DESC`.
    pub fn resolve_sql_sort(field: &str, direction: SortDirection) -> SqlSort {
        let column = match field {
            "name" => "name",
            "price" => "price",
            "created_at" => "created_at",
            "stock" => "stock_quantity",
            _ => return DEFAULT_SQL_SORT,
        };
        SqlSort { column, direction }
    }

    /// Sort-field correction for the items collection. Display-oriented keys
    /// with no sortable counterpart (`name` included) are rewritten to the
    /// default rather than rejected.
    pub fn resolve_search_sort(field: &str, direction: SortDirection) -> String {
        let field = match field {
            "price" => "price",
            "created_at" => "created_at",
            "stock" => "stock_quantity",
            _ => return "created_at:desc".to_string(),
        };
        format!("{}:{}", field, direction.as_search())
    }
}

fn non_empty(text: &Option<String>) -> Option<&str> {
    text.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a float the way the engine stores it: no trailing `.0` on whole
/// numbers.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_compiles_to_no_constraint() {
        let request = ItemFilterRequest::default();
        let sql = FilterCompiler::compile_sql(&request);
        assert_eq!(sql.where_sql(), "");
        assert_eq!(FilterCompiler::compile_search(&request), None);
    }

    #[test]
    fn fixed_fields_compile_to_sql_clauses() {
        let request = ItemFilterRequest {
            search: Some("cable".to_string()),
            category_ids: vec![1, 2],
            brand_ids: vec![7],
            price_min: Some(5.0),
            price_max: Some(20.0),
            is_active: Some(true),
            in_stock: Some(true),
            ..Default::default()
        };
        let sql = FilterCompiler::compile_sql(&request);
        let where_sql = sql.where_sql();
        assert!(where_sql.contains("name LIKE ?"));
        assert!(where_sql.contains("ic.category_id IN (?,?)"));
        assert!(where_sql.contains("brand_id IN (?)"));
        assert!(where_sql.contains("price >= ?"));
        assert!(where_sql.contains("price <= ?"));
        assert!(where_sql.contains("is_active = ?"));
        assert!(where_sql.contains("stock_quantity > 0"));
        assert_eq!(sql.param_refs().len(), 8);
    }

    #[test]
    fn search_expression_wire_format() {
        let request = ItemFilterRequest {
            category_ids: vec![1, 2],
            brand_ids: vec![7],
            price_min: Some(10.0),
            price_max: Some(19.5),
            is_active: Some(true),
            ..Default::default()
        };
        assert_eq!(
            FilterCompiler::compile_search(&request).unwrap(),
            "category_ids:[1,2] && brand_id:=7 && price:>=10 && price:<=19.5 && is_active:=true"
        );
    }

    #[test]
    fn attribute_criteria_do_not_reach_the_search_expression() {
        let mut request = ItemFilterRequest::default();
        request.attributes.insert(
            "color".to_string(),
            FilterValue::One(AttributeValue::Str("red".to_string())),
        );
        assert_eq!(FilterCompiler::compile_search(&request), None);
        // ...but they do reach the SQL path.
        let sql = FilterCompiler::compile_sql(&request);
        assert!(sql.where_sql().contains("item_attributes"));
    }

    #[test]
    fn unknown_sort_field_falls_back_to_default() {
        assert_eq!(
            FilterCompiler::resolve_sql_sort("no_such_column; DROP TABLE", SortDirection::Asc),
            DEFAULT_SQL_SORT
        );
        assert_eq!(
            FilterCompiler::resolve_sql_sort("price", SortDirection::Asc),
            SqlSort {
                column: "price",
                direction: SortDirection::Asc
            }
        );
        // `name` is a display field in the collection, not sortable there.
        assert_eq!(
            FilterCompiler::resolve_search_sort("name", SortDirection::Asc),
            "created_at:desc"
        );
        assert_eq!(
            FilterCompiler::resolve_search_sort("price", SortDirection::Asc),
            "price:asc"
        );
    }
}
