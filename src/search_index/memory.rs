//! In-process search engine implementation.
//!
//! Implements the whole [`SearchIndex`] surface against hash maps, including
//! evaluation of the `filter_by` wire format, so the synchronizer and the
//! browse path can be exercised end-to-end without a running engine. An
//! outage switch turns every call into a transport error for
//! failure-isolation tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value as JsonValue;

use super::{
    CollectionSchema, FederatedQuery, SearchIndex, SearchIndexError, SearchIndexResult,
    SearchPage, SearchRequest,
};

#[derive(Default)]
pub struct InMemorySearchIndex {
    collections: Mutex<HashMap<String, BTreeMap<String, JsonValue>>>,
    failing: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the simulated outage on or off. While on, every call fails with
    /// a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_up(&self) -> SearchIndexResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SearchIndexError::Transport("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    /// All documents of a collection keyed by id. Test observability; not
    /// part of the [`SearchIndex`] surface.
    pub fn snapshot(&self, collection: &str) -> BTreeMap<String, JsonValue> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<JsonValue> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.lock().unwrap().contains_key(collection)
    }
}

impl SearchIndex for InMemorySearchIndex {
    fn ensure_collection(&self, schema: &CollectionSchema) -> SearchIndexResult<()> {
        self.check_up()?;
        self.collections
            .lock()
            .unwrap()
            .entry(schema.name.to_string())
            .or_default();
        Ok(())
    }

    fn upsert_document(&self, collection: &str, document: &JsonValue) -> SearchIndexResult<()> {
        self.check_up()?;
        let id = document["id"]
            .as_str()
            .ok_or_else(|| SearchIndexError::Decode("document has no string id".to_string()))?
            .to_string();
        let mut collections = self.collections.lock().unwrap();
        let docs = collections
            .get_mut(collection)
            .ok_or(SearchIndexError::NotFound)?;
        docs.insert(id, document.clone());
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> SearchIndexResult<()> {
        self.check_up()?;
        let mut collections = self.collections.lock().unwrap();
        let docs = collections
            .get_mut(collection)
            .ok_or(SearchIndexError::NotFound)?;
        // Removing an absent document is success: the delete already holds.
        docs.remove(id);
        Ok(())
    }

    fn search(&self, collection: &str, request: &SearchRequest) -> SearchIndexResult<SearchPage> {
        self.check_up()?;
        let collections = self.collections.lock().unwrap();
        let docs = collections
            .get(collection)
            .ok_or(SearchIndexError::NotFound)?;

        let mut matches: Vec<JsonValue> = docs
            .values()
            .filter(|doc| matches_query(doc, &request.query, &request.query_by))
            .filter(|doc| {
                request
                    .filter_by
                    .as_deref()
                    .map(|expr| matches_filter(doc, expr))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if let Some(sort_by) = &request.sort_by {
            sort_documents(&mut matches, sort_by);
        }

        let total = matches.len();
        let page = request.page.max(1);
        let per_page = request.per_page.max(1);
        let documents = matches
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        Ok(SearchPage {
            documents,
            total,
            page,
        })
    }

    fn multi_search(&self, queries: &[FederatedQuery]) -> SearchIndexResult<Vec<SearchPage>> {
        self.check_up()?;
        queries
            .iter()
            .map(|q| {
                self.search(
                    q.collection,
                    &SearchRequest {
                        query: q.query.clone(),
                        query_by: q.query_by.clone(),
                        filter_by: None,
                        sort_by: None,
                        page: 1,
                        per_page: q.per_page,
                    },
                )
            })
            .collect()
    }

    fn health(&self) -> SearchIndexResult<()> {
        self.check_up()
    }
}

fn matches_query(doc: &JsonValue, query: &str, query_by: &[&'static str]) -> bool {
    if query == "*" || query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    query_by.iter().any(|field| match &doc[*field] {
        JsonValue::String(s) => s.to_lowercase().contains(&needle),
        JsonValue::Array(values) => values.iter().any(|v| {
            v.as_str()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        }),
        _ => false,
    })
}

/// Evaluate a conjunctive filter expression: `field:=v`, `field:[a,b]`,
/// `field:>=n`, `field:<=n`, joined with `" && "`. There is no OR across
/// distinct fields in the wire format.
fn matches_filter(doc: &JsonValue, expression: &str) -> bool {
    expression
        .split(" && ")
        .all(|clause| matches_clause(doc, clause.trim()))
}

fn matches_clause(doc: &JsonValue, clause: &str) -> bool {
    let Some((field, op)) = clause.split_once(':') else {
        return false;
    };
    let value = &doc[field];

    if let Some(operand) = op.strip_prefix(">=") {
        return compare_numeric(value, operand, |a, b| a >= b);
    }
    if let Some(operand) = op.strip_prefix("<=") {
        return compare_numeric(value, operand, |a, b| a <= b);
    }
    if let Some(operand) = op.strip_prefix('=') {
        return equals(value, operand.trim());
    }
    if let Some(list) = op.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        return list.split(',').any(|candidate| equals(value, candidate.trim()));
    }
    false
}

fn compare_numeric(value: &JsonValue, operand: &str, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (value.as_f64(), operand.trim().parse::<f64>()) {
        (Some(actual), Ok(expected)) => cmp(actual, expected),
        _ => false,
    }
}

/// Equality against a scalar field, or membership when the field is an
/// array.
fn equals(value: &JsonValue, operand: &str) -> bool {
    match value {
        JsonValue::Array(values) => values.iter().any(|v| scalar_equals(v, operand)),
        other => scalar_equals(other, operand),
    }
}

fn scalar_equals(value: &JsonValue, operand: &str) -> bool {
    match value {
        JsonValue::Bool(b) => operand.parse::<bool>().map(|o| *b == o).unwrap_or(false),
        JsonValue::Number(n) => n
            .as_f64()
            .zip(operand.parse::<f64>().ok())
            .map(|(a, b)| a == b)
            .unwrap_or(false),
        JsonValue::String(s) => s == operand,
        _ => false,
    }
}

fn sort_documents(documents: &mut [JsonValue], sort_by: &str) {
    let (field, direction) = sort_by.split_once(':').unwrap_or((sort_by, "asc"));
    let descending = direction == "desc";
    documents.sort_by(|a, b| {
        let ordering = compare_values(&a[field], &b[field]);
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

fn compare_values(a: &JsonValue, b: &JsonValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Null, _) => Ordering::Less,
        (_, JsonValue::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_index::{FieldKind, FieldSchema};
    use serde_json::json;

    fn items_schema() -> CollectionSchema {
        CollectionSchema {
            name: "items",
            fields: vec![FieldSchema::new("name", FieldKind::String)],
        }
    }

    fn seeded() -> InMemorySearchIndex {
        let index = InMemorySearchIndex::new();
        index.ensure_collection(&items_schema()).unwrap();
        for (id, name, price, brand_id, category_ids, active) in [
            ("1", "Red Cable", 10.0, 1, vec![5], true),
            ("2", "Blue Cable", 15.0, 1, vec![5, 6], true),
            ("3", "Green Adapter", 50.0, 2, vec![6], false),
        ] {
            index
                .upsert_document(
                    "items",
                    &json!({
                        "id": id,
                        "name": name,
                        "price": price,
                        "brand_id": brand_id,
                        "category_ids": category_ids,
                        "is_active": active,
                    }),
                )
                .unwrap();
        }
        index
    }

    fn search_with_filter(index: &InMemorySearchIndex, filter: &str) -> Vec<String> {
        let mut request = SearchRequest::match_all(1, 10);
        request.filter_by = Some(filter.to_string());
        request.sort_by = Some("price:asc".to_string());
        index
            .search("items", &request)
            .unwrap()
            .documents
            .iter()
            .map(|d| d["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn filter_expression_evaluation() {
        let index = seeded();
        assert_eq!(search_with_filter(&index, "brand_id:=1"), vec!["1", "2"]);
        assert_eq!(search_with_filter(&index, "brand_id:[1,2]").len(), 3);
        assert_eq!(
            search_with_filter(&index, "price:>=15 && price:<=60"),
            vec!["2", "3"]
        );
        assert_eq!(search_with_filter(&index, "is_active:=false"), vec!["3"]);
        // Array field: equality means membership.
        assert_eq!(search_with_filter(&index, "category_ids:=6"), vec!["2", "3"]);
        assert_eq!(
            search_with_filter(&index, "category_ids:[5,6]").len(),
            3
        );
    }

    #[test]
    fn text_query_matches_query_by_fields() {
        let index = seeded();
        let request = SearchRequest {
            query: "cable".to_string(),
            query_by: vec!["name"],
            filter_by: None,
            sort_by: Some("price:desc".to_string()),
            page: 1,
            per_page: 10,
        };
        let page = index.search("items", &request).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.documents[0]["id"], "2");
    }

    #[test]
    fn pagination_reports_full_total() {
        let index = seeded();
        let mut request = SearchRequest::match_all(2, 2);
        request.sort_by = Some("price:asc".to_string());
        let page = index.search("items", &request).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.documents[0]["id"], "3");
    }

    #[test]
    fn delete_is_idempotent() {
        let index = seeded();
        index.delete_document("items", "1").unwrap();
        // Second delete of the same id: still success.
        index.delete_document("items", "1").unwrap();
        assert_eq!(index.snapshot("items").len(), 2);
    }

    #[test]
    fn outage_switch_fails_every_call() {
        let index = seeded();
        index.set_failing(true);
        assert!(matches!(
            index.health(),
            Err(SearchIndexError::Transport(_))
        ));
        assert!(index
            .upsert_document("items", &json!({"id": "9"}))
            .is_err());
        index.set_failing(false);
        assert!(index.health().is_ok());
    }
}
