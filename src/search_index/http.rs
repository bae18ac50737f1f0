//! Blocking REST client for a Typesense-compatible search engine.

use std::time::Duration;

use serde_json::{json, Value as JsonValue};

use super::{
    CollectionSchema, FederatedQuery, SearchIndex, SearchIndexError, SearchIndexResult,
    SearchPage, SearchRequest,
};

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

/// One shared, stateless connection reused by all callers. Every call is
/// bounded by the configured timeout; a timeout is just another transport
/// failure to the sync boundary above.
pub struct HttpSearchIndex {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl HttpSearchIndex {
    /// # Arguments
    /// * `base_url` - Engine base URL (e.g. "http://localhost:8108")
    /// * `api_key` - Engine API key
    /// * `timeout_sec` - Per-request timeout in seconds
    pub fn new(base_url: String, api_key: String, timeout_sec: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            client,
            base_url,
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    fn post(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    fn delete(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    fn send(builder: reqwest::blocking::RequestBuilder) -> SearchIndexResult<reqwest::blocking::Response> {
        let response = builder
            .send()
            .map_err(|e| SearchIndexError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SearchIndexError::NotFound);
        }
        let message = response.text().unwrap_or_default();
        Err(SearchIndexError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn read_json(response: reqwest::blocking::Response) -> SearchIndexResult<JsonValue> {
        response
            .json()
            .map_err(|e| SearchIndexError::Decode(e.to_string()))
    }

    fn schema_json(schema: &CollectionSchema) -> JsonValue {
        json!({
            "name": schema.name,
            "fields": schema
                .fields
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "type": f.kind.as_wire_str(),
                        "facet": f.facet,
                        "optional": f.optional,
                        "sort": f.sortable,
                    })
                })
                .collect::<Vec<_>>(),
        })
    }

    fn parse_page(body: &JsonValue) -> SearchIndexResult<SearchPage> {
        let documents = body["hits"]
            .as_array()
            .ok_or_else(|| SearchIndexError::Decode("missing hits array".to_string()))?
            .iter()
            .map(|hit| hit["document"].clone())
            .collect();
        Ok(SearchPage {
            documents,
            total: body["found"].as_u64().unwrap_or(0) as usize,
            page: body["page"].as_u64().unwrap_or(1) as usize,
        })
    }
}

impl SearchIndex for HttpSearchIndex {
    fn ensure_collection(&self, schema: &CollectionSchema) -> SearchIndexResult<()> {
        match Self::send(self.get(&format!("/collections/{}", schema.name))) {
            Ok(_) => Ok(()),
            Err(SearchIndexError::NotFound) => {
                Self::send(self.post("/collections").json(&Self::schema_json(schema)))?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn upsert_document(&self, collection: &str, document: &JsonValue) -> SearchIndexResult<()> {
        Self::send(
            self.post(&format!("/collections/{}/documents", collection))
                .query(&[("action", "upsert")])
                .json(document),
        )?;
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> SearchIndexResult<()> {
        match Self::send(self.delete(&format!("/collections/{}/documents/{}", collection, id))) {
            Ok(_) => Ok(()),
            // Absent document: the delete already holds.
            Err(SearchIndexError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn search(&self, collection: &str, request: &SearchRequest) -> SearchIndexResult<SearchPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", request.query.clone()),
            ("query_by", request.query_by.join(",")),
            ("page", request.page.to_string()),
            ("per_page", request.per_page.to_string()),
        ];
        if let Some(filter_by) = &request.filter_by {
            params.push(("filter_by", filter_by.clone()));
        }
        if let Some(sort_by) = &request.sort_by {
            params.push(("sort_by", sort_by.clone()));
        }
        let response = Self::send(
            self.get(&format!("/collections/{}/documents/search", collection))
                .query(&params),
        )?;
        Self::parse_page(&Self::read_json(response)?)
    }

    fn multi_search(&self, queries: &[FederatedQuery]) -> SearchIndexResult<Vec<SearchPage>> {
        let searches: Vec<JsonValue> = queries
            .iter()
            .map(|q| {
                json!({
                    "collection": q.collection,
                    "q": q.query,
                    "query_by": q.query_by.join(","),
                    "highlight_full_fields": q.highlight_fields.join(","),
                    "per_page": q.per_page,
                })
            })
            .collect();
        let response = Self::send(self.post("/multi_search").json(&json!({ "searches": searches })))?;
        let body = Self::read_json(response)?;
        let results = body["results"]
            .as_array()
            .ok_or_else(|| SearchIndexError::Decode("missing results array".to_string()))?;
        results.iter().map(Self::parse_page).collect()
    }

    fn health(&self) -> SearchIndexResult<()> {
        Self::send(self.get("/health"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_index::{FieldKind, FieldSchema};

    #[test]
    fn trailing_slash_removal() {
        let index = HttpSearchIndex::new(
            "http://localhost:8108/".to_string(),
            "key".to_string(),
            5,
        );
        assert_eq!(index.base_url(), "http://localhost:8108");
    }

    #[test]
    fn schema_serializes_to_wire_shape() {
        let schema = CollectionSchema {
            name: "items",
            fields: vec![
                FieldSchema::new("name", FieldKind::String),
                FieldSchema::new("price", FieldKind::Float).facet().sortable(),
            ],
        };
        let wire = HttpSearchIndex::schema_json(&schema);
        assert_eq!(wire["name"], "items");
        assert_eq!(wire["fields"][1]["type"], "float");
        assert_eq!(wire["fields"][1]["facet"], true);
        assert_eq!(wire["fields"][1]["sort"], true);
    }
}
