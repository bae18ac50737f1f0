//! Search index client seam.
//!
//! The engine holds one denormalized collection per entity kind and is a
//! best-effort, eventually-consistent replica of the catalog, never a
//! source of truth. [`HttpSearchIndex`] talks to a real engine over REST;
//! [`InMemorySearchIndex`] is a full in-process implementation used by tests
//! and offline tooling.

pub mod documents;
mod http;
mod memory;

pub use http::HttpSearchIndex;
pub use memory::InMemorySearchIndex;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub type SearchIndexResult<T> = Result<T, SearchIndexError>;

/// Derived-index failure taxonomy. Everything in here is caught at the sync
/// boundary and never reaches a catalog writer.
#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("search engine unreachable: {0}")]
    Transport(String),
    #[error("search engine returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("not found")]
    NotFound,
    #[error("malformed search engine response: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    StringArray,
    Int,
    IntArray,
    Float,
    Bool,
}

impl FieldKind {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::StringArray => "string[]",
            FieldKind::Int => "int64",
            FieldKind::IntArray => "int64[]",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub facet: bool,
    pub optional: bool,
    pub sortable: bool,
}

impl FieldSchema {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        FieldSchema {
            name,
            kind,
            facet: false,
            optional: false,
            sortable: false,
        }
    }

    pub const fn facet(mut self) -> Self {
        self.facet = true;
        self
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub const fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct CollectionSchema {
    pub name: &'static str,
    pub fields: Vec<FieldSchema>,
}

/// Single-collection paginated search.
#[derive(Clone, Debug, Serialize)]
pub struct SearchRequest {
    /// `*` matches everything.
    pub query: String,
    pub query_by: Vec<&'static str>,
    pub filter_by: Option<String>,
    /// `field:direction`, already validated/corrected by the filter
    /// compiler.
    pub sort_by: Option<String>,
    pub page: usize,
    pub per_page: usize,
}

impl SearchRequest {
    pub fn match_all(page: usize, per_page: usize) -> Self {
        SearchRequest {
            query: "*".to_string(),
            query_by: Vec::new(),
            filter_by: None,
            sort_by: None,
            page,
            per_page,
        }
    }
}

/// One federated sub-query with its own query-field and highlight
/// configuration.
#[derive(Clone, Debug, Serialize)]
pub struct FederatedQuery {
    pub collection: &'static str,
    pub query: String,
    pub query_by: Vec<&'static str>,
    pub highlight_fields: Vec<&'static str>,
    pub per_page: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SearchPage {
    pub documents: Vec<JsonValue>,
    pub total: usize,
    pub page: usize,
}

/// The engine interface the subsystem consumes. All calls are blocking round
/// trips on one shared stateless client.
pub trait SearchIndex: Send + Sync {
    /// Create-if-absent; existing collections are left untouched.
    fn ensure_collection(&self, schema: &CollectionSchema) -> SearchIndexResult<()>;

    /// Idempotent upsert keyed by the document's `id` field.
    fn upsert_document(&self, collection: &str, document: &JsonValue) -> SearchIndexResult<()>;

    /// Idempotent delete; removing an absent document is success, not an
    /// error.
    fn delete_document(&self, collection: &str, id: &str) -> SearchIndexResult<()>;

    fn search(&self, collection: &str, request: &SearchRequest) -> SearchIndexResult<SearchPage>;

    fn multi_search(&self, queries: &[FederatedQuery]) -> SearchIndexResult<Vec<SearchPage>>;

    fn health(&self) -> SearchIndexResult<()>;
}
