//! The catalog service: the seam exposed to the (out of scope) HTTP layer.
//!
//! Mutations run against the canonical store and, only once committed, hand
//! a sync request to the queue. Reads come in two flavors: the relational
//! path (always available, always consistent, supports dynamic attributes)
//! and the search path (fast, facetable, eventually consistent, fixed
//! fields only).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::attribute_store::{AttributeStore, AttributeValue};
use crate::catalog_store::{
    Brand, CatalogStore, Category, Item, NewBrand, NewCategory, NewItem, SqliteCatalogStore,
};
use crate::filter::{FilterCompiler, ItemFilterRequest, SortDirection};
use crate::index_sync::{
    EntityKind, IndexSynchronizer, ReindexReport, SyncQueue, SyncQueueConfig, SyncTrigger,
};
use crate::search_index::documents::{
    BRANDS_COLLECTION, CATEGORIES_COLLECTION, ITEMS_COLLECTION,
};
use crate::search_index::{FederatedQuery, SearchIndex, SearchPage, SearchRequest};

/// One relational result page.
#[derive(Debug, Serialize)]
pub struct ItemPage {
    pub items: Vec<Item>,
    pub total: usize,
    pub last_page: usize,
}

/// The dynamic filters that currently exist, discovered from the data.
#[derive(Debug, Serialize)]
pub struct AvailableFilters {
    pub keys: Vec<String>,
    pub values_by_key: BTreeMap<String, Vec<AttributeValue>>,
}

/// Federated quick-search hits, one bucket per collection.
#[derive(Debug, Default, Serialize)]
pub struct QuickSearchResults {
    pub items: Vec<JsonValue>,
    pub categories: Vec<JsonValue>,
    pub brands: Vec<JsonValue>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub catalog_ok: bool,
    pub search_ok: bool,
    pub items_count: usize,
    pub categories_count: usize,
    pub brands_count: usize,
}

pub struct CatalogService {
    store: Arc<SqliteCatalogStore>,
    attributes: AttributeStore,
    index: Arc<dyn SearchIndex>,
    synchronizer: Arc<IndexSynchronizer>,
    queue: Arc<SyncQueue>,
    trigger: SyncTrigger,
}

impl CatalogService {
    pub fn new(
        store: SqliteCatalogStore,
        index: Arc<dyn SearchIndex>,
        queue_config: SyncQueueConfig,
    ) -> Self {
        let store = Arc::new(store);
        let attributes = AttributeStore::new((*store).clone());
        let synchronizer = Arc::new(IndexSynchronizer::new(
            store.clone() as Arc<dyn CatalogStore>,
            index.clone(),
        ));
        // Best effort: with the engine down, the first reindex (or any
        // later sync retry) creates the collections instead.
        if let Err(e) = synchronizer.ensure_collections() {
            warn!("Could not ensure search collections at startup: {:#}", e);
        }
        let queue = Arc::new(SyncQueue::start(synchronizer.clone(), queue_config));
        let trigger = SyncTrigger::new(queue.clone());
        CatalogService {
            store,
            attributes,
            index,
            synchronizer,
            queue,
            trigger,
        }
    }

    pub fn store(&self) -> &SqliteCatalogStore {
        &self.store
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Wait for every sync enqueued so far to be processed. Tests and
    /// operator tooling only; the mutation path never waits.
    pub fn flush_sync(&self, timeout: Duration) -> bool {
        self.queue.flush(timeout)
    }

    // =========================================================================
    // Mutations (commit, then trigger)
    // =========================================================================

    pub fn create_item(&self, payload: &NewItem) -> Result<Item> {
        let item = self.store.create_item(payload)?;
        self.trigger.after_create(EntityKind::Item, item.id);
        Ok(item)
    }

    pub fn update_item(&self, id: i64, payload: &NewItem) -> Result<Item> {
        let item = self.store.update_item(id, payload)?;
        // Item documents are not embedded anywhere, so the changed-field set
        // is irrelevant here.
        self.trigger.after_update(EntityKind::Item, id, &[]);
        Ok(item)
    }

    pub fn delete_item(&self, id: i64) -> Result<bool> {
        let deleted = self.store.delete_item(id)?;
        if deleted {
            self.trigger.after_delete(EntityKind::Item, id, Vec::new());
        }
        Ok(deleted)
    }

    pub fn set_attribute(&self, item_id: i64, key: &str, value: &AttributeValue) -> Result<()> {
        // No sync: the document schema carries no dynamic attributes.
        self.attributes.set_attribute(item_id, key, value)
    }

    /// Remove one attribute row. Returns false if the item had no such key.
    pub fn delete_attribute(&self, item_id: i64, key: &str) -> Result<bool> {
        self.attributes.delete_attribute(item_id, key)
    }

    pub fn create_category(&self, payload: &NewCategory) -> Result<Category> {
        let category = self.store.create_category(payload)?;
        self.trigger.after_create(EntityKind::Category, category.id);
        Ok(category)
    }

    pub fn update_category(&self, id: i64, payload: &NewCategory) -> Result<Category> {
        let old = self.store.get_category(id)?;
        let category = self.store.update_category(id, payload)?;
        let changed = match old {
            Some(old) => changed_display_fields(&old.name, &old.slug, payload),
            None => Vec::new(),
        };
        self.trigger.after_update(EntityKind::Category, id, &changed);
        Ok(category)
    }

    pub fn delete_category(&self, id: i64) -> Result<bool> {
        // Captured before the delete: the link rows are gone afterwards.
        let affected = self.store.item_ids_in_category(id)?;
        let deleted = self.store.delete_category(id)?;
        if deleted {
            self.trigger.after_delete(EntityKind::Category, id, affected);
        }
        Ok(deleted)
    }

    pub fn create_brand(&self, payload: &NewBrand) -> Result<Brand> {
        let brand = self.store.create_brand(payload)?;
        self.trigger.after_create(EntityKind::Brand, brand.id);
        Ok(brand)
    }

    pub fn update_brand(&self, id: i64, payload: &NewBrand) -> Result<Brand> {
        let old = self.store.get_brand(id)?;
        let brand = self.store.update_brand(id, payload)?;
        let changed = match old {
            Some(old) => {
                let mut changed = Vec::new();
                if old.name != payload.name {
                    changed.push("name");
                }
                if old.slug != payload.slug {
                    changed.push("slug");
                }
                changed
            }
            None => Vec::new(),
        };
        self.trigger.after_update(EntityKind::Brand, id, &changed);
        Ok(brand)
    }

    pub fn delete_brand(&self, id: i64) -> Result<bool> {
        let affected = self.store.item_ids_for_brand(id)?;
        let deleted = self.store.delete_brand(id)?;
        if deleted {
            self.trigger.after_delete(EntityKind::Brand, id, affected);
        }
        Ok(deleted)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Relational path: always consistent, supports dynamic attributes. An
    /// unrecognized sort field falls back to the default, never errors.
    pub fn find_page(
        &self,
        page: usize,
        per_page: usize,
        sort_field: &str,
        sort_direction: SortDirection,
        filters: &ItemFilterRequest,
    ) -> Result<ItemPage> {
        let per_page = per_page.max(1);
        let filter = FilterCompiler::compile_sql(filters);
        let sort = FilterCompiler::resolve_sql_sort(sort_field, sort_direction);
        let (items, total) = self.store.find_items_page(&filter, &sort, page, per_page)?;
        Ok(ItemPage {
            items,
            total,
            last_page: total.div_ceil(per_page).max(1),
        })
    }

    /// Search path: eventually consistent, fixed fields only. Dynamic
    /// attribute criteria in `filters` are ignored here by design.
    pub fn search_items_page(
        &self,
        page: usize,
        per_page: usize,
        sort_field: &str,
        sort_direction: SortDirection,
        filters: &ItemFilterRequest,
    ) -> Result<SearchPage> {
        let request = SearchRequest {
            query: filters
                .search
                .clone()
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| "*".to_string()),
            query_by: vec!["name", "description", "brand_name", "category_names"],
            filter_by: FilterCompiler::compile_search(filters),
            sort_by: Some(FilterCompiler::resolve_search_sort(
                sort_field,
                sort_direction,
            )),
            page: page.max(1),
            per_page: per_page.max(1),
        };
        self.index
            .search(ITEMS_COLLECTION, &request)
            .context("Search index query failed")
    }

    pub fn available_filters(&self) -> Result<AvailableFilters> {
        let keys = self.attributes.available_keys()?;
        let mut values_by_key = BTreeMap::new();
        for key in &keys {
            values_by_key.insert(key.clone(), self.attributes.unique_values(key)?);
        }
        Ok(AvailableFilters {
            keys,
            values_by_key,
        })
    }

    pub fn filter_values(&self, key: &str) -> Result<Vec<AttributeValue>> {
        self.attributes.unique_values(key)
    }

    /// Federated search across all collections, with per-collection query
    /// and highlight fields.
    pub fn quick_search(&self, text: &str, per_page: usize) -> Result<QuickSearchResults> {
        let queries = [
            FederatedQuery {
                collection: ITEMS_COLLECTION,
                query: text.to_string(),
                query_by: vec!["name", "description", "brand_name", "category_names"],
                highlight_fields: vec!["name"],
                per_page,
            },
            FederatedQuery {
                collection: CATEGORIES_COLLECTION,
                query: text.to_string(),
                query_by: vec!["name"],
                highlight_fields: vec!["name"],
                per_page,
            },
            FederatedQuery {
                collection: BRANDS_COLLECTION,
                query: text.to_string(),
                query_by: vec!["name"],
                highlight_fields: vec!["name"],
                per_page,
            },
        ];
        let mut pages = self
            .index
            .multi_search(&queries)
            .context("Federated search failed")?
            .into_iter();
        Ok(QuickSearchResults {
            items: pages.next().map(|p| p.documents).unwrap_or_default(),
            categories: pages.next().map(|p| p.documents).unwrap_or_default(),
            brands: pages.next().map(|p| p.documents).unwrap_or_default(),
        })
    }

    /// Rebuild the whole index from the canonical store.
    pub fn reindex_all(&self) -> Result<ReindexReport> {
        self.synchronizer.reindex_all()
    }

    /// Degrades, never errors: a search outage shows up as `search_ok:
    /// false` while the catalog side keeps reporting truthfully.
    pub fn health(&self) -> HealthReport {
        let counts = self.store.health_check().and_then(|()| {
            Ok((
                self.store.items_count()?,
                self.store.categories_count()?,
                self.store.brands_count()?,
            ))
        });
        let (catalog_ok, (items_count, categories_count, brands_count)) = match counts {
            Ok(counts) => (true, counts),
            Err(e) => {
                warn!("Catalog health check failed: {:#}", e);
                (false, (0, 0, 0))
            }
        };
        let search_ok = match self.index.health() {
            Ok(()) => true,
            Err(e) => {
                warn!("Search index health check failed: {}", e);
                false
            }
        };
        HealthReport {
            catalog_ok,
            search_ok,
            items_count,
            categories_count,
            brands_count,
        }
    }
}

fn changed_display_fields(
    old_name: &str,
    old_slug: &str,
    payload: &NewCategory,
) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old_name != payload.name {
        changed.push("name");
    }
    if old_slug != payload.slug {
        changed.push("slug");
    }
    changed
}
