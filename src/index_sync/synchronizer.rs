//! Rebuilds search documents from the canonical store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{EntityKind, SyncAction, SyncRequest};
use crate::catalog_store::CatalogStore;
use crate::metrics;
use crate::search_index::documents::{
    BrandFormatter, CategoryFormatter, DocumentFormatter, ItemFormatter,
};
use crate::search_index::{SearchIndex, SearchRequest};

pub struct IndexSynchronizer {
    store: Arc<dyn CatalogStore>,
    index: Arc<dyn SearchIndex>,
    item_formatter: ItemFormatter,
    category_formatter: CategoryFormatter,
    brand_formatter: BrandFormatter,
    /// Last applied version per entity, for discarding requests that were
    /// overtaken by a newer one while queued or retrying.
    last_applied: Mutex<HashMap<(EntityKind, i64), u64>>,
}

/// Outcome of a full reindex. Per-document failures don't abort the run;
/// they are counted here and logged where they happen.
#[derive(Debug, Default)]
pub struct ReindexReport {
    pub counts: Vec<(&'static str, usize)>,
    pub pruned: usize,
    pub failed: usize,
}

impl IndexSynchronizer {
    pub fn new(store: Arc<dyn CatalogStore>, index: Arc<dyn SearchIndex>) -> Self {
        IndexSynchronizer {
            store,
            index,
            item_formatter: ItemFormatter,
            category_formatter: CategoryFormatter,
            brand_formatter: BrandFormatter,
            last_applied: Mutex::new(HashMap::new()),
        }
    }

    fn formatter(&self, kind: EntityKind) -> &dyn DocumentFormatter {
        match kind {
            EntityKind::Item => &self.item_formatter,
            EntityKind::Category => &self.category_formatter,
            EntityKind::Brand => &self.brand_formatter,
        }
    }

    /// Reindex order: items first (the bulk), then the parents.
    fn formatters(&self) -> [&dyn DocumentFormatter; 3] {
        [
            &self.item_formatter,
            &self.category_formatter,
            &self.brand_formatter,
        ]
    }

    fn is_stale(&self, request: &SyncRequest) -> bool {
        let last_applied = self.last_applied.lock().unwrap();
        last_applied
            .get(&(request.kind, request.id))
            .map(|&last| request.version <= last)
            .unwrap_or(false)
    }

    fn record_applied(&self, kind: EntityKind, id: i64, version: u64) {
        let mut last_applied = self.last_applied.lock().unwrap();
        let entry = last_applied.entry((kind, id)).or_insert(0);
        if version > *entry {
            *entry = version;
        }
    }

    /// Re-read one entity and upsert its document, or remove the document
    /// when the entity is gone from the canonical store.
    fn refresh_document(&self, formatter: &dyn DocumentFormatter, id: i64) -> Result<()> {
        match formatter.build(self.store.as_ref(), id)? {
            Some(document) => self.index.upsert_document(formatter.collection(), &document)?,
            None => {
                debug!(
                    "{} {} no longer exists, removing its document",
                    formatter.collection(),
                    id
                );
                self.index
                    .delete_document(formatter.collection(), &id.to_string())?;
            }
        }
        Ok(())
    }

    /// Apply one sync request. Fallible on purpose: the queue, not the
    /// catalog writer, decides what a failure means.
    pub fn sync(&self, request: &SyncRequest) -> Result<()> {
        if self.is_stale(request) {
            metrics::SYNC_DISCARDED_TOTAL.inc();
            debug!(
                "Discarding stale sync request for {} {} (version {})",
                request.kind.as_str(),
                request.id,
                request.version
            );
            return Ok(());
        }

        let formatter = self.formatter(request.kind);
        match request.action {
            SyncAction::Delete => {
                // Idempotent: the engine tolerates removing an absent
                // document.
                self.index
                    .delete_document(formatter.collection(), &request.id.to_string())?;
            }
            SyncAction::Create | SyncAction::Update => {
                self.refresh_document(formatter, request.id)?;
            }
        }

        if request.cascade {
            self.cascade(request)?;
        }

        self.record_applied(request.kind, request.id, request.version);
        Ok(())
    }

    /// Re-derive every document that embeds a copy of this entity's display
    /// fields.
    fn cascade(&self, request: &SyncRequest) -> Result<()> {
        match request.kind {
            EntityKind::Category => {
                // Item documents copy category names/slugs.
                let item_ids = self.store.item_ids_in_category(request.id)?;
                debug!(
                    "Cascading category {} change to {} items",
                    request.id,
                    item_ids.len()
                );
                for item_id in item_ids {
                    self.refresh_document(&self.item_formatter, item_id)?;
                    self.record_applied(EntityKind::Item, item_id, request.version);
                }
                // Descendant category documents embed this category's name
                // in their breadcrumb.
                for category_id in self.store.descendant_category_ids(request.id)? {
                    self.refresh_document(&self.category_formatter, category_id)?;
                    self.record_applied(EntityKind::Category, category_id, request.version);
                }
            }
            EntityKind::Brand => {
                let item_ids = self.store.item_ids_for_brand(request.id)?;
                debug!(
                    "Cascading brand {} change to {} items",
                    request.id,
                    item_ids.len()
                );
                for item_id in item_ids {
                    self.refresh_document(&self.item_formatter, item_id)?;
                    self.record_applied(EntityKind::Item, item_id, request.version);
                }
            }
            // Item documents are not embedded anywhere.
            EntityKind::Item => {}
        }
        Ok(())
    }

    /// Refresh specific item documents (used after a delete removed the
    /// relation rows a cascade would have walked).
    pub fn resync_items(&self, item_ids: &[i64]) -> Result<()> {
        for item_id in item_ids {
            self.refresh_document(&self.item_formatter, *item_id)?;
        }
        Ok(())
    }

    /// Create any missing collections. Idempotent; existing collections and
    /// their documents are untouched.
    pub fn ensure_collections(&self) -> Result<()> {
        for formatter in self.formatters() {
            self.index.ensure_collection(&formatter.schema())?;
        }
        Ok(())
    }

    /// Rebuild every document of every kind from the canonical store,
    /// sequentially by kind. Creates missing collections first, removes
    /// documents whose source entity is gone last. Repeated runs converge
    /// to the same document set.
    pub fn reindex_all(&self) -> Result<ReindexReport> {
        let timer = metrics::REINDEX_DURATION_SECONDS.start_timer();
        let mut report = ReindexReport::default();

        for formatter in self.formatters() {
            self.index.ensure_collection(&formatter.schema())?;

            let ids = formatter.list_ids(self.store.as_ref())?;
            let keep: HashSet<String> = ids.iter().map(|id| id.to_string()).collect();
            let mut rebuilt = 0usize;
            for id in ids {
                match self.refresh_document(formatter, id) {
                    Ok(()) => {
                        rebuilt += 1;
                        metrics::REINDEX_DOCUMENTS_TOTAL
                            .with_label_values(&[formatter.collection()])
                            .inc();
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            "Reindex failed for {} {}: {:#}",
                            formatter.collection(),
                            id,
                            e
                        );
                    }
                }
            }
            // A delete the queue gave up on leaves an orphaned document;
            // this is where it finally goes.
            let pruned = match self.prune_orphans(formatter.collection(), &keep) {
                Ok(pruned) => pruned,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "Orphan pruning failed for {}: {:#}",
                        formatter.collection(),
                        e
                    );
                    0
                }
            };
            report.pruned += pruned;
            info!(
                "Reindexed {} documents into {} ({} orphans pruned)",
                rebuilt,
                formatter.collection(),
                pruned
            );
            report.counts.push((formatter.collection(), rebuilt));
        }

        timer.observe_duration();
        Ok(report)
    }

    /// Delete every document whose id is not in `keep`.
    fn prune_orphans(&self, collection: &'static str, keep: &HashSet<String>) -> Result<usize> {
        const PAGE_SIZE: usize = 250;
        let mut orphans = Vec::new();
        let mut page = 1;
        loop {
            let result = self
                .index
                .search(collection, &SearchRequest::match_all(page, PAGE_SIZE))?;
            for document in &result.documents {
                if let Some(id) = document["id"].as_str() {
                    if !keep.contains(id) {
                        orphans.push(id.to_string());
                    }
                }
            }
            if result.documents.is_empty() || page * PAGE_SIZE >= result.total {
                break;
            }
            page += 1;
        }
        for id in &orphans {
            self.index.delete_document(collection, id)?;
        }
        Ok(orphans.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{NewItem, SqliteCatalogStore};
    use crate::search_index::documents::ITEMS_COLLECTION;
    use crate::search_index::InMemorySearchIndex;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<SqliteCatalogStore>, Arc<InMemorySearchIndex>, IndexSynchronizer)
    {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteCatalogStore::new(dir.path().join("catalog.db"), 2).unwrap());
        let index = Arc::new(InMemorySearchIndex::new());
        let synchronizer = IndexSynchronizer::new(store.clone(), index.clone());
        synchronizer.reindex_all().unwrap();
        (dir, store, index, synchronizer)
    }

    fn request(kind: EntityKind, id: i64, action: SyncAction, version: u64) -> SyncRequest {
        SyncRequest {
            kind,
            id,
            action,
            cascade: false,
            version,
        }
    }

    #[test]
    fn create_sync_upserts_then_delete_removes() {
        let (_dir, store, index, synchronizer) = setup();
        let item = store
            .create_item(&NewItem {
                name: "Cable".to_string(),
                slug: "cable".to_string(),
                price: 5.0,
                is_active: true,
                ..Default::default()
            })
            .unwrap();

        synchronizer
            .sync(&request(EntityKind::Item, item.id, SyncAction::Create, 1))
            .unwrap();
        assert!(index
            .document(ITEMS_COLLECTION, &item.id.to_string())
            .is_some());

        store.delete_item(item.id).unwrap();
        synchronizer
            .sync(&request(EntityKind::Item, item.id, SyncAction::Delete, 2))
            .unwrap();
        assert!(index
            .document(ITEMS_COLLECTION, &item.id.to_string())
            .is_none());

        // Deleting again: no document, still no error.
        synchronizer
            .sync(&request(EntityKind::Item, item.id, SyncAction::Delete, 3))
            .unwrap();
    }

    #[test]
    fn update_for_vanished_entity_demotes_to_delete() {
        let (_dir, store, index, synchronizer) = setup();
        let item = store
            .create_item(&NewItem {
                name: "Cable".to_string(),
                slug: "cable".to_string(),
                price: 5.0,
                ..Default::default()
            })
            .unwrap();
        synchronizer
            .sync(&request(EntityKind::Item, item.id, SyncAction::Create, 1))
            .unwrap();

        store.delete_item(item.id).unwrap();
        // An update that lost the race with a delete converges on removal.
        synchronizer
            .sync(&request(EntityKind::Item, item.id, SyncAction::Update, 2))
            .unwrap();
        assert!(index
            .document(ITEMS_COLLECTION, &item.id.to_string())
            .is_none());
    }

    #[test]
    fn stale_request_is_discarded() {
        let (_dir, store, index, synchronizer) = setup();
        let item = store
            .create_item(&NewItem {
                name: "Cable".to_string(),
                slug: "cable".to_string(),
                price: 5.0,
                ..Default::default()
            })
            .unwrap();

        store.delete_item(item.id).unwrap();
        // The delete (version 5) is processed first...
        synchronizer
            .sync(&request(EntityKind::Item, item.id, SyncAction::Delete, 5))
            .unwrap();
        // ...then an older update arrives out of order. It must not
        // resurrect the document.
        synchronizer
            .sync(&request(EntityKind::Item, item.id, SyncAction::Update, 3))
            .unwrap();
        assert!(index
            .document(ITEMS_COLLECTION, &item.id.to_string())
            .is_none());
    }
}
