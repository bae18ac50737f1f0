//! Shared test fixtures: a scratch catalog database wired to an in-process
//! search index through the real service layer.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use storefront_catalog_server::attribute_store::AttributeValue;
use storefront_catalog_server::catalog::CatalogService;
use storefront_catalog_server::catalog_store::{
    Brand, Category, Item, NewBrand, NewCategory, NewItem, SqliteCatalogStore,
};
use storefront_catalog_server::index_sync::SyncQueueConfig;
use storefront_catalog_server::search_index::{InMemorySearchIndex, SearchIndex};

pub struct TestCatalog {
    pub service: CatalogService,
    pub index: Arc<InMemorySearchIndex>,
    _dir: TempDir,
}

impl TestCatalog {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = SqliteCatalogStore::new(dir.path().join("catalog.db"), 2).unwrap();
        let index = Arc::new(InMemorySearchIndex::new());
        let service = CatalogService::new(
            store,
            index.clone() as Arc<dyn SearchIndex>,
            SyncQueueConfig {
                max_retries: 1,
                retry_base_delay_ms: 1,
            },
        );
        TestCatalog {
            service,
            index,
            _dir: dir,
        }
    }

    /// Wait for the sync worker to drain everything enqueued so far.
    pub fn flush(&self) {
        assert!(self.service.flush_sync(Duration::from_secs(10)));
    }

    pub fn create_brand(&self, name: &str, slug: &str) -> Brand {
        self.service
            .create_brand(&NewBrand {
                name: name.to_string(),
                slug: slug.to_string(),
                is_active: true,
            })
            .unwrap()
    }

    pub fn create_category(&self, name: &str, slug: &str, parent_id: Option<i64>) -> Category {
        self.service
            .create_category(&NewCategory {
                name: name.to_string(),
                slug: slug.to_string(),
                parent_id,
                sort_order: 0,
                is_active: true,
            })
            .unwrap()
    }

    pub fn create_item(&self, payload: NewItem) -> Item {
        self.service.create_item(&payload).unwrap()
    }

    pub fn set_attribute(&self, item_id: i64, key: &str, value: AttributeValue) {
        self.service.set_attribute(item_id, key, &value).unwrap();
    }

    /// The concrete scenario from the filtering contract: three items with a
    /// color attribute and spread prices. Returns (red, blue, green) items.
    pub fn seed_color_items(&self) -> (Item, Item, Item) {
        let a = self.create_item(item("Red Cable", "red-cable", 10.0));
        let b = self.create_item(item("Blue Cable", "blue-cable", 10.0));
        let c = self.create_item(item("Green Adapter", "green-adapter", 50.0));
        self.set_attribute(a.id, "color", AttributeValue::Str("red".to_string()));
        self.set_attribute(b.id, "color", AttributeValue::Str("blue".to_string()));
        self.set_attribute(c.id, "color", AttributeValue::Str("green".to_string()));
        (a, b, c)
    }
}

pub fn item(name: &str, slug: &str, price: f64) -> NewItem {
    NewItem {
        name: name.to_string(),
        slug: slug.to_string(),
        description: None,
        price,
        sale_price: None,
        stock_quantity: 10,
        is_active: true,
        is_featured: false,
        brand_id: None,
        category_ids: Vec::new(),
    }
}
