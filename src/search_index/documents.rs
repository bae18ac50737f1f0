//! Denormalized search documents and the per-kind formatters that build
//! them from the canonical store.
//!
//! Documents copy the display fields of related entities (brand name/slug,
//! category names/slugs, primary image URL) so the engine never joins. The
//! copies are what make cascade resync necessary: when a parent entity's
//! display fields change, every embedding document is stale until rebuilt.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{CollectionSchema, FieldKind, FieldSchema};
use crate::catalog_store::CatalogStore;

pub const ITEMS_COLLECTION: &str = "items";
pub const CATEGORIES_COLLECTION: &str = "categories";
pub const BRANDS_COLLECTION: &str = "brands";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ItemDocument {
    /// Engine document ids are strings; this is the item id.
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<f64>,
    pub stock_quantity: i64,
    pub in_stock: bool,
    pub is_active: bool,
    pub is_featured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_slug: Option<String>,
    pub category_ids: Vec<i64>,
    pub category_names: Vec<String>,
    pub category_slugs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CategoryDocument {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    /// Ancestor names, root first, excluding this category.
    pub breadcrumb: Vec<String>,
    pub sort_order: i64,
    pub is_active: bool,
    pub items_count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BrandDocument {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub items_count: i64,
}

/// Per-kind document derivation: which collection, its schema, which ids
/// exist, and how to build one document. The synchronizer dispatches through
/// this instead of branching on a kind tag.
pub trait DocumentFormatter: Send + Sync {
    fn collection(&self) -> &'static str;

    fn schema(&self) -> CollectionSchema;

    fn list_ids(&self, store: &dyn CatalogStore) -> Result<Vec<i64>>;

    /// Re-read the entity plus its relations and build the document.
    /// `None` means the entity no longer exists in the canonical store.
    fn build(&self, store: &dyn CatalogStore, id: i64) -> Result<Option<JsonValue>>;
}

pub struct ItemFormatter;

impl DocumentFormatter for ItemFormatter {
    fn collection(&self) -> &'static str {
        ITEMS_COLLECTION
    }

    fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            name: ITEMS_COLLECTION,
            fields: vec![
                FieldSchema::new("name", FieldKind::String),
                FieldSchema::new("slug", FieldKind::String),
                FieldSchema::new("description", FieldKind::String).optional(),
                FieldSchema::new("price", FieldKind::Float).facet().sortable(),
                FieldSchema::new("sale_price", FieldKind::Float).optional(),
                FieldSchema::new("stock_quantity", FieldKind::Int).sortable(),
                FieldSchema::new("in_stock", FieldKind::Bool).facet(),
                FieldSchema::new("is_active", FieldKind::Bool).facet(),
                FieldSchema::new("is_featured", FieldKind::Bool).facet(),
                FieldSchema::new("brand_id", FieldKind::Int).facet().optional(),
                FieldSchema::new("brand_name", FieldKind::String).facet().optional(),
                FieldSchema::new("brand_slug", FieldKind::String).optional(),
                FieldSchema::new("category_ids", FieldKind::IntArray).facet(),
                FieldSchema::new("category_names", FieldKind::StringArray).facet(),
                FieldSchema::new("category_slugs", FieldKind::StringArray),
                FieldSchema::new("image_url", FieldKind::String).optional(),
                FieldSchema::new("created_at", FieldKind::Int).sortable(),
            ],
        }
    }

    fn list_ids(&self, store: &dyn CatalogStore) -> Result<Vec<i64>> {
        store.list_item_ids()
    }

    fn build(&self, store: &dyn CatalogStore, id: i64) -> Result<Option<JsonValue>> {
        let resolved = match store.get_resolved_item(id)? {
            Some(resolved) => resolved,
            None => return Ok(None),
        };
        let item = resolved.item;
        let document = ItemDocument {
            id: item.id.to_string(),
            name: item.name,
            slug: item.slug,
            description: item.description,
            price: item.price,
            sale_price: item.sale_price,
            stock_quantity: item.stock_quantity,
            in_stock: item.stock_quantity > 0,
            is_active: item.is_active,
            is_featured: item.is_featured,
            brand_id: resolved.brand.as_ref().map(|b| b.id),
            brand_name: resolved.brand.as_ref().map(|b| b.name.clone()),
            brand_slug: resolved.brand.as_ref().map(|b| b.slug.clone()),
            category_ids: resolved.categories.iter().map(|c| c.id).collect(),
            category_names: resolved.categories.iter().map(|c| c.name.clone()).collect(),
            category_slugs: resolved.categories.iter().map(|c| c.slug.clone()).collect(),
            image_url: resolved.primary_image_url,
            created_at: item.created_at,
        };
        Ok(Some(serde_json::to_value(document)?))
    }
}

pub struct CategoryFormatter;

impl DocumentFormatter for CategoryFormatter {
    fn collection(&self) -> &'static str {
        CATEGORIES_COLLECTION
    }

    fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            name: CATEGORIES_COLLECTION,
            fields: vec![
                FieldSchema::new("name", FieldKind::String),
                FieldSchema::new("slug", FieldKind::String),
                FieldSchema::new("parent_id", FieldKind::Int).optional(),
                FieldSchema::new("breadcrumb", FieldKind::StringArray),
                FieldSchema::new("sort_order", FieldKind::Int).sortable(),
                FieldSchema::new("is_active", FieldKind::Bool).facet(),
                FieldSchema::new("items_count", FieldKind::Int).sortable(),
            ],
        }
    }

    fn list_ids(&self, store: &dyn CatalogStore) -> Result<Vec<i64>> {
        store.list_category_ids()
    }

    fn build(&self, store: &dyn CatalogStore, id: i64) -> Result<Option<JsonValue>> {
        let category = match store.get_category(id)? {
            Some(category) => category,
            None => return Ok(None),
        };
        let mut breadcrumb: Vec<String> = store
            .category_ancestors(id)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        breadcrumb.reverse();
        let document = CategoryDocument {
            id: category.id.to_string(),
            name: category.name,
            slug: category.slug,
            parent_id: category.parent_id,
            breadcrumb,
            sort_order: category.sort_order,
            is_active: category.is_active,
            items_count: store.count_items_in_category(id)? as i64,
        };
        Ok(Some(serde_json::to_value(document)?))
    }
}

pub struct BrandFormatter;

impl DocumentFormatter for BrandFormatter {
    fn collection(&self) -> &'static str {
        BRANDS_COLLECTION
    }

    fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            name: BRANDS_COLLECTION,
            fields: vec![
                FieldSchema::new("name", FieldKind::String),
                FieldSchema::new("slug", FieldKind::String),
                FieldSchema::new("is_active", FieldKind::Bool).facet(),
                FieldSchema::new("items_count", FieldKind::Int).sortable(),
            ],
        }
    }

    fn list_ids(&self, store: &dyn CatalogStore) -> Result<Vec<i64>> {
        store.list_brand_ids()
    }

    fn build(&self, store: &dyn CatalogStore, id: i64) -> Result<Option<JsonValue>> {
        let brand = match store.get_brand(id)? {
            Some(brand) => brand,
            None => return Ok(None),
        };
        let document = BrandDocument {
            id: brand.id.to_string(),
            name: brand.name,
            slug: brand.slug,
            is_active: brand.is_active,
            items_count: store.count_items_for_brand(id)? as i64,
        };
        Ok(Some(serde_json::to_value(document)?))
    }
}
