//! Catalog entity models backed by the SQLite store.

use serde::{Deserialize, Serialize};

/// A catalog item (product).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: f64,
    pub sale_price: Option<f64>,
    pub stock_quantity: i64,
    pub is_active: bool,
    pub is_featured: bool,
    pub brand_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Payload for creating or fully updating an item.
///
/// Category links are replaced wholesale on update, matching the rest of the
/// item fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: f64,
    pub sale_price: Option<f64>,
    pub stock_quantity: i64,
    pub is_active: bool,
    pub is_featured: bool,
    pub brand_id: Option<i64>,
    pub category_ids: Vec<i64>,
}

/// A category node. `parent_id` links form a tree by convention; nothing at
/// write time prevents a cycle, so every walk over these links is bounded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
    pub is_active: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
    pub is_active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Brand {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewBrand {
    pub name: String,
    pub slug: String,
    pub is_active: bool,
}

/// An image attached to an item. At most one image per item is flagged
/// primary; that one's URL is denormalized into the search document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ItemImage {
    pub id: i64,
    pub item_id: i64,
    pub url: String,
    pub is_primary: bool,
    pub position: i64,
}

/// An item together with the relations the search document embeds.
#[derive(Clone, Debug, Serialize)]
pub struct ResolvedItem {
    pub item: Item,
    pub brand: Option<Brand>,
    pub categories: Vec<Category>,
    pub primary_image_url: Option<String>,
}
