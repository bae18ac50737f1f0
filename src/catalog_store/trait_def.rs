//! CatalogStore trait definition.
//!
//! The canonical relational store behind a seam, so the synchronizer and the
//! service layer can run against mocks in tests.

use anyhow::Result;

use super::models::*;
use crate::filter::{SqlFilter, SqlSort};

/// Canonical catalog persistence. All methods are blocking round trips; the
/// store's success or failure is the real outcome of a catalog write, and
/// nothing on the search path may influence it.
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Items
    // =========================================================================

    fn get_item(&self, id: i64) -> Result<Option<Item>>;

    /// Item plus the relations the denormalized search document embeds.
    fn get_resolved_item(&self, id: i64) -> Result<Option<ResolvedItem>>;

    fn create_item(&self, item: &NewItem) -> Result<Item>;

    /// Full replace: scalar fields and category links both.
    fn update_item(&self, id: i64, item: &NewItem) -> Result<Item>;

    /// Returns false if no such item existed. Attribute rows, category links
    /// and images go with it.
    fn delete_item(&self, id: i64) -> Result<bool>;

    /// Execute a compiled relational filter, returning one page of items and
    /// the total match count.
    fn find_items_page(
        &self,
        filter: &SqlFilter,
        sort: &SqlSort,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Item>, usize)>;

    fn list_item_ids(&self) -> Result<Vec<i64>>;
    fn item_ids_in_category(&self, category_id: i64) -> Result<Vec<i64>>;
    fn item_ids_for_brand(&self, brand_id: i64) -> Result<Vec<i64>>;

    fn add_item_image(&self, item_id: i64, url: &str, is_primary: bool, position: i64)
        -> Result<ItemImage>;
    fn primary_image_url(&self, item_id: i64) -> Result<Option<String>>;

    // =========================================================================
    // Categories
    // =========================================================================

    fn get_category(&self, id: i64) -> Result<Option<Category>>;
    fn create_category(&self, category: &NewCategory) -> Result<Category>;
    fn update_category(&self, id: i64, category: &NewCategory) -> Result<Category>;
    fn delete_category(&self, id: i64) -> Result<bool>;
    fn list_category_ids(&self) -> Result<Vec<i64>>;

    /// Ancestors of a category, nearest first, excluding the category
    /// itself. The walk is bounded: a parent cycle or an over-deep chain is
    /// logged and truncated rather than followed forever.
    fn category_ancestors(&self, id: i64) -> Result<Vec<Category>>;

    /// All categories below this one, bounded the same way as
    /// [`CatalogStore::category_ancestors`].
    fn descendant_category_ids(&self, id: i64) -> Result<Vec<i64>>;

    fn count_items_in_category(&self, category_id: i64) -> Result<usize>;

    // =========================================================================
    // Brands
    // =========================================================================

    fn get_brand(&self, id: i64) -> Result<Option<Brand>>;
    fn create_brand(&self, brand: &NewBrand) -> Result<Brand>;
    fn update_brand(&self, id: i64, brand: &NewBrand) -> Result<Brand>;
    fn delete_brand(&self, id: i64) -> Result<bool>;
    fn list_brand_ids(&self) -> Result<Vec<i64>>;
    fn count_items_for_brand(&self, brand_id: i64) -> Result<usize>;

    // =========================================================================
    // Counts and health
    // =========================================================================

    fn items_count(&self) -> Result<usize>;
    fn categories_count(&self) -> Result<usize>;
    fn brands_count(&self) -> Result<usize>;

    fn health_check(&self) -> Result<()>;
}
