//! SQLite schema for the canonical catalog database.
//!
//! Integer rowid primary keys throughout. Dynamic item attributes live in
//! `item_attributes` as an EAV table: raw values are always TEXT, with a
//! `value_type` column selecting the decode function.

use crate::sqlite_persistence::{
    ColumnDef, OnDelete, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

const BRANDS_TABLE: Table = Table {
    name: "brands",
    columns: &[
        ColumnDef::new("id", SqlType::Integer).primary_key(),
        ColumnDef::new("name", SqlType::Text).not_null(),
        ColumnDef::new("slug", SqlType::Text).not_null(),
        ColumnDef::new("is_active", SqlType::Integer)
            .not_null()
            .default_expr("1"),
    ],
    indices: &[("idx_brands_slug", "slug")],
    unique_constraints: &[&["slug"]],
};

const CATEGORIES_TABLE: Table = Table {
    name: "categories",
    columns: &[
        ColumnDef::new("id", SqlType::Integer).primary_key(),
        ColumnDef::new("name", SqlType::Text).not_null(),
        ColumnDef::new("slug", SqlType::Text).not_null(),
        // No FK on parent_id: categories import out of order and the parent
        // may not exist yet. Acyclicity is not enforced here either; readers
        // bound their walks.
        ColumnDef::new("parent_id", SqlType::Integer),
        ColumnDef::new("sort_order", SqlType::Integer)
            .not_null()
            .default_expr("0"),
        ColumnDef::new("is_active", SqlType::Integer)
            .not_null()
            .default_expr("1"),
    ],
    indices: &[
        ("idx_categories_slug", "slug"),
        ("idx_categories_parent", "parent_id"),
    ],
    unique_constraints: &[&["slug"]],
};

const ITEMS_TABLE: Table = Table {
    name: "items",
    columns: &[
        ColumnDef::new("id", SqlType::Integer).primary_key(),
        ColumnDef::new("name", SqlType::Text).not_null(),
        ColumnDef::new("slug", SqlType::Text).not_null(),
        ColumnDef::new("description", SqlType::Text),
        ColumnDef::new("price", SqlType::Real).not_null(),
        ColumnDef::new("sale_price", SqlType::Real),
        ColumnDef::new("stock_quantity", SqlType::Integer)
            .not_null()
            .default_expr("0"),
        ColumnDef::new("is_active", SqlType::Integer)
            .not_null()
            .default_expr("1"),
        ColumnDef::new("is_featured", SqlType::Integer)
            .not_null()
            .default_expr("0"),
        ColumnDef::new("brand_id", SqlType::Integer).references("brands", "id", OnDelete::SetNull),
        ColumnDef::new("created_at", SqlType::Integer)
            .not_null()
            .default_expr(DEFAULT_TIMESTAMP),
        ColumnDef::new("updated_at", SqlType::Integer)
            .not_null()
            .default_expr(DEFAULT_TIMESTAMP),
    ],
    indices: &[
        ("idx_items_slug", "slug"),
        ("idx_items_brand", "brand_id"),
        ("idx_items_active", "is_active"),
    ],
    unique_constraints: &[&["slug"]],
};

const ITEM_CATEGORIES_TABLE: Table = Table {
    name: "item_categories",
    columns: &[
        ColumnDef::new("item_id", SqlType::Integer)
            .not_null()
            .references("items", "id", OnDelete::Cascade),
        ColumnDef::new("category_id", SqlType::Integer)
            .not_null()
            .references("categories", "id", OnDelete::Cascade),
    ],
    indices: &[
        ("idx_item_categories_item", "item_id"),
        ("idx_item_categories_category", "category_id"),
    ],
    unique_constraints: &[&["item_id", "category_id"]],
};

const ITEM_IMAGES_TABLE: Table = Table {
    name: "item_images",
    columns: &[
        ColumnDef::new("id", SqlType::Integer).primary_key(),
        ColumnDef::new("item_id", SqlType::Integer)
            .not_null()
            .references("items", "id", OnDelete::Cascade),
        ColumnDef::new("url", SqlType::Text).not_null(),
        ColumnDef::new("is_primary", SqlType::Integer)
            .not_null()
            .default_expr("0"),
        ColumnDef::new("position", SqlType::Integer)
            .not_null()
            .default_expr("0"),
    ],
    indices: &[("idx_item_images_item", "item_id")],
    unique_constraints: &[],
};

const ITEM_ATTRIBUTES_TABLE: Table = Table {
    name: "item_attributes",
    columns: &[
        ColumnDef::new("item_id", SqlType::Integer)
            .not_null()
            .references("items", "id", OnDelete::Cascade),
        ColumnDef::new("key", SqlType::Text).not_null(),
        ColumnDef::new("value", SqlType::Text).not_null(),
        ColumnDef::new("value_type", SqlType::Text).not_null(),
    ],
    indices: &[
        ("idx_item_attributes_item", "item_id"),
        ("idx_item_attributes_key", "key"),
    ],
    unique_constraints: &[&["item_id", "key"]],
};

/// All schema versions, oldest first. `CATALOG_VERSIONED_SCHEMAS.last()` is
/// the schema a fresh database gets.
pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        BRANDS_TABLE,
        CATEGORIES_TABLE,
        ITEMS_TABLE,
        ITEM_CATEGORIES_TABLE,
        ITEM_IMAGES_TABLE,
        ITEM_ATTRIBUTES_TABLE,
    ],
    migration: None,
}];
