//! SQLite-backed canonical catalog store.
//!
//! One write connection behind a mutex, a round-robin pool of read-only
//! connections, WAL mode throughout. Every write runs inside a
//! `BEGIN IMMEDIATE` transaction; the search index is never touched from in
//! here.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::CatalogStore;
use crate::filter::{SqlFilter, SqlSort};
use crate::sqlite_persistence::BASE_DB_VERSION;

/// Upper bound on any walk over category parent links. Nothing enforces
/// acyclicity at write time, so readers must not follow the links blindly.
const MAX_TREE_DEPTH: usize = 32;

const ITEM_COLUMNS: &str = "id, name, slug, description, price, sale_price, stock_quantity, \
                            is_active, is_featured, brand_id, created_at, updated_at";
const CATEGORY_COLUMNS: &str = "id, name, slug, parent_id, sort_order, is_active";

#[derive(Clone)]
pub struct SqliteCatalogStore {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
}

fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    let latest_version = CATALOG_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &CATALOG_VERSIONED_SCHEMAS[latest_version];

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if table_count == 0 {
        info!("Creating catalog db schema at version {}", latest_version);
        latest_schema.create(conn)?;
        return Ok(());
    }

    if db_version < BASE_DB_VERSION as i64 {
        bail!(
            "Database exists but does not look like a catalog database (user_version {})",
            db_version
        );
    }

    let mut current_version = (db_version - BASE_DB_VERSION as i64) as usize;
    if current_version >= latest_version {
        latest_schema.validate(conn)?;
        return Ok(());
    }

    let tx = conn.transaction()?;
    for schema in CATALOG_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
        if let Some(migration_fn) = schema.migration {
            info!(
                "Migrating catalog db from version {} to {}",
                current_version, schema.version
            );
            migration_fn(&tx)?;
            current_version = schema.version;
        }
    }
    tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
    tx.commit()?;
    Ok(())
}

impl SqliteCatalogStore {
    /// Open (creating or migrating as needed) the catalog database.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `read_pool_size` - Number of connections for concurrent reads
    pub fn new<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open catalog database")?;

        migrate_if_needed(&mut write_conn)?;

        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        // Per-connection pragma: the schema declares ON DELETE actions and
        // they only fire with foreign_keys on.
        write_conn.pragma_update(None, "foreign_keys", "ON")?;

        let item_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))
            .unwrap_or(0);
        info!("Opened catalog database with {} items", item_count);

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let read_conn = Connection::open_with_flags(
                db_path_ref,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.pragma_update(None, "journal_mode", "WAL")?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(SqliteCatalogStore {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub(crate) fn read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    pub(crate) fn write_conn(&self) -> Arc<Mutex<Connection>> {
        self.write_conn.clone()
    }

    /// Run `body` inside a `BEGIN IMMEDIATE` transaction on the write
    /// connection, committing on Ok and rolling back on Err.
    fn write_tx<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute("BEGIN IMMEDIATE", [])?;
        match body(&conn) {
            Ok(value) => {
                conn.execute("COMMIT", [])?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    fn parse_item_row(row: &rusqlite::Row) -> rusqlite::Result<Item> {
        Ok(Item {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            price: row.get(4)?,
            sale_price: row.get(5)?,
            stock_quantity: row.get(6)?,
            is_active: row.get::<_, i64>(7)? != 0,
            is_featured: row.get::<_, i64>(8)? != 0,
            brand_id: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn parse_category_row(row: &rusqlite::Row) -> rusqlite::Result<Category> {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            parent_id: row.get(3)?,
            sort_order: row.get(4)?,
            is_active: row.get::<_, i64>(5)? != 0,
        })
    }

    fn parse_brand_row(row: &rusqlite::Row) -> rusqlite::Result<Brand> {
        Ok(Brand {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            is_active: row.get::<_, i64>(3)? != 0,
        })
    }

    fn get_item_on(conn: &Connection, id: i64) -> Result<Option<Item>> {
        match conn.query_row(
            &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
            params![id],
            Self::parse_item_row,
        ) {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_category_on(conn: &Connection, id: i64) -> Result<Option<Category>> {
        match conn.query_row(
            &format!("SELECT {} FROM categories WHERE id = ?1", CATEGORY_COLUMNS),
            params![id],
            Self::parse_category_row,
        ) {
            Ok(category) => Ok(Some(category)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn replace_item_categories(conn: &Connection, item_id: i64, category_ids: &[i64]) -> Result<()> {
        conn.execute(
            "DELETE FROM item_categories WHERE item_id = ?1",
            params![item_id],
        )?;
        for category_id in category_ids {
            conn.execute(
                "INSERT OR IGNORE INTO item_categories (item_id, category_id) VALUES (?1, ?2)",
                params![item_id, category_id],
            )?;
        }
        Ok(())
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        let count: i64 = conn.query_row(sql, [], |r| r.get(0))?;
        Ok(count as usize)
    }

    fn list_ids(&self, sql: &str) -> Result<Vec<i64>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(sql)?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn list_ids_with(&self, sql: &str, param: i64) -> Result<Vec<i64>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(sql)?;
        let ids = stmt
            .query_map(params![param], |r| r.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl CatalogStore for SqliteCatalogStore {
    // =========================================================================
    // Items
    // =========================================================================

    fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        Self::get_item_on(&conn, id)
    }

    fn get_resolved_item(&self, id: i64) -> Result<Option<ResolvedItem>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();

        let item = match Self::get_item_on(&conn, id)? {
            Some(item) => item,
            None => return Ok(None),
        };

        let brand = match item.brand_id {
            Some(brand_id) => match conn.query_row(
                "SELECT id, name, slug, is_active FROM brands WHERE id = ?1",
                params![brand_id],
                Self::parse_brand_row,
            ) {
                Ok(brand) => Some(brand),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT c.{} FROM categories c \
             JOIN item_categories ic ON ic.category_id = c.id \
             WHERE ic.item_id = ?1 ORDER BY c.sort_order, c.id",
            CATEGORY_COLUMNS.replace(", ", ", c.")
        ))?;
        let categories = stmt
            .query_map(params![id], Self::parse_category_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let primary_image_url = match conn.query_row(
            "SELECT url FROM item_images WHERE item_id = ?1 \
             ORDER BY is_primary DESC, position ASC LIMIT 1",
            params![id],
            |r| r.get(0),
        ) {
            Ok(url) => Some(url),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Some(ResolvedItem {
            item,
            brand,
            categories,
            primary_image_url,
        }))
    }

    fn create_item(&self, item: &NewItem) -> Result<Item> {
        self.write_tx(|conn| {
            conn.execute(
                "INSERT INTO items (name, slug, description, price, sale_price, stock_quantity, \
                 is_active, is_featured, brand_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    &item.name,
                    &item.slug,
                    &item.description,
                    item.price,
                    item.sale_price,
                    item.stock_quantity,
                    item.is_active as i64,
                    item.is_featured as i64,
                    item.brand_id,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Self::replace_item_categories(conn, id, &item.category_ids)?;
            Self::get_item_on(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Item {} vanished mid-transaction", id))
        })
    }

    fn update_item(&self, id: i64, item: &NewItem) -> Result<Item> {
        self.write_tx(|conn| {
            let updated = conn.execute(
                "UPDATE items SET name = ?1, slug = ?2, description = ?3, price = ?4, \
                 sale_price = ?5, stock_quantity = ?6, is_active = ?7, is_featured = ?8, \
                 brand_id = ?9, updated_at = cast(strftime('%s','now') as int) \
                 WHERE id = ?10",
                params![
                    &item.name,
                    &item.slug,
                    &item.description,
                    item.price,
                    item.sale_price,
                    item.stock_quantity,
                    item.is_active as i64,
                    item.is_featured as i64,
                    item.brand_id,
                    id,
                ],
            )?;
            if updated == 0 {
                bail!("Item with id {} not found", id);
            }
            Self::replace_item_categories(conn, id, &item.category_ids)?;
            Self::get_item_on(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Item {} vanished mid-transaction", id))
        })
    }

    fn delete_item(&self, id: i64) -> Result<bool> {
        // Attribute rows, category links and images go via the schema's
        // ON DELETE CASCADE.
        self.write_tx(|conn| {
            let deleted = conn.execute("DELETE FROM items WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
    }

    fn find_items_page(
        &self,
        filter: &SqlFilter,
        sort: &SqlSort,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Item>, usize)> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();

        let where_sql = filter.where_sql();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM items{}", where_sql),
            filter.param_refs().as_slice(),
            |r| r.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM items{}{} LIMIT ? OFFSET ?",
            ITEM_COLUMNS,
            where_sql,
            sort.order_by_sql()
        );
        let limit = per_page as i64;
        let offset = ((page - 1) * per_page) as i64;
        let mut param_refs = filter.param_refs();
        param_refs.push(&limit);
        param_refs.push(&offset);

        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(param_refs.as_slice(), Self::parse_item_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((items, total as usize))
    }

    fn list_item_ids(&self) -> Result<Vec<i64>> {
        self.list_ids("SELECT id FROM items ORDER BY id")
    }

    fn item_ids_in_category(&self, category_id: i64) -> Result<Vec<i64>> {
        self.list_ids_with(
            "SELECT item_id FROM item_categories WHERE category_id = ?1 ORDER BY item_id",
            category_id,
        )
    }

    fn item_ids_for_brand(&self, brand_id: i64) -> Result<Vec<i64>> {
        self.list_ids_with(
            "SELECT id FROM items WHERE brand_id = ?1 ORDER BY id",
            brand_id,
        )
    }

    fn add_item_image(
        &self,
        item_id: i64,
        url: &str,
        is_primary: bool,
        position: i64,
    ) -> Result<ItemImage> {
        self.write_tx(|conn| {
            if is_primary {
                conn.execute(
                    "UPDATE item_images SET is_primary = 0 WHERE item_id = ?1",
                    params![item_id],
                )?;
            }
            conn.execute(
                "INSERT INTO item_images (item_id, url, is_primary, position) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![item_id, url, is_primary as i64, position],
            )?;
            Ok(ItemImage {
                id: conn.last_insert_rowid(),
                item_id,
                url: url.to_string(),
                is_primary,
                position,
            })
        })
    }

    fn primary_image_url(&self, item_id: i64) -> Result<Option<String>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        match conn.query_row(
            "SELECT url FROM item_images WHERE item_id = ?1 \
             ORDER BY is_primary DESC, position ASC LIMIT 1",
            params![item_id],
            |r| r.get(0),
        ) {
            Ok(url) => Ok(Some(url)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Categories
    // =========================================================================

    fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        Self::get_category_on(&conn, id)
    }

    fn create_category(&self, category: &NewCategory) -> Result<Category> {
        self.write_tx(|conn| {
            conn.execute(
                "INSERT INTO categories (name, slug, parent_id, sort_order, is_active) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &category.name,
                    &category.slug,
                    category.parent_id,
                    category.sort_order,
                    category.is_active as i64,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Self::get_category_on(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Category {} vanished mid-transaction", id))
        })
    }

    fn update_category(&self, id: i64, category: &NewCategory) -> Result<Category> {
        self.write_tx(|conn| {
            let updated = conn.execute(
                "UPDATE categories SET name = ?1, slug = ?2, parent_id = ?3, sort_order = ?4, \
                 is_active = ?5 WHERE id = ?6",
                params![
                    &category.name,
                    &category.slug,
                    category.parent_id,
                    category.sort_order,
                    category.is_active as i64,
                    id,
                ],
            )?;
            if updated == 0 {
                bail!("Category with id {} not found", id);
            }
            Self::get_category_on(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Category {} vanished mid-transaction", id))
        })
    }

    fn delete_category(&self, id: i64) -> Result<bool> {
        self.write_tx(|conn| {
            // Children keep their parent_id pointing at the gone row; walks
            // tolerate that. Item links cascade.
            let deleted = conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
    }

    fn list_category_ids(&self) -> Result<Vec<i64>> {
        self.list_ids("SELECT id FROM categories ORDER BY id")
    }

    fn category_ancestors(&self, id: i64) -> Result<Vec<Category>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();

        let mut ancestors = Vec::new();
        let mut visited: HashSet<i64> = HashSet::from([id]);
        let mut current = match Self::get_category_on(&conn, id)? {
            Some(category) => category.parent_id,
            None => return Ok(ancestors),
        };

        while let Some(parent_id) = current {
            if !visited.insert(parent_id) {
                warn!(
                    "Category parent cycle detected at id {}, truncating ancestor walk",
                    parent_id
                );
                break;
            }
            if ancestors.len() >= MAX_TREE_DEPTH {
                warn!(
                    "Category ancestor chain for id {} exceeds depth {}, truncating",
                    id, MAX_TREE_DEPTH
                );
                break;
            }
            match Self::get_category_on(&conn, parent_id)? {
                Some(parent) => {
                    current = parent.parent_id;
                    ancestors.push(parent);
                }
                // Dangling parent reference: stop, don't error.
                None => break,
            }
        }

        Ok(ancestors)
    }

    fn descendant_category_ids(&self, id: i64) -> Result<Vec<i64>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();

        let mut stmt = conn.prepare_cached("SELECT id FROM categories WHERE parent_id = ?1")?;
        let mut visited: HashSet<i64> = HashSet::from([id]);
        let mut frontier = vec![id];
        let mut descendants = Vec::new();

        for _ in 0..MAX_TREE_DEPTH {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for parent in frontier.drain(..) {
                let children = stmt
                    .query_map(params![parent], |r| r.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                for child in children {
                    if visited.insert(child) {
                        descendants.push(child);
                        next.push(child);
                    } else {
                        warn!(
                            "Category parent cycle detected at id {}, truncating descendant walk",
                            child
                        );
                    }
                }
            }
            frontier = next;
        }

        Ok(descendants)
    }

    fn count_items_in_category(&self, category_id: i64) -> Result<usize> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM item_categories WHERE category_id = ?1",
            params![category_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    // =========================================================================
    // Brands
    // =========================================================================

    fn get_brand(&self, id: i64) -> Result<Option<Brand>> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        match conn.query_row(
            "SELECT id, name, slug, is_active FROM brands WHERE id = ?1",
            params![id],
            Self::parse_brand_row,
        ) {
            Ok(brand) => Ok(Some(brand)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn create_brand(&self, brand: &NewBrand) -> Result<Brand> {
        self.write_tx(|conn| {
            conn.execute(
                "INSERT INTO brands (name, slug, is_active) VALUES (?1, ?2, ?3)",
                params![&brand.name, &brand.slug, brand.is_active as i64],
            )?;
            Ok(Brand {
                id: conn.last_insert_rowid(),
                name: brand.name.clone(),
                slug: brand.slug.clone(),
                is_active: brand.is_active,
            })
        })
    }

    fn update_brand(&self, id: i64, brand: &NewBrand) -> Result<Brand> {
        self.write_tx(|conn| {
            let updated = conn.execute(
                "UPDATE brands SET name = ?1, slug = ?2, is_active = ?3 WHERE id = ?4",
                params![&brand.name, &brand.slug, brand.is_active as i64, id],
            )?;
            if updated == 0 {
                bail!("Brand with id {} not found", id);
            }
            Ok(Brand {
                id,
                name: brand.name.clone(),
                slug: brand.slug.clone(),
                is_active: brand.is_active,
            })
        })
    }

    fn delete_brand(&self, id: i64) -> Result<bool> {
        self.write_tx(|conn| {
            // items.brand_id goes NULL via ON DELETE SET NULL.
            let deleted = conn.execute("DELETE FROM brands WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
    }

    fn list_brand_ids(&self) -> Result<Vec<i64>> {
        self.list_ids("SELECT id FROM brands ORDER BY id")
    }

    fn count_items_for_brand(&self, brand_id: i64) -> Result<usize> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE brand_id = ?1",
            params![brand_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    // =========================================================================
    // Counts and health
    // =========================================================================

    fn items_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM items")
    }

    fn categories_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM categories")
    }

    fn brands_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM brands")
    }

    fn health_check(&self) -> Result<()> {
        let read_conn = self.read_conn();
        let conn = read_conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("Catalog database is not responding")?;
        Ok(())
    }
}
