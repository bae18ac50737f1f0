//! The EAV layer over the catalog database.
//!
//! Schema-less by design: keys are free-form, values are typed at write time
//! by their [`AttributeValue`] variant. `(item_id, key)` is unique, so a set
//! is always an upsert.

use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use tracing::debug;

use super::value::{AttributeValue, ValueType};
use crate::catalog_store::SqliteCatalogStore;
use crate::filter::{FilterValue, SqlFilter};

#[derive(Clone)]
pub struct AttributeStore {
    store: SqliteCatalogStore,
}

impl AttributeStore {
    /// Share the catalog store's connections so attribute writes observe the
    /// same database state as item writes.
    pub fn new(store: SqliteCatalogStore) -> Self {
        AttributeStore { store }
    }

    /// Upsert one attribute row. The value type is taken from the variant,
    /// never inferred from string shape. Keys are not validated or
    /// namespaced.
    pub fn set_attribute(&self, item_id: i64, key: &str, value: &AttributeValue) -> Result<()> {
        let conn = self.store.write_conn();
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO item_attributes (item_id, key, value, value_type) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(item_id, key) DO UPDATE SET \
             value = excluded.value, value_type = excluded.value_type",
            params![item_id, key, value.encode(), value.value_type().to_db_str()],
        )?;
        Ok(())
    }

    pub fn get_attribute(&self, item_id: i64, key: &str) -> Result<Option<AttributeValue>> {
        let conn = self.store.read_conn();
        let conn = conn.lock().unwrap();
        let row: Option<(String, String)> = match conn.query_row(
            "SELECT value, value_type FROM item_attributes WHERE item_id = ?1 AND key = ?2",
            params![item_id, key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(row.map(|(raw, ty)| decode_or_raw(&raw, ValueType::from_db_str(&ty))))
    }

    pub fn get_all_attributes(&self, item_id: i64) -> Result<BTreeMap<String, AttributeValue>> {
        let conn = self.store.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT key, value, value_type FROM item_attributes WHERE item_id = ?1",
        )?;
        let rows = stmt.query_map(params![item_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?;
        let mut attributes = BTreeMap::new();
        for row in rows {
            let (key, raw, ty) = row?;
            attributes.insert(key, decode_or_raw(&raw, ValueType::from_db_str(&ty)));
        }
        Ok(attributes)
    }

    pub fn delete_attribute(&self, item_id: i64, key: &str) -> Result<bool> {
        let conn = self.store.write_conn();
        let conn = conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM item_attributes WHERE item_id = ?1 AND key = ?2",
            params![item_id, key],
        )?;
        Ok(deleted > 0)
    }

    /// Distinct keys across all items: the set of dynamic filters that
    /// currently exist, discovered rather than declared.
    pub fn available_keys(&self) -> Result<Vec<String>> {
        let conn = self.store.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT key FROM item_attributes ORDER BY key")?;
        let keys = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Distinct decoded values for one key, for filter-option lists.
    /// Deduplication happens post-decode, so `"10"` and `"10.0"` tagged as
    /// numbers collapse; raw strings differing only in case do not.
    pub fn unique_values(&self, key: &str) -> Result<Vec<AttributeValue>> {
        let conn = self.store.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT value, value_type FROM item_attributes WHERE key = ?1 ORDER BY value",
        )?;
        let rows = stmt.query_map(params![key], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut values: Vec<AttributeValue> = Vec::new();
        for row in rows {
            let (raw, ty) = row?;
            let decoded = decode_or_raw(&raw, ValueType::from_db_str(&ty));
            if !values.contains(&decoded) {
                values.push(decoded);
            }
        }
        Ok(values)
    }

    /// Add one correlated-existence predicate per criteria key: AND across
    /// distinct keys, IN across the values given for one key. Criteria
    /// values go through the same encoding as storage, so matching is
    /// raw-string exact.
    pub fn push_filter(sql: &mut SqlFilter, criteria: &BTreeMap<String, FilterValue>) {
        for (key, filter_value) in criteria {
            let values = filter_value.values();
            if values.is_empty() {
                continue;
            }
            let placeholders = vec!["?"; values.len()].join(",");
            let mut params = vec![SqlValue::Text(key.clone())];
            params.extend(values.iter().map(|v| SqlValue::Text(v.encode())));
            sql.push(
                format!(
                    "EXISTS (SELECT 1 FROM item_attributes a \
                     WHERE a.item_id = items.id AND a.key = ? AND a.value IN ({}))",
                    placeholders
                ),
                params,
            );
        }
    }
}

/// Decode, degrading to the raw string when the payload does not parse as
/// its tag. Reads must not fail because one row went bad.
fn decode_or_raw(raw: &str, value_type: ValueType) -> AttributeValue {
    match AttributeValue::decode(raw, value_type) {
        Some(value) => value,
        None => {
            debug!(
                "Attribute value {:?} does not decode as {}, returning raw string",
                raw,
                value_type.to_db_str()
            );
            AttributeValue::Str(raw.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{CatalogStore, NewItem};
    use serde_json::json;
    use tempfile::TempDir;

    fn scratch_store() -> (TempDir, SqliteCatalogStore, AttributeStore, i64) {
        let dir = TempDir::new().unwrap();
        let store = SqliteCatalogStore::new(dir.path().join("catalog.db"), 2).unwrap();
        let item = store
            .create_item(&NewItem {
                name: "HDMI Cable".to_string(),
                slug: "hdmi-cable".to_string(),
                price: 10.0,
                is_active: true,
                ..Default::default()
            })
            .unwrap();
        let attributes = AttributeStore::new(store.clone());
        (dir, store, attributes, item.id)
    }

    #[test]
    fn set_get_roundtrip_all_types() {
        let (_dir, _store, attributes, item_id) = scratch_store();
        let values = [
            ("color", AttributeValue::Str("red".to_string())),
            ("length_m", AttributeValue::Num(1.5)),
            ("gold_plated", AttributeValue::Bool(true)),
            ("specs", AttributeValue::Json(json!({"hdmi": "2.1"}))),
        ];
        for (key, value) in &values {
            attributes.set_attribute(item_id, key, value).unwrap();
        }
        for (key, value) in &values {
            assert_eq!(attributes.get_attribute(item_id, key).unwrap().as_ref(), Some(value));
        }
        assert_eq!(attributes.get_all_attributes(item_id).unwrap().len(), 4);
    }

    #[test]
    fn set_is_an_upsert_not_a_duplicate_insert() {
        let (_dir, _store, attributes, item_id) = scratch_store();
        attributes
            .set_attribute(item_id, "color", &AttributeValue::Str("red".to_string()))
            .unwrap();
        attributes
            .set_attribute(item_id, "color", &AttributeValue::Str("blue".to_string()))
            .unwrap();
        assert_eq!(
            attributes.get_attribute(item_id, "color").unwrap(),
            Some(AttributeValue::Str("blue".to_string()))
        );
        assert_eq!(attributes.available_keys().unwrap(), vec!["color"]);
    }

    #[test]
    fn delete_attribute_removes_the_row() {
        let (_dir, _store, attributes, item_id) = scratch_store();
        attributes
            .set_attribute(item_id, "color", &AttributeValue::Str("red".to_string()))
            .unwrap();
        assert!(attributes.delete_attribute(item_id, "color").unwrap());
        // Already gone: reported as such, not an error.
        assert!(!attributes.delete_attribute(item_id, "color").unwrap());
        assert_eq!(attributes.get_attribute(item_id, "color").unwrap(), None);
        assert!(attributes.available_keys().unwrap().is_empty());
    }

    #[test]
    fn malformed_json_degrades_to_raw_string() {
        let (_dir, store, attributes, item_id) = scratch_store();
        {
            let conn = store.write_conn();
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO item_attributes (item_id, key, value, value_type) \
                 VALUES (?1, 'broken', '{not json', 'json')",
                params![item_id],
            )
            .unwrap();
        }
        assert_eq!(
            attributes.get_attribute(item_id, "broken").unwrap(),
            Some(AttributeValue::Str("{not json".to_string()))
        );
    }

    #[test]
    fn unique_values_dedupes_post_decode() {
        let (_dir, store, attributes, item_id) = scratch_store();
        // Two raw spellings of the same number, via raw SQL to bypass the
        // canonical encoder.
        {
            let conn = store.write_conn();
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO item_attributes (item_id, key, value, value_type) \
                 VALUES (?1, 'length_m', '10', 'number')",
                params![item_id],
            )
            .unwrap();
        }
        let other = store
            .create_item(&NewItem {
                name: "Other".to_string(),
                slug: "other".to_string(),
                price: 1.0,
                ..Default::default()
            })
            .unwrap();
        {
            let conn = store.write_conn();
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO item_attributes (item_id, key, value, value_type) \
                 VALUES (?1, 'length_m', '10.0', 'number')",
                params![other.id],
            )
            .unwrap();
        }
        assert_eq!(
            attributes.unique_values("length_m").unwrap(),
            vec![AttributeValue::Num(10.0)]
        );

        // Case differences in raw strings are not normalized.
        attributes
            .set_attribute(item_id, "color", &AttributeValue::Str("Red".to_string()))
            .unwrap();
        attributes
            .set_attribute(other.id, "color", &AttributeValue::Str("red".to_string()))
            .unwrap();
        assert_eq!(attributes.unique_values("color").unwrap().len(), 2);
    }

    #[test]
    fn attributes_cascade_with_item_delete() {
        let (_dir, store, attributes, item_id) = scratch_store();
        attributes
            .set_attribute(item_id, "color", &AttributeValue::Str("red".to_string()))
            .unwrap();
        assert!(store.delete_item(item_id).unwrap());
        assert_eq!(attributes.get_attribute(item_id, "color").unwrap(), None);
        assert!(attributes.available_keys().unwrap().is_empty());
    }
}
