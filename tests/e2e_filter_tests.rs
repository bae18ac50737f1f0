//! End-to-end tests for filter compilation: dynamic attribute composition,
//! sort fallback, and the fixed-field contract between the relational and
//! search paths.

mod common;

use std::collections::BTreeMap;

use common::{item, TestCatalog};
use storefront_catalog_server::attribute_store::AttributeValue;
use storefront_catalog_server::filter::{FilterValue, ItemFilterRequest, SortDirection};

fn color_filter(colors: &[&str]) -> BTreeMap<String, FilterValue> {
    let mut attributes = BTreeMap::new();
    attributes.insert(
        "color".to_string(),
        FilterValue::Many(
            colors
                .iter()
                .map(|c| AttributeValue::Str(c.to_string()))
                .collect(),
        ),
    );
    attributes
}

// =============================================================================
// Dynamic attribute composition
// =============================================================================

#[test]
fn test_color_in_list_and_price_cap_selects_exactly_a_and_b() {
    let catalog = TestCatalog::new();
    let (a, b, _c) = catalog.seed_color_items();

    let request = ItemFilterRequest {
        price_max: Some(20.0),
        attributes: color_filter(&["red", "blue"]),
        ..Default::default()
    };
    let page = catalog
        .service
        .find_page(1, 10, "price", SortDirection::Asc, &request)
        .unwrap();

    let mut ids: Vec<i64> = page.items.iter().map(|i| i.id).collect();
    ids.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(ids, expected);
    assert_eq!(page.total, 2);
}

#[test]
fn test_distinct_attribute_keys_compose_with_and() {
    let catalog = TestCatalog::new();
    let (a, b, _c) = catalog.seed_color_items();
    catalog.set_attribute(a.id, "material", AttributeValue::Str("copper".to_string()));
    catalog.set_attribute(b.id, "material", AttributeValue::Str("fiber".to_string()));

    let mut request = ItemFilterRequest {
        attributes: color_filter(&["red", "blue"]),
        ..Default::default()
    };
    request.attributes.insert(
        "material".to_string(),
        FilterValue::One(AttributeValue::Str("copper".to_string())),
    );

    let page = catalog
        .service
        .find_page(1, 10, "price", SortDirection::Asc, &request)
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, a.id);
}

#[test]
fn test_typed_attribute_criteria_match_typed_storage() {
    let catalog = TestCatalog::new();
    let (a, b, _c) = catalog.seed_color_items();
    catalog.set_attribute(a.id, "length_m", AttributeValue::Num(10.0));
    catalog.set_attribute(b.id, "length_m", AttributeValue::Num(2.5));

    let mut request = ItemFilterRequest::default();
    // A whole-number criterion must match a value stored as 10.0.
    request.attributes.insert(
        "length_m".to_string(),
        FilterValue::One(AttributeValue::Num(10.0)),
    );
    let page = catalog
        .service
        .find_page(1, 10, "name", SortDirection::Asc, &request)
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, a.id);
}

#[test]
fn test_empty_criteria_mean_no_constraint() {
    let catalog = TestCatalog::new();
    catalog.seed_color_items();

    let mut request = ItemFilterRequest {
        search: Some("   ".to_string()),
        ..Default::default()
    };
    request
        .attributes
        .insert("color".to_string(), FilterValue::Many(Vec::new()));

    let page = catalog
        .service
        .find_page(1, 10, "price", SortDirection::Asc, &request)
        .unwrap();
    assert_eq!(page.total, 3);
}

// =============================================================================
// Sort fallback
// =============================================================================

#[test]
fn test_invalid_sort_field_returns_a_sorted_page_not_an_error() {
    let catalog = TestCatalog::new();
    catalog.seed_color_items();
    catalog.flush();

    let request = ItemFilterRequest::default();
    let page = catalog
        .service
        .find_page(1, 10, "popularity_rank", SortDirection::Asc, &request)
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.last_page, 1);

    // Same on the search path: "name" has no sortable counterpart and is
    // silently corrected.
    let search_page = catalog
        .service
        .search_items_page(1, 10, "name", SortDirection::Asc, &request)
        .unwrap();
    assert_eq!(search_page.total, 3);
}

// =============================================================================
// Both-paths contract
// =============================================================================

#[test]
fn test_fixed_field_filters_select_the_same_subset_on_both_paths() {
    let catalog = TestCatalog::new();
    let brand = catalog.create_brand("Acme", "acme");
    let (a, _b, c) = catalog.seed_color_items();
    let mut payload = item("Red Cable", "red-cable", 10.0);
    payload.brand_id = Some(brand.id);
    catalog.service.update_item(a.id, &payload).unwrap();
    let mut payload = item("Green Adapter", "green-adapter", 50.0);
    payload.brand_id = Some(brand.id);
    catalog.service.update_item(c.id, &payload).unwrap();
    catalog.flush();

    let request = ItemFilterRequest {
        brand_ids: vec![brand.id],
        price_min: Some(5.0),
        price_max: Some(60.0),
        in_stock: Some(true),
        ..Default::default()
    };

    let relational = catalog
        .service
        .find_page(1, 10, "price", SortDirection::Asc, &request)
        .unwrap();
    let mut relational_ids: Vec<String> =
        relational.items.iter().map(|i| i.id.to_string()).collect();
    relational_ids.sort();

    let search = catalog
        .service
        .search_items_page(1, 10, "price", SortDirection::Asc, &request)
        .unwrap();
    let mut search_ids: Vec<String> = search
        .documents
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect();
    search_ids.sort();

    assert_eq!(relational_ids, search_ids);
    assert_eq!(relational.total, search.total);
}

// =============================================================================
// Filter discovery
// =============================================================================

#[test]
fn test_available_filters_reflect_stored_attributes() {
    let catalog = TestCatalog::new();
    let (a, b, _c) = catalog.seed_color_items();
    catalog.set_attribute(a.id, "length_m", AttributeValue::Num(10.0));
    catalog.set_attribute(b.id, "length_m", AttributeValue::Num(2.5));

    let filters = catalog.service.available_filters().unwrap();
    assert_eq!(filters.keys, vec!["color", "length_m"]);
    assert_eq!(filters.values_by_key["color"].len(), 3);

    let lengths = catalog.service.filter_values("length_m").unwrap();
    assert!(lengths.contains(&AttributeValue::Num(10.0)));
    assert!(lengths.contains(&AttributeValue::Num(2.5)));

    assert!(catalog.service.filter_values("nope").unwrap().is_empty());

    // Explicit deletion drops the key from discovery once no rows remain.
    assert!(catalog.service.delete_attribute(a.id, "length_m").unwrap());
    assert!(catalog.service.delete_attribute(b.id, "length_m").unwrap());
    let filters = catalog.service.available_filters().unwrap();
    assert_eq!(filters.keys, vec!["color"]);
    assert!(catalog.service.filter_values("length_m").unwrap().is_empty());
}
