use geo::{Contains, polygon};
use geoindex::storage::{IndexSchema, TableSchema};
use geoindex::{
    GeoIndexError, GeoTable, GeoTableConfiguration, Item, KvStore, MemoryStore, Point, Polygon,
    QueryShape, QueryTuning,
};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

const TABLE: &str = "places";

fn open(config: GeoTableConfiguration, schema: TableSchema) -> GeoTable<MemoryStore> {
    let store = MemoryStore::new();
    store.create_table(schema.with_index(IndexSchema::new(
        "geohash",
        "_geohash_prefix",
        Some("_geohash"),
    )));
    GeoTable::new(TABLE, config, Arc::new(store)).expect("valid configuration")
}

fn default_table() -> GeoTable<MemoryStore> {
    open(GeoTableConfiguration::new("id"), TableSchema::new(TABLE, "id"))
}

fn place(id: &str, lat: f64, lon: f64) -> Item {
    json!({"id": id, "position": {"latitude": lat, "longitude": lon}})
        .as_object()
        .cloned()
        .unwrap()
}

/// Insert a `rows` x `columns` grid starting at (lat, lon) with the given spacing.
fn insert_grid(
    table: &GeoTable<MemoryStore>,
    (lat, lon): (f64, f64),
    spacing: f64,
    rows: usize,
    columns: usize,
) -> Vec<(String, Point)> {
    let mut points = Vec::new();
    for i in 0..rows {
        for j in 0..columns {
            let id = format!("{}-{}", i, j);
            let (y, x) = (lat + spacing * i as f64, lon + spacing * j as f64);
            table.put_item(&place(&id, y, x)).expect("insert");
            points.push((id, Point::new(x, y)));
        }
    }
    points
}

fn ids(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

/// Page through a query and collect every returned id, in order.
fn query_all(table: &GeoTable<MemoryStore>, shape: &QueryShape, limit: usize) -> Vec<String> {
    let mut all = Vec::new();
    let mut cursor = None;
    loop {
        let page = table
            .query(shape, limit, cursor.as_ref())
            .expect("query failed");
        assert!(page.items.len() <= limit);
        all.extend(ids(&page.items));
        match page.next_cursor {
            Some(next) => {
                assert_eq!(page.items.len(), limit, "only the last page may be short");
                cursor = Some(next);
            }
            None => return all,
        }
    }
}

fn expected_inside(points: &[(String, Point)], polygon: &Polygon) -> BTreeSet<String> {
    points
        .iter()
        .filter(|(_, point)| polygon.contains(point))
        .map(|(id, _)| id.clone())
        .collect()
}

fn assert_complete(all: &[String], expected: &BTreeSet<String>) {
    let unique: BTreeSet<String> = all.iter().cloned().collect();
    assert_eq!(unique.len(), all.len(), "duplicate items across pages");
    assert_eq!(&unique, expected);
}

#[test]
fn test_grid_query_first_page() {
    let table = default_table();
    let points = insert_grid(&table, (48.0, 10.0), 0.01, 10, 10);
    let shape = QueryShape::bbox(10.0, 48.0, 10.055, 48.055);
    let polygon = shape.polygon.clone().unwrap();

    let page = table.query(&shape, 20, None).unwrap();

    assert_eq!(page.items.len(), 20);
    assert!(page.next_cursor.is_some());
    let expected = expected_inside(&points, &polygon);
    assert_eq!(expected.len(), 25);
    for id in ids(&page.items) {
        assert!(expected.contains(&id), "{} is outside the box", id);
    }

    let cursor = page.next_cursor.unwrap();
    let last = page.items.last().unwrap();
    assert_eq!(cursor.len(), 1);
    assert_eq!(cursor["id"], last["id"]);
}

#[test]
fn test_grid_query_paging_is_complete() {
    let table = default_table();
    let points = insert_grid(&table, (48.0, 10.0), 0.01, 10, 10);
    let shape = QueryShape::bbox(10.0, 48.0, 10.055, 48.055);
    let expected = expected_inside(&points, shape.polygon.as_ref().unwrap());

    for limit in [1, 3, 7, 20, 24, 25, 26, 100] {
        assert_complete(&query_all(&table, &shape, limit), &expected);
    }
}

#[test]
fn test_polygon_query_is_exact() {
    let table = default_table();
    let points = insert_grid(&table, (48.0, 10.0), 0.01, 10, 10);
    let triangle = polygon![
        (x: 10.005, y: 48.005),
        (x: 10.095, y: 48.005),
        (x: 10.005, y: 48.095),
    ];
    let expected = expected_inside(&points, &triangle);
    assert!(!expected.is_empty());

    let shape = QueryShape::polygon(triangle);
    for limit in [1, 4, 10, 1000] {
        assert_complete(&query_all(&table, &shape, limit), &expected);
    }
}

#[test]
fn test_query_spanning_many_partitions() {
    let table = default_table();
    let points = insert_grid(&table, (45.0, 5.0), 0.5, 10, 10);
    let shape = QueryShape::bbox(5.2, 45.2, 9.3, 49.3);
    let expected = expected_inside(&points, shape.polygon.as_ref().unwrap());
    assert_eq!(expected.len(), 64);

    for limit in [1, 7, 40, 64, 65] {
        assert_complete(&query_all(&table, &shape, limit), &expected);
    }
}

#[test]
fn test_fine_partitions_after_refinement() {
    // A single prefix cell is normally scanned as is; lowering the
    // threshold makes the engine refine to several fine cells.
    let tuning = QueryTuning {
        min_partitions: 1,
        ..QueryTuning::default()
    };
    let table = open(
        GeoTableConfiguration::new("id").with_query_tuning(tuning),
        TableSchema::new(TABLE, "id"),
    );
    let points = insert_grid(&table, (48.0, 10.0), 0.001, 20, 20);
    let shape = QueryShape::bbox(10.0005, 48.0005, 10.0105, 48.0105);
    let expected = expected_inside(&points, shape.polygon.as_ref().unwrap());
    assert_eq!(expected.len(), 100);

    for limit in [3, 33, 99, 100] {
        assert_complete(&query_all(&table, &shape, limit), &expected);
    }
}

#[test]
fn test_query_by_geohash_cell() {
    let table = default_table();
    table.put_item(&place("munich", 48.137154, 11.576124)).unwrap();
    table.put_item(&place("berlin", 52.520008, 13.404954)).unwrap();

    let page = table.query(&QueryShape::cell("u281"), 10, None).unwrap();
    assert_eq!(ids(&page.items), vec!["munich"]);
    assert!(page.is_last());

    let err = table
        .query(&QueryShape::cell("u281z7j7ppzsz"), 10, None)
        .unwrap_err();
    assert!(matches!(err, GeoIndexError::InvalidGeohash(_)));
}

#[test]
fn test_cursor_of_deleted_item_is_rejected() {
    let table = default_table();
    insert_grid(&table, (48.0, 10.0), 0.01, 5, 5);
    let shape = QueryShape::bbox(9.9, 47.9, 10.1, 48.1);

    let page = table.query(&shape, 3, None).unwrap();
    let cursor = page.next_cursor.expect("more pages");
    table.delete_item(&cursor).unwrap();

    let err = table.query(&shape, 3, Some(&cursor)).unwrap_err();
    assert!(matches!(err, GeoIndexError::ResumeItemNotFound));
}

#[test]
fn test_too_large_query_is_rejected() {
    let table = default_table();
    let err = table
        .query(&QueryShape::bbox(-20.0, 30.0, 40.0, 70.0), 10, None)
        .unwrap_err();
    assert!(matches!(err, GeoIndexError::QueryTooLarge { .. }));
}

#[test]
fn test_sort_key_is_part_of_the_cursor() {
    let table = open(
        GeoTableConfiguration::new("id").with_sort_key_field("version"),
        TableSchema::new(TABLE, "id").with_sort_key("version"),
    );
    for version in 0..5 {
        let mut item = place("munich", 48.137154 + 0.0001 * version as f64, 11.576124);
        item.insert("version".to_string(), json!(version));
        table.put_item(&item).unwrap();
    }

    let shape = QueryShape::bbox(11.5, 48.1, 11.6, 48.2);
    let page = table.query(&shape, 2, None).unwrap();
    let cursor = page.next_cursor.clone().unwrap();
    assert_eq!(cursor.len(), 2);
    assert!(cursor.contains_key("version"));

    let mut versions = Vec::new();
    let mut cursor = None;
    loop {
        let page = table.query(&shape, 2, cursor.as_ref()).unwrap();
        versions.extend(page.items.iter().map(|item| item["version"].as_i64().unwrap()));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    versions.sort();
    assert_eq!(versions, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_moved_item_requires_overwrite() {
    let table = default_table();
    let stored = table.put_item(&place("bus", 48.137154, 11.576124)).unwrap();

    let mut moved = stored.clone();
    moved.insert(
        "position".to_string(),
        json!({"latitude": 52.520008, "longitude": 13.404954}),
    );
    let err = table.put_item(&moved).unwrap_err();
    assert!(matches!(err, GeoIndexError::FieldConflict(_)));

    let rewritten = table.put_item_with_overwrite(&moved).unwrap();
    assert_ne!(rewritten["_geohash"], stored["_geohash"]);
    assert_eq!(rewritten["_geohash_prefix"], Value::from("u33"));

    let old_area = table.query(&QueryShape::cell("u281"), 10, None).unwrap();
    assert!(old_area.items.is_empty());
    let new_area = table.query(&QueryShape::cell("u33"), 10, None).unwrap();
    assert_eq!(ids(&new_area.items), vec!["bus"]);
}

#[test]
fn test_concurrent_writers_and_readers() {
    let table = Arc::new(default_table());

    thread::scope(|scope| {
        for worker in 0..4 {
            let table = Arc::clone(&table);
            scope.spawn(move || {
                for n in 0..50 {
                    let id = format!("{}-{}", worker, n);
                    let lat = 48.0 + 0.001 * n as f64;
                    let lon = 10.0 + 0.01 * worker as f64;
                    table.put_item(&place(&id, lat, lon)).unwrap();
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..10 {
                table
                    .query(&QueryShape::bbox(9.9, 47.9, 10.1, 48.1), 25, None)
                    .unwrap();
            }
        });
    });

    let all = query_all(&table, &QueryShape::bbox(9.9, 47.9, 10.1, 48.1), 64);
    assert_eq!(all.len(), 200);
}

#[test]
fn test_raw_store_rows_carry_derived_fields() {
    let store = Arc::new(MemoryStore::new());
    store.create_table(TableSchema::new(TABLE, "id").with_index(IndexSchema::new(
        "geohash",
        "_geohash_prefix",
        Some("_geohash"),
    )));
    let table = GeoTable::new(TABLE, GeoTableConfiguration::new("id"), store.clone()).unwrap();
    table.put_item(&place("munich", 48.137154, 11.576124)).unwrap();

    let key = json!({"id": "munich"}).as_object().cloned().unwrap();
    let row = store.get_item(TABLE, &key).unwrap().unwrap();
    assert_eq!(row["_geohash"], "u281z7j7ppzs");
    assert_eq!(row["_geohash_prefix"], "u28");
}
