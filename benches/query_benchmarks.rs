use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use geoindex::storage::{IndexSchema, TableSchema};
use geoindex::{
    GeoTable, GeoTableConfiguration, Item, MemoryStore, QueryShape, Rect, StatisticsConfiguration,
    StatisticsStreamHandler, StatisticsTable,
};
use serde_json::json;
use std::sync::Arc;

const SOURCE: &str = "places";
const STATISTICS: &str = "statistics";

fn place(id: usize, lat: f64, lon: f64) -> Item {
    json!({"id": id.to_string(), "position": {"latitude": lat, "longitude": lon}})
        .as_object()
        .cloned()
        .unwrap()
}

fn populated_store(side: usize, stream: bool) -> (Arc<MemoryStore>, GeoTable<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut schema = TableSchema::new(SOURCE, "id").with_index(IndexSchema::new(
        "geohash",
        "_geohash_prefix",
        Some("_geohash"),
    ));
    if stream {
        schema = schema.with_stream();
    }
    store.create_table(schema);
    store.create_table(TableSchema::new(STATISTICS, "_geohash"));
    let table = GeoTable::new(SOURCE, GeoTableConfiguration::new("id"), store.clone()).unwrap();

    for i in 0..side {
        for j in 0..side {
            let lat = 48.0 + (i as f64 * 0.002);
            let lon = 10.0 + (j as f64 * 0.002);
            table.put_item(&place(i * side + j, lat, lon)).unwrap();
        }
    }
    (store, table)
}

fn benchmark_enrichment(c: &mut Criterion) {
    let mut group = c.benchmark_group("enrichment");
    let (_, table) = populated_store(0, false);

    group.bench_function("put_item", |b| {
        let mut counter = 0;
        b.iter(|| {
            let lat = 48.0 + ((counter % 1000) as f64 * 0.001);
            counter += 1;
            table.put_item(black_box(&place(counter, lat, 10.5))).unwrap()
        })
    });

    group.finish();
}

fn benchmark_geo_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("geo_queries");
    let (_, table) = populated_store(100, false);

    for size in [0.01, 0.05, 0.2] {
        let shape = QueryShape::bbox(10.0, 48.0, 10.0 + size, 48.0 + size);
        group.bench_with_input(BenchmarkId::new("first_page", size), &shape, |b, shape| {
            b.iter(|| table.query(black_box(shape), 100, None).unwrap())
        });
    }

    let shape = QueryShape::bbox(10.0, 48.0, 10.1, 48.1);
    group.bench_function("page_through_box", |b| {
        b.iter(|| {
            let mut cursor = None;
            let mut total = 0;
            loop {
                let page = table.query(&shape, 250, cursor.as_ref()).unwrap();
                total += page.items.len();
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break total,
                }
            }
        })
    });

    group.finish();
}

fn benchmark_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistics");
    let (store, _) = populated_store(100, true);
    let events = store.take_changes(SOURCE).unwrap();

    let handler = StatisticsStreamHandler::new(
        store.clone(),
        SOURCE,
        GeoTableConfiguration::new("id"),
        STATISTICS,
        StatisticsConfiguration::default(),
    )
    .unwrap();
    handler.handle_events(&events).unwrap();

    group.bench_function("plan_event", |b| {
        b.iter(|| handler.plan(black_box(&events[0])).unwrap())
    });

    let statistics =
        StatisticsTable::new(STATISTICS, StatisticsConfiguration::default(), store).unwrap();
    for size in [0.05, 1.0] {
        let polygon = Rect::new((10.0, 48.0), (10.0 + size, 48.0 + size)).to_polygon();
        group.bench_with_input(BenchmarkId::new("query", size), &polygon, |b, polygon| {
            b.iter(|| statistics.query(black_box(polygon)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_enrichment,
    benchmark_geo_queries,
    benchmark_statistics
);
criterion_main!(benches);
