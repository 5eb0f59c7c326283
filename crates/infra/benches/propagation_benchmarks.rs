use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde_json::json;

use orgledger_capture::{Applier, ChangeCaptureConsumer};
use orgledger_core::{TenantId, UnitCode};
use orgledger_directory::{
    HierarchyService, InMemoryVersionStore, NewVersion, TemporalQueryEngine, UnitStatus, UnitType,
    VersionRepository,
};
use orgledger_infra::appliers::{CacheInvalidator, GraphProjector};
use orgledger_infra::cache::InMemoryCacheStore;
use orgledger_infra::event_bus::partition_for;
use orgledger_infra::graph::{GraphParams, GraphStore, GraphStoreError};

/// Accepts every statement so the benchmark measures the projection
/// logic, not the recording overhead of the test double.
struct DiscardingGraphStore;

impl GraphStore for DiscardingGraphStore {
    fn run(&self, _statement: &str, _params: &GraphParams) -> Result<(), GraphStoreError> {
        Ok(())
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn draft(tenant_id: TenantId, code: &str, name: &str, effective: NaiveDate) -> NewVersion {
    NewVersion {
        tenant_id,
        code: UnitCode::parse(code).unwrap(),
        parent_code: None,
        name: name.to_string(),
        unit_type: UnitType::Company,
        status: UnitStatus::Active,
        level: 1,
        path: format!("/{code}"),
        sort_order: 0,
        description: None,
        effective_date: effective,
        end_date: None,
        change_reason: None,
    }
}

fn change_body(op: &str, code: &str, version: i64) -> Vec<u8> {
    let image = json!({
        "tenant_id": "0190b5a4-0000-7000-8000-000000000000",
        "code": code,
        "parent_code": null,
        "name": "Head Office",
        "unit_type": "COMPANY",
        "status": "ACTIVE",
        "level": 1,
        "path": format!("/{code}"),
        "effective_date": 18262,
        "version": version,
        "is_current": true
    });
    let (before, after) = if op == "d" {
        (image, json!(null))
    } else {
        (json!(null), image)
    };
    json!({
        "payload": {
            "before": before,
            "after": after,
            "source": {
                "connector": "postgresql",
                "db": "organization_db",
                "schema": "public",
                "table": "organization_units"
            },
            "op": op,
            "ts_ms": 1719400000000u64
        }
    })
    .to_string()
    .into_bytes()
}

/// One unit with `len` contiguous daily versions.
fn chain_fixture(
    len: usize,
) -> (
    TenantId,
    TemporalQueryEngine<Arc<InMemoryVersionStore>>,
    NaiveDate,
) {
    let store = Arc::new(InMemoryVersionStore::new());
    let tenant = TenantId::new();
    let base = date(2000, 1, 1);
    store.create(draft(tenant, "1000001", "Unit v1", base)).unwrap();
    for i in 1..len {
        store
            .update(draft(
                tenant,
                "1000001",
                &format!("Unit v{}", i + 1),
                base + Duration::days(i as i64),
            ))
            .unwrap();
    }
    (tenant, TemporalQueryEngine::new(store), base)
}

fn bench_version_write_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("version_write_path");
    group.sample_size(1000);

    group.bench_function("create_root_unit", |b| {
        b.iter_batched(
            || {
                let store = Arc::new(InMemoryVersionStore::new());
                let service = HierarchyService::new(Arc::clone(&store));
                (store, service, TenantId::new())
            },
            |(store, service, tenant)| {
                let code = UnitCode::parse("1000001").unwrap();
                let placement = service.placement_for(tenant, &code, None).unwrap();
                let mut fresh = draft(tenant, "1000001", "Head Office", date(2024, 1, 1));
                fresh.level = placement.level;
                fresh.path = placement.path;
                service.validate_create(&fresh).unwrap();
                black_box(store.create(fresh).unwrap());
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("update_with_history", |b| {
        let store = Arc::new(InMemoryVersionStore::new());
        let service = HierarchyService::new(Arc::clone(&store));
        let tenant = TenantId::new();
        let base = date(2000, 1, 1);
        store.create(draft(tenant, "1000001", "Unit v1", base)).unwrap();
        let mut offset: i64 = 0;

        b.iter(|| {
            offset += 1;
            let next = draft(
                tenant,
                "1000001",
                black_box("Renamed"),
                base + Duration::days(offset),
            );
            service.validate_update(&next).unwrap();
            black_box(store.update(next).unwrap());
        });
    });

    group.finish();
}

fn bench_change_capture_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_capture_throughput");

    let cache = Arc::new(InMemoryCacheStore::new());
    let consumer = ChangeCaptureConsumer::new(vec![
        Arc::new(CacheInvalidator::new(Arc::clone(&cache))) as Arc<dyn Applier>,
        Arc::new(GraphProjector::new(DiscardingGraphStore)) as Arc<dyn Applier>,
    ]);

    for batch_size in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("decode_and_dispatch", batch_size),
            batch_size,
            |b, &size| {
                let bodies: Vec<Vec<u8>> = (0..size)
                    .map(|i| change_body("u", "1000001", i as i64 + 1))
                    .collect();
                b.iter(|| {
                    for body in &bodies {
                        black_box(consumer.process(black_box(body)));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_temporal_query_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("temporal_query_latency");

    for chain_len in [10usize, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("as_of_mid_chain", chain_len),
            chain_len,
            |b, &len| {
                let (tenant, engine, base) = chain_fixture(len);
                let code = UnitCode::parse("1000001").unwrap();
                let mid = base + Duration::days((len / 2) as i64);
                b.iter(|| black_box(engine.as_of(tenant, &code, black_box(mid)).unwrap()));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("full_history", chain_len),
            chain_len,
            |b, &len| {
                let (tenant, engine, _) = chain_fixture(len);
                let code = UnitCode::parse("1000001").unwrap();
                b.iter(|| black_box(engine.history(tenant, &code, None).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_partition_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_routing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("partition_for", |b| {
        let codes: Vec<UnitCode> = (0..1024u32)
            .map(|i| UnitCode::from_number(1_000_000 + i).unwrap())
            .collect();
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % codes.len();
            black_box(partition_for(black_box(&codes[i]), 8))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_version_write_path,
    bench_change_capture_throughput,
    bench_temporal_query_latency,
    bench_partition_routing
);
criterion_main!(benches);
