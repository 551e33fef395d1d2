use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tsdb_eval::catalog::{cloud_tasks, probe_tasks, ProbeCatalog};
use tsdb_eval::discovery::DimensionSet;
use tsdb_eval::executor::Dialect;
use tsdb_eval::result::{Measurement, ResultQueue};

fn caql_body() -> String {
    let values: Vec<String> = (0..400).map(|i| (6_000 + i).to_string()).collect();
    format!(
        r#"{{"version":"DF4","head":{{"count":400,"start":1600000000,"period":60}},"data":[[{}]],"meta":[{{"kind":"numeric","label":"count"}}]}}"#,
        values.join(",")
    )
}

fn influx_body() -> String {
    let rows: Vec<String> = (0..1_000)
        .map(|i| format!("[{},{}]", 1_600_000_000_000u64 + i * 5_000, i % 97))
        .collect();
    format!(
        r#"{{"results":[{{"statement_id":0,"series":[{{"name":"randomint-1","columns":["time","value"],"values":[{}]}}]}}]}}"#,
        rows.join(",")
    )
}

fn dims() -> DimensionSet {
    let mut dims = DimensionSet::with_capacity(2, 3);
    dims.group_names = vec![
        "sbx_irondb-nodes-a".to_string(),
        "sbx_irondb-nodes-b".to_string(),
    ];
    dims.instance_ids = (0..6).map(|i| format!("i-{i:017x}")).collect();
    dims
}

fn bench_extract(c: &mut Criterion) {
    let caql = caql_body();
    let influx = influx_body();

    c.bench_function("extract_caql", |b| {
        b.iter(|| black_box(Dialect::Caql.extract(black_box(&caql))))
    });
    c.bench_function("extract_influxql", |b| {
        b.iter(|| black_box(Dialect::InfluxQl.extract(black_box(&influx))))
    });
}

fn bench_cycle_plan(c: &mut Criterion) {
    let dims = dims();
    let catalog = ProbeCatalog::build(Dialect::Caql, true);

    c.bench_function("cycle_tasks", |b| {
        b.iter(|| {
            let cloud = cloud_tasks(black_box(&dims), "sbx");
            let probes = probe_tasks(black_box(&catalog), "sbx");
            black_box((cloud, probes))
        })
    });
}

fn bench_enqueue(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

    c.bench_function("enqueue_drain_1k", |b| {
        b.to_async(&rt).iter(|| async {
            let (queue, mut rx) = ResultQueue::new(1_024, None).unwrap();
            for i in 0..1_000 {
                queue.enqueue(Measurement::at(
                    1_600_000_000,
                    "sbx.query.metrics-count.value",
                    i.to_string(),
                ));
            }
            drop(queue);
            while let Some(m) = rx.recv().await {
                black_box(m);
            }
        })
    });
}

criterion_group!(benches, bench_extract, bench_cycle_plan, bench_enqueue);
criterion_main!(benches);
