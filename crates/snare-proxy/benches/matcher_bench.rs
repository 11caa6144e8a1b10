use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hyper::Method;
use snare_proxy::config::Config;
use snare_proxy::engine::{evaluate, Snapshot};

/// A config with `count` literal endpoints, a trailing wildcard, and one
/// periodic rule per endpoint.
fn build_snapshot(count: usize) -> Snapshot {
    let mut yaml = String::from("target:\n  url: http://localhost:9000\n  endpoints:\n");
    for i in 0..count {
        yaml.push_str(&format!(
            "    - path: /api/v1/endpoint{i}\n      methods: [\"GET\", \"POST\"]\n      failure_rules:\n        - condition:\n            every: 100\n          response:\n            status_code: 503\n"
        ));
    }
    yaml.push_str("    - path: /api/*\n      methods: [\"*\"]\n");
    let config = Config::from_yaml_str(&yaml).unwrap();
    Snapshot::compile(config, 1).unwrap()
}

fn bench_endpoint_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("endpoint_matching");

    for endpoint_count in [10, 50, 100, 500].iter() {
        let snapshot = build_snapshot(*endpoint_count);
        let method = Method::GET;

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("match_first", endpoint_count),
            endpoint_count,
            |b, _| {
                b.iter(|| snapshot.match_endpoint(black_box(&method), black_box("/api/v1/endpoint0")));
            },
        );

        let last = format!("/api/v1/endpoint{}", endpoint_count - 1);
        group.bench_with_input(
            BenchmarkId::new("match_last", endpoint_count),
            endpoint_count,
            |b, _| {
                b.iter(|| snapshot.match_endpoint(black_box(&method), black_box(&last)));
            },
        );

        // scans every literal before falling back to the wildcard
        group.bench_with_input(
            BenchmarkId::new("match_wildcard", endpoint_count),
            endpoint_count,
            |b, _| {
                b.iter(|| snapshot.match_endpoint(black_box(&method), black_box("/api/other")));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("match_none", endpoint_count),
            endpoint_count,
            |b, _| {
                b.iter(|| snapshot.match_endpoint(black_box(&method), black_box("/not/found")));
            },
        );
    }

    group.finish();
}

fn bench_rule_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_evaluation");
    let snapshot = build_snapshot(10);
    let method = Method::POST;
    let endpoint = snapshot
        .match_endpoint(&method, "/api/v1/endpoint3")
        .unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("every_100", |b| {
        b.iter(|| evaluate(black_box(endpoint), black_box(&method), snapshot.counters()));
    });

    group.bench_function("match_and_evaluate", |b| {
        b.iter(|| {
            let endpoint = snapshot
                .match_endpoint(black_box(&method), black_box("/api/v1/endpoint7"))
                .unwrap();
            evaluate(endpoint, &method, snapshot.counters()).is_fail()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_endpoint_matching, bench_rule_evaluation);
criterion_main!(benches);
