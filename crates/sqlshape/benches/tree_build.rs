use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use sqlshape::{
    Engine, PreferenceResolver, Record, Selector, TransformChain, TreeColumns, build_tree,
};
use std::sync::Arc;

/// `n` rows over `n / 4` distinct ids, so three of every four rows collide.
fn rows(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let row = json!({
                "id": i % (n / 4).max(1),
                "source": if i % 2 == 0 { "manual" } else { "sensor" },
                "value": format!(" reading {i} "),
            });
            serde_json::from_value(row).expect("row is an object")
        })
        .collect()
}

fn columns() -> (Vec<String>, Vec<String>, Vec<String>) {
    (
        vec!["id".to_string()],
        vec!["source".to_string()],
        vec!["value".to_string()],
    )
}

fn bench_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_build/overwrite");
    let (key, drop, non_key) = columns();

    for n in [100, 1_000, 10_000] {
        let input = rows(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| {
                let tree = build_tree(
                    input.iter().cloned().map(Ok),
                    TreeColumns {
                        key: &key,
                        drop: &drop,
                        non_key: &non_key,
                    },
                    None,
                    None,
                );
                black_box(tree.map(|t| t.len()))
            });
        });
    }

    group.finish();
}

fn bench_preferences(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_build/preferences");
    let (key, drop, non_key) = columns();
    let resolver = PreferenceResolver::new(
        Arc::new(Engine::new()),
        vec!["source == 'manual'".to_string(), "value != ''".to_string()],
    );

    for n in [100, 1_000] {
        let input = rows(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| {
                let tree = build_tree(
                    input.iter().cloned().map(Ok),
                    TreeColumns {
                        key: &key,
                        drop: &drop,
                        non_key: &non_key,
                    },
                    None,
                    Some(&resolver),
                );
                black_box(tree.map(|t| t.len()))
            });
        });
    }

    group.finish();
}

fn bench_transforms(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_build/transforms");
    let (key, drop, non_key) = columns();
    let mut chain = TransformChain::new();
    chain
        .append("trim", Selector::Field("value".into()), vec![])
        .and_then(|chain| chain.append("upper", Selector::Field("value".into()), vec![]))
        .expect("built-in transforms are registered");

    for n in [100, 1_000, 10_000] {
        let input = rows(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| {
                let tree = build_tree(
                    input.iter().cloned().map(Ok),
                    TreeColumns {
                        key: &key,
                        drop: &drop,
                        non_key: &non_key,
                    },
                    Some(&chain),
                    None,
                );
                black_box(tree.map(|t| t.len()))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_overwrite, bench_preferences, bench_transforms);
criterion_main!(benches);
