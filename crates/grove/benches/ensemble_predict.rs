//! Ensemble prediction benchmarks.
//!
//! Measures the cost of the combination methods and how chunked evaluation
//! scales with chunk size and thread count.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Map, Value};

use grove::repr::Literal;
use grove::testing::{age_fields, categories};
use grove::{
    CombinationMethod, Decision, Ensemble, EnsembleConfig, FieldValue, MissingStrategy,
    NodeSpec, OperatingKind, PredictOptions, Predicate, SupervisedModel, TreeModel,
};

const N_MEMBERS: usize = 256;
const DEPTH: u32 = 8;

// =============================================================================
// Model generation
// =============================================================================

fn split(operator: &str, value: f64) -> Predicate {
    Predicate::parse(operator, "000000", Literal::Value(FieldValue::Number(value))).unwrap()
}

/// Balanced tree over age in `[low, high)`, shifted by `seed` so members differ.
fn balanced_tree(depth: u32, low: f64, high: f64, seed: usize) -> NodeSpec {
    let count = f64::from(1u32 << depth);
    let young = if (low as usize + seed) % 3 == 0 { count * 0.25 } else { count * 0.75 };
    let output = if young * 2.0 >= count { "young" } else { "old" };
    let node = NodeSpec::leaf(output, count, categories(&[("young", young), ("old", count - young)]));
    if depth == 0 {
        return node;
    }
    let mid = (low + high) / 2.0;
    let left = balanced_tree(depth - 1, low, mid, seed).with_predicate(split("<", mid));
    let right = balanced_tree(depth - 1, mid, high, seed).with_predicate(split(">=", mid));
    // Inner distributions follow their children.
    let mut node = node.with_children(vec![left, right]);
    let mut merged = node.children[0].distribution.clone();
    merged.merge(&node.children[1].distribution);
    node.distribution = merged;
    node
}

fn ensemble(config: EnsembleConfig) -> Ensemble {
    let models: Vec<TreeModel> = (0..N_MEMBERS)
        .map(|i| {
            let shift = (i % 17) as f64;
            TreeModel::new(format!("m{i}"), age_fields(), balanced_tree(DEPTH, shift, 100.0 + shift, i))
                .unwrap()
        })
        .collect();
    Ensemble::from_models("bench", age_fields(), models, None, config).unwrap()
}

fn inputs() -> Vec<Map<String, Value>> {
    (0..64)
        .map(|i| {
            let age = if i % 8 == 0 { Value::Null } else { json!(i as f64 * 1.7) };
            json!({"age": age}).as_object().cloned().unwrap_or_default()
        })
        .collect()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_methods(c: &mut Criterion) {
    let ensemble = ensemble(EnsembleConfig::default());
    let inputs = inputs();

    let mut group = c.benchmark_group("ensemble/methods");
    group.throughput(Throughput::Elements(inputs.len() as u64));

    let decisions = [
        ("plurality", Decision::Combine(CombinationMethod::Plurality)),
        ("confidence", Decision::Combine(CombinationMethod::Confidence)),
        ("probability", Decision::Combine(CombinationMethod::Probability)),
        ("probability_kind", Decision::OperatingKind(OperatingKind::Probability)),
    ];
    for (name, decision) in decisions {
        for strategy in [MissingStrategy::LastPrediction, MissingStrategy::Proportional] {
            let options = PredictOptions::builder()
                .decision(decision.clone())
                .missing_strategy(strategy)
                .build();
            group.bench_with_input(
                BenchmarkId::new(name, format!("{strategy:?}")),
                &inputs,
                |b, inputs| {
                    b.iter(|| {
                        for input in inputs {
                            black_box(ensemble.predict(black_box(input), &options).unwrap());
                        }
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_chunking(c: &mut Criterion) {
    let inputs = inputs();
    let options = PredictOptions::default().with_decision(Decision::Combine(CombinationMethod::Plurality));

    let mut group = c.benchmark_group("ensemble/chunking");
    group.throughput(Throughput::Elements(inputs.len() as u64));

    for (max_models, n_threads) in [(N_MEMBERS, 1), (32, 1), (32, 2), (32, 4), (8, 4)] {
        let config = EnsembleConfig::builder()
            .max_models(max_models)
            .n_threads(n_threads)
            .build()
            .unwrap();
        let ensemble = ensemble(config);
        group.bench_with_input(
            BenchmarkId::new(format!("chunk_{max_models}"), n_threads),
            &inputs,
            |b, inputs| {
                b.iter(|| {
                    for input in inputs {
                        black_box(ensemble.predict(black_box(input), &options).unwrap());
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_methods, bench_chunking);
criterion_main!(benches);
