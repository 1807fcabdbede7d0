//! Property-based tests of confidence, probability and missing-value semantics.

use proptest::collection::vec as prop_vec;
use proptest::prelude::*;
use serde_json::Map;

use grove::testing::{age_fields, categories, yes_no_fields, yes_no_leaf};
use grove::utils::{wilson_score, DEFAULT_Z};
use grove::repr::Literal;
use grove::{
    DecisionTree, Ensemble, EnsembleConfig, FieldValue, InputRecord, MissingStrategy, NodeSpec,
    Predicate, SupervisedModel,
};

// =============================================================================
// Generators
// =============================================================================

/// Age split over a color split, with arbitrary class counts in the four leaves.
fn arb_age_tree() -> impl Strategy<Value = NodeSpec> {
    prop_vec((0u32..50, 0u32..50), 4).prop_filter_map("every leaf holds instances", |leaves| {
        if leaves.iter().any(|(young, old)| young + old == 0) {
            return None;
        }
        let leaf = |(young, old): (u32, u32)| {
            let (young, old) = (f64::from(young), f64::from(old));
            let output = if old > young { "old" } else { "young" };
            NodeSpec::leaf(output, young + old, categories(&[("young", young), ("old", old)]))
        };
        let inner = |a: (u32, u32), b: (u32, u32)| {
            let (young, old) = (f64::from(a.0 + b.0), f64::from(a.1 + b.1));
            let output = if old > young { "old" } else { "young" };
            NodeSpec::leaf(output, young + old, categories(&[("young", young), ("old", old)]))
                .with_children(vec![
                    leaf(a).with_predicate(split("<", "000001", FieldValue::Text("m".into()))),
                    leaf(b).with_predicate(split(">=", "000001", FieldValue::Text("m".into()))),
                ])
        };
        let (l0, l1, l2, l3) = (leaves[0], leaves[1], leaves[2], leaves[3]);
        let young = l0.0 + l1.0 + l2.0 + l3.0;
        let old = l0.1 + l1.1 + l2.1 + l3.1;
        let output = if old > young { "old" } else { "young" };
        let root = NodeSpec::leaf(
            output,
            f64::from(young + old),
            categories(&[("young", f64::from(young)), ("old", f64::from(old))]),
        )
        .with_children(vec![
            inner(l0, l1).with_predicate(split("<", "000000", FieldValue::Number(30.0))),
            inner(l2, l3).with_predicate(split(">=", "000000", FieldValue::Number(30.0))),
        ]);
        Some(root)
    })
}

fn split(operator: &str, field: &str, value: FieldValue) -> Predicate {
    Predicate::parse(operator, field, Literal::Value(value)).unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn wilson_is_monotone_in_share(n in 1.0f64..1e6, a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(wilson_score(low, n, DEFAULT_Z) <= wilson_score(high, n, DEFAULT_Z) + 1e-12);
    }

    #[test]
    fn wilson_is_monotone_in_n(share in 0.0f64..=1.0, n in 1.0f64..1e6, extra in 0.0f64..1e6) {
        prop_assert!(wilson_score(share, n, DEFAULT_Z) <= wilson_score(share, n + extra, DEFAULT_Z) + 1e-12);
    }

    #[test]
    fn wilson_stays_below_share(share in 0.0f64..=1.0, n in 1.0f64..1e6) {
        let score = wilson_score(share, n, DEFAULT_Z);
        prop_assert!(score >= -1e-12 && score <= share + 1e-12);
    }

    #[test]
    fn ensemble_probabilities_sum_to_one(
        leaves in prop_vec((0u32..100, 0u32..100), 1..12),
        max_models in 1usize..5,
    ) {
        let models: Vec<_> = leaves
            .iter()
            .enumerate()
            .filter(|(_, (no, yes))| no + yes > 0)
            .map(|(i, (no, yes))| yes_no_leaf(&format!("m{i}"), f64::from(*no), f64::from(*yes)))
            .collect();
        prop_assume!(!models.is_empty());
        let config = EnsembleConfig::builder().max_models(max_models).build().unwrap();
        let ensemble = Ensemble::from_models("e", yes_no_fields(), models, None, config).unwrap();

        let probabilities = ensemble
            .predict_probability(&Map::new(), MissingStrategy::LastPrediction)
            .unwrap();
        let total: f64 = probabilities.iter().map(|s| s.score).sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        prop_assert!(probabilities.iter().all(|s| (0.0..=1.0 + 1e-12).contains(&s.score)));
    }

    #[test]
    fn proportional_preserves_instance_count(root in arb_age_tree(), age in prop::option::of(0.0f64..60.0)) {
        let tree = DecisionTree::new(root.clone(), &age_fields()).unwrap();
        let mut input = InputRecord::new();
        if let Some(age) = age {
            input.insert("000000", FieldValue::Number(age));
        }
        let prediction = tree.predict(&input, MissingStrategy::Proportional);

        let expected = match age {
            None => root.count,
            Some(age) if age < 30.0 => root.children[0].count,
            Some(_) => root.children[1].count,
        };
        prop_assert!((prediction.count.unwrap() - expected).abs() < 1e-9);
        let total = prediction.distribution.as_ref().map(|d| d.total()).unwrap();
        prop_assert!((total - expected).abs() < 1e-9);
    }

    #[test]
    fn proportional_without_missing_matches_last_prediction(
        root in arb_age_tree(),
        age in 0.0f64..60.0,
        color in prop::sample::select(vec!["blue", "green", "red", "white"]),
    ) {
        let tree = DecisionTree::new(root, &age_fields()).unwrap();
        let input = InputRecord::new()
            .with("000000", FieldValue::Number(age))
            .with("000001", FieldValue::Text(color.to_string()));
        prop_assert_eq!(
            tree.predict(&input, MissingStrategy::Proportional),
            tree.predict(&input, MissingStrategy::LastPrediction)
        );
    }
}
