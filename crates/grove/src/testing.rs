//! Shared test fixtures.
//!
//! Small hand-checked models used by unit tests, integration tests and
//! benches. Fixtures panic on construction errors: they are built from
//! constants known to be valid.

use serde_json::{json, Value};

use crate::inference::CategoryScore;
use crate::model::{BoostingInfo, TreeModel};
use crate::repr::{
    Distribution, Field, FieldSummary, FieldValue, Fields, Literal, NodeSpec, Optype, Predicate,
};

// =============================================================================
// Distributions
// =============================================================================

pub fn categories(items: &[(&str, f64)]) -> Distribution {
    Distribution::Categories(items.iter().map(|(c, n)| (c.to_string(), *n)).collect())
}

pub fn bins(items: &[(f64, f64)]) -> Distribution {
    Distribution::Bins(items.to_vec())
}

fn numeric_predicate(operator: &str, field: &str, value: f64) -> Predicate {
    Predicate::parse(operator, field, Literal::Value(FieldValue::Number(value)))
        .expect("fixture operator")
}

// =============================================================================
// Age classifier
// =============================================================================

/// `age` (numeric), `color` (categorical) and the objective `label`
/// with classes `young` and `old`.
pub fn age_fields() -> Fields {
    let label = Field::new("000002", "label", Optype::Categorical).with_summary(FieldSummary {
        categories: vec![("young".into(), 80.0), ("old".into(), 20.0)],
        ..FieldSummary::default()
    });
    Fields::new(
        [
            Field::new("000000", "age", Optype::Numeric),
            Field::new("000001", "color", Optype::Categorical),
            label,
        ],
        "000002",
    )
    .expect("fixture fields")
}

/// 100 instances split at age 30: 80 young below, 20 old above.
pub fn age_split_tree() -> NodeSpec {
    age_split_tree_at(30.0)
}

pub fn age_split_tree_at(threshold: f64) -> NodeSpec {
    NodeSpec::leaf("young", 100.0, categories(&[("young", 80.0), ("old", 20.0)])).with_children(vec![
        NodeSpec::leaf("young", 80.0, categories(&[("young", 80.0)]))
            .with_predicate(numeric_predicate("<", "000000", threshold)),
        NodeSpec::leaf("old", 20.0, categories(&[("old", 20.0)]))
            .with_predicate(numeric_predicate(">=", "000000", threshold)),
    ])
}

pub fn age_model(id: &str) -> TreeModel {
    age_model_with_threshold(id, 30.0)
}

pub fn age_model_with_threshold(id: &str, threshold: f64) -> TreeModel {
    TreeModel::new(id, age_fields(), age_split_tree_at(threshold)).expect("fixture model")
}

/// [`age_model_with_threshold`] as a model description.
pub fn age_model_json(id: &str, threshold: f64) -> Value {
    json!({
        "id": id,
        "objective_field": "000002",
        "fields": {
            "000000": {"name": "age", "optype": "numeric"},
            "000001": {"name": "color", "optype": "categorical"},
            "000002": {
                "name": "label",
                "optype": "categorical",
                "summary": {"categories": [["young", 80], ["old", 20]]}
            }
        },
        "root": {
            "predicate": true,
            "output": "young",
            "count": 100,
            "distribution": [["young", 80], ["old", 20]],
            "children": [
                {
                    "predicate": {"operator": "<", "field": "000000", "value": threshold},
                    "output": "young",
                    "count": 80,
                    "distribution": [["young", 80]]
                },
                {
                    "predicate": {"operator": ">=", "field": "000000", "value": threshold},
                    "output": "old",
                    "count": 20,
                    "distribution": [["old", 20]]
                }
            ]
        }
    })
}

/// One boosting round scoring `class`: `below` for age < 30, `above` otherwise.
pub fn boosted_age_stump(id: &str, class: &str, weight: f64, below: f64, above: f64) -> TreeModel {
    let root = NodeSpec::leaf(0.0, 100.0, Distribution::empty_bins()).with_children(vec![
        NodeSpec::leaf(below, 80.0, Distribution::empty_bins())
            .with_predicate(numeric_predicate("<", "000000", 30.0)),
        NodeSpec::leaf(above, 20.0, Distribution::empty_bins())
            .with_predicate(numeric_predicate(">=", "000000", 30.0)),
    ]);
    let boosting = BoostingInfo {
        weight,
        objective_class: Some(class.to_string()),
    };
    TreeModel::boosted(id, age_fields(), root, boosting).expect("fixture boosted model")
}

// =============================================================================
// Regression
// =============================================================================

/// Predictor `x` and numeric objective `y`.
pub fn regression_fields() -> Fields {
    Fields::new(
        [
            Field::new("000000", "x", Optype::Numeric),
            Field::new("000001", "y", Optype::Numeric),
        ],
        "000001",
    )
    .expect("fixture fields")
}

/// Four instances: y = 1 once for x < 1, y = 3 three times otherwise.
pub fn regression_tree() -> NodeSpec {
    NodeSpec::leaf(2.5, 4.0, bins(&[(1.0, 1.0), (3.0, 3.0)])).with_children(vec![
        NodeSpec::leaf(1.0, 1.0, bins(&[(1.0, 1.0)]))
            .with_predicate(numeric_predicate("<", "000000", 1.0)),
        NodeSpec::leaf(3.0, 3.0, bins(&[(3.0, 3.0)]))
            .with_predicate(numeric_predicate(">=", "000000", 1.0)),
    ])
}

pub fn regression_model(id: &str) -> TreeModel {
    TreeModel::new(id, regression_fields(), regression_tree()).expect("fixture model")
}

pub fn boosted_regression_stump(id: &str, weight: f64, below: f64, above: f64) -> TreeModel {
    let root = NodeSpec::leaf(0.0, 4.0, Distribution::empty_bins()).with_children(vec![
        NodeSpec::leaf(below, 1.0, Distribution::empty_bins())
            .with_predicate(numeric_predicate("<", "000000", 1.0)),
        NodeSpec::leaf(above, 3.0, Distribution::empty_bins())
            .with_predicate(numeric_predicate(">=", "000000", 1.0)),
    ]);
    let boosting = BoostingInfo {
        weight,
        objective_class: None,
    };
    TreeModel::boosted(id, regression_fields(), root, boosting).expect("fixture boosted model")
}

// =============================================================================
// Binary classifier
// =============================================================================

/// Predictor `score` and objective `answer` with classes `no` and `yes`.
pub fn yes_no_fields() -> Fields {
    let answer = Field::new("000001", "answer", Optype::Categorical).with_summary(FieldSummary {
        categories: vec![("no".into(), 50.0), ("yes".into(), 50.0)],
        ..FieldSummary::default()
    });
    Fields::new([Field::new("000000", "score", Optype::Numeric), answer], "000001")
        .expect("fixture fields")
}

/// Single-leaf tree holding `no` and `yes` instances.
pub fn yes_no_leaf(id: &str, no: f64, yes: f64) -> TreeModel {
    let output = if yes > no { "yes" } else { "no" };
    let root = NodeSpec::leaf(output, no + yes, categories(&[("no", no), ("yes", yes)]));
    TreeModel::new(id, yes_no_fields(), root).expect("fixture model")
}

// =============================================================================
// Assertions
// =============================================================================

/// Assert that `actual` holds `expected` categories, in order, with scores
/// within `epsilon`.
#[track_caller]
pub fn assert_scores_eq(actual: &[CategoryScore], expected: &[(&str, f64)], epsilon: f64) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (score, (category, value)) in actual.iter().zip(expected) {
        assert_eq!(score.category, *category, "{actual:?} vs {expected:?}");
        assert!(
            approx::abs_diff_eq!(score.score, *value, epsilon = epsilon),
            "{}: {} vs {value}",
            score.category,
            score.score
        );
    }
}
