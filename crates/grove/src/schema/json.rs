//! Serde types of model and ensemble descriptions.
//!
//! These mirror the JSON documents as written. Nothing here is validated
//! beyond what serde checks; see the conversions into [`crate::TreeModel`]
//! and [`crate::EnsembleSpec`].

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::repr::{FieldSummary, Optype, PredictedValue};

// =============================================================================
// Custom deserializers
// =============================================================================

/// The root node carries `true` (or nothing) instead of a predicate.
fn deserialize_predicate<'de, D>(deserializer: D) -> Result<Option<PredicateSchema>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as SerdeError;

    match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(true) => Ok(None),
        value @ Value::Object(_) => serde_json::from_value(value)
            .map(Some)
            .map_err(SerdeError::custom),
        other => Err(SerdeError::custom(format!(
            "predicate must be an object or true, got {other}"
        ))),
    }
}

// =============================================================================
// Fields
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub optype: Optype,
    #[serde(default)]
    pub summary: FieldSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateSchema {
    /// Comparison symbol, with a trailing `*` when missing values satisfy it.
    pub operator: String,
    pub field: String,
    /// Number, string, list of categories for `in`, or `null`.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    #[serde(default, deserialize_with = "deserialize_predicate")]
    pub predicate: Option<PredicateSchema>,
    pub output: PredictedValue,
    pub count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// `[category, count]` pairs, or `[value, count]` bins for regression.
    #[serde(default)]
    pub distribution: Vec<(Value, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeBoostingSchema {
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_class: Option<String>,
}

/// A single decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub id: String,
    pub objective_field: String,
    pub fields: BTreeMap<String, FieldSchema>,
    pub root: NodeSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boosting: Option<TreeBoostingSchema>,
    /// `[field id, importance]` pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<Vec<(String, f64)>>,
}

// =============================================================================
// Ensemble
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialOffsets {
    /// Regression.
    Scalar(f64),
    /// `[class, offset]` pairs.
    PerClass(Vec<(String, f64)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleBoostingSchema {
    pub initial_offsets: InitialOffsets,
}

/// An ensemble. Members are referenced by id and loaded separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSchema {
    pub id: String,
    pub objective_field: String,
    pub fields: BTreeMap<String, FieldSchema>,
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boosting: Option<EnsembleBoostingSchema>,
    /// Per-member `[field id, importance]` pairs, in member order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<Vec<Vec<(String, f64)>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_predicate_forms() {
        for root in [json!({"output": "a", "count": 1}), json!({"predicate": true, "output": "a", "count": 1})] {
            let node: NodeSchema = serde_json::from_value(root).unwrap();
            assert!(node.predicate.is_none());
        }
        let result = serde_json::from_value::<NodeSchema>(json!({"predicate": 3, "output": "a", "count": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn node_with_children() {
        let node: NodeSchema = serde_json::from_value(json!({
            "output": 2.5,
            "count": 4,
            "distribution": [[1, 1], [3, 3]],
            "children": [
                {"predicate": {"operator": "<", "field": "000000", "value": 1}, "output": 1, "count": 1},
                {"predicate": {"operator": ">=", "field": "000000", "value": 1}, "output": 3, "count": 3}
            ]
        }))
        .unwrap();
        assert_eq!(node.output, PredictedValue::Number(2.5));
        assert_eq!(node.distribution.len(), 2);
        assert_eq!(node.children[1].predicate.as_ref().unwrap().operator, ">=");
    }

    #[test]
    fn offsets_scalar_or_per_class() {
        let scalar: EnsembleBoostingSchema =
            serde_json::from_value(json!({"initial_offsets": 1.5})).unwrap();
        assert_eq!(scalar.initial_offsets, InitialOffsets::Scalar(1.5));

        let per_class: EnsembleBoostingSchema =
            serde_json::from_value(json!({"initial_offsets": [["a", 0.1], ["b", -0.1]]})).unwrap();
        assert_eq!(
            per_class.initial_offsets,
            InitialOffsets::PerClass(vec![("a".into(), 0.1), ("b".into(), -0.1)])
        );
    }
}
