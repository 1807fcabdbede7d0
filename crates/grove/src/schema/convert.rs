//! Conversion from description types to validated runtime types.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::StructuralError;
use crate::inference::BoostingOffsets;
use crate::model::{BoostingInfo, EnsembleSpec, TreeModel};
use crate::repr::{
    format_number, Distribution, Field, FieldValue, Fields, Literal, NodeSpec, PredictedValue,
    Predicate,
};

use super::json::{
    EnsembleSchema, FieldSchema, InitialOffsets, ModelSchema, NodeSchema, PredicateSchema,
};

fn convert_fields(
    fields: BTreeMap<String, FieldSchema>,
    objective_field: String,
) -> Result<Fields, StructuralError> {
    let fields = fields.into_iter().map(|(id, f)| {
        Field::new(id, f.name, f.optype)
            .with_summary(f.summary)
            .with_affixes(f.prefix, f.suffix)
    });
    Fields::new(fields, objective_field)
}

/// `path` locates the node for error messages: `root`, `root/0`, `root/0/1`...
fn convert_node(node: NodeSchema, fields: &Fields, path: &str) -> Result<NodeSpec, StructuralError> {
    let distribution = convert_distribution(node.distribution, &node.output, path)?;
    let mut spec = NodeSpec::leaf(node.output, node.count, distribution);
    if let Some(predicate) = node.predicate {
        spec = spec.with_predicate(convert_predicate(predicate, fields, path)?);
    }
    if let Some(confidence) = node.confidence {
        spec = spec.with_confidence(confidence);
    }
    if let Some(median) = node.median {
        spec = spec.with_median(median);
    }
    let children = node
        .children
        .into_iter()
        .enumerate()
        .map(|(i, child)| convert_node(child, fields, &format!("{path}/{i}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(spec.with_children(children))
}

fn convert_distribution(
    entries: Vec<(Value, f64)>,
    output: &PredictedValue,
    path: &str,
) -> Result<Distribution, StructuralError> {
    let invalid = |reason: String| StructuralError::InvalidValue {
        context: format!("distribution of node {path}"),
        reason,
    };

    match entries.first().map(|(key, _)| key) {
        None => Ok(match output {
            PredictedValue::Number(_) => Distribution::empty_bins(),
            PredictedValue::Category(_) => Distribution::empty_categories(),
        }),
        Some(Value::String(_)) => entries
            .into_iter()
            .map(|(key, count)| match key {
                Value::String(category) => Ok((category, count)),
                other => Err(invalid(format!("expected a category, got {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Distribution::Categories),
        Some(Value::Number(_)) => {
            let mut bins = entries
                .into_iter()
                .map(|(key, count)| match key.as_f64() {
                    Some(value) => Ok((value, count)),
                    None => Err(invalid(format!("expected a number, got {key}"))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            bins.sort_by(|a, b| a.0.total_cmp(&b.0));
            Ok(Distribution::Bins(bins))
        }
        Some(other) => Err(invalid(format!("unsupported distribution key {other}"))),
    }
}

/// Scalar literals are cast like input values of the field they test, so a
/// numeric field compares numerically even when the literal is written as a string.
fn convert_predicate(
    predicate: PredicateSchema,
    fields: &Fields,
    path: &str,
) -> Result<Predicate, StructuralError> {
    let invalid = |reason: String| StructuralError::InvalidValue {
        context: format!("predicate of node {path}"),
        reason,
    };
    let literal = match (predicate.value, fields.get(&predicate.field)) {
        (Value::Null, _) => Literal::Missing,
        (Value::Array(items), _) => Literal::Set(items.iter().map(literal_text).collect()),
        (Value::Object(_), _) => return Err(invalid("object literals are not supported".into())),
        (value, Some(field)) => match field.cast(&value) {
            Ok(Some(cast)) => Literal::Value(cast),
            Ok(None) => return Err(invalid(format!("{value} is not representable"))),
            Err(err) => return Err(invalid(err.to_string())),
        },
        // Unknown fields are reported by tree validation with the node id.
        (Value::Number(n), None) => match n.as_f64() {
            Some(v) => Literal::Value(FieldValue::Number(v)),
            None => return Err(invalid(format!("{n} is not representable"))),
        },
        (Value::String(s), None) => Literal::Value(FieldValue::Text(s)),
        (Value::Bool(b), None) => Literal::Value(FieldValue::Text(b.to_string())),
    };
    Predicate::parse(&predicate.operator, predicate.field, literal)
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_f64().map_or_else(|| n.to_string(), format_number),
        other => other.to_string(),
    }
}

impl TryFrom<ModelSchema> for TreeModel {
    type Error = StructuralError;

    fn try_from(schema: ModelSchema) -> Result<Self, Self::Error> {
        let fields = convert_fields(schema.fields, schema.objective_field)?;
        let root = convert_node(schema.root, &fields, "root")?;
        let model = match schema.boosting {
            Some(boosting) => TreeModel::boosted(
                schema.id,
                fields,
                root,
                BoostingInfo {
                    weight: boosting.weight,
                    objective_class: boosting.objective_class,
                },
            )?,
            None => TreeModel::new(schema.id, fields, root)?,
        };
        tracing::debug!(
            model = model.id(),
            n_nodes = model.tree().n_nodes(),
            boosted = model.boosting().is_some(),
            "model description converted"
        );
        Ok(match schema.importance {
            Some(importance) => model.with_importance(importance),
            None => model,
        })
    }
}

impl TryFrom<EnsembleSchema> for EnsembleSpec {
    type Error = StructuralError;

    fn try_from(schema: EnsembleSchema) -> Result<Self, Self::Error> {
        let fields = convert_fields(schema.fields, schema.objective_field)?;
        let mut spec = EnsembleSpec::new(schema.id, fields, schema.models);
        spec.boosting = schema.boosting.map(|b| match b.initial_offsets {
            InitialOffsets::Scalar(offset) => BoostingOffsets::Regression(offset),
            InitialOffsets::PerClass(offsets) => BoostingOffsets::Classification(offsets),
        });
        spec.member_importance = schema.importance;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SupervisedModel;
    use crate::repr::{InputRecord, MissingStrategy, TaskKind};
    use crate::testing::age_model_json;
    use rstest::rstest;
    use serde_json::json;

    fn model(value: Value) -> Result<TreeModel, StructuralError> {
        TreeModel::from_value(value)
    }

    #[test]
    fn converts_split_model() {
        let model = model(age_model_json("m", 30.0)).unwrap();
        assert_eq!(model.task(), TaskKind::Classification);
        assert_eq!(model.tree().n_nodes(), 3);
        let old = InputRecord::new().with("000000", FieldValue::Number(31.0));
        let prediction = model.predict_record(&old, MissingStrategy::LastPrediction);
        assert_eq!(prediction.value, PredictedValue::from("old"));
    }

    #[test]
    fn in_predicate_with_missing_marker() {
        let value = json!({
            "id": "m",
            "objective_field": "000001",
            "fields": {
                "000000": {"name": "color", "optype": "categorical"},
                "000001": {"name": "y", "optype": "numeric"}
            },
            "root": {
                "output": 2.0, "count": 4, "distribution": [[1, 2], [3, 2]],
                "children": [
                    {"predicate": {"operator": "in*", "field": "000000", "value": ["red", 1]},
                     "output": 1, "count": 2, "distribution": [[1, 2]]},
                    {"predicate": {"operator": "!=", "field": "000000", "value": null},
                     "output": 3, "count": 2, "distribution": [[3, 2]]}
                ]
            }
        });
        let model = model(value).unwrap();
        let missing = model.predict_record(&InputRecord::new(), MissingStrategy::LastPrediction);
        assert_eq!(missing.value, PredictedValue::Number(1.0));
        let one = InputRecord::new().with("000000", FieldValue::Text("1".into()));
        let prediction = model.predict_record(&one, MissingStrategy::LastPrediction);
        assert_eq!(prediction.value, PredictedValue::Number(1.0));
        let blue = InputRecord::new().with("000000", FieldValue::Text("blue".into()));
        let prediction = model.predict_record(&blue, MissingStrategy::LastPrediction);
        assert_eq!(prediction.value, PredictedValue::Number(3.0));
    }

    #[test]
    fn string_literal_on_numeric_field_compares_numerically() {
        let mut value = age_model_json("m", 30.0);
        for (i, affixed) in [(0, "100"), (1, " 100 ")] {
            value["root"]["children"][i]["predicate"]["value"] = json!(affixed);
        }
        let model = model(value).unwrap();
        let thirty = InputRecord::new().with("000000", FieldValue::Number(30.0));
        let prediction = model.predict_record(&thirty, MissingStrategy::LastPrediction);
        assert_eq!(prediction.value, PredictedValue::from("young"));
        let large = InputRecord::new().with("000000", FieldValue::Number(150.0));
        let prediction = model.predict_record(&large, MissingStrategy::LastPrediction);
        assert_eq!(prediction.value, PredictedValue::from("old"));
    }

    #[rstest]
    #[case::unknown_objective(json!({"objective_field": "000009"}), "objective")]
    #[case::unknown_split_field(
        json!({"root": {"output": "young", "count": 100, "distribution": [["young", 100]],
               "children": [{"predicate": {"operator": "<", "field": "000009", "value": 1},
                             "output": "young", "count": 100}]}}),
        "unknown field"
    )]
    #[case::bad_operator(
        json!({"root": {"output": "young", "count": 100,
               "children": [{"predicate": {"operator": "~", "field": "000000", "value": 1},
                             "output": "young", "count": 100}]}}),
        "operator"
    )]
    #[case::counts_do_not_add_up(
        json!({"root": {"output": "young", "count": 100,
               "children": [{"predicate": {"operator": "<", "field": "000000", "value": 30},
                             "output": "young", "count": 60},
                            {"predicate": {"operator": ">=", "field": "000000", "value": 30},
                             "output": "old", "count": 20}]}}),
        "instances"
    )]
    #[case::mixed_distribution_keys(
        json!({"root": {"output": "young", "count": 100, "distribution": [["young", 80], [1, 20]]}}),
        "distribution"
    )]
    #[case::missing_child_predicate(
        json!({"root": {"output": "young", "count": 100,
               "children": [{"output": "young", "count": 100}]}}),
        "no predicate"
    )]
    #[case::text_literal_on_numeric_field(
        json!({"root": {"output": "young", "count": 100,
               "children": [{"predicate": {"operator": "<", "field": "000000", "value": "thirty"},
                             "output": "young", "count": 100}]}}),
        "predicate of node root/0"
    )]
    fn rejects_malformed_models(#[case] patch: Value, #[case] message: &str) {
        let mut value = age_model_json("m", 30.0);
        if let (Value::Object(target), Value::Object(patch)) = (&mut value, patch) {
            target.extend(patch);
        }
        let error = model(value).unwrap_err();
        assert!(
            error.to_string().contains(message),
            "{error} does not mention {message:?}"
        );
    }

    #[test]
    fn converts_ensemble_offsets() {
        let schema: EnsembleSchema = serde_json::from_value(json!({
            "id": "e",
            "objective_field": "000001",
            "fields": {
                "000000": {"name": "x", "optype": "numeric"},
                "000001": {"name": "y", "optype": "numeric"}
            },
            "models": ["a", "b"],
            "boosting": {"initial_offsets": 0.5}
        }))
        .unwrap();
        let spec = EnsembleSpec::try_from(schema).unwrap();
        assert_eq!(spec.members, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(spec.boosting, Some(BoostingOffsets::Regression(0.5)));
        assert!(spec.member_importance.is_none());
    }
}
