//! Decision tree storage and single-tree prediction.
//!
//! Nodes live in a flat arena in breadth-first order; the children of a node
//! are contiguous. The root is node 0.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StructuralError;
use crate::inference::Prediction;
use crate::utils::{regression_error, DEFAULT_Z};

use super::distribution::Distribution;
use super::field::{FieldValue, Fields, InputRecord, Optype};
use super::node::{Node, NodeSpec, PredictedValue};
use super::predicate::Literal;
use super::{MissingStrategy, NodeId, TaskKind};

/// Relative tolerance when checking that children partition their parent's count.
const COUNT_TOLERANCE: f64 = 1e-9;

/// Immutable decision tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Box<[Node]>,
    task: TaskKind,
}

/// Outcome of a proportional descent.
enum Resolved {
    /// A single node was reached without meeting a missing split field.
    Node(usize),
    /// Children were merged below `node` because its split field was missing.
    Merged { node: usize, distribution: Distribution },
}

impl DecisionTree {
    /// Build and validate a tree predicting the objective field.
    pub fn new(root: NodeSpec, fields: &Fields) -> Result<Self, StructuralError> {
        Self::with_task(root, fields, TaskKind::for_objective(fields.objective())?)
    }

    /// Build and validate a tree for an explicit task.
    ///
    /// Boosted classification members are numeric trees over a categorical
    /// objective, hence the override.
    ///
    /// Checks that every non-root node has a predicate on a known field, that
    /// siblings split on the same field, that child counts add up to their
    /// parent's count, and that outputs and distributions match the task.
    /// Missing confidences are derived here.
    pub fn with_task(root: NodeSpec, fields: &Fields, task: TaskKind) -> Result<Self, StructuralError> {
        if root.predicate.is_some() {
            return Err(StructuralError::RootPredicate);
        }

        // FIFO with ids handed out at enqueue: pop order equals id order.
        let mut nodes = Vec::new();
        let mut queue = std::collections::VecDeque::from([root]);
        let mut next_id: usize = 1;

        while let Some(mut spec) = queue.pop_front() {
            let id = nodes.len() as NodeId;
            let children = std::mem::take(&mut spec.children);
            validate_children(id, next_id as NodeId, &spec, &children, fields)?;

            let node = finish_node(id, spec, task, next_id as NodeId, children.len() as u32)?;
            next_id += children.len();
            nodes.push(node);
            queue.extend(children);
        }

        tracing::trace!(n_nodes = nodes.len(), task = task.as_str(), "built decision tree");
        Ok(Self {
            nodes: nodes.into_boxed_slice(),
            task,
        })
    }

    #[inline]
    pub fn task(&self) -> TaskKind {
        self.task
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Output of the root node.
    pub fn root_output(&self) -> &PredictedValue {
        &self.nodes[0].output
    }

    /// Training distribution of the whole tree.
    pub fn root_distribution(&self) -> &Distribution {
        &self.nodes[0].distribution
    }

    /// Predict for a cast input record.
    pub fn predict(&self, input: &InputRecord, strategy: MissingStrategy) -> Prediction {
        let mut used = BTreeSet::new();
        let prediction = match strategy {
            MissingStrategy::LastPrediction => {
                self.node_prediction(self.last_prediction(input, &mut used))
            }
            MissingStrategy::Proportional => match self.proportional(0, input, &mut used) {
                Resolved::Node(id) => self.node_prediction(id),
                Resolved::Merged { node, distribution } => {
                    self.merged_prediction(node, distribution)
                }
            },
        };

        let unused = input
            .field_ids()
            .filter(|id| !used.contains(id))
            .map(str::to_string)
            .collect();
        prediction.with_unused_fields(unused)
    }

    /// Per-field importance from the count-weighted impurity decrease of each
    /// split, normalized to sum to 1. Sorted by descending importance.
    pub fn importance(&self) -> Vec<(String, f64)> {
        let mut gains: BTreeMap<&str, f64> = BTreeMap::new();
        for node in self.nodes.iter().filter(|n| !n.is_leaf()) {
            let Some(field) = self.split_field(node) else {
                continue;
            };
            let after: f64 = node
                .children()
                .map(|c| self.nodes[c].count * self.nodes[c].distribution.impurity())
                .sum();
            let gain = node.count * node.distribution.impurity() - after;
            *gains.entry(field).or_default() += gain.max(0.0);
        }

        let total: f64 = gains.values().sum();
        let mut importance: Vec<(String, f64)> = gains
            .into_iter()
            .map(|(field, gain)| {
                let share = if total > 0.0 { gain / total } else { 0.0 };
                (field.to_string(), share)
            })
            .collect();
        importance.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        importance
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    fn split_field<'a>(&'a self, node: &Node) -> Option<&'a str> {
        node.children()
            .next()
            .and_then(|c| self.nodes[c].predicate.as_ref())
            .map(|p| p.field())
    }

    /// Follow the first applicable child until none applies.
    fn last_prediction<'a>(&'a self, input: &InputRecord, used: &mut BTreeSet<&'a str>) -> usize {
        let mut id = 0;
        'descend: loop {
            for child in self.nodes[id].children() {
                if let Some(predicate) = &self.nodes[child].predicate {
                    used.insert(predicate.field());
                    if predicate.applies(input) {
                        id = child;
                        continue 'descend;
                    }
                }
            }
            return id;
        }
    }

    fn proportional<'a>(
        &'a self,
        id: usize,
        input: &InputRecord,
        used: &mut BTreeSet<&'a str>,
    ) -> Resolved {
        let node = &self.nodes[id];
        let Some(field) = self.split_field(node) else {
            return Resolved::Node(id);
        };
        used.insert(field);

        let takes_missing = node.children().any(|c| {
            self.nodes[c]
                .predicate
                .as_ref()
                .is_some_and(|p| p.accepts_missing())
        });
        if input.contains(field) || takes_missing {
            for child in node.children() {
                if self.nodes[child]
                    .predicate
                    .as_ref()
                    .is_some_and(|p| p.applies(input))
                {
                    return self.proportional(child, input, used);
                }
            }
            return Resolved::Node(id);
        }

        let mut merged = node.distribution.empty_like();
        for child in node.children() {
            match self.proportional(child, input, used) {
                Resolved::Node(reached) => merged.merge(&self.nodes[reached].distribution),
                Resolved::Merged { distribution, .. } => merged.merge(&distribution),
            }
        }
        Resolved::Merged {
            node: id,
            distribution: merged,
        }
    }

    // =========================================================================
    // Prediction records
    // =========================================================================

    fn node_prediction(&self, id: usize) -> Prediction {
        let node = &self.nodes[id];
        let prediction = Prediction::new(node.output.clone())
            .with_confidence(node.confidence)
            .with_count(node.count);
        match (&node.output, self.task) {
            (PredictedValue::Category(category), TaskKind::Classification) => {
                let total = node.distribution.total();
                let share = if total > 0.0 {
                    node.distribution.count_of(category) / total
                } else {
                    0.0
                };
                prediction
                    .with_probability(share)
                    .with_distribution(node.distribution.clone())
            }
            _ => {
                let prediction = prediction.with_distribution(node.distribution.clone());
                match node.median {
                    Some(median) => prediction.with_median(median),
                    None => prediction,
                }
            }
        }
    }

    fn merged_prediction(&self, id: usize, merged: Distribution) -> Prediction {
        let total = merged.total();
        match self.task {
            TaskKind::Classification => {
                let Some((category, count)) = merged.majority() else {
                    return self.node_prediction(id);
                };
                let confidence = merged.wilson(category, None, DEFAULT_Z);
                Prediction::new(category)
                    .with_confidence(confidence)
                    .with_probability(count / total)
                    .with_count(total)
                    .with_distribution(merged)
            }
            TaskKind::Regression => {
                let Some(mean) = merged.mean() else {
                    return self.node_prediction(id);
                };
                let variance = merged.variance(mean).unwrap_or(f64::NAN);
                let mut prediction = Prediction::new(mean)
                    .with_confidence(regression_error(variance, total, DEFAULT_Z))
                    .with_count(total);
                if let Some(median) = merged.median() {
                    prediction = prediction.with_median(median);
                }
                prediction.with_distribution(merged)
            }
        }
    }
}

// =============================================================================
// Construction helpers
// =============================================================================

fn validate_children(
    id: NodeId,
    first_child: NodeId,
    parent: &NodeSpec,
    children: &[NodeSpec],
    fields: &Fields,
) -> Result<(), StructuralError> {
    if children.is_empty() {
        return Ok(());
    }

    let mut split_field: Option<&str> = None;
    for (offset, child) in children.iter().enumerate() {
        let child_id = first_child + offset as NodeId;
        let predicate = child
            .predicate
            .as_ref()
            .ok_or(StructuralError::MissingPredicate { node: child_id })?;
        let field = fields.get(predicate.field()).ok_or_else(|| StructuralError::UnknownField {
            node: child_id,
            field: predicate.field().to_string(),
        })?;
        if let (Optype::Numeric, Literal::Value(FieldValue::Text(text))) =
            (field.optype, predicate.literal())
        {
            return Err(StructuralError::InvalidValue {
                context: format!("predicate of node {child_id}"),
                reason: format!("text literal {text:?} on numeric field {}", field.id),
            });
        }
        match split_field {
            None => split_field = Some(predicate.field()),
            Some(first) if first != predicate.field() => {
                return Err(StructuralError::MixedSplitFields {
                    node: id,
                    first: first.to_string(),
                    other: predicate.field().to_string(),
                });
            }
            Some(_) => {}
        }
    }

    let children_count: f64 = children.iter().map(|c| c.count).sum();
    if (children_count - parent.count).abs() > COUNT_TOLERANCE * parent.count.abs().max(1.0) {
        return Err(StructuralError::InconsistentCounts {
            node: id,
            count: parent.count,
            children: children_count,
        });
    }
    Ok(())
}

fn invalid(id: NodeId, reason: impl Into<String>) -> StructuralError {
    StructuralError::InvalidValue {
        context: format!("node {id}"),
        reason: reason.into(),
    }
}

fn finish_node(
    id: NodeId,
    spec: NodeSpec,
    task: TaskKind,
    first_child: NodeId,
    n_children: u32,
) -> Result<Node, StructuralError> {
    if !spec.count.is_finite() || spec.count < 0.0 {
        return Err(invalid(id, format!("instance count {} is not a count", spec.count)));
    }

    let (distribution, confidence) = match (task, &spec.output, spec.distribution) {
        (TaskKind::Classification, PredictedValue::Category(category), Distribution::Categories(c)) => {
            let distribution = if c.is_empty() {
                Distribution::Categories(vec![(category.clone(), spec.count)])
            } else {
                Distribution::Categories(c)
            };
            let confidence = spec
                .confidence
                .unwrap_or_else(|| distribution.wilson(category, None, DEFAULT_Z));
            (distribution, confidence)
        }
        (TaskKind::Regression, PredictedValue::Number(value), Distribution::Bins(b)) => {
            let distribution = if b.is_empty() {
                Distribution::Bins(vec![(*value, spec.count)])
            } else {
                Distribution::Bins(b)
            };
            let confidence = spec.confidence.unwrap_or_else(|| {
                let variance = distribution
                    .mean()
                    .and_then(|mean| distribution.variance(mean))
                    .unwrap_or(f64::NAN);
                regression_error(variance, distribution.total(), DEFAULT_Z)
            });
            (distribution, confidence)
        }
        (TaskKind::Classification, PredictedValue::Number(_), _) => {
            return Err(invalid(id, "classification node has a numeric output"));
        }
        (TaskKind::Regression, PredictedValue::Category(_), _) => {
            return Err(invalid(id, "regression node has a categorical output"));
        }
        (_, _, _) => {
            return Err(invalid(
                id,
                format!("distribution does not match a {} objective", task.as_str()),
            ));
        }
    };

    let median = match task {
        TaskKind::Regression => spec.median.or_else(|| distribution.median()),
        TaskKind::Classification => None,
    };

    Ok(Node {
        predicate: spec.predicate,
        output: spec.output,
        count: spec.count,
        confidence,
        distribution,
        median,
        first_child,
        n_children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{FieldValue, Literal, Predicate};
    use crate::testing::{age_fields, age_split_tree, bins, categories, regression_fields};
    use crate::utils::wilson_score;
    use approx::assert_abs_diff_eq;

    fn age(value: f64) -> InputRecord {
        InputRecord::new().with("000000", FieldValue::Number(value))
    }

    fn lt(field: &str, value: f64) -> Predicate {
        Predicate::parse("<", field, Literal::Value(FieldValue::Number(value))).unwrap()
    }

    fn ge(field: &str, value: f64) -> Predicate {
        Predicate::parse(">=", field, Literal::Value(FieldValue::Number(value))).unwrap()
    }

    #[test]
    fn layout_is_breadth_first() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.task(), TaskKind::Classification);
        assert_eq!(tree.nodes[0].children(), 1..3);
    }

    #[test]
    fn last_prediction_follows_matching_branch() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();

        let young = tree.predict(&age(25.0), MissingStrategy::LastPrediction);
        assert_eq!(young.value, PredictedValue::from("young"));
        assert_eq!(young.count, Some(80.0));
        assert_abs_diff_eq!(young.confidence.unwrap(), wilson_score(1.0, 80.0, DEFAULT_Z));

        let old = tree.predict(&age(30.0), MissingStrategy::LastPrediction);
        assert_eq!(old.value, PredictedValue::from("old"));
    }

    #[test]
    fn last_prediction_stops_at_missing_split() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();
        let p = tree.predict(&InputRecord::new(), MissingStrategy::LastPrediction);
        assert_eq!(p.value, PredictedValue::from("young"));
        assert_eq!(p.count, Some(100.0));
        assert_abs_diff_eq!(p.confidence.unwrap(), 0.711_17, epsilon = 1e-4);
    }

    #[test]
    fn proportional_merges_children_when_field_missing() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();
        let p = tree.predict(&InputRecord::new(), MissingStrategy::Proportional);

        assert_eq!(p.value, PredictedValue::from("young"));
        assert_eq!(
            p.distribution,
            Some(categories(&[("young", 80.0), ("old", 20.0)]))
        );
        assert_eq!(p.count, Some(100.0));
        assert_abs_diff_eq!(p.probability.unwrap(), 0.8);
        assert_abs_diff_eq!(
            p.confidence.unwrap(),
            wilson_score(0.8, 100.0, DEFAULT_Z),
            epsilon = 1e-12
        );
    }

    #[test]
    fn proportional_without_missing_matches_last_prediction() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();
        for value in [10.0, 29.9, 30.0, 65.0] {
            assert_eq!(
                tree.predict(&age(value), MissingStrategy::Proportional),
                tree.predict(&age(value), MissingStrategy::LastPrediction)
            );
        }
    }

    #[test]
    fn missing_aware_branch_takes_missing_values() {
        let fields = age_fields();
        let root = NodeSpec::leaf("young", 100.0, categories(&[("young", 80.0), ("old", 20.0)]))
            .with_children(vec![
                NodeSpec::leaf("old", 20.0, categories(&[("old", 20.0)]))
                    .with_predicate(ge("000000", 30.0).with_missing(true)),
                NodeSpec::leaf("young", 80.0, categories(&[("young", 80.0)]))
                    .with_predicate(lt("000000", 30.0)),
            ]);
        let tree = DecisionTree::new(root, &fields).unwrap();

        for strategy in [MissingStrategy::LastPrediction, MissingStrategy::Proportional] {
            let p = tree.predict(&InputRecord::new(), strategy);
            assert_eq!(p.value, PredictedValue::from("old"));
            assert_eq!(p.count, Some(20.0));
        }
    }

    #[test]
    fn proportional_count_matches_node_count_at_depth() {
        let fields = age_fields();
        let color = |c: &str| {
            Predicate::parse("=", "000001", Literal::Value(FieldValue::Text(c.into()))).unwrap()
        };
        let not_color = |c: &str| {
            Predicate::parse("!=", "000001", Literal::Value(FieldValue::Text(c.into()))).unwrap()
        };
        let root = NodeSpec::leaf("young", 10.0, categories(&[("young", 6.0), ("old", 4.0)]))
            .with_children(vec![
                NodeSpec::leaf("young", 6.0, categories(&[("young", 5.0), ("old", 1.0)]))
                    .with_predicate(lt("000000", 30.0))
                    .with_children(vec![
                        NodeSpec::leaf("young", 4.0, categories(&[("young", 4.0)]))
                            .with_predicate(color("red")),
                        NodeSpec::leaf("young", 2.0, categories(&[("young", 1.0), ("old", 1.0)]))
                            .with_predicate(not_color("red")),
                    ]),
                NodeSpec::leaf("old", 4.0, categories(&[("young", 1.0), ("old", 3.0)]))
                    .with_predicate(ge("000000", 30.0)),
            ]);
        let tree = DecisionTree::new(root, &fields).unwrap();

        let everything_missing = tree.predict(&InputRecord::new(), MissingStrategy::Proportional);
        assert_eq!(everything_missing.count, Some(10.0));
        assert_eq!(
            everything_missing.distribution.as_ref().map(Distribution::total),
            Some(10.0)
        );

        let color_missing = tree.predict(&age(20.0), MissingStrategy::Proportional);
        assert_eq!(color_missing.count, Some(6.0));
        assert_eq!(
            color_missing.distribution,
            Some(categories(&[("young", 5.0), ("old", 1.0)]))
        );
    }

    #[test]
    fn ties_in_merged_distribution_break_lexically() {
        let fields = age_fields();
        let root = NodeSpec::leaf("young", 10.0, categories(&[("young", 5.0), ("old", 5.0)]))
            .with_children(vec![
                NodeSpec::leaf("young", 5.0, categories(&[("young", 5.0)]))
                    .with_predicate(lt("000000", 30.0)),
                NodeSpec::leaf("old", 5.0, categories(&[("old", 5.0)]))
                    .with_predicate(ge("000000", 30.0)),
            ]);
        let tree = DecisionTree::new(root, &fields).unwrap();
        let p = tree.predict(&InputRecord::new(), MissingStrategy::Proportional);
        assert_eq!(p.value, PredictedValue::from("old"));
    }

    #[test]
    fn regression_proportional_uses_merged_bins() {
        let fields = regression_fields();
        let root = NodeSpec::leaf(2.5, 4.0, bins(&[(1.0, 1.0), (3.0, 3.0)])).with_children(vec![
            NodeSpec::leaf(1.0, 1.0, bins(&[(1.0, 1.0)])).with_predicate(lt("000000", 1.0)),
            NodeSpec::leaf(3.0, 3.0, bins(&[(3.0, 3.0)])).with_predicate(ge("000000", 1.0)),
        ]);
        let tree = DecisionTree::new(root, &fields).unwrap();
        assert_eq!(tree.task(), TaskKind::Regression);

        let p = tree.predict(&InputRecord::new(), MissingStrategy::Proportional);
        assert_eq!(p.value, PredictedValue::Number(2.5));
        assert_eq!(p.median, Some(3.0));
        assert_eq!(p.count, Some(4.0));
        assert_abs_diff_eq!(
            p.confidence.unwrap(),
            regression_error(1.0, 4.0, DEFAULT_Z),
            epsilon = 1e-12
        );

        let leaf = tree.predict(
            &InputRecord::new().with("000000", FieldValue::Number(0.0)),
            MissingStrategy::Proportional,
        );
        assert_eq!(leaf.value, PredictedValue::Number(1.0));
        assert_eq!(leaf.confidence, Some(0.0));
    }

    #[test]
    fn stored_confidence_wins_over_derived() {
        let root = age_split_tree().with_confidence(0.5);
        let tree = DecisionTree::new(root, &age_fields()).unwrap();
        let p = tree.predict(&InputRecord::new(), MissingStrategy::LastPrediction);
        assert_eq!(p.confidence, Some(0.5));
    }

    #[test]
    fn reports_unused_fields() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();
        let input = age(40.0).with("000001", FieldValue::Text("red".into()));
        let p = tree.predict(&input, MissingStrategy::LastPrediction);
        assert_eq!(p.unused_fields, vec!["000001".to_string()]);
    }

    #[test]
    fn prediction_is_deterministic() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();
        let input = age(31.0);
        let first = tree.predict(&input, MissingStrategy::Proportional);
        for _ in 0..10 {
            assert_eq!(tree.predict(&input, MissingStrategy::Proportional), first);
        }
    }

    #[test]
    fn importance_of_single_split() {
        let tree = DecisionTree::new(age_split_tree(), &age_fields()).unwrap();
        assert_eq!(tree.importance(), vec![("000000".to_string(), 1.0)]);
    }

    #[test]
    fn rejects_root_predicate() {
        let root = age_split_tree().with_predicate(lt("000000", 1.0));
        assert!(matches!(
            DecisionTree::new(root, &age_fields()),
            Err(StructuralError::RootPredicate)
        ));
    }

    #[test]
    fn rejects_missing_predicate() {
        let mut root = age_split_tree();
        root.children[1].predicate = None;
        assert!(matches!(
            DecisionTree::new(root, &age_fields()),
            Err(StructuralError::MissingPredicate { node: 2 })
        ));
    }

    #[test]
    fn rejects_unknown_field() {
        let mut root = age_split_tree();
        root.children[0].predicate = Some(lt("999999", 1.0));
        assert!(matches!(
            DecisionTree::new(root, &age_fields()),
            Err(StructuralError::UnknownField { node: 1, field }) if field == "999999"
        ));
    }

    #[test]
    fn rejects_text_literal_on_numeric_field() {
        let mut root = age_split_tree();
        root.children[0].predicate = Some(
            Predicate::parse("<", "000000", Literal::Value(FieldValue::Text("30".into()))).unwrap(),
        );
        let err = DecisionTree::new(root, &age_fields()).unwrap_err();
        assert!(
            matches!(err, StructuralError::InvalidValue { ref context, .. } if context == "predicate of node 1"),
            "got: {err:?}"
        );
    }

    #[test]
    fn rejects_mixed_split_fields() {
        let mut root = age_split_tree();
        root.children[1].predicate = Some(
            Predicate::parse("=", "000001", Literal::Value(FieldValue::Text("red".into())))
                .unwrap(),
        );
        assert!(matches!(
            DecisionTree::new(root, &age_fields()),
            Err(StructuralError::MixedSplitFields { node: 0, .. })
        ));
    }

    #[test]
    fn rejects_inconsistent_counts() {
        let mut root = age_split_tree();
        root.children[1].count = 25.0;
        assert!(matches!(
            DecisionTree::new(root, &age_fields()),
            Err(StructuralError::InconsistentCounts { node: 0, .. })
        ));
    }

    #[test]
    fn rejects_output_of_wrong_kind() {
        let root = NodeSpec::leaf(1.0, 1.0, bins(&[(1.0, 1.0)]));
        assert!(matches!(
            DecisionTree::new(root, &age_fields()),
            Err(StructuralError::InvalidValue { .. })
        ));
    }
}
