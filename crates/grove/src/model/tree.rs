//! Single decision tree model.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Result, StructuralError, UsageError};
use crate::inference::{CategoryScore, Prediction, PredictionOutput};
use crate::repr::{
    DecisionTree, Distribution, Fields, InputRecord, MissingStrategy, NodeSpec, PredictedValue,
    PreparedInput, TaskKind,
};
use crate::schema::{parse_description, ModelSchema};
use crate::utils::DEFAULT_Z;

use super::config::{Decision, PredictOptions};
use super::operating::{decide_by_kind, decide_by_point, OperatingKind};
use super::SupervisedModel;

/// Boosting block of a tree that is one round of a boosted ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostingInfo {
    pub weight: f64,
    /// Objective class scored by this tree (classification only).
    pub objective_class: Option<String>,
}

/// A decision tree with its fields and objective metadata.
#[derive(Debug, Clone)]
pub struct TreeModel {
    id: String,
    fields: Arc<Fields>,
    tree: DecisionTree,
    class_names: Vec<String>,
    boosting: Option<BoostingInfo>,
    importance: Option<Vec<(String, f64)>>,
}

impl TreeModel {
    pub fn new(
        id: impl Into<String>,
        fields: impl Into<Arc<Fields>>,
        root: NodeSpec,
    ) -> Result<Self, StructuralError> {
        let fields = fields.into();
        let tree = DecisionTree::new(root, &fields)?;
        Ok(Self::assemble(id.into(), fields, tree, None))
    }

    /// A tree that is one round of a boosted ensemble. Its outputs are numeric
    /// whatever the objective's optype.
    pub fn boosted(
        id: impl Into<String>,
        fields: impl Into<Arc<Fields>>,
        root: NodeSpec,
        boosting: BoostingInfo,
    ) -> Result<Self, StructuralError> {
        let fields = fields.into();
        let objective_task = TaskKind::for_objective(fields.objective())?;
        let id = id.into();
        if objective_task.is_classification() && boosting.objective_class.is_none() {
            return Err(StructuralError::MissingObjectiveClass { member: id });
        }
        let tree = DecisionTree::with_task(root, &fields, TaskKind::Regression)?;
        Ok(Self::assemble(id, fields, tree, Some(boosting)))
    }

    fn assemble(
        id: String,
        fields: Arc<Fields>,
        tree: DecisionTree,
        boosting: Option<BoostingInfo>,
    ) -> Self {
        let mut class_names = fields.objective_categories();
        if class_names.is_empty() {
            if let Distribution::Categories(categories) = tree.root_distribution() {
                let sorted: BTreeSet<&String> = categories.iter().map(|(c, _)| c).collect();
                class_names = sorted.into_iter().cloned().collect();
            }
        }
        Self {
            id,
            fields,
            tree,
            class_names,
            boosting,
            importance: None,
        }
    }

    /// Attach stored per-field importance.
    pub fn with_importance(mut self, importance: Vec<(String, f64)>) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Parse and validate a model description.
    pub fn from_json(json: &str) -> Result<Self, StructuralError> {
        parse_description::<ModelSchema>(json)?.try_into()
    }

    pub fn from_value(value: Value) -> Result<Self, StructuralError> {
        serde_json::from_value::<ModelSchema>(value)?.try_into()
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Arc<Fields> {
        &self.fields
    }

    pub fn tree(&self) -> &DecisionTree {
        &self.tree
    }

    pub fn boosting(&self) -> Option<&BoostingInfo> {
        self.boosting.as_ref()
    }

    /// Filter and cast a raw input to this model's predictor fields.
    pub fn prepare(&self, input: &Map<String, Value>) -> Result<PreparedInput> {
        Ok(self.fields.prepare(input)?)
    }

    /// Evaluate the tree on a prepared record, tagging boosted votes.
    pub fn predict_record(&self, input: &InputRecord, strategy: MissingStrategy) -> Prediction {
        let prediction = self.tree.predict(input, strategy);
        match &self.boosting {
            Some(b) => prediction.with_boosting(b.weight, b.objective_class.clone()),
            None => prediction,
        }
    }

    /// Per-field importance, stored or computed from the tree structure.
    pub fn field_importance(&self) -> Vec<(String, f64)> {
        match &self.importance {
            Some(importance) => importance.clone(),
            None => self.tree.importance(),
        }
    }

    /// Scores of `kind` in class-name order.
    fn scores(
        &self,
        kind: OperatingKind,
        input: &InputRecord,
        strategy: MissingStrategy,
    ) -> Result<Vec<CategoryScore>> {
        let prediction = self.predict_record(input, strategy);
        let values = match kind {
            OperatingKind::Probability => probability_vector(&prediction, &self.class_names),
            OperatingKind::Confidence => confidence_vector(&prediction, &self.class_names),
            OperatingKind::Votes => {
                return Err(UsageError::UnsupportedKind {
                    kind: kind.to_string(),
                    model: "single trees",
                }
                .into())
            }
        };
        Ok(scores(&self.class_names, values))
    }

    fn plain_output(&self, prediction: Prediction, median: bool) -> PredictionOutput {
        let value = match (median, prediction.median) {
            (true, Some(m)) => PredictedValue::Number(m),
            _ => prediction.value,
        };
        let mut output = PredictionOutput::new(value);
        output.confidence = prediction.confidence;
        output.probability = prediction.probability;
        output.distribution = prediction.distribution;
        output.count = prediction.count;
        output.median = prediction.median;
        output
    }
}

impl SupervisedModel for TreeModel {
    fn task(&self) -> TaskKind {
        self.tree.task()
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn predict(&self, input: &Map<String, Value>, options: &PredictOptions) -> Result<PredictionOutput> {
        let prepared = self.prepare(input)?;
        let classification = self.task().is_classification();
        if options.median && classification {
            return Err(UsageError::RegressionOnly("median").into());
        }
        let strategy = options.missing_strategy;

        let (mut output, unused) = match &options.decision {
            Some(Decision::OperatingPoint(point)) => {
                if !classification {
                    return Err(UsageError::OperatingPointOnRegression.into());
                }
                point.validate(&self.class_names)?;
                let scores = self.scores(point.kind, &prepared.record, strategy)?;
                let output = decide_by_point(point, scores)
                    .ok_or(UsageError::ClassificationOnly("operating points"))?;
                (output, Vec::new())
            }
            Some(Decision::OperatingKind(kind)) if classification => {
                let scores = self.scores(*kind, &prepared.record, strategy)?;
                let output = decide_by_kind(*kind, scores)
                    .ok_or(UsageError::ClassificationOnly("operating kinds"))?;
                (output, Vec::new())
            }
            _ => {
                let mut prediction = self.predict_record(&prepared.record, strategy);
                let unused = std::mem::take(&mut prediction.unused_fields);
                (self.plain_output(prediction, options.median), unused)
            }
        };

        if !options.full {
            return Ok(output.into_brief());
        }
        let mut unused: Vec<String> = unused;
        unused.extend(prepared.dropped);
        output.unused_fields = Some(unused);
        Ok(output)
    }

    fn predict_probability(
        &self,
        input: &Map<String, Value>,
        missing_strategy: MissingStrategy,
    ) -> Result<Vec<CategoryScore>> {
        if !self.task().is_classification() {
            return Err(UsageError::ClassificationOnly("predict_probability").into());
        }
        let prepared = self.prepare(input)?;
        self.scores(OperatingKind::Probability, &prepared.record, missing_strategy)
    }
}

// =============================================================================
// Per-class score vectors
// =============================================================================

pub(crate) fn scores(class_names: &[String], values: Vec<f64>) -> Vec<CategoryScore> {
    class_names
        .iter()
        .zip(values)
        .map(|(name, score)| CategoryScore::new(name.clone(), score))
        .collect()
}

/// Share of each class in the prediction's distribution; one-hot without one.
pub(crate) fn probability_vector(prediction: &Prediction, class_names: &[String]) -> Vec<f64> {
    match &prediction.distribution {
        Some(distribution @ Distribution::Categories(_)) => distribution.probabilities(class_names),
        _ => vote_vector(prediction, class_names),
    }
}

/// Wilson score of each class over the prediction's distribution.
pub(crate) fn confidence_vector(prediction: &Prediction, class_names: &[String]) -> Vec<f64> {
    match &prediction.distribution {
        Some(distribution @ Distribution::Categories(_)) => class_names
            .iter()
            .map(|name| distribution.wilson(name, None, DEFAULT_Z))
            .collect(),
        _ => {
            let confidence = prediction.confidence.unwrap_or(0.0);
            vote_vector(prediction, class_names)
                .into_iter()
                .map(|v| v * confidence)
                .collect()
        }
    }
}

/// One-hot vector of the predicted class.
pub(crate) fn vote_vector(prediction: &Prediction, class_names: &[String]) -> Vec<f64> {
    let predicted = prediction.value.as_category();
    class_names
        .iter()
        .map(|name| if predicted == Some(name.as_str()) { 1.0 } else { 0.0 })
        .collect()
}
