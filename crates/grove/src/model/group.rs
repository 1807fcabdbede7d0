//! Evaluation of one chunk of ensemble members.

use std::sync::Arc;

use crate::inference::{CombinationMethod, PrecheckError, VoteCombiner, VoteDistributionList};
use crate::repr::{InputRecord, MissingStrategy};

use super::tree::{confidence_vector, probability_vector, vote_vector, TreeModel};

/// A bounded set of members evaluated together.
///
/// Votes are numbered from `order_offset`, the position of the first member
/// in the whole ensemble.
#[derive(Debug, Clone, Copy)]
pub struct ModelGroup<'a> {
    models: &'a [Arc<TreeModel>],
    class_names: &'a [String],
    order_offset: usize,
}

impl<'a> ModelGroup<'a> {
    pub fn new(models: &'a [Arc<TreeModel>], class_names: &'a [String], order_offset: usize) -> Self {
        Self {
            models,
            class_names,
            order_offset,
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// One prediction per member, in member order.
    pub fn generate_votes(&self, input: &InputRecord, strategy: MissingStrategy) -> VoteCombiner {
        let mut votes = VoteCombiner::new();
        for (index, model) in self.models.iter().enumerate() {
            let prediction = model
                .predict_record(input, strategy)
                .with_order(self.order_offset + index);
            votes.push_ordered(prediction);
        }
        votes
    }

    /// One score vector per member, in class-name order.
    ///
    /// Plurality and threshold give one-hot votes, confidence the per-class
    /// Wilson score and probability the class shares of the member's leaf.
    pub fn generate_votes_distribution(
        &self,
        input: &InputRecord,
        strategy: MissingStrategy,
        method: &CombinationMethod,
    ) -> Result<VoteDistributionList, PrecheckError> {
        let mut list = VoteDistributionList::new();
        for model in self.models {
            let prediction = model.predict_record(input, strategy);
            let vector = match method {
                CombinationMethod::Confidence => confidence_vector(&prediction, self.class_names),
                CombinationMethod::Probability => probability_vector(&prediction, self.class_names),
                CombinationMethod::Plurality | CombinationMethod::Threshold { .. } => {
                    vote_vector(&prediction, self.class_names)
                }
            };
            list.append(vector)?;
        }
        Ok(list)
    }

    /// Field importance of each member, in member order.
    pub fn field_importance(&self) -> Vec<Vec<(String, f64)>> {
        self.models.iter().map(|m| m.field_importance()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{FieldValue, PredictedValue};
    use crate::testing::{age_model, age_model_with_threshold};
    use approx::assert_abs_diff_eq;

    fn class_names() -> Vec<String> {
        vec!["young".into(), "old".into()]
    }

    #[test]
    fn votes_are_numbered_from_offset() {
        let models = vec![
            Arc::new(age_model("a")),
            Arc::new(age_model_with_threshold("b", 50.0)),
        ];
        let names = class_names();
        let group = ModelGroup::new(&models, &names, 10);
        let input = InputRecord::new().with("000000", FieldValue::Number(40.0));

        let votes = group.generate_votes(&input, MissingStrategy::LastPrediction);
        let values: Vec<(usize, PredictedValue)> = votes
            .predictions()
            .iter()
            .map(|p| (p.order, p.value.clone()))
            .collect();
        assert_eq!(
            values,
            vec![(10, PredictedValue::from("old")), (11, PredictedValue::from("young"))]
        );
    }

    #[test]
    fn vote_vectors_follow_class_names() {
        let models = vec![
            Arc::new(age_model("a")),
            Arc::new(age_model_with_threshold("b", 50.0)),
        ];
        let names = class_names();
        let group = ModelGroup::new(&models, &names, 0);
        let input = InputRecord::new().with("000000", FieldValue::Number(40.0));

        let votes = group
            .generate_votes_distribution(&input, MissingStrategy::LastPrediction, &CombinationMethod::Plurality)
            .unwrap();
        assert_eq!(votes.vectors(), &[vec![0.0, 1.0], vec![1.0, 0.0]]);

        let probabilities = group
            .generate_votes_distribution(&InputRecord::new(), MissingStrategy::Proportional, &CombinationMethod::Probability)
            .unwrap();
        let combined = probabilities.combine(true).unwrap();
        assert_abs_diff_eq!(combined[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(combined[1], 0.2, epsilon = 1e-12);
    }
}
