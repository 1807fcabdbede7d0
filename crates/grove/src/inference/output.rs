//! Combined prediction output.

use serde::Serialize;

use crate::repr::{Distribution, PredictedValue};

/// Score of one objective category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
}

impl CategoryScore {
    pub fn new(category: impl Into<String>, score: f64) -> Self {
        Self {
            category: category.into(),
            score,
        }
    }
}

/// Result of a prediction call.
///
/// Optional members are left out of the serialized form when absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionOutput {
    pub prediction: PredictedValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    /// Normalized scores of all categories, highest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<CategoryScore>>,
    /// Weighted vote tally, highest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<Vec<CategoryScore>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unused_fields: Option<Vec<String>>,
}

impl PredictionOutput {
    pub fn new(prediction: impl Into<PredictedValue>) -> Self {
        Self {
            prediction: prediction.into(),
            confidence: None,
            probability: None,
            probabilities: None,
            votes: None,
            distribution: None,
            count: None,
            median: None,
            unused_fields: None,
        }
    }

    /// Drop the members only reported for full output.
    pub fn into_brief(mut self) -> Self {
        self.distribution = None;
        self.count = None;
        self.median = None;
        self.unused_fields = None;
        self
    }

    /// Score of `category` in `probabilities`, if reported.
    pub fn probability_of(&self, category: &str) -> Option<f64> {
        self.probabilities
            .as_ref()?
            .iter()
            .find(|s| s.category == category)
            .map(|s| s.score)
    }
}
