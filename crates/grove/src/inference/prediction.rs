//! Per-tree prediction record.

use crate::repr::{Distribution, PredictedValue};

/// Boosting contribution of one member.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostingVote {
    pub weight: f64,
    /// Objective class the member scores (classification only).
    pub class: Option<String>,
}

/// Output of a single tree for one input.
///
/// `order` is the member's position in its ensemble and is the tie-break key
/// of every classification combination.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub value: PredictedValue,
    pub confidence: Option<f64>,
    pub probability: Option<f64>,
    pub distribution: Option<Distribution>,
    pub count: Option<f64>,
    pub median: Option<f64>,
    pub order: usize,
    pub boosting: Option<BoostingVote>,
    /// Input fields no predicate on the evaluated path looked at.
    pub unused_fields: Vec<String>,
}

impl Prediction {
    pub fn new(value: impl Into<PredictedValue>) -> Self {
        Self {
            value: value.into(),
            confidence: None,
            probability: None,
            distribution: None,
            count: None,
            median: None,
            order: 0,
            boosting: None,
            unused_fields: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    /// Attach a distribution; the count defaults to its total.
    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        if self.count.is_none() {
            self.count = Some(distribution.total());
        }
        self.distribution = Some(distribution);
        self
    }

    pub fn with_count(mut self, count: f64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_median(mut self, median: f64) -> Self {
        self.median = Some(median);
        self
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn with_boosting(mut self, weight: f64, class: Option<String>) -> Self {
        self.boosting = Some(BoostingVote { weight, class });
        self
    }

    pub fn with_unused_fields(mut self, unused: Vec<String>) -> Self {
        self.unused_fields = unused;
        self
    }
}
