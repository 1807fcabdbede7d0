//! Combination of per-tree predictions.
//!
//! A [`VoteCombiner`] collects the [`Prediction`]s of an ensemble's members and
//! reduces them to one [`PredictionOutput`] with a [`CombinationMethod`], or
//! additively when the ensemble is boosted.
//!
//! Classification ties always go to the category whose first vote has the
//! lowest `order`; votes sharing an order keep their insertion order.

use std::fmt;
use std::str::FromStr;

use crate::repr::{Distribution, PredictedValue};
use crate::utils::{softmax_inplace, DEFAULT_Z};

use super::output::{CategoryScore, PredictionOutput};
use super::prediction::Prediction;

/// Upper end of the range errors are rescaled into by the confidence method.
const ERROR_SCALE: f64 = 10.0;

// =============================================================================
// Methods and errors
// =============================================================================

/// How member predictions are combined.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinationMethod {
    /// Unweighted tally (classification) or plain mean (regression).
    Plurality,
    /// Tally weighted by confidence, or error-weighted mean for regression.
    Confidence,
    /// Sum of member class distributions, normalized.
    Probability,
    /// Force `category` when at least `threshold` members vote for it.
    Threshold { threshold: usize, category: String },
}

impl CombinationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plurality => "plurality",
            Self::Confidence => "confidence",
            Self::Probability => "probability",
            Self::Threshold { .. } => "threshold",
        }
    }
}

impl fmt::Display for CombinationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CombinationMethod {
    type Err = String;

    /// Parses the parameterless methods.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plurality" => Ok(Self::Plurality),
            "confidence" => Ok(Self::Confidence),
            "probability" => Ok(Self::Probability),
            other => Err(format!("unknown combination method {other:?}")),
        }
    }
}

/// A vote set cannot be combined with the requested method.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PrecheckError {
    #[error("no votes to combine")]
    Empty,

    #[error("vote {order} has no {attribute}, required by {method} combination")]
    MissingAttribute {
        order: usize,
        attribute: &'static str,
        method: &'static str,
    },

    #[error("threshold {threshold} must be between 1 and the number of votes ({n_votes})")]
    InvalidThreshold { threshold: usize, n_votes: usize },

    #[error("votes mix categorical and numeric predictions")]
    MixedVotes,

    #[error("vote vectors have different lengths ({expected} and {found})")]
    RaggedVotes { expected: usize, found: usize },

    #[error("vote {order} scores class {class:?}, which has no boosting offset")]
    UnknownBoostingClass { order: usize, class: String },
}

/// Initial offsets of a boosted ensemble.
#[derive(Debug, Clone, PartialEq)]
pub enum BoostingOffsets {
    Regression(f64),
    /// One offset per objective category, in objective category order.
    Classification(Vec<(String, f64)>),
}

// =============================================================================
// VoteCombiner
// =============================================================================

/// Ordered collection of member predictions for one input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteCombiner {
    predictions: Vec<Prediction>,
    boosting: Option<BoostingOffsets>,
    next_order: usize,
}

/// Accumulated weight of one category.
struct Tally {
    category: String,
    weight: f64,
    first_order: usize,
}

impl VoteCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combiner for a boosted ensemble; the method passed to
    /// [`combine`](Self::combine) is then ignored.
    pub fn boosted(offsets: BoostingOffsets) -> Self {
        Self {
            boosting: Some(offsets),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_boosted(&self) -> bool {
        self.boosting.is_some()
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    pub fn predictions_mut(&mut self) -> &mut [Prediction] {
        &mut self.predictions
    }

    /// Add a prediction with the next free order.
    pub fn append(&mut self, mut prediction: Prediction) {
        prediction.order = self.next_order;
        self.next_order += 1;
        self.predictions.push(prediction);
    }

    /// Add a prediction keeping its pre-assigned order.
    pub fn push_ordered(&mut self, prediction: Prediction) {
        self.next_order = self.next_order.max(prediction.order + 1);
        self.predictions.push(prediction);
    }

    /// Append every prediction in turn.
    pub fn extend(&mut self, predictions: impl IntoIterator<Item = Prediction>) {
        for prediction in predictions {
            self.append(prediction);
        }
    }

    /// Absorb another combiner's votes, keeping their orders.
    ///
    /// Votes are kept sorted by order, so merging chunks in any sequence gives
    /// the same vote list as long as their order ranges are disjoint.
    pub fn merge(&mut self, other: VoteCombiner) {
        for prediction in other.predictions {
            self.push_ordered(prediction);
        }
        self.predictions.sort_by_key(|p| p.order);
    }

    /// Combine the collected votes.
    ///
    /// Boosted votes ignore `method`. A boosted regression output carries only
    /// the additive prediction: the members' leaf outputs are gradient steps,
    /// so there is no training distribution or error to combine.
    pub fn combine(&self, method: &CombinationMethod) -> Result<PredictionOutput, PrecheckError> {
        if self.predictions.is_empty() {
            return Err(PrecheckError::Empty);
        }
        if let Some(offsets) = &self.boosting {
            return self.combine_boosted(offsets);
        }

        let regression = self.is_regression()?;
        self.precheck(method, regression)?;
        tracing::trace!(n_votes = self.predictions.len(), %method, regression, "combining votes");

        if regression {
            Ok(self.combine_regression(method))
        } else {
            Ok(self.combine_categorical(method))
        }
    }

    // =========================================================================
    // Prechecks
    // =========================================================================

    fn is_regression(&self) -> Result<bool, PrecheckError> {
        let numeric = self
            .predictions
            .iter()
            .filter(|p| matches!(p.value, PredictedValue::Number(_)))
            .count();
        match numeric {
            0 => Ok(false),
            n if n == self.predictions.len() => Ok(true),
            _ => Err(PrecheckError::MixedVotes),
        }
    }

    fn precheck(&self, method: &CombinationMethod, regression: bool) -> Result<(), PrecheckError> {
        let missing = |p: &Prediction, attribute| PrecheckError::MissingAttribute {
            order: p.order,
            attribute,
            method: method.name(),
        };
        match method {
            CombinationMethod::Confidence => {
                if let Some(p) = self.predictions.iter().find(|p| p.confidence.is_none()) {
                    return Err(missing(p, "confidence"));
                }
            }
            CombinationMethod::Probability if !regression => {
                let lacks_distribution = |p: &&Prediction| {
                    p.distribution.as_ref().map_or(true, |d| d.total() < 1.0)
                        || p.count.map_or(true, |c| c < 1.0)
                };
                if let Some(p) = self.predictions.iter().find(lacks_distribution) {
                    return Err(missing(p, "distribution"));
                }
            }
            CombinationMethod::Threshold { threshold, .. } if !regression => {
                let n_votes = self.predictions.len();
                if *threshold < 1 || *threshold > n_votes {
                    return Err(PrecheckError::InvalidThreshold {
                        threshold: *threshold,
                        n_votes,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    // =========================================================================
    // Regression
    // =========================================================================

    fn combine_regression(&self, method: &CombinationMethod) -> PredictionOutput {
        let weights: Vec<f64> = match method {
            CombinationMethod::Confidence => error_weights(&self.predictions),
            _ => vec![1.0; self.predictions.len()],
        };
        let total_weight: f64 = weights.iter().sum();

        let weighted_mean = |value: &dyn Fn(&Prediction) -> f64| {
            self.predictions
                .iter()
                .zip(&weights)
                .map(|(p, w)| value(p) * w)
                .sum::<f64>()
                / total_weight
        };
        let value = weighted_mean(&|p: &Prediction| p.value.as_number().unwrap_or(0.0));
        let confidence = weighted_mean(&|p: &Prediction| p.confidence.unwrap_or(0.0));

        let mut output = PredictionOutput::new(value);
        output.confidence = Some(confidence);
        output.count = self.summed_count();
        output.distribution = self.merged_distribution();
        if self.predictions.iter().all(|p| p.median.is_some()) {
            output.median = Some(weighted_mean(&|p: &Prediction| p.median.unwrap_or(0.0)));
        }
        output
    }

    // =========================================================================
    // Classification
    // =========================================================================

    fn combine_categorical(&self, method: &CombinationMethod) -> PredictionOutput {
        match method {
            CombinationMethod::Plurality => self.tally_output(self.predictions.iter(), |_| 1.0),
            CombinationMethod::Confidence => {
                self.tally_output(self.predictions.iter(), |p| p.confidence.unwrap_or(0.0))
            }
            CombinationMethod::Probability => self.probability_output(),
            CombinationMethod::Threshold {
                threshold,
                category,
            } => {
                let is_target = |p: &&Prediction| p.value.as_category() == Some(category.as_str());
                let n_target = self.predictions.iter().filter(is_target).count();
                if n_target >= *threshold {
                    let mut output = self.tally_output(self.predictions.iter().filter(is_target), |_| 1.0);
                    output.prediction = PredictedValue::Category(category.clone());
                    output
                } else {
                    let rest = self.predictions.iter().filter(|p| !is_target(p));
                    self.tally_output(rest, |_| 1.0)
                }
            }
        }
    }

    /// Tally `votes` with `weight`, pick the winner and derive its confidence.
    fn tally_output<'a>(
        &self,
        votes: impl Iterator<Item = &'a Prediction> + Clone,
        weight: impl Fn(&Prediction) -> f64,
    ) -> PredictionOutput {
        let tallies = rank(tally(
            votes
                .clone()
                .filter_map(|p| Some((p.value.as_category()?, weight(p), p.order))),
        ));
        // Precheck guarantees at least one categorical vote.
        let winner = tallies.first().map(|t| t.category.clone()).unwrap_or_default();

        let winning_votes: Vec<&Prediction> = votes
            .filter(|p| p.value.as_category() == Some(winner.as_str()))
            .collect();
        let confidence = match weighted_confidence(&winning_votes, &weight) {
            Some(confidence) => confidence,
            None => {
                let synthesized = Distribution::Categories(
                    tallies.iter().map(|t| (t.category.clone(), t.weight)).collect(),
                );
                self.merged_distribution()
                    .unwrap_or(synthesized)
                    .wilson(&winner, None, DEFAULT_Z)
            }
        };

        let mut output = PredictionOutput::new(winner);
        output.confidence = Some(confidence);
        output.votes = Some(tallies.into_iter().map(|t| CategoryScore::new(t.category, t.weight)).collect());
        output.count = self.summed_count();
        output.distribution = self.merged_distribution();
        output
    }

    /// Expand each member distribution into per-category shares and sum them.
    fn probability_output(&self) -> PredictionOutput {
        let shares = self.predictions.iter().flat_map(|p| {
            let categories = match &p.distribution {
                Some(Distribution::Categories(c)) => c.as_slice(),
                _ => &[][..],
            };
            let total: f64 = categories.iter().map(|(_, n)| n).sum();
            categories
                .iter()
                .map(move |(category, count)| (category.as_str(), count / total, p.order))
        });
        let tallies = rank(tally(shares));
        let total: f64 = tallies.iter().map(|t| t.weight).sum();
        let probabilities: Vec<CategoryScore> = tallies
            .iter()
            .map(|t| CategoryScore::new(t.category.clone(), t.weight / total))
            .collect();

        let winner = probabilities
            .first()
            .map(|s| s.category.clone())
            .unwrap_or_default();
        let winning_votes: Vec<&Prediction> = self
            .predictions
            .iter()
            .filter(|p| p.value.as_category() == Some(winner.as_str()))
            .collect();
        let merged = self.merged_distribution();
        let confidence = weighted_confidence(&winning_votes, &|p: &Prediction| {
            p.probability.unwrap_or(1.0)
        })
        .unwrap_or_else(|| {
            merged
                .as_ref()
                .map_or(0.0, |d| d.wilson(&winner, None, DEFAULT_Z))
        });

        let mut output = PredictionOutput::new(winner);
        output.confidence = Some(confidence);
        output.probability = probabilities.first().map(|s| s.score);
        output.probabilities = Some(probabilities);
        output.count = self.summed_count();
        output.distribution = merged;
        output
    }

    // =========================================================================
    // Boosting
    // =========================================================================

    fn combine_boosted(&self, offsets: &BoostingOffsets) -> Result<PredictionOutput, PrecheckError> {
        let missing = |p: &Prediction, attribute| PrecheckError::MissingAttribute {
            order: p.order,
            attribute,
            method: "boosted",
        };
        for p in &self.predictions {
            if p.boosting.is_none() {
                return Err(missing(p, "boosting weight"));
            }
            if p.value.as_number().is_none() {
                return Err(PrecheckError::MixedVotes);
            }
        }

        match offsets {
            BoostingOffsets::Regression(offset) => {
                let sum: f64 = self
                    .predictions
                    .iter()
                    .filter_map(|p| Some(p.boosting.as_ref()?.weight * p.value.as_number()?))
                    .sum();
                Ok(PredictionOutput::new(offset + sum))
            }
            BoostingOffsets::Classification(offsets) => {
                let mut scores: Vec<f64> = offsets.iter().map(|(_, offset)| *offset).collect();
                for p in &self.predictions {
                    let Some(vote) = &p.boosting else {
                        return Err(missing(p, "boosting weight"));
                    };
                    let Some(class) = &vote.class else {
                        return Err(missing(p, "boosting class"));
                    };
                    let index = offsets.iter().position(|(c, _)| c == class).ok_or_else(|| {
                        PrecheckError::UnknownBoostingClass {
                            order: p.order,
                            class: class.clone(),
                        }
                    })?;
                    scores[index] += vote.weight * p.value.as_number().unwrap_or(0.0);
                }
                softmax_inplace(&mut scores);

                let mut probabilities: Vec<CategoryScore> = offsets
                    .iter()
                    .zip(scores)
                    .map(|((class, _), score)| CategoryScore::new(class.clone(), score))
                    .collect();
                // Stable: ties keep objective category order.
                probabilities.sort_by(|a, b| b.score.total_cmp(&a.score));

                let Some(top) = probabilities.first() else {
                    return Err(PrecheckError::Empty);
                };
                let mut output = PredictionOutput::new(top.category.clone());
                output.probability = Some(top.score);
                output.probabilities = Some(probabilities);
                Ok(output)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn summed_count(&self) -> Option<f64> {
        self.predictions.iter().map(|p| p.count).sum()
    }

    /// Sum of member distributions, when every member carries one.
    fn merged_distribution(&self) -> Option<Distribution> {
        let mut distributions = self.predictions.iter().map(|p| p.distribution.as_ref());
        let mut merged = distributions.next()??.clone();
        for distribution in distributions {
            merged.merge(distribution?);
        }
        Some(merged)
    }
}

/// Accumulate `(category, weight, order)` votes in first-seen order.
fn tally<'a>(votes: impl Iterator<Item = (&'a str, f64, usize)>) -> Vec<Tally> {
    let mut tallies: Vec<Tally> = Vec::new();
    for (category, weight, order) in votes {
        match tallies.iter_mut().find(|t| t.category == category) {
            Some(t) => {
                t.weight += weight;
                t.first_order = t.first_order.min(order);
            }
            None => tallies.push(Tally {
                category: category.to_string(),
                weight,
                first_order: order,
            }),
        }
    }
    tallies
}

/// Highest weight first; ties by lowest first order, then first seen.
fn rank(mut tallies: Vec<Tally>) -> Vec<Tally> {
    tallies.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.first_order.cmp(&b.first_order))
    });
    tallies
}

/// Weighted mean confidence of the votes for the winner.
///
/// `None` when a vote carries no confidence or the weights sum to zero.
fn weighted_confidence(votes: &[&Prediction], weight: &dyn Fn(&Prediction) -> f64) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for p in votes {
        let w = weight(p);
        weighted += p.confidence? * w;
        total += w;
    }
    (total > 0.0).then(|| weighted / total)
}

/// Per-vote weights `exp(-scaled_error)`, errors min-max scaled into
/// `[0, ERROR_SCALE]`. Equal weights when every error matches.
fn error_weights(predictions: &[Prediction]) -> Vec<f64> {
    let errors: Vec<f64> = predictions.iter().map(|p| p.confidence.unwrap_or(0.0)).collect();
    let min = errors.iter().copied().fold(f64::INFINITY, f64::min);
    let max = errors.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![1.0; errors.len()];
    }
    errors
        .iter()
        .map(|e| (-(e - min) / range * ERROR_SCALE).exp())
        .collect()
}
