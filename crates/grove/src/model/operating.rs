//! Operating points and operating kinds.
//!
//! Both replace vote combination by a decision over per-class scores: the
//! class probabilities, confidences or vote shares of the model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UsageError;
use crate::inference::{CategoryScore, PredictionOutput};

/// Score a decision is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingKind {
    Probability,
    Confidence,
    Votes,
}

impl OperatingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Probability => "probability",
            Self::Confidence => "confidence",
            Self::Votes => "votes",
        }
    }
}

impl fmt::Display for OperatingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingKind {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "probability" => Ok(Self::Probability),
            "confidence" => Ok(Self::Confidence),
            "votes" => Ok(Self::Votes),
            _ => Err(UsageError::UnknownKind(s.to_string())),
        }
    }
}

/// Prefer `positive_class` whenever its score exceeds `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub kind: OperatingKind,
    pub threshold: f64,
    pub positive_class: String,
}

impl OperatingPoint {
    pub fn new(kind: OperatingKind, threshold: f64, positive_class: impl Into<String>) -> Self {
        Self {
            kind,
            threshold,
            positive_class: positive_class.into(),
        }
    }

    /// Check the threshold range and that the positive class exists.
    pub fn validate(&self, class_names: &[String]) -> Result<(), UsageError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(UsageError::ThresholdOutOfRange(self.threshold));
        }
        if !class_names.contains(&self.positive_class) {
            return Err(UsageError::UnknownPositiveClass {
                class: self.positive_class.clone(),
                classes: class_names.to_vec(),
            });
        }
        Ok(())
    }

    /// Pick a class from scores given in class order.
    ///
    /// The positive class wins if its score is above the threshold. Otherwise
    /// the best-scoring class wins, unless that is the positive class, in
    /// which case the runner-up does.
    pub fn select(&self, scores: Vec<CategoryScore>) -> Option<CategoryScore> {
        if let Some(positive) = scores
            .iter()
            .find(|s| s.category == self.positive_class && s.score > self.threshold)
        {
            return Some(positive.clone());
        }

        let mut ranked = rank(scores).into_iter();
        let top = ranked.next()?;
        if top.category == self.positive_class {
            ranked.next().or(Some(top))
        } else {
            Some(top)
        }
    }
}

/// Sort scores descending. Ties keep the incoming class order.
pub fn rank(mut scores: Vec<CategoryScore>) -> Vec<CategoryScore> {
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    scores
}

/// Output for a class chosen from scores of `kind`.
pub(crate) fn scored_output(
    chosen: CategoryScore,
    kind: OperatingKind,
    scores: Vec<CategoryScore>,
) -> PredictionOutput {
    let mut output = PredictionOutput::new(chosen.category);
    match kind {
        OperatingKind::Probability => {
            output.probability = Some(chosen.score);
            output.probabilities = Some(rank(scores));
        }
        OperatingKind::Confidence => output.confidence = Some(chosen.score),
        OperatingKind::Votes => {
            output.probability = Some(chosen.score);
            output.votes = Some(rank(scores));
        }
    }
    output
}

/// Apply an operating kind: the best-scoring class wins.
pub(crate) fn decide_by_kind(kind: OperatingKind, scores: Vec<CategoryScore>) -> Option<PredictionOutput> {
    let top = rank(scores.clone()).into_iter().next()?;
    Some(scored_output(top, kind, scores))
}

/// Apply an operating point to scores given in class order.
pub(crate) fn decide_by_point(
    point: &OperatingPoint,
    scores: Vec<CategoryScore>,
) -> Option<PredictionOutput> {
    let chosen = point.select(scores.clone())?;
    Some(scored_output(chosen, point.kind, scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::PredictedValue;

    fn scores(items: &[(&str, f64)]) -> Vec<CategoryScore> {
        items.iter().map(|(c, s)| CategoryScore::new(*c, *s)).collect()
    }

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_kind_case_insensitive() {
        assert_eq!("Probability".parse::<OperatingKind>(), Ok(OperatingKind::Probability));
        assert_eq!("VOTES".parse::<OperatingKind>(), Ok(OperatingKind::Votes));
        assert_eq!(
            "margin".parse::<OperatingKind>(),
            Err(UsageError::UnknownKind("margin".into()))
        );
    }

    #[test]
    fn validate_point() {
        let names = classes(&["no", "yes"]);
        assert!(OperatingPoint::new(OperatingKind::Probability, 0.4, "yes").validate(&names).is_ok());
        assert_eq!(
            OperatingPoint::new(OperatingKind::Probability, 1.5, "yes").validate(&names),
            Err(UsageError::ThresholdOutOfRange(1.5))
        );
        assert!(matches!(
            OperatingPoint::new(OperatingKind::Probability, 0.5, "maybe").validate(&names),
            Err(UsageError::UnknownPositiveClass { .. })
        ));
    }

    #[test]
    fn positive_class_above_threshold_wins() {
        let point = OperatingPoint::new(OperatingKind::Probability, 0.3, "yes");
        let chosen = point.select(scores(&[("no", 0.65), ("yes", 0.35)])).unwrap();
        assert_eq!(chosen.category, "yes");
    }

    #[test]
    fn below_threshold_returns_top_candidate() {
        let point = OperatingPoint::new(OperatingKind::Probability, 0.4, "yes");
        let chosen = point.select(scores(&[("no", 0.65), ("yes", 0.35)])).unwrap();
        assert_eq!(chosen.category, "no");
    }

    #[test]
    fn below_threshold_skips_positive_top_candidate() {
        let point = OperatingPoint::new(OperatingKind::Probability, 0.6, "a");
        let chosen = point
            .select(scores(&[("a", 0.5), ("b", 0.2), ("c", 0.3)]))
            .unwrap();
        assert_eq!(chosen.category, "c");
    }

    #[test]
    fn ties_follow_class_order() {
        let ranked = rank(scores(&[("b", 0.4), ("a", 0.4), ("c", 0.2)]));
        assert_eq!(ranked[0].category, "b");
        assert_eq!(ranked[1].category, "a");
    }

    #[test]
    fn kind_output_reports_score() {
        let output = decide_by_kind(
            OperatingKind::Confidence,
            scores(&[("no", 0.2), ("yes", 0.5)]),
        )
        .unwrap();
        assert_eq!(output.prediction, PredictedValue::from("yes"));
        assert_eq!(output.confidence, Some(0.5));
        assert_eq!(output.probability, None);

        let output = decide_by_point(
            &OperatingPoint::new(OperatingKind::Probability, 0.4, "yes"),
            scores(&[("no", 0.65), ("yes", 0.35)]),
        )
        .unwrap();
        assert_eq!(output.prediction, PredictedValue::from("no"));
        assert_eq!(output.probability, Some(0.65));
        assert_eq!(output.probability_of("yes"), Some(0.35));
    }
}
