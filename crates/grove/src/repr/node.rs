//! Tree node types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::distribution::Distribution;
use super::field::format_number;
use super::predicate::Predicate;
use super::NodeId;

/// Output of a node or of a combined prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictedValue {
    Number(f64),
    Category(String),
}

impl PredictedValue {
    #[inline]
    pub fn as_category(&self) -> Option<&str> {
        match self {
            Self::Category(c) => Some(c),
            Self::Number(_) => None,
        }
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Category(_) => None,
        }
    }
}

impl From<&str> for PredictedValue {
    fn from(value: &str) -> Self {
        Self::Category(value.to_string())
    }
}

impl From<String> for PredictedValue {
    fn from(value: String) -> Self {
        Self::Category(value)
    }
}

impl From<f64> for PredictedValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl fmt::Display for PredictedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => f.write_str(&format_number(*v)),
            Self::Category(c) => f.write_str(c),
        }
    }
}

/// Recursive node description used to build a [`super::DecisionTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    /// Split condition leading into this node. `None` only at the root.
    pub predicate: Option<Predicate>,
    pub output: PredictedValue,
    pub count: f64,
    /// Stored confidence (classification) or expected error (regression).
    pub confidence: Option<f64>,
    pub distribution: Distribution,
    pub median: Option<f64>,
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn leaf(output: impl Into<PredictedValue>, count: f64, distribution: Distribution) -> Self {
        Self {
            predicate: None,
            output: output.into(),
            count,
            confidence: None,
            distribution,
            median: None,
            children: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_children(mut self, children: Vec<NodeSpec>) -> Self {
        self.children = children;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_median(mut self, median: f64) -> Self {
        self.median = Some(median);
        self
    }
}

/// Arena node. Children occupy `first_child..first_child + n_children`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub(crate) predicate: Option<Predicate>,
    pub(crate) output: PredictedValue,
    pub(crate) count: f64,
    pub(crate) confidence: f64,
    /// Never empty for a node with instances: a missing distribution is
    /// replaced by the node's own output and count at load.
    pub(crate) distribution: Distribution,
    pub(crate) median: Option<f64>,
    pub(crate) first_child: NodeId,
    pub(crate) n_children: u32,
}

impl Node {
    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        self.n_children == 0
    }

    #[inline]
    pub(crate) fn children(&self) -> std::ops::Range<usize> {
        let start = self.first_child as usize;
        start..start + self.n_children as usize
    }
}
