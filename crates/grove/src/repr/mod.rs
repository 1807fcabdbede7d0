//! Canonical, immutable model representations.
//!
//! Everything here is built once from a model description and never mutated
//! afterwards, so it can be shared freely across threads.

/// Node identifier: an index into the tree's node arena.
pub type NodeId = u32;

pub mod distribution;
pub mod field;
pub mod node;
pub mod predicate;
pub mod tree;

use serde::{Deserialize, Serialize};

use crate::error::StructuralError;

pub use distribution::Distribution;
pub use field::{
    format_number, CastError, Field, FieldSummary, FieldValue, Fields, InputRecord, Optype,
    PreparedInput,
};
pub use node::{NodeSpec, PredictedValue};
pub use predicate::{Literal, Operator, Predicate};
pub use tree::DecisionTree;

/// Kind of task, fixed by the objective field's optype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Classification,
    Regression,
}

impl TaskKind {
    /// Task implied by the objective field.
    pub fn for_objective(field: &Field) -> Result<Self, StructuralError> {
        match field.optype {
            Optype::Categorical => Ok(Self::Classification),
            Optype::Numeric => Ok(Self::Regression),
            other => Err(StructuralError::UnsupportedObjective {
                field: field.id.clone(),
                optype: other.to_string(),
            }),
        }
    }

    #[inline]
    pub fn is_classification(self) -> bool {
        self == Self::Classification
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
        }
    }
}

/// How a prediction proceeds when a split needs a field the input lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStrategy {
    /// Stop at the node whose split needs the missing field.
    #[default]
    LastPrediction,
    /// Descend into every child and merge their distributions by count.
    Proportional,
}
