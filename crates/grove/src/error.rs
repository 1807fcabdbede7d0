//! Crate-level error types.
//!
//! Each concern has its own error enum; [`Error`] wraps them so that public
//! entry points can use `?` across concerns.

use crate::inference::PrecheckError;
use crate::model::ConfigError;
use crate::repr::{CastError, NodeId};

/// Malformed tree or ensemble description, detected at construction.
#[derive(Debug, thiserror::Error)]
pub enum StructuralError {
    #[error("invalid model description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("objective field {0} is not defined")]
    UnknownObjective(String),

    #[error("objective field {field} has optype {optype}, expected numeric or categorical")]
    UnsupportedObjective { field: String, optype: String },

    #[error("node {node} references unknown field {field}")]
    UnknownField { node: NodeId, field: String },

    #[error("node {node} has no predicate")]
    MissingPredicate { node: NodeId },

    #[error("root node must not carry a predicate")]
    RootPredicate,

    #[error("unknown predicate operator {0:?}")]
    UnknownOperator(String),

    #[error("children of node {node} test different fields ({first} and {other})")]
    MixedSplitFields {
        node: NodeId,
        first: String,
        other: String,
    },

    #[error("children of node {node} hold {children} instances, node holds {count}")]
    InconsistentCounts { node: NodeId, count: f64, children: f64 },

    #[error("invalid value at {context}: {reason}")]
    InvalidValue { context: String, reason: String },

    #[error("ensemble has no members")]
    EmptyEnsemble,

    #[error("boosting offsets cover {found} classes, objective has {expected}")]
    OffsetsLenMismatch { expected: usize, found: usize },

    #[error("boosted member {member} has no objective class")]
    MissingObjectiveClass { member: String },

    #[error("member importance covers {found} members, ensemble has {expected}")]
    ImportanceLenMismatch { expected: usize, found: usize },
}

/// Request incompatible with the model it is issued against.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UsageError {
    #[error("operating points can only be used with classification models")]
    OperatingPointOnRegression,

    #[error("only the probability kind is available for boosted ensembles, got {0}")]
    BoostedKind(String),

    #[error("operating kind {kind} is not available for {model}")]
    UnsupportedKind { kind: String, model: &'static str },

    #[error("unknown operating kind {0:?}, expected probability, confidence or votes")]
    UnknownKind(String),

    #[error("operating point threshold must be in [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("positive class {class:?} is not one of the objective classes {classes:?}")]
    UnknownPositiveClass { class: String, classes: Vec<String> },

    #[error("{0} is only available for classification models")]
    ClassificationOnly(&'static str),

    #[error("{0} is only available for regression models")]
    RegressionOnly(&'static str),

    #[error("{0} is not available for boosted ensembles")]
    NotForBoosted(&'static str),
}

/// Failure of the injected model source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("model {0} is not available from the source")]
    NotFound(String),

    #[error("model {id} could not be loaded: {source}")]
    Invalid {
        id: String,
        #[source]
        source: Box<StructuralError>,
    },
}

/// Any error raised by a public entry point.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Precheck(#[from] PrecheckError),
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
