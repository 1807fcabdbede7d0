//! grove: offline decision tree and tree ensemble prediction.
//!
//! Evaluates previously trained trees and ensembles of trees against a record of
//! input values and reports a prediction together with a statistically defined
//! confidence or probability.
//!
//! # Key Types
//!
//! - [`TreeModel`] - A single decision tree with its fields and objective metadata
//! - [`Ensemble`] - Bagged or boosted collection of trees, evaluated chunk by chunk
//! - [`VoteCombiner`] - Combination of per-tree [`Prediction`]s
//! - [`PredictOptions`] - Missing-value strategy and decision rule for one call
//!
//! # Loading Models
//!
//! Model descriptions are JSON documents; see the [`schema`] module.
//!
//! ```ignore
//! use grove::{SupervisedModel, TreeModel, PredictOptions};
//!
//! let model = TreeModel::from_json(&json)?;
//! let input = serde_json::json!({"age": 25});
//! let output = model.predict(input.as_object().unwrap(), &PredictOptions::default())?;
//! ```

pub mod error;
pub mod inference;
pub mod model;
pub mod repr;
pub mod schema;
pub mod testing;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use error::{Error, Result, SourceError, StructuralError, UsageError};

pub use repr::{
    CastError, DecisionTree, Distribution, Field, FieldSummary, FieldValue, Fields, InputRecord,
    MissingStrategy, NodeSpec, Operator, Optype, PredictedValue, Predicate, TaskKind,
};

pub use inference::{
    BoostingOffsets, BoostingVote, CategoryScore, CombinationMethod, Prediction,
    PredictionOutput, PrecheckError, VoteCombiner, VoteDistributionList,
};

pub use model::{
    ConfigError, Decision, Ensemble, EnsembleConfig, EnsembleSpec, JsonSource, MemorySource,
    ModelGroup, ModelSource, OperatingKind, OperatingPoint, PredictOptions, SupervisedModel,
    TreeModel,
};

pub use utils::{Parallelism, WorkerPool};
