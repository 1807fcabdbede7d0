//! High-level model types.
//!
//! - [`TreeModel`]: a single decision tree
//! - [`Ensemble`]: bagged or boosted trees, loaded chunk by chunk from a
//!   [`ModelSource`]
//!
//! Both implement [`SupervisedModel`].

pub mod config;
pub mod ensemble;
pub mod group;
pub mod operating;
pub mod source;
pub mod tree;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::inference::{CategoryScore, PredictionOutput};
use crate::repr::{MissingStrategy, TaskKind};

pub use config::{ConfigError, Decision, EnsembleConfig, PredictOptions};
pub use ensemble::{Ensemble, EnsembleSpec};
pub use group::ModelGroup;
pub use operating::{OperatingKind, OperatingPoint};
pub use source::{JsonSource, MemorySource, ModelSource};
pub use tree::{BoostingInfo, TreeModel};

/// Prediction capability shared by every supervised model family.
pub trait SupervisedModel: Send + Sync {
    fn task(&self) -> TaskKind;

    /// Objective classes, in the order per-class scores are reported.
    /// Empty for regression.
    fn class_names(&self) -> &[String];

    /// Predict for a raw input keyed by field id or name.
    fn predict(&self, input: &Map<String, Value>, options: &PredictOptions) -> Result<PredictionOutput>;

    /// Probability of every class, in [`class_names`](Self::class_names) order.
    fn predict_probability(
        &self,
        input: &Map<String, Value>,
        missing_strategy: MissingStrategy,
    ) -> Result<Vec<CategoryScore>>;
}
