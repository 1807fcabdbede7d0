//! Ensemble configuration and per-call prediction options.
//!
//! Both use the `bon` builder pattern; [`EnsembleConfig`] validates at build
//! time.
//!
//! # Example
//!
//! ```
//! use grove::model::{EnsembleConfig, PredictOptions, Decision};
//! use grove::{CombinationMethod, MissingStrategy};
//!
//! let config = EnsembleConfig::builder().max_models(50).n_threads(4).build().unwrap();
//!
//! let options = PredictOptions::builder()
//!     .decision(Decision::Combine(CombinationMethod::Confidence))
//!     .missing_strategy(MissingStrategy::Proportional)
//!     .full(true)
//!     .build();
//! ```

use bon::Builder;

use crate::inference::CombinationMethod;
use crate::repr::MissingStrategy;

use super::operating::{OperatingKind, OperatingPoint};

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Chunks must hold at least one member.
    #[error("max_models must be at least 1")]
    InvalidMaxModels,
}

// =============================================================================
// EnsembleConfig
// =============================================================================

/// Resource settings of an [`super::Ensemble`].
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct EnsembleConfig {
    /// Members loaded and evaluated together. `None` evaluates all members as
    /// one chunk.
    pub max_models: Option<usize>,

    /// Threads used to evaluate chunks. 0 = auto, 1 = sequential. Default: 1.
    #[builder(default = 1)]
    pub n_threads: usize,
}

/// Custom finishing function that validates the config.
impl<S: ensemble_config_builder::IsComplete> EnsembleConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxModels`] when `max_models == 0`.
    pub fn build(self) -> Result<EnsembleConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl EnsembleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_models == Some(0) {
            return Err(ConfigError::InvalidMaxModels);
        }
        Ok(())
    }

    /// Members per chunk for an ensemble of `n_members`.
    pub(crate) fn chunk_size(&self, n_members: usize) -> usize {
        self.max_models.unwrap_or(n_members).max(1)
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            max_models: None,
            n_threads: 1,
        }
    }
}

// =============================================================================
// PredictOptions
// =============================================================================

/// Decision rule producing the final prediction. The variants are mutually
/// exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Combine member votes with a method.
    Combine(CombinationMethod),
    /// Prefer a positive class when its score clears a threshold.
    OperatingPoint(OperatingPoint),
    /// Pick the class with the best score of a kind.
    OperatingKind(OperatingKind),
}

/// Options of one prediction call.
#[derive(Debug, Clone, Default, PartialEq, Builder)]
pub struct PredictOptions {
    /// `None` selects the model's default decision.
    pub decision: Option<Decision>,

    #[builder(default)]
    pub missing_strategy: MissingStrategy,

    /// Use member medians instead of means (regression only).
    #[builder(default)]
    pub median: bool,

    /// Report distribution, count and unused fields.
    #[builder(default)]
    pub full: bool,
}

impl PredictOptions {
    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }
}
