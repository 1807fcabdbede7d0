//! Call-scoped prediction machinery.
//!
//! Everything here is created fresh for one prediction call and discarded
//! after combination.
//!
//! # Module Structure
//!
//! - [`prediction`]: Per-tree [`Prediction`] records
//! - [`combiner`]: [`VoteCombiner`], combination of N predictions by method
//! - [`distribution`]: [`VoteDistributionList`], compact per-member score vectors
//! - [`output`]: The combined [`PredictionOutput`]

pub mod combiner;
pub mod distribution;
pub mod output;
pub mod prediction;

pub use combiner::{BoostingOffsets, CombinationMethod, PrecheckError, VoteCombiner};
pub use distribution::VoteDistributionList;
pub use output::{CategoryScore, PredictionOutput};
pub use prediction::{BoostingVote, Prediction};
