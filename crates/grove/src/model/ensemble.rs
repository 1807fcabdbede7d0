//! Bagged and boosted tree ensembles.
//!
//! Members are not held by the ensemble. They are loaded from the injected
//! [`ModelSource`] one chunk at a time, evaluated into votes, merged and
//! dropped, so peak memory is bounded by the chunk size.
//!
//! Every chunk is assigned the `order` range of its members up front. Chunks
//! can therefore be evaluated in any sequence, or in parallel, and still
//! merge into the vote list a single pass over all members would produce.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Result, StructuralError, UsageError};
use crate::inference::{
    BoostingOffsets, CategoryScore, CombinationMethod, PredictionOutput, VoteCombiner,
    VoteDistributionList,
};
use crate::repr::{Fields, InputRecord, MissingStrategy, PredictedValue, TaskKind};
use crate::schema::{parse_description, EnsembleSchema};
use crate::utils::WorkerPool;

use super::config::{Decision, EnsembleConfig, PredictOptions};
use super::group::ModelGroup;
use super::operating::{decide_by_kind, decide_by_point, OperatingKind};
use super::source::{MemorySource, ModelSource};
use super::tree::{scores, TreeModel};
use super::SupervisedModel;

// =============================================================================
// EnsembleSpec
// =============================================================================

/// Everything an ensemble knows about itself without its members.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSpec {
    pub id: String,
    pub fields: Fields,
    /// Member ids in training order.
    pub members: Vec<String>,
    pub boosting: Option<BoostingOffsets>,
    /// Stored per-member field importance, in member order.
    pub member_importance: Option<Vec<Vec<(String, f64)>>>,
}

impl EnsembleSpec {
    pub fn new(id: impl Into<String>, fields: Fields, members: Vec<String>) -> Self {
        Self {
            id: id.into(),
            fields,
            members,
            boosting: None,
            member_importance: None,
        }
    }

    pub fn with_boosting(mut self, offsets: BoostingOffsets) -> Self {
        self.boosting = Some(offsets);
        self
    }

    pub fn with_member_importance(mut self, importance: Vec<Vec<(String, f64)>>) -> Self {
        self.member_importance = Some(importance);
        self
    }
}

// =============================================================================
// Ensemble
// =============================================================================

/// An ensemble of decision trees.
pub struct Ensemble<S: ModelSource = MemorySource> {
    id: String,
    fields: Arc<Fields>,
    task: TaskKind,
    class_names: Vec<String>,
    members: Vec<String>,
    boosting: Option<BoostingOffsets>,
    member_importance: Option<Vec<Vec<(String, f64)>>>,
    source: S,
    config: EnsembleConfig,
    pool: WorkerPool,
}

impl<S: ModelSource> Ensemble<S> {
    /// Validate `spec` and bind it to the source its members are loaded from.
    pub fn new(spec: EnsembleSpec, source: S, config: EnsembleConfig) -> Result<Self, StructuralError> {
        if spec.members.is_empty() {
            return Err(StructuralError::EmptyEnsemble);
        }
        let task = TaskKind::for_objective(spec.fields.objective())?;
        let mut class_names = spec.fields.objective_categories();

        let boosting = match (task, spec.boosting) {
            (_, None) => None,
            (TaskKind::Regression, Some(offset @ BoostingOffsets::Regression(_))) => Some(offset),
            (TaskKind::Regression, Some(BoostingOffsets::Classification(offsets))) => {
                return Err(StructuralError::OffsetsLenMismatch {
                    expected: 1,
                    found: offsets.len(),
                })
            }
            (TaskKind::Classification, Some(BoostingOffsets::Regression(_))) => {
                return Err(StructuralError::OffsetsLenMismatch {
                    expected: class_names.len(),
                    found: 1,
                })
            }
            (TaskKind::Classification, Some(BoostingOffsets::Classification(offsets))) => {
                if class_names.is_empty() {
                    class_names = offsets.iter().map(|(c, _)| c.clone()).collect();
                }
                Some(BoostingOffsets::Classification(align_offsets(offsets, &class_names)?))
            }
        };

        if task.is_classification() && class_names.is_empty() {
            return Err(StructuralError::InvalidValue {
                context: format!("objective field {}", spec.fields.objective_id()),
                reason: "no categories to predict".into(),
            });
        }
        if let Some(importance) = &spec.member_importance {
            if importance.len() != spec.members.len() {
                return Err(StructuralError::ImportanceLenMismatch {
                    expected: spec.members.len(),
                    found: importance.len(),
                });
            }
        }

        let pool = WorkerPool::new(config.n_threads);
        tracing::debug!(
            ensemble = %spec.id,
            n_members = spec.members.len(),
            task = task.as_str(),
            boosted = boosting.is_some(),
            max_models = ?config.max_models,
            parallelism = ?pool.parallelism(),
            "ensemble ready"
        );

        Ok(Self {
            id: spec.id,
            fields: Arc::new(spec.fields),
            task,
            class_names,
            members: spec.members,
            boosting,
            member_importance: spec.member_importance,
            source,
            config,
            pool,
        })
    }

    /// Parse an ensemble description and bind it to `source`.
    pub fn from_json(json: &str, source: S, config: EnsembleConfig) -> Result<Self, StructuralError> {
        let spec: EnsembleSpec = parse_description::<EnsembleSchema>(json)?.try_into()?;
        Self::new(spec, source, config)
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Arc<Fields> {
        &self.fields
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_boosted(&self) -> bool {
        self.boosting.is_some()
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    // =========================================================================
    // Chunked evaluation
    // =========================================================================

    /// Chunks of member ids with the order of their first member.
    fn chunks(&self) -> Vec<(usize, &[String])> {
        let size = self.config.chunk_size(self.members.len());
        self.members
            .chunks(size)
            .enumerate()
            .map(|(i, ids)| (i * size, ids))
            .collect()
    }

    fn load_chunk(&self, ids: &[String]) -> Result<Vec<Arc<TreeModel>>> {
        ids.iter()
            .map(|id| -> Result<Arc<TreeModel>> {
                let model = self.source.load(id)?;
                self.check_member(&model)?;
                Ok(model)
            })
            .collect()
    }

    fn check_member(&self, model: &TreeModel) -> Result<(), StructuralError> {
        match (&self.boosting, model.boosting()) {
            (Some(_), None) => Err(StructuralError::InvalidValue {
                context: format!("member {}", model.id()),
                reason: "member of a boosted ensemble has no boosting block".into(),
            }),
            (None, Some(_)) => Err(StructuralError::InvalidValue {
                context: format!("member {}", model.id()),
                reason: "boosted member in a non-boosted ensemble".into(),
            }),
            (Some(BoostingOffsets::Classification(_)), Some(info))
                if info.objective_class.is_none() =>
            {
                Err(StructuralError::MissingObjectiveClass {
                    member: model.id().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Load and evaluate every chunk, returning per-chunk results in chunk order.
    fn evaluate_chunks<T, F>(&self, evaluate: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(ModelGroup<'_>) -> Result<T> + Sync + Send,
    {
        let chunks = self.chunks();
        let results = self.pool.install(|parallelism| {
            parallelism.maybe_par_map(chunks, |(offset, ids)| {
                let models = self.load_chunk(ids)?;
                tracing::trace!(ensemble = %self.id, offset, n_models = models.len(), "evaluating chunk");
                evaluate(ModelGroup::new(&models, &self.class_names, offset))
            })
        });
        results.into_iter().collect()
    }

    /// Collect one vote per member for a prepared record.
    pub fn generate_votes(&self, input: &InputRecord, strategy: MissingStrategy) -> Result<VoteCombiner> {
        let chunks = self.evaluate_chunks(|group| Ok(group.generate_votes(input, strategy)))?;
        let mut votes = match &self.boosting {
            Some(offsets) => VoteCombiner::boosted(offsets.clone()),
            None => VoteCombiner::new(),
        };
        for chunk in chunks {
            votes.merge(chunk);
        }
        Ok(votes)
    }

    /// Collect one score vector per member for a prepared record.
    pub fn generate_votes_distribution(
        &self,
        input: &InputRecord,
        strategy: MissingStrategy,
        method: &CombinationMethod,
    ) -> Result<VoteDistributionList> {
        let chunks = self.evaluate_chunks(|group| {
            Ok(group.generate_votes_distribution(input, strategy, method)?)
        })?;
        let mut list = VoteDistributionList::new();
        for chunk in chunks {
            list.extend(chunk)?;
        }
        Ok(list)
    }

    /// Votes of every member for a raw input.
    pub fn votes(&self, input: &Map<String, Value>, strategy: MissingStrategy) -> Result<VoteCombiner> {
        let prepared = self.fields.prepare(input)?;
        self.generate_votes(&prepared.record, strategy)
    }

    // =========================================================================
    // Per-class scores
    // =========================================================================

    fn default_decision(&self) -> Decision {
        if self.task.is_classification() && !self.is_boosted() {
            Decision::OperatingKind(OperatingKind::Probability)
        } else {
            Decision::Combine(CombinationMethod::Plurality)
        }
    }

    fn class_scores(
        &self,
        kind: OperatingKind,
        input: &InputRecord,
        strategy: MissingStrategy,
    ) -> Result<Vec<CategoryScore>> {
        if self.is_boosted() {
            if kind != OperatingKind::Probability {
                return Err(UsageError::BoostedKind(kind.to_string()).into());
            }
            let output = self
                .generate_votes(input, strategy)?
                .combine(&CombinationMethod::Probability)?;
            return Ok(self
                .class_names
                .iter()
                .map(|c| CategoryScore::new(c.clone(), output.probability_of(c).unwrap_or(0.0)))
                .collect());
        }

        let values = match kind {
            OperatingKind::Probability => self
                .generate_votes_distribution(input, strategy, &CombinationMethod::Probability)?
                .combine(true)?,
            OperatingKind::Votes => self
                .generate_votes_distribution(input, strategy, &CombinationMethod::Plurality)?
                .combine(true)?,
            OperatingKind::Confidence => self
                .generate_votes_distribution(input, strategy, &CombinationMethod::Confidence)?
                .mean()?,
        };
        Ok(scores(&self.class_names, values))
    }

    fn scores_for_raw(
        &self,
        kind: OperatingKind,
        input: &Map<String, Value>,
        strategy: MissingStrategy,
        operation: &'static str,
    ) -> Result<Vec<CategoryScore>> {
        if !self.task.is_classification() {
            return Err(UsageError::ClassificationOnly(operation).into());
        }
        if self.is_boosted() && kind != OperatingKind::Probability {
            return Err(UsageError::NotForBoosted(operation).into());
        }
        let prepared = self.fields.prepare(input)?;
        self.class_scores(kind, &prepared.record, strategy)
    }

    /// Mean per-class confidence over members, in class-name order.
    pub fn predict_confidence(
        &self,
        input: &Map<String, Value>,
        missing_strategy: MissingStrategy,
    ) -> Result<Vec<CategoryScore>> {
        self.scores_for_raw(OperatingKind::Confidence, input, missing_strategy, "predict_confidence")
    }

    /// Share of member votes per class, in class-name order.
    pub fn predict_votes(
        &self,
        input: &Map<String, Value>,
        missing_strategy: MissingStrategy,
    ) -> Result<Vec<CategoryScore>> {
        self.scores_for_raw(OperatingKind::Votes, input, missing_strategy, "predict_votes")
    }

    /// Mean per-field importance over members, sorted descending. Ties keep
    /// field id order.
    pub fn field_importance(&self) -> Result<Vec<(String, f64)>> {
        let per_member: Vec<Vec<(String, f64)>> = match &self.member_importance {
            Some(stored) => stored.clone(),
            None => self
                .evaluate_chunks(|group| Ok(group.field_importance()))?
                .into_iter()
                .flatten()
                .collect(),
        };

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for (field, importance) in per_member.into_iter().flatten() {
            *totals.entry(field).or_insert(0.0) += importance;
        }
        let n = self.members.len() as f64;
        let mut importance: Vec<(String, f64)> =
            totals.into_iter().map(|(field, total)| (field, total / n)).collect();
        importance.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(importance)
    }
}

impl Ensemble<MemorySource> {
    /// Ensemble over models already in memory, in the given member order.
    pub fn from_models(
        id: impl Into<String>,
        fields: Fields,
        models: Vec<TreeModel>,
        boosting: Option<BoostingOffsets>,
        config: EnsembleConfig,
    ) -> Result<Self, StructuralError> {
        let members = models.iter().map(|m| m.id().to_string()).collect();
        let mut spec = EnsembleSpec::new(id, fields, members);
        spec.boosting = boosting;
        Self::new(spec, models.into_iter().collect(), config)
    }
}

impl<S: ModelSource> fmt::Debug for Ensemble<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ensemble")
            .field("id", &self.id)
            .field("task", &self.task)
            .field("n_members", &self.members.len())
            .field("boosting", &self.boosting)
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<S: ModelSource> SupervisedModel for Ensemble<S> {
    fn task(&self) -> TaskKind {
        self.task
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn predict(&self, input: &Map<String, Value>, options: &PredictOptions) -> Result<PredictionOutput> {
        let prepared = self.fields.prepare(input)?;
        let classification = self.task.is_classification();
        let boosted = self.is_boosted();
        if options.median {
            if classification {
                return Err(UsageError::RegressionOnly("median").into());
            }
            if boosted {
                return Err(UsageError::NotForBoosted("median").into());
            }
        }
        let strategy = options.missing_strategy;

        let decision = match options.decision.clone() {
            None => self.default_decision(),
            Some(Decision::OperatingKind(kind)) if !classification => {
                if boosted && kind != OperatingKind::Probability {
                    return Err(UsageError::BoostedKind(kind.to_string()).into());
                }
                Decision::Combine(match kind {
                    OperatingKind::Confidence => CombinationMethod::Confidence,
                    _ => CombinationMethod::Plurality,
                })
            }
            Some(decision) => decision,
        };

        let (mut output, unused) = match decision {
            Decision::OperatingPoint(point) => {
                if !classification {
                    return Err(UsageError::OperatingPointOnRegression.into());
                }
                if boosted && point.kind != OperatingKind::Probability {
                    return Err(UsageError::BoostedKind(point.kind.to_string()).into());
                }
                point.validate(&self.class_names)?;
                let scores = self.class_scores(point.kind, &prepared.record, strategy)?;
                let output = decide_by_point(&point, scores)
                    .ok_or(UsageError::ClassificationOnly("operating points"))?;
                (output, Vec::new())
            }
            Decision::OperatingKind(kind) => {
                if boosted && kind != OperatingKind::Probability {
                    return Err(UsageError::BoostedKind(kind.to_string()).into());
                }
                let scores = self.class_scores(kind, &prepared.record, strategy)?;
                let output = decide_by_kind(kind, scores)
                    .ok_or(UsageError::ClassificationOnly("operating kinds"))?;
                (output, Vec::new())
            }
            Decision::Combine(method) => {
                if boosted {
                    match method {
                        CombinationMethod::Confidence => {
                            return Err(UsageError::NotForBoosted("confidence combination").into())
                        }
                        CombinationMethod::Threshold { .. } => {
                            return Err(UsageError::NotForBoosted("threshold combination").into())
                        }
                        CombinationMethod::Plurality | CombinationMethod::Probability => {}
                    }
                }
                let mut votes = self.generate_votes(&prepared.record, strategy)?;
                if options.median {
                    for prediction in votes.predictions_mut() {
                        if let Some(median) = prediction.median {
                            prediction.value = PredictedValue::Number(median);
                        }
                    }
                }
                let output = votes.combine(&method)?;
                (output, common_unused_fields(&votes))
            }
        };

        if !options.full {
            return Ok(output.into_brief());
        }
        let mut unused = unused;
        unused.extend(prepared.dropped);
        output.unused_fields = Some(unused);
        Ok(output)
    }

    fn predict_probability(
        &self,
        input: &Map<String, Value>,
        missing_strategy: MissingStrategy,
    ) -> Result<Vec<CategoryScore>> {
        self.scores_for_raw(OperatingKind::Probability, input, missing_strategy, "predict_probability")
    }
}

/// Reorder per-class offsets to `class_names`.
fn align_offsets(
    offsets: Vec<(String, f64)>,
    class_names: &[String],
) -> Result<Vec<(String, f64)>, StructuralError> {
    if offsets.len() != class_names.len() {
        return Err(StructuralError::OffsetsLenMismatch {
            expected: class_names.len(),
            found: offsets.len(),
        });
    }
    class_names
        .iter()
        .map(|name| {
            offsets
                .iter()
                .find(|(class, _)| class == name)
                .cloned()
                .ok_or_else(|| StructuralError::InvalidValue {
                    context: "boosting offsets".into(),
                    reason: format!("no offset for class {name:?}"),
                })
        })
        .collect()
}

/// Fields unused by every member.
fn common_unused_fields(votes: &VoteCombiner) -> Vec<String> {
    let mut predictions = votes.predictions().iter();
    let Some(first) = predictions.next() else {
        return Vec::new();
    };
    let mut common: BTreeSet<&str> = first.unused_fields.iter().map(String::as_str).collect();
    for prediction in predictions {
        common.retain(|field| prediction.unused_fields.iter().any(|u| u == field));
    }
    common.into_iter().map(str::to_string).collect()
}
