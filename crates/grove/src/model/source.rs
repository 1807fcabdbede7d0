//! Model sources: where an ensemble loads its members from.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SourceError;

use super::tree::TreeModel;

/// Provider of ensemble members, injected at ensemble construction.
///
/// Implementations may fetch, parse or cache however they like; the ensemble
/// only asks for members by id, one chunk at a time.
pub trait ModelSource: Send + Sync {
    fn load(&self, id: &str) -> Result<Arc<TreeModel>, SourceError>;
}

impl<S: ModelSource + ?Sized> ModelSource for Arc<S> {
    fn load(&self, id: &str) -> Result<Arc<TreeModel>, SourceError> {
        (**self).load(id)
    }
}

/// Already-built models held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    models: HashMap<String, Arc<TreeModel>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: TreeModel) {
        self.models.insert(model.id().to_string(), Arc::new(model));
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl FromIterator<TreeModel> for MemorySource {
    fn from_iter<I: IntoIterator<Item = TreeModel>>(iter: I) -> Self {
        let mut source = Self::new();
        for model in iter {
            source.insert(model);
        }
        source
    }
}

impl ModelSource for MemorySource {
    fn load(&self, id: &str) -> Result<Arc<TreeModel>, SourceError> {
        self.models
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

/// Model descriptions kept as JSON text and parsed on every load, so only
/// the chunk being evaluated is held in parsed form.
#[derive(Debug, Clone, Default)]
pub struct JsonSource {
    documents: HashMap<String, String>,
}

impl JsonSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, json: impl Into<String>) {
        self.documents.insert(id.into(), json.into());
    }

    pub fn with(mut self, id: impl Into<String>, json: impl Into<String>) -> Self {
        self.insert(id, json);
        self
    }
}

impl ModelSource for JsonSource {
    fn load(&self, id: &str) -> Result<Arc<TreeModel>, SourceError> {
        let json = self
            .documents
            .get(id)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        tracing::trace!(model = id, bytes = json.len(), "parsing member");
        TreeModel::from_json(json)
            .map(Arc::new)
            .map_err(|source| SourceError::Invalid {
                id: id.to_string(),
                source: Box::new(source),
            })
    }
}
