//! Field definitions, input casting and the filtered input record.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StructuralError;

/// Field optype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optype {
    Numeric,
    Categorical,
    Text,
    Datetime,
    Items,
}

impl Optype {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Categorical => "categorical",
            Self::Text => "text",
            Self::Datetime => "datetime",
            Self::Items => "items",
        }
    }
}

impl fmt::Display for Optype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary statistics recorded for a field at training time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdev: Option<f64>,
    /// Categories with their instance counts, in training order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<(String, f64)>,
    #[serde(default)]
    pub missing_count: u64,
}

/// A model field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: String,
    pub name: String,
    pub optype: Optype,
    pub summary: FieldSummary,
    /// Affixes stripped from string inputs of numeric fields.
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl Field {
    pub fn new(id: impl Into<String>, name: impl Into<String>, optype: Optype) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            optype,
            summary: FieldSummary::default(),
            prefix: None,
            suffix: None,
        }
    }

    pub fn with_summary(mut self, summary: FieldSummary) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_affixes(mut self, prefix: Option<String>, suffix: Option<String>) -> Self {
        self.prefix = prefix;
        self.suffix = suffix;
        self
    }

    /// Cast a raw JSON value to this field's type.
    ///
    /// `null` casts to `None` (missing).
    pub fn cast(&self, raw: &Value) -> Result<Option<FieldValue>, CastError> {
        match (self.optype, raw) {
            (_, Value::Null) => Ok(None),
            (Optype::Numeric, Value::Number(n)) => n
                .as_f64()
                .map(|v| Some(FieldValue::Number(v)))
                .ok_or_else(|| self.not_numeric(raw)),
            (Optype::Numeric, Value::String(s)) => {
                let mut text = s.trim();
                if let Some(prefix) = self.prefix.as_deref() {
                    text = text.strip_prefix(prefix).unwrap_or(text);
                }
                if let Some(suffix) = self.suffix.as_deref() {
                    text = text.strip_suffix(suffix).unwrap_or(text);
                }
                text.trim()
                    .parse::<f64>()
                    .map(|v| Some(FieldValue::Number(v)))
                    .map_err(|_| self.not_numeric(raw))
            }
            (Optype::Numeric, _) => Err(self.not_numeric(raw)),
            (_, Value::String(s)) => Ok(Some(FieldValue::Text(s.clone()))),
            (_, Value::Number(n)) => Ok(n.as_f64().map(|v| FieldValue::Text(format_number(v)))),
            (_, Value::Bool(b)) => Ok(Some(FieldValue::Text(b.to_string()))),
            (_, Value::Array(_) | Value::Object(_)) => Err(CastError::Unsupported {
                field: self.id.clone(),
                optype: self.optype,
                value: raw.to_string(),
            }),
        }
    }

    fn not_numeric(&self, raw: &Value) -> CastError {
        CastError::NotNumeric {
            field: self.id.clone(),
            value: raw.to_string(),
        }
    }
}

/// Render a number the way it reads as a category (`3.0` becomes `"3"`).
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Input value that could not be cast to its field's type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CastError {
    #[error("field {field}: cannot cast {value} to a number")]
    NotNumeric { field: String, value: String },
    #[error("field {field}: {optype} fields do not accept {value}")]
    Unsupported {
        field: String,
        optype: Optype,
        value: String,
    },
}

/// A cast input value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// String form used for lexical comparison and set membership.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Number(v) => Cow::Owned(format_number(*v)),
            Self::Text(s) => Cow::Borrowed(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Input filtered to known predictor fields and cast to their types.
///
/// Keyed by field id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputRecord {
    values: BTreeMap<String, FieldValue>,
}

impl InputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field_id: impl Into<String>, value: FieldValue) {
        self.values.insert(field_id.into(), value);
    }

    pub fn with(mut self, field_id: impl Into<String>, value: FieldValue) -> Self {
        self.insert(field_id, value);
        self
    }

    #[inline]
    pub fn get(&self, field_id: &str) -> Option<&FieldValue> {
        self.values.get(field_id)
    }

    #[inline]
    pub fn contains(&self, field_id: &str) -> bool {
        self.values.contains_key(field_id)
    }

    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Input after [`Fields::prepare`]: the cast record plus the raw keys that
/// named no predictor field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedInput {
    pub record: InputRecord,
    pub dropped: Vec<String>,
}

/// The fields of a model, with the objective field singled out.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields {
    by_id: BTreeMap<String, Field>,
    by_name: HashMap<String, String>,
    objective_id: String,
}

impl Fields {
    /// Index `fields` and check that the objective field is among them.
    pub fn new(
        fields: impl IntoIterator<Item = Field>,
        objective_id: impl Into<String>,
    ) -> Result<Self, StructuralError> {
        let objective_id = objective_id.into();
        let by_id: BTreeMap<String, Field> =
            fields.into_iter().map(|f| (f.id.clone(), f)).collect();
        if !by_id.contains_key(&objective_id) {
            return Err(StructuralError::UnknownObjective(objective_id));
        }
        let by_name = by_id
            .values()
            .map(|f| (f.name.clone(), f.id.clone()))
            .collect();
        Ok(Self {
            by_id,
            by_name,
            objective_id,
        })
    }

    #[inline]
    pub fn get(&self, field_id: &str) -> Option<&Field> {
        self.by_id.get(field_id)
    }

    #[inline]
    pub fn contains(&self, field_id: &str) -> bool {
        self.by_id.contains_key(field_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn objective_id(&self) -> &str {
        &self.objective_id
    }

    pub fn objective(&self) -> &Field {
        // Presence checked in `new`.
        &self.by_id[&self.objective_id]
    }

    /// Resolve an input key given as a field id or a field name.
    pub fn resolve(&self, key: &str) -> Option<&Field> {
        self.by_id
            .get(key)
            .or_else(|| self.by_name.get(key).and_then(|id| self.by_id.get(id)))
    }

    /// Objective categories in training order.
    pub fn objective_categories(&self) -> Vec<String> {
        self.objective()
            .summary
            .categories
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Filter a raw input to predictor fields and cast each value.
    ///
    /// Keys naming no field, or naming the objective, are dropped and reported;
    /// `null` values are dropped silently.
    pub fn prepare(&self, raw: &Map<String, Value>) -> Result<PreparedInput, CastError> {
        let mut prepared = PreparedInput::default();
        for (key, value) in raw {
            match self.resolve(key) {
                Some(field) if field.id != self.objective_id => {
                    if let Some(cast) = field.cast(value)? {
                        prepared.record.insert(field.id.clone(), cast);
                    }
                }
                _ => prepared.dropped.push(key.clone()),
            }
        }
        Ok(prepared)
    }

    /// Ids of the predictor fields.
    pub fn predictor_ids(&self) -> BTreeSet<&str> {
        self.by_id
            .keys()
            .map(String::as_str)
            .filter(|id| *id != self.objective_id)
            .collect()
    }
}
