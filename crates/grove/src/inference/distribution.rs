//! Compact per-member score vectors.

use super::combiner::PrecheckError;

/// One score vector per member, all in the same class order.
///
/// Used when only the aggregate distribution is needed, so that wide
/// ensembles do not keep a full [`super::Prediction`] per member.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteDistributionList {
    vectors: Vec<Vec<f64>>,
}

impl VoteDistributionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Vector length, once a vector has been added.
    pub fn width(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    pub fn vectors(&self) -> &[Vec<f64>] {
        &self.vectors
    }

    pub fn append(&mut self, vector: Vec<f64>) -> Result<(), PrecheckError> {
        if let Some(expected) = self.width() {
            if expected != vector.len() {
                return Err(PrecheckError::RaggedVotes {
                    expected,
                    found: vector.len(),
                });
            }
        }
        self.vectors.push(vector);
        Ok(())
    }

    /// Absorb another list, keeping its vectors after the current ones.
    pub fn extend(&mut self, other: VoteDistributionList) -> Result<(), PrecheckError> {
        for vector in other.vectors {
            self.append(vector)?;
        }
        Ok(())
    }

    /// Position-wise sum, optionally normalized to sum to 1.
    ///
    /// A zero sum is returned as is.
    pub fn combine(&self, normalize: bool) -> Result<Vec<f64>, PrecheckError> {
        let mut combined = self.sum()?;
        if normalize {
            let total: f64 = combined.iter().sum();
            if total > 0.0 {
                combined.iter_mut().for_each(|v| *v /= total);
            }
        }
        Ok(combined)
    }

    /// Position-wise mean.
    pub fn mean(&self) -> Result<Vec<f64>, PrecheckError> {
        let n = self.vectors.len() as f64;
        let mut combined = self.sum()?;
        combined.iter_mut().for_each(|v| *v /= n);
        Ok(combined)
    }

    fn sum(&self) -> Result<Vec<f64>, PrecheckError> {
        let width = self.width().ok_or(PrecheckError::Empty)?;
        let mut combined = vec![0.0; width];
        for vector in &self.vectors {
            for (total, value) in combined.iter_mut().zip(vector) {
                *total += value;
            }
        }
        Ok(combined)
    }
}
