//! Training distributions stored on tree nodes.

use serde::Serialize;

use crate::utils::wilson_score;

/// Instance distribution of a node or of a combined prediction.
///
/// Categorical objectives count instances per category; numeric objectives
/// keep `(value, count)` bins sorted by value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Distribution {
    Categories(Vec<(String, f64)>),
    Bins(Vec<(f64, f64)>),
}

impl Distribution {
    pub fn empty_categories() -> Self {
        Self::Categories(Vec::new())
    }

    pub fn empty_bins() -> Self {
        Self::Bins(Vec::new())
    }

    /// Empty distribution of the same kind.
    pub fn empty_like(&self) -> Self {
        match self {
            Self::Categories(_) => Self::empty_categories(),
            Self::Bins(_) => Self::empty_bins(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Categories(c) => c.is_empty(),
            Self::Bins(b) => b.is_empty(),
        }
    }

    /// Total instance count.
    pub fn total(&self) -> f64 {
        match self {
            Self::Categories(c) => c.iter().map(|(_, n)| n).sum(),
            Self::Bins(b) => b.iter().map(|(_, n)| n).sum(),
        }
    }

    /// Add `other`'s counts into `self`.
    ///
    /// Categories keep first-seen order; bins stay sorted by value. Merging
    /// distributions of different kinds leaves `self` unchanged.
    pub fn merge(&mut self, other: &Distribution) {
        match (self, other) {
            (Self::Categories(mine), Self::Categories(theirs)) => {
                for (category, count) in theirs {
                    match mine.iter_mut().find(|(c, _)| c == category) {
                        Some((_, n)) => *n += count,
                        None => mine.push((category.clone(), *count)),
                    }
                }
            }
            (Self::Bins(mine), Self::Bins(theirs)) => {
                for &(value, count) in theirs {
                    match mine.iter_mut().find(|(v, _)| *v == value) {
                        Some((_, n)) => *n += count,
                        None => mine.push((value, count)),
                    }
                }
                mine.sort_by(|a, b| a.0.total_cmp(&b.0));
            }
            _ => {}
        }
    }

    /// Count recorded for `category` (0 for bins or unknown categories).
    pub fn count_of(&self, category: &str) -> f64 {
        match self {
            Self::Categories(c) => c
                .iter()
                .find(|(name, _)| name == category)
                .map_or(0.0, |(_, n)| *n),
            Self::Bins(_) => 0.0,
        }
    }

    /// Wilson score lower bound of `category`'s share.
    ///
    /// `n` defaults to the distribution total.
    pub fn wilson(&self, category: &str, n: Option<f64>, z: f64) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        let share = self.count_of(category) / total;
        wilson_score(share, n.unwrap_or(total), z)
    }

    /// Category with the highest count; ties go to the lexically smallest.
    pub fn majority(&self) -> Option<(&str, f64)> {
        let Self::Categories(c) = self else {
            return None;
        };
        c.iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(name, n)| (name.as_str(), *n))
    }

    /// Per-category share in the order of `class_names`.
    pub fn probabilities(&self, class_names: &[String]) -> Vec<f64> {
        let total = self.total();
        class_names
            .iter()
            .map(|name| {
                if total > 0.0 {
                    self.count_of(name) / total
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Mean of the bins.
    pub fn mean(&self) -> Option<f64> {
        let Self::Bins(bins) = self else {
            return None;
        };
        let total: f64 = bins.iter().map(|(_, n)| n).sum();
        if total <= 0.0 {
            return None;
        }
        Some(bins.iter().map(|(v, n)| v * n).sum::<f64>() / total)
    }

    /// Unbiased sample variance of the bins around `mean`.
    pub fn variance(&self, mean: f64) -> Option<f64> {
        let Self::Bins(bins) = self else {
            return None;
        };
        let total: f64 = bins.iter().map(|(_, n)| n).sum();
        if total <= 1.0 {
            return None;
        }
        let squares: f64 = bins.iter().map(|(v, n)| (v - mean).powi(2) * n).sum();
        Some(squares / (total - 1.0))
    }

    /// Median of the bins: the value where the cumulative count first reaches
    /// half of the total.
    pub fn median(&self) -> Option<f64> {
        let Self::Bins(bins) = self else {
            return None;
        };
        let total: f64 = bins.iter().map(|(_, n)| n).sum();
        if total <= 0.0 {
            return None;
        }
        let half = total / 2.0;
        let mut cumulative = 0.0;
        for &(value, count) in bins {
            cumulative += count;
            if cumulative >= half {
                return Some(value);
            }
        }
        bins.last().map(|(v, _)| *v)
    }

    /// Impurity: Gini index for categories, variance for bins.
    pub fn impurity(&self) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Self::Categories(c) => {
                1.0 - c.iter().map(|(_, n)| (n / total).powi(2)).sum::<f64>()
            }
            Self::Bins(b) => {
                let mean = b.iter().map(|(v, n)| v * n).sum::<f64>() / total;
                b.iter().map(|(v, n)| (v - mean).powi(2) * n).sum::<f64>() / total
            }
        }
    }
}
