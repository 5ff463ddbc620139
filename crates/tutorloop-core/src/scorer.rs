use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConfigError;
use crate::model::{Critique, StudentProfile};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("invalid critique set: {0}")]
    InvalidInput(String),
}

/// Quality of one explanation version, derived from its critique set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Weighted mean clarity, in [0, 1]
    pub value: f64,
    /// Clarity per profile id
    pub per_profile: BTreeMap<String, f64>,
    /// Weighted population variance of the per-profile clarities
    pub spread: f64,
}

impl QualityScore {
    /// Whether the score is usable by the convergence detector
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && (0.0..=1.0).contains(&self.value)
    }
}

/// Maps a critique set to a [`QualityScore`].
///
/// Profiles without an explicit weight count with weight 1.0.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    weights: HashMap<String, f64>,
}

impl QualityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(
        weights: impl IntoIterator<Item = (String, f64)>,
    ) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for (profile, weight) in weights {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(ConfigError::InvalidWeight { profile, weight });
            }
            map.insert(profile, weight);
        }
        Ok(Self { weights: map })
    }

    /// Weight critiques by each profile's share of the class
    pub fn for_profiles(profiles: &[StudentProfile]) -> Result<Self, ConfigError> {
        Self::with_weights(profiles.iter().map(|p| (p.id.clone(), p.weight)))
    }

    pub fn weight(&self, profile_id: &str) -> f64 {
        self.weights.get(profile_id).copied().unwrap_or(1.0)
    }

    pub fn score(&self, critiques: &[Critique]) -> Result<QualityScore, ScoreError> {
        if critiques.is_empty() {
            return Err(ScoreError::InvalidInput("critique set is empty".into()));
        }

        // Profile-id order makes the arithmetic independent of input order
        let mut per_profile = BTreeMap::new();
        for critique in critiques {
            if !critique.clarity.is_finite() || !(0.0..=1.0).contains(&critique.clarity) {
                return Err(ScoreError::InvalidInput(format!(
                    "clarity {} from profile '{}' is outside [0, 1]",
                    critique.clarity, critique.profile_id
                )));
            }
            if per_profile
                .insert(critique.profile_id.clone(), critique.clarity)
                .is_some()
            {
                return Err(ScoreError::InvalidInput(format!(
                    "more than one critique from profile '{}'",
                    critique.profile_id
                )));
            }
        }

        let total_weight: f64 = per_profile.keys().map(|id| self.weight(id)).sum();
        let weighted_sum: f64 = per_profile
            .iter()
            .map(|(id, clarity)| self.weight(id) * clarity)
            .sum();
        let value = (weighted_sum / total_weight).clamp(0.0, 1.0);

        let spread = per_profile
            .iter()
            .map(|(id, clarity)| self.weight(id) * (clarity - value).powi(2))
            .sum::<f64>()
            / total_weight;

        Ok(QualityScore {
            value,
            per_profile,
            spread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn critique(profile: &str, clarity: f64) -> Critique {
        Critique::new(profile, 0, clarity)
    }

    #[test]
    fn test_single_critique_is_its_own_score() {
        let score = QualityScorer::new()
            .score(&[critique("advanced", 0.42)])
            .unwrap();
        assert_eq!(score.value, 0.42);
        assert_eq!(score.spread, 0.0);
        assert_eq!(score.per_profile.len(), 1);
    }

    #[test]
    fn test_unweighted_mean_and_spread() {
        let score = QualityScorer::new()
            .score(&[critique("a", 0.2), critique("b", 0.6)])
            .unwrap();
        assert!((score.value - 0.4).abs() < 1e-12);
        assert!((score.spread - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_mean() {
        let scorer =
            QualityScorer::with_weights([("a".to_string(), 3.0), ("b".to_string(), 1.0)]).unwrap();
        let score = scorer.score(&[critique("a", 1.0), critique("b", 0.0)]).unwrap();
        assert!((score.value - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_empty_set_is_invalid_input() {
        assert!(matches!(
            QualityScorer::new().score(&[]),
            Err(ScoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duplicate_profile_rejected() {
        let result = QualityScorer::new().score(&[critique("a", 0.5), critique("a", 0.7)]);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("more than one critique from profile 'a'"));
    }

    #[test]
    fn test_out_of_range_clarity_rejected() {
        assert!(matches!(
            QualityScorer::new().score(&[critique("a", 1.5)]),
            Err(ScoreError::InvalidInput(_))
        ));
        assert!(matches!(
            QualityScorer::new().score(&[critique("a", f64::NAN)]),
            Err(ScoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bad_weight_rejected() {
        let result = QualityScorer::with_weights([("a".to_string(), 0.0)]);
        assert!(matches!(result, Err(ConfigError::InvalidWeight { .. })));
    }

    #[test]
    fn test_reordering_does_not_change_score() {
        let scorer = QualityScorer::new();
        let forward = [critique("a", 0.1), critique("b", 0.7), critique("c", 0.3)];
        let mut backward = forward.clone();
        backward.reverse();
        assert_eq!(scorer.score(&forward), scorer.score(&backward));
    }
}
