use std::time::Duration;

use thiserror::Error;

use crate::scorer::ScoreError;

/// Configuration rejected before any round runs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max_rounds must be at least 1")]
    MaxRoundsTooSmall,

    #[error("quality_threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("min_rounds ({min}) cannot exceed max_rounds ({max})")]
    MinRoundsExceedsMax { min: usize, max: usize },

    #[error("improvement_epsilon {0} must be a finite, non-negative number")]
    InvalidEpsilon(f64),

    #[error("stagnation_window must be at least 1")]
    StagnationWindowTooSmall,

    #[error("weight {weight} for profile '{profile}' must be finite and positive")]
    InvalidWeight { profile: String, weight: f64 },

    #[error("at least one student profile is required")]
    EmptyRoster,

    #[error("duplicate student profile id '{0}'")]
    DuplicateProfile(String),

    #[error("call timeout must be non-zero (got {0:?})")]
    InvalidTimeout(Duration),
}

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Fatal for the session: there is no explanation to refine
    #[error("Explanation generation failed in round {round}: {reason}")]
    GenerationFailed { round: usize, reason: String },

    /// Recoverable: the round proceeds without this profile
    #[error("Critique unavailable for profile '{profile}': {reason}")]
    CritiqueUnavailable { profile: String, reason: String },

    /// Recoverable: the profile is left out of the grading statistics
    #[error("Grading unavailable for profile '{profile}': {reason}")]
    GradingUnavailable { profile: String, reason: String },
}

impl From<ScoreError> for LoopError {
    fn from(err: ScoreError) -> Self {
        LoopError::InvalidInput(err.to_string())
    }
}

impl LoopError {
    /// Whether this error ends the session
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            LoopError::CritiqueUnavailable { .. } | LoopError::GradingUnavailable { .. }
        )
    }
}
