use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a score is compared against the quality threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    /// Score is explanation quality: converge once it rises to the threshold
    #[default]
    AtLeast,
    /// Score is critique strength: converge once it falls to the threshold
    AtMost,
}

impl ThresholdDirection {
    pub fn meets(self, score: f64, threshold: f64) -> bool {
        match self {
            Self::AtLeast => score >= threshold,
            Self::AtMost => score <= threshold,
        }
    }

    /// Signed improvement from `prev` to `next`; positive is better
    pub fn improvement(self, prev: f64, next: f64) -> f64 {
        match self {
            Self::AtLeast => next - prev,
            Self::AtMost => prev - next,
        }
    }
}

impl fmt::Display for ThresholdDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtLeast => write!(f, "at_least"),
            Self::AtMost => write!(f, "at_most"),
        }
    }
}

impl std::str::FromStr for ThresholdDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "at_least" => Ok(Self::AtLeast),
            "at_most" => Ok(Self::AtMost),
            _ => Err(format!("Unknown threshold direction: {}", s)),
        }
    }
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_max_rounds() -> usize {
    5
}

fn default_min_rounds() -> usize {
    1
}

fn default_stagnation_window() -> usize {
    2
}

/// Stopping rules for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConvergenceConfig {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Hard cap on rounds, counting the initial explanation
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// First round index at which the threshold or stagnation rules apply;
    /// the default of 1 guarantees one refinement attempt
    #[serde(default = "default_min_rounds")]
    pub min_rounds: usize,
    /// Stagnation rule is disabled when unset
    #[serde(default)]
    pub improvement_epsilon: Option<f64>,
    #[serde(default = "default_stagnation_window")]
    pub stagnation_window: usize,
    #[serde(default)]
    pub direction: ThresholdDirection,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            max_rounds: default_max_rounds(),
            min_rounds: default_min_rounds(),
            improvement_epsilon: None,
            stagnation_window: default_stagnation_window(),
            direction: ThresholdDirection::default(),
        }
    }
}

impl ConvergenceConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_min_rounds(mut self, min_rounds: usize) -> Self {
        self.min_rounds = min_rounds;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64, window: usize) -> Self {
        self.improvement_epsilon = Some(epsilon);
        self.stagnation_window = window;
        self
    }

    pub fn with_direction(mut self, direction: ThresholdDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::MaxRoundsTooSmall);
        }
        if !self.quality_threshold.is_finite() || !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.quality_threshold));
        }
        if self.min_rounds > self.max_rounds {
            return Err(ConfigError::MinRoundsExceedsMax {
                min: self.min_rounds,
                max: self.max_rounds,
            });
        }
        if let Some(epsilon) = self.improvement_epsilon {
            if !epsilon.is_finite() || epsilon < 0.0 {
                return Err(ConfigError::InvalidEpsilon(epsilon));
            }
        }
        if self.stagnation_window == 0 {
            return Err(ConfigError::StagnationWindowTooSmall);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    Continue,
    Converged,
    MaxRoundsReached,
}

impl ConvergenceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }

    pub fn stop_reason(self) -> Option<StopReason> {
        match self {
            Self::Continue => None,
            Self::Converged => Some(StopReason::Converged),
            Self::MaxRoundsReached => Some(StopReason::MaxRoundsReached),
        }
    }
}

impl fmt::Display for ConvergenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Converged => write!(f, "converged"),
            Self::MaxRoundsReached => write!(f, "max_rounds_reached"),
        }
    }
}

/// Why a session stopped refining. Only terminal decisions produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    MaxRoundsReached,
}

/// Detector output for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub state: ConvergenceState,
    pub reason: String,
}

impl Decision {
    fn new(state: ConvergenceState, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.state.stop_reason()
    }
}

/// Decides after each round whether to keep refining.
///
/// Holds no state between calls: the decision is a function of the score
/// history alone.
#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    config: ConvergenceConfig,
}

impl ConvergenceDetector {
    pub fn new(config: ConvergenceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// Decide from the scores of rounds `0..=scores.len() - 1`
    pub fn decide(&self, scores: &[f64]) -> Decision {
        let Some(&latest) = scores.last() else {
            return Decision::new(ConvergenceState::Continue, "no rounds scored yet");
        };
        let completed = scores.len();
        let config = &self.config;

        // Budget wins ties with the threshold and stagnation rules
        if completed >= config.max_rounds {
            return Decision::new(
                ConvergenceState::MaxRoundsReached,
                format!(
                    "round budget of {} exhausted (score {:.3})",
                    config.max_rounds, latest
                ),
            );
        }

        // Round R may only converge once R >= min_rounds
        let round = completed - 1;
        if round < config.min_rounds {
            return Decision::new(
                ConvergenceState::Continue,
                format!(
                    "round {} is before the first eligible round {}",
                    round, config.min_rounds
                ),
            );
        }

        if config.direction.meets(latest, config.quality_threshold) {
            let comparison = match config.direction {
                ThresholdDirection::AtLeast => ">=",
                ThresholdDirection::AtMost => "<=",
            };
            return Decision::new(
                ConvergenceState::Converged,
                format!(
                    "score {:.3} {} threshold {:.3}",
                    latest, comparison, config.quality_threshold
                ),
            );
        }

        if let Some(epsilon) = config.improvement_epsilon {
            let window = config.stagnation_window;
            if completed > window {
                let stalled = scores[completed - window - 1..]
                    .windows(2)
                    .all(|pair| config.direction.improvement(pair[0], pair[1]) < epsilon);
                if stalled {
                    return Decision::new(
                        ConvergenceState::Converged,
                        format!(
                            "improvement below {} for {} consecutive rounds (score {:.3})",
                            epsilon, window, latest
                        ),
                    );
                }
            }
        }

        Decision::new(
            ConvergenceState::Continue,
            format!(
                "score {:.3} has not reached threshold {:.3}",
                latest, config.quality_threshold
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(config: ConvergenceConfig) -> ConvergenceDetector {
        ConvergenceDetector::new(config).unwrap()
    }

    fn states(detector: &ConvergenceDetector, scores: &[f64]) -> Vec<ConvergenceState> {
        (1..=scores.len())
            .map(|n| detector.decide(&scores[..n]).state)
            .collect()
    }

    #[test]
    fn test_converges_when_threshold_met() {
        let d = detector(ConvergenceConfig::default().with_max_rounds(3).with_threshold(0.9));
        assert_eq!(
            states(&d, &[0.5, 0.95]),
            vec![ConvergenceState::Continue, ConvergenceState::Converged]
        );
    }

    #[test]
    fn test_budget_reached_without_threshold() {
        let d = detector(ConvergenceConfig::default().with_max_rounds(3).with_threshold(0.9));
        assert_eq!(
            states(&d, &[0.5, 0.6, 0.7]),
            vec![
                ConvergenceState::Continue,
                ConvergenceState::Continue,
                ConvergenceState::MaxRoundsReached
            ]
        );
    }

    #[test]
    fn test_budget_wins_tie_with_threshold() {
        let d = detector(ConvergenceConfig::default().with_max_rounds(2).with_threshold(0.9));
        let decision = d.decide(&[0.1, 0.99]);
        assert_eq!(decision.state, ConvergenceState::MaxRoundsReached);
        assert_eq!(decision.stop_reason(), Some(StopReason::MaxRoundsReached));
    }

    #[test]
    fn test_single_round_budget_stops_immediately() {
        let d = detector(ConvergenceConfig::default().with_max_rounds(1));
        assert_eq!(d.decide(&[0.0]).state, ConvergenceState::MaxRoundsReached);
    }

    #[test]
    fn test_min_rounds_delays_convergence() {
        let d = detector(
            ConvergenceConfig::default()
                .with_max_rounds(5)
                .with_min_rounds(3)
                .with_threshold(0.5),
        );
        assert_eq!(
            states(&d, &[0.9, 0.9, 0.9, 0.9]),
            vec![
                ConvergenceState::Continue,
                ConvergenceState::Continue,
                ConvergenceState::Continue,
                ConvergenceState::Converged
            ]
        );
    }

    #[test]
    fn test_round_zero_never_converges_with_min_rounds() {
        let d = detector(
            ConvergenceConfig::default()
                .with_max_rounds(3)
                .with_threshold(0.9)
                .with_min_rounds(1),
        );
        assert_eq!(d.decide(&[0.95]).state, ConvergenceState::Continue);
        assert_eq!(d.decide(&[0.95, 0.95]).state, ConvergenceState::Converged);

        let d = detector(
            ConvergenceConfig::default()
                .with_max_rounds(4)
                .with_threshold(0.9)
                .with_min_rounds(2),
        );
        assert_eq!(d.decide(&[0.1, 0.9]).state, ConvergenceState::Continue);
        assert_eq!(d.decide(&[0.1, 0.9, 0.9]).state, ConvergenceState::Converged);
    }

    #[test]
    fn test_zero_min_rounds_allows_round_zero() {
        let d = detector(ConvergenceConfig::default().with_min_rounds(0));
        assert_eq!(d.decide(&[0.8]).state, ConvergenceState::Converged);
    }

    #[test]
    fn test_stagnation_converges() {
        let d = detector(
            ConvergenceConfig::default()
                .with_max_rounds(10)
                .with_threshold(0.95)
                .with_epsilon(0.02, 2),
        );
        // One small step is not enough for a window of two
        assert_eq!(d.decide(&[0.5, 0.51]).state, ConvergenceState::Continue);
        let decision = d.decide(&[0.4, 0.5, 0.51, 0.52]);
        assert_eq!(decision.state, ConvergenceState::Converged);
        assert!(decision.reason.contains("improvement below"));
    }

    #[test]
    fn test_large_step_resets_stagnation() {
        let d = detector(
            ConvergenceConfig::default()
                .with_max_rounds(10)
                .with_threshold(0.95)
                .with_epsilon(0.02, 2),
        );
        assert_eq!(d.decide(&[0.5, 0.51, 0.7]).state, ConvergenceState::Continue);
    }

    #[test]
    fn test_at_most_direction() {
        let d = detector(
            ConvergenceConfig::default()
                .with_threshold(0.2)
                .with_direction(ThresholdDirection::AtMost),
        );
        assert_eq!(d.decide(&[0.6]).state, ConvergenceState::Continue);
        assert_eq!(d.decide(&[0.6, 0.15]).state, ConvergenceState::Converged);
    }

    #[test]
    fn test_empty_history_continues() {
        let d = detector(ConvergenceConfig::default());
        assert_eq!(d.decide(&[]).state, ConvergenceState::Continue);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert_eq!(
            ConvergenceDetector::new(ConvergenceConfig::default().with_max_rounds(0)).unwrap_err(),
            ConfigError::MaxRoundsTooSmall
        );
        assert!(matches!(
            ConvergenceDetector::new(ConvergenceConfig::default().with_threshold(1.5)),
            Err(ConfigError::ThresholdOutOfRange(_))
        ));
        assert!(matches!(
            ConvergenceDetector::new(
                ConvergenceConfig::default().with_max_rounds(2).with_min_rounds(3)
            ),
            Err(ConfigError::MinRoundsExceedsMax { min: 3, max: 2 })
        ));
        assert!(matches!(
            ConvergenceDetector::new(ConvergenceConfig::default().with_epsilon(-0.1, 2)),
            Err(ConfigError::InvalidEpsilon(_))
        ));
        assert_eq!(
            ConvergenceDetector::new(ConvergenceConfig::default().with_epsilon(0.1, 0))
                .unwrap_err(),
            ConfigError::StagnationWindowTooSmall
        );
    }

    #[test]
    fn test_config_deserializes_partial_table() {
        let config: ConvergenceConfig =
            serde_json::from_str(r#"{"max_rounds": 3, "direction": "at_most"}"#).unwrap();
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.quality_threshold, 0.7);
        assert_eq!(config.direction, ThresholdDirection::AtMost);
        assert!(serde_json::from_str::<ConvergenceConfig>(r#"{"rounds": 3}"#).is_err());
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!(
            "at-most".parse::<ThresholdDirection>().unwrap(),
            ThresholdDirection::AtMost
        );
        assert_eq!(ConvergenceState::MaxRoundsReached.to_string(), "max_rounds_reached");
    }
}
