use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::outcome::SessionResult;

/// Which explanation the pairwise judge preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    Refined,
    Baseline,
    Tie,
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refined => write!(f, "refined"),
            Self::Baseline => write!(f, "baseline"),
            Self::Tie => write!(f, "tie"),
        }
    }
}

/// Head-to-head judgement between the refined and baseline explanations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseJudgement {
    pub preferred: Preference,
    /// Criterion name to a short rationale
    #[serde(default)]
    pub rationales: BTreeMap<String, String>,
}

impl PairwiseJudgement {
    pub fn new(preferred: Preference) -> Self {
        Self {
            preferred,
            rationales: BTreeMap::new(),
        }
    }

    pub fn with_rationale(mut self, criterion: impl Into<String>, text: impl Into<String>) -> Self {
        self.rationales.insert(criterion.into(), text.into());
        self
    }
}

/// What refinement bought over a single unrefined explanation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineComparison {
    /// The baseline run of the same problem
    pub baseline: SessionResult,
    /// Absent when either run failed or the judge gave no verdict
    pub judgement: Option<PairwiseJudgement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_error: Option<String>,
}

impl BaselineComparison {
    /// Refined mean grading score minus the baseline's, when both exist
    pub fn grading_gain(&self, refined: &SessionResult) -> Option<f64> {
        let refined = refined.grading.as_ref()?.mean?;
        let baseline = self.baseline.grading.as_ref()?.mean?;
        Some(refined - baseline)
    }
}
