use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::parsing::extract_json_block;

/// Criteria the pairwise judge weighs. Efficiency means avoiding needless length.
pub const PAIRWISE_CRITERIA: [&str; 5] = [
    "clarity",
    "correctness",
    "completeness",
    "alignment",
    "efficiency",
];

/// Which of the two explanations the judge preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairwiseWinner {
    /// Explanation A
    A,
    /// Explanation B
    B,
    Tie,
}

/// A head-to-head verdict between explanation A and explanation B
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseVerdict {
    pub winner: PairwiseWinner,
    /// Criterion name to a short rationale
    pub rationales: BTreeMap<String, String>,
}

#[derive(Error, Debug)]
pub enum VerdictParseError {
    #[error("No JSON verdict found in judge output")]
    NoVerdictFound,

    #[error("Unknown winner '{0}', expected A, B, or tie")]
    UnknownWinner(String),
}

#[derive(Deserialize)]
struct RawVerdict {
    winner: String,
    #[serde(default)]
    rationales: BTreeMap<String, Value>,
}

impl PairwiseVerdict {
    /// Parse `{"winner": "A"|"B"|"tie", "rationales": {...}}` from a judge
    /// reply. Non-string rationales are kept as their JSON text.
    pub fn parse(output: &str) -> Result<Self, VerdictParseError> {
        let raw: RawVerdict =
            extract_json_block(output).ok_or(VerdictParseError::NoVerdictFound)?;

        let winner = match raw.winner.trim().to_uppercase().as_str() {
            "A" => PairwiseWinner::A,
            "B" => PairwiseWinner::B,
            "TIE" => PairwiseWinner::Tie,
            _ => return Err(VerdictParseError::UnknownWinner(raw.winner)),
        };

        let rationales = raw
            .rationales
            .into_iter()
            .map(|(criterion, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (criterion, text)
            })
            .collect();

        Ok(Self { winner, rationales })
    }
}
