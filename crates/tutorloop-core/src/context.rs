use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::convergence::ConvergenceState;
use crate::model::{Critique, Explanation, Problem, ProfileFailure};
use crate::scorer::QualityScore;

/// Record of a single refinement round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub explanation: Explanation,
    /// In roster order
    pub critiques: Vec<Critique>,
    pub failed_profiles: Vec<ProfileFailure>,
    pub score: QualityScore,
    pub decision: ConvergenceState,
    pub reason: String,
    /// The external judge failed and the local scorer produced `score`
    #[serde(default)]
    pub judge_fallback: bool,
    pub timestamp: DateTime<Utc>,
}

/// Everything one round produced, before it is committed to the history
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub explanation: Explanation,
    pub critiques: Vec<Critique>,
    pub failed_profiles: Vec<ProfileFailure>,
    pub score: QualityScore,
    pub judge_fallback: bool,
}

/// State of one session, owned by a single runner invocation
#[derive(Debug)]
pub struct SessionContext {
    pub session_id: String,
    pub problem: Arc<Problem>,
    history: Vec<RoundRecord>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl SessionContext {
    pub fn new(problem: Arc<Problem>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            problem,
            history: Vec::new(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Index of the round about to run
    pub fn next_round(&self) -> usize {
        self.history.len()
    }

    /// Append a round. Its number is its position in the history, so rounds
    /// are always `0, 1, 2, ...`.
    pub fn commit_round(
        &mut self,
        outcome: RoundOutcome,
        decision: ConvergenceState,
        reason: String,
    ) -> &RoundRecord {
        let round = self.next_round();
        let mut explanation = outcome.explanation;
        explanation.round = round;

        self.history.push(RoundRecord {
            round,
            explanation,
            critiques: outcome.critiques,
            failed_profiles: outcome.failed_profiles,
            score: outcome.score,
            decision,
            reason,
            judge_fallback: outcome.judge_fallback,
            timestamp: Utc::now(),
        });
        &self.history[round]
    }

    /// Score values so far, oldest first
    pub fn scores(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.score.value).collect()
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    pub fn latest(&self) -> Option<&RoundRecord> {
        self.history.last()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub(crate) fn into_history(self) -> Vec<RoundRecord> {
        self.history
    }
}
