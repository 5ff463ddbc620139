use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::aggregator::GradingSummary;
use crate::comparison::BaselineComparison;
use crate::context::{RoundRecord, SessionContext};
use crate::convergence::StopReason;
use crate::model::Explanation;

/// How a session ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    /// A quality or stagnation rule stopped refinement
    Converged,
    /// Hit the round budget
    MaxRoundsReached,
    /// One unrefined explanation, graded as is
    Baseline,
    /// Unrecoverable error; the history is partial
    Failed { error: String },
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::MaxRoundsReached => "max_rounds_reached",
            Self::Baseline => "baseline",
            Self::Failed { .. } => "failed",
        }
    }
}

/// The final outcome of one refinement session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub problem_id: String,
    #[serde(flatten)]
    pub status: SessionStatus,
    pub final_explanation: Option<Explanation>,
    pub history: Vec<RoundRecord>,
    pub grading: Option<GradingSummary>,
    /// Present when the problem was also run without refinement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Box<BaselineComparison>>,
    pub started_at: DateTime<Utc>,
    pub total_duration_secs: f64,
}

impl SessionResult {
    /// Finish a session that stopped on a terminal decision
    pub(crate) fn completed(
        context: SessionContext,
        reason: StopReason,
        final_explanation: Explanation,
        grading: GradingSummary,
    ) -> Self {
        let status = match reason {
            StopReason::Converged => SessionStatus::Converged,
            StopReason::MaxRoundsReached => SessionStatus::MaxRoundsReached,
        };
        Self::build(context, status, Some(final_explanation), Some(grading))
    }

    /// Finish a baseline run: one explanation, no critique rounds
    pub(crate) fn baseline(
        context: SessionContext,
        explanation: Explanation,
        grading: GradingSummary,
    ) -> Self {
        Self::build(context, SessionStatus::Baseline, Some(explanation), Some(grading))
    }

    /// Finish a session that hit a fatal error
    pub(crate) fn failed(context: SessionContext, error: String) -> Self {
        let final_explanation = context.latest().map(|r| r.explanation.clone());
        Self::build(
            context,
            SessionStatus::Failed { error },
            final_explanation,
            None,
        )
    }

    fn build(
        context: SessionContext,
        status: SessionStatus,
        final_explanation: Option<Explanation>,
        grading: Option<GradingSummary>,
    ) -> Self {
        let duration: Duration = context.elapsed();
        Self {
            session_id: context.session_id.clone(),
            problem_id: context.problem.id.clone(),
            status,
            final_explanation,
            started_at: context.started_at(),
            total_duration_secs: duration.as_secs_f64(),
            grading,
            comparison: None,
            history: context.into_history(),
        }
    }

    pub(crate) fn with_comparison(mut self, comparison: BaselineComparison) -> Self {
        self.comparison = Some(Box::new(comparison));
        self
    }

    pub fn rounds(&self) -> usize {
        self.history.len()
    }

    pub fn is_converged(&self) -> bool {
        matches!(self.status, SessionStatus::Converged)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, SessionStatus::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            SessionStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn final_score(&self) -> Option<f64> {
        self.history.last().map(|r| r.score.value)
    }

    pub fn is_baseline(&self) -> bool {
        matches!(self.status, SessionStatus::Baseline)
    }

    /// 0 converged or baseline, 1 round budget hit, 2 failed. A compared
    /// session reports the worse of itself and its baseline run.
    pub fn exit_code(&self) -> i32 {
        let own = match self.status {
            SessionStatus::Converged | SessionStatus::Baseline => 0,
            SessionStatus::MaxRoundsReached => 1,
            SessionStatus::Failed { .. } => 2,
        };
        match &self.comparison {
            Some(comparison) => own.max(comparison.baseline.exit_code()),
            None => own,
        }
    }
}
