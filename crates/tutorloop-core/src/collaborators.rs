use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::comparison::PairwiseJudgement;
use crate::model::{Critique, Explanation, GradingResult, Problem, StudentProfile};
use crate::scorer::{QualityScore, QualityScorer};

/// Failure of one call across the collaborator boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("unparsable reply: {0}")]
    Parse(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Produces explanation versions: the initial one when `prior` is `None`,
/// otherwise a revision addressing `critiques`.
#[async_trait]
pub trait ExplanationGenerator: Send + Sync {
    async fn generate(
        &self,
        problem: &Problem,
        prior: Option<&Explanation>,
        critiques: &[Critique],
        round: usize,
    ) -> Result<Explanation, CollaboratorError>;
}

/// Critiques an explanation from the point of view of one student profile
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(
        &self,
        problem: &Problem,
        explanation: &Explanation,
        profile: &StudentProfile,
    ) -> Result<Critique, CollaboratorError>;
}

/// Turns a critique set into a quality score
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(&self, critiques: &[Critique]) -> Result<QualityScore, CollaboratorError>;
}

/// Has one profile answer the problem after reading the final explanation
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(
        &self,
        problem: &Problem,
        explanation: &Explanation,
        profile: &StudentProfile,
    ) -> Result<GradingResult, CollaboratorError>;
}

/// Compares a refined explanation with an unrefined one for the same problem
#[async_trait]
pub trait PairwiseJudge: Send + Sync {
    async fn compare(
        &self,
        problem: &Problem,
        refined: &Explanation,
        baseline: &Explanation,
    ) -> Result<PairwiseJudgement, CollaboratorError>;
}

/// The local [`QualityScorer`] used as a judge
#[derive(Debug, Clone, Default)]
pub struct ScorerJudge {
    scorer: QualityScorer,
}

impl ScorerJudge {
    pub fn new(scorer: QualityScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Judge for ScorerJudge {
    async fn evaluate(&self, critiques: &[Critique]) -> Result<QualityScore, CollaboratorError> {
        self.scorer
            .score(critiques)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scorer_judge_scores_locally() {
        let judge = ScorerJudge::default();
        let critiques = vec![Critique::new("a", 0, 0.2), Critique::new("b", 0, 0.8)];
        let score = judge.evaluate(&critiques).await.unwrap();
        assert!((score.value - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_scorer_judge_rejects_empty_set() {
        let judge = ScorerJudge::default();
        assert!(matches!(
            judge.evaluate(&[]).await,
            Err(CollaboratorError::Rejected(_))
        ));
    }
}
