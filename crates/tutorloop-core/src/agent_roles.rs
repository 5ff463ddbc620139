//! Collaborators backed by an LLM [`Agent`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tutorloop_agent::{Agent, AgentConfig};
use tutorloop_critic::parsing::{cap_words, rating_to_clarity};
use tokio::task::JoinSet;
use tutorloop_critic::{
    AnswerInput, CritiqueInput, CriticEvaluator, EvaluationError, PairwiseWinner, TutorPrompts,
};

use crate::collaborators::{
    CollaboratorError, Critic, ExplanationGenerator, Grader, Judge, PairwiseJudge,
};
use crate::comparison::{PairwiseJudgement, Preference};
use crate::model::{Critique, Explanation, GradingResult, Problem, StudentProfile};
use crate::scorer::{QualityScore, QualityScorer};

/// Default word limit for generated explanations
pub const DEFAULT_WORD_CAP: usize = 180;

impl From<EvaluationError> for CollaboratorError {
    fn from(err: EvaluationError) -> Self {
        match err {
            EvaluationError::AgentError(msg) => CollaboratorError::Agent(msg),
            EvaluationError::ParseError(e) => CollaboratorError::Parse(e.to_string()),
            EvaluationError::NoAnswer(msg) => CollaboratorError::Parse(msg),
            EvaluationError::VerdictError(e) => CollaboratorError::Parse(e.to_string()),
        }
    }
}

/// Teacher role: writes and revises explanations
pub struct AgentGenerator {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
    word_cap: usize,
}

impl AgentGenerator {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self {
            agent,
            config,
            word_cap: DEFAULT_WORD_CAP,
        }
    }

    pub fn with_word_cap(mut self, word_cap: usize) -> Self {
        self.word_cap = word_cap;
        self
    }
}

/// Gaps and requests from every critique; bare feedback text when a student
/// gave nothing structured
fn revision_items(critiques: &[Critique]) -> Vec<String> {
    critiques
        .iter()
        .flat_map(|c| {
            let items: Vec<String> = c.feedback_items().cloned().collect();
            if items.is_empty() && !c.feedback.trim().is_empty() && c.clarity < 1.0 {
                vec![c.feedback.clone()]
            } else {
                items
            }
        })
        .collect()
}

#[async_trait]
impl ExplanationGenerator for AgentGenerator {
    async fn generate(
        &self,
        problem: &Problem,
        prior: Option<&Explanation>,
        critiques: &[Critique],
        round: usize,
    ) -> Result<Explanation, CollaboratorError> {
        let prompt = match prior {
            None => TutorPrompts::build_initial_prompt(&problem.question, self.word_cap),
            Some(prior) => TutorPrompts::build_revision_prompt(
                &problem.question,
                &prior.text,
                &revision_items(critiques),
                self.word_cap,
            ),
        };

        let output = self
            .agent
            .execute(&prompt, &self.config)
            .await
            .map_err(|e| CollaboratorError::Agent(e.to_string()))?;
        if !output.success() {
            return Err(CollaboratorError::Agent(output.failure_summary()));
        }

        let text = cap_words(output.reply(), self.word_cap);
        if text.is_empty() {
            return Err(CollaboratorError::Rejected(
                "teacher returned an empty explanation".to_string(),
            ));
        }

        debug!(round, words = text.split_whitespace().count(), "Explanation generated");
        Ok(Explanation::new(round, text))
    }
}

/// Student role: one agent plays every profile in turn
pub struct AgentCritic {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
}

impl AgentCritic {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self { agent, config }
    }
}

#[async_trait]
impl Critic for AgentCritic {
    async fn critique(
        &self,
        _problem: &Problem,
        explanation: &Explanation,
        profile: &StudentProfile,
    ) -> Result<Critique, CollaboratorError> {
        let traits = profile.trait_pairs();
        let feedback = CriticEvaluator::new(self.agent.as_ref())
            .critique(
                CritiqueInput {
                    profile_id: &profile.id,
                    guidelines: &profile.guidelines,
                    traits: &traits,
                    explanation: &explanation.text,
                    round: explanation.round,
                },
                &self.config,
            )
            .await?;

        Ok(Critique::new(&profile.id, explanation.round, feedback.clarity)
            .with_feedback(feedback.feedback)
            .with_gaps(feedback.gaps)
            .with_requests(feedback.requests))
    }
}

/// Judge role: rates how constructive each critique is and scores the
/// ratings. A constructive critique means a less finished explanation.
///
/// Critiques are rated concurrently, so one judge call costs about as long
/// as the slowest single rating.
pub struct AgentJudge {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
    scorer: QualityScorer,
}

impl AgentJudge {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig, scorer: QualityScorer) -> Self {
        Self {
            agent,
            config,
            scorer,
        }
    }
}

#[async_trait]
impl Judge for AgentJudge {
    async fn evaluate(&self, critiques: &[Critique]) -> Result<QualityScore, CollaboratorError> {
        let mut tasks = JoinSet::new();
        for (index, critique) in critiques.iter().enumerate() {
            let agent = Arc::clone(&self.agent);
            let config = self.config.clone();
            let profile_id = critique.profile_id.clone();
            let text = critique.full_text();

            tasks.spawn(async move {
                let rating = CriticEvaluator::new(agent.as_ref())
                    .rate(&profile_id, &text, &config)
                    .await;
                (index, rating)
            });
        }

        let mut ratings: Vec<Option<u8>> = vec![None; critiques.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, rating) =
                joined.map_err(|e| CollaboratorError::Agent(format!("rating task aborted: {}", e)))?;
            ratings[index] = Some(rating?);
        }

        let mut rated = Vec::with_capacity(critiques.len());
        for (critique, rating) in critiques.iter().zip(ratings) {
            let rating = rating.ok_or_else(|| {
                CollaboratorError::Agent(format!("no rating for '{}'", critique.profile_id))
            })?;
            let mut critique = critique.clone();
            critique.clarity = rating_to_clarity(rating);
            rated.push(critique);
        }

        self.scorer
            .score(&rated)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))
    }
}

/// Pairwise judge role: the refined explanation is shown as A, the baseline
/// as B
pub struct AgentPairwiseJudge {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
}

impl AgentPairwiseJudge {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self { agent, config }
    }
}

#[async_trait]
impl PairwiseJudge for AgentPairwiseJudge {
    async fn compare(
        &self,
        problem: &Problem,
        refined: &Explanation,
        baseline: &Explanation,
    ) -> Result<PairwiseJudgement, CollaboratorError> {
        let verdict = CriticEvaluator::new(self.agent.as_ref())
            .compare(&problem.question, &refined.text, &baseline.text, &self.config)
            .await?;

        let preferred = match verdict.winner {
            PairwiseWinner::A => Preference::Refined,
            PairwiseWinner::B => Preference::Baseline,
            PairwiseWinner::Tie => Preference::Tie,
        };
        Ok(PairwiseJudgement {
            preferred,
            rationales: verdict.rationales,
        })
    }
}

/// Grading role: the profile answers the problem using the final explanation
pub struct AgentGrader {
    agent: Arc<dyn Agent>,
    config: AgentConfig,
}

impl AgentGrader {
    pub fn new(agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self { agent, config }
    }
}

#[async_trait]
impl Grader for AgentGrader {
    async fn grade(
        &self,
        problem: &Problem,
        explanation: &Explanation,
        profile: &StudentProfile,
    ) -> Result<GradingResult, CollaboratorError> {
        let choice = CriticEvaluator::new(self.agent.as_ref())
            .answer(
                AnswerInput {
                    profile_id: &profile.id,
                    guidelines: &profile.guidelines,
                    explanation: &explanation.text,
                    question: &problem.question,
                    choices: &problem.choices,
                },
                &self.config,
            )
            .await?;

        Ok(GradingResult::from_choice(&profile.id, problem, choice))
    }
}
