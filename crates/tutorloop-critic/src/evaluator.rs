use tutorloop_agent::{Agent, AgentConfig};
use tracing::{debug, info};

use crate::parsing::{extract_choice, extract_rating};
use crate::verdict::{PairwiseVerdict, VerdictParseError};
use crate::{FeedbackParseError, StudentFeedback, TutorPrompts};

/// Inputs for one student critique
#[derive(Clone, Copy)]
pub struct CritiqueInput<'a> {
    pub profile_id: &'a str,
    pub guidelines: &'a str,
    pub traits: &'a [(String, String)],
    pub explanation: &'a str,
    pub round: usize,
}

/// Inputs for one student answering the original question
#[derive(Clone, Copy)]
pub struct AnswerInput<'a> {
    pub profile_id: &'a str,
    pub guidelines: &'a str,
    pub explanation: &'a str,
    pub question: &'a str,
    pub choices: &'a [String],
}

/// Runs an agent in the student, judge, and grading roles
pub struct CriticEvaluator<'a> {
    agent: &'a dyn Agent,
}

impl<'a> CriticEvaluator<'a> {
    pub fn new(agent: &'a dyn Agent) -> Self {
        Self { agent }
    }

    /// Ask a simulated student to critique an explanation
    pub async fn critique(
        &self,
        input: CritiqueInput<'_>,
        config: &AgentConfig,
    ) -> Result<StudentFeedback, EvaluationError> {
        let prompt =
            TutorPrompts::build_critique_prompt(input.guidelines, input.traits, input.explanation);

        debug!(
            profile = input.profile_id,
            round = input.round,
            prompt_len = prompt.len(),
            "Running student critique"
        );

        let reply = self.run(&prompt, config).await?;
        StudentFeedback::parse(&reply).map_err(EvaluationError::ParseError)
    }

    /// Ask the judge how constructive a critique is, on the 1–3 scale
    pub async fn rate(
        &self,
        profile_id: &str,
        critique: &str,
        config: &AgentConfig,
    ) -> Result<u8, EvaluationError> {
        let prompt = TutorPrompts::build_reward_prompt(profile_id, critique);
        let reply = self.run(&prompt, config).await?;
        let rating = extract_rating(&reply);
        debug!(profile = profile_id, rating, "Critique rated");
        Ok(rating)
    }

    /// Ask a student to answer the original question. Returns the chosen
    /// choice index.
    pub async fn answer(
        &self,
        input: AnswerInput<'_>,
        config: &AgentConfig,
    ) -> Result<usize, EvaluationError> {
        let prompt = TutorPrompts::build_grading_prompt(
            input.guidelines,
            input.explanation,
            input.question,
            input.choices,
        );
        let reply = self.run(&prompt, config).await?;

        extract_choice(&reply, input.choices.len()).ok_or_else(|| {
            EvaluationError::NoAnswer(format!(
                "no choice between A and {} in reply from '{}'",
                crate::parsing::choice_letter(input.choices.len().saturating_sub(1)),
                input.profile_id
            ))
        })
    }

    /// Ask a judge which of two explanations teaches the question better
    pub async fn compare(
        &self,
        question: &str,
        explanation_a: &str,
        explanation_b: &str,
        config: &AgentConfig,
    ) -> Result<PairwiseVerdict, EvaluationError> {
        let prompt = TutorPrompts::build_pairwise_prompt(question, explanation_a, explanation_b);
        let reply = self.run(&prompt, config).await?;
        let verdict = PairwiseVerdict::parse(&reply)?;
        debug!(winner = ?verdict.winner, "Pairwise verdict");
        Ok(verdict)
    }

    async fn run(&self, prompt: &str, config: &AgentConfig) -> Result<String, EvaluationError> {
        let output = self
            .agent
            .execute(prompt, config)
            .await
            .map_err(|e| EvaluationError::AgentError(e.to_string()))?;

        info!(
            agent = self.agent.name(),
            exit_code = output.exit_code,
            duration_secs = output.duration.as_secs_f64(),
            "Agent completed"
        );

        if !output.success() {
            return Err(EvaluationError::AgentError(output.failure_summary()));
        }

        Ok(output.reply().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Agent execution error: {0}")]
    AgentError(String),

    #[error("Failed to parse student feedback: {0}")]
    ParseError(#[from] FeedbackParseError),

    #[error("Student gave no usable answer: {0}")]
    NoAnswer(String),

    #[error("Failed to parse pairwise verdict: {0}")]
    VerdictError(#[from] VerdictParseError),
}
