//! # tutorloop-critic
//!
//! Prompt templates and reply parsing for every agent role in tutorloop,
//! plus [`CriticEvaluator`] which runs an agent in those roles.

pub mod evaluator;
mod feedback;
pub mod parsing;
mod prompts;
mod verdict;

pub use evaluator::{AnswerInput, CritiqueInput, CriticEvaluator, EvaluationError};
pub use feedback::{FeedbackParseError, StudentFeedback};
pub use prompts::{rank_feedback, TutorPrompts, MAX_FEEDBACK_ITEMS};
pub use verdict::{PairwiseVerdict, PairwiseWinner, VerdictParseError, PAIRWISE_CRITERIA};
