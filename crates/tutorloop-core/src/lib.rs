//! # tutorloop-core
//!
//! Iterative explanation refinement: a teacher writes an explanation,
//! simulated students critique it, a judge scores the critiques, and a
//! convergence detector decides whether another revision is worth it.
//! Once refinement stops, every student answers the original question and
//! the results are summarized. A baseline mode grades a single unrefined
//! explanation so the two can be compared head-to-head.
//!
//! ## Key Types
//!
//! - [`SessionRunner`] - Drives sessions round by round
//! - [`ConvergenceDetector`] - Pure stop/continue decision over the score history
//! - [`QualityScorer`] - Critique set to scalar quality
//! - [`OutcomeAggregator`] - Post-session grading statistics
//! - [`SessionResult`] - The unit of output
//! - [`BaselineComparison`] - Refined versus unrefined, with a pairwise judgement

mod agent_roles;
mod aggregator;
mod collaborators;
mod comparison;
mod context;
mod convergence;
mod error;
mod loop_runner;
mod model;
mod outcome;
mod scorer;

pub use agent_roles::{
    AgentCritic, AgentGenerator, AgentGrader, AgentJudge, AgentPairwiseJudge, DEFAULT_WORD_CAP,
};
pub use aggregator::{GradingGap, GradingSummary, OutcomeAggregator};
pub use collaborators::{
    CollaboratorError, Critic, ExplanationGenerator, Grader, Judge, PairwiseJudge, ScorerJudge,
};
pub use comparison::{BaselineComparison, PairwiseJudgement, Preference};
pub use context::{RoundOutcome, RoundRecord, SessionContext};
pub use convergence::{
    ConvergenceConfig, ConvergenceDetector, ConvergenceState, Decision, StopReason,
    ThresholdDirection,
};
pub use error::{ConfigError, LoopError};
pub use loop_runner::{
    Collaborators, RunMode, RunnerConfig, SessionPersistence, SessionRunner,
    DEFAULT_CALL_TIMEOUT,
};
pub use model::{
    Critique, Explanation, GradingResult, Problem, ProfileFailure, StudentProfile,
};
pub use outcome::{SessionResult, SessionStatus};
pub use scorer::{QualityScore, QualityScorer, ScoreError};
