use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tutorloop_logging::{
    LogEvent, Logger, RoundInfo, SessionEndInfo, SessionStartInfo, SessionWriter,
};

use crate::aggregator::OutcomeAggregator;
use crate::collaborators::{
    CollaboratorError, Critic, ExplanationGenerator, Grader, Judge, PairwiseJudge,
};
use crate::comparison::BaselineComparison;
use crate::context::{RoundOutcome, SessionContext};
use crate::convergence::{ConvergenceConfig, ConvergenceDetector, StopReason};
use crate::error::{ConfigError, LoopError};
use crate::model::{Critique, Explanation, Problem, ProfileFailure, StudentProfile};
use crate::outcome::SessionResult;
use crate::scorer::{QualityScore, QualityScorer};

/// Default per-call timeout for every collaborator
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// The four capabilities a session depends on
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ExplanationGenerator>,
    pub critic: Arc<dyn Critic>,
    pub judge: Arc<dyn Judge>,
    pub grader: Arc<dyn Grader>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub call_timeout: Duration,
    pub convergence: ConvergenceConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new(convergence: ConvergenceConfig) -> Self {
        Self {
            convergence,
            ..Default::default()
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// What `run_batch` does with each problem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Iterative refinement, then grading
    #[default]
    Refine,
    /// One explanation with no critique rounds, then grading
    Baseline,
    /// Both, plus a pairwise judgement of the two final explanations
    Compare,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refine => write!(f, "refine"),
            Self::Baseline => write!(f, "baseline"),
            Self::Compare => write!(f, "compare"),
        }
    }
}

/// Where session JSONL files go
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionPersistence {
    #[default]
    Disabled,
    /// `<data_dir>/tutorloop/sessions`
    DefaultDir,
    Dir(PathBuf),
}

/// Drives refinement sessions: explain, critique, score, decide, repeat,
/// then grade. Can also run the unrefined baseline for comparison.
pub struct SessionRunner {
    collaborators: Collaborators,
    profiles: Arc<[StudentProfile]>,
    detector: ConvergenceDetector,
    scorer: QualityScorer,
    aggregator: OutcomeAggregator,
    call_timeout: Duration,
    logger: Arc<Logger>,
    persistence: SessionPersistence,
    mode: RunMode,
    pairwise: Option<Arc<dyn PairwiseJudge>>,
}

impl SessionRunner {
    /// Validate the roster and configuration. Nothing runs if this fails.
    pub fn new(
        collaborators: Collaborators,
        profiles: Vec<StudentProfile>,
        config: RunnerConfig,
        logger: Arc<Logger>,
    ) -> Result<Self, LoopError> {
        if profiles.is_empty() {
            return Err(ConfigError::EmptyRoster.into());
        }
        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.id.as_str()) {
                return Err(ConfigError::DuplicateProfile(profile.id.clone()).into());
            }
        }
        if config.call_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(config.call_timeout).into());
        }

        let detector = ConvergenceDetector::new(config.convergence)?;
        let scorer = QualityScorer::for_profiles(&profiles)?;
        let aggregator = OutcomeAggregator::new(
            Arc::clone(&collaborators.grader),
            config.call_timeout,
            Arc::clone(&logger),
        );

        Ok(Self {
            collaborators,
            profiles: profiles.into(),
            detector,
            scorer,
            aggregator,
            call_timeout: config.call_timeout,
            logger,
            persistence: SessionPersistence::Disabled,
            mode: RunMode::Refine,
            pairwise: None,
        })
    }

    pub fn with_persistence(mut self, persistence: SessionPersistence) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Judge used by [`RunMode::Compare`]. Without one, compared sessions
    /// still carry the baseline run but no judgement.
    pub fn with_pairwise_judge(mut self, judge: Arc<dyn PairwiseJudge>) -> Self {
        self.pairwise = Some(judge);
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn profiles(&self) -> &[StudentProfile] {
        &self.profiles
    }

    pub fn convergence(&self) -> &ConvergenceConfig {
        self.detector.config()
    }

    /// Run sessions one after another. A failed session never stops the batch.
    pub async fn run_batch(&self, problems: &[Problem]) -> Vec<SessionResult> {
        let mut results = Vec::with_capacity(problems.len());
        for (i, problem) in problems.iter().enumerate() {
            info!(
                problem = %problem.id,
                index = i + 1,
                total = problems.len(),
                mode = %self.mode,
                "Starting session"
            );
            let result = match self.mode {
                RunMode::Refine => self.run(problem).await,
                RunMode::Baseline => self.run_baseline(problem).await,
                RunMode::Compare => self.run_compared(problem).await,
            };
            results.push(result);
        }
        results
    }

    /// Generate one explanation with no critique rounds and grade it the
    /// same way a refined session is graded
    pub async fn run_baseline(&self, problem: &Problem) -> SessionResult {
        let problem = Arc::new(problem.clone());
        let context = SessionContext::new(Arc::clone(&problem));
        self.logger.log(&LogEvent::BaselineStarted {
            problem_id: problem.id.clone(),
        });

        let generated = match problem.validate() {
            Ok(()) => self.generate(&problem, None, &[], 0).await,
            Err(msg) => Err(LoopError::InvalidInput(msg)),
        };

        let result = match generated {
            Ok(explanation) => {
                let outcomes = self
                    .aggregator
                    .collect(Arc::clone(&problem), &explanation, &self.profiles)
                    .await;
                let grading = OutcomeAggregator::summarize(outcomes);
                SessionResult::baseline(context, explanation, grading)
            }
            Err(e) => {
                warn!(problem = %problem.id, error = %e, "Baseline failed");
                SessionResult::failed(context, e.to_string())
            }
        };

        self.finish(&result, None);
        result
    }

    /// Refine, run the baseline, then ask the pairwise judge which final
    /// explanation is better. The comparison rides on the refined result.
    pub async fn run_compared(&self, problem: &Problem) -> SessionResult {
        let refined = self.run(problem).await;
        let baseline = self.run_baseline(problem).await;

        let judged = match (
            &self.pairwise,
            &refined.final_explanation,
            &baseline.final_explanation,
        ) {
            _ if refined.is_failed() => Err("refined session failed".to_string()),
            _ if baseline.is_failed() => Err("baseline run failed".to_string()),
            (None, _, _) => Err("no pairwise judge configured".to_string()),
            (Some(judge), Some(refined_text), Some(baseline_text)) => {
                tokio::time::timeout(
                    self.call_timeout,
                    judge.compare(problem, refined_text, baseline_text),
                )
                .await
                .unwrap_or(Err(CollaboratorError::Timeout(self.call_timeout)))
                .map_err(|e| e.to_string())
            }
            _ => Err("missing final explanation".to_string()),
        };

        let comparison = match judged {
            Ok(judgement) => {
                self.logger.log(&LogEvent::PairwiseJudged {
                    problem_id: problem.id.clone(),
                    preferred: judgement.preferred.to_string(),
                });
                BaselineComparison {
                    baseline,
                    judgement: Some(judgement),
                    judge_error: None,
                }
            }
            Err(error) => {
                warn!(problem = %problem.id, error = %error, "No pairwise judgement");
                self.logger.log(&LogEvent::PairwiseFailed {
                    problem_id: problem.id.clone(),
                    error: error.clone(),
                });
                BaselineComparison {
                    baseline,
                    judgement: None,
                    judge_error: Some(error),
                }
            }
        };

        refined.with_comparison(comparison)
    }

    /// Run one session to a terminal state
    pub async fn run(&self, problem: &Problem) -> SessionResult {
        let problem = Arc::new(problem.clone());
        let mut context = SessionContext::new(Arc::clone(&problem));
        let writer = self.open_writer(&problem.id);
        let profile_ids: Vec<String> = self.profiles.iter().map(|p| p.id.clone()).collect();
        let config = self.detector.config();

        self.logger.log(&LogEvent::SessionStarted {
            session_id: context.session_id.clone(),
            problem_id: problem.id.clone(),
            question_preview: problem.question.chars().take(100).collect(),
            profiles: profile_ids.clone(),
            max_rounds: config.max_rounds,
            quality_threshold: config.quality_threshold,
        });
        if let Some(ref writer) = writer {
            writer.write_start(&SessionStartInfo {
                session_id: &context.session_id,
                problem_id: &problem.id,
                question: &problem.question,
                profiles: &profile_ids,
                quality_threshold: config.quality_threshold,
                max_rounds: config.max_rounds,
                min_rounds: config.min_rounds,
            });
        }

        let refined = match problem.validate() {
            Ok(()) => self.refine(&mut context, writer.as_ref()).await,
            Err(msg) => Err(LoopError::InvalidInput(msg)),
        };

        let result = match refined {
            Ok((reason, final_explanation)) => {
                let outcomes = self
                    .aggregator
                    .collect(Arc::clone(&problem), &final_explanation, &self.profiles)
                    .await;
                let grading = OutcomeAggregator::summarize(outcomes);
                SessionResult::completed(context, reason, final_explanation, grading)
            }
            Err(e) => {
                warn!(problem = %problem.id, error = %e, "Session failed");
                SessionResult::failed(context, e.to_string())
            }
        };

        self.finish(&result, writer.as_ref());
        result
    }

    /// The round loop. Returns the stop reason and the final explanation.
    async fn refine(
        &self,
        context: &mut SessionContext,
        writer: Option<&SessionWriter>,
    ) -> Result<(StopReason, Explanation), LoopError> {
        let problem = Arc::clone(&context.problem);
        let mut prior: Option<Explanation> = None;
        let mut prior_critiques: Vec<Critique> = Vec::new();

        loop {
            let round = context.next_round();
            let explanation = self
                .generate(&problem, prior.as_ref(), &prior_critiques, round)
                .await?;

            let (critiques, failed_profiles) =
                self.gather_critiques(Arc::clone(&problem), &explanation).await;
            let (score, judge_fallback) = self.evaluate(round, &critiques).await?;

            let mut scores = context.scores();
            scores.push(score.value);
            let decision = self.detector.decide(&scores);

            self.logger.log(&LogEvent::RoundScored {
                round,
                score: score.value,
                critiques: critiques.len(),
                failed_profiles: failed_profiles.len(),
                decision: decision.state.to_string(),
                reason: decision.reason.clone(),
            });

            let record = context.commit_round(
                RoundOutcome {
                    explanation: explanation.clone(),
                    critiques: critiques.clone(),
                    failed_profiles,
                    score,
                    judge_fallback,
                },
                decision.state,
                decision.reason.clone(),
            );
            if let Some(writer) = writer {
                let failed: Vec<String> = record
                    .failed_profiles
                    .iter()
                    .map(|f| f.profile_id.clone())
                    .collect();
                writer.write_round(&RoundInfo {
                    round: record.round,
                    explanation: &record.explanation.text,
                    score: record.score.value,
                    critiques: record.critiques.len(),
                    failed_profiles: &failed,
                    decision: &record.decision.to_string(),
                    reason: &record.reason,
                    timestamp: record.timestamp,
                });
            }

            if let Some(reason) = decision.stop_reason() {
                info!(round, decision = %decision.state, "Refinement finished");
                return Ok((reason, explanation));
            }

            debug!(round, reason = %decision.reason, "Continuing to next round");
            prior = Some(explanation);
            prior_critiques = critiques;
        }
    }

    async fn generate(
        &self,
        problem: &Problem,
        prior: Option<&Explanation>,
        critiques: &[Critique],
        round: usize,
    ) -> Result<Explanation, LoopError> {
        let started = Instant::now();
        let generated = tokio::time::timeout(
            self.call_timeout,
            self.collaborators
                .generator
                .generate(problem, prior, critiques, round),
        )
        .await
        .unwrap_or(Err(CollaboratorError::Timeout(self.call_timeout)));

        let mut explanation = generated.map_err(|e| LoopError::GenerationFailed {
            round,
            reason: e.to_string(),
        })?;
        if explanation.text.trim().is_empty() {
            return Err(LoopError::GenerationFailed {
                round,
                reason: "empty explanation".to_string(),
            });
        }
        explanation.round = round;

        self.logger.log(&LogEvent::ExplanationGenerated {
            round,
            words: explanation.word_count(),
            duration_secs: started.elapsed().as_secs_f64(),
        });
        Ok(explanation)
    }

    /// One critique per profile, concurrently. Failures are recorded, not
    /// raised.
    async fn gather_critiques(
        &self,
        problem: Arc<Problem>,
        explanation: &Explanation,
    ) -> (Vec<Critique>, Vec<ProfileFailure>) {
        let round = explanation.round;
        let mut tasks = JoinSet::new();
        for (index, profile) in self.profiles.iter().enumerate() {
            let critic = Arc::clone(&self.collaborators.critic);
            let problem = Arc::clone(&problem);
            let explanation = explanation.clone();
            let profile = profile.clone();
            let call_timeout = self.call_timeout;

            tasks.spawn(async move {
                let result = tokio::time::timeout(
                    call_timeout,
                    critic.critique(&problem, &explanation, &profile),
                )
                .await
                .unwrap_or(Err(CollaboratorError::Timeout(call_timeout)));
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<Critique, CollaboratorError>>> =
            vec![None; self.profiles.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(round, error = %e, "Critique task aborted"),
            }
        }

        let mut critiques = Vec::new();
        let mut failures = Vec::new();
        for (profile, slot) in self.profiles.iter().zip(slots) {
            let outcome = match slot {
                Some(Ok(critique)) if !critique.clarity.is_finite()
                    || !(0.0..=1.0).contains(&critique.clarity) =>
                {
                    Err(format!("clarity {} is outside [0, 1]", critique.clarity))
                }
                Some(Ok(critique)) => Ok(critique),
                Some(Err(e)) => Err(e.to_string()),
                None => Err("critique task aborted".to_string()),
            };

            match outcome {
                Ok(mut critique) => {
                    critique.profile_id = profile.id.clone();
                    critique.round = round;
                    self.logger.log(&LogEvent::CritiqueReceived {
                        round,
                        profile: profile.id.clone(),
                        clarity: critique.clarity,
                        gaps: critique.gaps.len(),
                    });
                    critiques.push(critique);
                }
                Err(reason) => {
                    let err = LoopError::CritiqueUnavailable {
                        profile: profile.id.clone(),
                        reason: reason.clone(),
                    };
                    warn!(round, error = %err, "Continuing without critique");
                    self.logger.log(&LogEvent::CritiqueFailed {
                        round,
                        profile: profile.id.clone(),
                        error: reason.clone(),
                    });
                    failures.push(ProfileFailure {
                        profile_id: profile.id.clone(),
                        error: reason,
                    });
                }
            }
        }

        (critiques, failures)
    }

    /// Score the critique set. The local scorer always runs first, so an
    /// unusable set fails here whatever the judge would say; a failing judge
    /// falls back to the local score.
    async fn evaluate(
        &self,
        round: usize,
        critiques: &[Critique],
    ) -> Result<(QualityScore, bool), LoopError> {
        let local = self.scorer.score(critiques).map_err(|e| {
            LoopError::InvalidInput(format!("round {} cannot be scored: {}", round, e))
        })?;

        let judged = tokio::time::timeout(
            self.call_timeout,
            self.collaborators.judge.evaluate(critiques),
        )
        .await
        .unwrap_or(Err(CollaboratorError::Timeout(self.call_timeout)))
        .and_then(|score| {
            if score.is_valid() {
                Ok(score)
            } else {
                Err(CollaboratorError::Rejected(format!(
                    "judge score {} is outside [0, 1]",
                    score.value
                )))
            }
        });

        match judged {
            Ok(score) => Ok((score, false)),
            Err(e) => {
                warn!(round, error = %e, "Judge failed, using local scorer");
                self.logger.log(&LogEvent::JudgeFallback {
                    round,
                    error: e.to_string(),
                });
                Ok((local, true))
            }
        }
    }

    fn open_writer(&self, problem_id: &str) -> Option<SessionWriter> {
        let opened = match &self.persistence {
            SessionPersistence::Disabled => return None,
            SessionPersistence::DefaultDir => SessionWriter::new(problem_id),
            SessionPersistence::Dir(dir) => SessionWriter::in_dir(dir, problem_id),
        };
        match opened {
            Ok(writer) => {
                debug!(path = %writer.path().display(), "Writing session log");
                Some(writer)
            }
            Err(e) => {
                warn!(error = %e, "Failed to create session log, continuing without it");
                None
            }
        }
    }

    fn finish(&self, result: &SessionResult, writer: Option<&SessionWriter>) {
        let (mean, variance, gaps) = match &result.grading {
            Some(summary) => (summary.mean, summary.variance, summary.gap_profiles()),
            None => (None, None, Vec::new()),
        };

        match result.error() {
            Some(error) => self.logger.log(&LogEvent::SessionFailed {
                problem_id: result.problem_id.clone(),
                rounds: result.rounds(),
                error: error.to_string(),
            }),
            None => self.logger.log(&LogEvent::SessionCompleted {
                problem_id: result.problem_id.clone(),
                status: result.status.as_str().to_string(),
                rounds: result.rounds(),
                mean_score: mean,
                variance,
                gaps: gaps.len(),
                duration_secs: result.total_duration_secs,
            }),
        }

        if let Some(writer) = writer {
            writer.write_end(&SessionEndInfo {
                status: result.status.as_str(),
                rounds: result.rounds(),
                mean_score: mean,
                variance,
                gaps: &gaps,
                error: result.error(),
                duration_secs: result.total_duration_secs,
            });
        }
    }
}
