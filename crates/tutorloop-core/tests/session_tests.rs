use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tutorloop_core::{
    Collaborators, CollaboratorError, ConfigError, ConvergenceConfig, ConvergenceState, Critic,
    Critique, Explanation, ExplanationGenerator, Grader, GradingResult, Judge, LoopError,
    PairwiseJudge, PairwiseJudgement, Preference, Problem, QualityScore, RunMode, RunnerConfig,
    ScorerJudge, SessionPersistence, SessionRunner, SessionStatus, StudentProfile,
};
use tutorloop_logging::Logger;

/// What the generator was asked for in one call
#[derive(Debug, Clone)]
struct GenerateCall {
    round: usize,
    prior: Option<String>,
    critiques: Vec<String>,
}

#[derive(Default)]
struct ScriptedGenerator {
    fail_at_round: Option<usize>,
    fail_for_problem: Option<String>,
    calls: Mutex<Vec<GenerateCall>>,
}

#[async_trait]
impl ExplanationGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        problem: &Problem,
        prior: Option<&Explanation>,
        critiques: &[Critique],
        round: usize,
    ) -> Result<Explanation, CollaboratorError> {
        self.calls.lock().unwrap().push(GenerateCall {
            round,
            prior: prior.map(|p| p.text.clone()),
            critiques: critiques.iter().map(|c| c.profile_id.clone()).collect(),
        });
        if self.fail_at_round == Some(round)
            || self.fail_for_problem.as_deref() == Some(problem.id.as_str())
        {
            return Err(CollaboratorError::Agent("teacher offline".into()));
        }
        Ok(Explanation::new(round, format!("explanation v{}", round)))
    }
}

/// Every profile reports the same clarity, taken from a per-round script
#[derive(Default)]
struct ScriptedCritic {
    clarity_by_round: Vec<f64>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
}

impl ScriptedCritic {
    fn new(clarity_by_round: &[f64]) -> Self {
        Self {
            clarity_by_round: clarity_by_round.to_vec(),
            ..Default::default()
        }
    }

    fn failing_for(mut self, profile: &str) -> Self {
        self.failing.insert(profile.to_string());
        self
    }

    fn delayed(mut self, profile: &str, delay: Duration) -> Self {
        self.delays.insert(profile.to_string(), delay);
        self
    }
}

#[async_trait]
impl Critic for ScriptedCritic {
    async fn critique(
        &self,
        _problem: &Problem,
        explanation: &Explanation,
        profile: &StudentProfile,
    ) -> Result<Critique, CollaboratorError> {
        if let Some(delay) = self.delays.get(&profile.id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&profile.id) {
            return Err(CollaboratorError::Parse("no feedback block".into()));
        }
        let clarity = self
            .clarity_by_round
            .get(explanation.round)
            .or(self.clarity_by_round.last())
            .copied()
            .unwrap_or(0.0);
        Ok(Critique::new(&profile.id, explanation.round, clarity)
            .with_gaps(vec![format!("gap from {}", profile.id)]))
    }
}

struct FailingJudge;

#[async_trait]
impl Judge for FailingJudge {
    async fn evaluate(&self, _critiques: &[Critique]) -> Result<QualityScore, CollaboratorError> {
        Err(CollaboratorError::Agent("judge offline".into()))
    }
}

/// Prefers whichever explanation came from the later round
struct LaterRoundJudge {
    seen: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl PairwiseJudge for LaterRoundJudge {
    async fn compare(
        &self,
        _problem: &Problem,
        refined: &Explanation,
        baseline: &Explanation,
    ) -> Result<PairwiseJudgement, CollaboratorError> {
        self.seen
            .lock()
            .unwrap()
            .push((refined.text.clone(), baseline.text.clone()));
        let preferred = if refined.round > baseline.round {
            Preference::Refined
        } else {
            Preference::Tie
        };
        Ok(PairwiseJudgement::new(preferred).with_rationale("clarity", "later draft"))
    }
}

struct FailingPairwiseJudge;

#[async_trait]
impl PairwiseJudge for FailingPairwiseJudge {
    async fn compare(
        &self,
        _problem: &Problem,
        _refined: &Explanation,
        _baseline: &Explanation,
    ) -> Result<PairwiseJudgement, CollaboratorError> {
        Err(CollaboratorError::Parse("no winner".into()))
    }
}

#[derive(Default)]
struct ScriptedGrader {
    failing: HashSet<String>,
}

#[async_trait]
impl Grader for ScriptedGrader {
    async fn grade(
        &self,
        problem: &Problem,
        _explanation: &Explanation,
        profile: &StudentProfile,
    ) -> Result<GradingResult, CollaboratorError> {
        if self.failing.contains(&profile.id) {
            return Err(CollaboratorError::Timeout(Duration::from_secs(1)));
        }
        // Profiles whose id starts with 'a' answer correctly
        let choice = if profile.id.starts_with('a') {
            problem.correct_choice
        } else {
            (problem.correct_choice + 1) % problem.choices.len()
        };
        Ok(GradingResult::from_choice(&profile.id, problem, choice))
    }
}

fn problem(id: &str) -> Problem {
    Problem::new(
        id,
        "A muon at rest lives 2.2 microseconds. How far does it travel at 0.99c?",
        vec!["660 m".into(), "4.7 km".into(), "47 km".into(), "0 m".into()],
        1,
    )
}

fn profiles(ids: &[&str]) -> Vec<StudentProfile> {
    ids.iter()
        .map(|id| StudentProfile::new(*id, format!("You are the {} student.", id)))
        .collect()
}

fn config(max_rounds: usize, threshold: f64) -> RunnerConfig {
    RunnerConfig::new(
        ConvergenceConfig::default()
            .with_max_rounds(max_rounds)
            .with_threshold(threshold)
            .with_min_rounds(1),
    )
}

struct Harness {
    generator: Arc<ScriptedGenerator>,
    critic: ScriptedCritic,
    judge: Arc<dyn Judge>,
    grader: ScriptedGrader,
    profiles: Vec<StudentProfile>,
    config: RunnerConfig,
}

impl Harness {
    fn new(clarity_by_round: &[f64]) -> Self {
        Self {
            generator: Arc::new(ScriptedGenerator::default()),
            critic: ScriptedCritic::new(clarity_by_round),
            judge: Arc::new(ScorerJudge::default()),
            grader: ScriptedGrader::default(),
            profiles: profiles(&["advanced", "struggling", "practical"]),
            config: config(3, 0.9),
        }
    }

    fn runner(self) -> (SessionRunner, Arc<ScriptedGenerator>) {
        let generator = Arc::clone(&self.generator);
        let collaborators = Collaborators {
            generator: self.generator,
            critic: Arc::new(self.critic),
            judge: self.judge,
            grader: Arc::new(self.grader),
        };
        let runner = SessionRunner::new(
            collaborators,
            self.profiles,
            self.config,
            Arc::new(Logger::silent()),
        )
        .unwrap();
        (runner, generator)
    }
}

#[tokio::test]
async fn test_converges_once_threshold_met() {
    let (runner, _) = Harness::new(&[0.5, 0.95]).runner();
    let result = runner.run(&problem("p1")).await;

    assert_eq!(result.status, SessionStatus::Converged);
    assert_eq!(result.rounds(), 2);
    assert_eq!(result.history[0].decision, ConvergenceState::Continue);
    assert_eq!(result.history[1].decision, ConvergenceState::Converged);
    assert_eq!(result.final_explanation.as_ref().unwrap().text, "explanation v1");
    assert_eq!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_stops_at_round_budget() {
    let (runner, _) = Harness::new(&[0.5, 0.6, 0.7]).runner();
    let result = runner.run(&problem("p1")).await;

    assert_eq!(result.status, SessionStatus::MaxRoundsReached);
    assert_eq!(result.rounds(), 3);
    assert_eq!(result.history[2].decision, ConvergenceState::MaxRoundsReached);
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_round_numbers_are_sequential() {
    let (runner, _) = Harness::new(&[0.1, 0.2, 0.3]).runner();
    let result = runner.run(&problem("p1")).await;

    let rounds: Vec<usize> = result.history.iter().map(|r| r.round).collect();
    assert_eq!(rounds, vec![0, 1, 2]);
    for record in &result.history {
        assert_eq!(record.explanation.round, record.round);
        assert!(record.critiques.iter().all(|c| c.round == record.round));
    }
}

#[tokio::test]
async fn test_grading_gap_excluded_from_statistics() {
    let mut harness = Harness::new(&[0.95]);
    harness.grader.failing.insert("practical".to_string());
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    let grading = result.grading.expect("completed sessions are graded");

    assert_eq!(grading.results.len(), 2);
    assert_eq!(grading.gap_profiles(), vec!["practical".to_string()]);
    // advanced is correct (1.0), struggling is wrong (0.0)
    assert_eq!(grading.mean, Some(0.5));
    assert_eq!(grading.variance, Some(0.25));
}

#[tokio::test]
async fn test_failing_critic_is_absorbed() {
    let mut harness = Harness::new(&[0.5, 0.95]);
    harness.critic = ScriptedCritic::new(&[0.5, 0.95]).failing_for("struggling");
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    assert!(!result.is_failed());
    assert_eq!(result.rounds(), 2);
    for record in &result.history {
        assert_eq!(record.critiques.len(), 2);
        assert_eq!(record.failed_profiles.len(), 1);
        assert_eq!(record.failed_profiles[0].profile_id, "struggling");
        assert!(!record.score.per_profile.contains_key("struggling"));
    }
}

#[tokio::test]
async fn test_every_critic_failing_fails_the_session() {
    let mut harness = Harness::new(&[0.5]);
    harness.profiles = profiles(&["advanced", "struggling"]);
    harness.critic = ScriptedCritic::new(&[0.5])
        .failing_for("advanced")
        .failing_for("struggling");
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    assert!(result.is_failed());
    assert!(result.error().unwrap().contains("cannot be scored"));
    assert!(result.grading.is_none());
    // Round 0 produced an explanation before scoring failed
    assert_eq!(result.rounds(), 0);
}

#[tokio::test]
async fn test_generation_failure_at_round_zero() {
    let mut harness = Harness::new(&[0.5]);
    harness.generator = Arc::new(ScriptedGenerator {
        fail_at_round: Some(0),
        ..Default::default()
    });
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    assert!(result.is_failed());
    assert!(result.final_explanation.is_none());
    assert!(result.history.is_empty());
    assert!(result.error().unwrap().contains("round 0"));
    assert_eq!(result.exit_code(), 2);
}

#[tokio::test]
async fn test_generation_failure_keeps_partial_history() {
    let mut harness = Harness::new(&[0.5, 0.6, 0.7]);
    harness.generator = Arc::new(ScriptedGenerator {
        fail_at_round: Some(1),
        ..Default::default()
    });
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    assert!(result.is_failed());
    assert_eq!(result.rounds(), 1);
    assert_eq!(result.final_explanation.unwrap().text, "explanation v0");
}

#[tokio::test]
async fn test_critic_timeout_is_recorded() {
    let mut harness = Harness::new(&[0.95]);
    harness.critic =
        ScriptedCritic::new(&[0.95]).delayed("practical", Duration::from_secs(30));
    harness.config = config(3, 0.9).with_call_timeout(Duration::from_millis(150));
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    assert_eq!(result.status, SessionStatus::Converged);
    let failures = &result.history[0].failed_profiles;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].profile_id, "practical");
    assert!(failures[0].error.contains("timed out"));
}

#[tokio::test]
async fn test_critiques_follow_roster_order() {
    let mut harness = Harness::new(&[0.95]);
    harness.critic = ScriptedCritic::new(&[0.95])
        .delayed("advanced", Duration::from_millis(60))
        .delayed("struggling", Duration::from_millis(30));
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    let order: Vec<&str> = result.history[0]
        .critiques
        .iter()
        .map(|c| c.profile_id.as_str())
        .collect();
    assert_eq!(order, vec!["advanced", "struggling", "practical"]);
}

#[tokio::test]
async fn test_revision_receives_prior_explanation_and_critiques() {
    let (runner, generator) = Harness::new(&[0.5, 0.95]).runner();
    runner.run(&problem("p1")).await;

    let calls = generator.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].round, 0);
    assert!(calls[0].prior.is_none());
    assert!(calls[0].critiques.is_empty());
    assert_eq!(calls[1].round, 1);
    assert_eq!(calls[1].prior.as_deref(), Some("explanation v0"));
    assert_eq!(calls[1].critiques, vec!["advanced", "struggling", "practical"]);
}

#[tokio::test]
async fn test_judge_failure_falls_back_to_local_scorer() {
    let mut harness = Harness::new(&[0.95]);
    harness.judge = Arc::new(FailingJudge);
    let (runner, _) = harness.runner();

    let result = runner.run(&problem("p1")).await;
    assert_eq!(result.status, SessionStatus::Converged);
    let record = &result.history[0];
    assert!(record.judge_fallback);
    assert!((record.score.value - 0.95).abs() < 1e-12);
}

#[tokio::test]
async fn test_invalid_configuration_rejected_before_running() {
    let build = |profiles: Vec<StudentProfile>, config: RunnerConfig| {
        SessionRunner::new(
            Collaborators {
                generator: Arc::new(ScriptedGenerator::default()),
                critic: Arc::new(ScriptedCritic::new(&[0.5])),
                judge: Arc::new(ScorerJudge::default()),
                grader: Arc::new(ScriptedGrader::default()),
            },
            profiles,
            config,
            Arc::new(Logger::silent()),
        )
    };

    assert!(matches!(
        build(profiles(&["a"]), config(0, 0.9)),
        Err(LoopError::InvalidConfig(ConfigError::MaxRoundsTooSmall))
    ));
    assert!(matches!(
        build(Vec::new(), config(3, 0.9)),
        Err(LoopError::InvalidConfig(ConfigError::EmptyRoster))
    ));
    assert!(matches!(
        build(profiles(&["a", "a"]), config(3, 0.9)),
        Err(LoopError::InvalidConfig(ConfigError::DuplicateProfile(_)))
    ));
    assert!(matches!(
        build(profiles(&["a"]), config(3, 0.9).with_call_timeout(Duration::ZERO)),
        Err(LoopError::InvalidConfig(ConfigError::InvalidTimeout(_)))
    ));
    assert!(matches!(
        build(
            vec![StudentProfile::new("a", "g").with_weight(-1.0)],
            config(3, 0.9)
        ),
        Err(LoopError::InvalidConfig(ConfigError::InvalidWeight { .. }))
    ));
}

#[tokio::test]
async fn test_batch_isolates_failed_sessions() {
    let mut harness = Harness::new(&[0.95]);
    harness.generator = Arc::new(ScriptedGenerator {
        fail_for_problem: Some("broken".into()),
        ..Default::default()
    });
    let (runner, _) = harness.runner();

    let results = runner
        .run_batch(&[problem("broken"), problem("fine")])
        .await;
    assert_eq!(results.len(), 2);
    assert!(results[0].is_failed());
    assert_eq!(results[1].problem_id, "fine");
    assert_eq!(results[1].status, SessionStatus::Converged);
    assert_ne!(results[0].session_id, results[1].session_id);
}

#[tokio::test]
async fn test_invalid_problem_fails_session() {
    let (runner, generator) = Harness::new(&[0.95]).runner();
    let mut bad = problem("p1");
    bad.correct_choice = 9;

    let result = runner.run(&bad).await;
    assert!(result.is_failed());
    assert!(generator.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_log_persisted() {
    let dir = TempDir::new().unwrap();
    let (runner, _) = Harness::new(&[0.5, 0.95]).runner();
    let runner = runner.with_persistence(SessionPersistence::Dir(dir.path().to_path_buf()));

    runner.run(&problem("p1")).await;

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);

    let content = std::fs::read_to_string(&files[0]).unwrap();
    let types: Vec<String> = content
        .lines()
        .map(|l| {
            let value: serde_json::Value = serde_json::from_str(l).unwrap();
            value["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(types, vec!["session_start", "round", "round", "session_end"]);
}

#[tokio::test]
async fn test_round_zero_is_always_refined_once() {
    let (runner, generator) = Harness::new(&[0.95]).runner();
    let result = runner.run(&problem("p1")).await;

    assert_eq!(result.status, SessionStatus::Converged);
    assert_eq!(result.rounds(), 2);
    assert_eq!(result.history[0].decision, ConvergenceState::Continue);
    assert_eq!(result.history[1].decision, ConvergenceState::Converged);
    assert_eq!(generator.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_baseline_generates_once_and_grades() {
    let (runner, generator) = Harness::new(&[0.1]).runner();
    let result = runner.run_baseline(&problem("p1")).await;

    assert_eq!(result.status, SessionStatus::Baseline);
    assert!(result.history.is_empty());
    assert_eq!(result.final_explanation.as_ref().unwrap().text, "explanation v0");
    let grading = result.grading.as_ref().unwrap();
    assert_eq!(grading.results.len(), 3);
    assert_eq!(result.exit_code(), 0);

    let calls = generator.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].prior.is_none());
    assert!(calls[0].critiques.is_empty());
}

#[tokio::test]
async fn test_baseline_generation_failure() {
    let mut harness = Harness::new(&[0.5]);
    harness.generator = Arc::new(ScriptedGenerator {
        fail_at_round: Some(0),
        ..Default::default()
    });
    let (runner, _) = harness.runner();

    let result = runner.run_baseline(&problem("p1")).await;
    assert!(result.is_failed());
    assert!(result.grading.is_none());
    assert_eq!(result.exit_code(), 2);
}

#[tokio::test]
async fn test_compare_records_pairwise_judgement() {
    let (runner, _) = Harness::new(&[0.5, 0.95]).runner();
    let judge = Arc::new(LaterRoundJudge {
        seen: Mutex::new(Vec::new()),
    });
    let runner = runner
        .with_pairwise_judge(judge.clone())
        .with_mode(RunMode::Compare);

    let results = runner.run_batch(&[problem("p1")]).await;
    let result = &results[0];
    assert_eq!(result.status, SessionStatus::Converged);

    let comparison = result.comparison.as_ref().expect("compared sessions carry a baseline");
    assert_eq!(comparison.baseline.status, SessionStatus::Baseline);
    let judgement = comparison.judgement.as_ref().unwrap();
    assert_eq!(judgement.preferred, Preference::Refined);
    assert_eq!(judgement.rationales["clarity"], "later draft");
    assert!(comparison.judge_error.is_none());
    assert_eq!(comparison.grading_gain(result), Some(0.0));

    let seen = judge.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![("explanation v1".to_string(), "explanation v0".to_string())]
    );
}

#[tokio::test]
async fn test_compare_keeps_baseline_when_judge_fails() {
    let (runner, _) = Harness::new(&[0.5, 0.95]).runner();
    let runner = runner.with_pairwise_judge(Arc::new(FailingPairwiseJudge));

    let result = runner.run_compared(&problem("p1")).await;
    let comparison = result.comparison.as_ref().unwrap();
    assert!(comparison.judgement.is_none());
    assert!(comparison.judge_error.as_deref().unwrap().contains("no winner"));
    assert!(comparison.baseline.grading.is_some());
    assert_eq!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_compare_skips_judge_when_refinement_fails() {
    let mut harness = Harness::new(&[0.5, 0.6, 0.7]);
    harness.generator = Arc::new(ScriptedGenerator {
        fail_at_round: Some(1),
        ..Default::default()
    });
    let (runner, _) = harness.runner();
    let judge = Arc::new(LaterRoundJudge {
        seen: Mutex::new(Vec::new()),
    });
    let runner = runner.with_pairwise_judge(judge.clone());

    let result = runner.run_compared(&problem("p1")).await;
    assert!(result.is_failed());
    let comparison = result.comparison.as_ref().unwrap();
    assert_eq!(comparison.baseline.status, SessionStatus::Baseline);
    assert!(comparison.judgement.is_none());
    assert!(judge.seen.lock().unwrap().is_empty());
    assert_eq!(result.exit_code(), 2);
}

#[tokio::test]
async fn test_baseline_batch_mode() {
    let (runner, _) = Harness::new(&[0.5]).runner();
    let runner = runner.with_mode(RunMode::Baseline);

    let results = runner.run_batch(&[problem("a"), problem("b")]).await;
    assert!(results.iter().all(|r| r.is_baseline()));
    assert!(results.iter().all(|r| r.comparison.is_none()));
}
