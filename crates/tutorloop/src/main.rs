mod config;
mod loader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;

use tutorloop_agent::{create_agent, Agent, AgentConfig, AgentType};
use tutorloop_core::{
    AgentCritic, AgentGenerator, AgentGrader, AgentJudge, AgentPairwiseJudge, Collaborators,
    ConvergenceConfig, GradingSummary, Judge, Problem, QualityScorer, RunMode, RunnerConfig, ScorerJudge,
    SessionPersistence, SessionResult, SessionRunner, SessionStatus, StudentProfile,
    ThresholdDirection, DEFAULT_CALL_TIMEOUT, DEFAULT_WORD_CAP,
};
use tutorloop_logging::{init_tracing, LogFormat, Logger};

use crate::config::{JudgeKind, ProjectConfig, Role};

#[derive(Parser, Debug)]
#[command(
    name = "tutorloop",
    about = "Refine explanations until simulated students understand them",
    version,
    author
)]
struct Cli {
    /// JSON file with problems (native or GPQA records)
    #[arg(long, required_unless_present = "question")]
    problems: Option<PathBuf>,

    /// Run only the problem with this id
    #[arg(long, requires = "problems")]
    problem_id: Option<String>,

    /// Ad-hoc question instead of a problems file
    #[arg(long, conflicts_with = "problems", requires_all = ["choice", "correct"])]
    question: Option<String>,

    /// Answer choice for --question (repeat for each choice)
    #[arg(long)]
    choice: Vec<String>,

    /// Letter of the correct choice for --question
    #[arg(long)]
    correct: Option<char>,

    /// JSON file with student personas (default: built-in roster)
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Working directory (default: current directory)
    #[arg(short = 'd', long)]
    working_dir: Option<PathBuf>,

    /// Agent to use for every role
    #[arg(short, long, value_enum)]
    agent: Option<AgentChoice>,

    /// Model to use for every role (if the agent supports it)
    #[arg(short, long)]
    model: Option<String>,

    /// Quality threshold in [0, 1]
    #[arg(long)]
    threshold: Option<f64>,

    /// Maximum rounds, counting the initial explanation
    #[arg(short = 'n', long)]
    max_rounds: Option<usize>,

    /// First round index that may be declared converged
    #[arg(long)]
    min_rounds: Option<usize>,

    /// Stop when the score improves by less than this for consecutive rounds
    #[arg(long)]
    epsilon: Option<f64>,

    /// Whether a higher or lower score is better
    #[arg(long, value_enum)]
    direction: Option<DirectionChoice>,

    /// Which judge scores each round
    #[arg(long, value_enum)]
    judge: Option<JudgeKind>,

    /// Grade a single unrefined explanation instead of refining
    #[arg(long, conflicts_with = "compare")]
    baseline: bool,

    /// Run refinement and the baseline, then judge them head-to-head
    #[arg(long)]
    compare: bool,

    /// Timeout for each collaborator call, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormatChoice,

    /// Also append JSON log events to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Output final results as JSON on stdout
    #[arg(long)]
    json_output: bool,

    /// Write final results as JSON to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not write session JSONL files
    #[arg(long)]
    no_session_log: bool,

    /// Dry run: show what would happen without executing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AgentChoice {
    Claude,
    Ollama,
}

impl From<AgentChoice> for AgentType {
    fn from(choice: AgentChoice) -> Self {
        match choice {
            AgentChoice::Claude => AgentType::ClaudeCode,
            AgentChoice::Ollama => AgentType::Ollama,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionChoice {
    AtLeast,
    AtMost,
}

impl From<DirectionChoice> for ThresholdDirection {
    fn from(choice: DirectionChoice) -> Self {
        match choice {
            DirectionChoice::AtLeast => ThresholdDirection::AtLeast,
            DirectionChoice::AtMost => ThresholdDirection::AtMost,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

/// Agent and model chosen for one role
struct RoleSetup {
    agent_type: AgentType,
    config: AgentConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let working_dir = match cli.working_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_format: LogFormat = cli.log_format.into();
    init_tracing("warn", log_format);

    let project = ProjectConfig::load(&working_dir)?.unwrap_or_default();

    let problems = get_problems(&cli, &working_dir)?;
    let profiles = match &cli.profiles {
        Some(path) => loader::load_profiles(&resolve(&working_dir, path))?,
        None => StudentProfile::default_roster(),
    };

    let convergence = convergence_config(&cli, &project);
    let call_timeout = cli
        .timeout_secs
        .or(project.runner.call_timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CALL_TIMEOUT);
    let word_cap = project.runner.word_cap.unwrap_or(DEFAULT_WORD_CAP);
    let judge_kind = cli.judge.or(project.runner.judge).unwrap_or_default();

    let teacher = role_setup(&cli, &project, Role::Teacher, &working_dir)?;
    let student = role_setup(&cli, &project, Role::Student, &working_dir)?;
    let judge_setup = role_setup(&cli, &project, Role::Judge, &working_dir)?;
    let grader = role_setup(&cli, &project, Role::Grader, &working_dir)?;
    let pairwise = role_setup(&cli, &project, Role::Pairwise, &working_dir)?;
    let mode = if cli.baseline {
        RunMode::Baseline
    } else if cli.compare {
        RunMode::Compare
    } else {
        RunMode::Refine
    };

    if cli.dry_run {
        println!("=== Dry Run ===");
        println!("Working dir: {}", working_dir.display());
        println!("Mode: {}", mode);
        println!("Problems: {}", problems.len());
        for problem in &problems {
            println!("  {} ({} choices)", problem.id, problem.choices.len());
        }
        let ids: Vec<&str> = profiles.iter().map(|p| p.id.as_str()).collect();
        println!("Profiles: {}", ids.join(", "));
        println!("Teacher: {}", describe(&teacher));
        println!("Students: {}", describe(&student));
        match judge_kind {
            JudgeKind::Local => println!("Judge: local scorer"),
            JudgeKind::Agent => println!("Judge: {}", describe(&judge_setup)),
        }
        println!("Grader: {}", describe(&grader));
        if mode == RunMode::Compare {
            println!("Pairwise judge: {}", describe(&pairwise));
        }
        println!(
            "Threshold: {} ({})  Max rounds: {}  Earliest convergence: round {}",
            convergence.quality_threshold,
            convergence.direction,
            convergence.max_rounds,
            convergence.min_rounds
        );
        if let Some(epsilon) = convergence.improvement_epsilon {
            println!(
                "Stagnation: improvement < {} for {} rounds",
                epsilon, convergence.stagnation_window
            );
        }
        println!("Call timeout: {}s", call_timeout.as_secs());
        return Ok(());
    }

    let logger = Arc::new(match &cli.log_file {
        Some(path) => Logger::with_file(log_format, path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?,
        None => Logger::new(log_format),
    });

    let mut needed = vec![&teacher, &student, &grader];
    if judge_kind == JudgeKind::Agent && mode != RunMode::Baseline {
        needed.push(&judge_setup);
    }
    if mode == RunMode::Compare {
        needed.push(&pairwise);
    }
    let agents = connect_agents(&needed).await?;

    let judge: Arc<dyn Judge> = match judge_kind {
        JudgeKind::Agent if mode != RunMode::Baseline => Arc::new(AgentJudge::new(
            shared_agent(&agents, &judge_setup)?,
            judge_setup.config,
            QualityScorer::for_profiles(&profiles).context("Invalid profile weights")?,
        )),
        _ => Arc::new(ScorerJudge::new(
            QualityScorer::for_profiles(&profiles).context("Invalid profile weights")?,
        )),
    };
    let collaborators = Collaborators {
        generator: Arc::new(
            AgentGenerator::new(shared_agent(&agents, &teacher)?, teacher.config)
                .with_word_cap(word_cap),
        ),
        critic: Arc::new(AgentCritic::new(shared_agent(&agents, &student)?, student.config)),
        judge,
        grader: Arc::new(AgentGrader::new(shared_agent(&agents, &grader)?, grader.config)),
    };

    let runner_config = RunnerConfig::new(convergence).with_call_timeout(call_timeout);
    let persistence = if cli.no_session_log {
        SessionPersistence::Disabled
    } else {
        SessionPersistence::DefaultDir
    };
    let mut runner = SessionRunner::new(collaborators, profiles, runner_config, logger)
        .context("Invalid configuration")?
        .with_persistence(persistence)
        .with_mode(mode);
    if mode == RunMode::Compare {
        runner = runner.with_pairwise_judge(Arc::new(AgentPairwiseJudge::new(
            shared_agent(&agents, &pairwise)?,
            pairwise.config,
        )));
    }

    let results = runner.run_batch(&problems).await;

    if cli.json_output || cli.output.is_some() {
        let json = serde_json::to_string_pretty(&results)?;
        if let Some(path) = &cli.output {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        if cli.json_output {
            println!("{}", json);
        }
    }
    if !cli.json_output {
        for result in &results {
            print_outcome(result);
        }
    }

    let exit_code = results.iter().map(SessionResult::exit_code).max().unwrap_or(0);
    std::process::exit(exit_code);
}

/// Create one agent per backend the roles use and check each is installed.
/// Roles on the same backend share the agent.
async fn connect_agents(roles: &[&RoleSetup]) -> Result<HashMap<AgentType, Arc<dyn Agent>>> {
    let mut agents: HashMap<AgentType, Arc<dyn Agent>> = HashMap::new();
    for role in roles {
        if agents.contains_key(&role.agent_type) {
            continue;
        }
        let agent: Arc<dyn Agent> = Arc::from(create_agent(role.agent_type));
        if !agent.is_available().await {
            bail!(
                "Agent '{}' is not available. Make sure it's installed and in PATH.",
                agent.name()
            );
        }
        tracing::debug!(agent = agent.name(), "Agent available");
        agents.insert(role.agent_type, agent);
    }
    Ok(agents)
}

fn shared_agent(
    agents: &HashMap<AgentType, Arc<dyn Agent>>,
    role: &RoleSetup,
) -> Result<Arc<dyn Agent>> {
    agents
        .get(&role.agent_type)
        .cloned()
        .with_context(|| format!("Agent '{}' was not connected", role.agent_type))
}

fn resolve(working_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

fn describe(role: &RoleSetup) -> String {
    match &role.config.model {
        Some(model) => format!("{} ({})", role.agent_type, model),
        None => role.agent_type.to_string(),
    }
}

/// CLI > role table > global file value > claude
fn role_setup(
    cli: &Cli,
    project: &ProjectConfig,
    role: Role,
    working_dir: &Path,
) -> Result<RoleSetup> {
    let agent_type = match (cli.agent, project.agent_for(role)) {
        (Some(choice), _) => choice.into(),
        (None, Some(name)) => name
            .parse::<AgentType>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid agent for {:?} in config", role))?,
        (None, None) => AgentType::ClaudeCode,
    };
    let model = cli
        .model
        .clone()
        .or_else(|| project.model_for(role).map(String::from));

    Ok(RoleSetup {
        agent_type,
        config: AgentConfig::new(working_dir.to_path_buf()).with_optional_model(model),
    })
}

/// Built-in defaults, then the `[convergence]` table, then CLI flags
fn convergence_config(cli: &Cli, project: &ProjectConfig) -> ConvergenceConfig {
    let mut config = project.convergence.apply(ConvergenceConfig::default());
    if let Some(threshold) = cli.threshold {
        config.quality_threshold = threshold;
    }
    if let Some(max_rounds) = cli.max_rounds {
        config.max_rounds = max_rounds;
    }
    if let Some(min_rounds) = cli.min_rounds {
        config.min_rounds = min_rounds;
    }
    if let Some(epsilon) = cli.epsilon {
        config.improvement_epsilon = Some(epsilon);
    }
    if let Some(direction) = cli.direction {
        config.direction = direction.into();
    }
    config
}

fn get_problems(cli: &Cli, working_dir: &Path) -> Result<Vec<Problem>> {
    if let Some(ref question) = cli.question {
        let correct = cli
            .correct
            .map(|c| c.to_ascii_uppercase())
            .filter(char::is_ascii_uppercase)
            .context("--correct must be a choice letter")?;
        let problem = Problem::new(
            "adhoc",
            question.clone(),
            cli.choice.clone(),
            (correct as u8 - b'A') as usize,
        );
        problem.validate().map_err(anyhow::Error::msg)?;
        return Ok(vec![problem]);
    }

    let Some(ref path) = cli.problems else {
        bail!("No problems provided. Use --problems or --question");
    };
    let problems = loader::load_problems(&resolve(working_dir, path))?;
    match &cli.problem_id {
        Some(id) => loader::select_problem(problems, id),
        None => Ok(problems),
    }
}

fn print_grading(label: &str, grading: &GradingSummary) {
    match (grading.mean, grading.variance) {
        (Some(mean), Some(variance)) => eprintln!(
            "{}: {}/{} correct, mean {:.2}, variance {:.3}",
            label,
            grading.correct_count(),
            grading.results.len(),
            mean,
            variance
        ),
        _ => eprintln!("{}: no results", label),
    }
    if grading.has_gaps() {
        eprintln!("Missing grades: {}", grading.gap_profiles().join(", "));
    }
}

fn print_outcome(result: &SessionResult) {
    eprintln!();
    match &result.status {
        SessionStatus::Converged => {
            eprintln!("{} {}", "=== CONVERGED ===".bright_green().bold(), result.problem_id);
        }
        SessionStatus::MaxRoundsReached => {
            eprintln!("{} {}", "=== MAX ROUNDS ===".bright_yellow().bold(), result.problem_id);
        }
        SessionStatus::Baseline => {
            eprintln!("{} {}", "=== BASELINE ===".bright_cyan().bold(), result.problem_id);
        }
        SessionStatus::Failed { error } => {
            eprintln!("{} {}", "=== FAILED ===".bright_red().bold(), result.problem_id);
            eprintln!("Error after {} round(s): {}", result.rounds(), error);
        }
    }

    if !result.is_baseline() {
        eprintln!("Rounds: {}", result.rounds());
    }
    if let Some(score) = result.final_score() {
        eprintln!("Final score: {:.3}", score);
    }
    if let Some(grading) = &result.grading {
        print_grading("Grading", grading);
    }
    if let Some(comparison) = &result.comparison {
        match &comparison.baseline.grading {
            Some(grading) => print_grading("Baseline grading", grading),
            None => eprintln!(
                "Baseline: {}",
                comparison.baseline.error().unwrap_or("no grading")
            ),
        }
        if let Some(gain) = comparison.grading_gain(result) {
            eprintln!("Gain over baseline: {:+.2}", gain);
        }
        match (&comparison.judgement, &comparison.judge_error) {
            (Some(judgement), _) => {
                eprintln!("Pairwise judge prefers: {}", judgement.preferred.to_string().bold());
                for (criterion, rationale) in &judgement.rationales {
                    eprintln!("  {}: {}", criterion.dimmed(), rationale);
                }
            }
            (None, Some(error)) => eprintln!("Pairwise judge: {}", error.bright_red()),
            (None, None) => {}
        }
    }
    eprintln!("Duration: {:.1}s", result.total_duration_secs);
    if let Some(explanation) = &result.final_explanation {
        eprintln!();
        eprintln!("{}", explanation.text);
    }
}
