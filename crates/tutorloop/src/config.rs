//! Project configuration file support for tutorloop.
//!
//! Loads configuration from `tutorloop.toml` in the working directory.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::Path;

use tutorloop_core::{ConvergenceConfig, ThresholdDirection};

/// The config file name
pub const CONFIG_FILE_NAME: &str = "tutorloop.toml";

/// Project-level configuration loaded from `tutorloop.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Global default agent (applies to every role)
    pub agent: Option<String>,
    /// Global default model (applies to every role)
    pub model: Option<String>,
    #[serde(default)]
    pub teacher: RoleConfig,
    #[serde(default)]
    pub student: RoleConfig,
    #[serde(default)]
    pub judge: RoleConfig,
    #[serde(default)]
    pub grader: RoleConfig,
    /// Compares refined and baseline explanations in `--compare` runs
    #[serde(default)]
    pub pairwise: RoleConfig,
    #[serde(default)]
    pub convergence: ConvergenceTable,
    #[serde(default)]
    pub runner: RunnerTable,
}

/// Configuration for one role
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    pub agent: Option<String>,
    pub model: Option<String>,
}

/// `[convergence]`: any field left out keeps its built-in default
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConvergenceTable {
    pub quality_threshold: Option<f64>,
    pub max_rounds: Option<usize>,
    pub min_rounds: Option<usize>,
    pub improvement_epsilon: Option<f64>,
    pub stagnation_window: Option<usize>,
    pub direction: Option<ThresholdDirection>,
}

impl ConvergenceTable {
    pub fn apply(&self, mut config: ConvergenceConfig) -> ConvergenceConfig {
        if let Some(threshold) = self.quality_threshold {
            config.quality_threshold = threshold;
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
        if let Some(min_rounds) = self.min_rounds {
            config.min_rounds = min_rounds;
        }
        if let Some(epsilon) = self.improvement_epsilon {
            config.improvement_epsilon = Some(epsilon);
        }
        if let Some(window) = self.stagnation_window {
            config.stagnation_window = window;
        }
        if let Some(direction) = self.direction {
            config.direction = direction;
        }
        config
    }
}

/// `[runner]`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RunnerTable {
    pub call_timeout_secs: Option<u64>,
    pub word_cap: Option<usize>,
    pub judge: Option<JudgeKind>,
}

/// Which judge scores the critiques
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JudgeKind {
    /// Weighted mean of the students' own clarity ratings
    #[default]
    Local,
    /// An agent rates how constructive each critique is
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Student,
    Judge,
    Grader,
    Pairwise,
}

impl ProjectConfig {
    /// Load configuration from the working directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(working_dir: &Path) -> Result<Option<Self>> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    fn role(&self, role: Role) -> &RoleConfig {
        match role {
            Role::Teacher => &self.teacher,
            Role::Student => &self.student,
            Role::Judge => &self.judge,
            Role::Grader => &self.grader,
            Role::Pairwise => &self.pairwise,
        }
    }

    /// Priority: role agent > global agent > None
    pub fn agent_for(&self, role: Role) -> Option<&str> {
        self.role(role).agent.as_deref().or(self.agent.as_deref())
    }

    /// Priority: role model > global model > None
    pub fn model_for(&self, role: Role) -> Option<&str> {
        self.role(role).model.as_deref().or(self.model.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) {
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), content).unwrap();
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(ProjectConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_role_overrides_global() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"
agent = "claude"
model = "sonnet"

[student]
agent = "ollama"
model = "llama3.1"

[pairwise]
model = "opus"
"#,
        );
        let config = ProjectConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.agent_for(Role::Teacher), Some("claude"));
        assert_eq!(config.model_for(Role::Teacher), Some("sonnet"));
        assert_eq!(config.agent_for(Role::Student), Some("ollama"));
        assert_eq!(config.model_for(Role::Student), Some("llama3.1"));
        assert_eq!(config.model_for(Role::Grader), Some("sonnet"));
        assert_eq!(config.agent_for(Role::Pairwise), Some("claude"));
        assert_eq!(config.model_for(Role::Pairwise), Some("opus"));
    }

    #[test]
    fn test_convergence_and_runner_tables() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"
[convergence]
max_rounds = 4
improvement_epsilon = 0.02
direction = "at_most"

[runner]
call_timeout_secs = 30
judge = "agent"
"#,
        );
        let config = ProjectConfig::load(dir.path()).unwrap().unwrap();
        let convergence = config.convergence.apply(ConvergenceConfig::default());
        assert_eq!(convergence.max_rounds, 4);
        assert_eq!(convergence.quality_threshold, 0.7);
        assert_eq!(convergence.improvement_epsilon, Some(0.02));
        assert_eq!(convergence.direction, ThresholdDirection::AtMost);
        assert_eq!(config.runner.call_timeout_secs, Some(30));
        assert_eq!(config.runner.judge, Some(JudgeKind::Agent));
    }

    #[test]
    fn test_unknown_field_is_hard_error() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "[convergence]\nmax_round = 4\n");
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
