use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::{Agent, AgentConfig, AgentError, AgentOutput, AgentType, ProcessSpawner};

pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";

/// Local model served by `ollama run`
pub struct OllamaAgent {
    binary_path: PathBuf,
}

impl OllamaAgent {
    pub fn new() -> Self {
        Self {
            binary_path: PathBuf::from("ollama"),
        }
    }

    pub fn with_binary_path(path: PathBuf) -> Self {
        Self { binary_path: path }
    }
}

impl Default for OllamaAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for OllamaAgent {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Ollama
    }

    fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn execute(&self, prompt: &str, config: &AgentConfig) -> Result<AgentOutput, AgentError> {
        let model = config.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL);
        debug!(
            agent = self.name(),
            model,
            prompt_len = prompt.len(),
            "Executing agent"
        );

        let args = ["run", "--nowordwrap", model, prompt];
        ProcessSpawner::spawn(&self.binary_path, &args, config).await
    }
}
