use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured log events for a refinement session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    SessionStarted {
        session_id: String,
        problem_id: String,
        question_preview: String,
        profiles: Vec<String>,
        max_rounds: usize,
        quality_threshold: f64,
    },
    ExplanationGenerated {
        round: usize,
        words: usize,
        duration_secs: f64,
    },
    CritiqueReceived {
        round: usize,
        profile: String,
        clarity: f64,
        gaps: usize,
    },
    CritiqueFailed {
        round: usize,
        profile: String,
        error: String,
    },
    /// The external judge failed and the local scorer was used instead
    JudgeFallback {
        round: usize,
        error: String,
    },
    RoundScored {
        round: usize,
        score: f64,
        critiques: usize,
        failed_profiles: usize,
        decision: String,
        reason: String,
    },
    GradingCompleted {
        profile: String,
        score: f64,
    },
    GradingFailed {
        profile: String,
        error: String,
    },
    SessionCompleted {
        problem_id: String,
        status: String,
        rounds: usize,
        mean_score: Option<f64>,
        variance: Option<f64>,
        gaps: usize,
        duration_secs: f64,
    },
    SessionFailed {
        problem_id: String,
        rounds: usize,
        error: String,
    },
    /// A single unrefined explanation is being produced for comparison
    BaselineStarted {
        problem_id: String,
    },
    PairwiseJudged {
        problem_id: String,
        preferred: String,
    },
    PairwiseFailed {
        problem_id: String,
        error: String,
    },
}

impl LogEvent {
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON lines for machine consumption
    Json,
    /// Single-line text
    Compact,
    /// File logging only, nothing on the console
    Silent,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            "silent" => Ok(LogFormat::Silent),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for session events; writes to the console and optionally a file
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// A logger that discards console output
    pub fn silent() -> Self {
        Self::new(LogFormat::Silent)
    }

    /// Create a logger that also appends JSON lines to `log_path`
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let _ = writeln!(file, "{}", event.with_timestamp());
            }
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
            LogFormat::Silent => {}
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::SessionStarted {
                problem_id,
                question_preview,
                profiles,
                max_rounds,
                quality_threshold,
                ..
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} {}",
                    "▶ tutorloop".bold().bright_blue(),
                    problem_id.bright_white()
                );
                let _ = writeln!(stderr, "  {} {}", "Question:".dimmed(), question_preview.dimmed());
                let _ = writeln!(
                    stderr,
                    "  {} {}  {} {}  {} {:.2}",
                    "Profiles:".dimmed(),
                    profiles.join(", "),
                    "Max rounds:".dimmed(),
                    max_rounds,
                    "Threshold:".dimmed(),
                    quality_threshold
                );
                let _ = writeln!(stderr);
            }
            LogEvent::ExplanationGenerated {
                round,
                words,
                duration_secs,
            } => {
                let header = format!("─ Round {} ", round);
                let padding = "─".repeat(60usize.saturating_sub(header.chars().count()));
                let _ = writeln!(stderr, "{}{}", header.bright_blue().bold(), padding.bright_blue());
                let _ = writeln!(
                    stderr,
                    "  {} {} words ({:.1}s)",
                    "✎ TEACHER".bright_cyan().bold(),
                    words,
                    duration_secs
                );
            }
            LogEvent::CritiqueReceived {
                profile,
                clarity,
                gaps,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {:<24} clarity {:.2}  {} {}",
                    "✓".bright_green(),
                    profile,
                    clarity,
                    gaps,
                    if *gaps == 1 { "gap" } else { "gaps" }
                );
            }
            LogEvent::CritiqueFailed { profile, error, .. } => {
                let _ = writeln!(
                    stderr,
                    "    {} {:<24} {}",
                    "✗".bright_red(),
                    profile,
                    error.bright_red()
                );
            }
            LogEvent::JudgeFallback { error, .. } => {
                let _ = writeln!(
                    stderr,
                    "    {} judge unavailable, using local scorer: {}",
                    "⚠".bright_yellow(),
                    error
                );
            }
            LogEvent::RoundScored {
                score,
                decision,
                reason,
                ..
            } => {
                let line = format!("Score {:.3} → {} ({})", score, decision, reason);
                let styled = if decision == "continue" {
                    line.bright_yellow()
                } else {
                    line.bright_green()
                };
                let _ = writeln!(stderr, "  {}", styled);
                let _ = writeln!(stderr);
            }
            LogEvent::GradingCompleted { profile, score } => {
                let _ = writeln!(
                    stderr,
                    "  {} {:<24} {:.2}",
                    "◆ GRADE".bright_magenta(),
                    profile,
                    score
                );
            }
            LogEvent::GradingFailed { profile, error } => {
                let _ = writeln!(
                    stderr,
                    "  {} {:<24} {}",
                    "◆ GRADE".bright_magenta(),
                    profile,
                    format!("missing: {}", error).bright_red()
                );
            }
            LogEvent::SessionCompleted { .. } => {
                // The binary prints the final summary
            }
            LogEvent::SessionFailed { rounds, error, .. } => {
                let _ = writeln!(
                    stderr,
                    "{} Session failed after {} round(s): {}",
                    "✗".bright_red(),
                    rounds,
                    error.bright_red()
                );
            }
            LogEvent::BaselineStarted { problem_id } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} {}",
                    "▶ baseline".bold().bright_blue(),
                    problem_id.bright_white()
                );
            }
            LogEvent::PairwiseJudged { preferred, .. } => {
                let _ = writeln!(
                    stderr,
                    "  {} preferred: {}",
                    "⚖ PAIRWISE".bright_cyan().bold(),
                    preferred.bright_white()
                );
            }
            LogEvent::PairwiseFailed { error, .. } => {
                let _ = writeln!(
                    stderr,
                    "  {} no verdict: {}",
                    "⚖ PAIRWISE".bright_cyan().bold(),
                    error.bright_red()
                );
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::SessionStarted { problem_id, .. } => {
                format!("[{}] session:start {}", timestamp, problem_id)
            }
            LogEvent::ExplanationGenerated { round, words, .. } => {
                format!("[{}] teacher:{} {}w", timestamp, round, words)
            }
            LogEvent::CritiqueReceived {
                round,
                profile,
                clarity,
                ..
            } => format!(
                "[{}] critique:{}:{} clarity={:.2}",
                timestamp, round, profile, clarity
            ),
            LogEvent::CritiqueFailed {
                round,
                profile,
                error,
            } => format!("[{}] critique:{}:{} failed {}", timestamp, round, profile, error),
            LogEvent::JudgeFallback { round, .. } => {
                format!("[{}] judge:{} fallback", timestamp, round)
            }
            LogEvent::RoundScored {
                round,
                score,
                decision,
                ..
            } => format!("[{}] round:{} {:.3} {}", timestamp, round, score, decision),
            LogEvent::GradingCompleted { profile, score } => {
                format!("[{}] grade:{} {:.2}", timestamp, profile, score)
            }
            LogEvent::GradingFailed { profile, .. } => {
                format!("[{}] grade:{} gap", timestamp, profile)
            }
            LogEvent::SessionCompleted {
                problem_id,
                status,
                rounds,
                ..
            } => format!(
                "[{}] session:done {} {} rounds={}",
                timestamp, problem_id, status, rounds
            ),
            LogEvent::SessionFailed {
                problem_id, error, ..
            } => format!("[{}] session:failed {} {}", timestamp, problem_id, error),
            LogEvent::BaselineStarted { problem_id } => {
                format!("[{}] baseline:start {}", timestamp, problem_id)
            }
            LogEvent::PairwiseJudged {
                problem_id,
                preferred,
            } => format!("[{}] pairwise:{} {}", timestamp, problem_id, preferred),
            LogEvent::PairwiseFailed { problem_id, error } => format!(
                "[{}] pairwise:{} failed {}",
                timestamp, problem_id, error
            ),
        };
        let _ = writeln!(std::io::stderr(), "{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_logging_writes_timestamped_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("run.jsonl");
        let logger = Logger::with_file(LogFormat::Silent, &path).unwrap();

        logger.log(&LogEvent::RoundScored {
            round: 1,
            score: 0.8,
            critiques: 3,
            failed_profiles: 0,
            decision: "converged".into(),
            reason: "threshold met".into(),
        });

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(value["event"], "round_scored");
        assert_eq!(value["round"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("silent".parse::<LogFormat>().unwrap(), LogFormat::Silent);
        assert!("fancy".parse::<LogFormat>().is_err());
    }
}
