use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Each line type in a session JSONL file.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionLine<'a> {
    SessionStart {
        timestamp: DateTime<Utc>,
        session_id: &'a str,
        problem_id: &'a str,
        question: &'a str,
        profiles: &'a [String],
        quality_threshold: f64,
        max_rounds: usize,
        min_rounds: usize,
    },
    Round {
        round: usize,
        explanation: &'a str,
        score: f64,
        critiques: usize,
        failed_profiles: &'a [String],
        decision: &'a str,
        reason: &'a str,
        timestamp: DateTime<Utc>,
    },
    SessionEnd {
        status: &'a str,
        rounds: usize,
        mean_score: Option<f64>,
        variance: Option<f64>,
        gaps: &'a [String],
        error: Option<&'a str>,
        duration_secs: f64,
        timestamp: DateTime<Utc>,
    },
}

/// Start-of-session fields
pub struct SessionStartInfo<'a> {
    pub session_id: &'a str,
    pub problem_id: &'a str,
    pub question: &'a str,
    pub profiles: &'a [String],
    pub quality_threshold: f64,
    pub max_rounds: usize,
    pub min_rounds: usize,
}

/// One committed round
pub struct RoundInfo<'a> {
    pub round: usize,
    pub explanation: &'a str,
    pub score: f64,
    pub critiques: usize,
    pub failed_profiles: &'a [String],
    pub decision: &'a str,
    pub reason: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// End-of-session fields
pub struct SessionEndInfo<'a> {
    pub status: &'a str,
    pub rounds: usize,
    pub mean_score: Option<f64>,
    pub variance: Option<f64>,
    pub gaps: &'a [String],
    pub error: Option<&'a str>,
    pub duration_secs: f64,
}

/// Writes one session as JSONL, by default under
/// `~/.local/share/tutorloop/sessions/`.
///
/// Takes plain fields rather than core types so this crate stays below
/// `tutorloop-core` in the dependency graph.
pub struct SessionWriter {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl SessionWriter {
    /// Create a writer in the default sessions directory
    pub fn new(problem_id: &str) -> io::Result<Self> {
        Self::in_dir(&Self::sessions_dir()?, problem_id)
    }

    /// Create a writer in `dir`. The file name is the current UTC timestamp
    /// plus a short hash of the problem id.
    pub fn in_dir(dir: &Path, problem_id: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let timestamp_str = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string();

        let mut hasher = Sha256::new();
        hasher.update(problem_id.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let filename = format!("{}_{}.jsonl", timestamp_str, &hash[..6]);
        let path = dir.join(filename);
        let file = File::create(&path)?;

        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_start(&self, info: &SessionStartInfo<'_>) {
        self.write_line(&SessionLine::SessionStart {
            timestamp: Utc::now(),
            session_id: info.session_id,
            problem_id: info.problem_id,
            question: info.question,
            profiles: info.profiles,
            quality_threshold: info.quality_threshold,
            max_rounds: info.max_rounds,
            min_rounds: info.min_rounds,
        });
    }

    pub fn write_round(&self, info: &RoundInfo<'_>) {
        self.write_line(&SessionLine::Round {
            round: info.round,
            explanation: info.explanation,
            score: info.score,
            critiques: info.critiques,
            failed_profiles: info.failed_profiles,
            decision: info.decision,
            reason: info.reason,
            timestamp: info.timestamp,
        });
    }

    pub fn write_end(&self, info: &SessionEndInfo<'_>) {
        self.write_line(&SessionLine::SessionEnd {
            status: info.status,
            rounds: info.rounds,
            mean_score: info.mean_score,
            variance: info.variance,
            gaps: info.gaps,
            error: info.error,
            duration_secs: info.duration_secs,
            timestamp: Utc::now(),
        });
    }

    fn write_line(&self, line: &SessionLine<'_>) {
        if let Ok(json) = serde_json::to_string(line) {
            if let Ok(mut writer) = self.file.lock() {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
    }

    fn sessions_dir() -> io::Result<PathBuf> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine data directory",
            )
        })?;
        Ok(data_dir.join("tutorloop").join("sessions"))
    }
}
