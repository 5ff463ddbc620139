use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::parsing::{extract_json_block, normalize_whitespace};

/// Maximum length of free-text feedback kept from a fallback parse
const FALLBACK_FEEDBACK_LEN: usize = 500;

/// A simulated student's reaction to one explanation version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentFeedback {
    /// How clear the explanation was to this student (0.0 - 1.0).
    /// 1.0 means nothing is left to fix.
    pub clarity: f64,
    /// Free-text classroom response
    #[serde(default)]
    pub feedback: String,
    /// Concepts or steps the student could not follow
    #[serde(default)]
    pub gaps: Vec<String>,
    /// Concrete revision requests
    #[serde(default)]
    pub requests: Vec<String>,
}

#[derive(Error, Debug)]
pub enum FeedbackParseError {
    #[error("No feedback block found in student output")]
    NoFeedbackFound,

    #[error("Failed to parse feedback JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid feedback format: {0}")]
    InvalidFormat(String),
}

impl StudentFeedback {
    /// Parse feedback from a student's output text
    ///
    /// Expected format:
    /// ```text
    /// <feedback>
    /// {"clarity": 0.6, "feedback": "...", "gaps": ["..."], "requests": ["..."]}
    /// </feedback>
    /// ```
    /// A reply that only says "I understand" counts as full clarity.
    pub fn parse(student_output: &str) -> Result<Self, FeedbackParseError> {
        debug!(output_len = student_output.len(), "Parsing student feedback");

        if let Some(feedback) = Self::parse_feedback_block(student_output)? {
            return Ok(feedback.normalized());
        }

        if let Some(feedback) = extract_json_block::<StudentFeedback>(student_output) {
            debug!("Parsed feedback from bare JSON");
            return Ok(feedback.normalized());
        }

        Self::parse_simple_markers(student_output)
    }

    fn parse_feedback_block(output: &str) -> Result<Option<Self>, FeedbackParseError> {
        const OPEN: &str = "<feedback>";
        const CLOSE: &str = "</feedback>";

        match (output.find(OPEN), output.find(CLOSE)) {
            (Some(start), Some(end)) if start < end => {
                let json_str = output[start + OPEN.len()..end].trim();
                let feedback: StudentFeedback = serde_json::from_str(json_str)?;
                Ok(Some(feedback))
            }
            (Some(_), Some(_)) => Err(FeedbackParseError::InvalidFormat(
                "Malformed feedback block".to_string(),
            )),
            _ => Ok(None),
        }
    }

    fn parse_simple_markers(output: &str) -> Result<Self, FeedbackParseError> {
        let upper = output.to_uppercase();
        let understood = ["I UNDERSTAND", "NO QUESTIONS", "NOTHING TO ADD"];

        if understood.iter().any(|m| upper.contains(m)) && !output.contains('?') {
            debug!("Parsed as full clarity via simple markers");
            return Ok(StudentFeedback {
                clarity: 1.0,
                feedback: truncate(&normalize_whitespace(output), FALLBACK_FEEDBACK_LEN),
                gaps: Vec::new(),
                requests: Vec::new(),
            });
        }

        Err(FeedbackParseError::NoFeedbackFound)
    }

    fn normalized(mut self) -> Self {
        self.clarity = if self.clarity.is_finite() {
            self.clarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.feedback = normalize_whitespace(&self.feedback);
        self.gaps = clean_items(self.gaps);
        self.requests = clean_items(self.requests);
        self
    }

    /// True when the student raised nothing actionable
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty() && self.requests.is_empty()
    }
}

fn clean_items(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| normalize_whitespace(&s))
        .filter(|s| !s.is_empty())
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
