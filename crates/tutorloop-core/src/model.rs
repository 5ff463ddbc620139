use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A multiple-choice question to build an explanation for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub question: String,
    pub choices: Vec<String>,
    /// Index into `choices`
    pub correct_choice: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl Problem {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        choices: Vec<String>,
        correct_choice: usize,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            choices,
            correct_choice,
            subject: None,
            difficulty: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = Some(difficulty.into());
        self
    }

    pub fn correct_answer(&self) -> Option<&str> {
        self.choices.get(self.correct_choice).map(String::as_str)
    }

    /// Check the problem can be explained and graded
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("problem id is empty".to_string());
        }
        if self.question.trim().is_empty() {
            return Err(format!("problem '{}' has an empty question", self.id));
        }
        if self.choices.is_empty() {
            return Err(format!("problem '{}' has no answer choices", self.id));
        }
        if self.correct_choice >= self.choices.len() {
            return Err(format!(
                "problem '{}' marks choice {} correct but has only {} choices",
                self.id,
                self.correct_choice,
                self.choices.len()
            ));
        }
        Ok(())
    }
}

fn default_weight() -> f64 {
    1.0
}

/// A simulated learner. Profiles are data: one critic capability is invoked
/// once per profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    /// Persona description given to the model playing this student
    pub guidelines: String,
    #[serde(default)]
    pub traits: BTreeMap<String, String>,
    /// Share of the class this profile represents
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl StudentProfile {
    pub fn new(id: impl Into<String>, guidelines: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            guidelines: guidelines.into(),
            traits: BTreeMap::new(),
            weight: default_weight(),
        }
    }

    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn trait_pairs(&self) -> Vec<(String, String)> {
        self.traits
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The five personas used when no profiles file is given
    pub fn default_roster() -> Vec<StudentProfile> {
        vec![
            StudentProfile::new(
                "advanced",
                "You are an advanced student. You pick up concepts quickly, want technical \
                 depth and edge cases, and get frustrated by oversimplification.",
            )
            .with_trait("background", "strong")
            .with_trait("rigor", "high"),
            StudentProfile::new(
                "struggling",
                "You are a struggling student. You need concrete examples and small steps, \
                 and jargon or abstraction loses you quickly.",
            )
            .with_trait("background", "weak")
            .with_trait("rigor", "low"),
            StudentProfile::new(
                "practical",
                "You are an applied learner. You want to see where an idea shows up in real \
                 experiments or devices and lose patience with pure theory.",
            )
            .with_trait("background", "moderate"),
            StudentProfile::new(
                "theoretical",
                "You are a mathematically minded learner. You want formal definitions, \
                 stated assumptions, and derivations where they matter.",
            )
            .with_trait("background", "strong")
            .with_trait("rigor", "very high"),
            StudentProfile::new(
                "skeptical_misconception",
                "You are a skeptic who hunts for misconceptions. You look for failure cases, \
                 ask for counterexamples, and flag phrasings that could mislead, quoting the \
                 exact words you object to.",
            )
            .with_trait("misconceptions", "flags likely misunderstandings"),
        ]
    }
}

/// One version of the explanation. Each round produces a new instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// 0 for the initial explanation, +1 per revision
    pub round: usize,
    pub text: String,
}

impl Explanation {
    pub fn new(round: usize, text: impl Into<String>) -> Self {
        Self {
            round,
            text: text.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// One student's critique of one explanation version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub profile_id: String,
    /// Round of the explanation this critique is about
    pub round: usize,
    pub feedback: String,
    /// 0.0 - 1.0; 1.0 means the student found nothing left to fix
    pub clarity: f64,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub requests: Vec<String>,
}

impl Critique {
    pub fn new(profile_id: impl Into<String>, round: usize, clarity: f64) -> Self {
        Self {
            profile_id: profile_id.into(),
            round,
            feedback: String::new(),
            clarity,
            gaps: Vec::new(),
            requests: Vec::new(),
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn with_gaps(mut self, gaps: Vec<String>) -> Self {
        self.gaps = gaps;
        self
    }

    pub fn with_requests(mut self, requests: Vec<String>) -> Self {
        self.requests = requests;
        self
    }

    /// Gaps and requests together, as revision input for the teacher
    pub fn feedback_items(&self) -> impl Iterator<Item = &String> {
        self.gaps.iter().chain(self.requests.iter())
    }

    /// Everything the student said, flattened to one text
    pub fn full_text(&self) -> String {
        let mut text = self.feedback.clone();
        for item in self.feedback_items() {
            if !text.is_empty() {
                text.push_str("\n- ");
            } else {
                text.push_str("- ");
            }
            text.push_str(item);
        }
        text
    }
}

/// A collaborator call that failed for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFailure {
    pub profile_id: String,
    pub error: String,
}

/// How one profile did on the original problem after reading the final
/// explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub profile_id: String,
    /// 0.0 - 1.0
    pub score: f64,
    /// Choice index the student selected, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<usize>,
    pub correct: bool,
}

impl GradingResult {
    pub fn new(profile_id: impl Into<String>, score: f64) -> Self {
        Self {
            profile_id: profile_id.into(),
            score,
            answer: None,
            correct: score >= 1.0,
        }
    }

    /// Grade a selected choice against the problem's answer key
    pub fn from_choice(profile_id: impl Into<String>, problem: &Problem, choice: usize) -> Self {
        let correct = choice == problem.correct_choice;
        Self {
            profile_id: profile_id.into(),
            score: if correct { 1.0 } else { 0.0 },
            answer: Some(choice),
            correct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_problem() -> Problem {
        Problem::new(
            "p1",
            "How fast?",
            vec!["0.5c".into(), "0.8c".into(), "0.9c".into()],
            1,
        )
    }

    #[test]
    fn test_problem_validation() {
        assert!(sample_problem().validate().is_ok());

        let mut bad = sample_problem();
        bad.correct_choice = 3;
        assert!(bad.validate().unwrap_err().contains("only 3 choices"));

        let mut empty = sample_problem();
        empty.choices.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_grading_from_choice() {
        let problem = sample_problem();
        let right = GradingResult::from_choice("advanced", &problem, 1);
        assert!(right.correct);
        assert_eq!(right.score, 1.0);

        let wrong = GradingResult::from_choice("struggling", &problem, 2);
        assert!(!wrong.correct);
        assert_eq!(wrong.answer, Some(2));
    }

    #[test]
    fn test_default_roster_ids_are_unique() {
        let roster = StudentProfile::default_roster();
        let mut ids: Vec<&str> = roster.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        assert!(roster.iter().all(|p| p.weight == 1.0));
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: StudentProfile =
            serde_json::from_str(r#"{"id": "visual", "guidelines": "Likes diagrams."}"#).unwrap();
        assert_eq!(profile.weight, 1.0);
        assert!(profile.traits.is_empty());
    }

    #[test]
    fn test_critique_full_text() {
        let critique = Critique::new("advanced", 0, 0.4)
            .with_feedback("Too shallow.")
            .with_gaps(vec!["edge cases".into()])
            .with_requests(vec!["derive gamma".into()]);
        assert_eq!(critique.full_text(), "Too shallow.\n- edge cases\n- derive gamma");
        assert_eq!(critique.feedback_items().count(), 2);
    }
}
