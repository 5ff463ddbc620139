//! Problem and student profile files.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use tutorloop_core::{Problem, StudentProfile};

/// A GPQA cache entry: the correct answer is stored apart from the
/// distractors
#[derive(Debug, Deserialize)]
struct GpqaRecord {
    id: String,
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
    #[serde(default)]
    domain: Option<String>,
}

impl GpqaRecord {
    /// Place the correct answer at a position derived from the id, so the
    /// same file always yields the same choice order
    fn into_problem(self) -> Problem {
        let count = self.incorrect_answers.len() + 1;
        let digest = Sha256::digest(self.id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let position = (u64::from_be_bytes(prefix) % count as u64) as usize;

        let mut choices = self.incorrect_answers;
        choices.insert(position, self.correct_answer);

        let problem = Problem::new(self.id, self.question, choices, position);
        match self.domain {
            Some(domain) => problem.with_subject(domain),
            None => problem,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProblemRecord {
    Native(Problem),
    Gpqa(GpqaRecord),
}

/// Load a JSON array of problems in native or GPQA shape
pub fn load_problems(path: &Path) -> Result<Vec<Problem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read problems file {}", path.display()))?;
    parse_problems(&content).with_context(|| format!("Invalid problems file {}", path.display()))
}

fn parse_problems(content: &str) -> Result<Vec<Problem>> {
    let records: Vec<ProblemRecord> =
        serde_json::from_str(content).context("Expected a JSON array of problems")?;
    if records.is_empty() {
        bail!("no problems found");
    }

    let mut seen = HashSet::new();
    let mut problems = Vec::with_capacity(records.len());
    for record in records {
        let problem = match record {
            ProblemRecord::Native(problem) => problem,
            ProblemRecord::Gpqa(record) => record.into_problem(),
        };
        problem.validate().map_err(anyhow::Error::msg)?;
        if !seen.insert(problem.id.clone()) {
            bail!("duplicate problem id '{}'", problem.id);
        }
        problems.push(problem);
    }
    Ok(problems)
}

/// Keep only the problem with `id`
pub fn select_problem(problems: Vec<Problem>, id: &str) -> Result<Vec<Problem>> {
    let selected: Vec<Problem> = problems.into_iter().filter(|p| p.id == id).collect();
    if selected.is_empty() {
        bail!("no problem with id '{}'", id);
    }
    Ok(selected)
}

#[derive(Debug, Deserialize)]
struct ProfilesFile {
    personas: Vec<Persona>,
    #[serde(default)]
    class_distribution: Option<HashMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
struct Persona {
    name: String,
    #[serde(default)]
    guidelines: String,
    #[serde(default)]
    traits: BTreeMap<String, String>,
}

/// Load student profiles. A persona without guidelines borrows them from
/// the built-in persona of the same name.
pub fn load_profiles(path: &Path) -> Result<Vec<StudentProfile>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profiles file {}", path.display()))?;
    parse_profiles(&content).with_context(|| format!("Invalid profiles file {}", path.display()))
}

fn parse_profiles(content: &str) -> Result<Vec<StudentProfile>> {
    let file: ProfilesFile = serde_json::from_str(content).context("Malformed profiles JSON")?;
    if file.personas.is_empty() {
        bail!("no personas found");
    }

    let builtin: HashMap<String, StudentProfile> = StudentProfile::default_roster()
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let mut profiles = Vec::with_capacity(file.personas.len());
    for persona in file.personas {
        let name = persona.name.trim().to_string();
        if name.is_empty() {
            bail!("persona with an empty name");
        }

        let mut profile = match (persona.guidelines.trim(), builtin.get(&name)) {
            ("", Some(known)) => known.clone(),
            ("", None) => bail!("persona '{}' has no guidelines", name),
            (guidelines, _) => StudentProfile::new(&name, guidelines),
        };
        if !persona.traits.is_empty() {
            profile.traits = persona.traits;
        }

        if let Some(distribution) = &file.class_distribution {
            profile.weight = *distribution
                .get(&name)
                .with_context(|| format!("class_distribution has no weight for '{}'", name))?;
        }
        profiles.push(profile);
    }
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_native_problems() {
        let problems = parse_problems(
            r#"[{"id": "p1", "question": "Q?", "choices": ["a", "b"], "correct_choice": 1,
                 "subject": "relativity"}]"#,
        )
        .unwrap();
        assert_eq!(problems[0].correct_answer(), Some("b"));
        assert_eq!(problems[0].subject.as_deref(), Some("relativity"));
    }

    #[test]
    fn test_gpqa_placement_is_deterministic() {
        let json = r#"[{"id": "rec42", "question": "Q?", "correct_answer": "right",
                        "incorrect_answers": ["w1", "w2", "w3"], "domain": "Physics"}]"#;
        let first = parse_problems(json).unwrap();
        let second = parse_problems(json).unwrap();

        let problem = &first[0];
        assert_eq!(problem.choices.len(), 4);
        assert_eq!(problem.correct_answer(), Some("right"));
        assert_eq!(problem.subject.as_deref(), Some("Physics"));
        assert_eq!(problem.choices, second[0].choices);
    }

    #[test]
    fn test_empty_and_duplicate_problems_rejected() {
        assert!(parse_problems("[]").is_err());
        let dup = r#"[{"id": "p", "question": "Q", "choices": ["a"], "correct_choice": 0},
                      {"id": "p", "question": "Q", "choices": ["a"], "correct_choice": 0}]"#;
        assert!(parse_problems(dup).unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_answer_key_rejected() {
        let json = r#"[{"id": "p", "question": "Q", "choices": ["a"], "correct_choice": 2}]"#;
        assert!(parse_problems(json).is_err());
    }

    #[test]
    fn test_select_problem() {
        let problems = parse_problems(
            r#"[{"id": "a", "question": "Q", "choices": ["x"], "correct_choice": 0},
                {"id": "b", "question": "Q", "choices": ["x"], "correct_choice": 0}]"#,
        )
        .unwrap();
        assert_eq!(select_problem(problems.clone(), "b").unwrap()[0].id, "b");
        assert!(select_problem(problems, "c").is_err());
    }

    #[test]
    fn test_profiles_with_distribution() {
        let profiles = parse_profiles(
            r#"{"personas": [
                    {"name": "struggling"},
                    {"name": "visual", "guidelines": "You think in diagrams.",
                     "traits": {"modality": "visual"}}
                ],
                "class_distribution": {"struggling": 0.7, "visual": 0.3}}"#,
        )
        .unwrap();
        assert_eq!(profiles.len(), 2);
        assert!(profiles[0].guidelines.contains("struggling student"));
        assert_eq!(profiles[0].weight, 0.7);
        assert_eq!(profiles[1].traits.get("modality").map(String::as_str), Some("visual"));
    }

    #[test]
    fn test_profiles_errors() {
        assert!(parse_profiles(r#"{"personas": []}"#).is_err());
        assert!(parse_profiles(r#"{"personas": [{"name": "unknown"}]}"#).is_err());
        let missing_weight = r#"{"personas": [{"name": "advanced"}],
                                 "class_distribution": {"practical": 1.0}}"#;
        assert!(parse_profiles(missing_weight).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("problems.json");
        std::fs::write(
            &path,
            r#"[{"id": "p", "question": "Q", "choices": ["a", "b"], "correct_choice": 0}]"#,
        )
        .unwrap();
        assert_eq!(load_problems(&path).unwrap().len(), 1);
        assert!(load_problems(&dir.path().join("missing.json")).is_err());
    }
}
