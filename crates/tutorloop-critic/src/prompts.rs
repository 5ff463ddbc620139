use std::collections::HashMap;

use crate::parsing::choice_letter;
use crate::verdict::PAIRWISE_CRITERIA;

/// Feedback items kept when building a revision prompt
pub const MAX_FEEDBACK_ITEMS: usize = 6;

/// Feedback items longer than this are cut before ranking
pub const MAX_FEEDBACK_ITEM_CHARS: usize = 200;

/// Prompt templates for every role in the refinement loop
pub struct TutorPrompts;

impl TutorPrompts {
    /// Prompt for the first explanation of a question
    pub fn build_initial_prompt(question: &str, word_cap: usize) -> String {
        format!(
            r#"You are the teacher in an adaptive physics classroom. Your students range from
advanced to struggling, and you are preparing them for a graduate-level question.

## Question
{question}

## Your Task
Write one self-contained explanation of the concepts a student needs to solve this
question on their own. Cover:
1. a short intuitive orientation,
2. the core mechanism step by step, with at most one tiny numeric example,
3. the key definitions or equations, stated precisely.

## Rules
- Plain prose only: no headings, no bullet lists.
- At most {word_cap} words. Every sentence must add something new.
- Do NOT mention the question directly and do NOT reveal or hint at the correct answer.
  Teach the underlying physics generically.

Reply with the explanation text only."#,
            question = question,
            word_cap = word_cap,
        )
    }

    /// Prompt for revising an explanation after a round of student critiques
    pub fn build_revision_prompt(
        question: &str,
        previous_explanation: &str,
        feedback_items: &[String],
        word_cap: usize,
    ) -> String {
        let ranked = rank_feedback(feedback_items);
        let feedback_section = if ranked.is_empty() {
            "No actionable feedback this round. Return the explanation unchanged.".to_string()
        } else {
            ranked
                .iter()
                .map(|(item, count)| format!("- {} (x{})", item, count))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"You are the teacher in an adaptive physics classroom, revising your explanation
after hearing from your students.

## Question
{question}

## Your Previous Explanation
{previous}

## Student Feedback (most frequent first)
{feedback}

## Your Task
Revise the explanation to address the feedback. Prefer tightening, clarifying, or
replacing sentences over adding new material.

## Rules
- Plain prose only: no headings, no bullet lists.
- At most {word_cap} words.
- Do NOT mention the question directly and do NOT reveal or hint at the correct answer.

Reply with the revised explanation text only."#,
            question = question,
            previous = previous_explanation,
            feedback = feedback_section,
            word_cap = word_cap,
        )
    }

    /// Prompt asking one simulated student to critique an explanation
    pub fn build_critique_prompt(
        guidelines: &str,
        traits: &[(String, String)],
        explanation: &str,
    ) -> String {
        let traits_section = if traits.is_empty() {
            String::new()
        } else {
            let lines = traits
                .iter()
                .map(|(k, v)| format!("- {}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n");
            format!("\n## Your Traits\n{}\n", lines)
        };

        format!(
            r#"{guidelines}
{traits}
## The Teacher's Explanation
{explanation}

## Your Task
Read the explanation as the student described above and react in the classroom.
Stay on topic: only raise issues clearly relevant to the explanation's subject.

End your response with a feedback block:
<feedback>
{{"clarity": 0.0-1.0, "feedback": "one short paragraph", "gaps": ["what you could not follow"], "requests": ["specific changes you want"]}}
</feedback>

Use clarity 1.0 with empty lists if you have nothing to ask."#,
            guidelines = guidelines.trim(),
            traits = traits_section,
            explanation = explanation,
        )
    }

    /// Prompt asking the judge to rate how constructive a critique is
    pub fn build_reward_prompt(profile_id: &str, critique: &str) -> String {
        format!(
            r#"You rate student critiques for the persona '{profile}'.

## Student Critique
{critique}

Rate how constructive the critique is for improving the explanation:
1 = minimally constructive (vague, off-topic, or nothing to act on)
2 = somewhat constructive (some specific, relevant asks)
3 = very constructive (focused, specific, clearly improves the explanation)

Reply with ONLY the number 1, 2, or 3."#,
            profile = profile_id,
            critique = critique,
        )
    }

    /// Prompt asking a judge to compare two explanations of the same question
    pub fn build_pairwise_prompt(question: &str, explanation_a: &str, explanation_b: &str) -> String {
        format!(
            r#"You are the pairwise explanation judge. Compare two explanations of the same
question head-to-head.

## Question
{question}

## Explanation A
{explanation_a}

## Explanation B
{explanation_b}

Evaluate both on: {criteria}. Efficiency means avoiding unnecessary length.
Choose the better explanation overall. If their quality is indistinguishable,
answer "tie".

Reply with ONLY a JSON object of the form:
{{"winner": "A" | "B" | "tie", "rationales": {{"<criterion>": "..."}}}}
Keep every rationale concise and specific to the two texts."#,
            question = question,
            explanation_a = explanation_a,
            explanation_b = explanation_b,
            criteria = PAIRWISE_CRITERIA.join(", "),
        )
    }

    /// Prompt asking a student to answer the original question after reading
    /// the final explanation
    pub fn build_grading_prompt(
        guidelines: &str,
        explanation: &str,
        question: &str,
        choices: &[String],
    ) -> String {
        let options = choices
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}) {}", choice_letter(i), c))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"{guidelines}

## What You Were Taught
{explanation}

## Question
{question}

## Options
{options}

Answer using only what the explanation taught you. End with a line of the form
"Answer: X" where X is the letter of your choice."#,
            guidelines = guidelines.trim(),
            explanation = explanation,
            question = question,
            options = options,
        )
    }
}

/// Rank feedback items by frequency, then by length (shorter first).
///
/// Items are trimmed and cut to [`MAX_FEEDBACK_ITEM_CHARS`]; at most
/// [`MAX_FEEDBACK_ITEMS`] are returned with their counts.
pub fn rank_feedback(items: &[String]) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key: String = trimmed.chars().take(MAX_FEEDBACK_ITEM_CHARS).collect();
        *counts.entry(key).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(a, ca), (b, cb)| {
        cb.cmp(ca)
            .then_with(|| a.chars().count().cmp(&b.chars().count()))
            .then_with(|| a.cmp(b))
    });
    ranked.truncate(MAX_FEEDBACK_ITEMS);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rank_feedback_by_frequency_then_length() {
        let ranked = rank_feedback(&items(&[
            "add a diagram",
            "define gamma",
            "add a diagram",
            "a much longer request about units",
            "define gamma",
            "define gamma",
            "  ",
        ]));
        assert_eq!(ranked[0], ("define gamma".to_string(), 3));
        assert_eq!(ranked[1], ("add a diagram".to_string(), 2));
        assert_eq!(ranked[2].1, 1);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_rank_feedback_caps_items() {
        let many: Vec<String> = (0..10).map(|i| format!("request {}", i)).collect();
        assert_eq!(rank_feedback(&many).len(), MAX_FEEDBACK_ITEMS);
    }

    #[test]
    fn test_rank_feedback_truncates_long_items() {
        let long = "x".repeat(500);
        let ranked = rank_feedback(&[long]);
        assert_eq!(ranked[0].0.len(), MAX_FEEDBACK_ITEM_CHARS);
    }

    #[test]
    fn test_revision_prompt_without_feedback() {
        let prompt = TutorPrompts::build_revision_prompt("Q?", "old text", &[], 120);
        assert!(prompt.contains("No actionable feedback"));
        assert!(prompt.contains("old text"));
        assert!(prompt.contains("At most 120 words"));
    }

    #[test]
    fn test_revision_prompt_lists_counts() {
        let prompt = TutorPrompts::build_revision_prompt(
            "Q?",
            "old",
            &items(&["define gamma", "define gamma"]),
            180,
        );
        assert!(prompt.contains("- define gamma (x2)"));
    }

    #[test]
    fn test_grading_prompt_labels_choices() {
        let prompt = TutorPrompts::build_grading_prompt(
            "You are a student.",
            "explanation",
            "What is c?",
            &items(&["0.5c", "0.8c"]),
        );
        assert!(prompt.contains("A) 0.5c"));
        assert!(prompt.contains("B) 0.8c"));
    }

    #[test]
    fn test_critique_prompt_includes_traits() {
        let prompt = TutorPrompts::build_critique_prompt(
            "You are a struggling student.",
            &[("background".to_string(), "first-year".to_string())],
            "some explanation",
        );
        assert!(prompt.contains("- background: first-year"));
        assert!(prompt.contains("<feedback>"));
    }

    #[test]
    fn test_pairwise_prompt_lists_both_explanations() {
        let prompt = TutorPrompts::build_pairwise_prompt("Q?", "first take", "second take");
        assert!(prompt.contains("## Explanation A\nfirst take"));
        assert!(prompt.contains("## Explanation B\nsecond take"));
        assert!(prompt.contains("clarity, correctness, completeness, alignment, efficiency"));
        assert!(prompt.contains(r#"{"winner": "A" | "B" | "tie""#));
    }
}
