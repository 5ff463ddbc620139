use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use tutorloop_logging::{LogEvent, Logger};

use crate::collaborators::{CollaboratorError, Grader};
use crate::error::LoopError;
use crate::model::{Explanation, GradingResult, Problem, StudentProfile};

/// A profile whose grading produced no usable result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingGap {
    pub profile_id: String,
    pub error: String,
}

/// Post-session statistics over the profiles that were graded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingSummary {
    /// In roster order
    pub results: Vec<GradingResult>,
    pub gaps: Vec<GradingGap>,
    /// `None` when no profile was graded
    pub mean: Option<f64>,
    /// Population variance; `None` when no profile was graded
    pub variance: Option<f64>,
}

impl GradingSummary {
    pub fn has_gaps(&self) -> bool {
        !self.gaps.is_empty()
    }

    pub fn gap_profiles(&self) -> Vec<String> {
        self.gaps.iter().map(|g| g.profile_id.clone()).collect()
    }

    pub fn correct_count(&self) -> usize {
        self.results.iter().filter(|r| r.correct).count()
    }
}

/// Grades every profile against the final explanation and summarizes
pub struct OutcomeAggregator {
    grader: Arc<dyn Grader>,
    call_timeout: Duration,
    logger: Arc<Logger>,
}

impl OutcomeAggregator {
    pub fn new(grader: Arc<dyn Grader>, call_timeout: Duration, logger: Arc<Logger>) -> Self {
        Self {
            grader,
            call_timeout,
            logger,
        }
    }

    /// Grade all profiles concurrently. Results come back in roster order.
    pub async fn collect(
        &self,
        problem: Arc<Problem>,
        explanation: &Explanation,
        profiles: &[StudentProfile],
    ) -> Vec<(String, Result<GradingResult, LoopError>)> {
        let mut tasks = JoinSet::new();
        for (index, profile) in profiles.iter().enumerate() {
            let grader = Arc::clone(&self.grader);
            let problem = Arc::clone(&problem);
            let explanation = explanation.clone();
            let profile = profile.clone();
            let call_timeout = self.call_timeout;

            tasks.spawn(async move {
                let result = match tokio::time::timeout(
                    call_timeout,
                    grader.grade(&problem, &explanation, &profile),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CollaboratorError::Timeout(call_timeout)),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<GradingResult, CollaboratorError>>> =
            vec![None; profiles.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "Grading task aborted"),
            }
        }

        profiles
            .iter()
            .zip(slots)
            .map(|(profile, slot)| {
                let result = match slot {
                    Some(Ok(mut graded)) => {
                        graded.profile_id = profile.id.clone();
                        self.logger.log(&LogEvent::GradingCompleted {
                            profile: profile.id.clone(),
                            score: graded.score,
                        });
                        Ok(graded)
                    }
                    Some(Err(e)) => Err(self.unavailable(&profile.id, e.to_string())),
                    None => Err(self.unavailable(&profile.id, "grading task aborted".to_string())),
                };
                (profile.id.clone(), result)
            })
            .collect()
    }

    fn unavailable(&self, profile: &str, reason: String) -> LoopError {
        self.logger.log(&LogEvent::GradingFailed {
            profile: profile.to_string(),
            error: reason.clone(),
        });
        LoopError::GradingUnavailable {
            profile: profile.to_string(),
            reason,
        }
    }

    /// Mean and population variance over successful results; failures and
    /// out-of-range scores become gaps
    pub fn summarize(outcomes: Vec<(String, Result<GradingResult, LoopError>)>) -> GradingSummary {
        let mut results = Vec::new();
        let mut gaps = Vec::new();

        for (profile_id, outcome) in outcomes {
            match outcome {
                Ok(result) if result.score.is_finite() && (0.0..=1.0).contains(&result.score) => {
                    results.push(result)
                }
                Ok(result) => gaps.push(GradingGap {
                    profile_id,
                    error: format!("score {} is outside [0, 1]", result.score),
                }),
                Err(e) => gaps.push(GradingGap {
                    profile_id,
                    error: e.to_string(),
                }),
            }
        }

        let (mean, variance) = if results.is_empty() {
            (None, None)
        } else {
            let n = results.len() as f64;
            let mean = results.iter().map(|r| r.score).sum::<f64>() / n;
            let variance = results
                .iter()
                .map(|r| (r.score - mean).powi(2))
                .sum::<f64>()
                / n;
            (Some(mean), Some(variance))
        };

        debug!(graded = results.len(), gaps = gaps.len(), "Grading summarized");
        GradingSummary {
            results,
            gaps,
            mean,
            variance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn ok(id: &str, score: f64) -> (String, Result<GradingResult, LoopError>) {
        (id.to_string(), Ok(GradingResult::new(id, score)))
    }

    fn gap(id: &str) -> (String, Result<GradingResult, LoopError>) {
        (
            id.to_string(),
            Err(LoopError::GradingUnavailable {
                profile: id.to_string(),
                reason: "timed out".into(),
            }),
        )
    }

    #[test]
    fn test_summary_excludes_gaps() {
        let summary = OutcomeAggregator::summarize(vec![ok("a", 1.0), gap("b"), ok("c", 0.0)]);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.mean, Some(0.5));
        assert_eq!(summary.variance, Some(0.25));
        assert_eq!(summary.gap_profiles(), vec!["b".to_string()]);
        assert_eq!(summary.correct_count(), 1);
    }

    #[test]
    fn test_summary_without_results_has_no_statistics() {
        let summary = OutcomeAggregator::summarize(vec![gap("a")]);
        assert!(summary.has_gaps());
        assert_eq!(summary.mean, None);
        assert_eq!(summary.variance, None);
    }

    #[test]
    fn test_out_of_range_score_is_a_gap() {
        let summary = OutcomeAggregator::summarize(vec![ok("a", 1.7), ok("b", 0.5)]);
        assert_eq!(summary.gap_profiles(), vec!["a".to_string()]);
        assert_eq!(summary.mean, Some(0.5));
        assert_eq!(summary.variance, Some(0.0));
    }

    struct SlowFirstGrader;

    #[async_trait]
    impl Grader for SlowFirstGrader {
        async fn grade(
            &self,
            problem: &Problem,
            _explanation: &Explanation,
            profile: &StudentProfile,
        ) -> Result<GradingResult, CollaboratorError> {
            match profile.id.as_str() {
                "first" => {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok(GradingResult::from_choice(&profile.id, problem, 0))
                }
                "stuck" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(GradingResult::from_choice(&profile.id, problem, 0))
                }
                _ => Ok(GradingResult::from_choice(&profile.id, problem, 1)),
            }
        }
    }

    #[tokio::test]
    async fn test_collect_keeps_roster_order_and_times_out() {
        let aggregator = OutcomeAggregator::new(
            Arc::new(SlowFirstGrader),
            Duration::from_millis(200),
            Arc::new(Logger::silent()),
        );
        let problem = Arc::new(Problem::new("p", "q", vec!["a".into(), "b".into()], 0));
        let profiles = vec![
            StudentProfile::new("first", "g"),
            StudentProfile::new("stuck", "g"),
            StudentProfile::new("last", "g"),
        ];

        let outcomes = aggregator
            .collect(problem, &Explanation::new(0, "text"), &profiles)
            .await;
        let ids: Vec<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["first", "stuck", "last"]);
        assert!(matches!(
            outcomes[1].1,
            Err(LoopError::GradingUnavailable { .. })
        ));

        let summary = OutcomeAggregator::summarize(outcomes);
        assert_eq!(summary.results[0].profile_id, "first");
        assert!(summary.results[0].correct);
        assert!(!summary.results[1].correct);
        assert_eq!(summary.gap_profiles(), vec!["stuck".to_string()]);
    }
}
