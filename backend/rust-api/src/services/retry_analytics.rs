use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::AppState;
use crate::error::QuizError;
use crate::models::{
    QuizAttempt, QuizRetryAnalytics, RetryReasonCount, Severity, SuspiciousPattern,
};
use crate::store::QuizStore;
use crate::utils::retry::{retry_read, RetryConfig};

const RETRY_SUCCESS_SCORE: f64 = 70.0;
const LOW_SCORE: f64 = 50.0;
const LOW_SCORE_MIN_ATTEMPTS: usize = 3;
const TOP_REASONS: usize = 5;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn compute_analytics(attempts: &[QuizAttempt]) -> QuizRetryAnalytics {
    if attempts.is_empty() {
        return QuizRetryAnalytics::default();
    }

    let total_attempts = attempts.len() as u32;
    let retries: Vec<&QuizAttempt> = attempts.iter().filter(|a| a.attempt_number > 1).collect();
    let retry_attempts = retries.len() as u32;

    let mut per_user: HashMap<&str, u32> = HashMap::new();
    for attempt in attempts {
        *per_user.entry(attempt.user_id.as_str()).or_default() += 1;
    }
    let average_attempts = round2(f64::from(total_attempts) / per_user.len() as f64);

    let successes = retries
        .iter()
        .filter(|a| a.score.is_some_and(|s| s >= RETRY_SUCCESS_SCORE))
        .count();
    let retry_success_rate = if retries.is_empty() {
        0.0
    } else {
        round2(successes as f64 / retries.len() as f64 * 100.0)
    };

    QuizRetryAnalytics {
        total_attempts,
        retry_attempts,
        average_attempts,
        retry_success_rate,
        common_retry_reasons: common_reasons(attempts),
        suspicious_patterns: detect_suspicious_patterns(attempts),
    }
}

/// Most frequent reasons first; ties keep first-seen order.
fn common_reasons(attempts: &[QuizAttempt]) -> Vec<RetryReasonCount> {
    let mut counts: Vec<RetryReasonCount> = Vec::new();
    for reason in attempts.iter().filter_map(|a| a.retry_reason.as_deref()) {
        match counts.iter_mut().find(|c| c.reason == reason) {
            Some(entry) => entry.count += 1,
            None => counts.push(RetryReasonCount {
                reason: reason.to_string(),
                count: 1,
            }),
        }
    }
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(TOP_REASONS);
    counts
}

fn detect_suspicious_patterns(attempts: &[QuizAttempt]) -> Vec<SuspiciousPattern> {
    let mut groups: BTreeMap<(&str, &str), Vec<&QuizAttempt>> = BTreeMap::new();
    for attempt in attempts {
        groups
            .entry((attempt.user_id.as_str(), attempt.quiz_id.as_str()))
            .or_default()
            .push(attempt);
    }

    let mut patterns = Vec::new();

    for ((user_id, quiz_id), group) in groups.iter_mut() {
        group.sort_by_key(|a| a.submitted_at);
        for pair in group.windows(2) {
            let gap = pair[1].submitted_at - pair[0].submitted_at;
            if gap < chrono::Duration::hours(1) {
                let minutes = (gap.num_milliseconds() as f64 / 60_000.0).round() as i64;
                patterns.push(SuspiciousPattern {
                    pattern: "rapid_retries".to_string(),
                    description: format!(
                        "User {} retried quiz {} within {} minutes",
                        user_id, quiz_id, minutes
                    ),
                    severity: Severity::High,
                });
            }
        }
    }

    for ((user_id, quiz_id), group) in &groups {
        let all_low = group
            .iter()
            .all(|a| a.score.is_some_and(|s| s < LOW_SCORE));
        if group.len() >= LOW_SCORE_MIN_ATTEMPTS && all_low {
            patterns.push(SuspiciousPattern {
                pattern: "consistent_low_scores".to_string(),
                description: format!(
                    "User {} consistently scored below 50% on quiz {} across {} attempts",
                    user_id,
                    quiz_id,
                    group.len()
                ),
                severity: Severity::Medium,
            });
        }
    }

    patterns
}

pub struct RetryAnalyticsService {
    store: Arc<dyn QuizStore>,
    read_retry: RetryConfig,
}

impl RetryAnalyticsService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            read_retry: state.read_retry.clone(),
        }
    }

    /// Analytics for one quiz, or every quiz when `quiz_id` is `None`.
    pub async fn retry_analytics(
        &self,
        quiz_id: Option<&str>,
    ) -> Result<QuizRetryAnalytics, QuizError> {
        let attempts = retry_read("attempts_for_quiz", &self.read_retry, || {
            self.store.attempts_for_quiz(quiz_id)
        })
        .await?;
        Ok(compute_analytics(&attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptStatus, ClientMetadata, TeacherApproval};
    use chrono::{DateTime, Duration, Utc};

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn attempt(user: &str, number: u32, score: Option<f64>, offset: Duration) -> QuizAttempt {
        QuizAttempt {
            id: format!("{user}-{number}"),
            user_id: user.to_string(),
            quiz_id: "quiz-1".to_string(),
            attempt_number: number,
            answers: Default::default(),
            results: Default::default(),
            score,
            submitted_at: base() + offset,
            status: AttemptStatus::Graded,
            retry_reason: (number > 1).then(|| "misread".to_string()),
            approval: TeacherApproval::default(),
            study_materials_completed: false,
            study_materials_completed_at: None,
            graded_by: None,
            graded_at: None,
            feedback: None,
            client: ClientMetadata::default(),
            created_at: base() + offset,
            updated_at: base() + offset,
        }
    }

    #[test]
    fn empty_history_is_all_zero() {
        assert_eq!(compute_analytics(&[]), QuizRetryAnalytics::default());
    }

    #[test]
    fn counts_and_rates() {
        let attempts = vec![
            attempt("a", 1, Some(40.0), Duration::zero()),
            attempt("a", 2, Some(80.0), Duration::hours(5)),
            attempt("b", 1, Some(90.0), Duration::zero()),
        ];
        let analytics = compute_analytics(&attempts);

        assert_eq!(analytics.total_attempts, 3);
        assert_eq!(analytics.retry_attempts, 1);
        assert_eq!(analytics.average_attempts, 1.5);
        assert_eq!(analytics.retry_success_rate, 100.0);
        assert_eq!(analytics.common_retry_reasons.len(), 1);
        assert_eq!(analytics.common_retry_reasons[0].count, 1);
        assert!(analytics.suspicious_patterns.is_empty());
    }

    #[test]
    fn flags_rapid_retries() {
        let attempts = vec![
            attempt("a", 1, Some(40.0), Duration::zero()),
            attempt("a", 2, Some(45.0), Duration::minutes(20)),
        ];
        let patterns = compute_analytics(&attempts).suspicious_patterns;

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern, "rapid_retries");
        assert_eq!(patterns[0].severity, Severity::High);
        assert!(patterns[0].description.contains("20 minutes"));
    }

    #[test]
    fn flags_consistent_low_scores() {
        let attempts = vec![
            attempt("a", 1, Some(10.0), Duration::zero()),
            attempt("a", 2, Some(20.0), Duration::hours(2)),
            attempt("a", 3, Some(30.0), Duration::hours(4)),
        ];
        let patterns = compute_analytics(&attempts).suspicious_patterns;

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern, "consistent_low_scores");
        assert_eq!(patterns[0].severity, Severity::Medium);
    }

    #[test]
    fn ungraded_attempt_breaks_low_score_streak() {
        let attempts = vec![
            attempt("a", 1, Some(10.0), Duration::zero()),
            attempt("a", 2, None, Duration::hours(2)),
            attempt("a", 3, Some(30.0), Duration::hours(4)),
        ];
        assert!(compute_analytics(&attempts).suspicious_patterns.is_empty());
    }

    #[test]
    fn top_reasons_are_capped_and_sorted() {
        let mut attempts = Vec::new();
        for (i, reason) in ["a", "b", "b", "c", "d", "e", "f", "f", "f"].iter().enumerate() {
            let mut at = attempt("u", i as u32 + 2, Some(10.0), Duration::days(i as i64));
            at.retry_reason = Some(reason.to_string());
            attempts.push(at);
        }
        let reasons = compute_analytics(&attempts).common_retry_reasons;

        assert_eq!(reasons.len(), 5);
        assert_eq!(reasons[0].reason, "f");
        assert_eq!(reasons[0].count, 3);
        assert_eq!(reasons[1].reason, "b");
        assert_eq!(reasons[2].reason, "a");
    }
}
