//! Decides whether a student may start another attempt on a quiz.
//!
//! The evaluation is a pure function of the quiz settings, the student's
//! attempt history and the current instant. Checks run in a fixed order and
//! stop at the first refusal.

use chrono::{DateTime, Utc};

use crate::models::{
    AttemptStatus, IneligibilityReason, QuizAttempt, QuizRetrySettings, RetryEligibility,
};
use crate::utils::time::hours_to_duration;

pub fn evaluate(
    settings: &QuizRetrySettings,
    attempts: &[QuizAttempt],
    now: DateTime<Utc>,
) -> RetryEligibility {
    let counted: Vec<&QuizAttempt> = attempts.iter().filter(|a| !a.status.is_void()).collect();
    let current_attempts = counted.len() as u32;

    let base = RetryEligibility {
        can_retry: false,
        reason: None,
        message: None,
        retry_after: None,
        requires_approval: false,
        current_attempts,
        max_retries: settings.max_retries,
        retry_threshold: settings.retry_threshold,
    };
    let refuse = |reason: IneligibilityReason, retry_after: Option<DateTime<Utc>>| {
        RetryEligibility {
            reason: Some(reason),
            message: Some(reason.message().to_string()),
            retry_after,
            ..base.clone()
        }
    };

    let Some(latest) = counted.iter().max_by_key(|a| a.attempt_number) else {
        // First attempt: no retry policy applies.
        return RetryEligibility {
            can_retry: true,
            ..base.clone()
        };
    };

    if !settings.allow_retries {
        return refuse(IneligibilityReason::RetriesDisabled, None);
    }

    if u64::from(current_attempts) >= u64::from(settings.max_retries) + 1 {
        return refuse(IneligibilityReason::MaxRetriesReached, None);
    }

    if latest.status == AttemptStatus::AwaitingApproval {
        return refuse(IneligibilityReason::ApprovalPending, None);
    }

    let Some(score) = latest.score else {
        return refuse(IneligibilityReason::AwaitingGrading, None);
    };
    if score >= settings.retry_threshold {
        return refuse(IneligibilityReason::ScoreAboveThreshold, None);
    }

    // An unrepresentable end of cooldown never elapses.
    match latest
        .submitted_at
        .checked_add_signed(hours_to_duration(settings.retry_cooldown_hours))
    {
        Some(available_at) if now < available_at => {
            return refuse(IneligibilityReason::CooldownActive, Some(available_at));
        }
        None => return refuse(IneligibilityReason::CooldownActive, None),
        Some(_) => {}
    }

    if settings.require_study_materials && !latest.study_materials_completed {
        return refuse(IneligibilityReason::StudyMaterialsIncomplete, None);
    }

    RetryEligibility {
        can_retry: true,
        requires_approval: settings.require_teacher_approval,
        ..base
    }
}

/// Metric label for an evaluation outcome.
pub fn outcome_label(eligibility: &RetryEligibility) -> &'static str {
    match eligibility.reason {
        Some(reason) => reason.as_label(),
        None if eligibility.requires_approval => "eligible_with_approval",
        None => "eligible",
    }
}
