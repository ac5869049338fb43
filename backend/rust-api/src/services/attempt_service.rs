use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use super::clock::Clock;
use super::retry_eligibility::{evaluate, outcome_label};
use super::settings_service::load_settings;
use super::AppState;
use crate::config::RetryFlowConfig;
use crate::error::QuizError;
use crate::metrics::{record_attempt, record_eligibility_check, record_retry_request};
use crate::models::{
    AttemptStatus, ClientMetadata, CreateAttemptRequest, CreateAttemptResult, QuizAttempt,
    QuizRetryRequest, RetryEligibility, RetryRequestStatus, TeacherApproval,
};
use crate::store::{InsertOutcome, QuizStore, ResponseCache};
use crate::utils::retry::{retry_read, RetryConfig};
use crate::utils::time::hours_to_duration;

pub struct AttemptService {
    store: Arc<dyn QuizStore>,
    cache: Arc<dyn ResponseCache>,
    clock: Arc<dyn Clock>,
    policy: RetryFlowConfig,
    read_retry: RetryConfig,
}

fn require_id(value: &str, field: &str) -> Result<(), QuizError> {
    if value.trim().is_empty() {
        return Err(QuizError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

impl AttemptService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            cache: state.cache.clone(),
            clock: state.clock.clone(),
            policy: state.config.retries.clone(),
            read_retry: state.read_retry.clone(),
        }
    }

    async fn history(&self, user_id: &str, quiz_id: &str) -> Result<Vec<QuizAttempt>, QuizError> {
        let attempts = retry_read("attempts_for_user", &self.read_retry, || {
            self.store.attempts_for_user(user_id, quiz_id)
        })
        .await?;
        Ok(attempts)
    }

    pub async fn check_eligibility(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<RetryEligibility, QuizError> {
        require_id(user_id, "user_id")?;
        require_id(quiz_id, "quiz_id")?;

        let settings = load_settings(self.store.as_ref(), &self.read_retry, quiz_id).await?;
        let history = self.history(user_id, quiz_id).await?;
        let eligibility = evaluate(&settings, &history, self.clock.now());
        record_eligibility_check(outcome_label(&eligibility));
        Ok(eligibility)
    }

    pub async fn list_attempts(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<Vec<QuizAttempt>, QuizError> {
        require_id(user_id, "user_id")?;
        require_id(quiz_id, "quiz_id")?;
        self.history(user_id, quiz_id).await
    }

    fn idempotency_key(user_id: &str, quiz_id: &str, key: &str) -> String {
        format!("idempotency:attempt:{}:{}:{}", user_id, quiz_id, key)
    }

    async fn cached_result(&self, cache_key: &str) -> Option<CreateAttemptResult> {
        let cached = match retry_read("idempotency_lookup", &self.read_retry, || {
            self.cache.get(cache_key)
        })
        .await
        {
            Ok(cached) => cached?,
            Err(e) => {
                tracing::warn!(cache_key, error = %e, "Idempotency lookup failed, continuing");
                return None;
            }
        };

        match serde_json::from_str::<CreateAttemptResult>(&cached) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(cache_key, error = %e, "Discarding unreadable cached response");
                None
            }
        }
    }

    async fn cache_result(&self, cache_key: &str, result: &CreateAttemptResult) {
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(cache_key, error = %e, "Failed to encode response for caching");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .put(cache_key, &payload, self.policy.idempotency_ttl_secs)
            .await
        {
            tracing::warn!(cache_key, error = %e, "Failed to cache attempt response");
        }
    }

    /// Records a new attempt if the student is allowed one.
    ///
    /// Refusals are returned as `success: false`; errors are reserved for bad
    /// input and storage failures.
    pub async fn create_attempt(
        &self,
        user_id: &str,
        quiz_id: &str,
        req: CreateAttemptRequest,
        client: ClientMetadata,
    ) -> Result<CreateAttemptResult, QuizError> {
        require_id(user_id, "user_id")?;
        require_id(quiz_id, "quiz_id")?;
        req.validate()?;

        tracing::info!(user_id, quiz_id, "Processing attempt submission");

        let cache_key = req
            .idempotency_key
            .as_deref()
            .map(|key| Self::idempotency_key(user_id, quiz_id, key));

        if let Some(key) = &cache_key {
            if let Some(mut cached) = self.cached_result(key).await {
                tracing::info!(user_id, quiz_id, "Returning cached response for {}", key);
                record_attempt("replayed");
                cached.replayed = true;
                return Ok(cached);
            }
        }

        let now = self.clock.now();
        let settings = load_settings(self.store.as_ref(), &self.read_retry, quiz_id).await?;
        let history = self.history(user_id, quiz_id).await?;
        let eligibility = evaluate(&settings, &history, now);
        record_eligibility_check(outcome_label(&eligibility));

        if !eligibility.can_retry {
            let reason = eligibility
                .reason
                .ok_or_else(|| QuizError::Conflict("attempt refused without reason".into()))?;
            tracing::info!(user_id, quiz_id, reason = reason.as_label(), "Attempt refused");
            record_attempt("refused");
            return Ok(CreateAttemptResult::refused(reason, eligibility.retry_after));
        }

        let attempt_number = history.iter().map(|a| a.attempt_number).max().unwrap_or(0) + 1;
        let requires_approval = eligibility.requires_approval;
        let status = if requires_approval {
            AttemptStatus::AwaitingApproval
        } else if req.score.is_some() {
            AttemptStatus::AutoGraded
        } else {
            AttemptStatus::PendingGrading
        };
        let retry_reason = req
            .retry_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let attempt = QuizAttempt {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            quiz_id: quiz_id.to_string(),
            attempt_number,
            answers: req.answers,
            results: req.results,
            score: req.score,
            submitted_at: now,
            status,
            retry_reason: retry_reason.clone(),
            approval: TeacherApproval {
                required: requires_approval,
                ..TeacherApproval::default()
            },
            study_materials_completed: false,
            study_materials_completed_at: None,
            graded_by: None,
            graded_at: None,
            feedback: None,
            client,
            created_at: now,
            updated_at: now,
        };

        let request = requires_approval.then(|| QuizRetryRequest {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            quiz_id: quiz_id.to_string(),
            attempt_id: attempt.id.clone(),
            request_reason: retry_reason.unwrap_or_default(),
            requested_at: now,
            status: RetryRequestStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            expires_at: now
                .checked_add_signed(hours_to_duration(self.policy.request_ttl_hours))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        });

        let result = match self.store.insert_attempt(&attempt, request.as_ref()).await? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    user_id,
                    quiz_id,
                    attempt_id = %attempt.id,
                    attempt_number,
                    status = attempt.status.as_str(),
                    "Attempt recorded"
                );
                record_attempt(if requires_approval {
                    "awaiting_approval"
                } else {
                    "recorded"
                });
                if request.is_some() {
                    record_retry_request(RetryRequestStatus::Pending.as_str());
                }
                CreateAttemptResult::recorded(&attempt)
            }
            InsertOutcome::SlotTaken => {
                let winner = self
                    .history(user_id, quiz_id)
                    .await?
                    .into_iter()
                    .find(|a| a.attempt_number == attempt_number)
                    .ok_or_else(|| {
                        QuizError::Conflict(format!(
                            "attempt {} was claimed concurrently",
                            attempt_number
                        ))
                    })?;
                tracing::warn!(
                    user_id,
                    quiz_id,
                    attempt_number,
                    winner_id = %winner.id,
                    "Concurrent submission lost the attempt slot, replaying winner"
                );
                record_attempt("replayed");
                CreateAttemptResult {
                    replayed: true,
                    ..CreateAttemptResult::recorded(&winner)
                }
            }
        };

        if let Some(key) = &cache_key {
            self.cache_result(key, &result).await;
        }
        Ok(result)
    }

    /// Marks the attempt's study materials as done. Only the attempt owner
    /// may do this and every required material must be listed.
    pub async fn complete_study_materials(
        &self,
        attempt_id: &str,
        user_id: &str,
        completed_ids: &[String],
    ) -> Result<QuizAttempt, QuizError> {
        let attempt = retry_read("attempt", &self.read_retry, || self.store.attempt(attempt_id))
            .await?
            .ok_or_else(|| QuizError::NotFound("Attempt".to_string()))?;

        if attempt.user_id != user_id {
            return Err(QuizError::Forbidden(
                "only the attempt owner can complete its study materials".to_string(),
            ));
        }
        if attempt.study_materials_completed {
            return Ok(attempt);
        }

        let settings =
            load_settings(self.store.as_ref(), &self.read_retry, &attempt.quiz_id).await?;
        let completed: BTreeSet<&str> = completed_ids.iter().map(|id| id.trim()).collect();
        let missing: Vec<&str> = settings
            .study_materials_required
            .iter()
            .map(String::as_str)
            .filter(|id| !completed.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(QuizError::Validation(format!(
                "study materials not completed: {}",
                missing.join(", ")
            )));
        }

        let now = self.clock.now();
        if !self
            .store
            .mark_study_materials_completed(attempt_id, now)
            .await?
        {
            return Err(QuizError::NotFound("Attempt".to_string()));
        }
        tracing::info!(attempt_id, user_id, "Study materials completed");

        self.store
            .attempt(attempt_id)
            .await?
            .ok_or_else(|| QuizError::NotFound("Attempt".to_string()))
    }
}
