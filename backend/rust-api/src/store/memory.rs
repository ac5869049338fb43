use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{GradeUpdate, InsertOutcome, QuizStore, ResponseCache};
use crate::error::StoreError;
use crate::models::{
    AttemptStatus, QuizAttempt, QuizInfo, QuizRetryRequest, QuizRetrySettings,
    RetryRequestStatus, RetryResolution, StudentProfile,
};

#[derive(Default)]
struct MemoryState {
    settings: HashMap<String, QuizRetrySettings>,
    attempts: Vec<QuizAttempt>,
    requests: Vec<QuizRetryRequest>,
    profiles: HashMap<String, StudentProfile>,
    quizzes: HashMap<String, QuizInfo>,
}

/// Process-local store used for local development and tests.
#[derive(Default)]
pub struct MemoryQuizStore {
    state: Mutex<MemoryState>,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_profile(&self, user_id: &str, profile: StudentProfile) {
        self.state
            .lock()
            .await
            .profiles
            .insert(user_id.to_string(), profile);
    }

    pub async fn seed_quiz(&self, quiz_id: &str, info: QuizInfo) {
        self.state
            .lock()
            .await
            .quizzes
            .insert(quiz_id.to_string(), info);
    }

    /// Every retry request ever written, in insertion order.
    pub async fn all_retry_requests(&self) -> Vec<QuizRetryRequest> {
        self.state.lock().await.requests.clone()
    }
}

#[async_trait]
impl QuizStore for MemoryQuizStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn retry_settings(
        &self,
        quiz_id: &str,
    ) -> Result<Option<QuizRetrySettings>, StoreError> {
        Ok(self.state.lock().await.settings.get(quiz_id).cloned())
    }

    async fn save_retry_settings(
        &self,
        quiz_id: &str,
        settings: &QuizRetrySettings,
        _updated_by: &str,
        _updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .settings
            .insert(quiz_id.to_string(), settings.clone());
        Ok(())
    }

    async fn attempts_for_user(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<Vec<QuizAttempt>, StoreError> {
        let state = self.state.lock().await;
        let mut attempts: Vec<QuizAttempt> = state
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.quiz_id == quiz_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn attempts_for_quiz(
        &self,
        quiz_id: Option<&str>,
    ) -> Result<Vec<QuizAttempt>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .attempts
            .iter()
            .filter(|a| quiz_id.map_or(true, |id| a.quiz_id == id))
            .cloned()
            .collect())
    }

    async fn attempt(&self, attempt_id: &str) -> Result<Option<QuizAttempt>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.attempts.iter().find(|a| a.id == attempt_id).cloned())
    }

    async fn insert_attempt(
        &self,
        attempt: &QuizAttempt,
        request: Option<&QuizRetryRequest>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let taken = state.attempts.iter().any(|a| {
            a.id == attempt.id
                || (a.user_id == attempt.user_id
                    && a.quiz_id == attempt.quiz_id
                    && a.attempt_number == attempt.attempt_number)
        });
        if taken {
            return Ok(InsertOutcome::SlotTaken);
        }

        state.attempts.push(attempt.clone());
        if let Some(request) = request {
            state.requests.push(request.clone());
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn record_grade(&self, grade: &GradeUpdate) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(attempt) = state
            .attempts
            .iter_mut()
            .find(|a| {
                a.id == grade.attempt_id
                    && a.status == grade.expected_status
                    && a.score == grade.expected_score
                    && a.updated_at == grade.expected_updated_at
            })
        else {
            return Ok(false);
        };

        attempt.score = Some(grade.score);
        if let Some(results) = &grade.results {
            attempt.results = results.clone();
        }
        attempt.feedback = grade.feedback.clone();
        attempt.graded_by = Some(grade.graded_by.clone());
        attempt.graded_at = Some(grade.graded_at);
        attempt.status = AttemptStatus::Graded;
        attempt.updated_at = grade.graded_at;
        Ok(true)
    }

    async fn mark_study_materials_completed(
        &self,
        attempt_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(attempt) = state.attempts.iter_mut().find(|a| a.id == attempt_id) else {
            return Ok(false);
        };
        if !attempt.study_materials_completed {
            attempt.study_materials_completed = true;
            attempt.study_materials_completed_at = Some(completed_at);
            attempt.updated_at = completed_at;
        }
        Ok(true)
    }

    async fn retry_request(
        &self,
        request_id: &str,
    ) -> Result<Option<QuizRetryRequest>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.requests.iter().find(|r| r.id == request_id).cloned())
    }

    async fn pending_retry_requests(
        &self,
        quiz_id: Option<&str>,
    ) -> Result<Vec<QuizRetryRequest>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<QuizRetryRequest> = state
            .requests
            .iter()
            .filter(|r| r.status == RetryRequestStatus::Pending)
            .filter(|r| quiz_id.map_or(true, |id| r.quiz_id == id))
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.requested_at);
        Ok(pending)
    }

    async fn stale_retry_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuizRetryRequest>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .iter()
            .filter(|r| r.status == RetryRequestStatus::Pending && r.expires_at <= now)
            .cloned()
            .collect())
    }

    async fn resolve_retry_request(
        &self,
        resolution: &RetryResolution,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;

        let Some(request) = state.requests.iter_mut().find(|r| {
            r.id == resolution.request_id && r.status == RetryRequestStatus::Pending
        }) else {
            return Ok(false);
        };
        request.status = resolution.request_status;
        request.reviewed_by = resolution.reviewer_id.clone();
        request.reviewed_at = Some(resolution.resolved_at);
        request.review_notes = resolution.notes.clone();

        if let Some(attempt) = state
            .attempts
            .iter_mut()
            .find(|a| a.id == resolution.attempt_id)
        {
            attempt.status = resolution.attempt_status;
            attempt.approval.approved = resolution.approved;
            attempt.approval.approved_by = resolution.reviewer_id.clone();
            attempt.approval.approved_at = Some(resolution.resolved_at);
            attempt.approval.notes = resolution.notes.clone();
            attempt.updated_at = resolution.resolved_at;
        }
        Ok(true)
    }

    async fn student_profile(&self, user_id: &str) -> Result<Option<StudentProfile>, StoreError> {
        Ok(self.state.lock().await.profiles.get(user_id).cloned())
    }

    async fn quiz_info(&self, quiz_id: &str) -> Result<Option<QuizInfo>, StoreError> {
        Ok(self.state.lock().await.quizzes.get(quiz_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryResponseCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }
}
