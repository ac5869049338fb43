//! Storage seams for the quiz retry flow.
//!
//! Consistency of attempt numbering and of retry-request creation is the
//! store's job: MongoDB enforces it with a unique index and transactions, the
//! in-memory store with a single lock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    AttemptStatus, QuizAttempt, QuizInfo, QuizRetryRequest, QuizRetrySettings, RetryResolution,
    StudentProfile,
};

pub mod memory;
pub mod mongo;
pub mod redis_cache;

pub use memory::{MemoryQuizStore, MemoryResponseCache};
pub use mongo::MongoQuizStore;
pub use redis_cache::RedisResponseCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another submission already holds this (user, quiz, attempt_number).
    SlotTaken,
}

/// Score written by a grading actor. Applied only while the attempt still
/// matches the status, score and `updated_at` it was read with.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeUpdate {
    pub attempt_id: String,
    pub expected_status: AttemptStatus,
    pub expected_score: Option<f64>,
    pub expected_updated_at: DateTime<Utc>,
    pub score: f64,
    pub results: Option<BTreeMap<String, bool>>,
    pub feedback: Option<String>,
    pub graded_by: String,
    pub graded_at: DateTime<Utc>,
}

#[async_trait]
pub trait QuizStore: Send + Sync + 'static {
    fn backend_tag(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn retry_settings(&self, quiz_id: &str)
        -> Result<Option<QuizRetrySettings>, StoreError>;

    async fn save_retry_settings(
        &self,
        quiz_id: &str,
        settings: &QuizRetrySettings,
        updated_by: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Attempts of one user on one quiz, ascending by attempt number.
    async fn attempts_for_user(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<Vec<QuizAttempt>, StoreError>;

    /// Attempts of every user, optionally restricted to one quiz.
    async fn attempts_for_quiz(&self, quiz_id: Option<&str>)
        -> Result<Vec<QuizAttempt>, StoreError>;

    async fn attempt(&self, attempt_id: &str) -> Result<Option<QuizAttempt>, StoreError>;

    /// Inserts the attempt and, when given, its retry request. Both rows are
    /// written or neither is.
    async fn insert_attempt(
        &self,
        attempt: &QuizAttempt,
        request: Option<&QuizRetryRequest>,
    ) -> Result<InsertOutcome, StoreError>;

    /// Returns `false` when the attempt is missing or changed since it was read.
    async fn record_grade(&self, grade: &GradeUpdate) -> Result<bool, StoreError>;

    async fn mark_study_materials_completed(
        &self,
        attempt_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn retry_request(&self, request_id: &str)
        -> Result<Option<QuizRetryRequest>, StoreError>;

    /// Pending requests, oldest first.
    async fn pending_retry_requests(
        &self,
        quiz_id: Option<&str>,
    ) -> Result<Vec<QuizRetryRequest>, StoreError>;

    /// Pending requests whose `expires_at` is at or before `now`.
    async fn stale_retry_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuizRetryRequest>, StoreError>;

    /// Moves a pending request and its attempt to their resolved states.
    /// Returns `false` if the request was no longer pending.
    async fn resolve_retry_request(&self, resolution: &RetryResolution)
        -> Result<bool, StoreError>;

    async fn student_profile(&self, user_id: &str) -> Result<Option<StudentProfile>, StoreError>;

    async fn quiz_info(&self, quiz_id: &str) -> Result<Option<QuizInfo>, StoreError>;
}

/// Short-lived response cache backing idempotent submissions.
#[async_trait]
pub trait ResponseCache: Send + Sync + 'static {
    fn backend_tag(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;
}
