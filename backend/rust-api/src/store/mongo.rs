use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::IndexOptions;
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use super::{GradeUpdate, InsertOutcome, QuizStore};
use crate::error::StoreError;
use crate::metrics::track_db_operation;
use crate::models::{
    AttemptStatus, ClientMetadata, QuizAttempt, QuizInfo, QuizRetryRequest, QuizRetrySettings,
    RetryRequestStatus, RetryResolution, StudentProfile, TeacherApproval,
};
use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option, chrono_to_bson};

const SETTINGS_COLLECTION: &str = "quiz_retry_settings";
const ATTEMPTS_COLLECTION: &str = "quiz_attempts";
const REQUESTS_COLLECTION: &str = "quiz_retry_requests";
const QUIZZES_COLLECTION: &str = "quizzes";
const USERS_COLLECTION: &str = "users";

const DUPLICATE_KEY: i32 = 11000;
const TRANSACTION_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(rename = "_id")]
    quiz_id: String,
    #[serde(default)]
    settings: QuizRetrySettings,
    #[serde(default)]
    updated_by: Option<String>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApprovalDocument {
    required: bool,
    approved: Option<bool>,
    approved_by: Option<String>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    approved_at: Option<DateTime<Utc>>,
    notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AttemptDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    quiz_id: String,
    attempt_number: u32,
    #[serde(default)]
    answers: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    results: BTreeMap<String, bool>,
    score: Option<f64>,
    #[serde(with = "bson_datetime_as_chrono")]
    submitted_at: DateTime<Utc>,
    status: AttemptStatus,
    retry_reason: Option<String>,
    approval: ApprovalDocument,
    study_materials_completed: bool,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    study_materials_completed_at: Option<DateTime<Utc>>,
    graded_by: Option<String>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    graded_at: Option<DateTime<Utc>>,
    feedback: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    updated_at: DateTime<Utc>,
}

impl From<&QuizAttempt> for AttemptDocument {
    fn from(a: &QuizAttempt) -> Self {
        Self {
            id: a.id.clone(),
            user_id: a.user_id.clone(),
            quiz_id: a.quiz_id.clone(),
            attempt_number: a.attempt_number,
            answers: a.answers.clone(),
            results: a.results.clone(),
            score: a.score,
            submitted_at: a.submitted_at,
            status: a.status,
            retry_reason: a.retry_reason.clone(),
            approval: ApprovalDocument {
                required: a.approval.required,
                approved: a.approval.approved,
                approved_by: a.approval.approved_by.clone(),
                approved_at: a.approval.approved_at,
                notes: a.approval.notes.clone(),
            },
            study_materials_completed: a.study_materials_completed,
            study_materials_completed_at: a.study_materials_completed_at,
            graded_by: a.graded_by.clone(),
            graded_at: a.graded_at,
            feedback: a.feedback.clone(),
            ip_address: a.client.ip_address.clone(),
            user_agent: a.client.user_agent.clone(),
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

impl From<AttemptDocument> for QuizAttempt {
    fn from(d: AttemptDocument) -> Self {
        Self {
            id: d.id,
            user_id: d.user_id,
            quiz_id: d.quiz_id,
            attempt_number: d.attempt_number,
            answers: d.answers,
            results: d.results,
            score: d.score,
            submitted_at: d.submitted_at,
            status: d.status,
            retry_reason: d.retry_reason,
            approval: TeacherApproval {
                required: d.approval.required,
                approved: d.approval.approved,
                approved_by: d.approval.approved_by,
                approved_at: d.approval.approved_at,
                notes: d.approval.notes,
            },
            study_materials_completed: d.study_materials_completed,
            study_materials_completed_at: d.study_materials_completed_at,
            graded_by: d.graded_by,
            graded_at: d.graded_at,
            feedback: d.feedback,
            client: ClientMetadata {
                ip_address: d.ip_address,
                user_agent: d.user_agent,
            },
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RequestDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    quiz_id: String,
    attempt_id: String,
    request_reason: String,
    #[serde(with = "bson_datetime_as_chrono")]
    requested_at: DateTime<Utc>,
    status: RetryRequestStatus,
    reviewed_by: Option<String>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    expires_at: DateTime<Utc>,
}

impl From<&QuizRetryRequest> for RequestDocument {
    fn from(r: &QuizRetryRequest) -> Self {
        Self {
            id: r.id.clone(),
            user_id: r.user_id.clone(),
            quiz_id: r.quiz_id.clone(),
            attempt_id: r.attempt_id.clone(),
            request_reason: r.request_reason.clone(),
            requested_at: r.requested_at,
            status: r.status,
            reviewed_by: r.reviewed_by.clone(),
            reviewed_at: r.reviewed_at,
            review_notes: r.review_notes.clone(),
            expires_at: r.expires_at,
        }
    }
}

impl From<RequestDocument> for QuizRetryRequest {
    fn from(d: RequestDocument) -> Self {
        Self {
            id: d.id,
            user_id: d.user_id,
            quiz_id: d.quiz_id,
            attempt_id: d.attempt_id,
            request_reason: d.request_reason,
            requested_at: d.requested_at,
            status: d.status,
            reviewed_by: d.reviewed_by,
            reviewed_at: d.reviewed_at,
            review_notes: d.review_notes,
            expires_at: d.expires_at,
        }
    }
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
        ErrorKind::Command(ce) => ce.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn is_transient(e: &mongodb::error::Error) -> bool {
    e.contains_label(TRANSIENT_TRANSACTION_ERROR)
}

/// Builds a display name from either `name` or `first_name`/`last_name`.
fn profile_from_document(user: &Document) -> StudentProfile {
    let fallback = StudentProfile::unknown();
    let name = user
        .get_str("name")
        .map(str::to_string)
        .unwrap_or_else(|_| {
            let first = user.get_str("first_name").unwrap_or_default();
            let last = user.get_str("last_name").unwrap_or_default();
            format!("{} {}", first, last).trim().to_string()
        });

    StudentProfile {
        name: if name.is_empty() { fallback.name } else { name },
        email: user
            .get_str("email")
            .map(str::to_string)
            .unwrap_or(fallback.email),
    }
}

pub struct MongoQuizStore {
    client: Client,
    db: Database,
}

impl MongoQuizStore {
    pub fn new(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, db }
    }

    /// Creates the indexes the retry flow relies on. The unique attempt index
    /// is what serializes concurrent submissions.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique_slot = IndexModel::builder()
            .keys(doc! { "user_id": 1, "quiz_id": 1, "attempt_number": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("user_quiz_attempt_unique".to_string())
                    .build(),
            )
            .build();
        self.attempts().create_index(unique_slot).await?;

        let by_quiz = IndexModel::builder().keys(doc! { "quiz_id": 1 }).build();
        self.attempts().create_index(by_quiz).await?;

        let pending = IndexModel::builder()
            .keys(doc! { "status": 1, "expires_at": 1 })
            .build();
        self.requests().create_index(pending).await?;

        tracing::info!("Quiz retry indexes ensured");
        Ok(())
    }

    fn settings(&self) -> Collection<SettingsDocument> {
        self.db.collection(SETTINGS_COLLECTION)
    }

    fn attempts(&self) -> Collection<AttemptDocument> {
        self.db.collection(ATTEMPTS_COLLECTION)
    }

    fn requests(&self) -> Collection<RequestDocument> {
        self.db.collection(REQUESTS_COLLECTION)
    }

    async fn insert_in_transaction(
        &self,
        session: &mut ClientSession,
        attempt: &AttemptDocument,
        request: &RequestDocument,
    ) -> Result<(), mongodb::error::Error> {
        session.start_transaction().await?;

        if let Err(e) = self.attempts().insert_one(attempt).session(&mut *session).await {
            let _ = session.abort_transaction().await;
            return Err(e);
        }
        if let Err(e) = self.requests().insert_one(request).session(&mut *session).await {
            let _ = session.abort_transaction().await;
            return Err(e);
        }

        session.commit_transaction().await
    }

    async fn resolve_in_transaction(
        &self,
        session: &mut ClientSession,
        resolution: &RetryResolution,
    ) -> Result<bool, mongodb::error::Error> {
        session.start_transaction().await?;

        let resolved_at = chrono_to_bson(resolution.resolved_at);
        let request_update = self
            .requests()
            .update_one(
                doc! { "_id": resolution.request_id.as_str(), "status": RetryRequestStatus::Pending.as_str() },
                doc! { "$set": {
                    "status": resolution.request_status.as_str(),
                    "reviewed_by": resolution.reviewer_id.clone(),
                    "reviewed_at": resolved_at,
                    "review_notes": resolution.notes.clone(),
                } },
            )
            .session(&mut *session)
            .await;

        match request_update {
            Ok(result) if result.matched_count == 0 => {
                let _ = session.abort_transaction().await;
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) => {
                let _ = session.abort_transaction().await;
                return Err(e);
            }
        }

        if let Err(e) = self
            .attempts()
            .update_one(
                doc! { "_id": resolution.attempt_id.as_str() },
                doc! { "$set": {
                    "status": resolution.attempt_status.as_str(),
                    "approval.approved": resolution.approved,
                    "approval.approved_by": resolution.reviewer_id.clone(),
                    "approval.approved_at": resolved_at,
                    "approval.notes": resolution.notes.clone(),
                    "updated_at": resolved_at,
                } },
            )
            .session(&mut *session)
            .await
        {
            let _ = session.abort_transaction().await;
            return Err(e);
        }

        session.commit_transaction().await?;
        Ok(true)
    }
}

#[async_trait]
impl QuizStore for MongoQuizStore {
    fn backend_tag(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn retry_settings(
        &self,
        quiz_id: &str,
    ) -> Result<Option<QuizRetrySettings>, StoreError> {
        track_db_operation("find_one", SETTINGS_COLLECTION, async {
            let found = self.settings().find_one(doc! { "_id": quiz_id }).await?;
            Ok(found.map(|d| d.settings))
        })
        .await
    }

    async fn save_retry_settings(
        &self,
        quiz_id: &str,
        settings: &QuizRetrySettings,
        updated_by: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let document = SettingsDocument {
            quiz_id: quiz_id.to_string(),
            settings: settings.clone(),
            updated_by: Some(updated_by.to_string()),
            updated_at: Some(updated_at),
        };

        track_db_operation("replace_one", SETTINGS_COLLECTION, async {
            self.settings()
                .replace_one(doc! { "_id": quiz_id }, &document)
                .upsert(true)
                .await?;
            Ok(())
        })
        .await
    }

    async fn attempts_for_user(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<Vec<QuizAttempt>, StoreError> {
        track_db_operation("find", ATTEMPTS_COLLECTION, async {
            let cursor = self
                .attempts()
                .find(doc! { "user_id": user_id, "quiz_id": quiz_id })
                .sort(doc! { "attempt_number": 1 })
                .await?;
            let documents: Vec<AttemptDocument> = cursor.try_collect().await?;
            Ok(documents.into_iter().map(QuizAttempt::from).collect())
        })
        .await
    }

    async fn attempts_for_quiz(
        &self,
        quiz_id: Option<&str>,
    ) -> Result<Vec<QuizAttempt>, StoreError> {
        let filter = match quiz_id {
            Some(id) => doc! { "quiz_id": id },
            None => Document::new(),
        };

        track_db_operation("find", ATTEMPTS_COLLECTION, async {
            let cursor = self.attempts().find(filter).await?;
            let documents: Vec<AttemptDocument> = cursor.try_collect().await?;
            Ok(documents.into_iter().map(QuizAttempt::from).collect())
        })
        .await
    }

    async fn attempt(&self, attempt_id: &str) -> Result<Option<QuizAttempt>, StoreError> {
        track_db_operation("find_one", ATTEMPTS_COLLECTION, async {
            let found = self.attempts().find_one(doc! { "_id": attempt_id }).await?;
            Ok(found.map(QuizAttempt::from))
        })
        .await
    }

    async fn insert_attempt(
        &self,
        attempt: &QuizAttempt,
        request: Option<&QuizRetryRequest>,
    ) -> Result<InsertOutcome, StoreError> {
        let attempt_doc = AttemptDocument::from(attempt);

        let Some(request) = request else {
            return track_db_operation("insert_one", ATTEMPTS_COLLECTION, async {
                match self.attempts().insert_one(&attempt_doc).await {
                    Ok(_) => Ok(InsertOutcome::Inserted),
                    Err(e) if is_duplicate_key(&e) => Ok(InsertOutcome::SlotTaken),
                    Err(e) => Err(e.into()),
                }
            })
            .await;
        };

        let request_doc = RequestDocument::from(request);
        track_db_operation("transaction", ATTEMPTS_COLLECTION, async {
            let mut session = self.client.start_session().await?;
            let mut tries = 0;
            loop {
                tries += 1;
                match self
                    .insert_in_transaction(&mut session, &attempt_doc, &request_doc)
                    .await
                {
                    Ok(()) => return Ok(InsertOutcome::Inserted),
                    Err(e) if is_duplicate_key(&e) => return Ok(InsertOutcome::SlotTaken),
                    Err(e) if is_transient(&e) && tries < TRANSACTION_ATTEMPTS => {
                        tracing::warn!(
                            attempt_id = %attempt_doc.id,
                            error = %e,
                            "transient transaction error, retrying insert"
                        );
                    }
                    // A write conflict that outlives the retries means a
                    // concurrent submission claimed the slot.
                    Err(e) if is_transient(&e) => return Ok(InsertOutcome::SlotTaken),
                    Err(e) => return Err(e.into()),
                }
            }
        })
        .await
    }

    async fn record_grade(&self, grade: &GradeUpdate) -> Result<bool, StoreError> {
        let graded_at = chrono_to_bson(grade.graded_at);
        let mut set = doc! {
            "score": grade.score,
            "feedback": grade.feedback.clone(),
            "graded_by": grade.graded_by.as_str(),
            "graded_at": graded_at,
            "status": AttemptStatus::Graded.as_str(),
            "updated_at": graded_at,
        };
        if let Some(results) = &grade.results {
            set.insert("results", bson::to_bson(results)?);
        }

        let filter = doc! {
            "_id": grade.attempt_id.as_str(),
            "status": grade.expected_status.as_str(),
            "score": grade.expected_score,
            "updated_at": chrono_to_bson(grade.expected_updated_at),
        };

        track_db_operation("update_one", ATTEMPTS_COLLECTION, async {
            let result = self
                .attempts()
                .update_one(filter, doc! { "$set": set })
                .await?;
            Ok(result.matched_count == 1)
        })
        .await
    }

    async fn mark_study_materials_completed(
        &self,
        attempt_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let at = chrono_to_bson(completed_at);
        track_db_operation("update_one", ATTEMPTS_COLLECTION, async {
            let result = self
                .attempts()
                .update_one(
                    doc! { "_id": attempt_id, "study_materials_completed": false },
                    doc! { "$set": {
                        "study_materials_completed": true,
                        "study_materials_completed_at": at,
                        "updated_at": at,
                    } },
                )
                .await?;
            if result.matched_count == 1 {
                return Ok(true);
            }
            let exists = self
                .attempts()
                .count_documents(doc! { "_id": attempt_id })
                .await?;
            Ok(exists == 1)
        })
        .await
    }

    async fn retry_request(
        &self,
        request_id: &str,
    ) -> Result<Option<QuizRetryRequest>, StoreError> {
        track_db_operation("find_one", REQUESTS_COLLECTION, async {
            let found = self.requests().find_one(doc! { "_id": request_id }).await?;
            Ok(found.map(QuizRetryRequest::from))
        })
        .await
    }

    async fn pending_retry_requests(
        &self,
        quiz_id: Option<&str>,
    ) -> Result<Vec<QuizRetryRequest>, StoreError> {
        let mut filter = doc! { "status": RetryRequestStatus::Pending.as_str() };
        if let Some(id) = quiz_id {
            filter.insert("quiz_id", id);
        }

        track_db_operation("find", REQUESTS_COLLECTION, async {
            let cursor = self
                .requests()
                .find(filter)
                .sort(doc! { "requested_at": 1 })
                .await?;
            let documents: Vec<RequestDocument> = cursor.try_collect().await?;
            Ok(documents.into_iter().map(QuizRetryRequest::from).collect())
        })
        .await
    }

    async fn stale_retry_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuizRetryRequest>, StoreError> {
        let filter = doc! {
            "status": RetryRequestStatus::Pending.as_str(),
            "expires_at": { "$lte": chrono_to_bson(now) },
        };

        track_db_operation("find", REQUESTS_COLLECTION, async {
            let cursor = self.requests().find(filter).await?;
            let documents: Vec<RequestDocument> = cursor.try_collect().await?;
            Ok(documents.into_iter().map(QuizRetryRequest::from).collect())
        })
        .await
    }

    async fn resolve_retry_request(
        &self,
        resolution: &RetryResolution,
    ) -> Result<bool, StoreError> {
        track_db_operation("transaction", REQUESTS_COLLECTION, async {
            let mut session = self.client.start_session().await?;
            let mut tries = 0;
            loop {
                tries += 1;
                match self.resolve_in_transaction(&mut session, resolution).await {
                    Ok(resolved) => return Ok(resolved),
                    Err(e) if is_transient(&e) && tries < TRANSACTION_ATTEMPTS => {
                        tracing::warn!(
                            request_id = %resolution.request_id,
                            error = %e,
                            "transient transaction error, retrying resolution"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        })
        .await
    }

    async fn student_profile(&self, user_id: &str) -> Result<Option<StudentProfile>, StoreError> {
        let filter = match ObjectId::parse_str(user_id) {
            Ok(oid) => doc! { "_id": oid },
            Err(_) => doc! { "_id": user_id },
        };

        track_db_operation("find_one", USERS_COLLECTION, async {
            let found = self
                .db
                .collection::<Document>(USERS_COLLECTION)
                .find_one(filter)
                .await?;
            Ok(found.as_ref().map(profile_from_document))
        })
        .await
    }

    async fn quiz_info(&self, quiz_id: &str) -> Result<Option<QuizInfo>, StoreError> {
        track_db_operation("find_one", QUIZZES_COLLECTION, async {
            let found = self
                .db
                .collection::<QuizInfo>(QUIZZES_COLLECTION)
                .find_one(doc! { "_id": quiz_id })
                .await?;
            Ok(found)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_prefers_full_name() {
        let user = doc! { "name": "Ada Lovelace", "email": "ada@example.com" };
        let profile = profile_from_document(&user);
        assert_eq!(profile.name, "Ada Lovelace");
        assert_eq!(profile.email, "ada@example.com");
    }

    #[test]
    fn profile_joins_first_and_last_name() {
        let user = doc! { "first_name": "Grace", "last_name": "Hopper" };
        let profile = profile_from_document(&user);
        assert_eq!(profile.name, "Grace Hopper");
        assert_eq!(profile.email, "unknown@email.com");
    }

    #[test]
    fn empty_profile_falls_back_to_unknown() {
        let profile = profile_from_document(&Document::new());
        assert_eq!(profile.name, "Unknown Student");
    }

    #[test]
    fn attempt_document_round_trips_through_bson() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let attempt = QuizAttempt {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            quiz_id: "q1".to_string(),
            attempt_number: 2,
            answers: BTreeMap::from([("q-1".to_string(), serde_json::json!("B"))]),
            results: BTreeMap::from([("q-1".to_string(), true)]),
            score: Some(55.5),
            submitted_at: now,
            status: AttemptStatus::AwaitingApproval,
            retry_reason: Some("misread question".to_string()),
            approval: TeacherApproval {
                required: true,
                ..TeacherApproval::default()
            },
            study_materials_completed: false,
            study_materials_completed_at: None,
            graded_by: None,
            graded_at: None,
            feedback: None,
            client: ClientMetadata::default(),
            created_at: now,
            updated_at: now,
        };

        let document = bson::to_document(&AttemptDocument::from(&attempt)).unwrap();
        assert!(matches!(
            document.get("submitted_at"),
            Some(bson::Bson::DateTime(_))
        ));
        assert_eq!(document.get_str("status").unwrap(), "awaiting_approval");

        let decoded: AttemptDocument = bson::from_document(document).unwrap();
        assert_eq!(QuizAttempt::from(decoded), attempt);
    }
}
