use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::eligibility::IneligibilityReason;

/// Grading lifecycle of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    AwaitingApproval,
    PendingGrading,
    AutoGraded,
    Graded,
    Rejected,
    Expired,
}

impl AttemptStatus {
    /// Void attempts keep their number but no longer count toward the limit.
    pub fn is_void(self) -> bool {
        matches!(self, AttemptStatus::Rejected | AttemptStatus::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::AwaitingApproval => "awaiting_approval",
            AttemptStatus::PendingGrading => "pending_grading",
            AttemptStatus::AutoGraded => "auto_graded",
            AttemptStatus::Graded => "graded",
            AttemptStatus::Rejected => "rejected",
            AttemptStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeacherApproval {
    pub required: bool,
    /// `None` until a reviewer decides.
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub attempt_number: u32,
    pub answers: BTreeMap<String, serde_json::Value>,
    pub results: BTreeMap<String, bool>,
    pub score: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub retry_reason: Option<String>,
    pub approval: TeacherApproval,
    pub study_materials_completed: bool,
    pub study_materials_completed_at: Option<DateTime<Utc>>,
    pub graded_by: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
    pub client: ClientMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAttemptRequest {
    #[serde(default)]
    pub answers: BTreeMap<String, serde_json::Value>,

    /// Per-question correctness when the quiz is scored automatically.
    #[serde(default)]
    pub results: BTreeMap<String, bool>,

    #[validate(range(min = 0.0, max = 100.0, message = "score must be between 0 and 100"))]
    pub score: Option<f64>,

    #[validate(length(max = 2000, message = "retry_reason is limited to 2000 characters"))]
    pub retry_reason: Option<String>,

    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateAttemptResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
    pub requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IneligibilityReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub replayed: bool,
}

impl CreateAttemptResult {
    pub fn recorded(attempt: &QuizAttempt) -> Self {
        Self {
            success: true,
            attempt_id: Some(attempt.id.clone()),
            attempt_number: Some(attempt.attempt_number),
            requires_approval: attempt.status == AttemptStatus::AwaitingApproval,
            ..Self::default()
        }
    }

    pub fn refused(reason: IneligibilityReason, retry_after: Option<DateTime<Utc>>) -> Self {
        Self {
            success: false,
            error: Some(reason.message().to_string()),
            reason: Some(reason),
            retry_after,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteStudyMaterialsRequest {
    #[serde(default)]
    pub completed_material_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserScopeQuery {
    pub user_id: Option<String>,
}
