use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::attempt::AttemptStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryRequestStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RetryRequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RetryRequestStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetryRequestStatus::Pending => "pending",
            RetryRequestStatus::Approved => "approved",
            RetryRequestStatus::Rejected => "rejected",
            RetryRequestStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizRetryRequest {
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    /// The attempt submitted under this request.
    pub attempt_id: String,
    pub request_reason: String,
    pub requested_at: DateTime<Utc>,
    pub status: RetryRequestStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub fn request_status(self) -> RetryRequestStatus {
        match self {
            ReviewDecision::Approved => RetryRequestStatus::Approved,
            ReviewDecision::Rejected => RetryRequestStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReviewRetryRequest {
    pub decision: ReviewDecision,
    #[validate(length(max = 2000, message = "notes are limited to 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single compare-and-set transition applied to a pending request and the
/// attempt it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryResolution {
    pub request_id: String,
    pub attempt_id: String,
    pub request_status: RetryRequestStatus,
    pub attempt_status: AttemptStatus,
    pub approved: Option<bool>,
    pub reviewer_id: Option<String>,
    pub notes: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingRequestsQuery {
    pub quiz_id: Option<String>,
}
