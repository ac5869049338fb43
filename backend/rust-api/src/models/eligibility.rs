use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a new attempt is refused. Only one reason is reported at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibilityReason {
    RetriesDisabled,
    MaxRetriesReached,
    ApprovalPending,
    AwaitingGrading,
    ScoreAboveThreshold,
    CooldownActive,
    StudyMaterialsIncomplete,
}

impl IneligibilityReason {
    pub fn message(self) -> &'static str {
        match self {
            IneligibilityReason::RetriesDisabled => "retries disabled",
            IneligibilityReason::MaxRetriesReached => "max retries reached",
            IneligibilityReason::ApprovalPending => "retry request pending approval",
            IneligibilityReason::AwaitingGrading => "previous attempt awaiting grading",
            IneligibilityReason::ScoreAboveThreshold => "score above retry threshold",
            IneligibilityReason::CooldownActive => "cooldown active",
            IneligibilityReason::StudyMaterialsIncomplete => "study materials incomplete",
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            IneligibilityReason::RetriesDisabled => "retries_disabled",
            IneligibilityReason::MaxRetriesReached => "max_retries_reached",
            IneligibilityReason::ApprovalPending => "approval_pending",
            IneligibilityReason::AwaitingGrading => "awaiting_grading",
            IneligibilityReason::ScoreAboveThreshold => "score_above_threshold",
            IneligibilityReason::CooldownActive => "cooldown_active",
            IneligibilityReason::StudyMaterialsIncomplete => "study_materials_incomplete",
        }
    }
}

impl std::fmt::Display for IneligibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEligibility {
    pub can_retry: bool,
    pub reason: Option<IneligibilityReason>,
    pub message: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
    pub requires_approval: bool,
    pub current_attempts: u32,
    pub max_retries: u32,
    pub retry_threshold: f64,
}
