use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::attempt::AttemptStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentType {
    Assignment,
    #[default]
    Quiz,
}

impl AssignmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentType::Assignment => "assignment",
            AssignmentType::Quiz => "quiz",
        }
    }

    /// Capitalized form used in notification titles.
    pub fn title_case(self) -> &'static str {
        match self {
            AssignmentType::Assignment => "Assignment",
            AssignmentType::Quiz => "Quiz",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GradeAttemptRequest {
    #[validate(range(min = 0.0, max = 100.0, message = "score must be between 0 and 100"))]
    pub score: f64,

    #[serde(default)]
    pub results: Option<BTreeMap<String, bool>>,

    #[validate(length(max = 5000, message = "feedback is limited to 5000 characters"))]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeAttemptResponse {
    pub attempt_id: String,
    pub score: f64,
    pub previous_score: Option<f64>,
    pub is_update: bool,
    pub status: AttemptStatus,
}

/// Whoever produced the score: a teacher or an automated grader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraderIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: String,
    pub email: String,
}

impl StudentProfile {
    pub fn unknown() -> Self {
        Self {
            name: "Unknown Student".to_string(),
            email: "unknown@email.com".to_string(),
        }
    }
}

/// Catalog entry for a quiz, owned by the course authoring side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizInfo {
    pub title: String,
    #[serde(default)]
    pub assignment_type: AssignmentType,
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub course_title: String,
    #[serde(default)]
    pub course_subtitle: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradingNotificationData {
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub assignment_id: String,
    pub assignment_title: String,
    pub assignment_type: AssignmentType,
    pub course_id: String,
    pub course_name: String,
    pub course_title: String,
    pub course_subtitle: String,
    pub score: f64,
    pub feedback: Option<String>,
    pub graded_by: GraderIdentity,
    pub is_update: bool,
    pub previous_score: Option<f64>,
}

/// Payload accepted by the notification delivery function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    #[serde(rename = "targetUsers")]
    pub target_users: Vec<String>,
}
