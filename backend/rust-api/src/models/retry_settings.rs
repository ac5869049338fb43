use serde::{Deserialize, Serialize};
use validator::Validate;

pub const MAX_COOLDOWN_HOURS: f64 = 720.0;

/// Per-quiz retry policy authored by the instructor.
///
/// Stored documents may omit fields; anything missing takes the value from
/// [`QuizRetrySettings::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QuizRetrySettings {
    pub allow_retries: bool,

    #[validate(range(min = 1, max = 3, message = "max_retries must be between 1 and 3"))]
    pub max_retries: u32,

    #[validate(range(
        min = 0.0,
        max = MAX_COOLDOWN_HOURS,
        message = "retry_cooldown_hours must be between 0 and 720"
    ))]
    pub retry_cooldown_hours: f64,

    /// Score percentage below which a retry is offered.
    #[validate(range(
        min = 0.0,
        max = 100.0,
        message = "retry_threshold must be between 0 and 100"
    ))]
    pub retry_threshold: f64,

    pub require_teacher_approval: bool,
    pub generate_new_questions: bool,
    pub require_study_materials: bool,
    pub study_materials_required: Vec<String>,
}

impl Default for QuizRetrySettings {
    fn default() -> Self {
        Self {
            allow_retries: false,
            max_retries: 2,
            retry_cooldown_hours: 1.0 / 60.0,
            retry_threshold: 70.0,
            require_teacher_approval: false,
            generate_new_questions: true,
            require_study_materials: false,
            study_materials_required: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RetrySettingsResponse {
    pub quiz_id: String,
    pub settings: QuizRetrySettings,
}
