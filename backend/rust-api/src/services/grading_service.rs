use std::sync::Arc;

use validator::Validate;

use super::clock::Clock;
use super::grading_notifier::GradingNotifier;
use super::AppState;
use crate::error::QuizError;
use crate::models::{
    AttemptStatus, GradeAttemptRequest, GradeAttemptResponse, GraderIdentity,
    GradingNotificationData, QuizAttempt, QuizInfo, StudentProfile,
};
use crate::store::{GradeUpdate, QuizStore};
use crate::utils::retry::{retry_read, RetryConfig};

pub struct GradingService {
    store: Arc<dyn QuizStore>,
    notifier: Arc<GradingNotifier>,
    clock: Arc<dyn Clock>,
    read_retry: RetryConfig,
}

impl GradingService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            notifier: state.notifier.clone(),
            clock: state.clock.clone(),
            read_retry: state.read_retry.clone(),
        }
    }

    /// Stores a score for the attempt and notifies the student.
    ///
    /// Delivery runs on a detached task; its outcome never reaches the caller.
    pub async fn grade_attempt(
        &self,
        attempt_id: &str,
        grader: &GraderIdentity,
        req: GradeAttemptRequest,
    ) -> Result<GradeAttemptResponse, QuizError> {
        req.validate()?;

        let attempt = retry_read("attempt", &self.read_retry, || self.store.attempt(attempt_id))
            .await?
            .ok_or_else(|| QuizError::NotFound("Attempt".to_string()))?;

        let (is_update, previous_score) = match attempt.status {
            AttemptStatus::PendingGrading => (false, None),
            AttemptStatus::AutoGraded | AttemptStatus::Graded => (true, attempt.score),
            AttemptStatus::AwaitingApproval => {
                return Err(QuizError::Conflict(
                    "attempt is awaiting teacher approval".to_string(),
                ))
            }
            AttemptStatus::Rejected | AttemptStatus::Expired => {
                return Err(QuizError::Conflict(format!(
                    "attempt is {} and cannot be graded",
                    attempt.status.as_str()
                )))
            }
        };

        let feedback = req
            .feedback
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);

        let update = GradeUpdate {
            attempt_id: attempt.id.clone(),
            expected_status: attempt.status,
            expected_score: attempt.score,
            expected_updated_at: attempt.updated_at,
            score: req.score,
            results: req.results,
            feedback: feedback.clone(),
            graded_by: grader.id.clone(),
            graded_at: self.clock.now(),
        };
        if !self.store.record_grade(&update).await? {
            return Err(QuizError::Conflict(
                "attempt changed while it was being graded".to_string(),
            ));
        }

        tracing::info!(
            attempt_id,
            grader_id = %grader.id,
            score = req.score,
            ?previous_score,
            is_update,
            "Attempt graded"
        );

        let data = self
            .notification_data(&attempt, grader, req.score, feedback, is_update, previous_score)
            .await;
        self.notifier.spawn_notify(data);

        Ok(GradeAttemptResponse {
            attempt_id: attempt.id,
            score: req.score,
            previous_score,
            is_update,
            status: AttemptStatus::Graded,
        })
    }

    /// Profile and catalog lookups fall back to placeholders; the grade is
    /// already stored at this point.
    async fn notification_data(
        &self,
        attempt: &QuizAttempt,
        grader: &GraderIdentity,
        score: f64,
        feedback: Option<String>,
        is_update: bool,
        previous_score: Option<f64>,
    ) -> GradingNotificationData {
        let student = match self.store.student_profile(&attempt.user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => StudentProfile::unknown(),
            Err(e) => {
                tracing::warn!(user_id = %attempt.user_id, error = %e, "Student lookup failed");
                StudentProfile::unknown()
            }
        };

        let quiz = match self.store.quiz_info(&attempt.quiz_id).await {
            Ok(Some(info)) => info,
            Ok(None) => QuizInfo {
                title: attempt.quiz_id.clone(),
                ..QuizInfo::default()
            },
            Err(e) => {
                tracing::warn!(quiz_id = %attempt.quiz_id, error = %e, "Quiz lookup failed");
                QuizInfo {
                    title: attempt.quiz_id.clone(),
                    ..QuizInfo::default()
                }
            }
        };

        GradingNotificationData {
            student_id: attempt.user_id.clone(),
            student_name: student.name,
            student_email: student.email,
            assignment_id: attempt.quiz_id.clone(),
            assignment_title: quiz.title,
            assignment_type: quiz.assignment_type,
            course_id: quiz.course_id,
            course_name: quiz.course_title.clone(),
            course_title: quiz.course_title,
            course_subtitle: quiz.course_subtitle,
            score,
            feedback,
            graded_by: grader.clone(),
            is_update,
            previous_score,
        }
    }
}
