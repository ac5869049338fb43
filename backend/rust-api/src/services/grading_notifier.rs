//! Best-effort delivery of "your quiz was graded" messages.
//!
//! Composition is pure; delivery goes through a [`NotificationChannel`].
//! Nothing in here ever returns an error to the grading path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::clock::Clock;
use crate::metrics::record_notification;
use crate::models::{GradingNotificationData, NotificationMessage};

pub const GRADED_TYPE: &str = "assignment_graded";
pub const GRADE_UPDATED_TYPE: &str = "assignment_grade_updated";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NotificationChannel: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError>;
}

/// Posts messages to the notification delivery function.
pub struct HttpNotificationChannel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpNotificationChannel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl NotificationChannel for HttpNotificationChannel {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.endpoint).json(message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Used when no delivery endpoint is configured.
pub struct LogOnlyChannel;

#[async_trait]
impl NotificationChannel for LogOnlyChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            notification_type = %message.notification_type,
            targets = ?message.target_users,
            title = %message.title,
            "notification endpoint not configured, logging message only"
        );
        Ok(())
    }
}

/// Renders a percentage without a trailing `.0`.
pub fn format_score(score: f64) -> String {
    let rounded = (score * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        format!("{}", rounded)
    }
}

pub fn compose(data: &GradingNotificationData, now: DateTime<Utc>) -> NotificationMessage {
    let kind = data.assignment_type.as_str();
    let score = format_score(data.score);

    let (notification_type, title, base) = if data.is_update {
        let lead = format!(
            "Your {} \"{}\" grade for the course \"{}\" has been updated.",
            kind, data.assignment_title, data.course_name
        );
        let change = match data.previous_score {
            Some(previous) if data.score > previous => format!(
                " Your score increased from {}% to {}%.",
                format_score(previous),
                score
            ),
            Some(previous) if data.score < previous => format!(
                " Your score decreased from {}% to {}%.",
                format_score(previous),
                score
            ),
            Some(_) => format!(" Your score remains {}%.", score),
            None => format!(" You now have a score of {}%.", score),
        };
        (
            GRADE_UPDATED_TYPE,
            format!("{} Grade Updated", data.assignment_type.title_case()),
            lead + &change,
        )
    } else {
        (
            GRADED_TYPE,
            format!("{} Graded", data.assignment_type.title_case()),
            format!(
                "Your {} \"{}\" for the course \"{}\" has been graded. You scored {}%.",
                kind, data.assignment_title, data.course_name, score
            ),
        )
    };

    let feedback = data
        .feedback
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let body = match feedback {
        Some(fb) => format!("{} Feedback: {}", base, fb),
        None => base,
    };

    let mut fields = BTreeMap::new();
    fields.insert("assignmentId".to_string(), data.assignment_id.clone());
    fields.insert("assignmentTitle".to_string(), data.assignment_title.clone());
    fields.insert("assignmentType".to_string(), kind.to_string());
    fields.insert("courseId".to_string(), data.course_id.clone());
    fields.insert("courseName".to_string(), data.course_name.clone());
    fields.insert("courseTitle".to_string(), data.course_title.clone());
    fields.insert("courseSubtitle".to_string(), data.course_subtitle.clone());
    fields.insert("score".to_string(), score);
    fields.insert(
        "previousScore".to_string(),
        data.previous_score.map(format_score).unwrap_or_default(),
    );
    fields.insert(
        "feedback".to_string(),
        feedback.unwrap_or_default().to_string(),
    );
    fields.insert("action".to_string(), notification_type.to_string());
    fields.insert("gradedById".to_string(), data.graded_by.id.clone());
    fields.insert("gradedByName".to_string(), data.graded_by.name.clone());
    fields.insert("gradedByEmail".to_string(), data.graded_by.email.clone());
    fields.insert("isUpdate".to_string(), data.is_update.to_string());
    fields.insert(
        "timestamp".to_string(),
        now.to_rfc3339_opts(SecondsFormat::Millis, true),
    );

    NotificationMessage {
        notification_type: notification_type.to_string(),
        title,
        body,
        data: fields,
        target_users: vec![data.student_id.clone()],
    }
}

pub struct GradingNotifier {
    channel: Arc<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
}

impl GradingNotifier {
    pub fn new(channel: Arc<dyn NotificationChannel>, clock: Arc<dyn Clock>) -> Self {
        Self { channel, clock }
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Delivers the message. Returns whether delivery succeeded; failures are
    /// logged and counted, never propagated.
    pub async fn notify(&self, data: &GradingNotificationData) -> bool {
        let message = compose(data, self.clock.now());

        match self.channel.deliver(&message).await {
            Ok(()) => {
                record_notification("delivered");
                tracing::info!(
                    student_id = %data.student_id,
                    assignment_id = %data.assignment_id,
                    is_update = data.is_update,
                    channel = self.channel.name(),
                    "Notified student {} about {} {}",
                    data.student_name,
                    if data.is_update { "updated" } else { "graded" },
                    data.assignment_type.as_str()
                );
                true
            }
            Err(e) => {
                record_notification("failed");
                tracing::warn!(
                    student_id = %data.student_id,
                    assignment_id = %data.assignment_id,
                    channel = self.channel.name(),
                    error = %e,
                    "Failed to send grading notification"
                );
                false
            }
        }
    }

    /// Runs [`notify`](Self::notify) on a detached task.
    pub fn spawn_notify(self: &Arc<Self>, data: GradingNotificationData) -> JoinHandle<bool> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.notify(&data).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssignmentType, GraderIdentity};
    use crate::services::clock::ManualClock;
    use tokio::sync::Mutex;

    fn data() -> GradingNotificationData {
        GradingNotificationData {
            student_id: "student-1".to_string(),
            student_name: "Ada Lovelace".to_string(),
            student_email: "ada@example.com".to_string(),
            assignment_id: "quiz-1".to_string(),
            assignment_title: "Loops".to_string(),
            assignment_type: AssignmentType::Quiz,
            course_id: "course-1".to_string(),
            course_name: "Intro to Rust".to_string(),
            course_title: "Intro to Rust".to_string(),
            course_subtitle: "Ownership first".to_string(),
            score: 85.0,
            feedback: None,
            graded_by: GraderIdentity {
                id: "teacher-1".to_string(),
                name: "Grace".to_string(),
                email: "grace@example.com".to_string(),
            },
            is_update: false,
            previous_score: None,
        }
    }

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    #[test]
    fn initial_grade_message() {
        let message = compose(&data(), at());

        assert_eq!(message.notification_type, "assignment_graded");
        assert_eq!(message.title, "Quiz Graded");
        assert_eq!(
            message.body,
            "Your quiz \"Loops\" for the course \"Intro to Rust\" has been graded. You scored 85%."
        );
        assert_eq!(message.target_users, vec!["student-1".to_string()]);
        assert_eq!(message.data["isUpdate"], "false");
        assert_eq!(message.data["previousScore"], "");
    }

    #[test]
    fn update_mentions_both_scores() {
        let mut d = data();
        d.is_update = true;
        d.previous_score = Some(60.0);

        let message = compose(&d, at());
        assert_eq!(message.title, "Quiz Grade Updated");
        assert_eq!(message.notification_type, "assignment_grade_updated");
        assert!(message.body.ends_with("Your score increased from 60% to 85%."));
        assert_eq!(message.data["previousScore"], "60");
        assert_eq!(message.data["action"], "assignment_grade_updated");
    }

    #[test]
    fn update_handles_decrease_and_unchanged() {
        let mut d = data();
        d.is_update = true;
        d.previous_score = Some(90.5);
        assert!(compose(&d, at())
            .body
            .contains("decreased from 90.5% to 85%"));

        d.previous_score = Some(85.0);
        assert!(compose(&d, at()).body.ends_with("Your score remains 85%."));
    }

    #[test]
    fn update_without_previous_score() {
        let mut d = data();
        d.is_update = true;

        let body = compose(&d, at()).body;
        assert!(body.ends_with("has been updated. You now have a score of 85%."));
    }

    #[test]
    fn feedback_is_appended_when_present() {
        let mut d = data();
        d.feedback = Some("Nice work".to_string());
        assert!(compose(&d, at()).body.ends_with("You scored 85%. Feedback: Nice work"));

        d.feedback = Some("   ".to_string());
        assert!(compose(&d, at()).body.ends_with("You scored 85%."));
    }

    #[test]
    fn assignment_type_changes_wording() {
        let mut d = data();
        d.assignment_type = AssignmentType::Assignment;
        let message = compose(&d, at());
        assert_eq!(message.title, "Assignment Graded");
        assert!(message.body.starts_with("Your assignment \"Loops\""));
    }

    #[test]
    fn score_formatting() {
        assert_eq!(format_score(85.0), "85");
        assert_eq!(format_score(85.5), "85.5");
        assert_eq!(format_score(66.666), "66.67");
    }

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<NotificationMessage>>,
    }

    #[async_trait]
    impl NotificationChannel for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NotificationChannel for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn deliver(&self, _message: &NotificationMessage) -> Result<(), DeliveryError> {
            Err(DeliveryError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn notify_swallows_delivery_failures() {
        let notifier = GradingNotifier::new(Arc::new(Broken), Arc::new(ManualClock::new(at())));
        assert!(!notifier.notify(&data()).await);
    }

    #[tokio::test]
    async fn spawned_notification_is_delivered() {
        let channel = Arc::new(Recording::default());
        let notifier = Arc::new(GradingNotifier::new(
            channel.clone(),
            Arc::new(ManualClock::new(at())),
        ));

        assert!(notifier.spawn_notify(data()).await.unwrap());
        let sent = channel.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data["timestamp"], "2025-06-15T15:06:40.000Z");
    }
}
