#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tower::ServiceExt;

use quizretry_api::config::Config;
use quizretry_api::create_router;
use quizretry_api::middlewares::auth::{JwtClaims, JwtService};
use quizretry_api::models::{NotificationMessage, QuizInfo, QuizRetrySettings, Role, StudentProfile};
use quizretry_api::services::clock::{Clock, ManualClock};
use quizretry_api::services::grading_notifier::{DeliveryError, NotificationChannel};
use quizretry_api::services::AppState;
use quizretry_api::store::{MemoryQuizStore, MemoryResponseCache, QuizStore};

pub const JWT_SECRET: &str = "integration-test-secret";
pub const QUIZ_ID: &str = "quiz-algebra-1";

/// Captures outgoing notifications, optionally failing every delivery.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<NotificationMessage>>,
    pub fail: bool,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
        self.sent.lock().await.push(message.clone());
        if self.fail {
            return Err(DeliveryError::Unavailable("test channel down".to_string()));
        }
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryQuizStore>,
    pub clock: Arc<ManualClock>,
    pub channel: Arc<RecordingChannel>,
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap()
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with_channel(RecordingChannel::default()).await
}

pub async fn create_test_app_with_channel(channel: RecordingChannel) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(MemoryQuizStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let channel = Arc::new(channel);

    store
        .seed_profile(
            "student-1",
            StudentProfile {
                name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
            },
        )
        .await;
    store
        .seed_quiz(
            QUIZ_ID,
            QuizInfo {
                title: "Linear Equations".to_string(),
                course_id: "course-1".to_string(),
                course_title: "Algebra I".to_string(),
                course_subtitle: "Foundations".to_string(),
                ..QuizInfo::default()
            },
        )
        .await;

    let state = AppState::from_parts(
        Config::in_memory(JWT_SECRET),
        store.clone(),
        Arc::new(MemoryResponseCache::new()),
        channel.clone(),
        clock.clone(),
    );

    TestApp {
        router: create_router(Arc::new(state)),
        store,
        clock,
        channel,
    }
}

impl TestApp {
    pub async fn configure(&self, settings: QuizRetrySettings) {
        self.store
            .save_retry_settings(QUIZ_ID, &settings, "teacher-1", self.clock.now())
            .await
            .unwrap();
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Waits for detached notification tasks to deliver `count` messages.
    pub async fn notifications(&self, count: usize) -> Vec<NotificationMessage> {
        for _ in 0..100 {
            {
                let sent = self.channel.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.channel.sent.lock().await.clone()
    }
}

pub fn token(user_id: &str, role: Role) -> String {
    let now = Utc::now().timestamp() as usize;
    let claims = JwtClaims {
        sub: user_id.to_string(),
        role,
        name: Some(format!("{} name", user_id)),
        email: Some(format!("{}@example.com", user_id)),
        exp: now + 3600,
        iat: now,
    };
    JwtService::new(JWT_SECRET).generate_token(&claims).unwrap()
}

pub fn retry_settings() -> QuizRetrySettings {
    QuizRetrySettings {
        allow_retries: true,
        max_retries: 2,
        retry_cooldown_hours: 1.0,
        retry_threshold: 70.0,
        require_teacher_approval: false,
        ..QuizRetrySettings::default()
    }
}

pub fn attempts_uri() -> String {
    format!("/api/v1/quizzes/{}/attempts", QUIZ_ID)
}
