mod common;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::json;

use common::{attempts_uri, create_test_app, retry_settings, token, QUIZ_ID};
use quizretry_api::models::{QuizRetrySettings, Role};
use quizretry_api::store::QuizStore;

fn eligibility_uri() -> String {
    format!("/api/v1/quizzes/{}/retry-eligibility", QUIZ_ID)
}

#[tokio::test]
async fn test_first_attempt_allowed_when_retries_disabled() {
    let app = create_test_app().await;
    let student = token("student-1", Role::Student);

    let (status, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_retry"], true);
    assert_eq!(body["current_attempts"], 0);

    let (status, body) = app
        .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 40.0})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["attempt_number"], 1);
    assert_eq!(body["requires_approval"], false);

    let (status, body) = app
        .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 45.0})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "retries_disabled");
    assert_eq!(body["error"], "retries disabled");
}

#[tokio::test]
async fn test_cooldown_then_retry() {
    let app = create_test_app().await;
    app.configure(retry_settings()).await;
    let student = token("student-1", Role::Student);

    app.send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 50.0})))
        .await;

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["can_retry"], false);
    assert_eq!(body["reason"], "cooldown_active");
    assert!(body["retry_after"].is_string());

    app.clock.advance(Duration::minutes(61));

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["can_retry"], true);
    assert_eq!(body["current_attempts"], 1);

    let (status, body) = app
        .send(
            "POST",
            &attempts_uri(),
            Some(&student),
            Some(json!({"score": 75.0, "retry_reason": "misread question 3"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["attempt_number"], 2);
}

#[tokio::test]
async fn test_score_above_threshold_refused() {
    let app = create_test_app().await;
    app.configure(retry_settings()).await;
    let student = token("student-1", Role::Student);

    app.send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 85.0})))
        .await;
    app.clock.advance(Duration::hours(2));

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["can_retry"], false);
    assert_eq!(body["reason"], "score_above_threshold");
    assert_eq!(body["retry_threshold"], 70.0);
}

#[tokio::test]
async fn test_ungraded_attempt_blocks_retry() {
    let app = create_test_app().await;
    app.configure(retry_settings()).await;
    let student = token("student-1", Role::Student);

    app.send("POST", &attempts_uri(), Some(&student), Some(json!({"answers": {"q1": "b"}})))
        .await;
    app.clock.advance(Duration::hours(2));

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["reason"], "awaiting_grading");
}

#[tokio::test]
async fn test_max_retries_reached() {
    let app = create_test_app().await;
    app.configure(QuizRetrySettings {
        max_retries: 1,
        ..retry_settings()
    })
    .await;
    let student = token("student-1", Role::Student);

    for score in [30.0, 40.0] {
        let (status, _) = app
            .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": score})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        app.clock.advance(Duration::hours(2));
    }

    let (status, body) = app
        .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 50.0})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "max_retries_reached");

    let attempts = app.store.attempts_for_user("student-1", QUIZ_ID).await.unwrap();
    assert_eq!(attempts.len(), 2);
}

#[tokio::test]
async fn test_approval_flow() {
    let app = create_test_app().await;
    app.configure(QuizRetrySettings {
        require_teacher_approval: true,
        ..retry_settings()
    })
    .await;
    let student = token("student-1", Role::Student);
    let teacher = token("teacher-1", Role::Teacher);

    app.send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 40.0})))
        .await;
    app.clock.advance(Duration::hours(2));

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["can_retry"], true);
    assert_eq!(body["requires_approval"], true);

    let (status, body) = app
        .send(
            "POST",
            &attempts_uri(),
            Some(&student),
            Some(json!({"score": 65.0, "retry_reason": "was ill during the first try"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["requires_approval"], true);
    assert_eq!(body["attempt_number"], 2);
    let attempt_id = body["attempt_id"].as_str().unwrap().to_string();

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["reason"], "approval_pending");

    // students cannot see the review queue
    let (status, _) = app
        .send("GET", "/api/v1/retry-requests", Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            "GET",
            &format!("/api/v1/retry-requests?quiz_id={}", QUIZ_ID),
            Some(&teacher),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let pending = body.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["attempt_id"], attempt_id.as_str());
    assert_eq!(pending[0]["request_reason"], "was ill during the first try");
    assert_eq!(pending[0]["status"], "pending");
    let request_id = pending[0]["id"].as_str().unwrap().to_string();

    let review_uri = format!("/api/v1/retry-requests/{}/review", request_id);
    let (status, body) = app
        .send(
            "POST",
            &review_uri,
            Some(&teacher),
            Some(json!({"decision": "approved", "notes": "ok"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["decision"], "approved");

    let (status, _) = app
        .send("POST", &review_uri, Some(&teacher), Some(json!({"decision": "rejected"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let attempt = app.store.attempt(&attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.status.as_str(), "auto_graded");
    assert_eq!(attempt.approval.approved, Some(true));
    assert_eq!(attempt.approval.approved_by.as_deref(), Some("teacher-1"));
}

#[tokio::test]
async fn test_voided_attempts_keep_their_numbers() {
    let app = create_test_app().await;
    app.configure(QuizRetrySettings {
        require_teacher_approval: true,
        max_retries: 1,
        ..retry_settings()
    })
    .await;
    let student = token("student-1", Role::Student);
    let teacher = token("teacher-1", Role::Teacher);

    app.send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 40.0})))
        .await;
    app.clock.advance(Duration::hours(2));

    // Rejected by the teacher.
    app.send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 50.0})))
        .await;
    let (_, pending) = app
        .send("GET", "/api/v1/retry-requests", Some(&teacher), None)
        .await;
    let request_id = pending[0]["id"].as_str().unwrap().to_string();
    let (_, body) = app
        .send(
            "POST",
            &format!("/api/v1/retry-requests/{}/review", request_id),
            Some(&teacher),
            Some(json!({"decision": "rejected", "notes": "study first"})),
        )
        .await;
    assert_eq!(body["decision"], "rejected");

    // Left to expire.
    let (_, body) = app
        .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 55.0})))
        .await;
    assert_eq!(body["attempt_number"], 3);
    let (_, pending) = app
        .send("GET", "/api/v1/retry-requests", Some(&teacher), None)
        .await;
    let request_id = pending[0]["id"].as_str().unwrap().to_string();

    app.clock.advance(Duration::hours(169));
    let (status, body) = app
        .send(
            "POST",
            &format!("/api/v1/retry-requests/{}/review", request_id),
            Some(&teacher),
            Some(json!({"decision": "approved"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["decision"], "expired");

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["can_retry"], true);
    assert_eq!(body["current_attempts"], 1);

    let (_, body) = app
        .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 60.0})))
        .await;
    assert_eq!(body["attempt_number"], 4);

    let (_, attempts) = app
        .send("GET", &attempts_uri(), Some(&student), None)
        .await;
    let summary: Vec<(u64, String)> = attempts
        .as_array()
        .unwrap()
        .iter()
        .map(|a| {
            (
                a["attempt_number"].as_u64().unwrap(),
                a["status"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, "auto_graded".to_string()),
            (2, "rejected".to_string()),
            (3, "expired".to_string()),
            (4, "awaiting_approval".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_submissions_record_one_attempt() {
    let app = create_test_app().await;
    let student = token("student-1", Role::Student);

    let mut handles = Vec::new();
    for i in 0..8 {
        let router = app.router.clone();
        let student = student.clone();
        handles.push(tokio::spawn(async move {
            use axum::body::{to_bytes, Body};
            use axum::http::Request;
            use tower::ServiceExt;

            let response = router
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(attempts_uri())
                        .header("content-type", "application/json")
                        .header("authorization", format!("Bearer {}", student))
                        .body(Body::from(json!({"score": 40.0 + i as f64}).to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            (status, body)
        }));
    }

    let mut created = 0;
    let mut ids = std::collections::BTreeSet::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        if status == StatusCode::CREATED {
            created += 1;
        }
        // Late arrivals either replay the winner or see it in their history.
        if body["success"] == true {
            assert_eq!(body["attempt_number"], 1);
            ids.insert(body["attempt_id"].as_str().unwrap().to_string());
        } else {
            assert_eq!(body["reason"], "retries_disabled");
        }
    }

    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
    let attempts = app.store.attempts_for_user("student-1", QUIZ_ID).await.unwrap();
    assert_eq!(attempts.len(), 1);
}

#[tokio::test]
async fn test_idempotency_key_replays_response() {
    let app = create_test_app().await;
    app.configure(retry_settings()).await;
    let student = token("student-1", Role::Student);
    let payload = json!({"score": 40.0, "idempotency_key": "submit-7f3a"});

    let (status, first) = app
        .send("POST", &attempts_uri(), Some(&student), Some(payload.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.clock.advance(Duration::hours(2));
    let (status, second) = app
        .send("POST", &attempts_uri(), Some(&student), Some(payload))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["attempt_id"], first["attempt_id"]);

    let attempts = app.store.attempts_for_user("student-1", QUIZ_ID).await.unwrap();
    assert_eq!(attempts.len(), 1);
}

#[tokio::test]
async fn test_study_materials_gate_retry() {
    let app = create_test_app().await;
    app.configure(QuizRetrySettings {
        require_study_materials: true,
        study_materials_required: vec!["video-1".to_string(), "notes-2".to_string()],
        ..retry_settings()
    })
    .await;
    let student = token("student-1", Role::Student);
    let other = token("student-2", Role::Student);

    let (_, body) = app
        .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 35.0})))
        .await;
    let attempt_id = body["attempt_id"].as_str().unwrap().to_string();
    app.clock.advance(Duration::hours(2));

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["reason"], "study_materials_incomplete");

    let materials_uri = format!("/api/v1/attempts/{}/study-materials", attempt_id);
    let (status, _) = app
        .send(
            "POST",
            &materials_uri,
            Some(&student),
            Some(json!({"completed_material_ids": ["video-1"]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "POST",
            &materials_uri,
            Some(&other),
            Some(json!({"completed_material_ids": ["video-1", "notes-2"]})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            "POST",
            &materials_uri,
            Some(&student),
            Some(json!({"completed_material_ids": ["video-1", "notes-2"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["study_materials_completed"], true);

    let (_, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(body["can_retry"], true);
}

#[tokio::test]
async fn test_idempotency_key_reused_on_another_quiz() {
    let app = create_test_app().await;
    let student = token("student-1", Role::Student);
    let payload = json!({"score": 40.0, "idempotency_key": "k"});

    let (status, first) = app
        .send("POST", &attempts_uri(), Some(&student), Some(payload.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = app
        .send(
            "POST",
            "/api/v1/quizzes/quiz-geometry-2/attempts",
            Some(&student),
            Some(payload),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["replayed"], false);
    assert_ne!(second["attempt_id"], first["attempt_id"]);

    let other = app
        .store
        .attempts_for_user("student-1", "quiz-geometry-2")
        .await
        .unwrap();
    assert_eq!(other.len(), 1);
}

#[tokio::test]
async fn test_out_of_range_stored_cooldown_is_ignored() {
    let app = create_test_app().await;
    app.configure(QuizRetrySettings {
        retry_cooldown_hours: 1e20,
        ..retry_settings()
    })
    .await;
    let student = token("student-1", Role::Student);

    let (status, _) = app
        .send("POST", &attempts_uri(), Some(&student), Some(json!({"score": 40.0})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    app.clock.advance(Duration::hours(2));

    let (status, body) = app
        .send("GET", &eligibility_uri(), Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "retries_disabled");
}
