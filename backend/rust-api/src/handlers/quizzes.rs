use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::QuizError;
use crate::extractors::{AppJson, CurrentUser};
use crate::models::{
    Capability, ClientMetadata, CreateAttemptRequest, QuizRetrySettings, RetrySettingsResponse,
    UserScopeQuery,
};
use crate::services::attempt_service::AttemptService;
use crate::services::retry_analytics::RetryAnalyticsService;
use crate::services::settings_service::SettingsService;
use crate::services::AppState;

/// First address in `x-forwarded-for`, as set by the ingress proxy.
fn client_metadata(headers: &HeaderMap) -> ClientMetadata {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    ClientMetadata {
        ip_address: header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        user_agent: header_str(header::USER_AGENT.as_str()).map(str::to_string),
    }
}

pub async fn get_retry_settings(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    let settings = SettingsService::new(&state).get_settings(&quiz_id).await?;
    Ok(Json(RetrySettingsResponse { quiz_id, settings }))
}

pub async fn update_retry_settings(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(quiz_id): Path<String>,
    AppJson(payload): AppJson<QuizRetrySettings>,
) -> Result<impl IntoResponse, QuizError> {
    claims.require(Capability::ConfigureQuizzes)?;

    let settings = SettingsService::new(&state)
        .update_settings(&quiz_id, payload, &claims.sub)
        .await?;
    Ok(Json(RetrySettingsResponse { quiz_id, settings }))
}

pub async fn get_retry_eligibility(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(quiz_id): Path<String>,
    Query(query): Query<UserScopeQuery>,
) -> Result<impl IntoResponse, QuizError> {
    let user_id = claims.scope_user(query.user_id.as_deref())?;

    let eligibility = AttemptService::new(&state)
        .check_eligibility(user_id, &quiz_id)
        .await?;
    Ok(Json(eligibility))
}

pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(quiz_id): Path<String>,
    Query(query): Query<UserScopeQuery>,
) -> Result<impl IntoResponse, QuizError> {
    let user_id = claims.scope_user(query.user_id.as_deref())?;

    let attempts = AttemptService::new(&state)
        .list_attempts(user_id, &quiz_id)
        .await?;
    Ok(Json(attempts))
}

/// Refusals come back as 200 with `success: false`; the body says why.
pub async fn create_attempt(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(quiz_id): Path<String>,
    headers: HeaderMap,
    AppJson(payload): AppJson<CreateAttemptRequest>,
) -> Result<impl IntoResponse, QuizError> {
    let result = AttemptService::new(&state)
        .create_attempt(&claims.sub, &quiz_id, payload, client_metadata(&headers))
        .await?;

    let status = if result.success && !result.replayed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)))
}

pub async fn get_quiz_retry_analytics(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, QuizError> {
    claims.require(Capability::ViewCourseAnalytics)?;

    let analytics = RetryAnalyticsService::new(&state)
        .retry_analytics(Some(&quiz_id))
        .await?;
    Ok(Json(analytics))
}
