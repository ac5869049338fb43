use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::error::QuizError;
use crate::extractors::CurrentUser;
use crate::models::Capability;
use crate::services::retry_analytics::RetryAnalyticsService;
use crate::services::AppState;

/// Retry analytics across every quiz.
pub async fn get_platform_retry_analytics(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
) -> Result<impl IntoResponse, QuizError> {
    claims.require(Capability::ViewPlatformAnalytics)?;

    let analytics = RetryAnalyticsService::new(&state)
        .retry_analytics(None)
        .await?;
    Ok(Json(analytics))
}
