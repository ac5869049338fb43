use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::QuizError;
use crate::extractors::{AppJson, CurrentUser};
use crate::models::{Capability, PendingRequestsQuery, ReviewRetryRequest};
use crate::services::retry_request_service::RetryRequestService;
use crate::services::AppState;

pub async fn list_pending_requests(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Query(query): Query<PendingRequestsQuery>,
) -> Result<impl IntoResponse, QuizError> {
    claims.require(Capability::ReviewRetryRequests)?;

    let requests = RetryRequestService::new(&state)
        .list_pending(query.quiz_id.as_deref())
        .await?;
    Ok(Json(requests))
}

pub async fn review_request(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(request_id): Path<String>,
    AppJson(payload): AppJson<ReviewRetryRequest>,
) -> Result<impl IntoResponse, QuizError> {
    claims.require(Capability::ReviewRetryRequests)?;

    let result = RetryRequestService::new(&state)
        .review(&request_id, &claims.sub, payload)
        .await?;
    Ok(Json(result))
}
