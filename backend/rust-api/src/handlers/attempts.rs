use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::QuizError;
use crate::extractors::{AppJson, CurrentUser};
use crate::models::{Capability, CompleteStudyMaterialsRequest, GradeAttemptRequest};
use crate::services::attempt_service::AttemptService;
use crate::services::grading_service::GradingService;
use crate::services::AppState;

pub async fn grade_attempt(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(attempt_id): Path<String>,
    AppJson(payload): AppJson<GradeAttemptRequest>,
) -> Result<impl IntoResponse, QuizError> {
    claims.require(Capability::GradeAttempts)?;

    let graded = GradingService::new(&state)
        .grade_attempt(&attempt_id, &claims.grader(), payload)
        .await?;
    Ok(Json(graded))
}

pub async fn complete_study_materials(
    State(state): State<Arc<AppState>>,
    CurrentUser(claims): CurrentUser,
    Path(attempt_id): Path<String>,
    AppJson(payload): AppJson<CompleteStudyMaterialsRequest>,
) -> Result<impl IntoResponse, QuizError> {
    let attempt = AttemptService::new(&state)
        .complete_study_materials(&attempt_id, &claims.sub, &payload.completed_material_ids)
        .await?;
    Ok(Json(attempt))
}
