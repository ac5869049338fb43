use std::sync::Arc;

use chrono::{DateTime, Utc};
use validator::Validate;

use super::clock::Clock;
use super::AppState;
use crate::error::QuizError;
use crate::metrics::record_retry_request;
use crate::models::{
    AttemptStatus, QuizRetryRequest, RetryRequestStatus, RetryResolution, ReviewDecision,
    ReviewRequestResult, ReviewRetryRequest,
};
use crate::store::QuizStore;
use crate::utils::retry::{retry_read, RetryConfig};

pub struct RetryRequestService {
    store: Arc<dyn QuizStore>,
    clock: Arc<dyn Clock>,
    read_retry: RetryConfig,
}

fn expiry_resolution(request: &QuizRetryRequest, at: DateTime<Utc>) -> RetryResolution {
    RetryResolution {
        request_id: request.id.clone(),
        attempt_id: request.attempt_id.clone(),
        request_status: RetryRequestStatus::Expired,
        attempt_status: AttemptStatus::Expired,
        approved: None,
        reviewer_id: None,
        notes: None,
        resolved_at: at,
    }
}

impl RetryRequestService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            clock: state.clock.clone(),
            read_retry: state.read_retry.clone(),
        }
    }

    pub async fn list_pending(
        &self,
        quiz_id: Option<&str>,
    ) -> Result<Vec<QuizRetryRequest>, QuizError> {
        let requests = retry_read("pending_retry_requests", &self.read_retry, || {
            self.store.pending_retry_requests(quiz_id)
        })
        .await?;
        Ok(requests)
    }

    pub async fn review(
        &self,
        request_id: &str,
        reviewer_id: &str,
        req: ReviewRetryRequest,
    ) -> Result<ReviewRequestResult, QuizError> {
        req.validate()?;

        let request = retry_read("retry_request", &self.read_retry, || {
            self.store.retry_request(request_id)
        })
        .await?
        .ok_or_else(|| QuizError::NotFound("Retry request".to_string()))?;

        if request.status.is_terminal() {
            return Err(QuizError::Conflict(format!(
                "retry request is already {}",
                request.status.as_str()
            )));
        }

        let now = self.clock.now();
        if now >= request.expires_at {
            if self
                .store
                .resolve_retry_request(&expiry_resolution(&request, now))
                .await?
            {
                record_retry_request(RetryRequestStatus::Expired.as_str());
                tracing::info!(request_id, "Retry request expired before review");
            }
            return Ok(ReviewRequestResult {
                success: false,
                decision: Some(RetryRequestStatus::Expired.as_str().to_string()),
                attempt_id: Some(request.attempt_id),
                error: Some("retry request has expired".to_string()),
            });
        }

        let attempt = retry_read("attempt", &self.read_retry, || {
            self.store.attempt(&request.attempt_id)
        })
        .await?
        .ok_or_else(|| QuizError::NotFound("Attempt".to_string()))?;

        let (attempt_status, approved) = match req.decision {
            ReviewDecision::Approved if attempt.score.is_some() => {
                (AttemptStatus::AutoGraded, Some(true))
            }
            ReviewDecision::Approved => (AttemptStatus::PendingGrading, Some(true)),
            ReviewDecision::Rejected => (AttemptStatus::Rejected, Some(false)),
        };
        let request_status = req.decision.request_status();

        let resolution = RetryResolution {
            request_id: request.id.clone(),
            attempt_id: request.attempt_id.clone(),
            request_status,
            attempt_status,
            approved,
            reviewer_id: Some(reviewer_id.to_string()),
            notes: req
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            resolved_at: now,
        };
        if !self.store.resolve_retry_request(&resolution).await? {
            return Err(QuizError::Conflict(
                "retry request was resolved by someone else".to_string(),
            ));
        }

        record_retry_request(request_status.as_str());
        tracing::info!(
            request_id,
            reviewer_id,
            decision = request_status.as_str(),
            attempt_id = %request.attempt_id,
            "Retry request reviewed"
        );

        Ok(ReviewRequestResult {
            success: true,
            decision: Some(request_status.as_str().to_string()),
            attempt_id: Some(request.attempt_id),
            error: None,
        })
    }

    /// Expires every pending request past its deadline. Returns how many
    /// were moved.
    pub async fn expire_stale(&self) -> Result<usize, QuizError> {
        let now = self.clock.now();
        let stale = retry_read("stale_retry_requests", &self.read_retry, || {
            self.store.stale_retry_requests(now)
        })
        .await?;

        let mut expired = 0;
        for request in &stale {
            match self
                .store
                .resolve_retry_request(&expiry_resolution(request, now))
                .await
            {
                Ok(true) => {
                    expired += 1;
                    record_retry_request(RetryRequestStatus::Expired.as_str());
                }
                Ok(false) => {
                    tracing::debug!(request_id = %request.id, "Request resolved before expiry");
                }
                Err(e) => {
                    tracing::error!(request_id = %request.id, error = %e, "Failed to expire request");
                }
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expired stale retry requests");
        }
        Ok(expired)
    }
}
