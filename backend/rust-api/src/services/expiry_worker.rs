use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::{
    error::QuizError, metrics::RETRY_EXPIRY_WORKER_TICKS_TOTAL,
    services::retry_request_service::RetryRequestService,
};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically expires retry requests nobody reviewed in time.
pub struct RetryExpiryWorker {
    requests: RetryRequestService,
    interval: Duration,
}

impl RetryExpiryWorker {
    /// A zero interval is raised to one second.
    pub fn new(requests: RetryRequestService, interval: Duration) -> Self {
        Self {
            requests,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            "Starting retry expiry worker loop (interval {}s)",
            self.interval.as_secs()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.run_once().await {
                Ok(expired) => {
                    RETRY_EXPIRY_WORKER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    info!(expired, "Retry expiry worker tick completed");
                }
                Err(err) => {
                    RETRY_EXPIRY_WORKER_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "Retry expiry worker tick failed");
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<usize, QuizError> {
        self.requests.expire_stale().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{ClientMetadata, CreateAttemptRequest, QuizRetrySettings};
    use crate::services::attempt_service::AttemptService;
    use crate::services::clock::{Clock, ManualClock};
    use crate::services::grading_notifier::LogOnlyChannel;
    use crate::services::AppState;
    use crate::store::{MemoryQuizStore, MemoryResponseCache, QuizStore};
    use chrono::DateTime;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn tick_expires_overdue_requests() {
        let store = Arc::new(MemoryQuizStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_750_000_000, 0).unwrap(),
        ));
        let settings = QuizRetrySettings {
            allow_retries: true,
            retry_cooldown_hours: 0.0,
            require_teacher_approval: true,
            ..QuizRetrySettings::default()
        };
        store
            .save_retry_settings("quiz-1", &settings, "teacher-1", clock.now())
            .await
            .unwrap();
        let state = AppState::from_parts(
            Config::in_memory("test-secret"),
            store.clone(),
            Arc::new(MemoryResponseCache::new()),
            Arc::new(LogOnlyChannel),
            clock.clone(),
        );

        let attempts = AttemptService::new(&state);
        for _ in 0..2 {
            let req = CreateAttemptRequest {
                answers: BTreeMap::new(),
                results: BTreeMap::new(),
                score: Some(20.0),
                retry_reason: None,
                idempotency_key: None,
            };
            attempts
                .create_attempt("u1", "quiz-1", req, ClientMetadata::default())
                .await
                .unwrap();
        }

        let worker = RetryExpiryWorker::new(RetryRequestService::new(&state), Duration::ZERO);
        assert_eq!(worker.interval, MIN_INTERVAL);
        assert_eq!(worker.run_once().await.unwrap(), 0);

        clock.advance(chrono::Duration::hours(169));
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(worker.run_once().await.unwrap(), 0);
    }
}
