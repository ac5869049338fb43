use std::collections::HashSet;
use std::sync::Arc;

use validator::Validate;

use super::clock::Clock;
use super::AppState;
use crate::error::QuizError;
use crate::models::QuizRetrySettings;
use crate::store::QuizStore;
use crate::utils::retry::{retry_read, RetryConfig};

/// Stored settings for a quiz, or the defaults when none were saved or the
/// stored document is out of range.
pub(crate) async fn load_settings(
    store: &dyn QuizStore,
    read_retry: &RetryConfig,
    quiz_id: &str,
) -> Result<QuizRetrySettings, QuizError> {
    let stored = retry_read("retry_settings", read_retry, || store.retry_settings(quiz_id)).await?;
    let Some(settings) = stored else {
        return Ok(QuizRetrySettings::default());
    };

    if let Err(e) = settings.validate() {
        tracing::warn!(quiz_id, error = %e, "Stored retry settings are invalid, using defaults");
        return Ok(QuizRetrySettings::default());
    }
    Ok(settings)
}

pub struct SettingsService {
    store: Arc<dyn QuizStore>,
    clock: Arc<dyn Clock>,
    read_retry: RetryConfig,
}

impl SettingsService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            clock: state.clock.clone(),
            read_retry: state.read_retry.clone(),
        }
    }

    pub async fn get_settings(&self, quiz_id: &str) -> Result<QuizRetrySettings, QuizError> {
        load_settings(self.store.as_ref(), &self.read_retry, quiz_id).await
    }

    pub async fn update_settings(
        &self,
        quiz_id: &str,
        mut settings: QuizRetrySettings,
        updated_by: &str,
    ) -> Result<QuizRetrySettings, QuizError> {
        if quiz_id.trim().is_empty() {
            return Err(QuizError::Validation("quiz_id is required".to_string()));
        }
        settings.validate()?;

        let mut seen = HashSet::new();
        settings.study_materials_required = settings
            .study_materials_required
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();

        self.store
            .save_retry_settings(quiz_id, &settings, updated_by, self.clock.now())
            .await?;

        tracing::info!(
            quiz_id,
            updated_by,
            allow_retries = settings.allow_retries,
            max_retries = settings.max_retries,
            "Retry settings updated"
        );
        Ok(settings)
    }
}
