use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::config::{Config, StorageBackend};
use crate::store::{
    MemoryQuizStore, MemoryResponseCache, MongoQuizStore, QuizStore, RedisResponseCache,
    ResponseCache,
};
use crate::utils::retry::RetryConfig;

use self::clock::{Clock, SystemClock};
use self::grading_notifier::{
    GradingNotifier, HttpNotificationChannel, LogOnlyChannel, NotificationChannel,
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn QuizStore>,
    pub cache: Arc<dyn ResponseCache>,
    pub notifier: Arc<GradingNotifier>,
    pub clock: Arc<dyn Clock>,
    pub read_retry: RetryConfig,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let store = MongoQuizStore::new(mongo_client, &config.mongo_database);
        store.ensure_indexes().await?;

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let cache = RedisResponseCache::new(redis);
        tokio::time::timeout(Duration::from_secs(5), cache.ping())
            .await
            .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let channel = notification_channel(&config)?;
        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(cache),
            channel,
            clock,
        ))
    }

    /// State backed by the in-memory store and cache.
    pub fn in_memory(config: Config) -> anyhow::Result<Self> {
        let channel = notification_channel(&config)?;
        Ok(Self::from_parts(
            config,
            Arc::new(MemoryQuizStore::new()),
            Arc::new(MemoryResponseCache::new()),
            channel,
            Arc::new(SystemClock),
        ))
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn QuizStore>,
        cache: Arc<dyn ResponseCache>,
        channel: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let notifier = Arc::new(GradingNotifier::new(channel, clock.clone()));
        Self {
            config,
            store,
            cache,
            notifier,
            clock,
            read_retry: RetryConfig::default(),
        }
    }

    /// Builds state for the configured storage backend.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        match config.storage_backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage, data is lost on restart");
                Self::in_memory(config)
            }
            StorageBackend::Mongo => {
                let mongo_client = MongoClient::with_uri_str(&config.mongo_uri).await?;
                tracing::info!("MongoDB connected");
                let redis_client = redis::Client::open(config.redis_uri.clone())?;
                Self::new(config, mongo_client, redis_client).await
            }
        }
    }
}

fn notification_channel(config: &Config) -> anyhow::Result<Arc<dyn NotificationChannel>> {
    match &config.notifications.endpoint {
        Some(endpoint) => {
            let channel = HttpNotificationChannel::new(
                endpoint.clone(),
                config.notifications.api_key.clone(),
                Duration::from_millis(config.notifications.timeout_ms),
            )?;
            tracing::info!(endpoint = %endpoint, "Grading notifications delivered over HTTP");
            Ok(Arc::new(channel))
        }
        None => {
            tracing::warn!("NOTIFICATION_ENDPOINT not set, grading notifications are only logged");
            Ok(Arc::new(LogOnlyChannel))
        }
    }
}

pub mod attempt_service;
pub mod clock;
pub mod expiry_worker;
pub mod grading_notifier;
pub mod grading_service;
pub mod retry_analytics;
pub mod retry_eligibility;
pub mod retry_request_service;
pub mod settings_service;
