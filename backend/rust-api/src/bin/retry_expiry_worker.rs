use std::time::Duration;

use tracing_subscriber::fmt::init;

use quizretry_api::{
    config::Config,
    services::{
        expiry_worker::RetryExpiryWorker, retry_request_service::RetryRequestService, AppState,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load()?;
    let interval = Duration::from_secs(config.retries.expiry_sweep_interval_secs.max(1));

    let app_state = AppState::connect(config).await?;

    let worker = RetryExpiryWorker::new(RetryRequestService::new(&app_state), interval);

    worker.run().await?;

    Ok(())
}
