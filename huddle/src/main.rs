use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use huddle::api::{ApiServer, ApiServerConfig, AppState};
use huddle::config::AppConfig;
use huddle::database::{
    self,
    repositories::{SqlxCampaignRepository, SqlxDirectoryRepository},
};
use huddle::logging::init_logging;
use huddle::metrics::DeliveryMetrics;
use huddle::notification::{Dispatchers, NotificationService};
use huddle::scheduler::{CampaignService, ReminderCycle, SchedulerService};
use huddle::utils::http_client::install_rustls_provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    let (logging_config, _log_guard) = init_logging(config.log_dir.as_deref())?;
    install_rustls_provider();

    let pool = database::init_pool_with_size(&config.database_url, config.pool_size).await?;
    database::run_migrations(&pool).await?;
    info!(database_url = %config.database_url, "Database ready");

    let metrics = Arc::new(DeliveryMetrics::new());
    let dispatchers = Dispatchers::from_env();
    info!(channels = ?dispatchers.enabled(), "Delivery channels loaded");

    let notification_service = Arc::new(NotificationService::new(
        pool.clone(),
        dispatchers,
        metrics,
    ));
    let campaign_service = Arc::new(CampaignService::new(
        Arc::new(SqlxCampaignRepository::new(pool.clone())),
        notification_service.clone(),
        &config.scheduler,
    ));
    let reminders = Arc::new(ReminderCycle::new(
        Arc::new(SqlxDirectoryRepository::new(pool.clone())),
        notification_service.clone(),
        &config.scheduler,
    ));

    let cancel_token = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel_token.clone());

    let scheduler = SchedulerService::new(reminders, campaign_service.clone(), config.scheduler.clone());
    let scheduler_handles = scheduler.start(cancel_token.clone());

    let state = AppState::new(notification_service, campaign_service)
        .with_logging_config(logging_config);
    let server = ApiServer::with_state(
        ApiServerConfig::from_env_or_default(),
        state,
        cancel_token.clone(),
    );

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let served = server.run().await;
    cancel_token.cancel();

    for handle in scheduler_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
    pool.close().await;
    info!("huddle stopped");

    served?;
    Ok(())
}
