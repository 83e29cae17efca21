use recovery_service::{
    build_router,
    config::RecoveryConfig,
    db,
    services::{
        metrics, BackgroundTasks, HttpPermissionDirectory, MailServiceClient, PermissionCache,
        PgDurableStore, PgUserDirectory, RecoveryCollaborators, RecoveryService, RecoverySettings,
        RecoveryTokenIssuer, RedisCache, RedisTaskQueue, SessionStore,
    },
    AppState,
};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = RecoveryConfig::from_env()?;

    let _tracing = init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.otlp_endpoint.as_deref(),
    )?;

    metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting recovery service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::anyhow!(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::anyhow!(e)))?;

    let redis = RedisCache::new(&config.redis).await?;

    let tasks = BackgroundTasks::new(config.background.workers, config.background.queue_depth);
    let store = SessionStore::new(
        Arc::new(redis.clone()),
        Arc::new(PgDurableStore::new(pool.clone())),
        tasks,
    );

    let users = Arc::new(PgUserDirectory::new(pool.clone()));
    let mail = Arc::new(MailServiceClient::new(
        &config.downstream.mail_service_url,
        config.timeouts.recovery_step(),
    )?);
    let permission_directory = Arc::new(HttpPermissionDirectory::new(
        &config.downstream.permission_service_url,
        config.timeouts.auth_call(),
    )?);

    let recovery = RecoveryService::new(
        RecoveryCollaborators {
            users: users.clone(),
            store: store.clone(),
            queue: Arc::new(RedisTaskQueue::new(
                redis.connection(),
                &config.recovery.queue_name,
            )),
            templates: mail.clone(),
            history: mail.clone(),
            statuses: mail,
            tokens: RecoveryTokenIssuer::from_config(&config.recovery),
        },
        RecoverySettings::from_config(&config),
    );
    let permissions = PermissionCache::new(
        permission_directory,
        store.clone(),
        config.timeouts.auth_call(),
    );

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(run_sweeper(
        store.clone(),
        Duration::from_secs(config.background.sweep_interval_seconds),
        shutdown.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        recovery,
        permissions,
        users,
        store: store.clone(),
    };
    let app = build_router(state);

    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| service_core::error::AppError::ConfigError(anyhow::anyhow!("{}", e)))?;

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;

    tracing::info!("Flushing background session writes");
    store.flush().await;

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Periodically purge expired durable session records until cancelled.
async fn run_sweeper(store: SessionStore, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Session sweeper shutting down");
                break;
            }
            _ = ticker.tick() => store.sweep_expired(),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
