use identity_service::{
    build_router,
    config::IdentityConfig,
    db,
    services::{
        build_role_cache, NoopNotifier, PgStore, ReviewerNotifier, SmtpNotifier,
    },
    AppState,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::rate_limit::spawn_pruning;
use service_core::observability::{init_metrics, init_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on missing or malformed keys
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let metrics = init_metrics().map_err(AppError::InternalError)?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    let store = Arc::new(PgStore::new(pool));

    let role_cache = build_role_cache(&config.role_cache)
        .await
        .map_err(AppError::ConfigError)?;
    tracing::info!(
        backend = ?config.role_cache.backend,
        ttl_seconds = config.role_cache.ttl_seconds,
        "Role cache initialized"
    );

    let notifier: Arc<dyn ReviewerNotifier> = if config.notification.enabled {
        Arc::new(SmtpNotifier::new(&config.notification).map_err(AppError::ConfigError)?)
    } else {
        tracing::info!("Reviewer notifications disabled");
        Arc::new(NoopNotifier)
    };

    let state = AppState::build(config.clone(), store, role_cache, notifier, Some(metrics))?;

    if let Some(admin) = &config.bootstrap_admin {
        state
            .auth
            .bootstrap_administrator(
                &admin.identity,
                admin.secret.expose_secret(),
                &admin.display_name,
            )
            .await?;
    }

    spawn_pruning(
        state.rate_limiters(),
        Duration::from_secs(config.rate_limit.prune_interval_seconds.max(1)),
    );

    let app = build_router(state);

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
