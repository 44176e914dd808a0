use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::{error, info};

use shipment_tracking as api;

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Carrier adapters for every carrier with credentials configured
    let carriers = Arc::new(
        api::carriers::CarrierRegistry::from_settings(&cfg.carriers)
            .context("failed to build carrier registry")?,
    );
    info!(carriers = ?carriers.codes(), "carrier adapters ready");

    // Aggregate app services used by HTTP handlers and jobs
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        &cfg,
        carriers,
        Arc::new(api::notifications::LoggingEmailSender),
    )?;

    let scheduler = if cfg.scheduler.enabled {
        let scheduler = api::scheduler::Scheduler::new(db_arc.clone(), services.jobs(&cfg));
        scheduler.start().await?;
        Some(scheduler)
    } else {
        info!("Background scheduler disabled");
        None
    };

    let app_state = api::AppState::new(db_arc, cfg.clone(), services);
    api::rate_limiter::start_cleanup_task(
        app_state.rate_limiters.all(),
        RATE_LIMIT_CLEANUP_INTERVAL,
    );

    let app = api::router(app_state).layer(CompressionLayer::new());

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("shipment tracking API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
