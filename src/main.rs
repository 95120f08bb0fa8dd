use proctor_backend::{
    config::{get_config, init_config},
    database::pool::{create_pool, run_migrations},
    routes, AppState,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();
    init_tracing(config.log_format.as_deref());

    let app_state = match &config.database_url {
        Some(database_url) => {
            let pool = create_pool(database_url, config.database_max_connections).await?;
            run_migrations(&pool).await?;
            AppState::with_postgres(pool, config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, proctoring data is kept in memory only");
            AppState::in_memory(config)
        }
    };

    tokio::fs::create_dir_all(config.screenshots_dir()).await?;
    info!("Serving uploads from: {}", config.uploads_dir.display());

    let mut scheduler = app_state.scheduler.start().await?;

    let app = routes::app(app_state, &config.uploads_dir);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = ?e, "Scheduler did not shut down cleanly");
    }
    info!("Server stopped");
    Ok(())
}

fn init_tracing(log_format: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format == Some("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    info!("Shutdown signal received");
}
