use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use approval_backend::app_state::AppState;
use approval_backend::config::Config;
use approval_backend::db::pool::get_db_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    std::fs::create_dir_all(&config.log_dir).context("Failed to create logs directory")?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("approval_backend=debug,tower_http=info")),
        )
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    let pool = match &config.database_url {
        Some(url) => Some(get_db_pool(url).await?),
        None => {
            info!("DATABASE_URL not set, using in-memory stores");
            None
        }
    };

    if config.auth_disabled {
        info!("Authentication disabled, every caller acts as the development admin");
    }

    let bind_addr = config.bind_addr;
    let state = AppState::build(config, pool.clone()).await?;
    let app = approval_backend::app(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Server running at http://{}", bind_addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(pool) = pool {
        info!("Closing database pool...");
        pool.close().await;
    }

    if let Err(e) = result {
        error!("Server encountered an error: {}", e);
        return Err(e.into());
    }
    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => {
            error!("Failed to listen for Ctrl+C, running until killed: {}", e);
            std::future::pending::<()>().await
        }
    }
}
