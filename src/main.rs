use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kommentify_server::{build_router, create_pool, migrate, AppState, Config, Integrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kommentify_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Kommentify Server...");

    // Load configuration
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        "Environment: {}, Server: {}",
        config.environment,
        config.server_address()
    );

    if config.is_production() && config.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("ALLOWED_ORIGINS is a wildcard in production");
    }

    // Create database connection pool
    let pool = create_pool(&config.database_url).await?;

    // Run migrations
    migrate(&pool).await?;

    let integrations = Integrations::from_config(&config)?;
    let addr: SocketAddr = config.server_address().parse()?;

    let app = build_router(AppState::new(pool, config, integrations));

    // Start server
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
