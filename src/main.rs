//! Spark Therapy API - clinic management backend
//! Mission: Role-based access to clinic records behind a hardened auth core

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spark_therapy_backend::{
    app::build_router,
    auth::{AuthState, TokenService, UserStore},
    config::Config,
    middleware::{LoginRateLimiter, RateLimitConfig, SlidingWindowLimiter},
};

#[derive(Parser, Debug)]
#[command(name = "spark-api", about = "Spark Therapy clinic API server")]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let user_store = Arc::new(UserStore::new(&config.database_path)?);
    let tokens = Arc::new(TokenService::from_config(&config));
    let auth_state = AuthState::new(
        user_store,
        tokens,
        config.admin_registration_secret.clone(),
        config.max_failed_logins,
        config.lockout_secs,
    );

    let limiter: Arc<dyn LoginRateLimiter> = Arc::new(SlidingWindowLimiter::new(RateLimitConfig {
        max_requests: config.login_rate_limit,
        window: Duration::from_secs(config.login_rate_window_secs),
        ..Default::default()
    }));

    // Periodic cleanup of stale throttle entries
    tokio::spawn({
        let limiter = limiter.clone();
        async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        }
    });

    let app = build_router(auth_state, limiter);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spark_therapy_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
