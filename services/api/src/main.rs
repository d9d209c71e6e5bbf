use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod mailer;
mod middleware;
mod routes;
mod sessions;
mod state;
mod workflow;

use auth::UserRepository;
use auth::rate_limiter::{RateLimiter, RateLimiterConfig};
use common::cache::{RedisConfig, RedisPool};
use common::database::{DatabaseConfig, init_pool};
use storage::{FileRepository, Reconciler, S3Gateway};
use tokio::net::TcpListener;

use crate::{
    config::Settings,
    sessions::RedisRevocationList,
    state::AppState,
    workflow::{Policy, Workflows},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting filevault API service");

    let settings = Settings::load()?;
    let tokens = settings.token_service()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }
    common::database::migrate(&pool).await?;

    let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
    if !redis.health_check().await.unwrap_or(false) {
        warn!("Redis is not reachable yet; logout and session checks will fail until it is");
    }

    let storage = Arc::new(S3Gateway::new(settings.s3_config()).await);
    let catalog = Arc::new(FileRepository::new(pool.clone()));

    let _scheduler = if settings.reconcile.enabled {
        let reconciler = Reconciler::new(
            storage.clone(),
            catalog.clone(),
            Duration::from_secs(settings.reconcile.grace_period_secs),
        )
        .with_storage_timeout(Duration::from_secs(settings.storage.timeout_secs));
        Some(reconciler.start(&settings.reconcile.schedule).await?)
    } else {
        info!("Reconciliation disabled");
        None
    };

    let workflows = Workflows {
        users: Arc::new(UserRepository::new(pool.clone())),
        tokens,
        catalog,
        storage,
        mailer: mailer::from_settings(&settings.mail)?,
        login_limiter: RateLimiter::new(RateLimiterConfig::default()),
        policy: Policy {
            public_base_url: settings.server.public_base_url.clone(),
            mail_sender: settings.mail.sender.clone(),
            share_link_ttl: Duration::from_secs(settings.sharing.link_ttl_secs),
            storage_timeout: Duration::from_secs(settings.storage.timeout_secs),
            mail_timeout: Duration::from_secs(settings.mail.timeout_secs),
        },
    };

    let app_state = AppState {
        workflows,
        revocations: Arc::new(RedisRevocationList::new(redis)),
        db_pool: Some(pool),
        max_upload_bytes: settings.server.max_upload_bytes as usize,
    };

    info!("API service initialized successfully");

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&settings.server.bind_address).await?;
    info!("API service listening on {}", settings.server.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
