//! Admin auth daemon entry point.

use admin_auth::{
    AdminService, AuthConfig, AuthManager, CleanupWorker, PasswordHasher, SqliteStore,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admin_auth=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting admin-auth");

    // Load configuration
    let config = AuthConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", *e);
        AuthConfig::default()
    });

    let store = Arc::new(SqliteStore::connect(&config.database).await?);
    store.migrate().await?;
    tracing::info!(url = %config.database.url, "Admin store ready");

    let hasher = PasswordHasher::with_params(&config.password)?;

    let mut manager = AuthManager::new(&config, hasher.clone());
    if config.session.persist {
        manager = manager.with_store(store.clone());
        tracing::info!("Sessions are written through to the shared store");
    }
    let manager = Arc::new(manager);

    let admins = AdminService::new(store.clone(), hasher, &config);
    if !admins.has_any_admin().await? {
        let setup_token = admins.create_setup_token().await?;
        // Printed once so the operator can finish first-run setup; never logged.
        println!("No administrator exists yet. Setup token: {setup_token}");
    }

    let worker = CleanupWorker::spawn(Arc::clone(&manager), config.session.cleanup_interval());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down admin-auth");

    worker.shutdown().await;
    store.close().await;

    Ok(())
}
