use tracing::info;
use tracing_subscriber::EnvFilter;
use wa_rs::api::ApiServer;
use wa_rs::config::Config;
use wa_rs::db::Database;
use wa_rs::pool::ClientPool;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = if std::path::Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        Config::default()
    };

    // Initialize logging
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting wa-rs gateway");
    info!("  Listening on: {}", config.server.listen_addr);
    info!("  Database: {}", config.storage.database_url);
    info!(
        "  Quotas: {} sessions/user, {} calls/month",
        config.quota.max_sessions_per_user, config.quota.default_api_calls_limit
    );

    // Connect storage and restore live clients for sessions that were
    // active when the process last stopped
    let db = Database::connect(&config.storage.database_url).await?;

    let pool = ClientPool::new();
    let restored = pool.restore_sessions(&db).await?;
    if restored > 0 {
        info!("Restored {} active session(s)", restored);
    }

    let server = ApiServer::new(config, db, pool);
    server.run().await?;

    Ok(())
}
