use anyhow::Result;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod repository;
mod routes;
mod services;

use handlers::AppState;
use repository::SqliteRepository;
use services::datastream_service::DatastreamService;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting fcrepo-legacy with config: {:?}", cfg);

    // --- Ensure content directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created content directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let options = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Connecting to {}", cfg.database_url);

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );
    let repository = SqliteRepository::new(db, cfg.storage_dir.clone());

    // --- Apply schema (idempotent); exit early in migration mode ---
    repository.migrate().await?;
    tracing::info!("Database migration complete.");
    if migrate {
        return Ok(());
    }

    // --- Drop content no datastream references (nothing is in flight yet) ---
    let swept = repository.sweep_unreferenced_blobs().await?;
    tracing::info!("Removed {} unreferenced content blobs.", swept);

    // --- Initialize core service ---
    let state = AppState {
        service: DatastreamService::new(Arc::new(repository), cfg.default_checksum_algorithm),
        default_page_size: cfg.default_page_size,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
