use anyhow::{Context, Result};
use axum::Router;
use course_trace_api::{
    auth,
    config::{self, StorageBackend, StorageConfig},
    db,
    metrics::{self, Metrics},
    routes,
    state::AppState,
    storage::{
        ObjectStore,
        credentials::{CredentialStrategy, TokenProvider},
        gcs::GcsObjectStore,
        local::LocalObjectStore,
    },
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting course-trace-api with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database).await?;

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::run_migrations(&db)
        .await
        .context("applying database schema")?;

    // --- Object store, auth guard, metrics ---
    let store = build_store(&cfg.storage).await?;
    tracing::info!(
        bucket = store.bucket(),
        scheme = store.scheme(),
        "object store ready"
    );

    let authenticator = auth::build_authenticator(&cfg.auth, &db, bcrypt::DEFAULT_COST).await?;

    let metrics = if cfg.metrics.enabled {
        let metrics = Arc::new(Metrics::new().context("registering metrics")?);
        metrics::spawn_runtime_sampler(metrics.clone(), cfg.metrics.sample_interval);
        Some(metrics)
    } else {
        None
    };

    // --- Build router ---
    let state = AppState::new(db, store, authenticator, metrics, bcrypt::DEFAULT_COST);
    let app: Router = routes::routes::routes(state, &cfg.http);

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
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolve the configured backend (and, for GCS, the credential strategy)
/// into the single store handle shared by all requests.
async fn build_store(cfg: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match &cfg.backend {
        StorageBackend::Local { base_dir } => Arc::new(
            LocalObjectStore::new(base_dir, cfg.bucket.clone())
                .await
                .with_context(|| format!("opening local bucket under {}", base_dir.display()))?,
        ),
        StorageBackend::Gcs {
            api_base,
            service_account_key_path,
        } => {
            let strategy =
                CredentialStrategy::select(cfg.environment, service_account_key_path.as_deref());
            let client = reqwest::Client::new();
            let tokens = TokenProvider::from_strategy(&strategy, client.clone()).await?;
            Arc::new(GcsObjectStore::new(
                cfg.bucket.clone(),
                api_base,
                client,
                tokens,
            )?)
        }
    };
    Ok(store)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
