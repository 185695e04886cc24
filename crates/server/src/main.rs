use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexus_core::{
    config_path, create_audit_system, load_config, validate_config, AuditEvent, AuditStore,
    BatchManager, GenerationClient, SqliteAuditStore, SqliteStatusStore, StatusStore,
    WebhookClient,
};
use nexus_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// How long active batches get to settle after shutdown is requested
const BATCH_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A run that outlived its shutdown timeout still holds an audit handle
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = config_path();
    info!("Loading configuration from {:?}", path);
    let config =
        load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Generation endpoint: {}", config.generation.endpoint);
    info!("Database path: {:?}", config.database.path);
    info!(
        run_profile = config.orchestrator.run_profile.as_str(),
        chunk_size = config.orchestrator.chunk_size,
        max_attempts = config.orchestrator.max_attempts,
        "Orchestrator settings"
    );

    // Config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    let status_store: Arc<dyn StatusStore> = Arc::new(
        SqliteStatusStore::new(&config.database.path).context("Failed to create status store")?,
    );
    info!("Status store initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;

    let client: Arc<dyn GenerationClient> = Arc::new(
        WebhookClient::new(&config.generation).context("Failed to create generation client")?,
    );

    let batches = BatchManager::new(
        status_store,
        client,
        config.orchestrator.clone(),
        Some(audit_handle.clone()),
    );

    if config.orchestrator.resume_interrupted {
        match batches.recover_interrupted().await {
            Ok(ids) if ids.is_empty() => info!("No interrupted batches to resume"),
            Ok(ids) => info!(count = ids.len(), batches = ?ids, "Resumed interrupted batches"),
            Err(e) => warn!("Failed to resume interrupted batches: {}", e),
        }
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        audit_store,
        batches.clone(),
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    batches.shutdown(BATCH_SHUTDOWN_TIMEOUT).await;

    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone.
    drop(batches);
    drop(audit_handle);

    match tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, writer_handle).await {
        Ok(_) => info!("Audit writer stopped"),
        Err(_) => warn!("Audit writer still busy, exiting without it"),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
