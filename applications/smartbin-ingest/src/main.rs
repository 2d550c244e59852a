use smartbin_ingest::api::{create_router, AppState};
use smartbin_ingest::repositories::{BinStore, MemoryBinStore, PgBinStore};
use smartbin_ingest::{db, listener, Config, Ingestor};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!("loaded config; brokers: {}", cfg.brokers.len());

    let store: Arc<dyn BinStore> = match &cfg.database {
        Some(db_cfg) => {
            let pool = db::connect(&db_cfg.url, db_cfg.max_connections).await?;
            info!(table = %db_cfg.table, "connected to database");
            Arc::new(PgBinStore::new(pool, db_cfg.table.clone()))
        }
        None => {
            warn!("no database configured; bins are kept in memory only");
            Arc::new(MemoryBinStore::new())
        }
    };
    let ingestor = Ingestor::new(store.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listeners = listener::spawn_all(&cfg, &ingestor, &shutdown_rx);

    let app = create_router(AppState {
        ingestor: ingestor.clone(),
    });
    let tcp = tokio::net::TcpListener::bind(&cfg.api.bind).await?;
    info!("serving HTTP on {}", cfg.api.bind);

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(tcp, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for handle in futures::future::join_all(listeners).await {
        if let Err(e) = handle {
            warn!(error = %e, "listener task ended abnormally");
        }
    }
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "http server error"),
        Err(e) => warn!(error = %e, "http server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    store.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
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
                warn!(error = %e, "failed to install SIGTERM handler");
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
