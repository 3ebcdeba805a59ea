use compactvault::config::Config;
use compactvault::http::create_router;
use compactvault::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .parse_lossy("compactvault=info,sqlx=warn,hyper=warn"),
        )
        .init();

    let config = Config::load();
    std::fs::create_dir_all(&config.vault_dir).expect("failed to create vault directory");

    tracing::info!(
        vault_dir = %config.vault_dir.display(),
        workers = config.workers,
        "starting compactvault"
    );

    let state = AppState::new(config.vault_dir.clone(), config.staging_dir.clone(), config.workers);
    let app = create_router(state.clone());

    let mut port = config.port;
    let listener = loop {
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => break listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::warn!(port, "port in use, trying next");
                port += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind listener");
                std::process::exit(1);
            }
        }
    };

    tracing::info!(port, "compactvault listening");

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            if let Some(ctx) = state.context().await {
                if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(FULL)").execute(&ctx.pool).await {
                    tracing::error!(error = %e, "checkpoint on shutdown failed");
                }
            }
        }
    }

    tracing::info!("compactvault shut down");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
