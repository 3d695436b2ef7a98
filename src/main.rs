use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use agentapi_proxy::api;
use agentapi_proxy::config::Config;
use agentapi_proxy::encryption;
use agentapi_proxy::session::otel;
use agentapi_proxy::store::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    // Tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("AGENTAPI_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = Config::load();
    let kube = kube::Client::try_default().await?;
    let encryption = Arc::new(encryption::registry_from_env());
    let state = AppState::new(kube.clone(), cfg.clone(), None, encryption);

    // Cluster-wide prerequisites; sessions restore lazily from the cluster,
    // so a failure here only delays the first create.
    if cfg.otel_collector_enabled
        && let Err(e) = otel::ensure_config_map(&kube, &cfg).await
    {
        tracing::warn!(error = %e, "failed to ensure otelcol config map");
    }

    let app = api::router().with_state(state.clone());

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, namespace = %cfg.namespace, "starting agentapi-proxy");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cluster objects survive; in-memory handles do not need to.
    state.sessions.shutdown();
    tracing::info!("agentapi-proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
