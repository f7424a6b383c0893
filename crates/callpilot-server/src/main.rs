//! Callpilot server binary.
//!
//! Serves `/sounds` to the telephony engine and supervises the control
//! channel, with structured logging and graceful shutdown on SIGTERM/SIGINT.

use callpilot_server::{
    app, load_config, DirectoryCapabilities, FileApplicationDirectory, Integrations,
    JsonLinesStore, Supervisor,
};
use callpilot_server::supervisor::stopped;
use callpilot_voice::AudioStreamRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CALLPILOT_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let directory = FileApplicationDirectory::load(&config.applications_file)
        .expect("failed to load applications: check applications_file in config");
    let integrations = Integrations::load(&config.integrations_file)
        .expect("failed to load integrations: check integrations_file in config");

    let config = Arc::new(config);
    let http = reqwest::Client::new();
    let registry = AudioStreamRegistry::new();
    let factory = Arc::new(DirectoryCapabilities::new(
        Arc::new(directory),
        Arc::new(integrations),
        http.clone(),
    ));
    let store = Arc::new(JsonLinesStore::new(&config.call_records_file));

    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(%addr, public_url = %config.server.public_url, "starting callpilot server");
    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let router = app(registry.clone());
    let mut http_stop = stop_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { stopped(&mut http_stop).await })
            .await
    });

    let supervisor = Supervisor::new(config.clone(), registry, factory, store, http);
    let outcome = supervisor.run(stop_rx).await;

    match outcome {
        Ok(()) => {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("server error: {}", e),
                Err(e) => tracing::error!("server task failed: {}", e),
            }
            tracing::info!("callpilot server shut down");
        }
        Err(e) => {
            tracing::error!("callpilot server stopping: {}", e);
            std::process::exit(1);
        }
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
