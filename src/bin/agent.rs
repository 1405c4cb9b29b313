use clap::Parser;
use mirrorbox::agent::http::DEFAULT_REQUEST_TIMEOUT;
use mirrorbox::agent::{
    watcher_task, AgentConfig, ApiClient, AppData, AuthManager, IgnoreSet, SyncCoordinator,
    WatchEvent,
};
use mirrorbox::cli::AgentArgs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = AgentArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mirrorbox=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Missing or unreadable config is fatal, as is an unusable watch root.
    let config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("sync root: {}", config.watcher_root.display());
    tracing::info!("server: {}", config.server_url);

    let client = match ApiClient::new(&config.server_url, DEFAULT_REQUEST_TIMEOUT) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("cannot build http client: {}", e);
            std::process::exit(1);
        }
    };
    let auth = AuthManager::new(client.clone(), config.username, config.password);
    let app_data = AppData::load(&args.app_data);
    let ignored = Arc::new(IgnoreSet::new());
    let running = Arc::new(AtomicBool::new(true));

    let (tx, rx) = mpsc::channel::<WatchEvent>(256);
    let watcher = tokio::spawn(watcher_task(
        config.watcher_root.clone(),
        tx,
        ignored.clone(),
        running.clone(),
    ));

    let coordinator = SyncCoordinator::new(
        config.watcher_root,
        client,
        auth,
        app_data,
        ignored,
        Duration::from_secs(args.sync_interval),
    );
    let coordinator = tokio::spawn(coordinator.run(rx, running.clone()));

    tokio::select! {
        result = watcher => {
            match result {
                Ok(Err(e)) => {
                    tracing::error!("watcher failed: {}", e);
                    running.store(false, Ordering::Relaxed);
                    std::process::exit(1);
                }
                _ => tracing::info!("watcher stopped"),
            }
        }
        _ = coordinator => {
            tracing::info!("coordinator stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            running.store(false, Ordering::Relaxed);
        }
    }
}
