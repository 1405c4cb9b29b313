use clap::Parser;
use mirrorbox::{build_state, cli::ServerArgs, create_router, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mirrorbox=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("database: {}", args.database.display());
    tracing::info!("users root: {}", args.users_root.display());
    tracing::info!("shared root: {}", args.shared_root.display());

    let state = match build_state(&ServerConfig {
        database: args.database,
        users_root: args.users_root,
        shared_root: args.shared_root,
        session_idle_timeout: Duration::from_secs(args.session_timeout * 60),
    }) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("failed to initialize server state: {}", e);
            std::process::exit(1);
        }
    };

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .expect("Invalid address");

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
