use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the server binary.
#[derive(Parser, Debug)]
#[clap(name = "mirrorbox-server")]
#[clap(about = "File synchronization server", long_about = None)]
pub struct ServerArgs {
    /// Path to the SQLite database file
    #[clap(short, long, value_name = "FILE", default_value = "data/mirrorbox.db")]
    pub database: PathBuf,

    /// Directory holding per-user home directories
    #[clap(long, value_name = "DIR", default_value = "data/users")]
    pub users_root: PathBuf,

    /// Directory holding shared storages
    #[clap(long, value_name = "DIR", default_value = "data/shared")]
    pub shared_root: PathBuf,

    /// Port to listen on
    #[clap(short, long, default_value = "3000")]
    pub port: u16,

    /// Host to bind to
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Idle session expiry in minutes
    #[clap(long, value_name = "MINUTES", default_value = "30")]
    pub session_timeout: u64,
}

/// CLI arguments for the agent binary.
#[derive(Parser, Debug)]
#[clap(name = "mirrorbox-agent")]
#[clap(about = "Directory-watching sync agent", long_about = None)]
pub struct AgentArgs {
    /// Path to the key=value config file
    #[clap(short, long, value_name = "FILE", default_value = "config")]
    pub config: PathBuf,

    /// Path of the persisted server-path set
    #[clap(long, value_name = "FILE", default_value = "app_data.json")]
    pub app_data: PathBuf,

    /// Seconds between periodic syncs
    #[clap(long, value_name = "SECONDS", default_value = "10")]
    pub sync_interval: u64,
}
