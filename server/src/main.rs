use clap::Parser;
use log::info;
use server::config::{interval_from_millis, interval_from_secs, ServerConfig};
use server::delivery::SelectionPolicy;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of connected recipients
    #[arg(short, long, default_value = "32")]
    max_recipients: usize,

    /// Which queued event is sent first when a recipient becomes idle
    #[arg(short, long, value_enum, default_value_t = SelectionPolicy::NewestFirst)]
    order: SelectionPolicy,

    /// Seconds of silence before a recipient is dropped
    #[arg(short, long, default_value = "5")]
    timeout_secs: u64,

    /// Retire recipients that stay disconnected this many seconds (0 keeps them)
    #[arg(short, long, default_value = "0")]
    archive_secs: u64,

    /// Retransmit in-flight events every N milliseconds (0 disables)
    #[arg(short, long, default_value = "500")]
    resend_ms: u64,

    /// Broadcast a heartbeat event every N milliseconds (0 disables)
    #[arg(short, long, default_value = "0")]
    broadcast_ms: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: format!("{}:{}", args.host, args.port),
            max_recipients: args.max_recipients,
            selection_policy: args.order,
            client_timeout: Duration::from_secs(args.timeout_secs),
            archive_after: interval_from_secs(args.archive_secs),
            resend_interval: interval_from_millis(args.resend_ms),
            broadcast_interval: interval_from_millis(args.broadcast_ms),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ServerConfig::from(args);

    info!("Starting server...");
    info!(
        "Selection: {:?}, timeout: {:?}, resend: {:?}",
        config.selection_policy, config.client_timeout, config.resend_interval
    );

    let mut server = Server::new(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
