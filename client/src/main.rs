use clap::Parser;
use client::network::Client;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Probability of reporting a non-zero status for an event
    #[arg(short = 'f', long, default_value = "0.0")]
    fail_rate: f64,

    /// Leave after processing this many events
    #[arg(short = 'n', long)]
    max_events: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut client = Client::new(&args.server, args.fake_ping, args.fail_rate).await?;
    if let Some(max_events) = args.max_events {
        client = client.with_max_events(max_events);
    }

    client.run().await?;

    info!(
        "Processed {} events ({} duplicates)",
        client.inbox().fresh_count(),
        client.inbox().duplicates()
    );

    Ok(())
}
