use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use shared::DemoWorld;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u16,

    /// Player slots
    #[arg(short, long, default_value = "8")]
    max_players: usize,

    /// Rare actions per tick; extras wait for later ticks
    #[arg(short = 'k', long, default_value = "4")]
    max_rare_actions: usize,

    /// Largest datagram sent without fragmenting
    #[arg(long, default_value = "1200")]
    datagram_budget: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info to see server logs");
    }

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        tick_rate: args.tick_rate,
        max_players: args.max_players,
        max_rare_actions: args.max_rare_actions,
        datagram_budget: args.datagram_budget,
        client_timeout: Duration::from_secs(args.timeout),
        ..ServerConfig::default()
    };

    let mut server = Server::bind(config, DemoWorld::new()).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
