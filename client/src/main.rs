use clap::Parser;
use client::config::ClientConfig;
use client::network::Client;
use client::scheduler::SchedulerConfig;
use log::info;
use shared::DemoWorld;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Random extra latency per direction in milliseconds
    #[arg(short = 'j', long, default_value = "0")]
    fake_jitter: u64,

    /// Play with random input
    #[arg(short, long)]
    bot: bool,

    /// Ready backlog above which steps are applied in bursts
    #[arg(long, default_value = "3")]
    catch_up_threshold: usize,

    /// Most steps applied in one burst
    #[arg(long, default_value = "8")]
    max_catch_up: usize,

    /// Steps buffered before a snapshot is requested
    #[arg(long, default_value = "64")]
    buffer: usize,

    /// Seconds to wait for a snapshot before asking again
    #[arg(long, default_value = "2")]
    snapshot_retry: u64,

    /// Leave after applying this many ticks (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    ticks: u64,
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
    if args.fake_ping > 0 || args.fake_jitter > 0 {
        info!(
            "Simulating {}ms latency with up to {}ms jitter",
            args.fake_ping, args.fake_jitter
        );
    }

    let config = ClientConfig {
        server_addr: args.server,
        scheduler: SchedulerConfig {
            capacity: args.buffer,
            catch_up_threshold: args.catch_up_threshold,
            max_catch_up: args.max_catch_up,
        },
        snapshot_retry: Duration::from_secs(args.snapshot_retry),
        fake_ping_ms: args.fake_ping,
        fake_jitter_ms: args.fake_jitter,
        bot: args.bot,
        run_ticks: args.ticks,
        ..ClientConfig::default()
    };

    let mut client = Client::new(config, DemoWorld::new()).await?;

    tokio::select! {
        result = client.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, leaving");
            client.disconnect().await?;
        }
    }

    info!(
        "Applied {} ticks, last tick {:?}, {} desyncs detected",
        client.game().applied(),
        client.game().last_applied(),
        client.game().auditor().detected()
    );

    Ok(())
}
