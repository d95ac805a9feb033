use clap::Parser;
use instance::config::InstanceConfig;
use instance::network::Client;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Controller address to connect to
    #[arg(short = 'c', long, default_value = "127.0.0.1:7700")]
    controller: String,

    /// Unique id of this instance
    #[arg(short = 'i', long, default_value = "lobby-1")]
    id: String,

    /// Instance type used by queue parameters
    #[arg(short = 't', long = "type", default_value = "lobby")]
    instance_type: String,

    /// Player limit, negative for unlimited
    #[arg(short = 'm', long, default_value = "50", allow_hyphen_values = true)]
    max_players: i32,

    /// Never host games on this instance
    #[arg(long)]
    non_playable: bool,

    /// Heartbeat and status interval in milliseconds
    #[arg(long, default_value = "1000")]
    interval: u64,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "3000")]
    request_timeout: u64,

    /// Time an admitted player has to connect, in milliseconds
    #[arg(long, default_value = "10000")]
    reservation_timeout: u64,
}

impl From<Args> for InstanceConfig {
    fn from(args: Args) -> Self {
        InstanceConfig {
            controller_address: args.controller,
            non_playable: args.non_playable,
            heartbeat_interval: Duration::from_millis(args.interval),
            status_interval: Duration::from_millis(args.interval),
            request_timeout: Duration::from_millis(args.request_timeout),
            reservation_timeout: Duration::from_millis(args.reservation_timeout),
            ..InstanceConfig::new(&args.id, &args.instance_type, args.max_players)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = InstanceConfig::from(Args::parse());

    info!("Starting instance {} ({})...", config.instance_id, config.instance_type);
    info!("Connecting to: {}", config.controller_address);

    let mut client = Client::new(config).await?;
    let shutdown = client.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(());
        }
    });

    client.run().await?;

    Ok(())
}
