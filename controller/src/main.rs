use clap::Parser;
use controller::config::ControllerConfig;
use controller::data::MemoryDataManager;
use controller::network::{Server, ServerMessage};
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "7700")]
    port: u16,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "3000")]
    request_timeout: u64,

    /// Instance join timeout in milliseconds
    #[arg(long, default_value = "3000")]
    join_timeout: u64,

    /// Seconds of silence before an instance is dropped
    #[arg(long, default_value = "5")]
    heartbeat_timeout: u64,

    /// Idle lifetime of cached friendship data in seconds
    #[arg(long, default_value = "300")]
    cache_ttl: u64,

    /// Instance type players fall back to
    #[arg(short, long, default_value = "lobby")]
    lobby_type: String,
}

impl From<Args> for ControllerConfig {
    fn from(args: Args) -> Self {
        ControllerConfig {
            bind_address: format!("{}:{}", args.host, args.port),
            request_timeout: Duration::from_millis(args.request_timeout),
            join_timeout: Duration::from_millis(args.join_timeout),
            heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout),
            cache_ttl: Duration::from_secs(args.cache_ttl),
            lobby_type: args.lobby_type,
            ..ControllerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ControllerConfig::from(Args::parse());
    info!("Starting controller...");
    info!("Fallback lobby type: {}", config.lobby_type);

    let mut server = Server::bind(config, Arc::new(MemoryDataManager::new())).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await;

    Ok(())
}
