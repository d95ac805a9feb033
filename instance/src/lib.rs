//! # Instance Library
//!
//! An instance is a game server in the fleet. It hosts players and games,
//! reports its status to the controller and has the final say on whether a
//! player the controller routed to it actually gets in.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Identity, capacity and timing settings of the instance.
//!
//! ### Local Module (`local`)
//! The local admission authority:
//! - Re-verifies instance and game capacity on every `InstanceJoin`
//! - Evicts lower-priority occupants to make room and reports them
//! - Confirms completed transfers with `QueueFinished`
//! - Registers, updates and shuts down the games it hosts
//!
//! ### Network Module (`network`)
//! The UDP link to the controller:
//! - Connection handshake and protocol version announcement
//! - Heartbeats and reconnection when the controller goes silent
//! - Periodic status reports
//! - Dispatch of controller requests to the local authority
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use instance::config::InstanceConfig;
//! use instance::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = InstanceConfig::new("lobby-1", "lobby", 50);
//!     let mut client = Client::new(config).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod local;
pub mod network;
