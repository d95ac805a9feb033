//! # Controller Library
//!
//! The controller is the single authority over where players are. It tracks
//! every player, instance, game, party and friendship across the fleet and
//! decides which instance or game a player is transferred to.
//!
//! ## Core Responsibilities
//!
//! ### Routing
//! The queue engine walks a request's ranked parameter tiers, checks
//! joinability and capacity against the live registries and negotiates the
//! transfer with the destination instance. Failed attempts are recorded and
//! excluded from later passes until a destination accepts or none is left.
//!
//! ### Reconciliation
//! Instances report their own status and the games they host. Reports are
//! only accepted from the instance they concern, and a transfer only
//! completes when the destination confirms the exact instance and game the
//! player was sent to.
//!
//! ### Social State
//! Parties group players that travel together behind an owner. Friendships
//! are stored through a [`data::DataManager`] and served from TTL caches.
//!
//! ### Player Lifecycle
//! The instance a player's connection enters through reports it with
//! `NetworkJoin`, which registers the player and queues it to a lobby.
//! `NetworkLeave` and `CancelQueue` come from the same place when the
//! connection drops or the player gives up waiting.
//!
//! ## Architecture Design
//!
//! ### Shared Context
//! All registries live in one [`controller::Controller`] passed explicitly
//! to every handler. Registries are `DashMap`s, so handlers for different
//! instances run concurrently without a global lock.
//!
//! ### Request Correlation
//! The controller talks to instances over UDP. Requests that need an answer
//! travel with a random id and wait on the correlation layer of the
//! `shared` crate, which turns silence into a cancellation after a timeout.
//!
//! ## Module Organization
//!
//! - `cache`: TTL cache with passive expiry
//! - `config`: runtime settings
//! - `connection_manager`: connected instances and their heartbeats
//! - `controller`: the shared context and cross-registry operations
//! - `data`: durable key-value storage contract and an in-memory store
//! - `friendship`: friendship records, id lists and invitations
//! - `handler`: maps incoming requests to responses
//! - `network`: UDP server loop
//! - `party`: party registry
//! - `profile`: network profiles and their sub-profiles
//! - `proxy`: moves player connections between instances
//! - `queue`: the routing engine
//! - `reconcile`: applies instance reports
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use controller::config::ControllerConfig;
//! use controller::data::MemoryDataManager;
//! use controller::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControllerConfig::default();
//!     let mut server = Server::bind(config, Arc::new(MemoryDataManager::new())).await?;
//!
//!     // Accepts instance connections, answers their requests and routes
//!     // players until shut down
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection_manager;
pub mod controller;
pub mod data;
pub mod friendship;
pub mod handler;
pub mod network;
pub mod party;
pub mod profile;
pub mod proxy;
pub mod queue;
pub mod reconcile;
