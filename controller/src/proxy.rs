//! The component that physically moves player connections between instances
//!
//! The queue engine only decides where a player goes. Once the destination
//! accepted the join, a [`Proxy`] performs the move and the destination
//! confirms with `QueueFinished` when the connection lands.

use async_trait::async_trait;
use log::info;
use shared::{Request, RequestError, Requester};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait Proxy: Send + Sync {
    /// Moves the player's connection to `instance_id`.
    async fn move_player(&self, player: Uuid, instance_id: &str) -> Result<(), RequestError>;

    /// Drops the player's connection with a message shown to them.
    async fn disconnect(&self, player: Uuid, message: &str);
}

/// Moves players by telling the destination instance to accept the
/// connection through `ConnectPlayer`.
pub struct NetworkProxy {
    requester: Arc<Requester>,
}

impl NetworkProxy {
    pub fn new(requester: Arc<Requester>) -> Self {
        Self { requester }
    }
}

#[async_trait]
impl Proxy for NetworkProxy {
    async fn move_player(&self, player: Uuid, instance_id: &str) -> Result<(), RequestError> {
        self.requester
            .request(
                instance_id,
                Request::ConnectPlayer {
                    player_uuid: player,
                },
                None,
            )
            .await
            .map(|_| ())
    }

    async fn disconnect(&self, player: Uuid, message: &str) {
        info!("Disconnecting player {}: {}", player, message);
    }
}
