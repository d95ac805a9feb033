//! Player records and the player state handshake

use crate::current_timestamp;
use crate::queue::QueueRequest;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub const PROPERTY_INSTANCE_ID: &str = "instanceId";
pub const PROPERTY_GAME_ID: &str = "gameId";
pub const PROPERTY_TIMESTAMP: &str = "timestamp";

/// Name of a player state
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub enum PlayerStateName {
    InstanceTransfer,
    InstanceOnline,
    GameTransfer,
    GameOnline,
    Undefined,
    Custom(String),
}

impl PlayerStateName {
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            PlayerStateName::InstanceTransfer | PlayerStateName::GameTransfer
        )
    }
}

/// A named player state plus its string-keyed properties
///
/// Transfer states always carry the destination and a timestamp; use the
/// constructors rather than building them by hand.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerState {
    pub name: PlayerStateName,
    pub properties: HashMap<String, String>,
}

impl PlayerState {
    pub fn undefined() -> Self {
        Self {
            name: PlayerStateName::Undefined,
            properties: HashMap::new(),
        }
    }

    pub fn instance_transfer(instance_id: &str) -> Self {
        Self::with_destination(PlayerStateName::InstanceTransfer, instance_id, None)
    }

    pub fn game_transfer(instance_id: &str, game_id: u64) -> Self {
        Self::with_destination(PlayerStateName::GameTransfer, instance_id, Some(game_id))
    }

    pub fn instance_online(instance_id: &str) -> Self {
        Self::with_destination(PlayerStateName::InstanceOnline, instance_id, None)
    }

    pub fn game_online(instance_id: &str, game_id: u64) -> Self {
        Self::with_destination(PlayerStateName::GameOnline, instance_id, Some(game_id))
    }

    fn with_destination(name: PlayerStateName, instance_id: &str, game_id: Option<u64>) -> Self {
        let mut properties = HashMap::new();
        properties.insert(PROPERTY_INSTANCE_ID.to_string(), instance_id.to_string());
        if let Some(game_id) = game_id {
            properties.insert(PROPERTY_GAME_ID.to_string(), game_id.to_string());
        }
        properties.insert(
            PROPERTY_TIMESTAMP.to_string(),
            current_timestamp().to_string(),
        );
        Self { name, properties }
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.properties.get(PROPERTY_INSTANCE_ID).map(String::as_str)
    }

    pub fn game_id(&self) -> Option<u64> {
        self.properties.get(PROPERTY_GAME_ID)?.parse().ok()
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.properties.get(PROPERTY_TIMESTAMP)?.parse().ok()
    }

    /// Returns true if this is a transfer state pointing exactly at the
    /// given destination.
    pub fn is_transfer_to(&self, instance_id: &str, game_id: Option<u64>) -> bool {
        match self.name {
            PlayerStateName::InstanceTransfer => {
                game_id.is_none() && self.instance_id() == Some(instance_id)
            }
            PlayerStateName::GameTransfer => {
                game_id.is_some()
                    && self.instance_id() == Some(instance_id)
                    && self.game_id() == game_id
            }
            _ => false,
        }
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::undefined()
    }
}

/// A player known to the controller
///
/// The controller owns the authoritative copy; instances keep replicas that
/// are replaced wholesale by `PlayerUpdate` pushes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub uuid: Uuid,
    pub username: String,
    pub display_name: String,
    pub network_profile: Uuid,
    pub queue_priority: i32,
    pub instance_id: Option<String>,
    pub game_id: Option<u64>,
    pub queue_request: Option<QueueRequest>,
    pub state: PlayerState,
    pub party_id: Option<u64>,
    pub relationship_ids: HashSet<u64>,
    pub locale: Option<String>,
}

impl Player {
    pub fn new(uuid: Uuid, username: &str) -> Self {
        Self {
            uuid,
            username: username.to_string(),
            display_name: username.to_string(),
            network_profile: uuid,
            queue_priority: 0,
            instance_id: None,
            game_id: None,
            queue_request: None,
            state: PlayerState::undefined(),
            party_id: None,
            relationship_ids: HashSet::new(),
            locale: None,
        }
    }

    pub fn with_priority(mut self, queue_priority: i32) -> Self {
        self.queue_priority = queue_priority;
        self
    }

    pub fn is_queueing(&self) -> bool {
        self.queue_request.is_some()
    }
}
