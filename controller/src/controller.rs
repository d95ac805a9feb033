//! Controller context: the registries every handler works against
//!
//! Registries are independent `DashMap`s. A player's fields (state, ids,
//! queue request) are updated under that player's entry, but updates that
//! span several registries, such as a game shutdown touching every player in
//! the game, are applied one entry at a time and are not atomic as a group.

use crate::config::ControllerConfig;
use crate::data::DataManager;
use crate::friendship::FriendshipService;
use crate::party::PartyManager;
use crate::profile::ProfileService;
use crate::proxy::Proxy;
use dashmap::DashMap;
use log::{debug, info, warn};
use shared::{
    Game, Instance, Packet, Player, PlayerState, QueueRequestParameter, QueueRequestParameters,
    Requester,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

/// Notifications for anything observing the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    QueueFinished {
        player: Uuid,
        instance_id: String,
        game_id: Option<u64>,
    },
    PlayerDisconnected {
        player: Uuid,
        message: String,
    },
    InstanceRemoved {
        instance_id: String,
    },
}

pub struct Controller {
    pub config: ControllerConfig,
    pub players: Arc<DashMap<Uuid, Player>>,
    pub instances: DashMap<String, Instance>,
    pub games: DashMap<u64, Game>,
    pub parties: PartyManager,
    pub friendships: FriendshipService,
    pub profiles: ProfileService,
    pub requester: Arc<Requester>,
    pub proxy: Arc<dyn Proxy>,
    events: broadcast::Sender<ControllerEvent>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        requester: Arc<Requester>,
        proxy: Arc<dyn Proxy>,
        data: Arc<dyn DataManager>,
    ) -> Self {
        let players = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            parties: PartyManager::new(Arc::clone(&players)),
            friendships: FriendshipService::new(Arc::clone(&data), config.cache_ttl),
            profiles: ProfileService::new(data),
            players,
            instances: DashMap::new(),
            games: DashMap::new(),
            requester,
            proxy,
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn player(&self, uuid: &Uuid) -> Option<Player> {
        self.players.get(uuid).map(|player| player.value().clone())
    }

    pub fn game(&self, game_id: u64) -> Option<Game> {
        self.games.get(&game_id).map(|game| game.value().clone())
    }

    pub fn instance(&self, instance_id: &str) -> Option<Instance> {
        self.instances
            .get(instance_id)
            .map(|instance| instance.value().clone())
    }

    pub fn priority_of(&self, uuid: &Uuid) -> i32 {
        self.players
            .get(uuid)
            .map(|player| player.queue_priority)
            .unwrap_or(0)
    }

    /// Players the controller believes are on `instance_id`.
    pub fn players_on(&self, instance_id: &str) -> Vec<Uuid> {
        self.players
            .iter()
            .filter(|player| player.instance_id.as_deref() == Some(instance_id))
            .map(|player| *player.key())
            .collect()
    }

    /// Where players go when they have nowhere else to go.
    pub fn fallback_parameters(&self) -> QueueRequestParameters {
        QueueRequestParameters::single(QueueRequestParameter::instance_type(
            &self.config.lobby_type,
        ))
    }

    /// Pushes the current player record to the instance hosting it and, if
    /// it is being transferred, to the destination as well.
    pub fn push_player_update(&self, uuid: &Uuid) {
        let player = match self.player(uuid) {
            Some(player) => player,
            None => return,
        };

        let mut destinations: Vec<String> = player.instance_id.iter().cloned().collect();
        if player.state.name.is_transfer() {
            if let Some(target) = player.state.instance_id() {
                if !destinations.iter().any(|d| d == target) {
                    destinations.push(target.to_string());
                }
            }
        }

        let sink = self.requester.sink();
        for destination in destinations {
            if !sink.is_reachable(&destination) {
                continue;
            }
            if let Err(e) = sink.send(&destination, Packet::PlayerUpdate(player.clone())) {
                warn!("Failed to push player {} to {}: {}", uuid, destination, e);
            }
        }
    }

    /// Registers a player that just connected to the network.
    ///
    /// Returns false if a player with the same id is already online.
    pub async fn register_player(&self, player: Player) -> bool {
        let uuid = player.uuid;
        if let Err(e) = self
            .profiles
            .ensure_network_profile(player.network_profile)
            .await
        {
            warn!("No network profile for player {}: {}", uuid, e);
        }

        match self.players.entry(uuid) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(player);
                info!("Player {} joined the network", uuid);
                true
            }
        }
    }

    /// Removes a player from the network along with its party membership
    /// and any queue in flight.
    pub fn leave_network(&self, uuid: &Uuid) -> bool {
        let party_id = match self.players.get(uuid) {
            Some(player) => player.party_id,
            None => return false,
        };
        if let Some(party_id) = party_id {
            self.parties.remove_player(party_id, *uuid);
        }

        let removed = match self.players.remove(uuid) {
            Some((_, player)) => player,
            None => return false,
        };
        if let Some(game_id) = removed.game_id {
            if let Some(mut game) = self.games.get_mut(&game_id) {
                game.remove_player(uuid);
            }
        }
        info!("Player {} left the network", uuid);
        true
    }

    /// Drops the player's queue request. A running queue stops at its next
    /// step and a pending transfer state falls back to where the player is.
    pub fn cancel_queue(&self, uuid: &Uuid) -> bool {
        let mut player = match self.players.get_mut(uuid) {
            Some(player) => player,
            None => return false,
        };
        if player.queue_request.take().is_none() {
            return false;
        }
        if player.state.name.is_transfer() {
            let state = match (&player.instance_id, player.game_id) {
                (Some(instance_id), Some(game_id)) => PlayerState::game_online(instance_id, game_id),
                (Some(instance_id), None) => PlayerState::instance_online(instance_id),
                (None, _) => PlayerState::undefined(),
            };
            player.state = state;
        }
        debug!("Cancelled queue of player {}", uuid);
        true
    }

    /// Forgets an instance and every game it hosted.
    pub fn remove_instance(&self, instance_id: &str) {
        self.instances.remove(instance_id);

        let mut removed_games = Vec::new();
        self.games.retain(|game_id, game| {
            let keep = game.instance_id != instance_id;
            if !keep {
                removed_games.push(*game_id);
            }
            keep
        });

        for mut player in self.players.iter_mut() {
            if player.instance_id.as_deref() == Some(instance_id) {
                player.instance_id = None;
                player.game_id = None;
            }
        }

        info!(
            "Instance {} removed along with {} games",
            instance_id,
            removed_games.len()
        );
        self.emit(ControllerEvent::InstanceRemoved {
            instance_id: instance_id.to_string(),
        });
    }
}
