//! Local admission authority of an instance
//!
//! The controller decides where players go, but only with the capacity it
//! last heard about. The instance re-checks every `InstanceJoin` against its
//! own tiers, evicting lower-priority occupants when that makes room, and is
//! the final word on whether a player gets in.
//!
//! Admission holds the instance slot lock for the whole check-evict-register
//! sequence, so concurrent joins cannot both take the last slot. Game entries
//! are only touched while that lock is held or through single-entry updates.

use crate::config::InstanceConfig;
use dashmap::DashMap;
use log::{debug, info, warn};
use shared::{
    FriendshipRequest, Game, Instance, PartyRequest, Payload, Player, QueueRequestParameters,
    QueueType, Request, RequestError, Requester, Response, ResponseCode, Slots, CONTROLLER_ID,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const EVICTION_MESSAGE: &str = "You were moved to make room for another player";

/// A player admitted to this instance
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    pub player: Player,
    pub queue_type: QueueType,
    pub game_id: Option<u64>,
    /// Set once the player's connection actually arrived
    pub connected: bool,
    /// Queue request whose `InstanceJoin` made this reservation
    pub request_id: Option<u64>,
    pub admitted_at: Instant,
}

pub struct LocalInstance {
    id: String,
    instance_type: String,
    max_players: i32,
    non_playable: bool,
    joinable: AtomicBool,
    players: DashMap<Uuid, LocalPlayer>,
    games: DashMap<u64, Game>,
    slots: RwLock<Slots>,
    requester: Arc<Requester>,
}

impl LocalInstance {
    pub fn new(config: &InstanceConfig, requester: Arc<Requester>) -> Self {
        let max = config.max_players;
        Self {
            id: config.instance_id.clone(),
            instance_type: config.instance_type.clone(),
            max_players: max,
            non_playable: config.non_playable,
            joinable: AtomicBool::new(true),
            players: DashMap::new(),
            games: DashMap::new(),
            slots: RwLock::new(Slots::new(max, max, max)),
            requester,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn requester(&self) -> &Arc<Requester> {
        &self.requester
    }

    pub fn player(&self, uuid: &Uuid) -> Option<LocalPlayer> {
        self.players.get(uuid).map(|player| player.value().clone())
    }

    pub fn game(&self, game_id: u64) -> Option<Game> {
        self.games.get(&game_id).map(|game| game.value().clone())
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn set_joinable(&self, joinable: bool) {
        self.joinable.store(joinable, Ordering::SeqCst);
    }

    /// The record reported to the controller.
    pub fn status(&self) -> Instance {
        let mut instance = Instance::new(&self.id, &self.instance_type, self.max_players);
        instance.joinable = self.joinable.load(Ordering::SeqCst);
        instance.non_playable = self.non_playable;
        instance.current_players = self.players.len() as u32;
        instance
    }

    fn priority_of(&self, uuid: &Uuid) -> i32 {
        self.players
            .get(uuid)
            .map(|local| local.player.queue_priority)
            .unwrap_or(0)
    }

    /// Answers a request sent by the controller.
    pub async fn handle_request(self: &Arc<Self>, request: Request) -> Response {
        match request {
            Request::InstanceJoin {
                player,
                queue_type,
                game_id,
                party: _,
            } => self
                .admit(player, queue_type, game_id)
                .await
                .map(|_| Payload::Empty),
            Request::ConnectPlayer { player_uuid } => {
                self.connect_player(player_uuid).map(|_| Payload::Empty)
            }
            Request::ReleasePlayer {
                player_uuid,
                request_id,
            } => Ok(Payload::Flag(self.release(&player_uuid, request_id).await)),
            other => {
                warn!("Instance {} cannot handle {}", self.id, other.kind());
                Err(ResponseCode::Unknown)
            }
        }
    }

    /// Verifies capacity for `player`, evicts occupants if needed and
    /// registers the player.
    pub async fn admit(
        self: &Arc<Self>,
        player: Player,
        queue_type: QueueType,
        game_id: Option<u64>,
    ) -> Result<(), ResponseCode> {
        if !self.joinable.load(Ordering::SeqCst) {
            return Err(ResponseCode::NotJoinable);
        }
        let uuid = player.uuid;
        let arrivals = HashMap::from([(uuid, player.queue_priority)]);

        let mut slots = self.slots.write().await;
        let mut evicted: HashSet<Uuid> = HashSet::new();
        if let Some(game_id) = game_id {
            let game = self.games.get(&game_id).ok_or(ResponseCode::InvalidId)?;
            if !game.slots.is_joinable(queue_type) {
                return Err(ResponseCode::NotJoinable);
            }
            evicted = game
                .slots
                .find_kickable(&arrivals, queue_type, |id| self.priority_of(id))
                .ok_or(ResponseCode::NoFreeSlots)?;
        }

        // Players leaving the game also leave the instance, so they already
        // free an instance slot each
        let online = slots.tier(QueueType::Online);
        let occupants = online
            .members
            .iter()
            .filter(|id| !evicted.contains(*id))
            .map(|id| (*id, self.priority_of(id)));
        let kicks = shared::slots::find_kickable(occupants, online.max_slots, &arrivals)
            .ok_or(ResponseCode::NoFreeSlots)?;
        evicted.extend(kicks);

        for victim in &evicted {
            self.detach(&mut slots, victim);
        }

        let (previous_game, connected) = self
            .players
            .get(&uuid)
            .map(|local| (local.game_id, local.connected))
            .unwrap_or((None, false));
        if let Some(previous) = previous_game.filter(|previous| Some(*previous) != game_id) {
            if let Some(mut game) = self.games.get_mut(&previous) {
                game.remove_player(&uuid);
            }
        }
        let joined_game = game_id.and_then(|game_id| {
            let mut game = self.games.get_mut(&game_id)?;
            game.add_player(uuid, queue_type);
            Some(game.value().clone())
        });

        slots.add(uuid, queue_type);
        let request_id = player.queue_request.as_ref().map(|request| request.id);
        self.players.insert(
            uuid,
            LocalPlayer {
                player,
                queue_type,
                game_id,
                connected,
                request_id,
                admitted_at: Instant::now(),
            },
        );
        drop(slots);

        info!(
            "Admitted player {} to {} ({:?}, game {:?}, {} evicted)",
            uuid,
            self.id,
            queue_type,
            game_id,
            evicted.len()
        );
        for victim in evicted {
            self.notify_kick(victim);
        }
        if let Some(game) = joined_game {
            self.report_game(game);
        }
        Ok(())
    }

    /// Removes a player from every local tier and game.
    fn detach(&self, slots: &mut Slots, uuid: &Uuid) {
        self.players.remove(uuid);
        slots.remove(uuid);
        for mut game in self.games.iter_mut() {
            game.remove_player(uuid);
        }
    }

    fn notify_kick(self: &Arc<Self>, uuid: Uuid) {
        let instance = Arc::clone(self);
        tokio::spawn(async move {
            let request = Request::PlayerKicked {
                player_uuid: uuid,
                message: Some(EVICTION_MESSAGE.to_string()),
            };
            if let Err(e) = instance.requester.request(CONTROLLER_ID, request, None).await {
                warn!("Failed to report eviction of {}: {}", uuid, e);
            }
        });
    }

    fn report_game(self: &Arc<Self>, game: Game) {
        let instance = Arc::clone(self);
        tokio::spawn(async move {
            let game_id = game.game_id;
            let request = Request::GameStatusUpdate(game);
            if let Err(e) = instance.requester.request(CONTROLLER_ID, request, None).await {
                warn!("Failed to report game {}: {}", game_id, e);
            }
        });
    }

    /// The player's connection arrived: confirm the transfer upstream. If the
    /// controller no longer expects the player here, it is dropped again.
    pub fn connect_player(self: &Arc<Self>, uuid: Uuid) -> Result<(), ResponseCode> {
        let game_id = {
            let mut local = self
                .players
                .get_mut(&uuid)
                .ok_or(ResponseCode::InvalidPlayer)?;
            local.connected = true;
            local.game_id
        };

        let instance = Arc::clone(self);
        tokio::spawn(async move {
            let request = Request::QueueFinished {
                player_uuid: uuid,
                game_id,
            };
            match instance.requester.request(CONTROLLER_ID, request, None).await {
                Ok(_) => debug!("Transfer of {} to {} confirmed", uuid, instance.id),
                Err(RequestError::Rejected(ResponseCode::IllegalState)) => {
                    warn!(
                        "Controller does not expect {} on {}, removing",
                        uuid, instance.id
                    );
                    instance.remove_player(&uuid).await;
                }
                Err(e) => warn!("Failed to confirm transfer of {}: {}", uuid, e),
            }
        });
        Ok(())
    }

    pub async fn remove_player(&self, uuid: &Uuid) -> bool {
        let mut slots = self.slots.write().await;
        let present = self.players.contains_key(uuid);
        self.detach(&mut slots, uuid);
        present
    }

    /// Drops the reservation made for queue request `request_id` if the
    /// player never connected. A newer reservation is left alone.
    pub async fn release(&self, uuid: &Uuid, request_id: u64) -> bool {
        let mut slots = self.slots.write().await;
        let abandoned = self
            .players
            .get(uuid)
            .map(|local| !local.connected && local.request_id == Some(request_id))
            .unwrap_or(false);
        if abandoned {
            self.detach(&mut slots, uuid);
            info!("Released reservation of {} on {}", uuid, self.id);
        }
        abandoned
    }

    /// Drops reservations whose player has not connected within `max_age`.
    pub async fn expire_reservations(&self, max_age: Duration) -> usize {
        let mut slots = self.slots.write().await;
        let expired: Vec<Uuid> = self
            .players
            .iter()
            .filter(|local| !local.connected && local.admitted_at.elapsed() >= max_age)
            .map(|local| *local.key())
            .collect();
        for uuid in &expired {
            self.detach(&mut slots, uuid);
        }
        if !expired.is_empty() {
            info!("Expired {} unclaimed reservations on {}", expired.len(), self.id);
        }
        expired.len()
    }

    /// Replaces the local replica with the controller's copy.
    pub fn apply_player_update(&self, player: Player) -> bool {
        match self.players.get_mut(&player.uuid) {
            Some(mut local) => {
                local.player = player;
                true
            }
            None => false,
        }
    }

    /// Creates a game on this instance and registers it with the controller.
    pub async fn register_game(&self, game_type: &str, slots: Slots) -> Result<u64, RequestError> {
        let game_id = loop {
            let id = rand::random::<u64>();
            if !self.games.contains_key(&id) {
                break id;
            }
        };
        let game = Game::new(game_id, &self.id, game_type, slots);
        self.games.insert(game_id, game.clone());

        if let Err(e) = self
            .requester
            .request(CONTROLLER_ID, Request::GameStatusUpdate(game), None)
            .await
        {
            self.games.remove(&game_id);
            return Err(e);
        }
        info!("Registered {} game {} on {}", game_type, game_id, self.id);
        Ok(game_id)
    }

    pub async fn update_game(&self, game: Game) -> Result<(), RequestError> {
        if game.instance_id != self.id || !self.games.contains_key(&game.game_id) {
            return Err(RequestError::Rejected(ResponseCode::InvalidId));
        }
        self.games.insert(game.game_id, game.clone());
        self.requester
            .request(CONTROLLER_ID, Request::GameStatusUpdate(game), None)
            .await
            .map(|_| ())
    }

    /// Ends a game. Its players stay on the instance; the controller decides
    /// where they go next.
    pub async fn shutdown_game(&self, game_id: u64) -> Result<(), RequestError> {
        if self.games.remove(&game_id).is_none() {
            return Err(RequestError::Rejected(ResponseCode::InvalidId));
        }
        for mut local in self.players.iter_mut() {
            if local.game_id == Some(game_id) {
                local.game_id = None;
            }
        }
        info!("Game {} on {} shut down", game_id, self.id);
        self.requester
            .request(CONTROLLER_ID, Request::GameShutdown { game_id }, None)
            .await
            .map(|_| ())
    }

    pub async fn quit_game(&self, uuid: Uuid) -> Result<(), RequestError> {
        let game_id = {
            let mut local = self
                .players
                .get_mut(&uuid)
                .ok_or(RequestError::Rejected(ResponseCode::InvalidPlayer))?;
            local
                .game_id
                .take()
                .ok_or(RequestError::Rejected(ResponseCode::InvalidId))?
        };
        if let Some(mut game) = self.games.get_mut(&game_id) {
            game.remove_player(&uuid);
        }
        self.requester
            .request(CONTROLLER_ID, Request::GameQuit { player_uuid: uuid }, None)
            .await
            .map(|_| ())
    }

    /// Asks the controller to route one of this instance's players.
    pub async fn queue_player(
        &self,
        uuid: Uuid,
        parameters: QueueRequestParameters,
        reason_message: Option<String>,
    ) -> Result<(), RequestError> {
        let request = Request::QueueRequest {
            player_uuid: uuid,
            parameters,
            reason_message,
        };
        self.requester
            .request(CONTROLLER_ID, request, None)
            .await
            .map(|_| ())
    }

    /// Reports a player whose connection entered the network here.
    pub async fn join_network(&self, player: Player) -> Result<(), RequestError> {
        self.requester
            .request(CONTROLLER_ID, Request::NetworkJoin { player }, None)
            .await
            .map(|_| ())
    }

    /// The player's connection dropped.
    pub async fn leave_network(&self, uuid: Uuid) -> Result<(), RequestError> {
        self.remove_player(&uuid).await;
        self.requester
            .request(CONTROLLER_ID, Request::NetworkLeave { player_uuid: uuid }, None)
            .await
            .map(|_| ())
    }

    /// Returns whether the player had a queue request to cancel.
    pub async fn cancel_queue(&self, uuid: Uuid) -> Result<bool, RequestError> {
        let payload = self
            .requester
            .request(CONTROLLER_ID, Request::CancelQueue { player_uuid: uuid }, None)
            .await?;
        Ok(matches!(payload, Payload::Flag(true)))
    }

    pub async fn party(&self, request: PartyRequest) -> Result<Payload, RequestError> {
        self.requester
            .request(CONTROLLER_ID, Request::Party(request), None)
            .await
    }

    pub async fn friendship(&self, request: FriendshipRequest) -> Result<Payload, RequestError> {
        self.requester
            .request(CONTROLLER_ID, Request::Friendship(request), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{
        Packet, PacketSink, QueueRequest, QueueRequestParameter, QueueRequestReason,
        TransportError,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records everything sent upstream and answers requests inline.
    struct RecordingSink {
        requester: Mutex<Option<Arc<Requester>>>,
        sent: Mutex<Vec<Request>>,
        answer: Mutex<Response>,
    }

    impl PacketSink for RecordingSink {
        fn is_reachable(&self, destination: &str) -> bool {
            destination == CONTROLLER_ID
        }

        fn send(&self, _destination: &str, packet: Packet) -> Result<(), TransportError> {
            if let Packet::Request {
                request_id,
                request,
            } = packet
            {
                self.sent.lock().unwrap().push(request);
                let answer = self.answer.lock().unwrap().clone();
                let requester = self.requester.lock().unwrap().clone();
                if let Some(requester) = requester {
                    requester.deliver(request_id, answer);
                }
            }
            Ok(())
        }
    }

    fn setup(max_players: i32) -> (Arc<LocalInstance>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink {
            requester: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            answer: Mutex::new(Ok(Payload::Empty)),
        });
        let requester = Arc::new(Requester::new(sink.clone(), Duration::from_secs(1)));
        *sink.requester.lock().unwrap() = Some(Arc::clone(&requester));
        let config = InstanceConfig::new("arena-1", "arena", max_players);
        (Arc::new(LocalInstance::new(&config, requester)), sink)
    }

    fn sent(sink: &RecordingSink) -> Vec<Request> {
        sink.sent.lock().unwrap().clone()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn player(priority: i32) -> Player {
        Player::new(Uuid::new_v4(), "player").with_priority(priority)
    }

    fn queued_player() -> Player {
        let mut queued = player(0);
        queued.queue_request = Some(QueueRequest::new(
            QueueRequestReason::PluginController,
            QueueRequestParameters::single(QueueRequestParameter::instance_type("arena")),
        ));
        queued
    }

    fn request_id(player: &Player) -> u64 {
        player.queue_request.as_ref().unwrap().id
    }

    #[tokio::test]
    async fn test_admit_until_full() {
        let (instance, _) = setup(2);
        let first = player(0);

        assert_eq!(instance.admit(first.clone(), QueueType::Online, None).await, Ok(()));
        // Re-admitting an occupant takes no new slot
        assert_eq!(instance.admit(first, QueueType::Online, None).await, Ok(()));
        assert_eq!(instance.admit(player(0), QueueType::Online, None).await, Ok(()));
        assert_eq!(
            instance.admit(player(0), QueueType::Online, None).await,
            Err(ResponseCode::NoFreeSlots)
        );
        assert_eq!(instance.player_count(), 2);
        assert_eq!(instance.status().current_players, 2);
    }

    #[tokio::test]
    async fn test_not_joinable() {
        let (instance, _) = setup(10);
        instance.set_joinable(false);

        assert_eq!(
            instance.admit(player(0), QueueType::Online, None).await,
            Err(ResponseCode::NotJoinable)
        );
        assert!(!instance.status().joinable);
    }

    #[tokio::test]
    async fn test_priority_eviction_notifies_controller() {
        let (instance, sink) = setup(1);
        let low = player(1);
        instance.admit(low.clone(), QueueType::Online, None).await.unwrap();

        assert_eq!(
            instance.admit(player(1), QueueType::Online, None).await,
            Err(ResponseCode::NoFreeSlots)
        );

        let high = player(5);
        assert_eq!(instance.admit(high.clone(), QueueType::Online, None).await, Ok(()));
        assert!(instance.player(&low.uuid).is_none());
        assert!(instance.player(&high.uuid).is_some());

        settle().await;
        assert!(sent(&sink).iter().any(|request| matches!(
            request,
            Request::PlayerKicked { player_uuid, .. } if *player_uuid == low.uuid
        )));
    }

    #[tokio::test]
    async fn test_game_eviction_frees_instance_slot() {
        let (instance, sink) = setup(2);
        let lobby_only = player(0);
        instance
            .admit(lobby_only.clone(), QueueType::Online, None)
            .await
            .unwrap();
        let game_id = instance
            .register_game("duels", Slots::new(4, 1, 1))
            .await
            .unwrap();
        let in_game = player(0);
        instance
            .admit(in_game.clone(), QueueType::Players, Some(game_id))
            .await
            .unwrap();

        let arriving = player(5);
        assert_eq!(
            instance
                .admit(arriving.clone(), QueueType::Players, Some(game_id))
                .await,
            Ok(())
        );
        assert!(instance.player(&lobby_only.uuid).is_some());
        assert!(instance.player(&in_game.uuid).is_none());
        assert!(instance.player(&arriving.uuid).is_some());
        assert_eq!(instance.player_count(), 2);

        settle().await;
        let kicked: Vec<Uuid> = sent(&sink)
            .iter()
            .filter_map(|request| match request {
                Request::PlayerKicked { player_uuid, .. } => Some(*player_uuid),
                _ => None,
            })
            .collect();
        assert_eq!(kicked, vec![in_game.uuid]);
    }

    #[tokio::test]
    async fn test_game_admission() {
        let (instance, sink) = setup(-1);
        assert_eq!(
            instance.admit(player(0), QueueType::Players, Some(9)).await,
            Err(ResponseCode::InvalidId)
        );

        let game_id = instance
            .register_game("duels", Slots::new(4, 1, 1))
            .await
            .unwrap();
        let first = player(0);
        assert_eq!(
            instance
                .admit(first.clone(), QueueType::Players, Some(game_id))
                .await,
            Ok(())
        );
        assert_eq!(
            instance
                .admit(player(0), QueueType::Players, Some(game_id))
                .await,
            Err(ResponseCode::NoFreeSlots)
        );
        // The online tier still has room
        assert_eq!(
            instance.admit(player(0), QueueType::Online, Some(game_id)).await,
            Ok(())
        );

        let mut game = instance.game(game_id).unwrap();
        assert!(game.slots.contains(&first.uuid));
        assert_eq!(instance.player(&first.uuid).unwrap().game_id, Some(game_id));

        game.slots.set_joinable(QueueType::Online, false);
        instance.update_game(game).await.unwrap();
        assert_eq!(
            instance.admit(player(0), QueueType::Online, Some(game_id)).await,
            Err(ResponseCode::NotJoinable)
        );

        settle().await;
        let reports = sent(&sink)
            .iter()
            .filter(|request| matches!(request, Request::GameStatusUpdate(_)))
            .count();
        // Registration, two admissions and the update
        assert_eq!(reports, 4);
    }

    #[tokio::test]
    async fn test_register_game_rejected() {
        let (instance, sink) = setup(-1);
        *sink.answer.lock().unwrap() = Err(ResponseCode::InsufficientRights);

        let result = instance.register_game("duels", Slots::unlimited()).await;
        assert!(matches!(
            result,
            Err(RequestError::Rejected(ResponseCode::InsufficientRights))
        ));
        assert!(instance.games.is_empty());
    }

    #[tokio::test]
    async fn test_connect_player_confirms_transfer() {
        let (instance, sink) = setup(10);
        assert_eq!(
            instance.connect_player(Uuid::new_v4()),
            Err(ResponseCode::InvalidPlayer)
        );

        let joined = player(0);
        instance.admit(joined.clone(), QueueType::Online, None).await.unwrap();
        assert_eq!(instance.connect_player(joined.uuid), Ok(()));
        assert!(instance.player(&joined.uuid).unwrap().connected);

        settle().await;
        assert!(sent(&sink).contains(&Request::QueueFinished {
            player_uuid: joined.uuid,
            game_id: None
        }));
    }

    #[tokio::test]
    async fn test_illegal_state_removes_player() {
        let (instance, sink) = setup(10);
        let joined = player(0);
        instance.admit(joined.clone(), QueueType::Online, None).await.unwrap();
        *sink.answer.lock().unwrap() = Err(ResponseCode::IllegalState);

        instance.connect_player(joined.uuid).unwrap();
        settle().await;
        assert!(instance.player(&joined.uuid).is_none());
        assert_eq!(instance.player_count(), 0);
    }

    #[tokio::test]
    async fn test_release_abandoned_reservation() {
        let (instance, _) = setup(1);
        let joined = queued_player();
        instance.admit(joined.clone(), QueueType::Online, None).await.unwrap();

        // A stale request id does not touch the reservation
        assert!(!instance.release(&joined.uuid, request_id(&joined) ^ 1).await);
        assert_eq!(
            instance
                .handle_request(Request::ReleasePlayer {
                    player_uuid: joined.uuid,
                    request_id: request_id(&joined),
                })
                .await,
            Ok(Payload::Flag(true))
        );
        assert!(instance.player(&joined.uuid).is_none());
        // The slot is free again
        assert_eq!(instance.admit(player(0), QueueType::Online, None).await, Ok(()));
    }

    #[tokio::test]
    async fn test_release_keeps_connected_player() {
        let (instance, _) = setup(10);
        let joined = queued_player();
        instance.admit(joined.clone(), QueueType::Online, None).await.unwrap();
        instance.connect_player(joined.uuid).unwrap();

        assert!(!instance.release(&joined.uuid, request_id(&joined)).await);
        assert!(instance.player(&joined.uuid).is_some());
    }

    #[tokio::test]
    async fn test_expire_unconnected_reservations() {
        let (instance, _) = setup(10);
        let waiting = queued_player();
        let connected = queued_player();
        for p in [&waiting, &connected] {
            instance.admit(p.clone(), QueueType::Online, None).await.unwrap();
        }
        instance.connect_player(connected.uuid).unwrap();

        assert_eq!(instance.expire_reservations(Duration::from_secs(60)).await, 0);
        assert_eq!(instance.expire_reservations(Duration::ZERO).await, 1);
        assert!(instance.player(&waiting.uuid).is_none());
        assert!(instance.player(&connected.uuid).is_some());
        assert_eq!(instance.status().current_players, 1);

        // Moving a connected player into a game keeps it connected
        let game_id = instance
            .register_game("duels", Slots::unlimited())
            .await
            .unwrap();
        instance
            .admit(connected.clone(), QueueType::Players, Some(game_id))
            .await
            .unwrap();
        assert_eq!(instance.expire_reservations(Duration::ZERO).await, 0);
    }

    #[tokio::test]
    async fn test_network_lifecycle_reports() {
        let (instance, sink) = setup(10);
        let joined = player(0);
        instance.join_network(joined.clone()).await.unwrap();
        instance.admit(joined.clone(), QueueType::Online, None).await.unwrap();

        *sink.answer.lock().unwrap() = Ok(Payload::Flag(true));
        assert_eq!(instance.cancel_queue(joined.uuid).await, Ok(true));
        *sink.answer.lock().unwrap() = Ok(Payload::Empty);
        instance.leave_network(joined.uuid).await.unwrap();
        assert!(instance.player(&joined.uuid).is_none());

        let requests = sent(&sink);
        assert!(requests.contains(&Request::NetworkJoin { player: joined.clone() }));
        assert!(requests.contains(&Request::CancelQueue {
            player_uuid: joined.uuid
        }));
        assert!(requests.contains(&Request::NetworkLeave {
            player_uuid: joined.uuid
        }));
    }

    #[tokio::test]
    async fn test_quit_and_shutdown_game() {
        let (instance, sink) = setup(-1);
        let game_id = instance
            .register_game("duels", Slots::unlimited())
            .await
            .unwrap();
        let a = player(0);
        let b = player(0);
        for p in [&a, &b] {
            instance
                .admit(p.clone(), QueueType::Playing, Some(game_id))
                .await
                .unwrap();
        }

        instance.quit_game(a.uuid).await.unwrap();
        assert_eq!(instance.player(&a.uuid).unwrap().game_id, None);
        assert!(!instance.game(game_id).unwrap().slots.contains(&a.uuid));
        assert!(matches!(
            instance.quit_game(a.uuid).await,
            Err(RequestError::Rejected(ResponseCode::InvalidId))
        ));

        instance.shutdown_game(game_id).await.unwrap();
        assert!(instance.game(game_id).is_none());
        assert_eq!(instance.player(&b.uuid).unwrap().game_id, None);
        assert!(sent(&sink).contains(&Request::GameShutdown { game_id }));
        assert!(matches!(
            instance.shutdown_game(game_id).await,
            Err(RequestError::Rejected(ResponseCode::InvalidId))
        ));
    }

    #[tokio::test]
    async fn test_player_update_replaces_replica() {
        let (instance, _) = setup(10);
        let joined = player(0);
        instance.admit(joined.clone(), QueueType::Online, None).await.unwrap();

        let mut updated = joined.clone();
        updated.queue_priority = 9;
        assert!(instance.apply_player_update(updated));
        assert_eq!(instance.player(&joined.uuid).unwrap().player.queue_priority, 9);
        assert!(!instance.apply_player_update(player(0)));
    }

    #[tokio::test]
    async fn test_controller_bound_request_is_refused() {
        let (instance, _) = setup(10);
        let response = instance
            .handle_request(Request::GameQuit {
                player_uuid: Uuid::new_v4(),
            })
            .await;
        assert_eq!(response, Err(ResponseCode::Unknown));
    }
}
