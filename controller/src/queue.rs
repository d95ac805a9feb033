//! Queue engine: routes players to instances and games
//!
//! A queue run holds its [`QueueRequest`] on the player record and loops:
//! - **Staging** walks the ranked parameter tiers, resolves each parameter
//!   against the live registries and picks the first target with room for
//!   the player (and, for party owners, the online members that follow them)
//! - **Joining** sets the matching transfer state and asks the destination
//!   to admit the player with a correlated `InstanceJoin`
//! - **Moving** hands the player to the proxy, after which the destination
//!   confirms with `QueueFinished` (see [`crate::reconcile`])
//!
//! Every failed attempt is recorded as a stage, which excludes its target
//! from later staging passes, so a run ends after at most one attempt per
//! known instance and game. Installing a new request on the player, or
//! cancelling it, stops the old run at its next step.

use crate::controller::{Controller, ControllerEvent};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use shared::{
    Player, PlayerState, QueueRequest, QueueRequestParameter, QueueRequestParameters,
    QueueRequestReason, QueueStage, QueueStageResult, QueueTarget, QueueType, Request,
    RequestError, ResponseCode,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const NO_DESTINATION_MESSAGE: &str = "No available server was found";

/// How a queue run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueResult {
    Transferred {
        instance_id: String,
        game_id: Option<u64>,
    },
    /// Nothing fit and the reason leaves the player nowhere to stay
    Disconnected {
        message: String,
        stages: Vec<QueueStage>,
    },
    /// Nothing fit; the player stays where it is
    Exhausted { stages: Vec<QueueStage> },
    /// Superseded, cancelled, or the player left
    Cancelled,
}

pub type QueueFuture = Pin<Box<dyn Future<Output = QueueResult> + Send>>;

/// A staged destination
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    instance_id: String,
    game_id: Option<u64>,
    queue_type: QueueType,
    /// Party members that follow the player once it is in
    followers: Vec<Uuid>,
}

enum Attempt {
    Joined,
    Failed(QueueStage),
    Superseded,
}

/// Starts a queue run for `player` on its own task.
pub fn spawn_queue(
    ctx: &Arc<Controller>,
    player: Uuid,
    request: QueueRequest,
) -> JoinHandle<QueueResult> {
    tokio::spawn(queue_player(Arc::clone(ctx), player, request))
}

/// Convenience wrapper building the request from its parts.
pub fn enqueue(
    ctx: &Arc<Controller>,
    player: Uuid,
    reason: QueueRequestReason,
    parameters: QueueRequestParameters,
    message: Option<String>,
) -> JoinHandle<QueueResult> {
    let mut request = QueueRequest::new(reason, parameters);
    request.reason_message = message;
    spawn_queue(ctx, player, request)
}

/// Registers a freshly connected player and queues it to the fallback lobby.
///
/// Returns `None` if the player is already online.
pub async fn join_network(
    ctx: &Arc<Controller>,
    player: Player,
) -> Option<JoinHandle<QueueResult>> {
    let uuid = player.uuid;
    if !ctx.register_player(player).await {
        warn!("Player {} is already online", uuid);
        return None;
    }
    Some(enqueue(
        ctx,
        uuid,
        QueueRequestReason::NetworkJoin,
        ctx.fallback_parameters(),
        None,
    ))
}

/// Installs `request` on the player, replacing any request in flight, and
/// drives it to completion.
pub fn queue_player(ctx: Arc<Controller>, player: Uuid, request: QueueRequest) -> QueueFuture {
    Box::pin(async move { run(ctx, player, request).await })
}

async fn run(ctx: Arc<Controller>, uuid: Uuid, request: QueueRequest) -> QueueResult {
    let request_id = request.id;
    let reason = request.reason;

    let previous_state = {
        let mut player = match ctx.players.get_mut(&uuid) {
            Some(player) => player,
            None => return QueueResult::Cancelled,
        };
        if let Some(old) = &player.queue_request {
            debug!(
                "Queue request {} of {} superseded by {}",
                old.id, uuid, request_id
            );
        }
        player.queue_request = Some(request);
        player.state.clone()
    };
    debug!("Queueing player {} ({:?}, request {})", uuid, reason, request_id);

    loop {
        let (parameters, excluded) = match current_request(&ctx, &uuid, request_id) {
            Some(request) => (request.parameters.clone(), request.excluded_targets()),
            None => return QueueResult::Cancelled,
        };

        let candidate = match stage(&ctx, &uuid, reason, &parameters, &excluded) {
            Some(candidate) => candidate,
            None => return exhaust(&ctx, uuid, request_id, previous_state).await,
        };

        match attempt(&ctx, uuid, request_id, &candidate).await {
            Attempt::Joined => {
                info!(
                    "Player {} transferred to {}{}",
                    uuid,
                    candidate.instance_id,
                    candidate
                        .game_id
                        .map(|id| format!(" game {}", id))
                        .unwrap_or_default()
                );
                for follower in &candidate.followers {
                    spawn_queue(&ctx, *follower, follow_request(&candidate));
                }
                return QueueResult::Transferred {
                    instance_id: candidate.instance_id,
                    game_id: candidate.game_id,
                };
            }
            Attempt::Failed(stage) => {
                debug!(
                    "Queue attempt of {} at {} failed: {:?}",
                    uuid, stage.instance_id, stage.result
                );
                if !record_stage(&ctx, &uuid, request_id, stage) {
                    return QueueResult::Cancelled;
                }
            }
            Attempt::Superseded => return QueueResult::Cancelled,
        }
    }
}

fn current_request(ctx: &Controller, uuid: &Uuid, request_id: u64) -> Option<QueueRequest> {
    let player = ctx.players.get(uuid)?;
    match &player.queue_request {
        Some(request) if request.id == request_id => Some(request.clone()),
        _ => None,
    }
}

fn record_stage(ctx: &Controller, uuid: &Uuid, request_id: u64, stage: QueueStage) -> bool {
    match ctx.players.get_mut(uuid) {
        Some(mut player) => match player.queue_request.as_mut() {
            Some(request) if request.id == request_id => {
                request.add_stage(stage);
                true
            }
            _ => false,
        },
        None => false,
    }
}

/// PARTY_JOIN request sending a follower to the same destination.
fn follow_request(candidate: &Candidate) -> QueueRequest {
    let parameter = match candidate.game_id {
        Some(game_id) => QueueRequestParameter::game(game_id).on_instance(&candidate.instance_id),
        None => QueueRequestParameter::instance(&candidate.instance_id),
    }
    .with_queue_type(candidate.queue_type)
    .with_party_skip(true);

    QueueRequest::new(
        QueueRequestReason::PartyJoin,
        QueueRequestParameters::single(parameter),
    )
}

/// Picks the first reachable destination with room, or `None`.
fn stage(
    ctx: &Controller,
    uuid: &Uuid,
    reason: QueueRequestReason,
    parameters: &QueueRequestParameters,
    excluded: &HashSet<QueueTarget>,
) -> Option<Candidate> {
    let (priority, current_instance, current_game) = {
        let player = ctx.players.get(uuid)?;
        (
            player.queue_priority,
            player.instance_id.clone(),
            player.game_id,
        )
    };

    let party_members = if reason.allows_party_aggregation() {
        ctx.parties
            .owned_by(uuid)
            .map(|party_id| ctx.parties.online_members(party_id, uuid))
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let mut rng = rand::thread_rng();
    for tier in parameters.parameters() {
        let mut alternatives = tier.clone();
        alternatives.shuffle(&mut rng);

        for parameter in &alternatives {
            let followers = if parameter.party_skip {
                Vec::new()
            } else {
                party_members.clone()
            };
            let mut arrivals: HashMap<Uuid, i32> = followers
                .iter()
                .map(|member| (*member, ctx.priority_of(member)))
                .collect();
            arrivals.insert(*uuid, priority);

            let mut targets = resolve(ctx, parameter, excluded);
            targets.shuffle(&mut rng);

            for (instance_id, game_id) in targets {
                if current_instance.as_deref() == Some(instance_id.as_str())
                    && current_game == game_id
                {
                    continue;
                }
                if fits(ctx, &instance_id, game_id, parameter.queue_type, &arrivals) {
                    return Some(Candidate {
                        instance_id,
                        game_id,
                        queue_type: parameter.queue_type,
                        followers,
                    });
                }
            }
        }
    }
    None
}

/// Resolves one parameter into `(instance, game)` targets not yet excluded.
fn resolve(
    ctx: &Controller,
    parameter: &QueueRequestParameter,
    excluded: &HashSet<QueueTarget>,
) -> Vec<(String, Option<u64>)> {
    let instance_allowed = |instance_id: &str| {
        if excluded.contains(&QueueTarget::Instance(instance_id.to_string())) {
            return false;
        }
        if let Some(wanted) = &parameter.instance_id {
            if wanted != instance_id {
                return false;
            }
        }
        match (&parameter.instance_type, ctx.instances.get(instance_id)) {
            (_, None) => false,
            (Some(wanted), Some(instance)) => &instance.instance_type == wanted,
            (None, Some(_)) => true,
        }
    };

    if parameter.targets_game() {
        let candidates: Vec<(u64, String)> = ctx
            .games
            .iter()
            .filter(|game| parameter.game_id.map_or(true, |id| id == game.game_id))
            .filter(|game| {
                game.matches(
                    parameter.game_type.as_deref(),
                    parameter.game_mode.as_deref(),
                    parameter.game_map.as_deref(),
                )
            })
            .filter(|game| !excluded.contains(&QueueTarget::Game(game.game_id)))
            .map(|game| (game.game_id, game.instance_id.clone()))
            .collect();

        candidates
            .into_iter()
            .filter(|(_, instance_id)| instance_allowed(instance_id))
            .map(|(game_id, instance_id)| (instance_id, Some(game_id)))
            .collect()
    } else if parameter.instance_id.is_some() || parameter.instance_type.is_some() {
        let ids: Vec<String> = ctx
            .instances
            .iter()
            .map(|instance| instance.key().clone())
            .collect();
        ids.into_iter()
            .filter(|instance_id| instance_allowed(instance_id))
            .map(|instance_id| (instance_id, None))
            .collect()
    } else {
        debug!("Ignoring queue parameter without a target: {:?}", parameter);
        Vec::new()
    }
}

/// Joinability and capacity of the target for every arrival, at instance
/// level and, for a game, at game level.
fn fits(
    ctx: &Controller,
    instance_id: &str,
    game_id: Option<u64>,
    queue_type: QueueType,
    arrivals: &HashMap<Uuid, i32>,
) -> bool {
    let instance = match ctx.instance(instance_id) {
        Some(instance) => instance,
        None => return false,
    };
    if !instance.joinable {
        return false;
    }

    let occupants = ctx.players_on(instance_id);
    let incoming = arrivals
        .keys()
        .filter(|id| !occupants.contains(id))
        .count();
    if !instance.has_slots(incoming) {
        let ranked = occupants.iter().map(|id| (*id, ctx.priority_of(id)));
        if shared::slots::find_kickable(ranked, instance.max_players, arrivals).is_none() {
            return false;
        }
    }

    match game_id {
        Some(game_id) => {
            let game = match ctx.game(game_id) {
                Some(game) => game,
                None => return false,
            };
            game.slots
                .admits(arrivals, queue_type, |id| ctx.priority_of(id))
        }
        None => true,
    }
}

fn stage_for_error(
    error: &RequestError,
    queue_type: QueueType,
    instance_id: &str,
    game_id: Option<u64>,
) -> QueueStage {
    let result = match error {
        RequestError::Rejected(ResponseCode::NoFreeSlots)
        | RequestError::Rejected(ResponseCode::NotJoinable) => QueueStageResult::NotJoinable,
        RequestError::Rejected(ResponseCode::InvalidId)
        | RequestError::Rejected(ResponseCode::InvalidPlayer) => QueueStageResult::UnknownId,
        RequestError::Rejected(_) => QueueStageResult::JoinDenied,
        RequestError::Cancelled | RequestError::Transport(_) => QueueStageResult::NoResponse,
    };
    QueueStage::new(result, queue_type, instance_id, game_id).with_message(error.to_string())
}

async fn attempt(
    ctx: &Arc<Controller>,
    uuid: Uuid,
    request_id: u64,
    candidate: &Candidate,
) -> Attempt {
    let instance_id = candidate.instance_id.as_str();

    let player = {
        let mut player = match ctx.players.get_mut(&uuid) {
            Some(player) => player,
            None => return Attempt::Superseded,
        };
        if player.queue_request.as_ref().map(|r| r.id) != Some(request_id) {
            return Attempt::Superseded;
        }
        player.state = match candidate.game_id {
            Some(game_id) => PlayerState::game_transfer(instance_id, game_id),
            None => PlayerState::instance_transfer(instance_id),
        };
        player.value().clone()
    };

    let join = Request::InstanceJoin {
        player,
        queue_type: candidate.queue_type,
        game_id: candidate.game_id,
        party: false,
    };
    if let Err(e) = ctx
        .requester
        .request(instance_id, join, Some(ctx.config.join_timeout))
        .await
    {
        // A late answer may still have admitted the player
        if matches!(e, RequestError::Cancelled) {
            release_reservation(ctx, uuid, instance_id, request_id);
        }
        return Attempt::Failed(stage_for_error(
            &e,
            candidate.queue_type,
            instance_id,
            candidate.game_id,
        ));
    }

    if current_request(ctx, &uuid, request_id).is_none() {
        release_reservation(ctx, uuid, instance_id, request_id);
        return Attempt::Superseded;
    }

    if let Err(e) = ctx.proxy.move_player(uuid, instance_id).await {
        warn!("Failed to move player {} to {}: {}", uuid, instance_id, e);
        release_reservation(ctx, uuid, instance_id, request_id);
        return Attempt::Failed(
            QueueStage::new(
                QueueStageResult::ServerUnavailable,
                candidate.queue_type,
                instance_id,
                candidate.game_id,
            )
            .with_message(e.to_string()),
        );
    }
    Attempt::Joined
}

/// Tells `instance_id` to free the slot it reserved for a transfer that
/// will not happen.
fn release_reservation(ctx: &Arc<Controller>, uuid: Uuid, instance_id: &str, request_id: u64) {
    let ctx = Arc::clone(ctx);
    let instance_id = instance_id.to_string();
    tokio::spawn(async move {
        let release = Request::ReleasePlayer {
            player_uuid: uuid,
            request_id,
        };
        match ctx.requester.request(&instance_id, release, None).await {
            Ok(_) => debug!("Released reservation of {} on {}", uuid, instance_id),
            Err(e) => warn!(
                "Failed to release reservation of {} on {}: {}",
                uuid, instance_id, e
            ),
        }
    });
}

/// Ends a run that found nowhere to go. The pre-queue state comes back; for
/// reasons that leave the player without a server it is disconnected.
async fn exhaust(
    ctx: &Arc<Controller>,
    uuid: Uuid,
    request_id: u64,
    previous_state: PlayerState,
) -> QueueResult {
    let request = {
        let mut player = match ctx.players.get_mut(&uuid) {
            Some(player) => player,
            None => return QueueResult::Cancelled,
        };
        match player.queue_request.take() {
            Some(request) if request.id == request_id => {
                player.state = previous_state;
                request
            }
            other => {
                player.queue_request = other;
                return QueueResult::Cancelled;
            }
        }
    };
    let stages = request.stages().to_vec();

    if !request.reason.disconnects_when_exhausted() {
        debug!(
            "Queue of {} exhausted after {} stages, player stays",
            uuid,
            stages.len()
        );
        return QueueResult::Exhausted { stages };
    }

    let message = request
        .reason_message
        .unwrap_or_else(|| NO_DESTINATION_MESSAGE.to_string());
    info!(
        "Disconnecting player {} after {} failed stages: {}",
        uuid,
        stages.len(),
        message
    );
    ctx.proxy.disconnect(uuid, &message).await;
    ctx.leave_network(&uuid);
    ctx.emit(ControllerEvent::PlayerDisconnected {
        player: uuid,
        message: message.clone(),
    });
    QueueResult::Disconnected { message, stages }
}

/// Queues every other online member of the party to the owner's current
/// instance and game. Returns the started runs, or `None` if `requester`
/// does not own the party or is not on an instance.
pub fn warp_party(
    ctx: &Arc<Controller>,
    party_id: u64,
    requester: Uuid,
) -> Option<Vec<JoinHandle<QueueResult>>> {
    let party = ctx.parties.get(party_id)?;
    if party.owner != requester {
        return None;
    }
    let (instance_id, game_id) = {
        let owner = ctx.players.get(&requester)?;
        (owner.instance_id.clone()?, owner.game_id)
    };

    let destination = Candidate {
        instance_id,
        game_id,
        queue_type: if game_id.is_some() {
            QueueType::Players
        } else {
            QueueType::Online
        },
        followers: Vec::new(),
    };
    let members = ctx.parties.online_members(party_id, &requester);
    info!(
        "Warping {} members of party {} to {}",
        members.len(),
        party_id,
        destination.instance_id
    );

    Some(
        members
            .into_iter()
            .map(|member| spawn_queue(ctx, member, follow_request(&destination)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::data::MemoryDataManager;
    use crate::proxy::Proxy;
    use async_trait::async_trait;
    use shared::{
        Game, Instance, Packet, PacketSink, Payload, PlayerStateName, Requester, Slots,
        TransportError,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers `InstanceJoin` requests inline with a scripted response per
    /// instance; everything else succeeds.
    struct ScriptedSink {
        requester: Mutex<Option<Arc<Requester>>>,
        answers: Mutex<HashMap<String, Result<Payload, ResponseCode>>>,
        joins: Mutex<Vec<String>>,
        releases: Mutex<Vec<(String, Uuid, u64)>>,
    }

    impl ScriptedSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requester: Mutex::new(None),
                answers: Mutex::new(HashMap::new()),
                joins: Mutex::new(Vec::new()),
                releases: Mutex::new(Vec::new()),
            })
        }

        fn answer(&self, instance_id: &str, response: Result<Payload, ResponseCode>) {
            self.answers
                .lock()
                .unwrap()
                .insert(instance_id.to_string(), response);
        }

        fn joins(&self) -> Vec<String> {
            self.joins.lock().unwrap().clone()
        }
    }

    impl PacketSink for ScriptedSink {
        fn is_reachable(&self, _destination: &str) -> bool {
            true
        }

        fn send(&self, destination: &str, packet: Packet) -> Result<(), TransportError> {
            if let Packet::Request {
                request_id,
                request,
            } = packet
            {
                let response = match request {
                    Request::InstanceJoin { .. } => {
                        self.joins.lock().unwrap().push(destination.to_string());
                        self.answers
                            .lock()
                            .unwrap()
                            .get(destination)
                            .cloned()
                            .unwrap_or(Ok(Payload::Empty))
                    }
                    Request::ReleasePlayer {
                        player_uuid,
                        request_id,
                    } => {
                        self.releases.lock().unwrap().push((
                            destination.to_string(),
                            player_uuid,
                            request_id,
                        ));
                        Ok(Payload::Flag(true))
                    }
                    _ => Ok(Payload::Empty),
                };
                let requester = self.requester.lock().unwrap().clone();
                if let Some(requester) = requester {
                    requester.deliver(request_id, response);
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingProxy {
        moves: Mutex<Vec<(Uuid, String)>>,
        disconnects: Mutex<Vec<(Uuid, String)>>,
        broken: Mutex<bool>,
    }

    #[async_trait]
    impl Proxy for RecordingProxy {
        async fn move_player(&self, player: Uuid, instance_id: &str) -> Result<(), RequestError> {
            let broken = *self.broken.lock().unwrap();
            if broken {
                return Err(RequestError::Transport(TransportError::Closed));
            }
            self.moves
                .lock()
                .unwrap()
                .push((player, instance_id.to_string()));
            Ok(())
        }

        async fn disconnect(&self, player: Uuid, message: &str) {
            self.disconnects
                .lock()
                .unwrap()
                .push((player, message.to_string()));
        }
    }

    fn setup() -> (Arc<Controller>, Arc<ScriptedSink>, Arc<RecordingProxy>) {
        let sink = ScriptedSink::new();
        let requester = Arc::new(Requester::new(sink.clone(), Duration::from_secs(1)));
        *sink.requester.lock().unwrap() = Some(Arc::clone(&requester));
        let proxy = Arc::new(RecordingProxy::default());
        let ctx = Arc::new(Controller::new(
            ControllerConfig::default(),
            requester,
            proxy.clone(),
            Arc::new(MemoryDataManager::new()),
        ));
        (ctx, sink, proxy)
    }

    fn add_player(ctx: &Controller, priority: i32) -> Uuid {
        let uuid = Uuid::new_v4();
        ctx.players
            .insert(uuid, Player::new(uuid, "player").with_priority(priority));
        uuid
    }

    fn lobby_request() -> QueueRequest {
        QueueRequest::new(
            QueueRequestReason::NetworkJoin,
            QueueRequestParameters::single(QueueRequestParameter::instance_type("lobby")),
        )
    }

    #[tokio::test]
    async fn test_network_join_transfers_to_lobby() {
        let (ctx, sink, proxy) = setup();
        ctx.instances
            .insert("lobby-1".into(), Instance::new("lobby-1", "lobby", 50).non_playable());
        let uuid = add_player(&ctx, 0);

        let result = queue_player(Arc::clone(&ctx), uuid, lobby_request()).await;

        assert_eq!(
            result,
            QueueResult::Transferred {
                instance_id: "lobby-1".into(),
                game_id: None
            }
        );
        assert_eq!(sink.joins(), vec!["lobby-1".to_string()]);
        assert_eq!(proxy.moves.lock().unwrap().clone(), vec![(uuid, "lobby-1".to_string())]);
        let player = ctx.player(&uuid).unwrap();
        assert!(player.state.is_transfer_to("lobby-1", None));
    }

    #[tokio::test]
    async fn test_failed_instance_is_excluded_and_retried() {
        let (ctx, sink, _) = setup();
        ctx.instances
            .insert("lobby-1".into(), Instance::new("lobby-1", "lobby", 50));
        ctx.instances
            .insert("lobby-2".into(), Instance::new("lobby-2", "lobby", 50));
        sink.answer("lobby-1", Err(ResponseCode::NoFreeSlots));
        sink.answer("lobby-2", Err(ResponseCode::NoFreeSlots));
        let uuid = add_player(&ctx, 0);

        let result = queue_player(Arc::clone(&ctx), uuid, lobby_request()).await;

        // Each instance tried exactly once
        let mut joins = sink.joins();
        joins.sort();
        assert_eq!(joins, vec!["lobby-1".to_string(), "lobby-2".to_string()]);
        match result {
            QueueResult::Disconnected { stages, message } => {
                assert_eq!(message, NO_DESTINATION_MESSAGE);
                assert_eq!(stages.len(), 2);
                assert!(stages
                    .iter()
                    .all(|s| s.result == QueueStageResult::NotJoinable));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(ctx.player(&uuid).is_none());
    }

    #[tokio::test]
    async fn test_failed_move_releases_reservation() {
        let (ctx, sink, proxy) = setup();
        ctx.instances
            .insert("lobby-1".into(), Instance::new("lobby-1", "lobby", 50));
        *proxy.broken.lock().unwrap() = true;
        let uuid = add_player(&ctx, 0);
        let request = lobby_request();
        let request_id = request.id;

        let result = queue_player(Arc::clone(&ctx), uuid, request).await;

        assert!(matches!(result, QueueResult::Disconnected { .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            sink.releases.lock().unwrap().clone(),
            vec![("lobby-1".to_string(), uuid, request_id)]
        );
    }

    #[tokio::test]
    async fn test_exhausted_game_quit_restores_state() {
        let (ctx, _, proxy) = setup();
        let uuid = add_player(&ctx, 0);
        ctx.players.get_mut(&uuid).unwrap().state = PlayerState::instance_online("arena-1");

        let request = QueueRequest::new(QueueRequestReason::GameQuit, ctx.fallback_parameters());
        let result = queue_player(Arc::clone(&ctx), uuid, request).await;

        assert_eq!(result, QueueResult::Exhausted { stages: vec![] });
        let player = ctx.player(&uuid).unwrap();
        assert_eq!(player.state.name, PlayerStateName::InstanceOnline);
        assert!(player.queue_request.is_none());
        assert!(proxy.disconnects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_game_capacity_checked_for_whole_party() {
        let (ctx, _, _) = setup();
        ctx.instances
            .insert("arena-1".into(), Instance::new("arena-1", "arena", -1));
        ctx.games
            .insert(1, Game::new(1, "arena-1", "duels", Slots::new(2, 2, 2)));
        ctx.games
            .insert(2, Game::new(2, "arena-1", "duels", Slots::new(4, 4, 4)));

        let owner = add_player(&ctx, 0);
        let party_id = ctx.parties.create(owner).unwrap();
        ctx.parties.set_invitations_only(party_id, false);
        for _ in 0..2 {
            let member = add_player(&ctx, 0);
            ctx.parties.join(party_id, member);
            ctx.players.get_mut(&member).unwrap().instance_id = Some("lobby-1".into());
        }

        let parameters = QueueRequestParameters::single(QueueRequestParameter::game_type("duels"));
        let candidate = stage(
            &ctx,
            &owner,
            QueueRequestReason::PluginController,
            &parameters,
            &HashSet::new(),
        );
        // Without aggregation any game fits
        assert!(candidate.is_some());

        for _ in 0..10 {
            let candidate = stage(
                &ctx,
                &owner,
                QueueRequestReason::NetworkJoin,
                &parameters,
                &HashSet::new(),
            )
            .unwrap();
            assert_eq!(candidate.game_id, Some(2));
            assert_eq!(candidate.followers.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_priority_allows_eviction_on_full_game() {
        let (ctx, _, _) = setup();
        ctx.instances
            .insert("arena-1".into(), Instance::new("arena-1", "arena", -1));
        let occupant = add_player(&ctx, 1);
        let mut slots = Slots::new(1, 1, 1);
        slots.add(occupant, QueueType::Players);
        ctx.games.insert(1, Game::new(1, "arena-1", "duels", slots));

        let parameters = QueueRequestParameters::single(QueueRequestParameter::game(1));
        let weak = add_player(&ctx, 1);
        let strong = add_player(&ctx, 5);

        let reason = QueueRequestReason::PluginController;
        assert!(stage(&ctx, &weak, reason, &parameters, &HashSet::new()).is_none());
        assert!(stage(&ctx, &strong, reason, &parameters, &HashSet::new()).is_some());
    }

    #[tokio::test]
    async fn test_new_request_supersedes_running_one() {
        let (ctx, _, _) = setup();
        let uuid = add_player(&ctx, 0);
        let first = lobby_request();
        let first_id = first.id;
        ctx.players.get_mut(&uuid).unwrap().queue_request = Some(first);

        let second = lobby_request();
        let second_id = second.id;
        ctx.players.get_mut(&uuid).unwrap().queue_request = Some(second);

        assert!(current_request(&ctx, &uuid, first_id).is_none());
        assert!(current_request(&ctx, &uuid, second_id).is_some());
        let stage = QueueStage::new(QueueStageResult::NoResponse, QueueType::Online, "x", None);
        assert!(!record_stage(&ctx, &uuid, first_id, stage));
    }

    #[tokio::test]
    async fn test_plugin_request_retries_seeded_instance() {
        let (ctx, sink, _) = setup();
        ctx.instances
            .insert("arena-1".into(), Instance::new("arena-1", "arena", 10));
        let uuid = add_player(&ctx, 0);
        let seeded = QueueStage::new(QueueStageResult::JoinDenied, QueueType::Online, "arena-1", None);
        let parameters = QueueRequestParameters::single(QueueRequestParameter::instance("arena-1"));

        let kick = QueueRequest::new(QueueRequestReason::ServerKick, parameters.clone())
            .with_seeded_stage(seeded.clone());
        let result = queue_player(Arc::clone(&ctx), uuid, kick).await;
        assert!(matches!(result, QueueResult::Disconnected { .. }));
        assert!(sink.joins().is_empty());

        let uuid = add_player(&ctx, 0);
        let plugin = QueueRequest::new(QueueRequestReason::PluginInstance, parameters)
            .with_seeded_stage(seeded);
        let result = queue_player(Arc::clone(&ctx), uuid, plugin).await;
        assert!(matches!(result, QueueResult::Transferred { .. }));
        assert_eq!(sink.joins(), vec!["arena-1".to_string()]);
    }

    #[tokio::test]
    async fn test_warp_party_queues_each_member() {
        let (ctx, _, _) = setup();
        ctx.instances
            .insert("lobby-1".into(), Instance::new("lobby-1", "lobby", 50));
        ctx.instances
            .insert("lobby-2".into(), Instance::new("lobby-2", "lobby", 50));

        let owner = add_player(&ctx, 0);
        ctx.players.get_mut(&owner).unwrap().instance_id = Some("lobby-1".into());
        let party_id = ctx.parties.create(owner).unwrap();
        ctx.parties.set_invitations_only(party_id, false);
        let mut members = Vec::new();
        for _ in 0..2 {
            let member = add_player(&ctx, 0);
            ctx.parties.join(party_id, member);
            ctx.players.get_mut(&member).unwrap().instance_id = Some("lobby-2".into());
            members.push(member);
        }

        assert!(warp_party(&ctx, party_id, members[0]).is_none());
        let handles = warp_party(&ctx, party_id, owner).unwrap();
        assert_eq!(handles.len(), 2);
        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                QueueResult::Transferred {
                    instance_id: "lobby-1".into(),
                    game_id: None
                }
            );
        }
    }
}
