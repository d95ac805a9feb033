//! Applies state reported by instances to the controller registries
//!
//! Instances are the authority on what runs on them, but only on what runs
//! on *them*: every update is checked against the reporting instance before
//! anything is mutated.

use crate::controller::{Controller, ControllerEvent};
use crate::queue::{self, QueueResult};
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};
use shared::{
    Game, Instance, PlayerState, QueueRequest, QueueRequestReason, QueueStage, QueueStageResult,
    QueueType, ResponseCode,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const KICK_MESSAGE: &str = "You were kicked from the server";

/// Registers a new game or updates one the sender already hosts.
pub fn game_status_update(ctx: &Controller, from: &str, game: Game) -> Result<(), ResponseCode> {
    if game.instance_id != from {
        warn!(
            "Instance {} reported game {} as hosted by {}",
            from, game.game_id, game.instance_id
        );
        return Err(ResponseCode::InsufficientRights);
    }

    match ctx.games.entry(game.game_id) {
        Entry::Occupied(mut existing) => {
            if existing.get().instance_id != from {
                warn!(
                    "Instance {} tried to update game {} owned by {}",
                    from,
                    game.game_id,
                    existing.get().instance_id
                );
                return Err(ResponseCode::InsufficientRights);
            }
            debug!("Game {} on {} updated ({})", game.game_id, from, game.state);
            existing.insert(game);
        }
        Entry::Vacant(slot) => {
            info!("Game {} registered by {} ({})", game.game_id, from, game.state);
            slot.insert(game);
        }
    }
    Ok(())
}

/// Removes a game and sends its players back to the fallback lobby.
pub fn game_shutdown(
    ctx: &Arc<Controller>,
    from: &str,
    game_id: u64,
) -> Result<Vec<JoinHandle<QueueResult>>, ResponseCode> {
    match ctx.games.get(&game_id) {
        None => return Err(ResponseCode::InvalidId),
        Some(game) if game.instance_id != from => {
            warn!(
                "Instance {} tried to shut down game {} owned by {}",
                from, game_id, game.instance_id
            );
            return Err(ResponseCode::InsufficientRights);
        }
        Some(_) => {}
    }
    ctx.games.remove(&game_id);

    let affected: Vec<Uuid> = ctx
        .players
        .iter()
        .filter(|player| player.game_id == Some(game_id))
        .map(|player| *player.key())
        .collect();

    let mut requeue = Vec::new();
    for uuid in &affected {
        if let Some(mut player) = ctx.players.get_mut(uuid) {
            player.game_id = None;
            if let Some(instance_id) = player.instance_id.clone() {
                if !player.state.name.is_transfer() {
                    player.state = PlayerState::instance_online(&instance_id);
                }
            }
            if player.queue_request.is_none() {
                requeue.push(*uuid);
            }
        }
    }

    info!(
        "Game {} on {} shut down, requeueing {} of {} players",
        game_id,
        from,
        requeue.len(),
        affected.len()
    );
    Ok(requeue
        .into_iter()
        .map(|uuid| {
            queue::enqueue(
                ctx,
                uuid,
                QueueRequestReason::GameShutdown,
                ctx.fallback_parameters(),
                None,
            )
        })
        .collect())
}

/// Takes a player out of its game. If nothing else is queued for it, the
/// player is sent to the fallback lobby.
pub fn game_quit(
    ctx: &Arc<Controller>,
    player_uuid: Uuid,
) -> Result<Option<JoinHandle<QueueResult>>, ResponseCode> {
    let (game_id, queued) = {
        let mut player = ctx
            .players
            .get_mut(&player_uuid)
            .ok_or(ResponseCode::InvalidId)?;
        let game_id = player.game_id.ok_or(ResponseCode::InvalidId)?;
        if !ctx.games.contains_key(&game_id) {
            return Err(ResponseCode::InvalidId);
        }

        player.game_id = None;
        if let Some(instance_id) = player.instance_id.clone() {
            player.state = PlayerState::instance_online(&instance_id);
        }
        (game_id, player.queue_request.is_some())
    };

    if let Some(mut game) = ctx.games.get_mut(&game_id) {
        game.remove_player(&player_uuid);
    }
    ctx.push_player_update(&player_uuid);
    debug!("Player {} quit game {}", player_uuid, game_id);

    if queued {
        return Ok(None);
    }
    Ok(Some(queue::enqueue(
        ctx,
        player_uuid,
        QueueRequestReason::GameQuit,
        ctx.fallback_parameters(),
        None,
    )))
}

/// Upserts the instance record. Returns false if the sender reported a
/// record other than its own.
pub fn instance_status(ctx: &Controller, from: &str, instance: Instance) -> bool {
    if instance.id != from {
        warn!(
            "Instance {} sent a status for {}, ignoring",
            from, instance.id
        );
        return false;
    }
    ctx.instances.insert(instance.id.clone(), instance);
    true
}

/// Completes a transfer once the player's connection landed on `from`.
///
/// Accepted only while the player is in transit to exactly that instance
/// and game.
pub fn queue_finished(
    ctx: &Controller,
    from: &str,
    player_uuid: Uuid,
    game_id: Option<u64>,
) -> Result<(), ResponseCode> {
    if let Some(game_id) = game_id {
        if !ctx.games.contains_key(&game_id) {
            warn!("Queue finish of {} into vanished game {}", player_uuid, game_id);
            return Err(ResponseCode::InvalidId);
        }
    }

    let previous_game = {
        let mut player = ctx
            .players
            .get_mut(&player_uuid)
            .ok_or(ResponseCode::InvalidPlayer)?;
        if !player.state.is_transfer_to(from, game_id) {
            warn!(
                "Unexpected queue finish of {} at {} (game {:?}) in state {:?}",
                player_uuid, from, game_id, player.state.name
            );
            return Err(ResponseCode::IllegalState);
        }

        let previous_game = player.game_id;
        player.state = match game_id {
            Some(game_id) => PlayerState::game_online(from, game_id),
            None => PlayerState::instance_online(from),
        };
        player.queue_request = None;
        player.instance_id = Some(from.to_string());
        player.game_id = game_id;
        previous_game
    };

    if let Some(previous) = previous_game.filter(|previous| Some(*previous) != game_id) {
        if let Some(mut game) = ctx.games.get_mut(&previous) {
            game.remove_player(&player_uuid);
        }
    }

    ctx.push_player_update(&player_uuid);
    info!("Player {} is now online on {}", player_uuid, from);
    ctx.emit(ControllerEvent::QueueFinished {
        player: player_uuid,
        instance_id: from.to_string(),
        game_id,
    });
    Ok(())
}

/// An instance evicted a player to make room. The player is queued to the
/// fallback lobby, never back to the instance that kicked it.
pub fn player_kicked(
    ctx: &Arc<Controller>,
    from: &str,
    player_uuid: Uuid,
    message: Option<String>,
) -> Result<JoinHandle<QueueResult>, ResponseCode> {
    if !ctx.players.contains_key(&player_uuid) {
        return Err(ResponseCode::InvalidPlayer);
    }
    let message = message.unwrap_or_else(|| KICK_MESSAGE.to_string());
    info!("Player {} kicked from {}: {}", player_uuid, from, message);

    let seeded = QueueStage::new(QueueStageResult::JoinDenied, QueueType::Online, from, None)
        .with_message(message.clone());
    let request = QueueRequest::new(QueueRequestReason::ServerKick, ctx.fallback_parameters())
        .with_message(message)
        .with_seeded_stage(seeded);
    Ok(queue::spawn_queue(ctx, player_uuid, request))
}
