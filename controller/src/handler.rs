//! Turns a correlated request from an instance into its response

use crate::controller::Controller;
use crate::queue;
use crate::reconcile;
use log::{debug, warn};
use shared::{
    FriendshipRequest, PartyRequest, Payload, QueueRequest, QueueRequestReason, Request, Response,
    ResponseCode,
};
use std::sync::Arc;

/// Handles one request sent by instance `from`. Every failure is answered
/// with a response code; nothing here affects the connection itself.
pub async fn handle_request(ctx: &Arc<Controller>, from: &str, request: Request) -> Response {
    debug!("Handling {} from {}", request.kind(), from);

    match request {
        Request::GameStatusUpdate(game) => {
            reconcile::game_status_update(ctx, from, game).map(|_| Payload::Empty)
        }
        Request::GameShutdown { game_id } => {
            reconcile::game_shutdown(ctx, from, game_id).map(|_| Payload::Empty)
        }
        Request::GameQuit { player_uuid } => {
            reconcile::game_quit(ctx, player_uuid).map(|_| Payload::Empty)
        }
        Request::QueueFinished {
            player_uuid,
            game_id,
        } => reconcile::queue_finished(ctx, from, player_uuid, game_id).map(|_| Payload::Empty),
        Request::PlayerKicked {
            player_uuid,
            message,
        } => reconcile::player_kicked(ctx, from, player_uuid, message).map(|_| Payload::Empty),
        Request::QueueRequest {
            player_uuid,
            parameters,
            reason_message,
        } => {
            if !ctx.players.contains_key(&player_uuid) {
                return Err(ResponseCode::InvalidPlayer);
            }
            if parameters.is_empty() {
                return Err(ResponseCode::InvalidParameters);
            }
            let mut request = QueueRequest::new(QueueRequestReason::PluginInstance, parameters);
            request.reason_message = reason_message;
            queue::spawn_queue(ctx, player_uuid, request);
            Ok(Payload::Empty)
        }
        Request::NetworkJoin { player } => match queue::join_network(ctx, player).await {
            Some(_) => Ok(Payload::Empty),
            None => Err(ResponseCode::IllegalState),
        },
        Request::NetworkLeave { player_uuid } => {
            if ctx.leave_network(&player_uuid) {
                Ok(Payload::Empty)
            } else {
                Err(ResponseCode::InvalidPlayer)
            }
        }
        Request::CancelQueue { player_uuid } => Ok(Payload::Flag(ctx.cancel_queue(&player_uuid))),
        Request::Party(request) => handle_party(ctx, request),
        Request::Friendship(request) => handle_friendship(ctx, request).await,
        Request::InstanceJoin { .. }
        | Request::ConnectPlayer { .. }
        | Request::ReleasePlayer { .. } => {
            warn!("Instance {} sent a controller-bound request", from);
            Err(ResponseCode::Unknown)
        }
    }
}

fn handle_party(ctx: &Arc<Controller>, request: PartyRequest) -> Response {
    let parties = &ctx.parties;
    let payload = match request {
        PartyRequest::Create { owner } => {
            Payload::Id(parties.create(owner).ok_or(ResponseCode::InvalidPlayer)?)
        }
        PartyRequest::Get { party_id } => Payload::Party(parties.get(party_id)),
        PartyRequest::Invite { party_id, player } => Payload::Flag(parties.invite(party_id, player)),
        PartyRequest::AcceptInvitation { party_id, player } => {
            Payload::Flag(parties.accept_invitation(party_id, player))
        }
        PartyRequest::Join { party_id, player } => Payload::Flag(parties.join(party_id, player)),
        PartyRequest::Remove { party_id, player } => {
            Payload::Flag(parties.remove_player(party_id, player))
        }
        PartyRequest::SetOwner { party_id, player } => {
            Payload::Flag(parties.set_owner(party_id, player))
        }
        PartyRequest::SetInvitationsOnly {
            party_id,
            invitations_only,
        } => Payload::Flag(parties.set_invitations_only(party_id, invitations_only)),
        PartyRequest::Disband { party_id } => Payload::Flag(parties.disband(party_id)),
        PartyRequest::Warp {
            party_id,
            requester,
        } => Payload::Flag(queue::warp_party(ctx, party_id, requester).is_some()),
    };
    Ok(payload)
}

async fn handle_friendship(ctx: &Controller, request: FriendshipRequest) -> Response {
    let friendships = &ctx.friendships;
    let payload = match request {
        FriendshipRequest::GetFriendships { profile } => {
            Payload::Relationships(friendships.get_friendships(&profile).await?)
        }
        FriendshipRequest::SendInvitation { requester, invited } => {
            friendships.send_invitation(requester, invited).await?;
            Payload::Empty
        }
        FriendshipRequest::AcceptInvitation { requester, invited } => {
            Payload::Id(friendships.accept_invitation(requester, invited).await?.id)
        }
        FriendshipRequest::DenyInvitation { requester, invited } => {
            Payload::Flag(friendships.deny_invitation(requester, invited))
        }
        FriendshipRequest::Remove { relationship_id } => {
            friendships.remove_friendship(relationship_id).await?;
            Payload::Empty
        }
    };
    Ok(payload)
}
