//! Wire packets exchanged between the controller and its instances
//!
//! Every packet travels as a single bincode-encoded datagram. Request/response
//! pairs are correlated by `request_id` (see [`crate::request`]); everything
//! else is fire-and-forget.

use crate::error::ResponseCode;
use crate::game::{Game, Instance};
use crate::player::Player;
use crate::queue::QueueRequestParameters;
use crate::slots::QueueType;
use crate::social::{Party, Relationship};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Party operations an instance may ask the controller to perform
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PartyRequest {
    Create { owner: Uuid },
    Get { party_id: u64 },
    Invite { party_id: u64, player: Uuid },
    AcceptInvitation { party_id: u64, player: Uuid },
    Join { party_id: u64, player: Uuid },
    Remove { party_id: u64, player: Uuid },
    SetOwner { party_id: u64, player: Uuid },
    SetInvitationsOnly { party_id: u64, invitations_only: bool },
    Disband { party_id: u64 },
    Warp { party_id: u64, requester: Uuid },
}

/// Friendship operations, keyed by network profile
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum FriendshipRequest {
    GetFriendships { profile: Uuid },
    SendInvitation { requester: Uuid, invited: Uuid },
    AcceptInvitation { requester: Uuid, invited: Uuid },
    DenyInvitation { requester: Uuid, invited: Uuid },
    Remove { relationship_id: u64 },
}

/// Correlated request bodies
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Request {
    // Controller -> instance
    InstanceJoin {
        player: Player,
        queue_type: QueueType,
        game_id: Option<u64>,
        party: bool,
    },
    ConnectPlayer {
        player_uuid: Uuid,
    },
    /// Drops a reservation made by the `InstanceJoin` of queue request
    /// `request_id` if the player never arrived.
    ReleasePlayer {
        player_uuid: Uuid,
        request_id: u64,
    },

    // Instance -> controller
    GameStatusUpdate(Game),
    GameShutdown {
        game_id: u64,
    },
    GameQuit {
        player_uuid: Uuid,
    },
    QueueFinished {
        player_uuid: Uuid,
        game_id: Option<u64>,
    },
    QueueRequest {
        player_uuid: Uuid,
        parameters: QueueRequestParameters,
        reason_message: Option<String>,
    },
    PlayerKicked {
        player_uuid: Uuid,
        message: Option<String>,
    },
    NetworkJoin {
        player: Player,
    },
    NetworkLeave {
        player_uuid: Uuid,
    },
    CancelQueue {
        player_uuid: Uuid,
    },
    Party(PartyRequest),
    Friendship(FriendshipRequest),
}

impl Request {
    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Request::InstanceJoin { .. } => "InstanceJoin",
            Request::ConnectPlayer { .. } => "ConnectPlayer",
            Request::ReleasePlayer { .. } => "ReleasePlayer",
            Request::GameStatusUpdate(_) => "GameStatusUpdate",
            Request::GameShutdown { .. } => "GameShutdown",
            Request::GameQuit { .. } => "GameQuit",
            Request::QueueFinished { .. } => "QueueFinished",
            Request::QueueRequest { .. } => "QueueRequest",
            Request::PlayerKicked { .. } => "PlayerKicked",
            Request::NetworkJoin { .. } => "NetworkJoin",
            Request::NetworkLeave { .. } => "NetworkLeave",
            Request::CancelQueue { .. } => "CancelQueue",
            Request::Party(_) => "Party",
            Request::Friendship(_) => "Friendship",
        }
    }
}

/// Successful response bodies
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Flag(bool),
    Id(u64),
    Party(Option<Party>),
    Relationships(Vec<Relationship>),
}

pub type Response = Result<Payload, ResponseCode>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Connection management
    Connect {
        instance_id: String,
        protocol_version: u32,
    },
    Connected,
    Heartbeat {
        timestamp: u64,
    },
    Disconnect {
        reason: String,
    },
    Disconnected {
        reason: String,
    },

    // Unsolicited state pushes
    InstanceStatus(Instance),
    PlayerUpdate(Player),

    // Correlated request/response
    Request {
        request_id: u64,
        request: Request,
    },
    Response {
        request_id: u64,
        response: Response,
    },
}
