pub mod error;
pub mod game;
pub mod packet;
pub mod player;
pub mod queue;
pub mod request;
pub mod slots;
pub mod social;

pub use error::{RequestError, ResponseCode, TransportError};
pub use game::{Game, Instance};
pub use packet::{FriendshipRequest, Packet, PartyRequest, Payload, Request, Response};
pub use player::{Player, PlayerState, PlayerStateName};
pub use queue::{
    QueueRequest, QueueRequestParameter, QueueRequestParameters, QueueRequestReason,
    QueueStage, QueueStageResult, QueueTarget,
};
pub use request::{PacketSink, RequestTracker, Requester};
pub use slots::{Population, QueueType, Slots};
pub use social::{FriendshipInvitation, Party, ProfilePair, Relationship};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_VERSION: u32 = 1;
/// Destination name instances use for the controller
pub const CONTROLLER_ID: &str = "controller";
pub const MAX_DATAGRAM_SIZE: usize = 8192;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Current timestamp in milliseconds
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Encodes a packet into a single datagram
pub fn encode(packet: &Packet) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(packet)
}

pub fn decode(data: &[u8]) -> Result<Packet, bincode::Error> {
    bincode::deserialize(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_timestamp_increases() {
        let first = current_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        let second = current_timestamp();
        assert!(second > first);
    }

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect {
            instance_id: "lobby-1".to_string(),
            protocol_version: PROTOCOL_VERSION,
        };
        let deserialized = decode(&encode(&packet).unwrap()).unwrap();

        match deserialized {
            Packet::Connect {
                instance_id,
                protocol_version,
            } => {
                assert_eq!(instance_id, "lobby-1");
                assert_eq!(protocol_version, PROTOCOL_VERSION);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_player_update_keeps_queue_request() {
        let mut player = Player::new(Uuid::new_v4(), "bob");
        player.queue_request = Some(QueueRequest::new(
            QueueRequestReason::NetworkJoin,
            QueueRequestParameters::single(QueueRequestParameter::instance_type("lobby")),
        ));
        player.state = PlayerState::instance_transfer("lobby-1");

        let packet = Packet::PlayerUpdate(player.clone());
        match decode(&encode(&packet).unwrap()).unwrap() {
            Packet::PlayerUpdate(decoded) => assert_eq!(decoded, player),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
