use std::time::Duration;

/// Runtime settings of an instance
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub controller_address: String,
    pub instance_id: String,
    pub instance_type: String,
    /// Negative means unlimited
    pub max_players: i32,
    /// Lobby-like instances that never host games
    pub non_playable: bool,
    pub heartbeat_interval: Duration,
    pub status_interval: Duration,
    /// Silence from the controller after which the instance reconnects
    pub reconnect_timeout: Duration,
    pub request_timeout: Duration,
    /// How long an admitted player may take to connect before its slot is freed
    pub reservation_timeout: Duration,
}

impl InstanceConfig {
    pub fn new(instance_id: &str, instance_type: &str, max_players: i32) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            instance_type: instance_type.to_string(),
            max_players,
            ..Self::default()
        }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            controller_address: "127.0.0.1:7700".to_string(),
            instance_id: "lobby-1".to_string(),
            instance_type: "lobby".to_string(),
            max_players: 50,
            non_playable: false,
            heartbeat_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(1),
            reconnect_timeout: Duration::from_secs(5),
            request_timeout: shared::DEFAULT_REQUEST_TIMEOUT,
            reservation_timeout: Duration::from_secs(10),
        }
    }
}
