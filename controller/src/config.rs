use std::time::Duration;

/// Runtime settings of the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Address the UDP socket binds to
    pub bind_address: String,
    /// Default lifetime of a correlated request
    pub request_timeout: Duration,
    /// How often timed out requests are swept
    pub sweep_interval: Duration,
    /// Silence after which an instance is dropped
    pub heartbeat_timeout: Duration,
    /// Idle lifetime of cached friendship data
    pub cache_ttl: Duration,
    /// Instance type players fall back to when they have nowhere else to go
    pub lobby_type: String,
    /// Timeout of a single `InstanceJoin` attempt
    pub join_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7700".to_string(),
            request_timeout: shared::DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: shared::DEFAULT_SWEEP_INTERVAL,
            heartbeat_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
            lobby_type: "lobby".to_string(),
            join_timeout: shared::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.lobby_type, "lobby");
        assert!(config.bind_address.parse::<std::net::SocketAddr>().is_ok());
    }
}
