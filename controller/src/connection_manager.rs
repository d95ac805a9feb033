//! Tracks the instances connected to the controller
//!
//! Each instance is known by the id it announced in `Connect` and the UDP
//! address it announced it from. Any packet from that address counts as a
//! sign of life; an instance silent for longer than the heartbeat timeout is
//! reported by [`ConnectionManager::check_timeouts`] and dropped.

use dashmap::DashMap;
use log::info;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected instance
#[derive(Debug, Clone)]
pub struct InstanceConnection {
    pub instance_id: String,
    pub addr: SocketAddr,
    /// Last time any packet arrived from this instance
    pub last_seen: Instant,
    pub protocol_version: u32,
}

impl InstanceConnection {
    pub fn new(instance_id: &str, addr: SocketAddr, protocol_version: u32) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            addr,
            last_seen: Instant::now(),
            protocol_version,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct ConnectionManager {
    connections: DashMap<String, InstanceConnection>,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            timeout,
        }
    }

    /// Registers an instance, replacing any earlier connection under the same
    /// id or from the same address. Returns the ids that were replaced.
    pub fn register(&self, instance_id: &str, addr: SocketAddr, protocol_version: u32) -> Vec<String> {
        let mut replaced: Vec<String> = self
            .connections
            .iter()
            .filter(|connection| connection.addr == addr && connection.key() != instance_id)
            .map(|connection| connection.key().clone())
            .collect();
        for id in &replaced {
            self.connections.remove(id);
        }

        let previous = self.connections.insert(
            instance_id.to_string(),
            InstanceConnection::new(instance_id, addr, protocol_version),
        );
        if let Some(previous) = previous {
            if previous.addr != addr {
                info!(
                    "Instance {} reconnected from {} (was {})",
                    instance_id, addr, previous.addr
                );
            }
            replaced.push(instance_id.to_string());
        } else {
            info!("Instance {} connected from {}", instance_id, addr);
        }
        replaced
    }

    pub fn remove(&self, instance_id: &str) -> bool {
        self.connections.remove(instance_id).is_some()
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<String> {
        self.connections
            .iter()
            .find(|connection| connection.addr == addr)
            .map(|connection| connection.key().clone())
    }

    /// Refreshes the last-seen time of whoever sent from `addr`.
    pub fn touch(&self, addr: SocketAddr) -> Option<String> {
        let instance_id = self.find_by_addr(addr)?;
        if let Some(mut connection) = self.connections.get_mut(&instance_id) {
            connection.last_seen = Instant::now();
        }
        Some(instance_id)
    }

    pub fn addr_of(&self, instance_id: &str) -> Option<SocketAddr> {
        self.connections
            .get(instance_id)
            .map(|connection| connection.addr)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.connections.contains_key(instance_id)
    }

    /// Removes and returns every instance that has gone silent.
    pub fn check_timeouts(&self) -> Vec<String> {
        let timed_out: Vec<String> = self
            .connections
            .iter()
            .filter(|connection| connection.is_timed_out(self.timeout))
            .map(|connection| connection.key().clone())
            .collect();

        for instance_id in &timed_out {
            self.connections.remove(instance_id);
            info!("Instance {} timed out", instance_id);
        }
        timed_out
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|connection| connection.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
