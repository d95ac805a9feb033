//! Instance network layer: the UDP link to the controller
//!
//! The client connects with its instance id, keeps the link alive with
//! heartbeats and reports its status periodically. If the controller goes
//! silent the link is considered lost: pending requests are cancelled and
//! `Connect` is re-sent until the controller answers again.

use crate::config::InstanceConfig;
use crate::local::LocalInstance;
use log::{debug, error, info, warn};
use shared::{Packet, PacketSink, Requester, TransportError, CONTROLLER_ID, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Outbound half of the link, used by the correlation layer.
pub struct ControllerLink {
    outbound: mpsc::UnboundedSender<Packet>,
    connected: AtomicBool,
}

impl ControllerLink {
    pub fn new(outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            outbound,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl PacketSink for ControllerLink {
    fn is_reachable(&self, destination: &str) -> bool {
        destination == CONTROLLER_ID && self.is_connected()
    }

    fn send(&self, destination: &str, packet: Packet) -> Result<(), TransportError> {
        if destination != CONTROLLER_ID {
            return Err(TransportError::UnknownDestination(destination.to_string()));
        }
        self.outbound.send(packet).map_err(|_| TransportError::Closed)
    }
}

pub struct Client {
    socket: UdpSocket,
    controller_addr: SocketAddr,
    config: InstanceConfig,
    instance: Arc<LocalInstance>,
    link: Arc<ControllerLink>,
    outbound_rx: mpsc::UnboundedReceiver<Packet>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    last_heard: Instant,
}

impl Client {
    pub async fn new(config: InstanceConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let controller_addr = config.controller_address.parse()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let link = Arc::new(ControllerLink::new(outbound_tx));
        let requester = Arc::new(Requester::new(link.clone(), config.request_timeout));
        let instance = Arc::new(LocalInstance::new(&config, requester));

        Ok(Client {
            socket,
            controller_addr,
            config,
            instance,
            link,
            outbound_rx,
            shutdown_tx,
            shutdown_rx,
            last_heard: Instant::now(),
        })
    }

    pub fn instance(&self) -> &Arc<LocalInstance> {
        &self.instance
    }

    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    async fn connect(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            "Connecting to controller at {} as {}...",
            self.controller_addr, self.config.instance_id
        );
        let packet = Packet::Connect {
            instance_id: self.config.instance_id.clone(),
            protocol_version: shared::PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = shared::encode(packet)?;
        self.socket.send_to(&data, self.controller_addr).await?;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) {
        self.last_heard = Instant::now();

        match packet {
            Packet::Connected => {
                info!("Connected to controller as {}", self.config.instance_id);
                self.link.set_connected(true);
                let status = Packet::InstanceStatus(self.instance.status());
                if let Err(e) = self.send_packet(&status).await {
                    error!("Error sending status: {}", e);
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected by controller: {}", reason);
                self.link.set_connected(false);
            }

            Packet::Heartbeat { timestamp } => {
                debug!(
                    "Heartbeat round trip {}ms",
                    shared::current_timestamp().saturating_sub(timestamp)
                );
            }

            Packet::PlayerUpdate(player) => {
                if !self.instance.apply_player_update(player) {
                    debug!("Ignoring update for a player not on this instance");
                }
            }

            Packet::Request {
                request_id,
                request,
            } => {
                let instance = Arc::clone(&self.instance);
                let link = Arc::clone(&self.link);
                tokio::spawn(async move {
                    let response = instance.handle_request(request).await;
                    let packet = Packet::Response {
                        request_id,
                        response,
                    };
                    if let Err(e) = link.send(CONTROLLER_ID, packet) {
                        warn!("Failed to answer request {}: {}", request_id, e);
                    }
                });
            }

            Packet::Response {
                request_id,
                response,
            } => {
                self.instance.requester().deliver(request_id, response);
            }

            other => {
                warn!("Unexpected packet from controller: {:?}", other);
            }
        }
    }

    /// Heartbeat tick: detects a silent controller and keeps the link alive.
    async fn check_link(&mut self) {
        if self.link.is_connected() && self.last_heard.elapsed() > self.config.reconnect_timeout {
            warn!("Controller went silent, reconnecting");
            self.link.set_connected(false);
            let cancelled = self.instance.requester().tracker().cancel_all();
            if cancelled > 0 {
                debug!("Cancelled {} pending requests", cancelled);
            }
        }

        let packet = if self.link.is_connected() {
            Packet::Heartbeat {
                timestamp: shared::current_timestamp(),
            }
        } else {
            Packet::Connect {
                instance_id: self.config.instance_id.clone(),
                protocol_version: shared::PROTOCOL_VERSION,
            }
        };
        if let Err(e) = self.send_packet(&packet).await {
            error!("Error sending keep-alive: {}", e);
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;
        let sweeper = self
            .instance
            .requester()
            .spawn_sweeper(shared::DEFAULT_SWEEP_INTERVAL);

        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        let mut status_interval = interval(self.config.status_interval);
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) if addr == self.controller_addr => {
                            match shared::decode(&buffer[..len]) {
                                Ok(packet) => self.handle_packet(packet).await,
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Ok((_, addr)) => warn!("Ignoring datagram from {}", addr),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                Some(packet) = self.outbound_rx.recv() => {
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending packet: {}", e);
                    }
                },

                _ = heartbeat_interval.tick() => {
                    self.check_link().await;
                },

                _ = status_interval.tick() => {
                    self.instance
                        .expire_reservations(self.config.reservation_timeout)
                        .await;
                    if self.link.is_connected() {
                        let status = Packet::InstanceStatus(self.instance.status());
                        if let Err(e) = self.send_packet(&status).await {
                            error!("Error sending status: {}", e);
                        }
                    }
                },

                _ = self.shutdown_rx.recv() => {
                    break;
                },
            }
        }

        sweeper.abort();
        if self.link.is_connected() {
            let _ = self
                .send_packet(&Packet::Disconnect {
                    reason: "Instance shutting down".to_string(),
                })
                .await;
        }
        self.instance.requester().tracker().cancel_all();

        Ok(())
    }
}
