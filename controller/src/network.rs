//! Controller network layer: UDP transport between the controller and its
//! instances
//!
//! Three background tasks feed and drain the main loop:
//! - the receiver decodes datagrams and forwards them as [`ServerMessage`]s
//! - the sender drains the outbound queue onto the socket
//! - the timeout checker reports instances that stopped sending
//!
//! Correlated requests from instances are answered on their own tasks so a
//! slow handler never stalls the loop.

use crate::config::ControllerConfig;
use crate::connection_manager::ConnectionManager;
use crate::controller::Controller;
use crate::data::DataManager;
use crate::handler::handle_request;
use crate::proxy::NetworkProxy;
use crate::reconcile;
use log::{debug, error, info, warn};
use shared::{Packet, PacketSink, Requester, TransportError, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Messages sent from network tasks to the main loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    InstanceTimeout { instance_id: String },
    Shutdown,
}

/// Datagrams waiting for the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Routes packets addressed by instance id onto the outbound queue.
pub struct UdpSink {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    connections: Arc<ConnectionManager>,
}

impl UdpSink {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            outbound,
            connections,
        }
    }
}

impl PacketSink for UdpSink {
    fn is_reachable(&self, destination: &str) -> bool {
        self.connections.contains(destination)
    }

    fn send(&self, destination: &str, packet: Packet) -> Result<(), TransportError> {
        let addr = self
            .connections
            .addr_of(destination)
            .ok_or_else(|| TransportError::UnknownDestination(destination.to_string()))?;
        self.outbound
            .send(OutboundMessage::SendPacket { packet, addr })
            .map_err(|_| TransportError::Closed)
    }
}

/// The controller process: socket, connection table and routing context
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<ConnectionManager>,
    ctx: Arc<Controller>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    pub async fn bind(
        config: ControllerConfig,
        data: Arc<dyn DataManager>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_address).await?);
        info!("Controller listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(ConnectionManager::new(config.heartbeat_timeout));

        let sink = Arc::new(UdpSink::new(outbound_tx.clone(), Arc::clone(&connections)));
        let requester = Arc::new(Requester::new(sink, config.request_timeout));
        let proxy = Arc::new(NetworkProxy::new(Arc::clone(&requester)));
        let ctx = Arc::new(Controller::new(config, requester, proxy, data));

        Ok(Server {
            socket,
            connections,
            ctx,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.ctx
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for stopping the main loop from outside.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match shared::decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(OutboundMessage::SendPacket { packet, addr }) = outbound_rx.recv().await
            {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors instance heartbeats
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMEOUT_CHECK_INTERVAL);

            loop {
                interval.tick().await;

                for instance_id in connections.check_timeouts() {
                    if let Err(e) = server_tx.send(ServerMessage::InstanceTimeout { instance_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = shared::encode(packet)?;
        if data.len() > MAX_DATAGRAM_SIZE {
            warn!(
                "Packet to {} is {} bytes, above the {} byte datagram limit",
                addr,
                data.len(),
                MAX_DATAGRAM_SIZE
            );
        }
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Processes one incoming packet
    fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect {
            instance_id,
            protocol_version,
        } = packet
        {
            self.handle_connect(instance_id, protocol_version, addr);
            return;
        }

        let from = match self.connections.touch(addr) {
            Some(instance_id) => instance_id,
            None => {
                warn!("Ignoring packet from unconnected address {}", addr);
                return;
            }
        };

        match packet {
            Packet::Heartbeat { timestamp } => {
                self.send_packet(Packet::Heartbeat { timestamp }, addr);
            }

            Packet::Disconnect { reason } => {
                info!("Instance {} disconnected: {}", from, reason);
                self.connections.remove(&from);
                self.ctx.remove_instance(&from);
            }

            Packet::InstanceStatus(instance) => {
                reconcile::instance_status(&self.ctx, &from, instance);
            }

            Packet::Request {
                request_id,
                request,
            } => {
                let ctx = Arc::clone(&self.ctx);
                let outbound = self.outbound_tx.clone();
                tokio::spawn(async move {
                    let response = handle_request(&ctx, &from, request).await;
                    if let Err(code) = &response {
                        debug!("Request {} from {} failed: {}", request_id, from, code);
                    }
                    let packet = Packet::Response {
                        request_id,
                        response,
                    };
                    if outbound
                        .send(OutboundMessage::SendPacket { packet, addr })
                        .is_err()
                    {
                        warn!("Dropped response {} to {}, sender closed", request_id, from);
                    }
                });
            }

            Packet::Response {
                request_id,
                response,
            } => {
                self.ctx.requester.deliver(request_id, response);
            }

            other => {
                warn!("Unexpected packet from instance {}: {:?}", from, other);
            }
        }
    }

    fn handle_connect(&self, instance_id: String, protocol_version: u32, addr: SocketAddr) {
        if protocol_version != PROTOCOL_VERSION {
            warn!(
                "Rejecting instance {} at {}: protocol {} (expected {})",
                instance_id, addr, protocol_version, PROTOCOL_VERSION
            );
            self.send_packet(
                Packet::Disconnected {
                    reason: format!("Unsupported protocol version {}", protocol_version),
                },
                addr,
            );
            return;
        }

        for replaced in self.connections.register(&instance_id, addr, protocol_version) {
            // A reconnect under the same id keeps its registry entries
            if replaced != instance_id {
                self.ctx.remove_instance(&replaced);
            }
        }
        self.send_packet(Packet::Connected, addr);
    }

    /// Main loop: runs until shut down
    pub async fn run(&mut self) {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();
        let sweeper = self
            .ctx
            .requester
            .spawn_sweeper(self.ctx.config.sweep_interval);

        info!("Controller started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr);
                }
                ServerMessage::InstanceTimeout { instance_id } => {
                    self.ctx.remove_instance(&instance_id);
                }
                ServerMessage::Shutdown => break,
            }
        }

        info!("Controller shutting down");
        sweeper.abort();
        let cancelled = self.ctx.requester.tracker().cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} pending requests", cancelled);
        }
    }
}
