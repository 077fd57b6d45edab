//! Server network layer: UDP transport around the lockstep core
//!
//! The main loop owns the `GameServer` and reacts to two sources:
//! - datagrams forwarded by the receiver task
//! - the fixed-rate tick interval
//!
//! Every connection gets a writer task that drains its outbox, fragmenting
//! large messages (snapshots) to the datagram budget. Connection liveness is
//! tracked here rather than in the core: silent peers are reported by the
//! timeout checker and disconnected like a `Goodbye`.

use crate::client_manager::Outbox;
use crate::config::ServerConfig;
use crate::game::GameServer;
use log::{debug, error, info, warn};
use shared::transport::{Fragmenter, Reassembler};
use shared::{ClientMessage, Result, Simulation};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Largest message a client is expected to send.
const MAX_CLIENT_MESSAGE_LEN: usize = 256;

/// Events sent from network tasks to the main server loop
#[derive(Debug)]
pub enum NetworkEvent {
    DatagramReceived { bytes: Vec<u8>, addr: SocketAddr },
    ClientTimeout { addr: SocketAddr },
}

/// UDP server driving a `GameServer` at a fixed tick rate
pub struct Server<S: Simulation> {
    socket: Arc<UdpSocket>,
    game: GameServer<S>,
    tick_duration: Duration,
    datagram_budget: usize,
    client_timeout: Duration,

    /// Last time each connected address was heard from.
    last_seen: Arc<RwLock<HashMap<SocketAddr, Instant>>>,
    reassemblers: HashMap<SocketAddr, Reassembler>,

    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl<S: Simulation + Send + 'static> Server<S> {
    pub async fn bind(config: ServerConfig, sim: S) -> Result<Self> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!(
            "Server listening on {} ({} Hz, {} slots, {} rare actions per tick)",
            socket.local_addr()?,
            config.tick_rate,
            config.max_players,
            config.max_rare_actions
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Server {
            socket,
            tick_duration: config.tick_duration(),
            datagram_budget: config.datagram_budget,
            client_timeout: config.client_timeout,
            game: GameServer::new(config, sim),
            last_seen: Arc::new(RwLock::new(HashMap::new())),
            reassemblers: HashMap::new(),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn game(&self) -> &GameServer<S> {
        &self.game
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let bytes = buffer[..len].to_vec();
                        if event_tx
                            .send(NetworkEvent::DatagramReceived { bytes, addr })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that reports connections silent for longer than the timeout
    fn spawn_timeout_checker(&self) {
        let last_seen = Arc::clone(&self.last_seen);
        let event_tx = self.event_tx.clone();
        let timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut check_interval = interval(Duration::from_millis(250).min(timeout));

            loop {
                check_interval.tick().await;

                let timed_out: Vec<SocketAddr> = {
                    let mut last_seen = last_seen.write().await;
                    let now = Instant::now();
                    let expired: Vec<SocketAddr> = last_seen
                        .iter()
                        .filter(|(_, seen)| now.duration_since(**seen) > timeout)
                        .map(|(addr, _)| *addr)
                        .collect();
                    for addr in &expired {
                        last_seen.remove(addr);
                    }
                    expired
                };

                for addr in timed_out {
                    if event_tx.send(NetworkEvent::ClientTimeout { addr }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    /// Spawns the writer for one peer and returns its outbox.
    ///
    /// The task ends once every sender of the outbox has been dropped.
    fn spawn_writer(&self, addr: SocketAddr) -> Outbox {
        let (outbox, mut queue) = mpsc::unbounded_channel::<Arc<Vec<u8>>>();
        let socket = Arc::clone(&self.socket);
        let mut fragmenter = Fragmenter::new(self.datagram_budget);

        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let datagrams = match fragmenter.frame(&message) {
                    Ok(datagrams) => datagrams,
                    Err(e) => {
                        warn!("Dropping message for {}: {}", addr, e);
                        continue;
                    }
                };
                for datagram in datagrams {
                    if let Err(e) = socket.send_to(&datagram, addr).await {
                        warn!("Failed to send to {}: {}", addr, e);
                    }
                }
            }
            debug!("Writer for {} finished", addr);
        });

        outbox
    }

    async fn handle_datagram(&mut self, bytes: &[u8], addr: SocketAddr) {
        let known = self.game.connections().find_by_addr(addr).is_some();
        let result = match self.reassemblers.get_mut(&addr) {
            Some(reassembler) => reassembler.accept(bytes),
            None => Reassembler::new(MAX_CLIENT_MESSAGE_LEN).accept(bytes),
        };
        let frame = match result {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!("Bad datagram from {}: {}", addr, e);
                return;
            }
        };
        let message = match ClientMessage::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed message from {}: {}", addr, e);
                return;
            }
        };

        if known {
            self.last_seen.write().await.insert(addr, Instant::now());
        }

        match message {
            ClientMessage::Hello { version } if !known => {
                info!("Client connecting from {} (version {})", addr, version);
                let outbox = self.spawn_writer(addr);
                if self.game.connect(addr, version, outbox).is_ok() {
                    self.reassemblers
                        .insert(addr, Reassembler::new(MAX_CLIENT_MESSAGE_LEN));
                    self.last_seen.write().await.insert(addr, Instant::now());
                }
            }
            message => {
                self.game.handle_message(addr, message);
                if known && self.game.connections().find_by_addr(addr).is_none() {
                    self.forget(addr).await;
                }
            }
        }
    }

    async fn forget(&mut self, addr: SocketAddr) {
        self.reassemblers.remove(&addr);
        self.last_seen.write().await.remove(&addr);
    }

    async fn handle_timeout(&mut self, addr: SocketAddr) {
        if let Some(slot) = self.game.connections().find_by_addr(addr) {
            info!("Slot {} ({}) timed out", slot, addr);
            self.game.disconnect(slot);
        }
        self.forget(addr).await;
    }

    /// Main server loop: network events in between fixed-rate ticks
    pub async fn run(&mut self) -> Result<()> {
        self.spawn_network_receiver();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(NetworkEvent::DatagramReceived { bytes, addr }) => {
                            self.handle_datagram(&bytes, addr).await;
                        }
                        Some(NetworkEvent::ClientTimeout { addr }) => {
                            self.handle_timeout(addr).await;
                        }
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    let step = match self.game.run_tick() {
                        Ok(step) => step,
                        Err(e) => {
                            error!("Tick {} failed: {}", self.game.tick() + 1, e);
                            continue;
                        }
                    };

                    if step.tick() % 60 == 0 && !self.game.connections().is_empty() {
                        debug!(
                            "Tick {}: {} clients, {:.1}Hz, {} queued actions, {} snapshot batches",
                            step.tick(),
                            self.game.connections().len(),
                            1.0 / dt.max(f32::EPSILON),
                            self.game.pending_actions(),
                            self.game.snapshot_batches()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{DemoWorld, ServerMessage, StepLayout, PROTOCOL_VERSION};

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_players: 2,
            ..ServerConfig::default()
        }
    }

    async fn recv_message(socket: &UdpSocket) -> ServerMessage {
        let mut buffer = [0u8; 2048];
        let len = socket.recv(&mut buffer).await.unwrap();
        let frame = Reassembler::new(4096)
            .accept(&buffer[..len])
            .unwrap()
            .unwrap();
        ServerMessage::decode(&frame, Some(&StepLayout::new(2, 4))).unwrap()
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            tick_rate: 0,
            ..test_config()
        };
        assert!(Server::bind(config, DemoWorld::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_hello_gets_id_and_steps() {
        let mut server = tokio_test::assert_ok!(Server::bind(test_config(), DemoWorld::new()).await);
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move { server.run().await });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(addr).await.unwrap();
        let mut hello = vec![shared::transport::FRAME_WHOLE];
        hello.extend(
            ClientMessage::Hello {
                version: PROTOCOL_VERSION,
            }
            .encode(),
        );
        socket.send(&hello).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), recv_message(&socket))
            .await
            .unwrap();
        match first {
            ServerMessage::SendId { slot, slots, .. } => {
                assert_eq!(slot, 0);
                assert_eq!(slots, 2);
            }
            other => panic!("Unexpected message {:?}", other),
        }

        let second = tokio::time::timeout(Duration::from_secs(2), recv_message(&socket))
            .await
            .unwrap();
        assert!(matches!(second, ServerMessage::SendStep(_)));

        handle.abort();
    }

    #[tokio::test]
    async fn test_garbage_datagrams_are_ignored() {
        let mut server = Server::bind(test_config(), DemoWorld::new()).await.unwrap();
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        server.handle_datagram(&[], addr).await;
        server.handle_datagram(&[0x07, 1, 2], addr).await;
        server.handle_datagram(&[0x00, 0xEE], addr).await;

        assert!(server.game().connections().is_empty());
        assert!(server.reassemblers.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_disconnects() {
        let mut server = Server::bind(test_config(), DemoWorld::new()).await.unwrap();
        let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let mut hello = vec![shared::transport::FRAME_WHOLE];
        hello.extend(
            ClientMessage::Hello {
                version: PROTOCOL_VERSION,
            }
            .encode(),
        );

        server.handle_datagram(&hello, addr).await;
        assert_eq!(server.game().connections().len(), 1);
        assert!(server.last_seen.read().await.contains_key(&addr));

        server.handle_timeout(addr).await;
        assert!(server.game().connections().is_empty());
        assert!(!server.last_seen.read().await.contains_key(&addr));
        assert_eq!(server.game().pending_actions(), 2);
    }
}
