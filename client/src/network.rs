use crate::config::ClientConfig;
use crate::game::ClientGame;
use crate::input::InputManager;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::transport::{Fragmenter, Reassembler, DEFAULT_DATAGRAM_BUDGET};
use shared::{ClientMessage, Error, Result, Simulation};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// Local frame period; steps are released by the scheduler, not by this.
const FRAME: Duration = Duration::from_millis(16);

pub struct Client<S: Simulation> {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: ClientConfig,

    game: ClientGame<S>,
    input_manager: InputManager,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    rng: StdRng,

    last_received: Instant,
}

impl<S: Simulation> Client<S> {
    pub async fn new(config: ClientConfig, sim: S) -> Result<Self> {
        config.validate()?;
        let server_addr: SocketAddr = config
            .server_addr
            .parse()
            .map_err(|e| Error::Config(format!("bad server address {}: {}", config.server_addr, e)))?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(Client {
            socket,
            server_addr,
            game: ClientGame::new(sim, &config),
            input_manager: InputManager::new(config.bot),
            fragmenter: Fragmenter::new(DEFAULT_DATAGRAM_BUDGET),
            reassembler: Reassembler::new(config.max_snapshot_size + 16),
            rng: StdRng::from_entropy(),
            last_received: Instant::now(),
            config,
        })
    }

    pub fn game(&self) -> &ClientGame<S> {
        &self.game
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Simulated one-way delay: half the configured ping plus random jitter.
    fn fake_delay(&mut self) -> Duration {
        let jitter = if self.config.fake_jitter_ms > 0 {
            self.rng.gen_range(0..=self.config.fake_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.fake_ping_ms / 2 + jitter)
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let delay = self.fake_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        for datagram in self.fragmenter.frame(&message.encode())? {
            self.socket.send_to(&datagram, self.server_addr).await?;
        }
        Ok(())
    }

    async fn handle_datagram(&mut self, datagram: &[u8]) -> Result<()> {
        let bytes = match self.reassembler.accept(datagram) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Bad datagram from server: {}", e);
                return Ok(());
            }
        };

        match self.game.handle_bytes(&bytes) {
            Ok(Some(reply)) => self.send(&reply).await,
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Malformed message from server: {}", e);
                Ok(())
            }
        }
    }

    async fn frame(&mut self, dt: Duration) -> Result<()> {
        if let Some(message) = self.game.update(dt) {
            self.send(&message).await?;
        }

        if self.game.layout().is_none() {
            return Ok(());
        }
        if let Some(message) = self.input_manager.update(dt, &mut self.rng) {
            self.send(&message).await?;
        }
        if let Some(rpc) = self.input_manager.maybe_rpc(&mut self.rng) {
            debug!("Sending {:?}", rpc);
            self.send(&rpc).await?;
        }
        Ok(())
    }

    /// Connects and plays until rejected, the server goes silent, or
    /// `run_ticks` steps have been applied.
    pub async fn run(&mut self) -> Result<()> {
        info!("Connecting to {}...", self.server_addr);
        self.send(&ClientGame::<S>::hello()).await?;

        let mut frame_interval = interval(FRAME);
        let mut stats_interval = interval(Duration::from_secs(5));
        let mut last_frame = Instant::now();
        let mut last_hello = Instant::now();
        self.last_received = Instant::now();

        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) if addr == self.server_addr => {
                            self.last_received = Instant::now();
                            let delay = self.fake_delay();
                            if !delay.is_zero() {
                                sleep(delay).await;
                            }
                            let datagram = buffer[..len].to_vec();
                            self.handle_datagram(&datagram).await?;
                        }
                        Ok((_, addr)) => debug!("Ignoring datagram from {}", addr),
                        Err(e) => error!("Error receiving datagram: {}", e),
                    }
                },

                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame);
                    last_frame = now;

                    if let Some(reason) = self.game.rejected() {
                        warn!("Giving up: {:?}", reason);
                        return Ok(());
                    }
                    if self.last_received.elapsed() > self.config.server_timeout {
                        return Err(Error::Transport(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no reply from {} in {:?}", self.server_addr, self.config.server_timeout),
                        )));
                    }
                    if self.game.layout().is_none() && last_hello.elapsed() >= self.config.hello_retry {
                        last_hello = Instant::now();
                        self.send(&ClientGame::<S>::hello()).await?;
                    }

                    self.frame(dt).await?;

                    if self.config.run_ticks > 0 && self.game.applied() >= self.config.run_ticks {
                        info!("Applied {} ticks, leaving", self.game.applied());
                        break;
                    }
                },

                _ = stats_interval.tick() => {
                    if self.game.is_running() {
                        debug!(
                            "Tick {:?}: {} applied, {} buffered, interpolation {:.2}, {} desyncs",
                            self.game.last_applied(),
                            self.game.applied(),
                            self.game.scheduler().buffered(),
                            self.game.interpolation(),
                            self.game.auditor().detected()
                        );
                    }
                },
            }
        }

        self.disconnect().await
    }

    /// Tells the server this client is leaving.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.game.slot().is_some() {
            self.send(&ClientMessage::Goodbye).await?;
        }
        Ok(())
    }
}
