//! Authoritative lockstep tick loop
//!
//! `GameServer` owns the one true simulation. Each call to `run_tick`:
//! 1. serves snapshot requests from the state as of the last broadcast tick
//! 2. collects one input per slot (staged or neutral) and up to K rare actions
//! 3. applies the resulting step to the simulation
//! 4. queues the encoded step on every connection
//!
//! It is transport-agnostic and synchronous; `network` feeds it decoded
//! messages and drains the per-connection queues onto the socket.

use crate::aggregator::StepAggregator;
use crate::client_manager::{ConnectionManager, Outbox};
use crate::config::ServerConfig;
use crate::snapshot::SnapshotBatcher;
use log::{debug, info, warn};
use shared::{
    ClientMessage, PlayerSlot, RareAction, RejectReason, Result, ServerMessage, Simulation,
    StepPacket, Tick, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;

pub struct GameServer<S: Simulation> {
    config: ServerConfig,
    sim: S,
    tick: Tick,
    connections: ConnectionManager,
    aggregator: StepAggregator,
    snapshots: SnapshotBatcher,
}

impl<S: Simulation> GameServer<S> {
    pub fn new(config: ServerConfig, sim: S) -> Self {
        let connections = ConnectionManager::new(config.max_players);
        let aggregator = StepAggregator::new(config.layout());
        let snapshots = SnapshotBatcher::new(config.max_snapshot_size);
        Self {
            config,
            sim,
            tick: 0,
            connections,
            aggregator,
            snapshots,
        }
    }

    /// Last tick applied and broadcast.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pending_actions(&self) -> usize {
        self.aggregator.pending()
    }

    pub fn snapshot_batches(&self) -> u64 {
        self.snapshots.batches()
    }

    /// Accepts a new connection, replying on `outbox` with `SendId` or `Reject`.
    ///
    /// A join action is queued so every participant adds the player at the
    /// same tick.
    pub fn connect(
        &mut self,
        addr: SocketAddr,
        version: u32,
        outbox: Outbox,
    ) -> std::result::Result<PlayerSlot, RejectReason> {
        if version != PROTOCOL_VERSION {
            warn!(
                "Rejecting {}: protocol version {} (expected {})",
                addr, version, PROTOCOL_VERSION
            );
            let _ = outbox.send(Arc::new(
                ServerMessage::Reject(RejectReason::VersionMismatch).encode(),
            ));
            return Err(RejectReason::VersionMismatch);
        }

        if let Some(existing) = self.connections.find_by_addr(addr) {
            info!("Replacing existing connection in slot {} from {}", existing, addr);
            self.disconnect(existing);
        }

        let Some(slot) = self.connections.add(addr, outbox.clone()) else {
            warn!("Rejecting {}: server full", addr);
            let _ = outbox.send(Arc::new(
                ServerMessage::Reject(RejectReason::ServerFull).encode(),
            ));
            return Err(RejectReason::ServerFull);
        };

        // Slots come from the connection manager, so they always fit the layout.
        let _ = self.aggregator.queue(RareAction::PlayerJoin(slot));
        self.send_id(slot);
        Ok(slot)
    }

    /// Drops a connection and queues the matching leave action.
    pub fn disconnect(&mut self, slot: PlayerSlot) -> bool {
        if self.connections.remove(slot).is_none() {
            return false;
        }
        let _ = self.aggregator.queue(RareAction::PlayerLeave(slot));
        true
    }

    fn send_id(&self, slot: PlayerSlot) {
        let Some(connection) = self.connections.get(slot) else {
            return;
        };
        let message = ServerMessage::SendId {
            slot,
            slots: self.config.max_players as u8,
            max_actions: self.config.max_rare_actions as u8,
            tick_rate: self.config.tick_rate,
        };
        connection.send(Arc::new(message.encode()));
    }

    /// Handles a decoded message from an already connected address.
    ///
    /// Messages from unknown addresses and illegal requests are logged and
    /// dropped; none of them affect the tick.
    pub fn handle_message(&mut self, addr: SocketAddr, message: ClientMessage) {
        let Some(slot) = self.connections.find_by_addr(addr) else {
            warn!("Dropping {:?} from unconnected {}", message, addr);
            return;
        };

        match message {
            ClientMessage::SendInput { sequence, input } => {
                if let Some(connection) = self.connections.get_mut(slot) {
                    if !connection.stage_input(sequence, input) {
                        debug!("Stale input {} from slot {} ignored", sequence, slot);
                    }
                }
            }
            ClientMessage::RequestSnapshot => {
                if let Some(connection) = self.connections.get_mut(slot) {
                    if connection.snapshot.request() {
                        debug!("Slot {} requested a snapshot", slot);
                    }
                }
            }
            ClientMessage::SendRpc { .. } => match message.rpc_action() {
                Some(Ok(action)) => {
                    let _ = self.aggregator.queue(action);
                }
                Some(Err(e)) => warn!("Dropping RPC from slot {}: {}", slot, e),
                None => {}
            },
            ClientMessage::Hello { .. } => {
                // The client did not see its SendId yet; repeat it.
                self.send_id(slot);
            }
            ClientMessage::Goodbye => {
                info!("Slot {} said goodbye", slot);
                self.disconnect(slot);
            }
        }
    }

    /// Runs one full tick cycle and returns the step that was broadcast.
    pub fn run_tick(&mut self) -> Result<StepPacket> {
        // Failures here only affect the requesters, who get to ask again.
        let _ = self
            .snapshots
            .serve(self.tick, &self.sim, &mut self.connections);

        let inputs = self.connections.collect_inputs();
        let next = self.tick + 1;
        let packet = self.aggregator.aggregate(next, inputs)?;

        self.sim.apply_tick(packet.inputs(), packet.actions());
        self.tick = next;

        let message = Arc::new(ServerMessage::SendStep(packet.clone()).encode());
        self.connections.broadcast(&message);

        Ok(packet)
    }
}
