//! Connection tracking, input staging and per-connection outbound queues
//!
//! This module handles the server-side view of connected clients:
//! - Slot assignment (lowest free slot first) and capacity enforcement
//! - Latest-wins input staging between ticks
//! - Per-connection snapshot request state
//! - Each connection's own outbound message queue
//!
//! Network tasks only ever put bytes into these queues; nothing here touches
//! the simulation.

use crate::snapshot::SnapshotState;
use log::info;
use shared::{Input, PlayerSlot};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Encoded message shared between every connection it is sent to.
pub type OutboundMessage = Arc<Vec<u8>>;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<OutboundMessage>;

/// A connected client and its staged state
#[derive(Debug)]
pub struct Connection {
    /// Input slot assigned by the server
    pub slot: PlayerSlot,
    /// Network address for routing
    pub addr: SocketAddr,
    /// Snapshot transfer progress for this connection
    pub snapshot: SnapshotState,
    staged_input: Option<Input>,
    last_sequence: Option<u32>,
    outbox: Outbox,
}

impl Connection {
    pub fn new(slot: PlayerSlot, addr: SocketAddr, outbox: Outbox) -> Self {
        Self {
            slot,
            addr,
            snapshot: SnapshotState::Idle,
            staged_input: None,
            last_sequence: None,
            outbox,
        }
    }

    /// Stages an input for the next tick, replacing any older staged input.
    ///
    /// Returns false, leaving the staged input untouched, when `sequence`
    /// is not newer than the last one accepted (a reordered datagram).
    pub fn stage_input(&mut self, sequence: u32, input: Input) -> bool {
        if matches!(self.last_sequence, Some(last) if sequence <= last) {
            return false;
        }
        self.last_sequence = Some(sequence);
        self.staged_input = Some(input);
        true
    }

    /// Takes the staged input, or neutral input if none arrived since the last tick.
    pub fn take_input(&mut self) -> Input {
        self.staged_input.take().unwrap_or(Input::NEUTRAL)
    }

    pub fn has_staged_input(&self) -> bool {
        self.staged_input.is_some()
    }

    /// Queues a message; false if the connection's writer has gone away.
    pub fn send(&self, message: OutboundMessage) -> bool {
        self.outbox.send(message).is_ok()
    }
}

/// Manages every connection and the mapping from slot to address
pub struct ConnectionManager {
    connections: BTreeMap<PlayerSlot, Connection>,
    max_players: usize,
}

impl ConnectionManager {
    pub fn new(max_players: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            max_players,
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Assigns the lowest free slot to a new connection.
    ///
    /// Returns None if every slot is taken.
    pub fn add(&mut self, addr: SocketAddr, outbox: Outbox) -> Option<PlayerSlot> {
        let slot = (0..self.max_players)
            .map(|s| s as PlayerSlot)
            .find(|s| !self.connections.contains_key(s))?;

        info!("Connection from {} assigned slot {}", addr, slot);
        self.connections
            .insert(slot, Connection::new(slot, addr, outbox));
        Some(slot)
    }

    /// Removes a connection, dropping its outbound queue.
    pub fn remove(&mut self, slot: PlayerSlot) -> Option<Connection> {
        let removed = self.connections.remove(&slot);
        if let Some(connection) = &removed {
            info!("Slot {} ({}) released", slot, connection.addr);
        }
        removed
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PlayerSlot> {
        self.connections
            .values()
            .find(|c| c.addr == addr)
            .map(|c| c.slot)
    }

    pub fn get(&self, slot: PlayerSlot) -> Option<&Connection> {
        self.connections.get(&slot)
    }

    pub fn get_mut(&mut self, slot: PlayerSlot) -> Option<&mut Connection> {
        self.connections.get_mut(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Collects one input per slot for the coming tick.
    ///
    /// Connected slots hand over their staged input (or neutral); empty
    /// slots are neutral. Never waits on anybody.
    pub fn collect_inputs(&mut self) -> Vec<Input> {
        let mut inputs = vec![Input::NEUTRAL; self.max_players];
        for connection in self.connections.values_mut() {
            if let Some(input) = inputs.get_mut(connection.slot as usize) {
                *input = connection.take_input();
            }
        }
        inputs
    }

    /// Queues `message` on every connection. Returns how many accepted it.
    pub fn broadcast(&self, message: &OutboundMessage) -> usize {
        self.connections
            .values()
            .filter(|c| c.send(Arc::clone(message)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
