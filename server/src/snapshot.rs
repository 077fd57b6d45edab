//! Full-state transfer to joining or resynchronizing clients
//!
//! Requests are collected per connection and served in batches: all
//! connections that asked since the last batch receive the same serialized
//! blob, so the state is serialized once however many clients want it.

use crate::client_manager::{ConnectionManager, OutboundMessage};
use log::{debug, error};
use shared::{Error, PlayerSlot, Result, ServerMessage, Simulation, SnapshotEnvelope, Tick};
use std::sync::Arc;

/// Snapshot progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Idle,
    Requested,
    Serializing,
    ReadyToSend,
    Sent,
}

impl SnapshotState {
    /// Registers a request. Repeated requests before the next batch collapse into one.
    pub fn request(&mut self) -> bool {
        match self {
            SnapshotState::Idle | SnapshotState::Sent => {
                *self = SnapshotState::Requested;
                true
            }
            _ => false,
        }
    }
}

/// Serves pending snapshot requests once per batch.
#[derive(Debug)]
pub struct SnapshotBatcher {
    max_snapshot_size: usize,
    batches: u64,
}

impl SnapshotBatcher {
    pub fn new(max_snapshot_size: usize) -> Self {
        Self {
            max_snapshot_size,
            batches: 0,
        }
    }

    /// Number of times the state has been serialized for transfer.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Serializes `sim` (at `tick`) once and queues it to every requester.
    ///
    /// Returns how many connections were sent the snapshot. On failure every
    /// requester returns to `Idle` so it can ask again.
    pub fn serve<S: Simulation>(
        &mut self,
        tick: Tick,
        sim: &S,
        connections: &mut ConnectionManager,
    ) -> Result<usize> {
        let requesters: Vec<PlayerSlot> = connections
            .iter()
            .filter(|c| c.snapshot == SnapshotState::Requested)
            .map(|c| c.slot)
            .collect();
        if requesters.is_empty() {
            return Ok(0);
        }

        set_state(connections, &requesters, SnapshotState::Serializing);
        let message = match self.encode(tick, sim) {
            Ok(message) => message,
            Err(e) => {
                error!("Snapshot at tick {} failed: {}", tick, e);
                set_state(connections, &requesters, SnapshotState::Idle);
                return Err(e);
            }
        };
        self.batches += 1;
        set_state(connections, &requesters, SnapshotState::ReadyToSend);

        let mut sent = 0;
        for slot in &requesters {
            if let Some(connection) = connections.get_mut(*slot) {
                if connection.send(Arc::clone(&message)) {
                    connection.snapshot = SnapshotState::Sent;
                    sent += 1;
                } else {
                    connection.snapshot = SnapshotState::Idle;
                }
            }
        }

        debug!(
            "Snapshot of tick {} ({} bytes) sent to {} connection(s)",
            tick,
            message.len(),
            sent
        );
        Ok(sent)
    }

    fn encode<S: Simulation>(&self, tick: Tick, sim: &S) -> Result<OutboundMessage> {
        let envelope = SnapshotEnvelope::new(tick, sim.serialize_state()?);
        let size = envelope.encoded_len();
        if size > self.max_snapshot_size {
            return Err(Error::SnapshotTooLarge {
                size,
                max: self.max_snapshot_size,
            });
        }
        Ok(Arc::new(ServerMessage::SendSnapshot(envelope).encode()))
    }
}

fn set_state(connections: &mut ConnectionManager, slots: &[PlayerSlot], state: SnapshotState) {
    for slot in slots {
        if let Some(connection) = connections.get_mut(*slot) {
            connection.snapshot = state;
        }
    }
}
