//! Interface to the simulated content
//!
//! The lockstep core never looks inside the simulation. It drives it tick by
//! tick, moves its state around as bytes for snapshots, and asks for a
//! debug capture when auditing.

use crate::auditor::Capture;
use crate::error::Result;
use crate::step::{Input, RareAction};

pub trait Simulation {
    /// Advances exactly one tick. `inputs` is indexed by player slot.
    ///
    /// Must be deterministic: identical state plus identical arguments must
    /// yield identical state on every machine.
    fn apply_tick(&mut self, inputs: &[Input], actions: &[RareAction]);

    /// Serializes the full replicated state.
    fn serialize_state(&self) -> Result<Vec<u8>>;

    /// Replaces the full replicated state. Nothing of the previous state survives.
    fn deserialize_state(&mut self, bytes: &[u8]) -> Result<()>;

    /// Takes an owned, immutable capture keyed by stable entity id.
    fn capture_debug_state(&self) -> Capture;
}
