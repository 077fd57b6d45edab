//! # Lockstep Shared Library
//!
//! Everything the server and the clients must agree on bit for bit: the
//! wire codec for step packets and control messages, datagram framing, the
//! snapshot envelope, the simulation interface, and the desync auditor.
//!
//! ## Module Organization
//!
//! - `codec`: bounds-checked little-endian `Reader` / `Writer`
//! - `step`: `Tick`, `Input`, `RareAction`, `StepPacket` and their encoding
//! - `protocol`: `ClientMessage` / `ServerMessage`, `[code][payload]` framing
//! - `snapshot`: tick + state envelope carried by `SendSnapshot`
//! - `transport`: datagram framing, fragmentation and reassembly
//! - `simulation`: the `Simulation` trait the lockstep core drives
//! - `auditor`: captures, divergence classification, `DesyncAuditor`
//! - `world`: `DemoWorld`, a small deterministic reference simulation
//!
//! ## Determinism
//!
//! Lockstep only works if every participant applies the same ticks in the
//! same order to the same state. Nothing in this crate depends on wall-clock
//! time, hash ordering or floating point.

pub mod auditor;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod simulation;
pub mod snapshot;
pub mod step;
pub mod transport;
pub mod world;

pub use auditor::{compare, Capture, DesyncAuditor, Divergence};
pub use error::{Error, FormatError, Result};
pub use protocol::{ClientMessage, RejectReason, ServerMessage, PROTOCOL_VERSION};
pub use simulation::Simulation;
pub use snapshot::SnapshotEnvelope;
pub use step::{Input, PlayerSlot, RareAction, StepLayout, StepPacket, Tick, INPUT_SIZE};
pub use world::DemoWorld;

/// Default server tick rate in Hz.
pub const DEFAULT_TICK_RATE: u16 = 30;
/// Default number of player slots (N).
pub const DEFAULT_MAX_PLAYERS: usize = 8;
/// Default rare actions per tick (K).
pub const DEFAULT_MAX_RARE_ACTIONS: usize = 4;
/// Default bound on a serialized snapshot envelope.
pub const DEFAULT_MAX_SNAPSHOT_SIZE: usize = 1024 * 1024;
