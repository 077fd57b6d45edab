//! # Lockstep Server Library
//!
//! The authoritative side of the lockstep protocol. The server does not
//! predict, reconcile or wait for anybody: at a fixed rate it gathers one
//! input per player slot, appends up to K rare actions, applies that step to
//! its own simulation and broadcasts the exact same step to every client.
//!
//! ## Core Responsibilities
//!
//! ### Step Aggregation
//! Each tick produces one `StepPacket` containing an input for every slot.
//! Slots whose client sent nothing since the last tick (or that are empty)
//! get neutral input. Rare actions beyond K per tick are carried over, in
//! order, to the following ticks.
//!
//! ### Membership
//! Connecting and disconnecting are themselves rare actions (`PlayerJoin`,
//! `PlayerLeave`) so every participant adds and removes players at the same
//! tick.
//!
//! ### Snapshot Service
//! Late joiners and clients that fell too far behind ask for a snapshot.
//! Requests are served at the start of the next tick, all from a single
//! serialization of the state as of the last broadcast step.
//!
//! ## Module Organization
//!
//! - `config`: `ServerConfig` and its validation
//! - `client_manager`: connections, slots, staged input and outboxes
//! - `aggregator`: rare-action queue and step assembly
//! - `snapshot`: per-connection snapshot state and batching
//! - `game`: `GameServer`, the transport-agnostic tick cycle
//! - `network`: UDP transport, fragmentation, liveness and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use shared::DemoWorld;
//!
//! #[tokio::main]
//! async fn main() -> shared::Result<()> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         tick_rate: 30,
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::bind(config, DemoWorld::new()).await?;
//!     server.run().await
//! }
//! ```

pub mod aggregator;
pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod snapshot;
