//! # Lockstep Client Library
//!
//! A client in a lockstep session runs the same deterministic simulation as
//! the server and advances it only by applying the server's steps, in tick
//! order, exactly once each. There is no prediction and no reconciliation:
//! if the client has the same state and the same steps, it has the same
//! result.
//!
//! ## Lifecycle
//!
//! 1. `Hello` to the server; `SendId` back with the slot and step layout.
//! 2. `RequestSnapshot`; steps that arrive meanwhile are held.
//! 3. The snapshot replaces the local state wholesale and sets the starting
//!    tick. Held steps at or before it are dropped.
//! 4. Steps are applied one per tick interval, with a capped burst when a
//!    backlog builds up. A client that falls too far behind asks for a
//!    fresh snapshot.
//!
//! ## Module Organization
//!
//! - `config`: `ClientConfig` and its validation
//! - `scheduler`: `StepScheduler`, ordering, pacing and catch-up
//! - `game`: `ClientGame`, the protocol state machine around the simulation
//! - `input`: `InputManager`, sequenced input and an optional bot
//! - `network`: UDP transport, fake latency, the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::Client;
//! use shared::DemoWorld;
//!
//! #[tokio::main]
//! async fn main() -> shared::Result<()> {
//!     let config = ClientConfig {
//!         server_addr: "127.0.0.1:8080".to_string(),
//!         bot: true,
//!         ..ClientConfig::default()
//!     };
//!     let mut client = Client::new(config, DemoWorld::new()).await?;
//!     client.run().await
//! }
//! ```

pub mod config;
pub mod game;
pub mod input;
pub mod network;
pub mod scheduler;
