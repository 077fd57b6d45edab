//! Client input generation with sequencing and change detection
//!
//! The headless client either stays idle or plays as a bot that wanders
//! left and right, jumps now and then and occasionally sends an RPC.

use rand::Rng;
use shared::world::{encode_input, OP_RESPAWN_ALL, OP_SET_GRAVITY};
use shared::{ClientMessage, Input};
use std::time::Duration;

/// Idle clients still send this often so the server keeps the connection.
const KEEP_ALIVE: Duration = Duration::from_millis(500);

/// Produces sequenced input messages for the server
pub struct InputManager {
    next_sequence: u32,
    current_input: Input,
    since_last_send: Duration,
    bot: bool,
    /// Bot movement: -1 left, 0 still, 1 right.
    direction: i8,
}

impl InputManager {
    pub fn new(bot: bool) -> Self {
        Self {
            next_sequence: 1,
            current_input: Input::NEUTRAL,
            since_last_send: Duration::ZERO,
            bot,
            direction: 0,
        }
    }

    pub fn current_input(&self) -> Input {
        self.current_input
    }

    /// Samples input for the current frame.
    ///
    /// Held input goes out every frame since the server treats a silent
    /// slot as neutral. Neutral input only goes out when it changes or as a
    /// keep-alive.
    pub fn update<R: Rng>(&mut self, dt: Duration, rng: &mut R) -> Option<ClientMessage> {
        self.since_last_send += dt;
        let input = if self.bot {
            self.bot_input(rng)
        } else {
            Input::NEUTRAL
        };

        let changed = input != self.current_input;
        let should_send =
            changed || !input.is_neutral() || self.since_last_send >= KEEP_ALIVE;
        self.current_input = input;
        if !should_send {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.since_last_send = Duration::ZERO;
        Some(ClientMessage::SendInput { sequence, input })
    }

    fn bot_input<R: Rng>(&mut self, rng: &mut R) -> Input {
        if rng.gen_bool(0.05) {
            self.direction = rng.gen_range(-1..=1);
        }
        let jump = rng.gen_bool(0.02);
        encode_input(self.direction < 0, self.direction > 0, jump)
    }

    /// Rarely produces an admin RPC when running as a bot.
    pub fn maybe_rpc<R: Rng>(&mut self, rng: &mut R) -> Option<ClientMessage> {
        if !self.bot || !rng.gen_bool(0.002) {
            return None;
        }
        let message = if rng.gen_bool(0.5) {
            ClientMessage::SendRpc {
                opcode: OP_SET_GRAVITY,
                payload: rng.gen_range(1..=4),
            }
        } else {
            ClientMessage::SendRpc {
                opcode: OP_RESPAWN_ALL,
                payload: 0,
            }
        };
        Some(message)
    }
}
