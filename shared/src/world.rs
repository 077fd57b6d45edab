//! Reference simulation used by the binaries and tests
//!
//! A side-scrolling arena: players run left and right, jump, fall under
//! gravity and push each other apart. Everything is integer arithmetic in
//! per-tick units so two machines stay bit-identical.
//!
//! Input encoding (owned here, opaque to the lockstep core):
//! byte 0 is direction bits (`DIR_LEFT`, `DIR_RIGHT`), byte 1 is flag bits
//! (`FLAG_JUMP`).

use crate::auditor::Capture;
use crate::error::Result;
use crate::simulation::Simulation;
use crate::step::{Input, PlayerSlot, RareAction};
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const WORLD_WIDTH: i32 = 800;
pub const FLOOR_Y: i32 = 550;
pub const PLAYER_SIZE: i32 = 32;
pub const PLAYER_SPEED: i32 = 10;
pub const JUMP_VELOCITY: i32 = -30;
pub const DEFAULT_GRAVITY: i32 = 2;

pub const DIR_LEFT: u8 = 0x01;
pub const DIR_RIGHT: u8 = 0x02;
pub const FLAG_JUMP: u8 = 0x01;

/// Sets gravity to the payload value.
pub const OP_SET_GRAVITY: u8 = 0x10;
/// Sends every player back to their spawn point.
pub const OP_RESPAWN_ALL: u8 = 0x11;

/// Capture key for world-level fields; players use their entity id (≥ 1).
const WORLD_KEY: u64 = 0;

pub fn encode_input(left: bool, right: bool, jump: bool) -> Input {
    let mut direction = 0;
    if left {
        direction |= DIR_LEFT;
    }
    if right {
        direction |= DIR_RIGHT;
    }
    let flags = if jump { FLAG_JUMP } else { 0 };
    Input([direction, flags])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: u32,
    pub slot: PlayerSlot,
    pub x: i32,
    pub y: i32,
    pub vel_x: i32,
    pub vel_y: i32,
    pub on_ground: bool,
}

impl Player {
    pub fn new(id: u32, slot: PlayerSlot) -> Self {
        let (x, y) = spawn_point(slot);
        Self {
            id,
            slot,
            x,
            y,
            vel_x: 0,
            vel_y: 0,
            on_ground: true,
        }
    }

    pub fn center_x(&self) -> i32 {
        self.x + PLAYER_SIZE / 2
    }

    fn overlaps(&self, other: &Player) -> bool {
        !(self.x + PLAYER_SIZE <= other.x
            || other.x + PLAYER_SIZE <= self.x
            || self.y + PLAYER_SIZE <= other.y
            || other.y + PLAYER_SIZE <= self.y)
    }
}

fn spawn_point(slot: PlayerSlot) -> (i32, i32) {
    let x = 100 + (slot as i32 * 60) % (WORLD_WIDTH - 200);
    (x, FLOOR_Y - PLAYER_SIZE)
}

/// World-level fields, captured under `WORLD_KEY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Globals {
    gravity: i32,
    next_id: u32,
    ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoWorld {
    globals: Globals,
    /// Players by stable entity id.
    players: BTreeMap<u32, Player>,
}

impl Default for DemoWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoWorld {
    pub fn new() -> Self {
        Self {
            globals: Globals {
                gravity: DEFAULT_GRAVITY,
                next_id: 1,
                ticks: 0,
            },
            players: BTreeMap::new(),
        }
    }

    pub fn gravity(&self) -> i32 {
        self.globals.gravity
    }

    /// Number of ticks this world has applied, including those before a snapshot.
    pub fn ticks(&self) -> u64 {
        self.globals.ticks
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_in_slot(&self, slot: PlayerSlot) -> Option<&Player> {
        self.players.values().find(|p| p.slot == slot)
    }

    fn player_in_slot_mut(&mut self, slot: PlayerSlot) -> Option<&mut Player> {
        self.players.values_mut().find(|p| p.slot == slot)
    }

    fn apply_action(&mut self, action: RareAction) {
        match action {
            RareAction::PlayerJoin(slot) => {
                if self.player_in_slot(slot).is_some() {
                    return;
                }
                let id = self.globals.next_id;
                self.globals.next_id += 1;
                self.players.insert(id, Player::new(id, slot));
            }
            RareAction::PlayerLeave(slot) => {
                self.players.retain(|_, p| p.slot != slot);
            }
            RareAction::Custom {
                opcode: OP_SET_GRAVITY,
                payload,
            } => {
                self.globals.gravity = payload as i32;
            }
            RareAction::Custom {
                opcode: OP_RESPAWN_ALL,
                ..
            } => {
                for player in self.players.values_mut() {
                    *player = Player::new(player.id, player.slot);
                }
            }
            RareAction::Custom { .. } => {}
        }
    }

    fn apply_input(&mut self, slot: PlayerSlot, input: Input) {
        let Some(player) = self.player_in_slot_mut(slot) else {
            return;
        };
        let [direction, flags] = input.0;

        player.vel_x = 0;
        if direction & DIR_LEFT != 0 {
            player.vel_x -= PLAYER_SPEED;
        }
        if direction & DIR_RIGHT != 0 {
            player.vel_x += PLAYER_SPEED;
        }
        if flags & FLAG_JUMP != 0 && player.on_ground {
            player.vel_y = JUMP_VELOCITY;
            player.on_ground = false;
        }
    }

    fn update_physics(&mut self) {
        let gravity = self.globals.gravity;
        for player in self.players.values_mut() {
            if !player.on_ground {
                player.vel_y += gravity;
            }

            player.x = (player.x + player.vel_x).clamp(0, WORLD_WIDTH - PLAYER_SIZE);
            player.y += player.vel_y;

            if player.y + PLAYER_SIZE >= FLOOR_Y {
                player.y = FLOOR_Y - PLAYER_SIZE;
                player.vel_y = 0;
                player.on_ground = true;
            }
            if player.y <= 0 {
                player.y = 0;
                player.vel_y = 0;
            }
        }
        self.handle_collisions();
    }

    /// Pushes overlapping pairs apart horizontally, lower id to the left.
    fn handle_collisions(&mut self) {
        let ids: Vec<u32> = self.players.keys().copied().collect();
        for (i, &first) in ids.iter().enumerate() {
            for &second in &ids[i + 1..] {
                let (Some(a), Some(b)) = (
                    self.players.get(&first).cloned(),
                    self.players.get(&second).cloned(),
                ) else {
                    continue;
                };
                if !a.overlaps(&b) {
                    continue;
                }

                let overlap = PLAYER_SIZE - (b.center_x() - a.center_x()).abs();
                let push = (overlap + 1) / 2;
                let (left, right) = if a.center_x() <= b.center_x() {
                    (first, second)
                } else {
                    (second, first)
                };
                if let Some(p) = self.players.get_mut(&left) {
                    p.x = (p.x - push).clamp(0, WORLD_WIDTH - PLAYER_SIZE);
                }
                if let Some(p) = self.players.get_mut(&right) {
                    p.x = (p.x + push).clamp(0, WORLD_WIDTH - PLAYER_SIZE);
                }
            }
        }
    }
}

impl Simulation for DemoWorld {
    fn apply_tick(&mut self, inputs: &[Input], actions: &[RareAction]) {
        for action in actions {
            self.apply_action(*action);
        }
        for (slot, input) in inputs.iter().enumerate() {
            self.apply_input(slot as PlayerSlot, *input);
        }
        self.update_physics();
        self.globals.ticks += 1;
    }

    fn serialize_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn deserialize_state(&mut self, bytes: &[u8]) -> Result<()> {
        *self = bincode::deserialize(bytes)?;
        Ok(())
    }

    fn capture_debug_state(&self) -> Capture {
        let globals = std::iter::once((WORLD_KEY, sub_state(WORLD_KEY, &self.globals)));
        let players = self
            .players
            .iter()
            .map(|(id, player)| (*id as u64, sub_state(*id as u64, player)));
        globals.chain(players).collect()
    }
}

/// Encodes one capture entry. Falls back to the `Debug` text so a failed
/// encoding still differs between unequal values.
fn sub_state<T: Serialize + std::fmt::Debug>(key: u64, value: &T) -> Vec<u8> {
    bincode::serialize(value).unwrap_or_else(|e| {
        error!("Capture of key {} failed to encode: {}", key, e);
        format!("{:?}", value).into_bytes()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auditor::compare;

    fn joined(slots: &[PlayerSlot]) -> DemoWorld {
        let mut world = DemoWorld::new();
        let actions: Vec<RareAction> = slots.iter().map(|s| RareAction::PlayerJoin(*s)).collect();
        world.apply_tick(&[Input::NEUTRAL; 4], &actions);
        world
    }

    #[test]
    fn test_join_assigns_stable_ids() {
        let world = joined(&[2, 0]);
        let ids: Vec<(u32, PlayerSlot)> = world.players().map(|p| (p.id, p.slot)).collect();
        assert_eq!(ids, vec![(1, 2), (2, 0)]);
    }

    #[test]
    fn test_duplicate_join_ignored() {
        let mut world = joined(&[1]);
        world.apply_tick(&[Input::NEUTRAL; 4], &[RareAction::PlayerJoin(1)]);
        assert_eq!(world.players().count(), 1);
    }

    #[test]
    fn test_leave_removes_player() {
        let mut world = joined(&[0, 1]);
        world.apply_tick(&[Input::NEUTRAL; 4], &[RareAction::PlayerLeave(0)]);
        assert!(world.player_in_slot(0).is_none());
        assert!(world.player_in_slot(1).is_some());
    }

    #[test]
    fn test_movement_follows_input() {
        let mut world = joined(&[0]);
        let start = world.player_in_slot(0).unwrap().x;
        let right = encode_input(false, true, false);
        world.apply_tick(&[right, Input::NEUTRAL, Input::NEUTRAL, Input::NEUTRAL], &[]);
        assert_eq!(world.player_in_slot(0).unwrap().x, start + PLAYER_SPEED);
    }

    #[test]
    fn test_jump_then_land() {
        let mut world = joined(&[0]);
        let jump = encode_input(false, false, true);
        world.apply_tick(&[jump, Input::NEUTRAL, Input::NEUTRAL, Input::NEUTRAL], &[]);
        assert!(!world.player_in_slot(0).unwrap().on_ground);

        for _ in 0..100 {
            world.apply_tick(&[Input::NEUTRAL; 4], &[]);
        }
        let player = world.player_in_slot(0).unwrap();
        assert!(player.on_ground);
        assert_eq!(player.y, FLOOR_Y - PLAYER_SIZE);
    }

    #[test]
    fn test_gravity_rpc() {
        let mut world = joined(&[0]);
        world.apply_tick(
            &[Input::NEUTRAL; 4],
            &[RareAction::Custom {
                opcode: OP_SET_GRAVITY,
                payload: 5,
            }],
        );
        assert_eq!(world.gravity(), 5);
    }

    #[test]
    fn test_players_never_leave_the_arena() {
        let mut world = joined(&[0, 1]);
        let left = encode_input(true, false, false);
        for _ in 0..200 {
            world.apply_tick(&[left, left, Input::NEUTRAL, Input::NEUTRAL], &[]);
        }
        for player in world.players() {
            assert!(player.x >= 0);
            assert!(player.x <= WORLD_WIDTH - PLAYER_SIZE);
        }
    }

    #[test]
    fn test_state_round_trip_preserves_capture() {
        let mut world = joined(&[0, 3]);
        let right = encode_input(false, true, true);
        for _ in 0..10 {
            world.apply_tick(&[right, Input::NEUTRAL, Input::NEUTRAL, right], &[]);
        }

        let bytes = world.serialize_state().unwrap();
        let mut restored = DemoWorld::new();
        restored.deserialize_state(&bytes).unwrap();

        assert_eq!(compare(&world.capture_debug_state(), &restored.capture_debug_state()), Ok(()));
        assert_eq!(restored.ticks(), world.ticks());
    }

    #[test]
    fn test_deserialize_replaces_everything() {
        let source = joined(&[0]);
        let mut target = joined(&[1, 2, 3]);
        target
            .deserialize_state(&source.serialize_state().unwrap())
            .unwrap();
        assert_eq!(target, source);
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let mut world = DemoWorld::new();
        assert!(world.deserialize_state(&[0xFF]).is_err());
    }

    #[test]
    fn test_capture_keys_are_entity_ids() {
        let world = joined(&[0, 1]);
        let keys: Vec<u64> = world.capture_debug_state().keys().collect();
        assert_eq!(keys, vec![WORLD_KEY, 1, 2]);
    }

    #[test]
    fn test_capture_entries_are_bincode_sub_states() {
        let world = joined(&[0]);
        let capture = world.capture_debug_state();
        assert_eq!(
            capture.get(WORLD_KEY),
            Some(bincode::serialize(&world.globals).unwrap().as_slice())
        );
        let player = world.players.get(&1).unwrap();
        assert_eq!(
            capture.get(1),
            Some(bincode::serialize(player).unwrap().as_slice())
        );
        assert!(capture
            .keys()
            .all(|key| capture.get(key).is_some_and(|bytes| !bytes.is_empty())));
    }
}
