//! Step packets: the unit of lockstep replay
//!
//! Wire layout of an encoded step:
//!
//! ```text
//! [u64 tick][N × INPUT_SIZE input blocks, slot order][u8 count][count × {u8 type, u8 payload}]
//! ```

use crate::codec::{Reader, Writer};
use crate::error::FormatError;
use serde::{Deserialize, Serialize};

pub type Tick = u64;
pub type PlayerSlot = u8;

/// Size in bytes of one player's input block.
pub const INPUT_SIZE: usize = 2;

/// Encoded size of one rare action record.
pub const ACTION_RECORD_SIZE: usize = 2;

const ACTION_PLAYER_JOIN: u8 = 0x01;
const ACTION_PLAYER_LEAVE: u8 = 0x02;

/// Lowest opcode available to `RareAction::Custom`; everything below is reserved.
pub const CUSTOM_OPCODE_MIN: u8 = 0x10;

/// Opaque per-tick input for one slot.
///
/// The bytes belong to the simulation; this crate only copies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Input(pub [u8; INPUT_SIZE]);

impl Input {
    pub const NEUTRAL: Input = Input([0; INPUT_SIZE]);

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

/// Low-frequency, order-sensitive event carried alongside the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RareAction {
    PlayerJoin(PlayerSlot),
    PlayerLeave(PlayerSlot),
    Custom { opcode: u8, payload: u8 },
}

impl RareAction {
    /// Builds a custom action, rejecting opcodes that collide with join/leave.
    pub fn custom(opcode: u8, payload: u8) -> Result<Self, FormatError> {
        if opcode < CUSTOM_OPCODE_MIN {
            return Err(FormatError::ReservedOpcode(opcode));
        }
        Ok(RareAction::Custom { opcode, payload })
    }

    /// Checks that this action encodes to a record that decodes back to it.
    pub fn validate(&self, layout: &StepLayout) -> Result<(), FormatError> {
        match *self {
            RareAction::PlayerJoin(slot) | RareAction::PlayerLeave(slot)
                if slot as usize >= layout.slots =>
            {
                Err(FormatError::SlotOutOfRange {
                    slot,
                    slots: layout.slots,
                })
            }
            RareAction::Custom { opcode, .. } if opcode < CUSTOM_OPCODE_MIN => {
                Err(FormatError::ReservedOpcode(opcode))
            }
            _ => Ok(()),
        }
    }

    pub fn to_record(self) -> [u8; ACTION_RECORD_SIZE] {
        match self {
            RareAction::PlayerJoin(slot) => [ACTION_PLAYER_JOIN, slot],
            RareAction::PlayerLeave(slot) => [ACTION_PLAYER_LEAVE, slot],
            RareAction::Custom { opcode, payload } => [opcode, payload],
        }
    }

    pub fn from_record(record: [u8; ACTION_RECORD_SIZE]) -> Result<Self, FormatError> {
        match record {
            [ACTION_PLAYER_JOIN, slot] => Ok(RareAction::PlayerJoin(slot)),
            [ACTION_PLAYER_LEAVE, slot] => Ok(RareAction::PlayerLeave(slot)),
            [opcode, payload] if opcode >= CUSTOM_OPCODE_MIN => {
                Ok(RareAction::Custom { opcode, payload })
            }
            [other, _] => Err(FormatError::UnknownActionType(other)),
        }
    }
}

/// Session-wide shape of a step packet, needed to decode one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLayout {
    /// Number of player slots (N).
    pub slots: usize,
    /// Rare actions allowed per tick (K).
    pub max_actions: usize,
}

impl StepLayout {
    pub fn new(slots: usize, max_actions: usize) -> Self {
        Self { slots, max_actions }
    }

    /// Encoded size of a step carrying `actions` rare actions.
    pub fn encoded_len(&self, actions: usize) -> usize {
        8 + self.slots * INPUT_SIZE + 1 + actions * ACTION_RECORD_SIZE
    }
}

/// One tick's worth of inputs and rare actions. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPacket {
    tick: Tick,
    inputs: Vec<Input>,
    actions: Vec<RareAction>,
}

impl StepPacket {
    /// Validates the packet against `layout` before building it.
    pub fn new(
        tick: Tick,
        inputs: Vec<Input>,
        actions: Vec<RareAction>,
        layout: &StepLayout,
    ) -> Result<Self, FormatError> {
        if inputs.len() != layout.slots {
            return Err(FormatError::InputCount {
                expected: layout.slots,
                actual: inputs.len(),
            });
        }
        let max = layout.max_actions.min(u8::MAX as usize);
        if actions.len() > max {
            return Err(FormatError::TooManyActions {
                count: actions.len(),
                max,
            });
        }
        for action in &actions {
            action.validate(layout)?;
        }
        Ok(Self {
            tick,
            inputs,
            actions,
        })
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn actions(&self) -> &[RareAction] {
        &self.actions
    }

    pub fn encode(&self, writer: &mut Writer) {
        writer.put_u64(self.tick);
        for input in &self.inputs {
            writer.put_bytes(&input.0);
        }
        writer.put_u8(self.actions.len() as u8);
        for action in &self.actions {
            writer.put_bytes(&action.to_record());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(
            8 + self.inputs.len() * INPUT_SIZE + 1 + self.actions.len() * ACTION_RECORD_SIZE,
        );
        self.encode(&mut writer);
        writer.finish()
    }

    /// Reads one step; leaves any following bytes in `reader` untouched.
    pub fn decode(reader: &mut Reader<'_>, layout: &StepLayout) -> Result<Self, FormatError> {
        let tick = reader.read_u64()?;

        let mut inputs = Vec::with_capacity(layout.slots);
        for _ in 0..layout.slots {
            inputs.push(Input(reader.read_array()?));
        }

        let count = reader.read_u8()? as usize;
        if count > layout.max_actions {
            return Err(FormatError::TooManyActions {
                count,
                max: layout.max_actions,
            });
        }

        let mut actions = Vec::with_capacity(count);
        for _ in 0..count {
            let action = RareAction::from_record(reader.read_array()?)?;
            action.validate(layout)?;
            actions.push(action);
        }

        Ok(Self {
            tick,
            inputs,
            actions,
        })
    }

    /// Decodes a buffer holding exactly one step.
    pub fn from_bytes(bytes: &[u8], layout: &StepLayout) -> Result<Self, FormatError> {
        let mut reader = Reader::new(bytes);
        let packet = Self::decode(&mut reader, layout)?;
        reader.finish()?;
        Ok(packet)
    }
}
