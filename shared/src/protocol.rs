//! Message codes and payloads exchanged between server and clients
//!
//! Every message is `[u8 code][payload]`. Client and server messages live in
//! separate enums so each side only decodes what it can legally receive.

use crate::codec::{Reader, Writer};
use crate::error::FormatError;
use crate::snapshot::SnapshotEnvelope;
use crate::step::{Input, PlayerSlot, RareAction, StepLayout, StepPacket};

pub const PROTOCOL_VERSION: u32 = 1;

pub const CODE_SEND_INPUT: u8 = 0x01;
pub const CODE_REQUEST_SNAPSHOT: u8 = 0x02;
pub const CODE_SEND_RPC: u8 = 0x03;
pub const CODE_HELLO: u8 = 0x04;
pub const CODE_GOODBYE: u8 = 0x05;

pub const CODE_SEND_STEP: u8 = 0x10;
pub const CODE_SEND_SNAPSHOT: u8 = 0x11;
pub const CODE_SEND_ID: u8 = 0x12;
pub const CODE_REJECT: u8 = 0x13;

/// Bytes a `SendSnapshot` message adds in front of the envelope: code and u32 length.
pub const SNAPSHOT_HEADER_LEN: usize = 1 + 4;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Hello { version: u32 },
    SendInput { sequence: u32, input: Input },
    RequestSnapshot,
    /// Asks the server to schedule `RareAction::Custom { opcode, payload }`.
    SendRpc { opcode: u8, payload: u8 },
    Goodbye,
}

impl ClientMessage {
    pub fn code(&self) -> u8 {
        match self {
            ClientMessage::Hello { .. } => CODE_HELLO,
            ClientMessage::SendInput { .. } => CODE_SEND_INPUT,
            ClientMessage::RequestSnapshot => CODE_REQUEST_SNAPSHOT,
            ClientMessage::SendRpc { .. } => CODE_SEND_RPC,
            ClientMessage::Goodbye => CODE_GOODBYE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(8);
        writer.put_u8(self.code());
        match self {
            ClientMessage::Hello { version } => writer.put_u32(*version),
            ClientMessage::SendInput { sequence, input } => {
                writer.put_u32(*sequence);
                writer.put_bytes(&input.0);
            }
            ClientMessage::SendRpc { opcode, payload } => {
                writer.put_u8(*opcode);
                writer.put_u8(*payload);
            }
            ClientMessage::RequestSnapshot | ClientMessage::Goodbye => {}
        }
        writer.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut reader = Reader::new(bytes);
        let code = reader.read_u8().map_err(|_| FormatError::Empty)?;
        let message = match code {
            CODE_HELLO => ClientMessage::Hello {
                version: reader.read_u32()?,
            },
            CODE_SEND_INPUT => ClientMessage::SendInput {
                sequence: reader.read_u32()?,
                input: Input(reader.read_array()?),
            },
            CODE_REQUEST_SNAPSHOT => ClientMessage::RequestSnapshot,
            CODE_SEND_RPC => ClientMessage::SendRpc {
                opcode: reader.read_u8()?,
                payload: reader.read_u8()?,
            },
            CODE_GOODBYE => ClientMessage::Goodbye,
            other => return Err(FormatError::UnknownMessageCode(other)),
        };
        reader.finish()?;
        Ok(message)
    }

    /// The rare action an RPC asks for, if the opcode is legal.
    pub fn rpc_action(&self) -> Option<Result<RareAction, FormatError>> {
        match self {
            ClientMessage::SendRpc { opcode, payload } => Some(RareAction::custom(*opcode, *payload)),
            _ => None,
        }
    }
}

/// Why the server refused a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ServerFull,
    VersionMismatch,
}

impl RejectReason {
    fn to_byte(self) -> u8 {
        match self {
            RejectReason::ServerFull => 1,
            RejectReason::VersionMismatch => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, FormatError> {
        match byte {
            1 => Ok(RejectReason::ServerFull),
            2 => Ok(RejectReason::VersionMismatch),
            other => Err(FormatError::UnknownMessageCode(other)),
        }
    }
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    SendId {
        slot: PlayerSlot,
        slots: u8,
        max_actions: u8,
        tick_rate: u16,
    },
    SendStep(StepPacket),
    SendSnapshot(SnapshotEnvelope),
    Reject(RejectReason),
}

impl ServerMessage {
    pub fn code(&self) -> u8 {
        match self {
            ServerMessage::SendId { .. } => CODE_SEND_ID,
            ServerMessage::SendStep(_) => CODE_SEND_STEP,
            ServerMessage::SendSnapshot(_) => CODE_SEND_SNAPSHOT,
            ServerMessage::Reject(_) => CODE_REJECT,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.put_u8(self.code());
        match self {
            ServerMessage::SendId {
                slot,
                slots,
                max_actions,
                tick_rate,
            } => {
                writer.put_u8(*slot);
                writer.put_u8(*slots);
                writer.put_u8(*max_actions);
                writer.put_u16(*tick_rate);
            }
            ServerMessage::SendStep(packet) => packet.encode(&mut writer),
            ServerMessage::SendSnapshot(envelope) => {
                writer.put_u32(envelope.encoded_len() as u32);
                envelope.encode(&mut writer);
            }
            ServerMessage::Reject(reason) => writer.put_u8(reason.to_byte()),
        }
        writer.finish()
    }

    /// Decodes a server message. Steps need the session layout from `SendId`;
    /// without it they fail with `FormatError::MissingLayout`.
    pub fn decode(bytes: &[u8], layout: Option<&StepLayout>) -> Result<Self, FormatError> {
        let mut reader = Reader::new(bytes);
        let code = reader.read_u8().map_err(|_| FormatError::Empty)?;
        let message = match code {
            CODE_SEND_ID => {
                let slot = reader.read_u8()?;
                let slots = reader.read_u8()?;
                if slot >= slots {
                    return Err(FormatError::SlotOutOfRange {
                        slot,
                        slots: slots as usize,
                    });
                }
                ServerMessage::SendId {
                    slot,
                    slots,
                    max_actions: reader.read_u8()?,
                    tick_rate: reader.read_u16()?,
                }
            }
            CODE_SEND_STEP => {
                let layout = layout.ok_or(FormatError::MissingLayout)?;
                ServerMessage::SendStep(StepPacket::decode(&mut reader, layout)?)
            }
            CODE_SEND_SNAPSHOT => {
                let declared = reader.read_u32()? as usize;
                if declared != reader.remaining() {
                    return Err(if declared > reader.remaining() {
                        FormatError::Truncated {
                            needed: declared,
                            remaining: reader.remaining(),
                        }
                    } else {
                        FormatError::TrailingBytes(reader.remaining() - declared)
                    });
                }
                ServerMessage::SendSnapshot(SnapshotEnvelope::from_bytes(reader.read_rest())?)
            }
            CODE_REJECT => ServerMessage::Reject(RejectReason::from_byte(reader.read_u8()?)?),
            other => return Err(FormatError::UnknownMessageCode(other)),
        };
        reader.finish()?;
        Ok(message)
    }
}
