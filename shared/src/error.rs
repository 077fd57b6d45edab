//! Error taxonomy for the lockstep protocol
//!
//! Every error here is local to the message or operation that produced it.
//! The tick loops on both sides log and discard; none of these halt a loop.

use crate::auditor::Divergence;
use thiserror::Error;

/// A malformed or truncated wire message.
///
/// Receiving one of these means the message is discarded and the connection
/// stays alive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("empty message")]
    Empty,

    #[error("message truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("unknown message code {0:#04x}")]
    UnknownMessageCode(u8),

    #[error("unknown rare action type {0:#04x}")]
    UnknownActionType(u8),

    #[error("custom opcode {0:#04x} collides with a reserved action type")]
    ReservedOpcode(u8),

    #[error("{count} rare actions exceeds the per-tick limit of {max}")]
    TooManyActions { count: usize, max: usize },

    #[error("expected {expected} input blocks, got {actual}")]
    InputCount { expected: usize, actual: usize },

    #[error("slot {slot} out of range for {slots} slots")]
    SlotOutOfRange { slot: u8, slots: usize },

    #[error("step received before the slot layout is known")]
    MissingLayout,

    #[error("declared length {declared} exceeds limit {max}")]
    LengthLimit { declared: usize, max: usize },

    #[error("unknown frame kind {0:#04x}")]
    UnknownFrameKind(u8),

    #[error("fragment {index} out of range for {count} fragments")]
    FragmentIndex { index: u16, count: u16 },

    #[error("fragment count changed mid-message ({first} then {later})")]
    FragmentCount { first: u16, later: u16 },
}

/// Top-level error type shared by server and client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("desync detected: {0}")]
    Desync(#[from] Divergence),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("state serialization failed: {0}")]
    State(#[from] bincode::Error),

    #[error("snapshot of {size} bytes exceeds the {max} byte limit")]
    SnapshotTooLarge { size: usize, max: usize },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_converts_into_error() {
        let err: Error = FormatError::TrailingBytes(3).into();
        assert!(matches!(err, Error::Format(FormatError::TrailingBytes(3))));
        assert_eq!(err.to_string(), "format error: 3 unexpected trailing bytes");
    }

    #[test]
    fn test_truncated_message_mentions_sizes() {
        let err = FormatError::Truncated {
            needed: 8,
            remaining: 2,
        };
        let text = err.to_string();
        assert!(text.contains('8'));
        assert!(text.contains('2'));
    }

    #[test]
    fn test_io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io.into();
        assert!(matches!(err, Error::Transport(_)));
    }
}
