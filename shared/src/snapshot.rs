//! Snapshot envelope carried by `SendSnapshot`
//!
//! The envelope pairs the collaborator's serialized state with the tick it
//! was taken at, so a receiver knows which buffered steps it supersedes.

use crate::codec::{Reader, Writer};
use crate::error::FormatError;
use crate::step::Tick;

/// Full replicated state at a given tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEnvelope {
    pub tick: Tick,
    pub state: Vec<u8>,
}

impl SnapshotEnvelope {
    pub fn new(tick: Tick, state: Vec<u8>) -> Self {
        Self { tick, state }
    }

    /// Size of the envelope on the wire, excluding the length prefix.
    pub fn encoded_len(&self) -> usize {
        8 + self.state.len()
    }

    pub fn encode(&self, writer: &mut Writer) {
        writer.put_u64(self.tick);
        writer.put_bytes(&self.state);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(self.encoded_len());
        self.encode(&mut writer);
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut reader = Reader::new(bytes);
        let tick = reader.read_u64()?;
        let state = reader.read_rest().to_vec();
        Ok(Self { tick, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = SnapshotEnvelope::new(5, vec![1, 2, 3]);
        let bytes = envelope.to_bytes();
        assert_eq!(bytes.len(), envelope.encoded_len());
        assert_eq!(SnapshotEnvelope::from_bytes(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_empty_state_is_valid() {
        let envelope = SnapshotEnvelope::new(0, Vec::new());
        let decoded = SnapshotEnvelope::from_bytes(&envelope.to_bytes()).unwrap();
        assert!(decoded.state.is_empty());
    }

    #[test]
    fn test_missing_tick_is_truncated() {
        assert!(matches!(
            SnapshotEnvelope::from_bytes(&[1, 2, 3]),
            Err(FormatError::Truncated { .. })
        ));
    }
}
