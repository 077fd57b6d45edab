//! Datagram framing for the UDP transport
//!
//! Messages that fit in one datagram go out whole. Larger ones (snapshots)
//! are split into numbered fragments and reassembled on the other side.
//!
//! ```text
//! whole:    [0x00][message bytes]
//! fragment: [0x01][u32 message id][u16 index][u16 count][chunk]
//! ```

use crate::codec::{Reader, Writer};
use crate::error::FormatError;
use log::debug;
use std::collections::HashMap;

pub const FRAME_WHOLE: u8 = 0x00;
pub const FRAME_FRAGMENT: u8 = 0x01;

pub const FRAGMENT_HEADER_LEN: usize = 1 + 4 + 2 + 2;

/// Default largest datagram the transport sends.
pub const DEFAULT_DATAGRAM_BUDGET: usize = 1200;

/// Smallest usable budget: a fragment header plus at least one byte.
pub const MIN_DATAGRAM_BUDGET: usize = FRAGMENT_HEADER_LEN + 1;

/// Splits outgoing messages into datagrams.
#[derive(Debug)]
pub struct Fragmenter {
    budget: usize,
    next_message_id: u32,
}

impl Fragmenter {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(MIN_DATAGRAM_BUDGET),
            next_message_id: 0,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Frames `message` into one or more datagrams, in send order.
    ///
    /// Fails when the message needs more fragments than a u16 count can hold.
    pub fn frame(&mut self, message: &[u8]) -> Result<Vec<Vec<u8>>, FormatError> {
        if message.len() < self.budget {
            let mut datagram = Vec::with_capacity(message.len() + 1);
            datagram.push(FRAME_WHOLE);
            datagram.extend_from_slice(message);
            return Ok(vec![datagram]);
        }

        let chunk_len = self.budget - FRAGMENT_HEADER_LEN;
        let count = u16::try_from(message.len().div_ceil(chunk_len)).map_err(|_| {
            FormatError::LengthLimit {
                declared: message.len(),
                max: self.max_message_len(),
            }
        })?;
        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        Ok(message
            .chunks(chunk_len)
            .enumerate()
            .map(|(index, chunk)| {
                let mut writer = Writer::with_capacity(FRAGMENT_HEADER_LEN + chunk.len());
                writer.put_u8(FRAME_FRAGMENT);
                writer.put_u32(message_id);
                writer.put_u16(index as u16);
                writer.put_u16(count);
                writer.put_bytes(chunk);
                writer.finish()
            })
            .collect())
    }

    /// Largest message this fragmenter can represent.
    pub fn max_message_len(&self) -> usize {
        (self.budget - FRAGMENT_HEADER_LEN) * u16::MAX as usize
    }
}

#[derive(Debug)]
struct Partial {
    count: u16,
    received: usize,
    chunks: Vec<Option<Vec<u8>>>,
    bytes: usize,
}

/// Rebuilds messages from incoming datagrams of a single peer.
///
/// Holds at most `max_partials` incomplete messages; when a new one arrives
/// beyond that, the oldest (lowest id) is abandoned.
#[derive(Debug)]
pub struct Reassembler {
    max_message_len: usize,
    max_partials: usize,
    partials: HashMap<u32, Partial>,
}

impl Reassembler {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            max_message_len,
            max_partials: 4,
            partials: HashMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    /// Feeds one datagram. Returns a complete message when one is ready.
    pub fn accept(&mut self, datagram: &[u8]) -> Result<Option<Vec<u8>>, FormatError> {
        let mut reader = Reader::new(datagram);
        let kind = reader.read_u8().map_err(|_| FormatError::Empty)?;
        match kind {
            FRAME_WHOLE => {
                let message = reader.read_rest();
                if message.len() > self.max_message_len {
                    return Err(FormatError::LengthLimit {
                        declared: message.len(),
                        max: self.max_message_len,
                    });
                }
                Ok(Some(message.to_vec()))
            }
            FRAME_FRAGMENT => {
                let message_id = reader.read_u32()?;
                let index = reader.read_u16()?;
                let count = reader.read_u16()?;
                let chunk = reader.read_rest();
                self.accept_fragment(message_id, index, count, chunk)
            }
            other => Err(FormatError::UnknownFrameKind(other)),
        }
    }

    fn accept_fragment(
        &mut self,
        message_id: u32,
        index: u16,
        count: u16,
        chunk: &[u8],
    ) -> Result<Option<Vec<u8>>, FormatError> {
        if index >= count {
            return Err(FormatError::FragmentIndex { index, count });
        }

        if !self.partials.contains_key(&message_id) {
            self.evict_oldest_if_full();
            self.partials.insert(
                message_id,
                Partial {
                    count,
                    received: 0,
                    chunks: vec![None; count as usize],
                    bytes: 0,
                },
            );
        }

        let Some(partial) = self.partials.get_mut(&message_id) else {
            return Ok(None);
        };
        if partial.count != count {
            let first = partial.count;
            self.partials.remove(&message_id);
            return Err(FormatError::FragmentCount { first, later: count });
        }

        let slot = &mut partial.chunks[index as usize];
        if slot.is_some() {
            return Ok(None);
        }

        partial.bytes += chunk.len();
        if partial.bytes > self.max_message_len {
            let declared = partial.bytes;
            self.partials.remove(&message_id);
            return Err(FormatError::LengthLimit {
                declared,
                max: self.max_message_len,
            });
        }
        *slot = Some(chunk.to_vec());
        partial.received += 1;

        if partial.received < partial.count as usize {
            return Ok(None);
        }

        let partial = match self.partials.remove(&message_id) {
            Some(partial) => partial,
            None => return Ok(None),
        };
        let mut message = Vec::with_capacity(partial.bytes);
        for chunk in partial.chunks.into_iter().flatten() {
            message.extend_from_slice(&chunk);
        }
        Ok(Some(message))
    }

    fn evict_oldest_if_full(&mut self) {
        if self.partials.len() < self.max_partials {
            return;
        }
        if let Some(oldest) = self.partials.keys().min().copied() {
            debug!("Abandoning incomplete message {}", oldest);
            self.partials.remove(&oldest);
        }
    }
}
