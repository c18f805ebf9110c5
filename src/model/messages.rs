use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tracing::debug;

use crate::model::routing::{is_valid_router_id, RouterId, INFINITY};

/// The only supported command; request messages are not implemented.
pub const RESPONSE_COMMAND: u8 = 2;
pub const RIP_VERSION: u8 = 2;
pub const AF_INET: u16 = 2;

pub const HEADER_LEN: usize = 4;
pub const ENTRY_LEN: usize = 20;

/// Upper bound on table entries per frame; the direct-link entry appended
/// per datagram comes on top of this.
pub const MAX_FRAME_ROUTES: usize = 25;

/// One advertised route as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    pub dest: RouterId,
    pub next_hop: RouterId,
    pub metric: u8,
}

/// A RIP Response frame: 4-byte header followed by 20-byte entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub sender: RouterId,
    pub entries: Vec<FrameEntry>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame length {0} is not a header plus a whole number of entries")]
    BadLength(usize),
    #[error("unsupported command {0}")]
    BadCommand(u8),
    #[error("unsupported version {0}")]
    BadVersion(u8),
    #[error("sending router id {0} out of range")]
    BadSender(u16),
    #[error("entry {index} carries address family {afi}")]
    BadAddressFamily { index: usize, afi: u16 },
}

impl ResponseFrame {
    pub fn new(sender: RouterId) -> Self {
        Self {
            sender,
            entries: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + ENTRY_LEN * self.entries.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(RESPONSE_COMMAND);
        buf.put_u8(RIP_VERSION);
        buf.put_u16_le(self.sender);
        for entry in &self.entries {
            buf.put_u16_le(AF_INET);
            buf.put_u16_le(0);
            buf.put_u16_le(entry.dest);
            buf.put_u16_le(0);
            buf.put_u32_le(0);
            buf.put_u16_le(entry.next_hop);
            buf.put_u16_le(0);
            buf.put_u32_le(u32::from(entry.metric));
        }
        buf.to_vec()
    }

    /// Decode one datagram. Header problems and a wrong address family
    /// reject the whole frame; an entry with an out-of-range id or metric
    /// is skipped while the rest of the frame is kept.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN + ENTRY_LEN || (data.len() - HEADER_LEN) % ENTRY_LEN != 0 {
            return Err(DecodeError::BadLength(data.len()));
        }

        let mut buf = data;
        let command = buf.get_u8();
        if command != RESPONSE_COMMAND {
            return Err(DecodeError::BadCommand(command));
        }
        let version = buf.get_u8();
        if version != RIP_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let sender = buf.get_u16_le();
        if !is_valid_router_id(sender) {
            return Err(DecodeError::BadSender(sender));
        }

        let count = (data.len() - HEADER_LEN) / ENTRY_LEN;
        let mut entries = Vec::with_capacity(count);
        for index in 0..count {
            let afi = buf.get_u16_le();
            if afi != AF_INET {
                return Err(DecodeError::BadAddressFamily { index, afi });
            }
            buf.advance(2);
            let dest = buf.get_u16_le();
            buf.advance(2);
            buf.advance(4);
            let next_hop = buf.get_u16_le();
            buf.advance(2);
            let metric = buf.get_u32_le();

            if !is_valid_router_id(dest) || !is_valid_router_id(next_hop) {
                debug!(sender, index, dest, next_hop, "skipping entry with bad router id");
                continue;
            }
            if metric > u32::from(INFINITY) {
                debug!(sender, index, metric, "skipping entry with bad metric");
                continue;
            }
            entries.push(FrameEntry {
                dest,
                next_hop,
                metric: metric as u8,
            });
        }

        Ok(Self { sender, entries })
    }
}
