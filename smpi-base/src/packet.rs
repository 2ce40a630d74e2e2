//! Wire unit exchanged by providers.
use serde::{Deserialize, Serialize};
use crate::{Rank, Tag};

/// Fixed-size message header.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// Communication context (communicator and traffic class).
    pub context: u32,

    /// Rank of the sender within the communicator.
    pub source: Rank,

    /// Message tag.
    pub tag: Tag,

    /// Payload length in bytes.
    pub len: u64,
}

/// A header together with its packed payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(context: u32, source: Rank, tag: Tag, payload: Vec<u8>) -> Packet {
        Packet {
            header: Header {
                context,
                source,
                tag,
                len: payload.len() as u64,
            },
            payload,
        }
    }
}
