//! Error types shared by every SMPI crate.
use crate::{Rank, Tag};
use thiserror::Error;

/// Result type for SMPI operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The declared group size does not match the bootstrapped processes.
    #[error("group size mismatch: expected {expected} processes, found {actual}")]
    GroupSize { expected: usize, actual: usize },

    /// Cartesian dimensions do not describe the group.
    #[error("invalid topology shape: {0}")]
    TopologyShape(String),

    /// A data descriptor is malformed or does not fit its buffer.
    #[error("invalid descriptor shape: {0}")]
    DescriptorShape(String),

    /// A descriptor was used before commit or after release.
    #[error("descriptor used outside its lifecycle: {0}")]
    DescriptorLifecycle(&'static str),

    /// No matching message can ever arrive.
    #[error("no matching message from source {peer} with tag {tag}")]
    NoMatch { peer: Rank, tag: Tag },

    /// The request had already completed.
    #[error("request already completed")]
    AlreadyCompleted,

    /// Members of a collective disagree on its shape.
    #[error("collective mismatch: {0}")]
    CollectiveMismatch(String),

    /// Rank outside of the communicator.
    #[error("invalid rank: {0}")]
    InvalidRank(Rank),

    /// Tag outside of the valid range.
    #[error("invalid tag: {0}")]
    InvalidTag(Tag),

    /// Incoming message larger than the receive buffer.
    #[error("message truncated: capacity {capacity} bytes, received {received} bytes")]
    Truncated { capacity: usize, received: usize },

    /// Waited on a request that was cancelled.
    #[error("request was cancelled")]
    Cancelled,

    /// Bad bootstrap configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport to a peer is gone.
    #[error("peer {0} is disconnected")]
    Disconnected(Rank),

    /// Malformed data on the wire.
    #[error("wire format error: {0}")]
    Wire(String),

    /// I/O failure in a transport.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// io::Error is not Clone; the copy keeps its kind and message.
impl Clone for Error {
    fn clone(&self) -> Error {
        match self {
            Error::GroupSize { expected, actual } => Error::GroupSize {
                expected: *expected,
                actual: *actual,
            },
            Error::TopologyShape(msg) => Error::TopologyShape(msg.clone()),
            Error::DescriptorShape(msg) => Error::DescriptorShape(msg.clone()),
            Error::DescriptorLifecycle(msg) => Error::DescriptorLifecycle(msg),
            Error::NoMatch { peer, tag } => Error::NoMatch {
                peer: *peer,
                tag: *tag,
            },
            Error::AlreadyCompleted => Error::AlreadyCompleted,
            Error::CollectiveMismatch(msg) => Error::CollectiveMismatch(msg.clone()),
            Error::InvalidRank(rank) => Error::InvalidRank(*rank),
            Error::InvalidTag(tag) => Error::InvalidTag(*tag),
            Error::Truncated { capacity, received } => Error::Truncated {
                capacity: *capacity,
                received: *received,
            },
            Error::Cancelled => Error::Cancelled,
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::Disconnected(rank) => Error::Disconnected(*rank),
            Error::Wire(msg) => Error::Wire(msg.clone()),
            Error::Io(err) => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Error {
        match *err {
            bincode::ErrorKind::Io(err) => Error::Io(err),
            other => Error::Wire(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn no_match_names_the_peer() {
        let err = Error::NoMatch { peer: 3, tag: 7 };
        assert_eq!(err.to_string(), "no matching message from source 3 with tag 7");
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn cloned_io_error_keeps_kind() {
        let err = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"));
        match err.clone() {
            Error::Io(copy) => {
                assert_eq!(copy.kind(), io::ErrorKind::BrokenPipe);
                assert!(copy.to_string().contains("peer hung up"));
            }
            other => panic!("unexpected clone {other:?}"),
        }
    }
}
