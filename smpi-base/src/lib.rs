//! SMPI base data structures and traits.
//!
//! Everything shared between the user-facing `smpi` crate and the transport
//! providers lives here: rank and tag types, the error type, plain-old-data
//! buffer handling, the wire packet and the provider interface.

mod buffer;
pub use buffer::{as_bytes, as_bytes_mut, read_elements, Element};
mod error;
pub use error::{Error, Result};
mod packet;
pub use packet::{Header, Packet};
mod provider;
pub use provider::{Mailbox, Provider, Snapshot};

/// Zero-based identity of a process within a group.
pub type Rank = i32;

/// Message tag used for matching sends with receives.
pub type Tag = i32;

/// Wildcard source for receives and probes.
pub const ANY_SOURCE: Rank = -1;

/// Wildcard tag for receives and probes.
pub const ANY_TAG: Tag = -1;
