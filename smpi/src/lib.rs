//! Safe MPI (SMPI) library.
//!
//! A small message-passing runtime: a fixed group of ranks exchanging typed
//! messages point to point or through collectives, over in-process channels
//! or TCP.
//!
//! ```no_run
//! let ctx = smpi::init().unwrap();
//! let world = ctx.world();
//! let mut total = [0i64];
//! world.reduce(0, &[i64::from(world.rank())], &mut total, smpi::ReduceOp::Sum).unwrap();
//! ```
use std::collections::VecDeque;
use std::time::Instant;
use log::{debug, info, warn};
use smpi_base::{Header, Packet, Snapshot};
use smpi_p2p_tcp::TcpP2P;
use smpi_runtime::Runtime;

pub use smpi_base::{Element, Error, Provider, Rank, Result, Tag, ANY_SOURCE, ANY_TAG};

mod collective;
pub use collective::{Reduce, ReduceOp};
mod communicator;
pub use communicator::Communicator;
mod context;
pub use context::Context;
mod datatype;
pub use datatype::{Block, Datatype, Kind};
mod group;
pub use group::Group;
pub mod local;
mod p2p;
mod request;
pub use request::{test_all, wait_all, wait_any, Request, Status};
use request::{Matcher, RequestTable, Slot};
mod topology;
pub use topology::{dims_create, CartesianTopology};

/// Per-process state shared by every communicator of a context.
pub(crate) struct Handle {
    provider: Box<dyn Provider>,

    /// Outstanding requests
    pub(crate) requests: RequestTable,

    /// Arrived packets no receive was posted for, in arrival order
    unexpected: VecDeque<Packet>,

    /// Next free communication context
    next_context: u32,

    /// Time of initialization
    start: Instant,

    /// Set once the provider has been shut down
    closed: bool,
}

impl Handle {
    pub(crate) fn new(provider: Box<dyn Provider>) -> Handle {
        Handle {
            provider,
            requests: RequestTable::default(),
            unexpected: VecDeque::new(),
            // Context 0 belongs to the world communicator
            next_context: 1,
            start: Instant::now(),
            closed: false,
        }
    }

    pub(crate) fn rank(&self) -> Rank {
        self.provider.rank()
    }

    pub(crate) fn size(&self) -> usize {
        self.provider.size()
    }

    pub(crate) fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub(crate) fn next_context(&self) -> u32 {
        self.next_context
    }

    /// Reserve `context` and everything below it.
    pub(crate) fn claim_context(&mut self, context: u32) {
        self.next_context = self.next_context.max(context + 1);
    }

    /// Move arrived packets to matching receives or the unexpected queue.
    pub(crate) fn progress(&mut self) -> Snapshot {
        let (packets, snapshot) = self.provider.mailbox().drain();
        for packet in packets {
            if let Some(packet) = self.requests.deliver(packet) {
                self.unexpected.push_back(packet);
            }
        }
        snapshot
    }

    pub(crate) fn wait_change(&self, epoch: u64) {
        self.provider.mailbox().wait_change(epoch);
    }

    pub(crate) fn send_packet(&mut self, dest: Rank, packet: Packet) -> Result<()> {
        if self.closed {
            return Err(Error::Disconnected(self.rank()));
        }
        self.provider.send(dest, packet)
    }

    /// Block until a packet matching `matcher` arrives and take it.
    pub(crate) fn recv_packet(&mut self, matcher: Matcher) -> Result<Packet> {
        let id = self.post_recv(matcher);
        if let Err(err) = self.wait_slot(id) {
            self.requests.remove(id);
            return Err(err);
        }
        match self.requests.remove(id) {
            Some(Slot::Matched(packet)) => Ok(packet),
            _ => Err(Error::Wire("receive completed without a message".to_string())),
        }
    }

    /// Eager send; the returned request is already complete.
    pub(crate) fn post_send(&mut self, dest: Rank, packet: Packet, count: usize) -> Result<usize> {
        let status = Status {
            source: packet.header.source,
            tag: packet.header.tag,
            count,
        };
        self.send_packet(dest, packet)?;
        Ok(self.requests.add(Slot::Complete(status)))
    }

    /// Post a receive, matching against already arrived packets first.
    pub(crate) fn post_recv(&mut self, matcher: Matcher) -> usize {
        self.progress();
        match self.take_unexpected(&matcher) {
            Some(packet) => self.requests.add(Slot::Matched(packet)),
            None => self.requests.add(Slot::Posted(matcher)),
        }
    }

    fn take_unexpected(&mut self, matcher: &Matcher) -> Option<Packet> {
        let pos = self
            .unexpected
            .iter()
            .position(|packet| matcher.matches(&packet.header))?;
        self.unexpected.remove(pos)
    }

    /// Header of the earliest arrived packet matching, without receiving it.
    pub(crate) fn peek(&mut self, matcher: &Matcher) -> Option<Header> {
        self.progress();
        self.unexpected
            .iter()
            .map(|packet| packet.header)
            .find(|header| matcher.matches(header))
    }

    /// Block until a matching packet has arrived.
    pub(crate) fn wait_peek(&mut self, matcher: &Matcher) -> Result<Header> {
        loop {
            let snapshot = self.progress();
            if let Some(header) = self
                .unexpected
                .iter()
                .map(|packet| packet.header)
                .find(|header| matcher.matches(header))
            {
                return Ok(header);
            }
            if self.unreachable(matcher, &snapshot) {
                return Err(Error::NoMatch {
                    peer: matcher.source,
                    tag: matcher.tag,
                });
            }
            self.wait_change(snapshot.epoch);
        }
    }

    /// Block until the request in slot `id` is no longer posted.
    pub(crate) fn wait_slot(&mut self, id: usize) -> Result<()> {
        loop {
            let snapshot = self.progress();
            if !matches!(self.requests.get(id), Some(Slot::Posted(_))) {
                return Ok(());
            }
            self.check_reachable(&[id], &snapshot)?;
            self.wait_change(snapshot.epoch);
        }
    }

    /// Whether no peer that could satisfy `matcher` is still connected.
    fn unreachable(&self, matcher: &Matcher, snapshot: &Snapshot) -> bool {
        let me = self.rank();
        match matcher.world_source {
            // A blocked rank can never send to itself
            Some(source) => source == me || snapshot.is_closed(source),
            None => snapshot.all_closed_except(me),
        }
    }

    /// Fail with `NoMatch` if none of the posted requests can ever match.
    pub(crate) fn check_reachable(&self, ids: &[usize], snapshot: &Snapshot) -> Result<()> {
        let mut first = None;
        for &id in ids {
            match self.requests.get(id) {
                Some(Slot::Posted(matcher)) => {
                    if !self.unreachable(matcher, snapshot) {
                        return Ok(());
                    }
                    first.get_or_insert(*matcher);
                }
                _ => return Ok(()),
            }
        }
        match first {
            Some(matcher) => {
                debug!(
                    "no reachable sender for receive (source {}, tag {})",
                    matcher.source, matcher.tag
                );
                Err(Error::NoMatch {
                    peer: matcher.source,
                    tag: matcher.tag,
                })
            }
            None => Ok(()),
        }
    }

    /// Shut the provider down once. Later sends fail with `Disconnected`.
    pub(crate) fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let outstanding = self.requests.outstanding();
        if outstanding > 0 {
            warn!("finalizing rank {} with {} outstanding requests", self.rank(), outstanding);
        }
        if !self.unexpected.is_empty() {
            warn!(
                "finalizing rank {} with {} unreceived messages",
                self.rank(),
                self.unexpected.len()
            );
        }
        if let Err(err) = self.provider.shutdown() {
            warn!("provider shutdown failed: {}", err);
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Initialize a context from the environment and connect to every peer.
///
/// Reads `SMPI_RANK`, `SMPI_SIZE` and `SMPI_CONN_LIST` (or a YAML file named
/// by `SMPI_CONFIG`), as set up by `smpi-exec`.
pub fn init() -> Result<Context> {
    // Initialize logging
    let _ = env_logger::try_init();
    let runtime = Runtime::from_env()?;
    info!("rank {} of {}: connecting", runtime.rank(), runtime.size());
    let provider = TcpP2P::connect(runtime.rank(), runtime.peers())?;
    info!("rank {}: connected", runtime.rank());
    Ok(Context::new(Box::new(provider)))
}
