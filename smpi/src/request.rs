//! Non-blocking requests and the table tracking them.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;
use log::{debug, warn};
use smpi_base::{Error, Header, Packet, Rank, Result, Tag, ANY_SOURCE, ANY_TAG};
use crate::datatype::Datatype;
use crate::Handle;

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Rank of the sender within the communicator.
    pub source: Rank,

    /// Tag the message was sent with.
    pub tag: Tag,

    /// Number of elements transferred.
    pub count: usize,
}

/// What a posted receive is waiting for.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Matcher {
    /// Communication context
    pub context: u32,

    /// Source rank within the communicator, or `ANY_SOURCE`
    pub source: Rank,

    /// Tag, or `ANY_TAG`
    pub tag: Tag,

    /// Provider rank of `source`, `None` for a wildcard
    pub world_source: Option<Rank>,
}

impl Matcher {
    pub(crate) fn matches(&self, header: &Header) -> bool {
        header.context == self.context
            && (self.source == ANY_SOURCE || self.source == header.source)
            && (self.tag == ANY_TAG || self.tag == header.tag)
    }
}

/// State of one request table entry.
pub(crate) enum Slot {
    /// Receive waiting for a message
    Posted(Matcher),

    /// Message matched but not yet copied out
    Matched(Packet),

    /// Finished send
    Complete(Status),
}

/// Table of outstanding requests, with posted receives kept in posting order
/// so that matching is FIFO.
#[derive(Default)]
pub(crate) struct RequestTable {
    /// Current requests
    slots: Vec<Option<Slot>>,

    /// Index of free slots
    free: Vec<usize>,

    /// Posted receives, oldest first
    posted: VecDeque<usize>,
}

impl RequestTable {
    /// Add a new request and return its id.
    pub(crate) fn add(&mut self, slot: Slot) -> usize {
        let posted = matches!(slot, Slot::Posted(_));
        let id = if let Some(i) = self.free.pop() {
            debug_assert!(self.slots[i].is_none());
            self.slots[i] = Some(slot);
            i
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        };
        if posted {
            self.posted.push_back(id);
        }
        id
    }

    pub(crate) fn get(&self, id: usize) -> Option<&Slot> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Remove a request from the table, whatever its state.
    pub(crate) fn remove(&mut self, id: usize) -> Option<Slot> {
        let slot = self.slots.get_mut(id).and_then(Option::take)?;
        self.posted.retain(|&i| i != id);
        self.free.push(id);
        Some(slot)
    }

    /// Hand a packet to the oldest posted receive it matches, or give it
    /// back if none does.
    pub(crate) fn deliver(&mut self, packet: Packet) -> Option<Packet> {
        let pos = self.posted.iter().position(|&id| match self.slots[id] {
            Some(Slot::Posted(ref m)) => m.matches(&packet.header),
            _ => false,
        });
        match pos.and_then(|pos| self.posted.remove(pos)) {
            Some(id) => {
                self.slots[id] = Some(Slot::Matched(packet));
                None
            }
            None => Some(packet),
        }
    }

    /// Number of requests still in the table.
    pub(crate) fn outstanding(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// What the request transfers into or out of.
enum Target<'a> {
    /// The send buffer stays borrowed until completion.
    Send(PhantomData<&'a [u8]>),

    /// Receive buffer and the descriptor to unpack with.
    Recv {
        buffer: &'a mut [u8],
        datatype: Datatype,
    },
}

#[derive(Debug, Clone)]
enum Outcome {
    Complete(Status),
    Cancelled,

    /// The message arrived but could not be delivered into the buffer.
    Failed(Error),
}

/// Handle for one outstanding non-blocking operation.
///
/// The buffer handed to the operation stays borrowed by the request until it
/// is dropped. `wait` on a completed request returns the cached `Status`.
/// Dropping a pending receive cancels it.
pub struct Request<'a> {
    /// Handle to the owning context
    handle: Rc<RefCell<Handle>>,

    /// Slot in the request table, `None` once released
    id: Option<usize>,

    target: Target<'a>,

    /// Cached result once terminal
    outcome: Option<Outcome>,
}

impl<'a> Request<'a> {
    pub(crate) fn send(handle: Rc<RefCell<Handle>>, id: usize) -> Request<'a> {
        Request {
            handle,
            id: Some(id),
            target: Target::Send(PhantomData),
            outcome: None,
        }
    }

    pub(crate) fn recv(
        handle: Rc<RefCell<Handle>>,
        id: usize,
        buffer: &'a mut [u8],
        datatype: Datatype,
    ) -> Request<'a> {
        Request {
            handle,
            id: Some(id),
            target: Target::Recv { buffer, datatype },
            outcome: None,
        }
    }

    /// Whether the request reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    fn cached(&self) -> Option<Result<Status>> {
        match self.outcome.as_ref()? {
            Outcome::Complete(status) => Some(Ok(*status)),
            Outcome::Cancelled => Some(Err(Error::Cancelled)),
            Outcome::Failed(err) => Some(Err(err.clone())),
        }
    }

    /// Move a finished table entry into the cached outcome.
    fn finish(&mut self) -> Result<Option<Status>> {
        let id = match self.id {
            Some(id) => id,
            None => return Ok(None),
        };
        let slot = {
            let mut handle = self.handle.borrow_mut();
            let finished = matches!(
                handle.requests.get(id),
                Some(Slot::Complete(_)) | Some(Slot::Matched(_))
            );
            if finished {
                handle.requests.remove(id)
            } else {
                None
            }
        };
        let status = match slot {
            Some(Slot::Complete(status)) => status,
            Some(Slot::Matched(packet)) => {
                self.id = None;
                match self.unpack(packet) {
                    Ok(status) => status,
                    Err(err) => {
                        self.outcome = Some(Outcome::Failed(err.clone()));
                        return Err(err);
                    }
                }
            }
            _ => return Ok(None),
        };
        self.id = None;
        self.outcome = Some(Outcome::Complete(status));
        Ok(Some(status))
    }

    fn unpack(&mut self, packet: Packet) -> Result<Status> {
        match self.target {
            Target::Recv {
                ref mut buffer,
                ref datatype,
            } => {
                let count = datatype.unpack(&packet.payload, buffer)?;
                Ok(Status {
                    source: packet.header.source,
                    tag: packet.header.tag,
                    count,
                })
            }
            Target::Send(_) => Err(Error::Wire("packet matched a send request".to_string())),
        }
    }

    /// Poll the request without blocking.
    ///
    /// Returns `Some(status)` once complete. Repeated calls after completion
    /// return the same status.
    pub fn test(&mut self) -> Result<Option<Status>> {
        if let Some(result) = self.cached() {
            return result.map(Some);
        }
        self.handle.borrow_mut().progress();
        self.finish()
    }

    /// Block until the request completes.
    pub fn wait(&mut self) -> Result<Status> {
        if let Some(result) = self.cached() {
            return result;
        }
        if let Some(id) = self.id {
            self.handle.borrow_mut().wait_slot(id)?;
        }
        match self.finish()? {
            Some(status) => Ok(status),
            None => self.cached().unwrap_or(Err(Error::Cancelled)),
        }
    }

    /// Cancel a pending request.
    ///
    /// Fails with `AlreadyCompleted` if the message had already arrived; the
    /// request then holds its normal result. Cancelling twice is a no-op.
    pub fn cancel(&mut self) -> Result<()> {
        match self.outcome {
            Some(Outcome::Complete(_)) | Some(Outcome::Failed(_)) => {
                return Err(Error::AlreadyCompleted)
            }
            Some(Outcome::Cancelled) => return Ok(()),
            None => (),
        }
        self.handle.borrow_mut().progress();
        if self.finish()?.is_some() {
            return Err(Error::AlreadyCompleted);
        }
        if let Some(id) = self.id.take() {
            self.handle.borrow_mut().requests.remove(id);
            debug!("cancelled request {id}");
        }
        self.outcome = Some(Outcome::Cancelled);
        Ok(())
    }
}

impl<'a> Drop for Request<'a> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let slot = self.handle.borrow_mut().requests.remove(id);
            if let Some(Slot::Matched(packet)) = slot {
                warn!(
                    "dropped request {id} with an unread message from rank {} (tag {})",
                    packet.header.source, packet.header.tag
                );
            }
        }
    }
}

/// Block until one of the requests completes, and take it out of the list.
///
/// Returns the index and status of the completed request, or `None` when
/// every entry is already `None`. A cancelled or failed request is taken
/// out as well and its error returned.
pub fn wait_any(requests: &mut [Option<Request<'_>>]) -> Result<Option<(usize, Status)>> {
    let handle = match requests.iter().flatten().next() {
        Some(req) => Rc::clone(&req.handle),
        None => return Ok(None),
    };
    loop {
        let snapshot = handle.borrow_mut().progress();
        for (i, entry) in requests.iter_mut().enumerate() {
            let done = match entry {
                Some(req) => match req.cached() {
                    Some(result) => Some(result),
                    None => req.finish().transpose(),
                },
                None => None,
            };
            if let Some(result) = done {
                *entry = None;
                return result.map(|status| Some((i, status)));
            }
        }
        let pending: Vec<usize> = requests.iter().flatten().filter_map(|r| r.id).collect();
        handle.borrow().check_reachable(&pending, &snapshot)?;
        handle.borrow().wait_change(snapshot.epoch);
    }
}

/// Block until every request completes, returning the statuses in order.
pub fn wait_all(requests: &mut [Request<'_>]) -> Result<Vec<Status>> {
    requests.iter_mut().map(Request::wait).collect()
}

/// Poll every request once; `Some` only if all of them are complete.
pub fn test_all(requests: &mut [Request<'_>]) -> Result<Option<Vec<Status>>> {
    let mut statuses = Vec::with_capacity(requests.len());
    for req in requests.iter_mut() {
        match req.test()? {
            Some(status) => statuses.push(status),
            None => return Ok(None),
        }
    }
    Ok(Some(statuses))
}
