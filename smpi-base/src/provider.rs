//! Point to point provider interface.
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use log::trace;
use crate::{Packet, Rank, Result};

/// A transport that moves packets between the processes of a group.
///
/// Providers are reliable and deliver packets from any one sender in the
/// order they were sent. Incoming packets are collected in a `Mailbox` that
/// the matching engine drains.
pub trait Provider {
    /// Rank of this process in the bootstrapped group.
    fn rank(&self) -> Rank;

    /// Number of processes in the bootstrapped group.
    fn size(&self) -> usize;

    /// Eagerly send a packet to another process (or to this one).
    ///
    /// Returns once the packet has been handed to the transport; the payload
    /// is owned by the provider from then on.
    fn send(&self, dest: Rank, packet: Packet) -> Result<()>;

    /// Mailbox receiving packets addressed to this process.
    fn mailbox(&self) -> &Mailbox;

    /// Close all outgoing links. Further sends fail.
    fn shutdown(&mut self) -> Result<()>;
}

/// Incoming packet queue shared between a provider and the matching engine.
pub struct Mailbox {
    state: Mutex<MailboxState>,
    cond: Condvar,
}

struct MailboxState {
    /// Packets in arrival order
    queue: VecDeque<Packet>,

    /// Peers that will never deliver again, indexed by rank
    closed: Vec<bool>,

    /// Bumped on every push or close
    epoch: u64,
}

/// State of a mailbox observed together with a drain.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Epoch at the time of the drain.
    pub epoch: u64,

    /// Peers closed at the time of the drain.
    pub closed: Vec<bool>,
}

impl Snapshot {
    /// Whether `peer` has closed its link.
    pub fn is_closed(&self, peer: Rank) -> bool {
        usize::try_from(peer)
            .ok()
            .and_then(|i| self.closed.get(i).copied())
            .unwrap_or(true)
    }

    /// Whether every peer other than `me` has closed its link.
    pub fn all_closed_except(&self, me: Rank) -> bool {
        self.closed
            .iter()
            .enumerate()
            .all(|(i, closed)| *closed || i as Rank == me)
    }
}

impl Mailbox {
    /// Create a mailbox for a group of the given size.
    pub fn new(size: usize) -> Mailbox {
        Mailbox {
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                closed: vec![false; size],
                epoch: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an incoming packet.
    pub fn push(&self, packet: Packet) {
        trace!(
            "mailbox push: context {} source {} tag {} ({} bytes)",
            packet.header.context,
            packet.header.source,
            packet.header.tag,
            packet.payload.len(),
        );
        let mut state = self.lock();
        state.queue.push_back(packet);
        state.epoch += 1;
        self.cond.notify_all();
    }

    /// Record that `peer` will never deliver another packet.
    pub fn close(&self, peer: Rank) {
        let mut state = self.lock();
        if let Some(closed) = usize::try_from(peer).ok().and_then(|i| state.closed.get_mut(i)) {
            *closed = true;
        }
        state.epoch += 1;
        self.cond.notify_all();
    }

    /// Take every queued packet, along with the closure state at that moment.
    pub fn drain(&self) -> (Vec<Packet>, Snapshot) {
        let mut state = self.lock();
        let packets = state.queue.drain(..).collect();
        let snapshot = Snapshot {
            epoch: state.epoch,
            closed: state.closed.clone(),
        };
        (packets, snapshot)
    }

    /// Block until something happens after `epoch` was observed.
    pub fn wait_change(&self, epoch: u64) {
        let mut state = self.lock();
        while state.epoch == epoch {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drain_returns_packets_in_arrival_order() {
        let mailbox = Mailbox::new(2);
        mailbox.push(Packet::new(0, 1, 5, vec![1]));
        mailbox.push(Packet::new(0, 1, 5, vec![2]));
        let (packets, snapshot) = mailbox.drain();
        let payloads: Vec<u8> = packets.iter().map(|p| p.payload[0]).collect();
        assert_eq!(payloads, vec![1, 2]);
        assert_eq!(snapshot.epoch, 2);
        assert!(mailbox.drain().0.is_empty());
    }

    #[test]
    fn close_is_visible_in_snapshot() {
        let mailbox = Mailbox::new(3);
        mailbox.close(1);
        let (_, snapshot) = mailbox.drain();
        assert!(snapshot.is_closed(1));
        assert!(!snapshot.is_closed(2));
        assert!(snapshot.is_closed(7));
        assert!(!snapshot.all_closed_except(0));
        mailbox.close(2);
        assert!(mailbox.drain().1.all_closed_except(0));
    }

    #[test]
    fn wait_change_wakes_on_push() {
        let mailbox = Arc::new(Mailbox::new(2));
        let (_, snapshot) = mailbox.drain();
        let other = Arc::clone(&mailbox);
        let pusher = thread::spawn(move || other.push(Packet::new(0, 1, 0, vec![9])));
        mailbox.wait_change(snapshot.epoch);
        pusher.join().unwrap();
        assert_eq!(mailbox.drain().0.len(), 1);
    }
}
