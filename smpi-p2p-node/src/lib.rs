//! Local provider implementation.
//!
//! Provides point-to-point communication for processes all local to the same
//! node. Each member of the group runs on its own thread inside one OS
//! process and packets are exchanged through shared mailboxes.
use std::sync::Arc;
use log::debug;
use smpi_base::{Error, Mailbox, Packet, Provider, Rank, Result};

pub struct NodeP2P {
    /// Rank of this member
    id: Rank,

    /// Mailboxes of every member, indexed by rank
    mailboxes: Arc<Vec<Mailbox>>,

    /// Set once this member has shut down
    closed: bool,
}

impl NodeP2P {
    /// Create the providers of a new group of the given size, in rank order.
    pub fn group(size: usize) -> Vec<NodeP2P> {
        let mailboxes: Arc<Vec<Mailbox>> = Arc::new((0..size).map(|_| Mailbox::new(size)).collect());
        (0..size)
            .map(|id| NodeP2P {
                id: id as Rank,
                mailboxes: Arc::clone(&mailboxes),
                closed: false,
            })
            .collect()
    }

    fn own(&self) -> &Mailbox {
        &self.mailboxes[self.id as usize]
    }
}

impl Provider for NodeP2P {
    fn rank(&self) -> Rank {
        self.id
    }

    fn size(&self) -> usize {
        self.mailboxes.len()
    }

    fn send(&self, dest: Rank, packet: Packet) -> Result<()> {
        if self.closed {
            return Err(Error::Disconnected(self.id));
        }
        let mailbox = usize::try_from(dest)
            .ok()
            .and_then(|i| self.mailboxes.get(i))
            .ok_or(Error::InvalidRank(dest))?;
        mailbox.push(packet);
        Ok(())
    }

    fn mailbox(&self) -> &Mailbox {
        self.own()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        debug!("node provider {} shutting down", self.id);
        self.closed = true;
        for (i, mailbox) in self.mailboxes.iter().enumerate() {
            if i as Rank != self.id {
                mailbox.close(self.id);
            }
        }
        Ok(())
    }
}

impl Drop for NodeP2P {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_reach_the_destination_mailbox() {
        let group = NodeP2P::group(3);
        group[0].send(2, Packet::new(0, 0, 4, vec![1, 2])).unwrap();
        group[1].send(2, Packet::new(0, 1, 4, vec![3])).unwrap();
        let (packets, _) = group[2].mailbox().drain();
        let sources: Vec<Rank> = packets.iter().map(|p| p.header.source).collect();
        assert_eq!(sources, vec![0, 1]);
        assert!(group[0].mailbox().drain().0.is_empty());
    }

    #[test]
    fn shutdown_closes_link_at_peers() {
        let mut group = NodeP2P::group(2);
        group[1].shutdown().unwrap();
        assert!(group[0].mailbox().drain().1.is_closed(1));
        assert!(matches!(
            group[1].send(0, Packet::new(0, 1, 0, vec![])),
            Err(Error::Disconnected(1))
        ));
    }

    #[test]
    fn sending_outside_the_group_fails() {
        let group = NodeP2P::group(2);
        assert!(matches!(
            group[0].send(5, Packet::new(0, 0, 0, vec![])),
            Err(Error::InvalidRank(5))
        ));
    }
}
