//! Ordered process sets.
use std::rc::Rc;
use smpi_base::{Error, Rank, Result};

/// An ordered set of processes, with this process's position in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Provider rank of each member, indexed by group rank
    members: Rc<[Rank]>,

    /// Group rank of this process
    rank: Rank,
}

impl Group {
    pub(crate) fn world(rank: Rank, size: usize) -> Group {
        Group {
            members: (0..size as Rank).collect(),
            rank,
        }
    }

    /// Rank of this process in the group.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Provider rank of the member at `rank`.
    pub(crate) fn world_rank(&self, rank: Rank) -> Result<Rank> {
        usize::try_from(rank)
            .ok()
            .and_then(|i| self.members.get(i).copied())
            .ok_or(Error::InvalidRank(rank))
    }

    /// Fail with `GroupSize` unless there are exactly `expected` members.
    pub fn expect_size(&self, expected: usize) -> Result<()> {
        if self.size() == expected {
            Ok(())
        } else {
            Err(Error::GroupSize {
                expected,
                actual: self.size(),
            })
        }
    }
}
