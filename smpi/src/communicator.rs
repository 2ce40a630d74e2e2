//! Communicator with external application-level API.
//!
//! Point to point operations live in `p2p`, collectives in `collective`.
use std::cell::RefCell;
use std::rc::Rc;
use log::debug;
use smpi_base::{Element, Error, Packet, Rank, Result, Tag, ANY_SOURCE, ANY_TAG};
use crate::collective::ReduceOp;
use crate::datatype::Datatype;
use crate::group::Group;
use crate::request::Matcher;
use crate::topology::CartesianTopology;
use crate::Handle;

/// An addressing space over a group of processes.
///
/// Messages sent on one communicator are only ever matched by receives on
/// the same communicator, even if another one spans the same group.
pub struct Communicator {
    pub(crate) handle: Rc<RefCell<Handle>>,
    group: Group,

    /// Context id shared by every member
    context: u32,

    topology: Option<Rc<CartesianTopology>>,
}

impl Communicator {
    /// Internal initialization function.
    pub(crate) fn new(
        handle: Rc<RefCell<Handle>>,
        group: Group,
        context: u32,
        topology: Option<Rc<CartesianTopology>>,
    ) -> Communicator {
        Communicator {
            handle,
            group,
            context,
            topology,
        }
    }

    /// Return the rank of this process.
    pub fn rank(&self) -> Rank {
        self.group.rank()
    }

    /// Return number of members in the process group.
    pub fn size(&self) -> usize {
        self.group.size()
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Cartesian mapping, if the communicator was built with one.
    pub fn cartesian(&self) -> Option<&CartesianTopology> {
        self.topology.as_deref()
    }

    /// Coordinates of this process in the cartesian grid.
    pub fn coords(&self) -> Result<Vec<usize>> {
        self.require_cartesian()?.coords_of(self.rank())
    }

    /// Source and destination ranks for a shift of `disp` along `dim`.
    pub fn shift(&self, dim: usize, disp: isize) -> Result<(Option<Rank>, Option<Rank>)> {
        self.require_cartesian()?.shift(self.rank(), dim, disp)
    }

    fn require_cartesian(&self) -> Result<&CartesianTopology> {
        self.cartesian()
            .ok_or_else(|| Error::TopologyShape("communicator has no cartesian topology".to_string()))
    }

    /// Create a communicator with the same group and topology but its own
    /// addressing space. Collective.
    pub fn duplicate(&self) -> Result<Communicator> {
        let context = self.agree_context()?;
        debug!("rank {}: duplicated context {} as {}", self.rank(), self.context, context);
        Ok(Communicator::new(
            Rc::clone(&self.handle),
            self.group.clone(),
            context,
            self.topology.clone(),
        ))
    }

    /// Create a communicator laid out on a cartesian grid. Collective.
    ///
    /// `dims` must multiply to the group size. Reordering is accepted but the
    /// identity mapping is kept, so ranks in the new communicator equal ranks
    /// in this one.
    pub fn make_cartesian(
        &self,
        dims: &[usize],
        periodic: &[bool],
        reorder: bool,
    ) -> Result<(Communicator, CartesianTopology)> {
        let topology = CartesianTopology::new(self.size(), dims, periodic, reorder)?;
        let context = self.agree_context()?;
        debug!(
            "rank {}: cartesian grid {:?} on context {}",
            self.rank(),
            topology.dims(),
            context
        );
        let comm = Communicator::new(
            Rc::clone(&self.handle),
            self.group.clone(),
            context,
            Some(Rc::new(topology.clone())),
        );
        Ok((comm, topology))
    }

    /// Release the communicator. Requests started on it stay valid.
    pub fn release(self) {}

    /// Pick a context id unused by every member.
    fn agree_context(&self) -> Result<u32> {
        let proposal = self.handle.borrow().next_context();
        let mut agreed = [0u32];
        self.allreduce(&[proposal], &mut agreed, ReduceOp::Max)?;
        self.handle.borrow_mut().claim_context(agreed[0]);
        Ok(agreed[0])
    }

    pub(crate) fn p2p_context(&self) -> u32 {
        self.context << 1
    }

    pub(crate) fn collective_context(&self) -> u32 {
        (self.context << 1) | 1
    }

    pub(crate) fn check_dest(&self, dest: Rank, tag: Tag) -> Result<Rank> {
        if tag < 0 {
            return Err(Error::InvalidTag(tag));
        }
        self.group.world_rank(dest)
    }

    pub(crate) fn matcher(&self, context: u32, source: Rank, tag: Tag) -> Result<Matcher> {
        if tag < 0 && tag != ANY_TAG {
            return Err(Error::InvalidTag(tag));
        }
        let world_source = if source == ANY_SOURCE {
            None
        } else {
            Some(self.group.world_rank(source)?)
        };
        Ok(Matcher {
            context,
            source,
            tag,
            world_source,
        })
    }

    /// Blocking send of an already packed payload.
    pub(crate) fn send_bytes(&self, context: u32, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let world = self.check_dest(dest, tag)?;
        let packet = Packet::new(context, self.rank(), tag, payload);
        self.handle.borrow_mut().send_packet(world, packet)
    }

    /// Blocking receive of a whole packet.
    pub(crate) fn recv_packet(&self, context: u32, source: Rank, tag: Tag) -> Result<Packet> {
        let matcher = self.matcher(context, source, tag)?;
        self.handle.borrow_mut().recv_packet(matcher)
    }
}

/// Check that a descriptor describes elements of type `T`.
pub(crate) fn check_element<T: Element>(datatype: &Datatype) -> Result<()> {
    if datatype.element_size() != T::size() {
        return Err(Error::DescriptorShape(format!(
            "descriptor has {} byte elements, buffer has {} byte elements",
            datatype.element_size(),
            T::size()
        )));
    }
    Ok(())
}

/// Committed contiguous descriptor for `count` elements of `T`.
pub(crate) fn contiguous<T: Element>(count: usize) -> Result<Datatype> {
    Datatype::contiguous(count, T::size())?.commit()
}
