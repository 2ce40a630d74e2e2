//! Collective operations.
//!
//! Every member of a communicator has to call the same collective, in the
//! same order, with the same root. Each message starts with a small frame
//! describing the operation as the sender saw it; a receiver that disagrees
//! fails with `CollectiveMismatch` and passes an abort frame on to the ranks
//! still waiting on it. Detection is best effort: a mismatch seen only at
//! the root of a gather, for instance, is not reported to leaves that have
//! already returned.
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use smpi_base::{as_bytes, as_bytes_mut, read_elements, Element, Error, Rank, Result, Tag};
use crate::communicator::Communicator;

/// All collective traffic uses one tag on the collective context, so that a
/// rank in the wrong operation receives the frame and notices.
const COLLECTIVE_TAG: Tag = 0;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
enum CollectiveOp {
    Barrier,
    Broadcast,
    Scatter,
    Gather,
    Reduce,
}

/// Prefix of every collective message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
struct Frame {
    op: CollectiveOp,
    root: Rank,

    /// Elements carried per rank
    count: u64,
    element_size: u32,

    /// Set when the sender failed; the message carries no data
    abort: bool,
}

impl Frame {
    fn new<T: Element>(op: CollectiveOp, root: Rank, count: usize) -> Frame {
        Frame {
            op,
            root,
            count: count as u64,
            element_size: T::size() as u32,
            abort: false,
        }
    }

    fn aborted(mut self) -> Frame {
        self.abort = true;
        self
    }

    /// Compare a received frame against what this rank expects.
    fn check(&self, received: &Frame, source: Rank) -> Result<()> {
        if received.abort {
            return Err(Error::CollectiveMismatch(format!(
                "{:?} aborted by rank {source}",
                received.op
            )));
        }
        if received.op != self.op || received.root != self.root {
            return Err(Error::CollectiveMismatch(format!(
                "expected {:?} with root {}, rank {source} is in {:?} with root {}",
                self.op, self.root, received.op, received.root
            )));
        }
        if received.count != self.count || received.element_size != self.element_size {
            return Err(Error::CollectiveMismatch(format!(
                "{:?}: expected {} elements of {} bytes, rank {source} has {} elements of {} bytes",
                self.op, self.count, self.element_size, received.count, received.element_size
            )));
        }
        Ok(())
    }
}

/// Built-in reduction operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
}

/// Element types the built-in operators apply to. Integer arithmetic
/// wraps on overflow.
pub trait Reduce: Element {
    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;
}

macro_rules! impl_reduce_int {
    ($($ty:ident),*) => {
        $(impl Reduce for $ty {
            fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                match op {
                    ReduceOp::Sum => a.wrapping_add(b),
                    ReduceOp::Prod => a.wrapping_mul(b),
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                }
            }
        })*
    };
}

macro_rules! impl_reduce_float {
    ($($ty:ident),*) => {
        $(impl Reduce for $ty {
            fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                match op {
                    ReduceOp::Sum => a + b,
                    ReduceOp::Prod => a * b,
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                }
            }
        })*
    };
}

impl_reduce_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
impl_reduce_float!(f32, f64);

impl Communicator {
    fn check_root(&self, root: Rank) -> Result<()> {
        if usize::try_from(root).map_or(true, |r| r >= self.size()) {
            return Err(Error::InvalidRank(root));
        }
        Ok(())
    }

    /// Rank relative to `root`, and back.
    fn relative(&self, root: Rank) -> usize {
        (self.rank() - root).rem_euclid(self.size() as Rank) as usize
    }

    fn absolute(&self, root: Rank, relative: usize) -> Rank {
        ((relative as Rank) + root).rem_euclid(self.size() as Rank)
    }

    fn frame_send(&self, dest: Rank, frame: &Frame, data: &[u8]) -> Result<()> {
        let mut payload = bincode::serialize(frame)?;
        payload.extend_from_slice(data);
        self.send_bytes(self.collective_context(), dest, COLLECTIVE_TAG, payload)
    }

    /// Tell `dest` this collective failed; errors are only logged since the
    /// caller is already failing.
    fn frame_abort(&self, dest: Rank, frame: &Frame) {
        if let Err(err) = self.frame_send(dest, &frame.aborted(), &[]) {
            debug!("rank {}: could not forward abort to {}: {}", self.rank(), dest, err);
        }
    }

    fn frame_recv(&self, source: Rank, expect: &Frame) -> Result<Vec<u8>> {
        let packet = self.recv_packet(self.collective_context(), source, COLLECTIVE_TAG)?;
        let mut rest = &packet.payload[..];
        let frame: Frame = bincode::deserialize_from(&mut rest)?;
        expect.check(&frame, source)?;
        let expected = expect.count as usize * expect.element_size as usize;
        if rest.len() != expected {
            return Err(Error::Wire(format!(
                "collective message from rank {source} carries {} bytes, expected {expected}",
                rest.len()
            )));
        }
        Ok(rest.to_vec())
    }

    /// Block until every member has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        let size = self.size() as Rank;
        let frame = Frame::new::<u8>(CollectiveOp::Barrier, 0, 0);
        let mut dist = 1;
        while dist < size {
            let dest = (self.rank() + dist) % size;
            let source = (self.rank() - dist).rem_euclid(size);
            self.frame_send(dest, &frame, &[])?;
            self.frame_recv(source, &frame)?;
            dist <<= 1;
        }
        trace!("rank {} left barrier", self.rank());
        Ok(())
    }

    /// Copy `root`'s `data` into `data` on every member.
    ///
    /// Uses a binomial tree: each rank receives once and sends at most
    /// log2(size) times.
    pub fn broadcast<T: Element>(&self, root: Rank, data: &mut [T]) -> Result<()> {
        self.check_root(root)?;
        let frame = Frame::new::<T>(CollectiveOp::Broadcast, root, data.len());
        self.tree_broadcast(root, &frame, as_bytes_mut(data), None)
    }

    /// Binomial tree broadcast. If `failed` is set at the root, the tree is
    /// told to abort instead.
    fn tree_broadcast(&self, root: Rank, frame: &Frame, data: &mut [u8], failed: Option<Error>) -> Result<()> {
        let size = self.size();
        let rel = self.relative(root);
        let mut failure = failed;
        let mut mask = 1;
        while mask < size {
            if rel & mask != 0 {
                let parent = self.absolute(root, rel - mask);
                match self.frame_recv(parent, frame) {
                    Ok(payload) => data.copy_from_slice(&payload),
                    Err(err) => failure = Some(err),
                }
                break;
            }
            mask <<= 1;
        }
        mask >>= 1;
        while mask > 0 {
            if rel + mask < size {
                let child = self.absolute(root, rel + mask);
                if failure.is_some() {
                    self.frame_abort(child, frame);
                } else {
                    self.frame_send(child, frame, data)?;
                }
            }
            mask >>= 1;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Split `send` at the root into `size` blocks of `recv.len()` elements
    /// and deliver block `i` to rank `i`. `send` is ignored elsewhere.
    pub fn scatter<T: Element>(&self, root: Rank, send: &[T], recv: &mut [T]) -> Result<()> {
        self.check_root(root)?;
        let frame = Frame::new::<T>(CollectiveOp::Scatter, root, recv.len());
        if self.rank() != root {
            let payload = self.frame_recv(root, &frame)?;
            as_bytes_mut(recv).copy_from_slice(&payload);
            return Ok(());
        }
        let per_rank = recv.len();
        if send.len() != per_rank * self.size() {
            for dest in (0..self.size() as Rank).filter(|&r| r != root) {
                self.frame_abort(dest, &frame);
            }
            return Err(Error::CollectiveMismatch(format!(
                "scatter of {} elements into {} ranks of {per_rank}",
                send.len(),
                self.size()
            )));
        }
        for dest in 0..self.size() {
            let block = &send[dest * per_rank..(dest + 1) * per_rank];
            if dest as Rank == root {
                recv.copy_from_slice(block);
            } else {
                self.frame_send(dest as Rank, &frame, as_bytes(block))?;
            }
        }
        Ok(())
    }

    /// Collect `send` from every rank into consecutive blocks of `recv` at
    /// the root, in rank order. `recv` is ignored elsewhere.
    pub fn gather<T: Element>(&self, root: Rank, send: &[T], recv: &mut [T]) -> Result<()> {
        self.check_root(root)?;
        let frame = Frame::new::<T>(CollectiveOp::Gather, root, send.len());
        if self.rank() != root {
            return self.frame_send(root, &frame, as_bytes(send));
        }
        let per_rank = send.len();
        let mut failure = None;
        if recv.len() != per_rank * self.size() {
            failure = Some(Error::CollectiveMismatch(format!(
                "gather of {} ranks of {per_rank} into {} elements",
                self.size(),
                recv.len()
            )));
        }
        // Take every incoming block even after a failure
        for source in 0..self.size() as Rank {
            let start = source as usize * per_rank;
            if source == root {
                if failure.is_none() {
                    recv[start..start + per_rank].copy_from_slice(send);
                }
                continue;
            }
            match self.frame_recv(source, &frame) {
                Ok(payload) if failure.is_none() => {
                    as_bytes_mut(&mut recv[start..start + per_rank]).copy_from_slice(&payload);
                }
                Ok(_) => (),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Combine `send` element-wise across all ranks with `op`; the result
    /// lands in `recv` at the root. `recv` is ignored elsewhere.
    pub fn reduce<T: Reduce>(&self, root: Rank, send: &[T], recv: &mut [T], op: ReduceOp) -> Result<()> {
        self.reduce_with(root, send, recv, |a, b| T::combine(op, a, b))
    }

    /// Reduce a single value, returning the result at the root only.
    pub fn reduce_value<T: Reduce>(&self, root: Rank, value: T, op: ReduceOp) -> Result<Option<T>> {
        let mut out = [value];
        self.reduce(root, &[value], &mut out, op)?;
        Ok((self.rank() == root).then(|| out[0]))
    }

    /// Reduce with a caller-supplied operator, which must be associative
    /// and commutative.
    pub fn reduce_with<T, F>(&self, root: Rank, send: &[T], recv: &mut [T], f: F) -> Result<()>
    where
        T: Element,
        F: Fn(T, T) -> T,
    {
        self.check_root(root)?;
        let frame = Frame::new::<T>(CollectiveOp::Reduce, root, send.len());
        let mut failure = None;
        if self.rank() == root && recv.len() != send.len() {
            failure = Some(Error::CollectiveMismatch(format!(
                "reduce of {} elements into {}",
                send.len(),
                recv.len()
            )));
        }
        let result = self.tree_reduce(root, &frame, send.to_vec(), &f, failure)?;
        if let Some(acc) = result {
            recv.copy_from_slice(&acc);
        }
        Ok(())
    }

    /// Binomial tree reduction; returns the combined value at the root.
    fn tree_reduce<T, F>(
        &self,
        root: Rank,
        frame: &Frame,
        mut acc: Vec<T>,
        f: &F,
        mut failure: Option<Error>,
    ) -> Result<Option<Vec<T>>>
    where
        T: Element,
        F: Fn(T, T) -> T,
    {
        let size = self.size();
        let rel = self.relative(root);
        let mut mask = 1;
        while mask < size {
            if rel & mask == 0 {
                let child = rel | mask;
                if child < size {
                    match self.frame_recv(self.absolute(root, child), frame) {
                        Ok(payload) if failure.is_none() => {
                            for (a, b) in acc.iter_mut().zip(read_elements::<T>(&payload)) {
                                *a = f(*a, b);
                            }
                        }
                        Ok(_) => (),
                        Err(err) => {
                            failure.get_or_insert(err);
                        }
                    }
                }
            } else {
                let parent = self.absolute(root, rel & !mask);
                if failure.is_some() {
                    self.frame_abort(parent, frame);
                } else {
                    self.frame_send(parent, frame, as_bytes(&acc))?;
                }
                break;
            }
            mask <<= 1;
        }
        match failure {
            Some(err) => Err(err),
            None if rel == 0 => Ok(Some(acc)),
            None => Ok(None),
        }
    }

    /// Reduce with `op` and leave the result in `recv` on every rank.
    pub fn allreduce<T: Reduce>(&self, send: &[T], recv: &mut [T], op: ReduceOp) -> Result<()> {
        let combine = |a, b| T::combine(op, a, b);
        let frame = Frame::new::<T>(CollectiveOp::Reduce, 0, send.len());
        let mut failure = None;
        if recv.len() != send.len() {
            failure = Some(Error::CollectiveMismatch(format!(
                "allreduce of {} elements into {}",
                send.len(),
                recv.len()
            )));
        }
        let reduced = self.tree_reduce(0, &frame, send.to_vec(), &combine, failure);
        let bframe = Frame::new::<T>(CollectiveOp::Broadcast, 0, send.len());
        match reduced {
            Ok(Some(acc)) => {
                recv.copy_from_slice(&acc);
                self.tree_broadcast(0, &bframe, as_bytes_mut(recv), None)
            }
            Ok(None) => self.tree_broadcast(0, &bframe, as_bytes_mut(recv), None),
            Err(err) if self.rank() == 0 => self.tree_broadcast(0, &bframe, &mut [], Some(err)),
            Err(err) => {
                // Take the root's abort so no frame is left behind
                let mut scratch = vec![0u8; send.len() * T::size()];
                let _ = self.tree_broadcast(0, &bframe, &mut scratch, None);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_operators_wrap() {
        assert_eq!(i32::combine(ReduceOp::Sum, 3, 4), 7);
        assert_eq!(u8::combine(ReduceOp::Sum, 250, 10), 4);
        assert_eq!(i64::combine(ReduceOp::Prod, -3, 5), -15);
        assert_eq!(u32::combine(ReduceOp::Min, 3, 9), 3);
        assert_eq!(i16::combine(ReduceOp::Max, -3, -9), -3);
    }

    #[test]
    fn float_operators() {
        assert_eq!(f64::combine(ReduceOp::Sum, 1.5, 2.0), 3.5);
        assert_eq!(f32::combine(ReduceOp::Prod, 1.5, 2.0), 3.0);
        assert_eq!(f64::combine(ReduceOp::Max, 1.5, 2.0), 2.0);
    }

    #[test]
    fn frames_detect_disagreement() {
        let bcast = Frame::new::<i32>(CollectiveOp::Broadcast, 0, 4);
        assert!(bcast.check(&bcast, 1).is_ok());
        let other_root = Frame::new::<i32>(CollectiveOp::Broadcast, 1, 4);
        assert!(matches!(bcast.check(&other_root, 1), Err(Error::CollectiveMismatch(_))));
        let other_count = Frame::new::<i32>(CollectiveOp::Broadcast, 0, 5);
        assert!(matches!(bcast.check(&other_count, 1), Err(Error::CollectiveMismatch(_))));
        let other_type = Frame::new::<f64>(CollectiveOp::Broadcast, 0, 4);
        assert!(matches!(bcast.check(&other_type, 1), Err(Error::CollectiveMismatch(_))));
        let other_op = Frame::new::<i32>(CollectiveOp::Gather, 0, 4);
        assert!(matches!(bcast.check(&other_op, 1), Err(Error::CollectiveMismatch(_))));
        assert!(matches!(bcast.check(&bcast.aborted(), 1), Err(Error::CollectiveMismatch(_))));
    }

    #[test]
    fn frame_prefix_splits_from_data() {
        let frame = Frame::new::<u16>(CollectiveOp::Scatter, 2, 3);
        let mut payload = bincode::serialize(&frame).unwrap();
        payload.extend_from_slice(as_bytes(&[1u16, 2, 3]));
        let mut rest = &payload[..];
        let decoded: Frame = bincode::deserialize_from(&mut rest).unwrap();
        assert!(frame.check(&decoded, 0).is_ok());
        assert_eq!(read_elements::<u16>(rest), vec![1, 2, 3]);
    }
}
