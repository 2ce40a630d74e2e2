//! Derived data descriptors.
//!
//! A `Datatype` says which elements of a buffer take part in a transfer and
//! in which order. Senders pack the enumerated elements into one contiguous
//! payload, receivers unpack the payload back into the same positions, so a
//! non-contiguous region (a matrix triangle, a column) travels as a single
//! message without an intermediate copy on the caller's side.
use std::cell::Cell;
use std::rc::Rc;
use smpi_base::{Error, Result};

/// One run of consecutive elements, measured in elements from the start of
/// the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: usize,
    pub length: usize,
}

/// Shape the descriptor was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Elements `0..count`.
    Contiguous,

    /// Arbitrary list of blocks.
    Indexed,

    /// `count` blocks of equal length placed `stride` elements apart.
    Strided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Built,
    Committed,
    Released,
}

/// Layout descriptor for typed transfers.
///
/// Clones share one lifecycle: releasing any of them releases all.
#[derive(Debug, Clone)]
pub struct Datatype {
    kind: Kind,
    blocks: Rc<[Block]>,
    element_size: usize,
    /// Sum of block lengths
    count: usize,
    /// One past the highest element touched
    extent: usize,
    state: Rc<Cell<Lifecycle>>,
}

impl Datatype {
    fn build(kind: Kind, blocks: Vec<Block>, element_size: usize) -> Result<Datatype> {
        if element_size == 0 {
            return Err(Error::DescriptorShape("element size must be non-zero".to_string()));
        }
        let mut count = 0usize;
        let mut extent = 0usize;
        for b in blocks.iter().filter(|b| b.length > 0) {
            let end = b.offset.checked_add(b.length).ok_or_else(|| overflow("block end"))?;
            extent = extent.max(end);
            count = count.checked_add(b.length).ok_or_else(|| overflow("element count"))?;
        }
        // Every byte offset used by pack and unpack stays below these
        extent.checked_mul(element_size).ok_or_else(|| overflow("extent"))?;
        count.checked_mul(element_size).ok_or_else(|| overflow("payload size"))?;
        Ok(Datatype {
            kind,
            blocks: blocks.into(),
            element_size,
            count,
            extent,
            state: Rc::new(Cell::new(Lifecycle::Built)),
        })
    }

    /// `count` consecutive elements.
    pub fn contiguous(count: usize, element_size: usize) -> Result<Datatype> {
        let blocks = if count > 0 {
            vec![Block { offset: 0, length: count }]
        } else {
            vec![]
        };
        Datatype::build(Kind::Contiguous, blocks, element_size)
    }

    /// Blocks of `block_lengths[i]` elements starting at `offsets[i]`, in the
    /// given order. Offsets may repeat or go backwards.
    pub fn indexed(block_lengths: &[usize], offsets: &[usize], element_size: usize) -> Result<Datatype> {
        if block_lengths.len() != offsets.len() {
            return Err(Error::DescriptorShape(format!(
                "{} block lengths for {} offsets",
                block_lengths.len(),
                offsets.len()
            )));
        }
        let blocks = offsets
            .iter()
            .zip(block_lengths)
            .map(|(&offset, &length)| Block { offset, length })
            .collect();
        Datatype::build(Kind::Indexed, blocks, element_size)
    }

    /// `count` blocks of `block_length` elements, each starting `stride`
    /// elements after the previous one.
    pub fn strided(count: usize, block_length: usize, stride: usize, element_size: usize) -> Result<Datatype> {
        if count > 1 && stride < block_length {
            return Err(Error::DescriptorShape(format!(
                "stride {stride} shorter than block length {block_length}"
            )));
        }
        let blocks = (0..count)
            .map(|i| {
                let offset = i.checked_mul(stride).ok_or_else(|| overflow("stride"))?;
                Ok(Block {
                    offset,
                    length: block_length,
                })
            })
            .collect::<Result<_>>()?;
        Datatype::build(Kind::Strided, blocks, element_size)
    }

    /// Upper triangle (column >= row) of an `n`×`n` row-major matrix, one
    /// element per block, walked row by row.
    pub fn upper_triangular(n: usize, element_size: usize) -> Result<Datatype> {
        square(n)?;
        let offsets: Vec<usize> = (0..n)
            .flat_map(|i| (i..n).map(move |j| i * n + j))
            .collect();
        Datatype::indexed(&vec![1; offsets.len()], &offsets, element_size)
    }

    /// Lower triangle (column <= row) of an `n`×`n` row-major matrix, one
    /// element per block, walked row by row.
    pub fn lower_triangular(n: usize, element_size: usize) -> Result<Datatype> {
        square(n)?;
        let offsets: Vec<usize> = (0..n)
            .flat_map(|i| (0..=i).map(move |j| i * n + j))
            .collect();
        Datatype::indexed(&vec![1; offsets.len()], &offsets, element_size)
    }

    /// Row `row` of a row-major matrix with `cols` columns.
    pub fn row(cols: usize, row: usize, element_size: usize) -> Result<Datatype> {
        let offset = row.checked_mul(cols).ok_or_else(|| overflow("row offset"))?;
        Datatype::indexed(&[cols], &[offset], element_size)
    }

    /// Column `col` of a `rows`×`cols` row-major matrix.
    pub fn column(rows: usize, cols: usize, col: usize, element_size: usize) -> Result<Datatype> {
        if col >= cols {
            return Err(Error::DescriptorShape(format!("column {col} of a {cols} column matrix")));
        }
        rows.checked_mul(cols).ok_or_else(|| overflow("matrix size"))?;
        let offsets: Vec<usize> = (0..rows).map(|i| i * cols + col).collect();
        Datatype::indexed(&vec![1; rows], &offsets, element_size)
    }

    /// Freeze the descriptor so it can be used in transfers.
    pub fn commit(self) -> Result<Datatype> {
        if self.state.get() == Lifecycle::Released {
            return Err(Error::DescriptorLifecycle("commit after release"));
        }
        self.state.set(Lifecycle::Committed);
        Ok(self)
    }

    /// Release the descriptor and every clone of it. Transfers already
    /// started keep their own copy.
    pub fn release(&self) -> Result<()> {
        if self.state.get() == Lifecycle::Released {
            return Err(Error::DescriptorLifecycle("released twice"));
        }
        self.state.set(Lifecycle::Released);
        Ok(())
    }

    /// Copy with its own lifecycle, for a transfer in flight.
    pub(crate) fn detach(&self) -> Datatype {
        Datatype {
            state: Rc::new(Cell::new(self.state.get())),
            ..self.clone()
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of elements moved by one transfer.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Minimum buffer length, in elements, the descriptor fits in.
    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn is_committed(&self) -> bool {
        self.state.get() == Lifecycle::Committed
    }

    /// Offsets of every enumerated element, in transfer order.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.blocks
            .iter()
            .flat_map(|b| b.offset..b.offset + b.length)
    }

    /// Payload size in bytes.
    pub(crate) fn packed_size(&self) -> usize {
        self.count * self.element_size
    }

    fn check_usable(&self, buffer_len: usize) -> Result<()> {
        match self.state.get() {
            Lifecycle::Built => return Err(Error::DescriptorLifecycle("used before commit")),
            Lifecycle::Released => return Err(Error::DescriptorLifecycle("used after release")),
            Lifecycle::Committed => (),
        }
        let span = self
            .extent
            .checked_mul(self.element_size)
            .ok_or_else(|| overflow("extent"))?;
        if span > buffer_len {
            return Err(Error::DescriptorShape(format!(
                "descriptor spans {} elements but the buffer holds {}",
                self.extent,
                buffer_len / self.element_size
            )));
        }
        Ok(())
    }

    /// Gather the enumerated elements of `buffer` into a contiguous payload.
    pub(crate) fn pack(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        self.check_usable(buffer.len())?;
        let es = self.element_size;
        let mut out = Vec::with_capacity(self.packed_size());
        for block in self.blocks.iter() {
            out.extend_from_slice(&buffer[block.offset * es..(block.offset + block.length) * es]);
        }
        Ok(out)
    }

    /// Scatter a payload back into the enumerated elements of `buffer`.
    /// Returns the number of elements written; elements beyond a short
    /// payload are left untouched.
    pub(crate) fn unpack(&self, payload: &[u8], buffer: &mut [u8]) -> Result<usize> {
        self.check_usable(buffer.len())?;
        let es = self.element_size;
        if payload.len() > self.packed_size() {
            return Err(Error::Truncated {
                capacity: self.packed_size(),
                received: payload.len(),
            });
        }
        if payload.len() % es != 0 {
            return Err(Error::Wire(format!(
                "payload of {} bytes is not a whole number of {es} byte elements",
                payload.len()
            )));
        }
        let mut rest = payload;
        for block in self.blocks.iter() {
            if rest.is_empty() {
                break;
            }
            let len = (block.length * es).min(rest.len());
            let start = block.offset * es;
            buffer[start..start + len].copy_from_slice(&rest[..len]);
            rest = &rest[len..];
        }
        Ok(payload.len() / es)
    }
}

fn overflow(what: &str) -> Error {
    Error::DescriptorShape(format!("{what} overflows the address space"))
}

fn square(n: usize) -> Result<usize> {
    n.checked_mul(n).ok_or_else(|| overflow("matrix size"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use smpi_base::{as_bytes, as_bytes_mut};

    #[test]
    fn triangles_cover_the_matrix() {
        for n in 0..6 {
            let upper = Datatype::upper_triangular(n, 4).unwrap();
            let lower = Datatype::lower_triangular(n, 4).unwrap();
            assert_eq!(upper.blocks().len(), n * (n + 1) / 2);
            assert_eq!(lower.blocks().len(), n * (n + 1) / 2);
            let up: HashSet<usize> = upper.offsets().collect();
            let low: HashSet<usize> = lower.offsets().collect();
            let diagonal: HashSet<usize> = (0..n).map(|i| i * n + i).collect();
            assert_eq!(up.intersection(&low).copied().collect::<HashSet<_>>(), diagonal);
            assert_eq!(up.union(&low).count(), n * n);
        }
    }

    #[test]
    fn upper_triangle_walks_rows_in_order() {
        let upper = Datatype::upper_triangular(3, 4).unwrap();
        assert_eq!(upper.offsets().collect::<Vec<_>>(), vec![0, 1, 2, 4, 5, 8]);
        let lower = Datatype::lower_triangular(3, 4).unwrap();
        assert_eq!(lower.offsets().collect::<Vec<_>>(), vec![0, 3, 4, 6, 7, 8]);
    }

    #[test]
    fn indexed_rejects_mismatched_lengths() {
        assert!(matches!(
            Datatype::indexed(&[1, 2], &[0], 4),
            Err(Error::DescriptorShape(_))
        ));
    }

    #[test]
    fn lifecycle_is_enforced() {
        let data = [1i32, 2, 3];
        let dt = Datatype::contiguous(3, 4).unwrap();
        assert!(matches!(
            dt.pack(as_bytes(&data)),
            Err(Error::DescriptorLifecycle(_))
        ));
        let dt = dt.commit().unwrap();
        assert_eq!(dt.pack(as_bytes(&data)).unwrap().len(), 12);
        dt.release().unwrap();
        assert!(matches!(
            dt.pack(as_bytes(&data)),
            Err(Error::DescriptorLifecycle(_))
        ));
        assert!(dt.release().is_err());
        assert!(dt.commit().is_err());
    }

    #[test]
    fn pack_follows_descriptor_order() {
        let data: Vec<i32> = (0..10).collect();
        let dt = Datatype::indexed(&[2, 1, 3], &[7, 0, 2], 4)
            .unwrap()
            .commit()
            .unwrap();
        assert_eq!(dt.count(), 6);
        let packed = dt.pack(as_bytes(&data)).unwrap();
        let values: Vec<i32> = smpi_base::read_elements(&packed);
        assert_eq!(values, vec![7, 8, 0, 2, 3, 4]);

        let mut out = vec![-1i32; 10];
        assert_eq!(dt.unpack(&packed, as_bytes_mut(&mut out)).unwrap(), 6);
        assert_eq!(out, vec![0, -1, 2, 3, 4, -1, -1, 7, 8, -1]);
    }

    #[test]
    fn strided_picks_every_other_column() {
        let data: Vec<u16> = (0..12).collect();
        let dt = Datatype::strided(3, 2, 4, 2).unwrap().commit().unwrap();
        let values: Vec<u16> = smpi_base::read_elements(&dt.pack(as_bytes(&data)).unwrap());
        assert_eq!(values, vec![0, 1, 4, 5, 8, 9]);
        assert_eq!(dt.extent(), 10);
    }

    #[test]
    fn column_of_row_major_matrix() {
        let data: Vec<i64> = (0..12).collect();
        let dt = Datatype::column(3, 4, 2, 8).unwrap().commit().unwrap();
        let values: Vec<i64> = smpi_base::read_elements(&dt.pack(as_bytes(&data)).unwrap());
        assert_eq!(values, vec![2, 6, 10]);
    }

    #[test]
    fn buffer_too_small_for_descriptor() {
        let data = [0u8; 8];
        let dt = Datatype::upper_triangular(3, 1).unwrap().commit().unwrap();
        assert!(matches!(dt.pack(&data), Err(Error::DescriptorShape(_))));
    }

    #[test]
    fn oversized_payload_is_truncation() {
        let mut out = [0u8; 4];
        let dt = Datatype::contiguous(2, 1).unwrap().commit().unwrap();
        assert!(matches!(
            dt.unpack(&[1, 2, 3], &mut out),
            Err(Error::Truncated { capacity: 2, received: 3 })
        ));
        assert_eq!(dt.unpack(&[9], &mut out).unwrap(), 1);
        assert_eq!(out, [9, 0, 0, 0]);
    }

    #[test]
    fn offsets_past_the_address_space_are_rejected() {
        assert!(matches!(
            Datatype::indexed(&[1], &[usize::MAX], 4),
            Err(Error::DescriptorShape(_))
        ));
        assert!(matches!(
            Datatype::indexed(&[1, usize::MAX], &[0, 0], 1),
            Err(Error::DescriptorShape(_))
        ));
        assert!(matches!(
            Datatype::strided(3, 1, usize::MAX / 2 + 1, 1),
            Err(Error::DescriptorShape(_))
        ));
        assert!(matches!(
            Datatype::upper_triangular(usize::MAX, 1),
            Err(Error::DescriptorShape(_))
        ));
    }

    #[test]
    fn extent_too_wide_in_bytes_is_rejected() {
        let offset = usize::MAX / 4;
        assert!(matches!(
            Datatype::indexed(&[1], &[offset], 8),
            Err(Error::DescriptorShape(_))
        ));
        let dt = Datatype::indexed(&[1], &[offset], 2).unwrap().commit().unwrap();
        assert!(matches!(dt.pack(&[0u8; 16]), Err(Error::DescriptorShape(_))));
    }

    #[test]
    fn clones_share_the_lifecycle() {
        let data = [5u8, 6];
        let dt = Datatype::contiguous(2, 1).unwrap().commit().unwrap();
        let copy = dt.clone();
        let detached = dt.detach();
        dt.release().unwrap();
        assert!(!copy.is_committed());
        assert!(matches!(copy.pack(&data), Err(Error::DescriptorLifecycle(_))));
        assert!(copy.release().is_err());
        assert_eq!(detached.pack(&data).unwrap(), vec![5, 6]);
    }
}
