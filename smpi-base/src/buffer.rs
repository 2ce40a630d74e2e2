//! Plain-old-data element trait and byte views over element slices
//! (partially based on the data and trait system used in RSMPI).
use std::mem;

/// Trait for fixed-size element types that can be moved as raw bytes.
///
/// WARNING: This trait is unsafe since it must only be implemented on types
/// for which every bit pattern is a valid value and that contain no padding,
/// pointers or references to other data on this process.
pub unsafe trait Element: Copy + 'static {
    /// Size of one element in bytes.
    #[inline]
    fn size() -> usize {
        mem::size_of::<Self>()
    }
}

macro_rules! impl_element {
    ($($ty:ident),*) => {
        $(unsafe impl Element for $ty {})*
    };
}

impl_element!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

unsafe impl<T: Element, const N: usize> Element for [T; N] {}

/// View a slice of elements as its underlying bytes.
pub fn as_bytes<T: Element>(data: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, mem::size_of_val(data)) }
}

/// View a mutable slice of elements as its underlying bytes.
pub fn as_bytes_mut<T: Element>(data: &mut [T]) -> &mut [u8] {
    let len = mem::size_of_val(data);
    unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut u8, len) }
}

/// Copy whole elements out of a byte buffer. Trailing bytes that do not
/// form a complete element are ignored.
pub fn read_elements<T: Element>(bytes: &[u8]) -> Vec<T> {
    let count = bytes.len() / mem::size_of::<T>();
    let ptr = bytes.as_ptr() as *const T;
    (0..count)
        .map(|i| unsafe { ptr.add(i).read_unaligned() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_views_cover_whole_slice() {
        let mut data = [1u32, 2, 3];
        assert_eq!(as_bytes(&data).len(), 12);
        as_bytes_mut(&mut data)[0..4].copy_from_slice(&7u32.to_ne_bytes());
        assert_eq!(data[0], 7);
    }

    #[test]
    fn read_elements_from_unaligned_bytes() {
        let values = [1.5f64, -2.25];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(as_bytes(&values));
        let out: Vec<f64> = read_elements(&bytes[1..]);
        assert_eq!(out, values);
    }

    #[test]
    fn array_elements_have_array_size() {
        assert_eq!(<[i32; 4]>::size(), 16);
    }
}
