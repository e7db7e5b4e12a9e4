//! Fixed-width on-page encoding.
//!
//! Bucket pages store key/value pairs as raw bytes at fixed slot offsets, so
//! every key and value type must encode to a known, constant width. The
//! [`FixedCodec`] trait is that seam: the index and the page code treat the
//! payload as opaque bytes and only the codec knows the shape.
//!
//! All integer encodings are little-endian, matching the rest of the page
//! formats.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PageId;

/// A type with a fixed-width byte encoding suitable for slotted page storage.
pub trait FixedCodec: Copy + PartialEq + Send + Sync + 'static {
    /// Exact number of bytes the encoded form occupies.
    const ENCODED_SIZE: usize;

    /// Writes the encoded form into `buf`, which is exactly
    /// `ENCODED_SIZE` bytes long.
    fn encode_into(&self, buf: &mut [u8]);

    /// Reads a value back from `buf`, which is exactly `ENCODED_SIZE`
    /// bytes long.
    fn decode_from(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_codec_for_int {
    ($($ty:ty),*) => {
        $(
            impl FixedCodec for $ty {
                const ENCODED_SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode_into(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode_from(buf: &[u8]) -> Self {
                    <$ty>::from_le_bytes(buf.try_into().expect("buffer length mismatch"))
                }
            }
        )*
    };
}

impl_fixed_codec_for_int!(i32, i64, u32, u64);

/// Record identifier - locates a tuple as (page, slot).
///
/// This is the stock value type for secondary indexes: the index maps keys
/// to the record ids of the rows holding them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    page_id: PageId,
    slot_num: u32,
}

impl Rid {
    /// Creates a new record id.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }

    /// Returns the page holding the record.
    #[inline]
    #[must_use]
    pub const fn page_id(self) -> PageId {
        self.page_id
    }

    /// Returns the slot number within the page.
    #[inline]
    #[must_use]
    pub const fn slot_num(self) -> u32 {
        self.slot_num
    }
}

impl FixedCodec for Rid {
    const ENCODED_SIZE: usize = 8;

    #[inline]
    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_num.to_le_bytes());
    }

    #[inline]
    fn decode_from(buf: &[u8]) -> Self {
        Self {
            page_id: PageId::from_le_bytes(buf[0..4].try_into().expect("buffer length mismatch")),
            slot_num: u32::from_le_bytes(buf[4..8].try_into().expect("buffer length mismatch")),
        }
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rid({}, {})", self.page_id, self.slot_num)
    }
}

/// Fixed-width opaque key of `N` bytes.
///
/// Wider keys pad with zeroes, so a `GenericKey<16>` built from an integer
/// compares and hashes the same way as the `GenericKey<8>` built from it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    /// Creates a key from an integer, stored little-endian and
    /// zero-padded to `N` bytes.
    #[must_use]
    pub fn from_integer(value: i64) -> Self {
        let mut data = [0u8; N];
        let bytes = value.to_le_bytes();
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Returns the raw key bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl<const N: usize> FixedCodec for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    #[inline]
    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data);
    }

    #[inline]
    fn decode_from(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(buf);
        Self { data }
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericKey<{}>({:02x?})", N, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_codec() {
        let rid = Rid::new(PageId::new(7), 21);
        let mut buf = [0u8; 8];
        rid.encode_into(&mut buf);
        assert_eq!(Rid::decode_from(&buf), rid);
        assert_eq!(rid.page_id(), PageId::new(7));
        assert_eq!(rid.slot_num(), 21);
    }

    #[test]
    fn test_generic_key_padding() {
        let narrow = GenericKey::<8>::from_integer(0x0102_0304);
        let wide = GenericKey::<16>::from_integer(0x0102_0304);
        assert_eq!(&narrow.as_bytes()[..8], &wide.as_bytes()[..8]);
        assert!(wide.as_bytes()[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_negative_integer_key() {
        let key = GenericKey::<8>::from_integer(-1);
        assert_eq!(key, GenericKey::<8>::from_integer(-1));
        assert_ne!(key, GenericKey::<8>::from_integer(1));
    }
}
