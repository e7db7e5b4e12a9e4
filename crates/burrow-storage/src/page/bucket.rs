//! Hash table bucket page.
//!
//! A bucket stores up to `CAPACITY` key/value mappings in fixed-width
//! slots, with two bitmaps tracking slot state:
//!
//! ```text
//! +--------------------+
//! | occupied bitmap    |  ceil(B/8) bytes - slot ever written
//! +--------------------+
//! | readable bitmap    |  ceil(B/8) bytes - slot holds a live mapping
//! +--------------------+
//! | array[B]           |  B * (key + value) bytes
//! +--------------------+
//! ```
//!
//! A removed slot keeps its occupied bit (a tombstone), which lets scans
//! stop at the first never-written slot: nothing can live beyond the
//! high-water mark. Bits are MSB-first within each byte (slot `i` lives in
//! byte `i / 8` at mask `1 << (7 - i % 8)`).

use std::cmp::Ordering;
use std::marker::PhantomData;

use burrow_common::constants::PAGE_SIZE;
use burrow_common::types::FixedCodec;

use crate::hash::KeyComparator;

/// Number of mappings a bucket page can hold for a given mapping width.
///
/// Solves `B * mapping_size + 2 * B/8 <= PAGE_SIZE` in whole slots; for an
/// 8-byte mapping (`i32` keys and values) this comes to 496.
pub const fn bucket_capacity(mapping_size: usize) -> usize {
    4 * PAGE_SIZE / (4 * mapping_size + 1)
}

#[inline]
const fn bit_mask(slot: usize) -> u8 {
    1 << (7 - (slot % 8))
}

/// Read-only view of a bucket page.
pub struct BucketView<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: FixedCodec, V: FixedCodec> BucketView<'a, K, V> {
    /// Slot capacity of this bucket shape.
    pub const CAPACITY: usize = bucket_capacity(K::ENCODED_SIZE + V::ENCODED_SIZE);

    const BITMAP_BYTES: usize = (Self::CAPACITY + 7) / 8;
    const ARRAY_OFFSET: usize = 2 * Self::BITMAP_BYTES;
    const MAPPING_SIZE: usize = K::ENCODED_SIZE + V::ENCODED_SIZE;

    /// Wraps a page buffer.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(data.len() >= Self::ARRAY_OFFSET + Self::CAPACITY * Self::MAPPING_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// True if slot `i` has ever been written.
    #[inline]
    pub fn is_occupied(&self, slot: usize) -> bool {
        self.data[slot / 8] & bit_mask(slot) != 0
    }

    /// True if slot `i` holds a live mapping.
    #[inline]
    pub fn is_readable(&self, slot: usize) -> bool {
        self.data[Self::BITMAP_BYTES + slot / 8] & bit_mask(slot) != 0
    }

    /// Decodes the key at `slot`. Only meaningful for readable slots.
    #[inline]
    pub fn key_at(&self, slot: usize) -> K {
        let off = Self::ARRAY_OFFSET + slot * Self::MAPPING_SIZE;
        K::decode_from(&self.data[off..off + K::ENCODED_SIZE])
    }

    /// Decodes the value at `slot`. Only meaningful for readable slots.
    #[inline]
    pub fn value_at(&self, slot: usize) -> V {
        let off = Self::ARRAY_OFFSET + slot * Self::MAPPING_SIZE + K::ENCODED_SIZE;
        V::decode_from(&self.data[off..off + V::ENCODED_SIZE])
    }

    /// Appends every live value stored under `key` to `result`.
    /// Returns true iff at least one was appended.
    pub fn get_value<C: KeyComparator<K>>(
        &self,
        key: &K,
        comparator: &C,
        result: &mut Vec<V>,
    ) -> bool {
        let before = result.len();
        for slot in 0..Self::CAPACITY {
            if self.is_readable(slot)
                && comparator.compare(key, &self.key_at(slot)) == Ordering::Equal
            {
                result.push(self.value_at(slot));
            }
        }
        result.len() > before
    }

    /// True when every slot holds a live mapping.
    pub fn is_full(&self) -> bool {
        let readable = &self.data[Self::BITMAP_BYTES..2 * Self::BITMAP_BYTES];
        let rem = Self::CAPACITY % 8;
        for (i, &byte) in readable.iter().enumerate() {
            let expected = if rem != 0 && i == Self::BITMAP_BYTES - 1 {
                0xFFu8 << (8 - rem)
            } else {
                0xFF
            };
            if byte != expected {
                return false;
            }
        }
        true
    }

    /// True when no slot holds a live mapping.
    pub fn is_empty(&self) -> bool {
        self.data[Self::BITMAP_BYTES..2 * Self::BITMAP_BYTES]
            .iter()
            .all(|&b| b == 0)
    }

    /// Number of live mappings, counted byte-wise (Kernighan).
    pub fn num_readable(&self) -> usize {
        let mut count = 0;
        for &byte in &self.data[Self::BITMAP_BYTES..2 * Self::BITMAP_BYTES] {
            let mut b = byte;
            while b != 0 {
                b &= b - 1;
                count += 1;
            }
        }
        count
    }

    /// Copies out every live mapping in slot order.
    pub fn array_copy(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.num_readable());
        for slot in 0..Self::CAPACITY {
            if self.is_readable(slot) {
                out.push((self.key_at(slot), self.value_at(slot)));
            }
        }
        out
    }
}

/// Mutable view of a bucket page.
pub struct BucketViewMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: FixedCodec, V: FixedCodec> BucketViewMut<'a, K, V> {
    /// Slot capacity of this bucket shape.
    pub const CAPACITY: usize = bucket_capacity(K::ENCODED_SIZE + V::ENCODED_SIZE);

    const BITMAP_BYTES: usize = (Self::CAPACITY + 7) / 8;
    const ARRAY_OFFSET: usize = 2 * Self::BITMAP_BYTES;
    const MAPPING_SIZE: usize = K::ENCODED_SIZE + V::ENCODED_SIZE;

    /// Wraps a page buffer.
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert!(data.len() >= Self::ARRAY_OFFSET + Self::CAPACITY * Self::MAPPING_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Reborrows as a read-only view.
    #[inline]
    pub fn as_view(&self) -> BucketView<'_, K, V> {
        BucketView {
            data: self.data,
            _marker: PhantomData,
        }
    }

    /// Inserts `(key, value)`.
    ///
    /// Fails when the pair is already present or no slot is free. Scanning
    /// walks slots in order, remembering the first reusable tombstone, and
    /// may stop at the first never-occupied slot: no duplicate can exist
    /// past it.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, comparator: &C) -> bool {
        let mut target = None;
        for slot in 0..Self::CAPACITY {
            if !self.as_view().is_occupied(slot) {
                if target.is_none() {
                    target = Some(slot);
                }
                break;
            }
            if self.as_view().is_readable(slot) {
                if comparator.compare(key, &self.as_view().key_at(slot)) == Ordering::Equal
                    && *value == self.as_view().value_at(slot)
                {
                    return false;
                }
            } else if target.is_none() {
                target = Some(slot);
            }
        }

        let Some(slot) = target else {
            return false;
        };
        self.write_slot(slot, key, value);
        self.set_occupied(slot);
        self.set_readable(slot);
        true
    }

    /// Removes the mapping `(key, value)` if present, leaving a tombstone.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, value: &V, comparator: &C) -> bool {
        for slot in 0..Self::CAPACITY {
            if !self.as_view().is_occupied(slot) {
                return false;
            }
            if self.as_view().is_readable(slot)
                && comparator.compare(key, &self.as_view().key_at(slot)) == Ordering::Equal
                && *value == self.as_view().value_at(slot)
            {
                self.clear_readable(slot);
                return true;
            }
        }
        false
    }

    /// Clears the readable bit of `slot`, leaving its tombstone in place.
    #[inline]
    pub fn remove_at(&mut self, slot: usize) {
        self.clear_readable(slot);
    }

    /// Zeroes both bitmaps; slot payloads are left as garbage.
    pub fn clear(&mut self) {
        self.data[..2 * Self::BITMAP_BYTES].fill(0);
    }

    #[inline]
    fn set_occupied(&mut self, slot: usize) {
        self.data[slot / 8] |= bit_mask(slot);
    }

    #[inline]
    fn set_readable(&mut self, slot: usize) {
        self.data[Self::BITMAP_BYTES + slot / 8] |= bit_mask(slot);
    }

    #[inline]
    fn clear_readable(&mut self, slot: usize) {
        self.data[Self::BITMAP_BYTES + slot / 8] &= !bit_mask(slot);
    }

    fn write_slot(&mut self, slot: usize, key: &K, value: &V) {
        let off = Self::ARRAY_OFFSET + slot * Self::MAPPING_SIZE;
        key.encode_into(&mut self.data[off..off + K::ENCODED_SIZE]);
        value.encode_into(
            &mut self.data[off + K::ENCODED_SIZE..off + K::ENCODED_SIZE + V::ENCODED_SIZE],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::OrdComparator;
    use burrow_common::types::{GenericKey, Rid};

    type IntBucket<'a> = BucketViewMut<'a, i32, i32>;

    fn empty_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_capacity_formula() {
        // The canonical int/int instantiation holds 496 mappings.
        assert_eq!(IntBucket::CAPACITY, 496);
        // Mapping bytes plus both bitmaps must fit in the page.
        let cap = BucketViewMut::<'_, GenericKey<16>, Rid>::CAPACITY;
        assert!(cap * 24 + 2 * ((cap + 7) / 8) <= PAGE_SIZE);
    }

    #[test]
    fn test_insert_and_get() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        assert!(bucket.insert(&1, &10, &cmp));
        assert!(bucket.insert(&1, &11, &cmp));
        assert!(bucket.insert(&2, &20, &cmp));

        let mut out = Vec::new();
        assert!(bucket.as_view().get_value(&1, &cmp, &mut out));
        assert_eq!(out, vec![10, 11]);

        out.clear();
        assert!(!bucket.as_view().get_value(&3, &cmp, &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        assert!(bucket.insert(&7, &70, &cmp));
        assert!(!bucket.insert(&7, &70, &cmp));

        let mut out = Vec::new();
        bucket.as_view().get_value(&7, &cmp, &mut out);
        assert_eq!(out, vec![70]);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        assert!(bucket.insert(&5, &50, &cmp));
        assert!(bucket.remove(&5, &50, &cmp));
        assert!(!bucket.remove(&5, &50, &cmp));

        assert!(!bucket.as_view().is_readable(0));
        assert!(bucket.as_view().is_occupied(0));
        assert!(bucket.as_view().is_empty());
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        bucket.insert(&1, &1, &cmp);
        bucket.insert(&2, &2, &cmp);
        bucket.remove(&1, &1, &cmp);

        // The new mapping takes the tombstoned slot 0, not slot 2.
        assert!(bucket.insert(&3, &3, &cmp));
        assert_eq!(bucket.as_view().key_at(0), 3);
        assert!(!bucket.as_view().is_occupied(2));
    }

    #[test]
    fn test_fill_to_capacity() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        for i in 0..IntBucket::CAPACITY as i32 {
            assert!(bucket.insert(&i, &i, &cmp), "insert {i} failed");
        }
        assert!(bucket.as_view().is_full());
        assert_eq!(bucket.as_view().num_readable(), IntBucket::CAPACITY);
        assert!(!bucket.insert(&-1, &-1, &cmp));

        // Removing one mapping makes room again.
        assert!(bucket.remove(&0, &0, &cmp));
        assert!(!bucket.as_view().is_full());
        assert!(bucket.insert(&-1, &-1, &cmp));
    }

    #[test]
    fn test_partial_tail_byte_is_full() {
        // GenericKey<8>/Rid mappings: capacity 4 * 4096 / (4 * 16 + 1) = 252,
        // which is not a multiple of 8, exercising the tail-byte mask.
        let mut page = empty_page();
        let mut bucket = BucketViewMut::<'_, GenericKey<8>, Rid>::new(&mut page);
        let cmp = OrdComparator;
        let cap = BucketViewMut::<'_, GenericKey<8>, Rid>::CAPACITY;
        assert_ne!(cap % 8, 0);

        for i in 0..cap {
            let key = GenericKey::<8>::from_integer(i as i64);
            let rid = Rid::new(burrow_common::types::PageId::new(0), i as u32);
            assert!(bucket.insert(&key, &rid, &cmp));
        }
        assert!(bucket.as_view().is_full());
        assert_eq!(bucket.as_view().num_readable(), cap);
    }

    #[test]
    fn test_array_copy_and_clear() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        for i in 0..10 {
            bucket.insert(&i, &(i * 2), &cmp);
        }
        bucket.remove(&4, &8, &cmp);

        let copy = bucket.as_view().array_copy();
        assert_eq!(copy.len(), 9);
        assert!(copy.contains(&(3, 6)));
        assert!(!copy.contains(&(4, 8)));

        bucket.clear();
        assert!(bucket.as_view().is_empty());
        assert!(!bucket.as_view().is_occupied(0));
    }

    #[test]
    fn test_remove_at() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        bucket.insert(&1, &1, &cmp);
        bucket.remove_at(0);
        assert!(!bucket.as_view().is_readable(0));
        assert!(bucket.as_view().is_occupied(0));
    }

    #[test]
    fn test_msb_first_bit_layout() {
        let mut page = empty_page();
        let mut bucket = IntBucket::new(&mut page);
        let cmp = OrdComparator;

        bucket.insert(&0, &0, &cmp);
        // Slot 0 occupies the high bit of the first byte of each bitmap.
        assert_eq!(page[0], 0b1000_0000);
        let bb = (IntBucket::CAPACITY + 7) / 8;
        assert_eq!(page[bb], 0b1000_0000);
    }
}
