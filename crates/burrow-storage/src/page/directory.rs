//! Hash table directory page.
//!
//! The directory maps the low bits of a key's hash to a bucket page id.
//! It always reserves room for the maximum directory size; only the first
//! `1 << global_depth` entries are live.
//!
//! # Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!    0      4   page_id
//!    4      4   lsn
//!    8      4   global_depth
//!   12    512   local_depths[512]      (1 byte each)
//!  524   2048   bucket_page_ids[512]   (4 bytes each, LE)
//! ```
//!
//! # Invariants
//!
//! - `local_depths[i] <= global_depth` for every live entry
//! - all live entries that agree on their low `local_depth` bits point to
//!   the same bucket page and carry the same local depth
//! - no bucket page id appears under two different local depths

use std::collections::HashMap;

use burrow_common::constants::{DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH};
use burrow_common::types::{Lsn, PageId};

const OFFSET_PAGE_ID: usize = 0;
const OFFSET_LSN: usize = 4;
const OFFSET_GLOBAL_DEPTH: usize = 8;
const OFFSET_LOCAL_DEPTHS: usize = 12;
const OFFSET_BUCKET_PAGE_IDS: usize = OFFSET_LOCAL_DEPTHS + DIRECTORY_ARRAY_SIZE;

/// Read-only view of a directory page.
#[derive(Clone, Copy)]
pub struct DirectoryView<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryView<'a> {
    /// Wraps a page buffer.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(data.len() >= OFFSET_BUCKET_PAGE_IDS + 4 * DIRECTORY_ARRAY_SIZE);
        Self { data }
    }

    /// Returns the directory's own page id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::from_le_bytes(self.data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4].try_into().unwrap())
    }

    /// Returns the page LSN. Unused by the index itself; preserved for
    /// callers that maintain a log.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn::new(u32::from_le_bytes(
            self.data[OFFSET_LSN..OFFSET_LSN + 4].try_into().unwrap(),
        ))
    }

    /// Returns the global depth.
    #[inline]
    pub fn global_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data[OFFSET_GLOBAL_DEPTH..OFFSET_GLOBAL_DEPTH + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Mask selecting the hash bits the directory currently distinguishes.
    #[inline]
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth()) - 1
    }

    /// Number of live directory entries.
    #[inline]
    pub fn size(&self) -> u32 {
        1u32 << self.global_depth()
    }

    /// Returns the local depth of entry `idx`.
    #[inline]
    pub fn local_depth(&self, idx: u32) -> u32 {
        u32::from(self.data[OFFSET_LOCAL_DEPTHS + idx as usize])
    }

    /// Mask selecting the hash bits bucket `idx` is responsible for.
    #[inline]
    pub fn local_depth_mask(&self, idx: u32) -> u32 {
        (1u32 << self.local_depth(idx)) - 1
    }

    /// The bit that distinguishes entry `idx` from its split image.
    #[inline]
    pub fn local_high_bit(&self, idx: u32) -> u32 {
        1u32 << self.local_depth(idx)
    }

    /// Returns the bucket page id of entry `idx`.
    #[inline]
    pub fn bucket_page_id(&self, idx: u32) -> PageId {
        let off = OFFSET_BUCKET_PAGE_IDS + 4 * idx as usize;
        PageId::from_le_bytes(self.data[off..off + 4].try_into().unwrap())
    }

    /// Returns the sibling index obtained by flipping bit
    /// `local_depth - 1` of `idx`. Requires a local depth of at least 1.
    #[inline]
    pub fn split_image_index(&self, idx: u32) -> u32 {
        let ld = self.local_depth(idx);
        debug_assert!(ld >= 1, "entry {idx} has no split image at depth 0");
        idx ^ (1u32 << (ld - 1))
    }

    /// True when every live entry's local depth is strictly below the
    /// global depth, i.e. halving the directory loses nothing.
    pub fn can_shrink(&self) -> bool {
        let gd = self.global_depth();
        if gd == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < gd)
    }

    /// Asserts the directory invariants; panics on violation.
    pub fn verify_integrity(&self) {
        let gd = self.global_depth();
        let size = self.size();
        let mut depth_of: HashMap<PageId, u32> = HashMap::new();

        for i in 0..size {
            let ld = self.local_depth(i);
            let pid = self.bucket_page_id(i);
            assert!(
                ld <= gd,
                "local depth {ld} at index {i} exceeds global depth {gd}"
            );

            match depth_of.get(&pid) {
                Some(&seen) => assert_eq!(
                    seen, ld,
                    "bucket page {pid} appears under local depths {seen} and {ld}"
                ),
                None => {
                    depth_of.insert(pid, ld);
                }
            }

            let mask = self.local_depth_mask(i);
            for j in 0..size {
                if j & mask == i & mask {
                    assert_eq!(
                        self.bucket_page_id(j),
                        pid,
                        "entries {i} and {j} share a suffix but point to different buckets"
                    );
                    assert_eq!(
                        self.local_depth(j),
                        ld,
                        "entries {i} and {j} share a suffix but disagree on local depth"
                    );
                }
            }
        }
    }
}

/// Mutable view of a directory page.
pub struct DirectoryViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryViewMut<'a> {
    /// Wraps a page buffer.
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert!(data.len() >= OFFSET_BUCKET_PAGE_IDS + 4 * DIRECTORY_ARRAY_SIZE);
        Self { data }
    }

    /// Reborrows as a read-only view.
    #[inline]
    pub fn as_view(&self) -> DirectoryView<'_> {
        DirectoryView { data: self.data }
    }

    /// Initializes a fresh directory at global depth 0.
    ///
    /// The caller hands in a zeroed page; only the self page id needs
    /// writing, and entry 0's bucket is set separately once allocated.
    pub fn init(&mut self, page_id: PageId) {
        self.data[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4].copy_from_slice(&page_id.to_le_bytes());
    }

    /// Returns the global depth.
    #[inline]
    pub fn global_depth(&self) -> u32 {
        self.as_view().global_depth()
    }

    /// Number of live directory entries.
    #[inline]
    pub fn size(&self) -> u32 {
        self.as_view().size()
    }

    /// Returns the local depth of entry `idx`.
    #[inline]
    pub fn local_depth(&self, idx: u32) -> u32 {
        self.as_view().local_depth(idx)
    }

    /// Returns the bucket page id of entry `idx`.
    #[inline]
    pub fn bucket_page_id(&self, idx: u32) -> PageId {
        self.as_view().bucket_page_id(idx)
    }

    /// Returns the sibling index of `idx` at its current local depth.
    #[inline]
    pub fn split_image_index(&self, idx: u32) -> u32 {
        self.as_view().split_image_index(idx)
    }

    fn set_global_depth(&mut self, depth: u32) {
        self.data[OFFSET_GLOBAL_DEPTH..OFFSET_GLOBAL_DEPTH + 4]
            .copy_from_slice(&depth.to_le_bytes());
    }

    /// Doubles the directory: the low half's entries are mirrored into the
    /// high half, then the global depth is bumped. Every hash that mapped
    /// to entry `i` now maps to `i` or `i + old_size`, both of which carry
    /// the old entry's bucket and depth.
    pub fn incr_global_depth(&mut self) {
        let gd = self.global_depth();
        assert!(
            gd < MAX_GLOBAL_DEPTH,
            "directory already at maximum global depth"
        );
        let size = 1u32 << gd;
        for i in 0..size {
            let pid = self.bucket_page_id(i);
            let ld = self.local_depth(i);
            self.set_bucket_page_id(size + i, pid);
            self.set_local_depth(size + i, ld);
        }
        self.set_global_depth(gd + 1);
    }

    /// Halves the directory by decrementing the global depth.
    pub fn decr_global_depth(&mut self) {
        let gd = self.global_depth();
        assert!(gd > 0, "cannot shrink a directory of size 1");
        self.set_global_depth(gd - 1);
    }

    /// Sets the local depth of entry `idx`.
    #[inline]
    pub fn set_local_depth(&mut self, idx: u32, depth: u32) {
        debug_assert!(depth <= MAX_GLOBAL_DEPTH);
        self.data[OFFSET_LOCAL_DEPTHS + idx as usize] = depth as u8;
    }

    /// Increments the local depth of entry `idx`.
    #[inline]
    pub fn incr_local_depth(&mut self, idx: u32) {
        let ld = self.local_depth(idx);
        self.set_local_depth(idx, ld + 1);
    }

    /// Decrements the local depth of entry `idx`.
    #[inline]
    pub fn decr_local_depth(&mut self, idx: u32) {
        let ld = self.local_depth(idx);
        debug_assert!(ld > 0);
        self.set_local_depth(idx, ld - 1);
    }

    /// Points entry `idx` at `page_id`.
    #[inline]
    pub fn set_bucket_page_id(&mut self, idx: u32, page_id: PageId) {
        let off = OFFSET_BUCKET_PAGE_IDS + 4 * idx as usize;
        self.data[off..off + 4].copy_from_slice(&page_id.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::constants::PAGE_SIZE;

    fn empty_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_init() {
        let mut page = empty_page();
        let mut dir = DirectoryViewMut::new(&mut page);
        dir.init(PageId::new(5));
        dir.set_bucket_page_id(0, PageId::new(6));

        let view = dir.as_view();
        assert_eq!(view.page_id(), PageId::new(5));
        assert!(!view.lsn().is_valid());
        assert_eq!(view.global_depth(), 0);
        assert_eq!(view.size(), 1);
        assert_eq!(view.bucket_page_id(0), PageId::new(6));
        view.verify_integrity();
    }

    #[test]
    fn test_local_depth_increments() {
        let mut page = empty_page();
        let mut dir = DirectoryViewMut::new(&mut page);
        dir.init(PageId::new(0));
        dir.incr_global_depth();

        dir.incr_local_depth(1);
        assert_eq!(dir.local_depth(1), 1);
        dir.decr_local_depth(1);
        assert_eq!(dir.local_depth(1), 0);
    }

    #[test]
    fn test_grow_mirrors_low_half() {
        let mut page = empty_page();
        let mut dir = DirectoryViewMut::new(&mut page);
        dir.init(PageId::new(0));
        dir.set_bucket_page_id(0, PageId::new(10));

        dir.incr_global_depth();
        assert_eq!(dir.global_depth(), 1);
        assert_eq!(dir.size(), 2);
        assert_eq!(dir.bucket_page_id(1), PageId::new(10));
        assert_eq!(dir.local_depth(1), 0);
        dir.as_view().verify_integrity();

        dir.incr_global_depth();
        assert_eq!(dir.size(), 4);
        for i in 0..4 {
            assert_eq!(dir.bucket_page_id(i), PageId::new(10));
        }
        dir.as_view().verify_integrity();
    }

    #[test]
    fn test_depth_masks() {
        let mut page = empty_page();
        let mut dir = DirectoryViewMut::new(&mut page);
        dir.init(PageId::new(0));
        dir.incr_global_depth();
        dir.incr_global_depth();
        dir.incr_global_depth();

        assert_eq!(dir.as_view().global_depth_mask(), 0b111);

        dir.set_local_depth(5, 2);
        let view = dir.as_view();
        assert_eq!(view.local_depth_mask(5), 0b11);
        assert_eq!(view.local_high_bit(5), 0b100);
    }

    #[test]
    fn test_split_image_index() {
        let mut page = empty_page();
        let mut dir = DirectoryViewMut::new(&mut page);
        dir.init(PageId::new(0));
        for _ in 0..3 {
            dir.incr_global_depth();
        }
        dir.set_local_depth(6, 3);
        assert_eq!(dir.split_image_index(6), 2); // flip bit 2 of 0b110

        dir.set_local_depth(6, 1);
        assert_eq!(dir.split_image_index(6), 7); // flip bit 0
    }

    #[test]
    fn test_can_shrink() {
        let mut page = empty_page();
        let mut dir = DirectoryViewMut::new(&mut page);
        dir.init(PageId::new(0));
        assert!(!dir.as_view().can_shrink()); // depth 0 cannot shrink

        dir.incr_global_depth();
        assert!(dir.as_view().can_shrink()); // both entries at depth 0

        dir.set_local_depth(1, 1);
        assert!(!dir.as_view().can_shrink());

        dir.set_local_depth(1, 0);
        dir.decr_global_depth();
        assert_eq!(dir.size(), 1);
    }

    #[test]
    #[should_panic(expected = "share a suffix")]
    fn test_verify_integrity_catches_mismatched_siblings() {
        let mut page = empty_page();
        let mut dir = DirectoryViewMut::new(&mut page);
        dir.init(PageId::new(0));
        dir.set_bucket_page_id(0, PageId::new(1));
        dir.incr_global_depth();
        // Both entries claim depth 0 (one shared bucket) but point to
        // different pages.
        dir.set_bucket_page_id(1, PageId::new(2));
        dir.as_view().verify_integrity();
    }
}
