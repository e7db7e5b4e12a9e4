//! In-memory frames backing the buffer pool's page cache.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use burrow_common::constants::PAGE_SIZE;
use burrow_common::types::{FrameId, PageId};

/// One slot of the pool's frame array, holding a single page's bytes.
///
/// The byte buffer sits behind a read/write lock that doubles as the
/// per-page latch: callers hold it exactly while touching the payload.
/// Residency bookkeeping (page id, pin count, dirty flag) lives in
/// atomics beside it, so pinning and dirty-marking never contend on the
/// latch itself.
pub struct BufferFrame {
    /// This frame's fixed position in the pool.
    frame_id: FrameId,
    /// Page bytes; the lock doubles as the page latch.
    data: RwLock<Box<[u8]>>,
    /// Resident page, or INVALID while the frame is free.
    page_id: AtomicU32,
    /// Outstanding references; nonzero blocks eviction.
    pin_count: AtomicU32,
    /// Set when the in-memory page diverges from its disk image.
    dirty: AtomicBool,
}

impl BufferFrame {
    /// Creates a free frame with a zeroed page buffer.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// This frame's position in the pool.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The page currently resident here, INVALID when free.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Records which page now lives in this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    /// Current number of outstanding pins.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Takes one more pin; returns the count after.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases one pin; returns the count after.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "pin count underflow");
        old - 1
    }

    /// True while at least one pin is outstanding.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// True if the page needs writing back before the frame is reused.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Takes the page latch in shared mode and returns the page bytes.
    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Takes the page latch in exclusive mode and returns the page bytes.
    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Returns the frame to the free state: no page, no pins, clean.
    pub fn reset(&self) {
        self.page_id
            .store(PageId::INVALID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = BufferFrame::new(FrameId::new(0));
        assert_eq!(frame.frame_id().index(), 0);
        assert!(!frame.page_id().is_valid());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_pin_unpin() {
        let frame = BufferFrame::new(FrameId::new(0));
        assert!(!frame.is_pinned());

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert!(frame.is_pinned());
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_data_access() {
        let frame = BufferFrame::new(FrameId::new(0));

        {
            let mut data = frame.write_data();
            data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        }
        {
            let data = frame.read_data();
            assert_eq!(&data[0..4], &[1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_reset() {
        let frame = BufferFrame::new(FrameId::new(0));
        frame.set_page_id(PageId::new(42));
        frame.pin();
        frame.set_dirty(true);

        frame.reset();

        assert!(!frame.page_id().is_valid());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }
}
