//! RAII page guards.
//!
//! A [`PageGuard`] represents one pin on a resident page. Dropping the
//! guard releases the pin, passing along whether the holder dirtied the
//! page. Page contents are reached through [`data`](PageGuard::data) /
//! [`data_mut`](PageGuard::data_mut), which take the per-frame latch in
//! shared or exclusive mode for exactly as long as the returned borrow
//! lives.

use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use burrow_common::types::PageId;

use super::frame::BufferFrame;
use super::pool::BufferPool;

/// A pinned page.
///
/// The pin is held from creation until drop; the page cannot be evicted in
/// between. Callers that mutate the page through [`data_mut`] must also
/// call [`mark_dirty`] so the write-back happens — taking the write latch
/// alone does not imply a modification (an insert into a full bucket
/// changes nothing).
///
/// [`data_mut`]: PageGuard::data_mut
/// [`mark_dirty`]: PageGuard::mark_dirty
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame: Arc<BufferFrame>,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPool, frame: Arc<BufferFrame>, page_id: PageId) -> Self {
        Self {
            pool,
            frame,
            page_id,
            dirty: false,
        }
    }

    /// Returns the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Takes the page latch in shared mode and returns the page bytes.
    #[inline]
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.read_data()
    }

    /// Takes the page latch in exclusive mode and returns the page bytes.
    #[inline]
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.frame.write_data()
    }

    /// Records that the holder modified the page; the pin will be released
    /// with the dirty flag set.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use tempfile::tempdir;

    #[test]
    fn test_guard_unpins_on_drop() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        let pool = BufferPool::new(4, disk);

        let guard = pool.new_page().unwrap();
        assert_eq!(pool.pinned_frames(), 1);
        drop(guard);
        assert_eq!(pool.pinned_frames(), 0);
    }

    #[test]
    fn test_guard_carries_dirty_flag() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        let pool = BufferPool::new(4, disk);

        let page_id = pool.new_page().unwrap().page_id();
        pool.flush_page(page_id);
        assert_eq!(pool.stats().dirty_frames, 0);

        {
            let mut guard = pool.fetch_page(page_id).unwrap();
            guard.data_mut()[0] = 7;
            guard.mark_dirty();
        }
        assert_eq!(pool.stats().dirty_frames, 1);
    }

    #[test]
    fn test_concurrent_readers_share_latch() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        let pool = BufferPool::new(4, disk);

        let page_id = pool.new_page().unwrap().page_id();
        let a = pool.fetch_page(page_id).unwrap();
        let b = pool.fetch_page(page_id).unwrap();

        // Two shared latches on the same frame coexist.
        let ra = a.data();
        let rb = b.data();
        assert_eq!(ra[0], rb[0]);
    }
}
