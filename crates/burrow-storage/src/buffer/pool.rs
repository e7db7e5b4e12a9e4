//! Buffer pool implementation.
//!
//! The buffer pool manages a fixed-size cache of pages in memory,
//! handling page fetching, eviction, and write-back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use burrow_common::types::{FrameId, PageId};

use super::error::{BufferError, BufferResult};
use super::frame::BufferFrame;
use super::guard::PageGuard;
use super::replacer::LruReplacer;
use super::BufferPoolStats;
use crate::disk::DiskManager;

/// Bookkeeping state guarded by the pool's instance latch.
struct PoolState {
    /// Page table: maps PageId -> FrameId.
    page_table: HashMap<PageId, FrameId>,
    /// Frames that have never held a page (or were freed by delete).
    free_list: Vec<FrameId>,
}

/// A fixed-capacity cache of disk pages.
///
/// It provides:
/// - Pin-counted residency: pinned pages are never evicted
/// - LRU eviction among unpinned frames
/// - Dirty tracking with write-back on flush and eviction
/// - Per-frame read/write latches for page content access
///
/// Bookkeeping (page table, free list, pin transitions) happens under a
/// single instance latch; page contents are protected by the per-frame
/// latches handed out through [`PageGuard`].
pub struct BufferPool {
    /// Array of buffer frames.
    frames: Vec<Arc<BufferFrame>>,
    /// Bookkeeping behind the instance latch.
    state: Mutex<PoolState>,
    /// LRU replacer for eviction.
    replacer: LruReplacer,
    /// Disk manager for page I/O.
    disk: Arc<DiskManager>,
    /// Next page id this instance will allocate.
    next_page_id: AtomicU32,
    /// Distance between consecutive ids allocated by this instance.
    alloc_stride: u32,
    /// Fetch counter for statistics.
    fetch_count: AtomicU64,
    /// Hit counter for statistics.
    hit_count: AtomicU64,
    /// Eviction counter for statistics.
    eviction_count: AtomicU64,
    /// Flush counter for statistics.
    flush_count: AtomicU64,
}

impl BufferPool {
    /// Creates a standalone buffer pool with `pool_size` frames.
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        Self::with_instance(pool_size, 1, 0, disk)
    }

    /// Creates one instance of a sharded pool.
    ///
    /// Instance `instance_index` of `num_instances` allocates the page ids
    /// `instance_index, instance_index + num_instances, ...`, so that
    /// `page_id % num_instances` always routes a page back to the instance
    /// that created it.
    pub fn with_instance(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk: Arc<DiskManager>,
    ) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        assert!(
            instance_index < num_instances,
            "instance_index out of range"
        );

        let frames = (0..pool_size)
            .map(|i| Arc::new(BufferFrame::new(FrameId::new(i))))
            .collect();
        let free_list = (0..pool_size).rev().map(FrameId::new).collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk,
            next_page_id: AtomicU32::new(instance_index as u32),
            alloc_stride: num_instances as u32,
            fetch_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        }
    }

    /// Returns the number of frames in this pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Fetches a page, pinning it for the lifetime of the returned guard.
    ///
    /// A cache miss reads the page from disk, evicting the LRU unpinned
    /// frame if no free frame remains. Fails with
    /// [`BufferError::NoFreeFrames`] when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<PageGuard<'_>> {
        let mut state = self.state.lock();
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            frame.pin();
            self.replacer.pin(frame_id);
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(PageGuard::new(self, Arc::clone(frame), page_id));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = Arc::clone(&self.frames[frame_id.index()]);

        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                state.free_list.push(frame_id);
                return Err(e.into());
            }
        }

        frame.set_page_id(page_id);
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Allocates a fresh page and pins it for the returned guard.
    ///
    /// The frame is zeroed and marked dirty so the allocation reaches disk
    /// on the next flush or eviction.
    pub fn new_page(&self) -> BufferResult<PageGuard<'_>> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = self.allocate_page_id();
        let frame = Arc::clone(&self.frames[frame_id.index()]);

        frame.write_data().fill(0);
        frame.set_page_id(page_id);
        frame.set_dirty(true);
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Releases one pin on `page_id`, folding in the caller's dirty flag.
    ///
    /// Returns false if the page is not resident or not pinned. The dirty
    /// flag is only ever set here, never cleared. When the pin count
    /// reaches zero the frame becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes `page_id` back to disk, clearing its dirty flag.
    ///
    /// Returns false if the page is not resident. The page may be pinned.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];
        {
            let data = frame.read_data();
            if self.disk.write_page(page_id, &data).is_err() {
                return false;
            }
        }
        frame.set_dirty(false);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Writes every resident page back to disk.
    pub fn flush_all_pages(&self) {
        let state = self.state.lock();
        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.frames[frame_id.index()];
            let data = frame.read_data();
            if self.disk.write_page(page_id, &data).is_ok() {
                frame.set_dirty(false);
                self.flush_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drops `page_id` from the pool and deallocates it on disk.
    ///
    /// Returns false when the page is resident and still pinned. A
    /// non-resident page is deallocated directly.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.disk.deallocate_page(page_id);
            return true;
        };
        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() != 0 {
            return false;
        }
        state.page_table.remove(&page_id);
        // The frame sat in the replacer since its last unpin; it must not
        // be handed out as a victim once it is on the free list.
        self.replacer.pin(frame_id);
        frame.write_data().fill(0);
        frame.reset();
        state.free_list.push(frame_id);
        self.disk.deallocate_page(page_id);
        true
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in &self.frames {
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }
        BufferPoolStats {
            fetches: self.fetch_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            flushes: self.flush_count.load(Ordering::Relaxed),
            pinned_frames: pinned,
            dirty_frames: dirty,
        }
    }

    /// Returns the number of currently pinned frames.
    pub fn pinned_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_pinned()).count()
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Hands back a clean, unmapped frame: a free one if available,
    /// otherwise the LRU victim (written back first if dirty).
    fn acquire_frame(&self, state: &mut PoolState) -> BufferResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(BufferError::NoFreeFrames)?;
        let frame = &self.frames[frame_id.index()];

        if frame.is_dirty() {
            let result = {
                let data = frame.read_data();
                self.disk.write_page(frame.page_id(), &data)
            };
            if let Err(e) = result {
                // Put the victim back; its page is still intact.
                self.replacer.unpin(frame_id);
                return Err(e.into());
            }
        }

        state.page_table.remove(&frame.page_id());
        frame.reset();
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        Ok(frame_id)
    }

    /// Allocates the next page id of this instance's stripe.
    fn allocate_page_id(&self) -> PageId {
        PageId::new(self.next_page_id.fetch_add(self.alloc_stride, Ordering::SeqCst))
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("pool_size", &self.frames.len())
            .field("pages_cached", &self.state.lock().page_table.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::constants::PAGE_SIZE;
    use tempfile::tempdir;

    fn create_pool(pool_size: usize) -> (tempfile::TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        (dir, BufferPool::new(pool_size, disk))
    }

    #[test]
    fn test_pool_creation() {
        let (_dir, pool) = create_pool(10);
        assert_eq!(pool.pool_size(), 10);
        assert_eq!(pool.pinned_frames(), 0);
    }

    #[test]
    fn test_new_page_ids_are_sequential() {
        let (_dir, pool) = create_pool(10);
        for expected in 0..5u32 {
            let guard = pool.new_page().unwrap();
            assert_eq!(guard.page_id(), PageId::new(expected));
        }
    }

    #[test]
    fn test_new_page_is_zeroed_and_dirty() {
        let (_dir, pool) = create_pool(10);
        let guard = pool.new_page().unwrap();
        assert!(guard.data().iter().all(|&b| b == 0));
        let stats = pool.stats();
        assert_eq!(stats.dirty_frames, 1);
    }

    #[test]
    fn test_data_survives_eviction() {
        let (_dir, pool) = create_pool(2);

        let page_id = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0..4].copy_from_slice(&[9, 8, 7, 6]);
            guard.mark_dirty();
            guard.page_id()
        };

        // Fill the pool so the first page gets evicted.
        for _ in 0..2 {
            let _ = pool.new_page().unwrap();
        }

        let guard = pool.fetch_page(page_id).unwrap();
        assert_eq!(&guard.data()[0..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let (_dir, pool) = create_pool(3);

        let guards: Vec<_> = (0..3).map(|_| pool.new_page().unwrap()).collect();
        assert!(matches!(pool.new_page(), Err(BufferError::NoFreeFrames)));

        drop(guards);
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_unpin_nonexistent_page() {
        let (_dir, pool) = create_pool(3);
        assert!(!pool.unpin_page(PageId::new(99), false));
    }

    #[test]
    fn test_unpin_already_unpinned() {
        let (_dir, pool) = create_pool(3);
        let page_id = pool.new_page().unwrap().page_id();
        // The guard already unpinned on drop.
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_flush_page() {
        let (_dir, pool) = create_pool(3);
        let page_id = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.mark_dirty();
            guard.page_id()
        };

        assert!(pool.flush_page(page_id));
        assert_eq!(pool.stats().dirty_frames, 0);
        assert!(!pool.flush_page(PageId::new(500)));
    }

    #[test]
    fn test_flush_all_pages() {
        let (_dir, pool) = create_pool(5);
        for _ in 0..4 {
            let _ = pool.new_page().unwrap();
        }
        pool.flush_all_pages();
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_delete_page() {
        let (_dir, pool) = create_pool(3);
        let guard = pool.new_page().unwrap();
        let page_id = guard.page_id();

        // Pinned page cannot be deleted.
        assert!(!pool.delete_page(page_id));
        drop(guard);

        assert!(pool.delete_page(page_id));
        // The freed frame is usable again and the page is gone.
        assert!(pool.fetch_page(page_id).unwrap().data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_delete_nonresident_page() {
        let (_dir, pool) = create_pool(3);
        assert!(pool.delete_page(PageId::new(123)));
    }

    #[test]
    fn test_lru_eviction_order() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        let pool = BufferPool::new(2, disk.clone());

        let first = pool.new_page().unwrap().page_id();
        let second = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut().fill(0xBB);
            guard.mark_dirty();
            guard.page_id()
        };

        // Touch `first` so `second` becomes the LRU candidate.
        drop(pool.fetch_page(first).unwrap());

        let _third = pool.new_page().unwrap();

        // `second` must have been the eviction victim, written back dirty.
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(second, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xBB));
        // `first` is still resident with its pin count at zero.
        assert_eq!(pool.stats().evictions, 1);
    }

    #[test]
    fn test_instance_striped_allocation() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        let pool = BufferPool::with_instance(4, 3, 2, disk);

        assert_eq!(pool.new_page().unwrap().page_id(), PageId::new(2));
        assert_eq!(pool.new_page().unwrap().page_id(), PageId::new(5));
        assert_eq!(pool.new_page().unwrap().page_id(), PageId::new(8));
    }
}
