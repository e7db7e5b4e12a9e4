//! Page-id sharded buffer pool.
//!
//! `ParallelBufferPool` spreads the page-id space across N independent
//! [`BufferPool`] instances so that unrelated page accesses contend on N
//! instance latches instead of one. Routing is `page_id % N`; each instance
//! allocates only ids congruent to its index, which keeps routing and
//! allocation consistent without any shared allocation state.

use std::sync::Arc;

use parking_lot::Mutex;

use burrow_common::types::PageId;

use super::error::{BufferError, BufferResult};
use super::guard::PageGuard;
use super::pool::BufferPool;
use crate::disk::DiskManager;

/// N independent buffer pools behind one interface.
///
/// The only shared mutable state is the round-robin cursor used by
/// [`new_page`](ParallelBufferPool::new_page).
pub struct ParallelBufferPool {
    pools: Vec<BufferPool>,
    /// Instance to try first on the next `new_page`.
    next_instance: Mutex<usize>,
}

impl ParallelBufferPool {
    /// Creates `num_instances` pools of `pool_size` frames each, all backed
    /// by the same disk manager.
    pub fn new(num_instances: usize, pool_size: usize, disk: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0, "num_instances must be > 0");
        let pools = (0..num_instances)
            .map(|i| BufferPool::with_instance(pool_size, num_instances, i, Arc::clone(&disk)))
            .collect();
        Self {
            pools,
            next_instance: Mutex::new(0),
        }
    }

    /// Total frame capacity across all instances.
    pub fn pool_size(&self) -> usize {
        self.pools.iter().map(BufferPool::pool_size).sum()
    }

    /// Number of instances.
    pub fn num_instances(&self) -> usize {
        self.pools.len()
    }

    /// Returns the instance responsible for `page_id`.
    fn pool_for(&self, page_id: PageId) -> &BufferPool {
        &self.pools[page_id.as_u32() as usize % self.pools.len()]
    }

    /// Fetches a page from the responsible instance.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<PageGuard<'_>> {
        self.pool_for(page_id).fetch_page(page_id)
    }

    /// Allocates a new page, walking instances round-robin until one has a
    /// frame to spare.
    pub fn new_page(&self) -> BufferResult<PageGuard<'_>> {
        let mut cursor = self.next_instance.lock();
        for _ in 0..self.pools.len() {
            let idx = *cursor;
            *cursor = (*cursor + 1) % self.pools.len();
            match self.pools[idx].new_page() {
                Ok(guard) => return Ok(guard),
                Err(BufferError::NoFreeFrames) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferError::NoFreeFrames)
    }

    /// Unpins a page on the responsible instance.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.pool_for(page_id).unpin_page(page_id, is_dirty)
    }

    /// Flushes a page on the responsible instance.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        self.pool_for(page_id).flush_page(page_id)
    }

    /// Flushes every resident page of every instance.
    pub fn flush_all_pages(&self) {
        for pool in &self.pools {
            pool.flush_all_pages();
        }
    }

    /// Deletes a page on the responsible instance.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        self.pool_for(page_id).delete_page(page_id)
    }
}

impl std::fmt::Debug for ParallelBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBufferPool")
            .field("num_instances", &self.pools.len())
            .field("pool_size", &self.pool_size())
            .finish()
    }
}
