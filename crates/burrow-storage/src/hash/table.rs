//! The extendible hash table.
//!
//! Layout: one directory page plus one page per bucket, all reached
//! through the buffer pool. A key hashes to 32 bits; the low
//! `global_depth` bits select a directory entry; the entry names the
//! bucket page.
//!
//! # Latching protocol
//!
//! Two levels, always acquired table-first:
//!
//! - The **table latch** spans each public operation. Lookups, fast-path
//!   inserts, and removes take it shared; splits and merges take it
//!   exclusive. Upgrades drop the shared latch and re-acquire exclusive,
//!   then re-read everything, since a writer may have slipped in between.
//! - The **page latch** of a bucket frame guards its payload and is held
//!   only while the payload is touched, released before pins are given
//!   back. In a split, the origin bucket is latched before the new one.
//!
//! The directory payload is only written under the exclusive table latch,
//! so shared-mode holders may read it with the plain page latch.
//!
//! Every fetched page is unpinned on every exit path; the page guards make
//! this structural rather than a per-path obligation.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use burrow_common::constants::MAX_GLOBAL_DEPTH;
use burrow_common::types::{FixedCodec, PageId, Transaction};

use crate::buffer::{BufferPool, BufferResult, PageGuard};
use crate::page::{BucketView, BucketViewMut, DirectoryView, DirectoryViewMut};

use super::hasher::{KeyHasher, SipKeyHasher};
use super::{KeyComparator, OrdComparator};

/// Fast-path insert result.
enum InsertStatus {
    /// The bucket had room; the flag is whether the pair went in.
    Done(bool),
    /// The bucket is full; a split is needed.
    BucketFull,
}

/// Split attempt result.
enum SplitStatus {
    /// A bucket was split; retry the insert.
    Split,
    /// A racing remove made room before we split; retry the insert.
    Retry,
    /// The bucket is already at maximum local depth; the insert fails.
    DepthExhausted,
}

/// A disk-backed extendible hash index.
///
/// Implements a multimap: one key may carry many values, but a given
/// `(key, value)` pair is stored at most once. All operations return
/// `bool`; buffer pool exhaustion surfaces as `false` rather than an
/// error (the caller may retry once pins drain).
///
/// The transaction handle accepted by each operation is carried for the
/// caller's benefit and ignored by the index.
pub struct ExtendibleHashTable<K, V, C = OrdComparator, H = SipKeyHasher> {
    /// Buffer pool backing every page access.
    pool: Arc<BufferPool>,
    /// Key equality for bucket scans.
    comparator: C,
    /// Hash function feeding the directory index.
    hasher: H,
    /// Directory page id; INVALID until lazily created.
    directory_page_id: AtomicU32,
    /// Serializes the one-time directory creation.
    init_lock: Mutex<()>,
    /// Table latch (see module docs).
    table_latch: RwLock<()>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H> ExtendibleHashTable<K, V, C, H>
where
    K: FixedCodec,
    V: FixedCodec,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates an index on `pool`. No pages are touched until the first
    /// operation, which lazily allocates the directory and first bucket.
    pub fn new(pool: Arc<BufferPool>, comparator: C, hasher: H) -> Self {
        Self {
            pool,
            comparator,
            hasher,
            directory_page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            init_lock: Mutex::new(()),
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        }
    }

    /// Reattaches to an index whose directory already exists on disk.
    ///
    /// `directory_page_id` is the value a previous session obtained from
    /// [`directory_page_id`](Self::directory_page_id); callers persist it
    /// in their own root (conventionally the header page).
    pub fn open(
        pool: Arc<BufferPool>,
        comparator: C,
        hasher: H,
        directory_page_id: PageId,
    ) -> Self {
        let table = Self::new(pool, comparator, hasher);
        table
            .directory_page_id
            .store(directory_page_id.as_u32(), Ordering::Release);
        table
    }

    /// Returns the directory page id, or `PageId::INVALID` before first use.
    pub fn directory_page_id(&self) -> PageId {
        PageId::new(self.directory_page_id.load(Ordering::Acquire))
    }

    /// Appends every value stored under `key` to `result`.
    /// Returns true iff at least one was appended.
    pub fn get_value(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
        result: &mut Vec<V>,
    ) -> bool {
        let _table = self.table_latch.read();
        let Ok(dir_guard) = self.directory_guard() else {
            return false;
        };
        let bucket_page_id = {
            let data = dir_guard.data();
            let dir = DirectoryView::new(&data);
            dir.bucket_page_id(self.dir_index(key, &dir))
        };
        let Ok(bucket_guard) = self.pool.fetch_page(bucket_page_id) else {
            return false;
        };
        let data = bucket_guard.data();
        BucketView::<K, V>::new(&data).get_value(key, &self.comparator, result)
    }

    /// Inserts `(key, value)`.
    ///
    /// Returns false when the pair is already present, when the target
    /// bucket sits at maximum local depth and cannot split, or on buffer
    /// pool exhaustion.
    pub fn insert(&self, _txn: Option<&Transaction>, key: &K, value: &V) -> bool {
        loop {
            match self.try_insert(key, value) {
                Ok(InsertStatus::Done(inserted)) => return inserted,
                Ok(InsertStatus::BucketFull) => {}
                Err(_) => return false,
            }
            // Full bucket: upgrade to the exclusive latch and split, then
            // come back around. A split may leave the target bucket full
            // again when every mapping shares the longer suffix, so this
            // can repeat until the depth limit cuts it off.
            match self.split_insert(key) {
                Ok(SplitStatus::Split | SplitStatus::Retry) => {}
                Ok(SplitStatus::DepthExhausted) => return false,
                Err(_) => return false,
            }
        }
    }

    /// Removes `(key, value)`. Returns false if no such pair is stored.
    ///
    /// A removal that empties its bucket triggers a one-shot merge with
    /// the bucket's split image when both sit at the same local depth.
    pub fn remove(&self, _txn: Option<&Transaction>, key: &K, value: &V) -> bool {
        let removed;
        let needs_merge;
        {
            let _table = self.table_latch.read();
            let Ok(dir_guard) = self.directory_guard() else {
                return false;
            };
            let (bucket_page_id, local_depth, sibling_depth) = {
                let data = dir_guard.data();
                let dir = DirectoryView::new(&data);
                let idx = self.dir_index(key, &dir);
                let ld = dir.local_depth(idx);
                let sibling_ld = if ld > 0 {
                    dir.local_depth(dir.split_image_index(idx))
                } else {
                    0
                };
                (dir.bucket_page_id(idx), ld, sibling_ld)
            };
            let Ok(mut bucket_guard) = self.pool.fetch_page(bucket_page_id) else {
                return false;
            };
            let now_empty;
            {
                let mut data = bucket_guard.data_mut();
                let mut bucket = BucketViewMut::<K, V>::new(&mut data);
                removed = bucket.remove(key, value, &self.comparator);
                now_empty = removed && bucket.as_view().is_empty();
            }
            if removed {
                bucket_guard.mark_dirty();
            }
            needs_merge = now_empty && local_depth > 0 && sibling_depth == local_depth;
        }
        if needs_merge {
            self.merge(key);
        }
        removed
    }

    /// Returns the directory's current global depth.
    pub fn global_depth(&self) -> u32 {
        let _table = self.table_latch.read();
        let Ok(dir_guard) = self.directory_guard() else {
            return 0;
        };
        let data = dir_guard.data();
        DirectoryView::new(&data).global_depth()
    }

    /// Total number of live mappings, summed across buckets.
    pub fn size(&self) -> usize {
        let _table = self.table_latch.read();
        let Ok(dir_guard) = self.directory_guard() else {
            return 0;
        };
        let bucket_pages = {
            let data = dir_guard.data();
            let dir = DirectoryView::new(&data);
            let mut seen = HashSet::new();
            let mut pages = Vec::new();
            for i in 0..dir.size() {
                let pid = dir.bucket_page_id(i);
                if seen.insert(pid) {
                    pages.push(pid);
                }
            }
            pages
        };

        let mut total = 0;
        for page_id in bucket_pages {
            let Ok(bucket_guard) = self.pool.fetch_page(page_id) else {
                continue;
            };
            let data = bucket_guard.data();
            total += BucketView::<K, V>::new(&data).num_readable();
        }
        total
    }

    /// Asserts the directory invariants; panics on violation.
    pub fn verify_integrity(&self) {
        let _table = self.table_latch.read();
        let dir_guard = self
            .directory_guard()
            .expect("buffer pool exhausted while verifying");
        let data = dir_guard.data();
        DirectoryView::new(&data).verify_integrity();
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    #[inline]
    fn hash32(&self, key: &K) -> u32 {
        self.hasher.hash32(key)
    }

    #[inline]
    fn dir_index(&self, key: &K, dir: &DirectoryView<'_>) -> u32 {
        self.hash32(key) & dir.global_depth_mask()
    }

    /// Pins and returns the directory page, creating it (plus the first
    /// bucket) on first use.
    fn directory_guard(&self) -> BufferResult<PageGuard<'_>> {
        let current = PageId::new(self.directory_page_id.load(Ordering::Acquire));
        if current.is_valid() {
            return self.pool.fetch_page(current);
        }

        let _init = self.init_lock.lock();
        // Double-check: another thread may have created it while we waited.
        let current = PageId::new(self.directory_page_id.load(Ordering::Acquire));
        if current.is_valid() {
            return self.pool.fetch_page(current);
        }

        let mut dir_guard = self.pool.new_page()?;
        let dir_page_id = dir_guard.page_id();
        let mut bucket_guard = self.pool.new_page()?;
        {
            let mut data = dir_guard.data_mut();
            let mut dir = DirectoryViewMut::new(&mut data);
            dir.init(dir_page_id);
            dir.set_bucket_page_id(0, bucket_guard.page_id());
        }
        dir_guard.mark_dirty();
        bucket_guard.mark_dirty();
        drop(bucket_guard);

        tracing::debug!(page_id = %dir_page_id, "created hash table directory");
        self.directory_page_id
            .store(dir_page_id.as_u32(), Ordering::Release);
        Ok(dir_guard)
    }

    /// Fast-path insert under the shared table latch.
    fn try_insert(&self, key: &K, value: &V) -> BufferResult<InsertStatus> {
        let _table = self.table_latch.read();
        let dir_guard = self.directory_guard()?;
        let bucket_page_id = {
            let data = dir_guard.data();
            let dir = DirectoryView::new(&data);
            dir.bucket_page_id(self.dir_index(key, &dir))
        };
        let mut bucket_guard = self.pool.fetch_page(bucket_page_id)?;
        let inserted;
        {
            let mut data = bucket_guard.data_mut();
            let mut bucket = BucketViewMut::<K, V>::new(&mut data);
            if bucket.as_view().is_full() {
                return Ok(InsertStatus::BucketFull);
            }
            inserted = bucket.insert(key, value, &self.comparator);
        }
        if inserted {
            bucket_guard.mark_dirty();
        }
        Ok(InsertStatus::Done(inserted))
    }

    /// Splits the bucket `key` maps to, under the exclusive table latch.
    fn split_insert(&self, key: &K) -> BufferResult<SplitStatus> {
        let _table = self.table_latch.write();
        let mut dir_guard = self.directory_guard()?;

        let (bucket_idx, local_depth, origin_page_id) = {
            let data = dir_guard.data();
            let dir = DirectoryView::new(&data);
            let idx = self.dir_index(key, &dir);
            (idx, dir.local_depth(idx), dir.bucket_page_id(idx))
        };

        if local_depth >= MAX_GLOBAL_DEPTH {
            return Ok(SplitStatus::DepthExhausted);
        }

        let mut origin_guard = self.pool.fetch_page(origin_page_id)?;
        {
            // Re-check after the latch upgrade: a remove may have made
            // room while we held no latch at all.
            let data = origin_guard.data();
            if !BucketView::<K, V>::new(&data).is_full() {
                return Ok(SplitStatus::Retry);
            }
        }

        let mut split_guard = self.pool.new_page()?;
        let split_page_id = split_guard.page_id();

        let new_depth = local_depth + 1;
        let suffix_mask = (1u32 << new_depth) - 1;
        let split_idx;
        let global_mask;
        {
            let mut data = dir_guard.data_mut();
            let mut dir = DirectoryViewMut::new(&mut data);
            if local_depth == dir.global_depth() {
                dir.incr_global_depth();
            }
            dir.incr_local_depth(bucket_idx);
            split_idx = dir.split_image_index(bucket_idx);

            // Point every entry of the two new equivalence classes at its
            // bucket; entries outside them are untouched.
            for i in 0..dir.size() {
                if i & suffix_mask == bucket_idx & suffix_mask {
                    dir.set_bucket_page_id(i, origin_page_id);
                    dir.set_local_depth(i, new_depth);
                } else if i & suffix_mask == split_idx & suffix_mask {
                    dir.set_bucket_page_id(i, split_page_id);
                    dir.set_local_depth(i, new_depth);
                }
            }
            global_mask = dir.as_view().global_depth_mask();
        }

        {
            let mut origin_data = origin_guard.data_mut();
            let mut split_data = split_guard.data_mut();
            let mut origin_bucket = BucketViewMut::<K, V>::new(&mut origin_data);
            let mut split_bucket = BucketViewMut::<K, V>::new(&mut split_data);

            let entries = origin_bucket.as_view().array_copy();
            origin_bucket.clear();
            for (k, v) in entries {
                let target = self.hash32(&k) & global_mask;
                if target & suffix_mask == bucket_idx & suffix_mask {
                    assert!(
                        origin_bucket.insert(&k, &v, &self.comparator),
                        "redistribution overflowed the origin bucket"
                    );
                } else if target & suffix_mask == split_idx & suffix_mask {
                    assert!(
                        split_bucket.insert(&k, &v, &self.comparator),
                        "redistribution overflowed the split bucket"
                    );
                } else {
                    unreachable!("mapping rehashed outside the origin/split classes");
                }
            }
        }

        dir_guard.mark_dirty();
        origin_guard.mark_dirty();
        split_guard.mark_dirty();
        tracing::debug!(
            bucket = bucket_idx,
            split_image = split_idx,
            depth = new_depth,
            "split bucket"
        );
        Ok(SplitStatus::Split)
    }

    /// Folds the now-empty bucket `key` maps to into its split image,
    /// under the exclusive table latch.
    ///
    /// Merging is one-shot: the surviving bucket is not considered for a
    /// further merge until a later remove empties it again.
    fn merge(&self, key: &K) {
        let _table = self.table_latch.write();
        let Ok(mut dir_guard) = self.directory_guard() else {
            return;
        };

        let (bucket_idx, local_depth, origin_page_id, split_idx, sibling_page_id) = {
            let data = dir_guard.data();
            let dir = DirectoryView::new(&data);
            let idx = self.dir_index(key, &dir);
            if idx >= dir.size() {
                return;
            }
            let ld = dir.local_depth(idx);
            if ld == 0 {
                return;
            }
            let split_idx = dir.split_image_index(idx);
            if dir.local_depth(split_idx) != ld {
                return;
            }
            (
                idx,
                ld,
                dir.bucket_page_id(idx),
                split_idx,
                dir.bucket_page_id(split_idx),
            )
        };

        {
            // Conditions were re-read under the exclusive latch, but the
            // bucket may have been refilled in the window after the
            // triggering remove.
            let Ok(bucket_guard) = self.pool.fetch_page(origin_page_id) else {
                return;
            };
            let data = bucket_guard.data();
            if !BucketView::<K, V>::new(&data).is_empty() {
                return;
            }
        }

        if !self.pool.delete_page(origin_page_id) {
            tracing::debug!(page_id = %origin_page_id, "empty bucket still pinned, merge skipped");
            return;
        }

        {
            let mut data = dir_guard.data_mut();
            let mut dir = DirectoryViewMut::new(&mut data);
            let suffix_mask = (1u32 << local_depth) - 1;
            for i in 0..dir.size() {
                if i & suffix_mask == bucket_idx & suffix_mask {
                    dir.set_bucket_page_id(i, sibling_page_id);
                    dir.set_local_depth(i, local_depth - 1);
                } else if i & suffix_mask == split_idx & suffix_mask {
                    dir.set_local_depth(i, local_depth - 1);
                }
            }
            while dir.as_view().can_shrink() {
                dir.decr_global_depth();
            }
        }
        dir_guard.mark_dirty();
        tracing::debug!(bucket = bucket_idx, "merged empty bucket into its split image");
    }
}

impl<K, V, C, H> std::fmt::Debug for ExtendibleHashTable<K, V, C, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendibleHashTable")
            .field(
                "directory_page_id",
                &PageId::new(self.directory_page_id.load(Ordering::Acquire)),
            )
            .finish()
    }
}
