//! LRU replacement policy for the buffer pool.
//!
//! The replacer tracks frames whose pin count has dropped to zero and hands
//! the least-recently-unpinned one back when the pool needs a victim. It
//! uses a HashMap for O(1) lookups and a doubly-linked list for ordering:
//! most-recently-unpinned at the front, victim candidates popped from the
//! back.
//!
//! A deliberately minimal notion of recency: unpinning a frame that is
//! already tracked does NOT move it to the front. Recency is established
//! once, at the pin-count-reaching-zero transition.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use burrow_common::types::FrameId;

/// A node in the LRU linked list.
struct Node {
    frame_id: FrameId,
    prev: Option<NonNull<Node>>,
    next: Option<NonNull<Node>>,
}

impl Node {
    fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            prev: None,
            next: None,
        }
    }
}

/// Linked-list state behind the replacer's mutex.
struct LruList {
    /// Map from frame id to node pointer.
    map: HashMap<FrameId, NonNull<Node>>,
    /// Head of the list (most recently unpinned).
    head: Option<NonNull<Node>>,
    /// Tail of the list (least recently unpinned).
    tail: Option<NonNull<Node>>,
}

// Safety: LruList manages its own heap nodes and is only ever accessed
// under the replacer's mutex.
unsafe impl Send for LruList {}

impl LruList {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Pushes a node to the front of the list.
    fn push_front(&mut self, node_ptr: NonNull<Node>) {
        unsafe {
            (*node_ptr.as_ptr()).prev = None;
            (*node_ptr.as_ptr()).next = self.head;

            if let Some(head) = self.head {
                (*head.as_ptr()).prev = Some(node_ptr);
            }

            self.head = Some(node_ptr);

            if self.tail.is_none() {
                self.tail = Some(node_ptr);
            }
        }
    }

    /// Unlinks a node from the list.
    fn unlink(&mut self, node_ptr: NonNull<Node>) {
        unsafe {
            let prev = (*node_ptr.as_ptr()).prev;
            let next = (*node_ptr.as_ptr()).next;

            if let Some(prev) = prev {
                (*prev.as_ptr()).next = next;
            } else {
                self.head = next;
            }

            if let Some(next) = next {
                (*next.as_ptr()).prev = prev;
            } else {
                self.tail = prev;
            }
        }
    }
}

impl Drop for LruList {
    fn drop(&mut self) {
        let mut current = self.head;
        while let Some(node_ptr) = current {
            unsafe {
                current = (*node_ptr.as_ptr()).next;
                drop(Box::from_raw(node_ptr.as_ptr()));
            }
        }
    }
}

/// LRU victim selection for buffer frames.
///
/// The buffer pool notifies the replacer on pin transitions:
/// [`unpin`](LruReplacer::unpin) when a frame's pin count reaches zero,
/// [`pin`](LruReplacer::pin) when a tracked frame is pinned again, and
/// [`victim`](LruReplacer::victim) when it needs a frame to reuse.
pub struct LruReplacer {
    inner: Mutex<LruList>,
}

impl LruReplacer {
    /// Creates a replacer sized for `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruList::new(capacity)),
        }
    }

    /// Removes and returns the least recently unpinned frame, or `None`
    /// when no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut list = self.inner.lock();
        let tail = list.tail?;
        // Safety: tail is a live node owned by this list.
        let frame_id = unsafe { (*tail.as_ptr()).frame_id };
        list.unlink(tail);
        list.map.remove(&frame_id);
        unsafe {
            drop(Box::from_raw(tail.as_ptr()));
        }
        Some(frame_id)
    }

    /// Stops tracking `frame_id`; no-op if it is not tracked.
    pub fn pin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if let Some(node_ptr) = list.map.remove(&frame_id) {
            list.unlink(node_ptr);
            // Safety: we just removed the node from the map, so we own it.
            unsafe {
                drop(Box::from_raw(node_ptr.as_ptr()));
            }
        }
    }

    /// Starts tracking `frame_id` as most recently unpinned.
    ///
    /// No-op if the frame is already tracked: a redundant unpin must not
    /// refresh its position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if list.map.contains_key(&frame_id) {
            return;
        }
        let node = Box::new(Node::new(frame_id));
        let node_ptr = NonNull::new(Box::into_raw(node)).expect("Box::into_raw is non-null");
        list.push_front(node_ptr);
        list.map.insert(frame_id, node_ptr);
    }

    /// Returns the number of frames currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns true if no frame is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LruReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruReplacer")
            .field("tracked", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(id: usize) -> FrameId {
        FrameId::new(id)
    }

    #[test]
    fn test_victim_order_is_lru() {
        let replacer = LruReplacer::new(7);
        for id in [1, 2, 3, 4, 5] {
            replacer.unpin(fid(id));
        }
        assert_eq!(replacer.len(), 5);

        // Frame 1 was unpinned first, so it is the LRU victim.
        assert_eq!(replacer.victim(), Some(fid(1)));
        assert_eq!(replacer.len(), 4);
    }

    #[test]
    fn test_pin_removes_candidate() {
        let replacer = LruReplacer::new(7);
        for id in [1, 2, 3, 4, 5] {
            replacer.unpin(fid(id));
        }
        assert_eq!(replacer.victim(), Some(fid(1)));

        replacer.pin(fid(3));
        assert_eq!(replacer.victim(), Some(fid(2)));
        assert_eq!(replacer.victim(), Some(fid(4)));
        assert_eq!(replacer.victim(), Some(fid(5)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_redundant_unpin_does_not_refresh() {
        let replacer = LruReplacer::new(7);
        replacer.unpin(fid(5));
        replacer.unpin(fid(6));

        // 5 is already tracked; this must not move it to the front.
        replacer.unpin(fid(5));
        assert_eq!(replacer.len(), 2);
        assert_eq!(replacer.victim(), Some(fid(5)));
        assert_eq!(replacer.victim(), Some(fid(6)));
    }

    #[test]
    fn test_pin_untracked_is_noop() {
        let replacer = LruReplacer::new(7);
        replacer.pin(fid(9));
        assert!(replacer.is_empty());
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_interleaved() {
        let replacer = LruReplacer::new(4);
        replacer.unpin(fid(0));
        replacer.unpin(fid(1));
        replacer.pin(fid(0));
        replacer.unpin(fid(2));
        replacer.unpin(fid(0));

        // Order of unpins now: 1, 2, 0.
        assert_eq!(replacer.victim(), Some(fid(1)));
        assert_eq!(replacer.victim(), Some(fid(2)));
        assert_eq!(replacer.victim(), Some(fid(0)));
    }
}
