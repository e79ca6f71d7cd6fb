//! Least-recently-unpinned victim selection for the buffer pool.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::FrameId;

/// Tracks the frames that are eligible for eviction, ordered by the time
/// they last became unpinned.
///
/// The pool calls [`unpin`](LruReplacer::unpin) when a frame's pin count
/// drops to zero and [`pin`](LruReplacer::pin) whenever a frame is handed
/// out again; [`victim`](LruReplacer::victim) pops the frame whose unpin is
/// oldest. The `LruCache` representation gives O(1) for all three.
pub struct LruReplacer {
    queue: Mutex<LruCache<FrameId, ()>>,
}

impl LruReplacer {
    /// `capacity` is the number of frames in the pool; the replacer never
    /// tracks more than that.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            queue: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Removes and returns the least-recently-unpinned frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        self.queue.lock().pop_lru().map(|(frame_id, ())| frame_id)
    }

    /// Takes `frame_id` out of the eviction queue. No-op if untracked.
    pub fn pin(&self, frame_id: FrameId) {
        self.queue.lock().pop(&frame_id);
    }

    /// Makes `frame_id` eligible for eviction. Idempotent: a frame already
    /// in the queue keeps its position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut queue = self.queue.lock();
        if !queue.contains(&frame_id) {
            queue.put(frame_id, ());
        }
    }

    /// Number of frames currently eligible for eviction.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
