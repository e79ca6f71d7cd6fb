use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::PageId;

/// One slot of the buffer pool.
///
/// `buf` holds the page bytes and doubles as the page latch: readers take
/// the shared side, writers the exclusive side. Bookkeeping fields are
/// guarded by the pool's own mutex, never by the buffer lock.
pub struct Frame {
    pub id: Option<PageId>,
    pub buf: Arc<RwLock<Box<[u8]>>>,
    pub dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(page_size: usize) -> Self {
        Self {
            id: None,
            buf: Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice())),
            dirty: false,
            pin_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.id = None;
        self.dirty = false;
        self.pin_count = 0;
    }
}
