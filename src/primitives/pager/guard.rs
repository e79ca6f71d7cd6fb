//! Scoped pin: ties every fetch to exactly one unpin.

use std::cell::Cell;

use tracing::warn;

use crate::types::{PageId, Result};

use super::{BufferPool, PageRef};

/// Owns one pin on a page and releases it on drop, reporting the dirty
/// flag the holder set. Move-only, so the pin can change hands but never
/// duplicate.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page: Option<PageRef>,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    /// Pins an existing page.
    pub fn fetch(pool: &'a BufferPool, id: PageId) -> Result<Self> {
        let page = pool.fetch_page(id)?;
        Ok(Self {
            pool,
            page: Some(page),
            dirty: Cell::new(false),
        })
    }

    /// Allocates a fresh page, pinned by this guard.
    pub fn allocate(pool: &'a BufferPool) -> Result<Self> {
        let page = pool.new_page()?;
        Ok(Self {
            pool,
            page: Some(page),
            dirty: Cell::new(false),
        })
    }

    pub fn id(&self) -> PageId {
        self.page().id()
    }

    pub fn page(&self) -> &PageRef {
        self.page.as_ref().expect("page present until drop")
    }

    /// Records that the holder mutated the page; the eventual unpin will
    /// report it dirty.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(err) = self.pool.unpin_page(page.id(), self.dirty.get()) {
                warn!(page = %page.id(), error = %err, "pager.unpin_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::BufferPoolOptions;

    #[test]
    fn drop_releases_the_pin() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let pool = BufferPool::open(tmp.path(), BufferPoolOptions { pool_size: 2 }).unwrap();
        let id = {
            let guard = PageGuard::allocate(&pool).unwrap();
            assert_eq!(pool.pinned_frames(), 1);
            guard.id()
        };
        assert_eq!(pool.pinned_frames(), 0);
        let _again = PageGuard::fetch(&pool, id).unwrap();
        assert_eq!(pool.pinned_frames(), 1);
    }

    #[test]
    fn dirty_flag_reaches_the_frame() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let pool = BufferPool::open(tmp.path(), BufferPoolOptions { pool_size: 2 }).unwrap();
        let id = {
            let guard = PageGuard::allocate(&pool).unwrap();
            guard.page().write()[0] = 1;
            guard.mark_dirty();
            guard.id()
        };
        // A dirty frame survives eviction; churn the pool and read back.
        for _ in 0..4 {
            let filler = PageGuard::allocate(&pool).unwrap();
            drop(filler);
        }
        let guard = PageGuard::fetch(&pool, id).unwrap();
        assert_eq!(guard.page().read()[0], 1);
    }
}
