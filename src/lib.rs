//! Umbra: a persistent, concurrent extendible hash index on top of a
//! fixed-size, page-oriented buffer pool.
//!
//! The crate splits into three layers:
//!
//! - [`types`] — id newtypes, the error enum, and page constants.
//! - [`primitives`] — positional file I/O, the disk manager, and the
//!   buffer pool with its LRU replacer and scoped page guards.
//! - [`storage`] — the on-page directory and bucket layouts plus the
//!   [`ExtendibleHashTable`] that orchestrates lookups, insertions with
//!   bucket splits, and removals with merges and directory shrinking.

#![forbid(unsafe_code)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::pager::{
    BufferPool, BufferPoolOptions, DiskManager, LruReplacer, PageGuard, PoolStats,
};
pub use storage::index::{
    Bucket, BucketInsert, BucketLayout, BucketMut, Directory, DirectoryMut, ExtendibleHashTable,
    GenericComparator, GenericKey, HashTableOptions, IndexKey, IndexValue, IntComparator,
    KeyComparator, KeyHasher, Rid, Xxh3Hasher, DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH,
};
pub use types::{PageId, Result, Transaction, UmbraError, INVALID_PAGE_ID, PAGE_SIZE};
