//! Extendible hash table over buffer-pool pages.
//!
//! A single directory page maps the low `global_depth` bits of a key's
//! hash to bucket pages. Buckets split (and the directory doubles) when
//! full; empty buckets merge back into their split images and the
//! directory halves when no bucket needs the extra depth.
//!
//! Concurrency is two-level: a table latch over the directory, taken
//! shared by lookups and the in-place insert path and exclusively by
//! splits, removals, and integrity checks, plus the per-page latch each
//! frame carries. The table latch is always acquired before any page
//! latch.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::primitives::pager::{BufferPool, PageGuard};
use crate::types::{PageId, Result, Transaction, UmbraError};

use super::bucket_page::{Bucket, BucketInsert, BucketLayout, BucketMut};
use super::directory_page::{Directory, DirectoryMut, DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH};
use super::key::{IndexKey, IndexValue, KeyComparator, KeyHasher, Xxh3Hasher};

/// Tuning knobs for [`ExtendibleHashTable`].
#[derive(Clone, Debug, Default)]
pub struct HashTableOptions {
    /// Entries per bucket page. Defaults to the most the page layout
    /// fits; tests use small values to exercise splits cheaply.
    pub bucket_capacity: Option<usize>,
}

/// A persistent hash index mapping keys to (possibly several) values.
///
/// Generic over the key and value encodings, the key comparator, and the
/// hash function. All operations take `&self` and are safe to call from
/// multiple threads.
pub struct ExtendibleHashTable<K, V, C, H = Xxh3Hasher> {
    name: String,
    pool: Arc<BufferPool>,
    cmp: C,
    hasher: H,
    directory_page_id: PageId,
    layout: BucketLayout,
    table_latch: RwLock<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, H> ExtendibleHashTable<K, V, C, H>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a new index: one directory page at depth zero pointing at
    /// one empty bucket.
    pub fn new(name: impl Into<String>, pool: Arc<BufferPool>, cmp: C, hasher: H) -> Result<Self> {
        Self::with_options(name, pool, cmp, hasher, HashTableOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        pool: Arc<BufferPool>,
        cmp: C,
        hasher: H,
        options: HashTableOptions,
    ) -> Result<Self> {
        let name = name.into();
        let layout = Self::layout_from(&options)?;
        let directory = PageGuard::allocate(&pool)?;
        let bucket = match PageGuard::allocate(&pool) {
            Ok(guard) => guard,
            Err(err) => {
                let id = directory.id();
                drop(directory);
                let _ = pool.delete_page(id);
                return Err(err);
            }
        };
        {
            let mut data = directory.page().write();
            let mut dir = DirectoryMut::new(&mut data);
            dir.init();
            dir.set_bucket_page_id(0, bucket.id());
            dir.set_local_depth(0, 0);
        }
        directory.mark_dirty();
        bucket.mark_dirty();
        let directory_page_id = directory.id();
        drop(bucket);
        drop(directory);
        debug!(table = %name, directory = %directory_page_id, "hash.create");
        Ok(Self {
            name,
            pool,
            cmp,
            hasher,
            directory_page_id,
            layout,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    /// Attaches to a directory page created by an earlier run. The bucket
    /// capacity must match the one the index was created with.
    pub fn open(
        name: impl Into<String>,
        pool: Arc<BufferPool>,
        cmp: C,
        hasher: H,
        directory_page_id: PageId,
        options: HashTableOptions,
    ) -> Result<Self> {
        let layout = Self::layout_from(&options)?;
        {
            let directory = PageGuard::fetch(&pool, directory_page_id)?;
            let data = directory.page().read();
            if Directory::new(&data).global_depth() > MAX_GLOBAL_DEPTH {
                return Err(UmbraError::Corruption("directory page has invalid depth"));
            }
        }
        Ok(Self {
            name: name.into(),
            pool,
            cmp,
            hasher,
            directory_page_id,
            layout,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    fn layout_from(options: &HashTableOptions) -> Result<BucketLayout> {
        let max = BucketLayout::max_capacity::<K, V>();
        let capacity = options.bucket_capacity.unwrap_or(max);
        if capacity == 0 || capacity > max {
            return Err(UmbraError::Invalid("bucket capacity does not fit a page"));
        }
        Ok(BucketLayout::for_types::<K, V>(capacity))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    pub fn bucket_capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Collects every value stored under `key`.
    pub fn get_value(&self, _txn: &Transaction, key: &K) -> Result<Vec<V>> {
        let _table = self.table_latch.read();
        let bucket_page_id = self.resolve_bucket(key)?;
        let bucket = PageGuard::fetch(&self.pool, bucket_page_id)?;
        let data = bucket.page().read();
        let view = Bucket::<K, V>::new(&data, self.layout);
        Ok(view.get_value(key, &self.cmp))
    }

    /// Inserts `(key, value)`. Returns `Ok(false)` when the exact pair is
    /// already present or the directory is saturated.
    pub fn insert(&self, txn: &Transaction, key: &K, value: &V) -> Result<bool> {
        let outcome = {
            let _table = self.table_latch.read();
            let bucket_page_id = self.resolve_bucket(key)?;
            let bucket = PageGuard::fetch(&self.pool, bucket_page_id)?;
            let outcome = {
                let mut data = bucket.page().write();
                let mut view = BucketMut::<K, V>::new(&mut data, self.layout);
                view.insert_entry(key, value, &self.cmp)
            };
            if outcome == BucketInsert::Inserted {
                bucket.mark_dirty();
            }
            outcome
        };
        match outcome {
            BucketInsert::Inserted => Ok(true),
            BucketInsert::Duplicate => Ok(false),
            // The shared latch is gone; retry with the table to ourselves.
            BucketInsert::Full => self.split_insert(txn, key, value),
        }
    }

    /// Removes `(key, value)`. Returns `Ok(false)` if the pair is absent.
    pub fn remove(&self, _txn: &Transaction, key: &K, value: &V) -> Result<bool> {
        let _table = self.table_latch.write();
        let bucket_page_id = self.resolve_bucket(key)?;
        let bucket = PageGuard::fetch(&self.pool, bucket_page_id)?;
        let (removed, mut empty) = {
            let mut data = bucket.page().write();
            let mut view = BucketMut::<K, V>::new(&mut data, self.layout);
            let removed = view.remove_entry(key, value, &self.cmp);
            (removed, view.is_empty())
        };
        if !removed {
            return Ok(false);
        }
        bucket.mark_dirty();
        drop(bucket);
        while empty {
            if !self.merge_bucket(key)? {
                break;
            }
            let survivor = self.resolve_bucket(key)?;
            let bucket = PageGuard::fetch(&self.pool, survivor)?;
            let data = bucket.page().read();
            empty = Bucket::<K, V>::new(&data, self.layout).is_empty();
        }
        Ok(true)
    }

    /// Current number of hash bits the directory consults.
    pub fn get_global_depth(&self) -> Result<u32> {
        let _table = self.table_latch.read();
        let directory = PageGuard::fetch(&self.pool, self.directory_page_id)?;
        let data = directory.page().read();
        Ok(Directory::new(&data).global_depth())
    }

    /// Checks the directory invariants; returns a corruption error naming
    /// the first violation.
    pub fn verify_integrity(&self) -> Result<()> {
        let _table = self.table_latch.write();
        let directory = PageGuard::fetch(&self.pool, self.directory_page_id)?;
        let data = directory.page().read();
        Directory::new(&data).verify_integrity()
    }

    fn dir_index(&self, directory: &Directory<'_>, key: &K) -> usize {
        (self.hasher.hash_key(key) & directory.global_depth_mask()) as usize
    }

    fn resolve_bucket(&self, key: &K) -> Result<PageId> {
        let directory = PageGuard::fetch(&self.pool, self.directory_page_id)?;
        let data = directory.page().read();
        let dir = Directory::new(&data);
        Ok(dir.bucket_page_id(self.dir_index(&dir, key)))
    }

    /// Insert retry loop under the exclusive table latch: split the target
    /// bucket (growing the directory when its local depth has caught up to
    /// the global depth) until the entry fits or the directory cannot
    /// double any further.
    fn split_insert(&self, _txn: &Transaction, key: &K, value: &V) -> Result<bool> {
        let _table = self.table_latch.write();
        loop {
            // Re-resolve everything: other writers may have split or
            // merged between our latch release and re-acquire.
            let bucket_page_id = self.resolve_bucket(key)?;
            let bucket = PageGuard::fetch(&self.pool, bucket_page_id)?;
            let outcome = {
                let mut data = bucket.page().write();
                let mut view = BucketMut::<K, V>::new(&mut data, self.layout);
                view.insert_entry(key, value, &self.cmp)
            };
            match outcome {
                BucketInsert::Inserted => {
                    bucket.mark_dirty();
                    return Ok(true);
                }
                BucketInsert::Duplicate => return Ok(false),
                BucketInsert::Full => {
                    drop(bucket);
                    if !self.split_bucket(key)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Splits the bucket `key` resolves to, redistributing its entries
    /// over two fresh pages by hash bit `local_depth`. Returns `Ok(false)`
    /// when the directory is saturated.
    fn split_bucket(&self, key: &K) -> Result<bool> {
        let directory = PageGuard::fetch(&self.pool, self.directory_page_id)?;
        let mut dir_data = directory.page().write();
        let mut dir = DirectoryMut::new(&mut dir_data);
        let hash = self.hasher.hash_key(key);

        let mut slot = (hash & dir.as_ref().global_depth_mask()) as usize;
        if dir.as_ref().local_depth(slot) == dir.as_ref().global_depth() {
            if dir.as_ref().size() * 2 > DIRECTORY_ARRAY_SIZE {
                warn!(table = %self.name, "hash.directory_saturated");
                return Ok(false);
            }
            dir.grow();
            directory.mark_dirty();
            slot = (hash & dir.as_ref().global_depth_mask()) as usize;
        }

        let old_page_id = dir.as_ref().bucket_page_id(slot);
        let local_depth = dir.as_ref().local_depth(slot);

        let old = PageGuard::fetch(&self.pool, old_page_id)?;
        let low = PageGuard::allocate(&self.pool)?;
        let high = match PageGuard::allocate(&self.pool) {
            Ok(guard) => guard,
            Err(err) => {
                let id = low.id();
                drop(low);
                let _ = self.pool.delete_page(id);
                return Err(err);
            }
        };

        {
            let old_data = old.page().read();
            let old_view = Bucket::<K, V>::new(&old_data, self.layout);
            let mut low_data = low.page().write();
            let mut high_data = high.page().write();
            let mut low_view = BucketMut::<K, V>::new(&mut low_data, self.layout);
            let mut high_view = BucketMut::<K, V>::new(&mut high_data, self.layout);
            let mut low_len = 0;
            let mut high_len = 0;
            for entry in 0..self.layout.capacity() {
                if !old_view.is_occupied(entry) {
                    break;
                }
                if !old_view.is_readable(entry) {
                    continue;
                }
                let k = old_view.key_at(entry);
                let v = old_view.value_at(entry);
                if (self.hasher.hash_key(&k) >> local_depth) & 1 == 0 {
                    low_view.write_entry(low_len, &k, &v);
                    low_len += 1;
                } else {
                    high_view.write_entry(high_len, &k, &v);
                    high_len += 1;
                }
            }
        }
        low.mark_dirty();
        high.mark_dirty();

        let low_id = low.id();
        let high_id = high.id();
        for i in 0..dir.as_ref().size() {
            if dir.as_ref().bucket_page_id(i) == old_page_id {
                let target = if (i >> local_depth) & 1 == 0 {
                    low_id
                } else {
                    high_id
                };
                dir.set_bucket_page_id(i, target);
                dir.incr_local_depth(i);
            }
        }
        directory.mark_dirty();
        debug!(
            table = %self.name,
            bucket = %old_page_id,
            low = %low_id,
            high = %high_id,
            depth = local_depth + 1,
            "hash.split"
        );

        drop(low);
        drop(high);
        drop(old);
        self.pool.delete_page(old_page_id)?;
        Ok(true)
    }

    /// Folds the (empty) bucket `key` resolves to into its split image,
    /// then shrinks the directory while possible. Returns `Ok(false)` when
    /// the merge is not legal.
    fn merge_bucket(&self, key: &K) -> Result<bool> {
        let directory = PageGuard::fetch(&self.pool, self.directory_page_id)?;
        let dead_page_id = {
            let mut dir_data = directory.page().write();
            let mut dir = DirectoryMut::new(&mut dir_data);
            let slot = (self.hasher.hash_key(key) & dir.as_ref().global_depth_mask()) as usize;
            let local_depth = dir.as_ref().local_depth(slot);
            if local_depth == 0 {
                return Ok(false);
            }
            let image = dir.as_ref().split_image_index(slot);
            if dir.as_ref().local_depth(image) != local_depth {
                return Ok(false);
            }
            let dead = dir.as_ref().bucket_page_id(slot);
            let survivor = dir.as_ref().bucket_page_id(image);
            if dead == survivor {
                return Ok(false);
            }
            let low_mask = (1usize << (local_depth - 1)) - 1;
            let low_value = slot & low_mask;
            for i in 0..dir.as_ref().size() {
                if i & low_mask == low_value {
                    dir.set_bucket_page_id(i, survivor);
                    dir.decr_local_depth(i);
                }
            }
            if dir.as_ref().can_shrink() {
                dir.shrink();
            }
            debug!(
                table = %self.name,
                dead = %dead,
                survivor = %survivor,
                depth = local_depth - 1,
                "hash.merge"
            );
            dead
        };
        directory.mark_dirty();
        drop(directory);
        self.pool.delete_page(dead_page_id)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::BufferPoolOptions;
    use crate::storage::index::key::IntComparator;

    /// Hashes an i32 key to itself, making bucket placement transparent.
    #[derive(Clone, Copy, Default)]
    struct IdentityHasher;

    impl KeyHasher<i32> for IdentityHasher {
        fn hash_key(&self, key: &i32) -> u32 {
            *key as u32
        }
    }

    fn small_table(
        bucket_capacity: usize,
    ) -> (
        tempfile::NamedTempFile,
        Arc<BufferPool>,
        ExtendibleHashTable<i32, i32, IntComparator, IdentityHasher>,
    ) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let pool = Arc::new(
            BufferPool::open(tmp.path(), BufferPoolOptions { pool_size: 16 }).unwrap(),
        );
        let table = ExtendibleHashTable::with_options(
            "unit",
            Arc::clone(&pool),
            IntComparator,
            IdentityHasher,
            HashTableOptions {
                bucket_capacity: Some(bucket_capacity),
            },
        )
        .unwrap();
        (tmp, pool, table)
    }

    #[test]
    fn split_then_merge_returns_to_depth_zero() {
        let (_tmp, pool, table) = small_table(2);
        let txn = Transaction::default();
        assert!(table.insert(&txn, &0, &100).unwrap());
        assert!(table.insert(&txn, &2, &200).unwrap());
        assert!(table.insert(&txn, &1, &300).unwrap());
        assert!(table.get_global_depth().unwrap() >= 1);
        table.verify_integrity().unwrap();

        assert!(table.remove(&txn, &1, &300).unwrap());
        assert!(table.remove(&txn, &0, &100).unwrap());
        assert!(table.remove(&txn, &2, &200).unwrap());
        assert_eq!(table.get_global_depth().unwrap(), 0);
        table.verify_integrity().unwrap();
        assert_eq!(pool.pinned_frames(), 0);
    }

    #[test]
    fn rejects_bucket_capacity_beyond_the_page() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let pool = Arc::new(
            BufferPool::open(tmp.path(), BufferPoolOptions { pool_size: 8 }).unwrap(),
        );
        let result = ExtendibleHashTable::<i32, i32, _, _>::with_options(
            "unit",
            pool,
            IntComparator,
            IdentityHasher,
            HashTableOptions {
                bucket_capacity: Some(10_000),
            },
        );
        assert!(result.is_err());
    }
}
