//! Disk-backed extendible hash index.

mod bucket_page;
mod directory_page;
mod extendible;
mod key;

pub use bucket_page::{Bucket, BucketInsert, BucketLayout, BucketMut};
pub use directory_page::{Directory, DirectoryMut, DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH};
pub use extendible::{ExtendibleHashTable, HashTableOptions};
pub use key::{
    GenericComparator, GenericKey, IndexKey, IndexValue, IntComparator, KeyComparator, KeyHasher,
    Rid, Xxh3Hasher,
};
