//! Fixed-width key and value encodings plus the comparator and hasher
//! seams the hash table is generic over.

use std::cmp::Ordering;

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use crate::types::PageId;

/// A key the index can store: fixed encoded width, byte-serializable.
pub trait IndexKey: Clone + Send + Sync + 'static {
    const ENCODED_LEN: usize;
    fn encode_into(&self, dst: &mut [u8]);
    fn decode_from(src: &[u8]) -> Self;
}

/// A value the index can store alongside a key.
pub trait IndexValue: Clone + PartialEq + Send + Sync + 'static {
    const ENCODED_LEN: usize;
    fn encode_into(&self, dst: &mut [u8]);
    fn decode_from(src: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(src: &[u8]) -> Self {
        i32::from_le_bytes(src[..4].try_into().expect("four bytes"))
    }
}

impl IndexValue for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode_from(src: &[u8]) -> Self {
        i32::from_le_bytes(src[..4].try_into().expect("four bytes"))
    }
}

/// Fixed-width opaque key, e.g. a serialized column prefix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Seeds the key from an integer, little-endian, zero padded.
    pub fn from_i64(value: i64) -> Self {
        Self::from_bytes(&value.to_le_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    const ENCODED_LEN: usize = N;

    fn encode_into(&self, dst: &mut [u8]) {
        dst[..N].copy_from_slice(&self.data);
    }

    fn decode_from(src: &[u8]) -> Self {
        Self::from_bytes(&src[..N])
    }
}

/// Record id: the heap page and slot an index entry points at.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl IndexValue for Rid {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        dst[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    fn decode_from(src: &[u8]) -> Self {
        Self {
            page_id: PageId(u32::from_le_bytes(src[..4].try_into().expect("four bytes"))),
            slot: u32::from_le_bytes(src[4..8].try_into().expect("four bytes")),
        }
    }
}

/// Total order on keys, supplied by the caller.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct IntComparator;

impl KeyComparator<i32> for IntComparator {
    fn compare(&self, a: &i32, b: &i32) -> Ordering {
        a.cmp(b)
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct GenericComparator<const N: usize>;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator<N> {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

/// Maps keys to the 32-bit hashes the directory consumes.
pub trait KeyHasher<K>: Clone + Send + Sync + 'static {
    fn hash_key(&self, key: &K) -> u32;
}

/// Default hasher: xxh3 over the encoded key bytes, folded to 32 bits.
#[derive(Clone, Copy, Default, Debug)]
pub struct Xxh3Hasher;

impl<K: IndexKey> KeyHasher<K> for Xxh3Hasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut buf = SmallVec::<[u8; 64]>::from_elem(0, K::ENCODED_LEN);
        key.encode_into(&mut buf);
        xxh3_64(&buf) as u32
    }
}
