//! Directory page: global depth plus per-slot local depths and bucket
//! page ids.
//!
//! Layout (field order is part of the on-disk format):
//!
//! ```text
//! | lsn: u32 | global_depth: u32 | local_depths: u8 x 512 | bucket_page_ids: u32 x 512 |
//! ```

use std::collections::HashMap;

use crate::types::{Lsn, PageId, Result, UmbraError, INVALID_PAGE_ID};

/// Number of directory slots; the directory can double until it reaches
/// this many.
pub const DIRECTORY_ARRAY_SIZE: usize = 512;

/// Largest global depth the slot array supports.
pub const MAX_GLOBAL_DEPTH: u32 = DIRECTORY_ARRAY_SIZE.trailing_zeros();

mod layout {
    use super::DIRECTORY_ARRAY_SIZE;
    use crate::types::PAGE_SIZE;

    pub const LSN: usize = 0;
    pub const GLOBAL_DEPTH: usize = 4;
    pub const LOCAL_DEPTHS: usize = 8;
    pub const BUCKET_PAGE_IDS: usize = LOCAL_DEPTHS + DIRECTORY_ARRAY_SIZE;
    pub const LEN: usize = BUCKET_PAGE_IDS + 4 * DIRECTORY_ARRAY_SIZE;

    const _: () = assert!(LEN <= PAGE_SIZE);
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().expect("four bytes"))
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view of a directory page's bytes.
pub struct Directory<'a> {
    data: &'a [u8],
}

impl<'a> Directory<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(data.len() >= layout::LEN);
        Self { data }
    }

    pub fn lsn(&self) -> Lsn {
        Lsn(read_u32(self.data, layout::LSN))
    }

    pub fn global_depth(&self) -> u32 {
        read_u32(self.data, layout::GLOBAL_DEPTH)
    }

    /// Number of active slots, `2^global_depth`.
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    pub fn local_depth(&self, slot: usize) -> u32 {
        u32::from(self.data[layout::LOCAL_DEPTHS + slot])
    }

    pub fn local_depth_mask(&self, slot: usize) -> u32 {
        (1 << self.local_depth(slot)) - 1
    }

    pub fn bucket_page_id(&self, slot: usize) -> PageId {
        PageId(read_u32(self.data, layout::BUCKET_PAGE_IDS + 4 * slot))
    }

    /// The slot differing from `slot` only in bit `local_depth - 1`.
    pub fn split_image_index(&self, slot: usize) -> usize {
        let depth = self.local_depth(slot);
        debug_assert!(depth > 0);
        slot ^ (1 << (depth - 1))
    }

    /// True when no bucket needs the full global depth, i.e. halving the
    /// directory would strand nothing.
    pub fn can_shrink(&self) -> bool {
        let global = self.global_depth();
        global > 0 && (0..self.size()).all(|slot| self.local_depth(slot) < global)
    }

    /// Checks the structural invariants tying slots, depths, and bucket
    /// pointers together. Returns a corruption error naming the first
    /// violation.
    pub fn verify_integrity(&self) -> Result<()> {
        let global = self.global_depth();
        if global > MAX_GLOBAL_DEPTH {
            return Err(UmbraError::Corruption("global depth out of range"));
        }
        let mut buckets: HashMap<PageId, (usize, u32, u32)> = HashMap::new();
        let mut max_local = 0;
        for slot in 0..self.size() {
            let local = self.local_depth(slot);
            if local > global {
                return Err(UmbraError::Corruption("local depth exceeds global depth"));
            }
            max_local = max_local.max(local);
            let page_id = self.bucket_page_id(slot);
            if !page_id.is_valid() {
                return Err(UmbraError::Corruption("active slot without bucket page"));
            }
            let low_bits = slot as u32 & self.local_depth_mask(slot);
            let entry = buckets.entry(page_id).or_insert((0, local, low_bits));
            if entry.1 != local {
                return Err(UmbraError::Corruption(
                    "shared bucket with differing local depths",
                ));
            }
            if entry.2 != low_bits {
                return Err(UmbraError::Corruption(
                    "shared bucket with differing hash prefixes",
                ));
            }
            entry.0 += 1;
        }
        for (count, local, _) in buckets.values() {
            if *count != 1 << (global - local) {
                return Err(UmbraError::Corruption("bucket pointer count mismatch"));
            }
        }
        if max_local != global {
            return Err(UmbraError::Corruption(
                "global depth is not the maximal local depth",
            ));
        }
        Ok(())
    }
}

/// Mutable view of a directory page's bytes.
pub struct DirectoryMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert!(data.len() >= layout::LEN);
        Self { data }
    }

    pub fn as_ref(&self) -> Directory<'_> {
        Directory::new(self.data)
    }

    /// Resets the page to a fresh single-slot directory. Every slot's
    /// bucket pointer starts invalid; the caller installs slot zero.
    pub fn init(&mut self) {
        write_u32(self.data, layout::LSN, 0);
        write_u32(self.data, layout::GLOBAL_DEPTH, 0);
        for slot in 0..DIRECTORY_ARRAY_SIZE {
            self.data[layout::LOCAL_DEPTHS + slot] = 0;
            write_u32(
                self.data,
                layout::BUCKET_PAGE_IDS + 4 * slot,
                INVALID_PAGE_ID.0,
            );
        }
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        write_u32(self.data, layout::LSN, lsn.0);
    }

    pub fn set_local_depth(&mut self, slot: usize, depth: u32) {
        debug_assert!(depth <= MAX_GLOBAL_DEPTH);
        self.data[layout::LOCAL_DEPTHS + slot] = depth as u8;
    }

    pub fn incr_local_depth(&mut self, slot: usize) {
        let depth = self.as_ref().local_depth(slot);
        self.set_local_depth(slot, depth + 1);
    }

    pub fn decr_local_depth(&mut self, slot: usize) {
        let depth = self.as_ref().local_depth(slot);
        debug_assert!(depth > 0);
        self.set_local_depth(slot, depth - 1);
    }

    pub fn set_bucket_page_id(&mut self, slot: usize, page_id: PageId) {
        write_u32(self.data, layout::BUCKET_PAGE_IDS + 4 * slot, page_id.0);
    }

    /// Doubles the directory: slot `i + size` becomes a copy of slot `i`,
    /// so every bucket keeps its pointers-per-depth ratio.
    pub fn grow(&mut self) {
        let size = self.as_ref().size();
        let global = self.as_ref().global_depth();
        debug_assert!(global < MAX_GLOBAL_DEPTH);
        for slot in 0..size {
            let depth = self.as_ref().local_depth(slot);
            let page_id = self.as_ref().bucket_page_id(slot);
            self.set_local_depth(slot + size, depth);
            self.set_bucket_page_id(slot + size, page_id);
        }
        write_u32(self.data, layout::GLOBAL_DEPTH, global + 1);
    }

    /// Halves the directory while no bucket uses the full depth.
    pub fn shrink(&mut self) {
        while self.as_ref().can_shrink() {
            let global = self.as_ref().global_depth();
            write_u32(self.data, layout::GLOBAL_DEPTH, global - 1);
        }
    }
}
