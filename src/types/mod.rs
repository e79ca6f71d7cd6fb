//! Core identifiers, error type, and page constants shared across the crate.

use std::fmt;

use thiserror::Error;

/// Size in bytes of every buffer-pool page.
pub const PAGE_SIZE: usize = 4096;

/// Identifier of an on-disk page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u32);

/// Sentinel for "no page"; never allocated by the disk manager.
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

impl PageId {
    /// Returns true unless this is the [`INVALID_PAGE_ID`] sentinel.
    pub fn is_valid(self) -> bool {
        self != INVALID_PAGE_ID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into the buffer pool's frame array. Never persisted.
pub type FrameId = usize;

/// Log sequence number stamped into page headers.
///
/// The index writes zero; recovery integration lives above this crate.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u32);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque transaction handle threaded through index operations.
///
/// The index does not interpret it; it exists so callers can associate
/// operations with their transaction machinery.
#[derive(Debug, Default, Clone, Copy)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Error)]
pub enum UmbraError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("buffer pool exhausted")]
    PoolExhausted,
}

pub type Result<T> = std::result::Result<T, UmbraError>;
