//! Block device abstraction.
//!
//! The allocator reaches the disk through [`BlockDevice`], a byte-addressed
//! interface the embedder implements over its actual transport (AHCI,
//! virtio, a file, ...). Whole-block pinning semantics are layered on top by
//! [`crate::fs::Ext4Fs::block_get`] / [`crate::fs::Ext4Fs::block_set`],
//! which hand out [`Block`] buffers.

use alloc::vec::Vec;

use crate::errors::{CanFail, IOError};
use crate::sb::Ext4RealBlkId;

/// Interface to the storage backing a filesystem.
///
/// Implementations are free to cache; the allocator never assumes more than
/// read-what-was-written consistency within a single filesystem instance.
pub trait BlockDevice: Send + Sync {
    /// Reads `buf.len()` bytes starting at absolute byte `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> CanFail<IOError>;

    /// Writes `buf` starting at absolute byte `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> CanFail<IOError>;
}

/// An in-memory copy of one on-disk block.
///
/// Acquired through [`crate::fs::Ext4Fs::block_get`] and released through
/// [`crate::fs::Ext4Fs::block_set`], which writes the data back when `dirty`
/// is raised. Dropping a `Block` without releasing it simply discards the
/// local mutations.
#[derive(Clone, Debug)]
pub struct Block {
    /// Absolute address of the block.
    pub id: Ext4RealBlkId,

    /// Raw block data, exactly one filesystem block long.
    pub data: Vec<u8>,

    /// Set when `data` diverged from the on-disk content and needs
    /// writeback.
    pub dirty: bool,
}

impl Block {
    /// Wraps freshly read block data.
    pub fn new(id: Ext4RealBlkId, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            dirty: false,
        }
    }
}
