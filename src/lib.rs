//! Physical block allocator for the second-extended-family (`ext2`/`ext3`/
//! `ext4`) on-disk layout.
//!
//! The crate manipulates the per-group block bitmaps at single-bit
//! granularity while keeping the three redundant free-block counters
//! (superblock, group descriptor, per-file block count) in agreement, and
//! maintains the optional `metadata_csum` CRC32C over each bitmap.
//!
//! Entry points live on [`Ext4Fs`]: [`Ext4Fs::alloc_block`] performs a
//! goal-directed search across the cyclic sequence of block groups,
//! [`Ext4Fs::free_block`] and [`Ext4Fs::free_blocks`] return blocks to the
//! free pool, and [`Ext4Fs::try_alloc_block`] claims one specific address on
//! a best-effort basis.
//!
//! The allocator performs no internal synchronization; a filesystem instance
//! is meant to be driven single-threaded, or behind the [`LockedExt4Fs`]
//! lock by its embedder.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod balloc;
pub mod bdev;
pub mod bitmap;
pub mod block_grp;
pub mod crc32c;
pub mod errors;
pub mod fs;
pub mod inode;
pub mod sb;

#[cfg(test)]
mod testfs;

pub use crate::bdev::{Block, BlockDevice};
pub use crate::block_grp::{BlockGroupNumber, BlockGroupRef, Ext4GroupDescriptor};
pub use crate::errors::{AllocError, BaseError, CanFail, IOError, IOResult, MountError};
pub use crate::fs::{Ext4Fs, LockedExt4Fs};
pub use crate::inode::{Ext4Inode, InodeRef};
pub use crate::sb::{Ext4RealBlkId, Ext4Superblock};
