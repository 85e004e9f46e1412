//! Filesystem instance tying the superblock, the block device and the
//! group descriptor cache together.

use alloc::sync::Arc;
use alloc::vec;

use bytemuck::pod_read_unaligned;
use hashbrown::HashMap;
use log::info;
use spin::RwLock;

use crate::bdev::{Block, BlockDevice};
use crate::block_grp::Ext4GroupDescriptor;
use crate::errors::{CanFail, IOError, IOResult, MountError};
use crate::sb::{Ext4RealBlkId, Ext4Superblock, ReadOnlyCompatibleFeatureSet};

/// Byte offset of the superblock on the volume.
pub const EXT4_SUPERBLOCK_OFFSET: u64 = 1024;

/// Byte size of the on-disk superblock structure.
pub const EXT4_SUPERBLOCK_SIZE: usize = 1024;

/// A mounted `ext4`-family filesystem, scoped to its block allocation
/// machinery.
///
/// The structure performs no internal locking; either drive it from a
/// single thread or wrap it in a [`LockedExt4Fs`].
pub struct Ext4Fs {
    bdev: Arc<dyn BlockDevice>,

    /// In-memory copy of the superblock. Mutated in place; writeback is
    /// scheduled by the embedder.
    pub(crate) sb: Ext4Superblock,

    /// Descriptors already read from the descriptor table, written through
    /// on every dirty handle release.
    pub(crate) bgd_cache: HashMap<u32, Ext4GroupDescriptor>,
}

/// Shared handle over a filesystem instance for embedders that access it
/// from several contexts.
pub type LockedExt4Fs = Arc<RwLock<Ext4Fs>>;

impl Ext4Fs {
    /// Attaches to the filesystem on `bdev`.
    ///
    /// Reads the superblock, checks its magic signature and, when the
    /// `metadata_csum` feature is active, its checksum.
    pub fn mount(bdev: Arc<dyn BlockDevice>) -> Result<Self, MountError> {
        let mut raw_sb = [0u8; EXT4_SUPERBLOCK_SIZE];
        bdev.read_at(EXT4_SUPERBLOCK_OFFSET, &mut raw_sb)
            .map_err(|_| MountError::IOError)?;

        let sb: Ext4Superblock = pod_read_unaligned(&raw_sb);

        if !sb.magic_valid() {
            return Err(MountError::BadSuperblock);
        }

        if sb
            .feature_ro_compat()
            .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
            && !sb.validate_chksum()
        {
            return Err(MountError::BadSuperblock);
        }

        info!(
            "ext4: mounted filesystem: {} blocks in {} groups, block size {}",
            sb.block_count(),
            sb.block_group_count(),
            sb.block_size(),
        );

        Ok(Self {
            bdev,
            sb,
            bgd_cache: HashMap::new(),
        })
    }

    /// Returns the in-memory superblock.
    pub fn superblock(&self) -> &Ext4Superblock {
        &self.sb
    }

    /// Returns the in-memory superblock for mutation. The caller owns
    /// scheduling its writeback.
    pub fn superblock_mut(&mut self) -> &mut Ext4Superblock {
        &mut self.sb
    }

    /// Pins an in-memory copy of the block at `baddr`.
    pub fn block_get(&self, baddr: Ext4RealBlkId) -> IOResult<Block> {
        if u64::from(baddr) >= self.sb.block_count() {
            return Err(IOError::InvalidCommand);
        }

        let block_size = self.sb.block_size();
        let mut data = vec![0u8; block_size as usize];

        self.bdev
            .read_at(u64::from(baddr) * u64::from(block_size), &mut data)?;

        Ok(Block::new(baddr, data))
    }

    /// Releases a pinned block, writing the data back when it is dirty.
    pub fn block_set(&self, block: Block) -> CanFail<IOError> {
        if !block.dirty {
            return Ok(());
        }

        let block_size = u64::from(self.sb.block_size());
        self.bdev
            .write_at(u64::from(block.id) * block_size, &block.data)
    }
}
