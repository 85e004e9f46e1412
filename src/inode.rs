//! On-disk inode structure and the scoped reference the allocator works
//! through.
//!
//! The inode subsystem proper (loading, storing, extent trees) lives
//! elsewhere; the allocator only maintains the per-file block count, which
//! is measured in 512-byte sectors regardless of the filesystem block size.

use bytemuck::{Pod, Zeroable};

use crate::sb::{Ext4Superblock, ReadOnlyCompatibleFeatureSet};

/// Size of the unit used by the inode block counters, in bytes.
pub const EXT4_INODE_BLOCK_SIZE: u32 = 512;

/// The `Ext4Inode` (index node) stores all metadata related to a file or a
/// directory. This is the 128-byte base revision; extended fields past it
/// are not the allocator's concern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Ext4Inode {
    /// File mode (type and permissions).
    pub(crate) mode: u16,

    /// Owner UID, low 16 bits.
    pub(crate) uid: u16,

    /// Size in bytes, low 32 bits.
    pub(crate) size_lo: u32,

    /// Last access time.
    pub(crate) atime: u32,

    /// Last inode change time.
    pub(crate) ctime: u32,

    /// Last data modification time.
    pub(crate) mtime: u32,

    /// Deletion time.
    pub(crate) dtime: u32,

    /// Group ID, low 16 bits.
    pub(crate) gid: u16,

    /// Hard link count.
    pub(crate) links_count: u16,

    /// Block count in 512-byte sectors, low 32 bits.
    pub(crate) blocks_count_lo: u32,

    /// Inode flags.
    pub(crate) flags: u32,

    /// OS dependent field (version on Linux).
    pub(crate) osd1: u32,

    /// Block map or extent tree root.
    pub(crate) block: [u8; 60],

    /// File version, for NFS.
    pub(crate) generation: u32,

    /// Extended attribute block, low 32 bits.
    pub(crate) file_acl_lo: u32,

    /// Size in bytes, high 32 bits.
    pub(crate) size_hi: u32,

    /// Obsolete fragment address.
    pub(crate) obso_faddr: u32,

    /// Block count in 512-byte sectors, high 16 bits. Meaningful only with
    /// the `huge_file` feature.
    pub(crate) blocks_count_hi: u16,

    /// Extended attribute block, high 16 bits.
    pub(crate) file_acl_hi: u16,

    /// Owner UID, high 16 bits.
    pub(crate) uid_hi: u16,

    /// Group ID, high 16 bits.
    pub(crate) gid_hi: u16,

    /// Inode checksum, low 16 bits.
    pub(crate) checksum_lo: u16,

    pub(crate) reserved: u16,
}

impl Ext4Inode {
    /// Returns the count of 512-byte sectors attributed to this file.
    ///
    /// The 16 high bits only exist under the `huge_file` feature.
    pub fn blocks_count(&self, sb: &Ext4Superblock) -> u64 {
        let lo = u64::from(u32::from_le(self.blocks_count_lo));

        if sb
            .feature_ro_compat()
            .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_HUGE_FILE)
        {
            lo | (u64::from(u16::from_le(self.blocks_count_hi)) << 32)
        } else {
            lo
        }
    }

    /// Updates the count of 512-byte sectors attributed to this file.
    pub fn set_blocks_count(&mut self, sb: &Ext4Superblock, count: u64) {
        self.blocks_count_lo = ((count & 0xFFFF_FFFF) as u32).to_le();

        if sb
            .feature_ro_compat()
            .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_HUGE_FILE)
        {
            self.blocks_count_hi = (((count >> 32) & 0xFFFF) as u16).to_le();
        }
    }
}

/// Scoped reference to one inode.
///
/// The allocator mutates the block counter in place and flags the reference
/// dirty; loading and writing back the inode belongs to its owner.
#[derive(Clone, Debug)]
pub struct InodeRef {
    /// In-memory copy of the on-disk inode.
    pub inode: Ext4Inode,

    /// Inode number.
    pub index: u32,

    /// Set whenever the inode was mutated and needs writeback.
    pub dirty: bool,
}

impl InodeRef {
    /// Wraps a fresh, zeroed inode. Mostly useful to drive the allocator
    /// for a file whose inode is managed elsewhere.
    pub fn new(index: u32) -> Self {
        Self {
            inode: Ext4Inode::zeroed(),
            index,
            dirty: false,
        }
    }
}
