//! `ext4` block group structures.
//!
//! Block groups are a logical grouping of contiguous blocks on disk, each
//! tracked by a [`Ext4GroupDescriptor`] in the descriptor table that follows
//! the superblock. The allocator borrows descriptors one at a time through
//! [`BlockGroupRef`] handles; a handle released dirty is flushed back to the
//! table, checksum re-stamped.

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};
use log::error;

use crate::crc32c::{crc32c, CRC32C_INIT};
use crate::errors::{CanFail, IOError, IOResult};
use crate::ext4_uint_field_derive_display;
use crate::fs::Ext4Fs;
use crate::sb::{
    Ext4RealBlkId, Ext4RealBlkId32, Ext4Superblock, ReadOnlyCompatibleFeatureSet,
    EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE,
};

/// A number identifying one block group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct BlockGroupNumber(u32);

ext4_uint_field_derive_display!(BlockGroupNumber);

impl From<u32> for BlockGroupNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<BlockGroupNumber> for u32 {
    fn from(value: BlockGroupNumber) -> Self {
        value.0
    }
}

/// Each block group on the file system has a `Ext4GroupDescriptor`
/// associated with it.
///
/// The structure is 64 bytes on disk when the `64bit` feature is enabled
/// (and the superblock says so); otherwise only the first 32 bytes exist
/// and every `_hi` half is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Ext4GroupDescriptor {
    /// Location of the block bitmap, low 32 bits.
    pub(crate) block_bitmap_lo: Ext4RealBlkId32,

    /// Location of the inode bitmap, low 32 bits.
    pub(crate) inode_bitmap_lo: Ext4RealBlkId32,

    /// Location of the inode table, low 32 bits.
    pub(crate) inode_table_lo: Ext4RealBlkId32,

    /// Free block count, low 16 bits.
    pub(crate) free_blocks_count_lo: u16,

    /// Free inode count, low 16 bits.
    pub(crate) free_inodes_count_lo: u16,

    /// Directory count, low 16 bits.
    pub(crate) used_dirs_count_lo: u16,

    /// Block group flags (`INODE_UNINIT`, ...).
    pub(crate) flags: u16,

    /// Location of the snapshot exclusion bitmap, low 32 bits.
    pub(crate) exclude_bitmap_lo: Ext4RealBlkId32,

    /// Block bitmap checksum, low 16 bits.
    pub(crate) block_bitmap_csum_lo: u16,

    /// Inode bitmap checksum, low 16 bits.
    pub(crate) inode_bitmap_csum_lo: u16,

    /// Unused inode count, low 16 bits.
    pub(crate) itable_unused_lo: u16,

    /// Group descriptor checksum.
    pub(crate) checksum: u16,

    /// Location of the block bitmap, high 32 bits.
    pub(crate) block_bitmap_hi: Ext4RealBlkId32,

    /// Location of the inode bitmap, high 32 bits.
    pub(crate) inode_bitmap_hi: Ext4RealBlkId32,

    /// Location of the inode table, high 32 bits.
    pub(crate) inode_table_hi: Ext4RealBlkId32,

    /// Free block count, high 16 bits.
    pub(crate) free_blocks_count_hi: u16,

    /// Free inode count, high 16 bits.
    pub(crate) free_inodes_count_hi: u16,

    /// Directory count, high 16 bits.
    pub(crate) used_dirs_count_hi: u16,

    /// Unused inode count, high 16 bits.
    pub(crate) itable_unused_hi: u16,

    /// Location of the snapshot exclusion bitmap, high 32 bits.
    pub(crate) exclude_bitmap_hi: Ext4RealBlkId32,

    /// Block bitmap checksum, high 16 bits.
    pub(crate) block_bitmap_csum_hi: u16,

    /// Inode bitmap checksum, high 16 bits.
    pub(crate) inode_bitmap_csum_hi: u16,

    pub(crate) reserved: u32,
}

impl Ext4GroupDescriptor {
    /// Returns the absolute address of the block bitmap of this group.
    pub fn block_bitmap(&self, sb: &Ext4Superblock) -> Ext4RealBlkId {
        if sb.desc_size() == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.block_bitmap_lo.add_high_bits(self.block_bitmap_hi)
        } else {
            self.block_bitmap_lo.add_high_bits(Ext4RealBlkId32::default())
        }
    }

    /// Updates the absolute address of the block bitmap of this group.
    pub fn set_block_bitmap(&mut self, sb: &Ext4Superblock, baddr: Ext4RealBlkId) {
        let baddr = u64::from(baddr);

        self.block_bitmap_lo = Ext4RealBlkId32(((baddr & 0xFFFF_FFFF) as u32).to_le());
        if sb.desc_size() == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.block_bitmap_hi = Ext4RealBlkId32(((baddr >> 32) as u32).to_le());
        }
    }

    /// Returns the count of free blocks in this group.
    pub fn free_blocks_count(&self, sb: &Ext4Superblock) -> u32 {
        let lo = u32::from(u16::from_le(self.free_blocks_count_lo));

        if sb.desc_size() == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
            lo | (u32::from(u16::from_le(self.free_blocks_count_hi)) << 16)
        } else {
            lo
        }
    }

    /// Updates the count of free blocks in this group.
    pub fn set_free_blocks_count(&mut self, sb: &Ext4Superblock, count: u32) {
        self.free_blocks_count_lo = ((count & 0xFFFF) as u16).to_le();

        if sb.desc_size() == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.free_blocks_count_hi = ((count >> 16) as u16).to_le();
        }
    }

    /// Stamps the block bitmap checksum. The high half only exists on
    /// 64-byte descriptors.
    pub fn set_block_bitmap_csum(&mut self, sb: &Ext4Superblock, csum: u32) {
        self.block_bitmap_csum_lo = ((csum & 0xFFFF) as u16).to_le();

        if sb.desc_size() == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
            self.block_bitmap_csum_hi = ((csum >> 16) as u16).to_le();
        }
    }

    /// Returns the stored block bitmap checksum, low 16 bits.
    pub fn block_bitmap_csum_lo(&self) -> u16 {
        u16::from_le(self.block_bitmap_csum_lo)
    }

    /// Returns the stored block bitmap checksum, high 16 bits.
    pub fn block_bitmap_csum_hi(&self) -> u16 {
        u16::from_le(self.block_bitmap_csum_hi)
    }

    /// Compares the descriptor checksum to its stored value.
    pub fn validate_chksum(&self, sb: &Ext4Superblock, index: BlockGroupNumber) -> bool {
        if !sb
            .feature_ro_compat()
            .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
        {
            return true;
        }

        let comp_chksum = self.compute_chksum(sb, index);

        if comp_chksum != u16::from_le(self.checksum) {
            error!("ext4: invalid group descriptor checksum (bg {index})");

            return false;
        }

        true
    }

    /// Updates the descriptor checksum from the current field values.
    /// Without the `metadata_csum` feature the stored value is left alone.
    pub fn update_chksum(&mut self, sb: &Ext4Superblock, index: BlockGroupNumber) {
        if !sb
            .feature_ro_compat()
            .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
        {
            return;
        }

        self.checksum = self.compute_chksum(sb, index).to_le();
    }

    /// Checksum of a descriptor: crc32c over the volume UUID, the group
    /// number, and the descriptor itself (checksum field zeroed, truncated
    /// to the on-disk descriptor size), keeping the low 16 bits.
    fn compute_chksum(&self, sb: &Ext4Superblock, index: BlockGroupNumber) -> u16 {
        let mut desc_no_chksum = *self;
        desc_no_chksum.checksum = 0;

        let mut chksum = crc32c(CRC32C_INIT, bytes_of(&sb.uuid()));
        chksum = crc32c(chksum, &index.0.to_le_bytes());
        chksum = crc32c(
            chksum,
            &bytes_of(&desc_no_chksum)[..usize::from(sb.desc_size())],
        );

        (chksum & 0xFFFF) as u16
    }
}

/// Scoped reference to one block group's descriptor.
///
/// The handle owns an in-memory copy: dropping it without a release simply
/// discards local mutations, while [`Ext4Fs::put_block_group_ref`] flushes
/// them to the descriptor table when `dirty` is raised. No handle outlives
/// the allocator call that acquired it.
#[derive(Clone, Debug)]
pub struct BlockGroupRef {
    /// The group this handle refers to.
    pub index: BlockGroupNumber,

    /// In-memory copy of the group descriptor.
    pub desc: Ext4GroupDescriptor,

    /// Set whenever the descriptor was mutated and needs flushing.
    pub dirty: bool,
}

impl Ext4Fs {
    /// Borrows the descriptor of group `bgid`.
    ///
    /// The descriptor is served from the cache when present, and read from
    /// the on-disk descriptor table (checksum verified) otherwise.
    pub fn get_block_group_ref(&mut self, bgid: BlockGroupNumber) -> IOResult<BlockGroupRef> {
        if u32::from(bgid) >= self.sb.block_group_count() {
            return Err(IOError::InvalidCommand);
        }

        if let Some(desc) = self.bgd_cache.get(&u32::from(bgid)) {
            return Ok(BlockGroupRef {
                index: bgid,
                desc: *desc,
                dirty: false,
            });
        }

        let (table_block, offset) = self.gdt_entry_location(bgid);
        let block = self.block_get(table_block)?;

        // a 32-byte table entry is the front half of the full structure,
        // with every high field zero
        let mut raw_desc = [0u8; EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE as usize];
        let desc_size = usize::from(self.sb.desc_size());
        raw_desc[..desc_size].copy_from_slice(&block.data[offset..offset + desc_size]);

        let desc: Ext4GroupDescriptor = pod_read_unaligned(&raw_desc);

        if !desc.validate_chksum(&self.sb, bgid) {
            return Err(IOError::BadChecksum);
        }

        self.bgd_cache.insert(u32::from(bgid), desc);

        Ok(BlockGroupRef {
            index: bgid,
            desc,
            dirty: false,
        })
    }

    /// Releases a descriptor handle.
    ///
    /// A clean handle is a no-op. A dirty one gets its checksum re-stamped,
    /// replaces the cached copy and is written through to the descriptor
    /// table.
    pub fn put_block_group_ref(&mut self, bg_ref: BlockGroupRef) -> CanFail<IOError> {
        if !bg_ref.dirty {
            return Ok(());
        }

        let mut desc = bg_ref.desc;
        desc.update_chksum(&self.sb, bg_ref.index);

        self.bgd_cache.insert(u32::from(bg_ref.index), desc);

        let (table_block, offset) = self.gdt_entry_location(bg_ref.index);
        let desc_size = usize::from(self.sb.desc_size());

        let mut block = self.block_get(table_block)?;
        block.data[offset..offset + desc_size].copy_from_slice(&bytes_of(&desc)[..desc_size]);
        block.dirty = true;

        self.block_set(block)
    }

    /// Position of the descriptor of group `bgid` inside the descriptor
    /// table: `(table block address, byte offset within that block)`.
    ///
    /// The table starts in the block right after the superblock.
    fn gdt_entry_location(&self, bgid: BlockGroupNumber) -> (Ext4RealBlkId, usize) {
        let desc_size = u64::from(self.sb.desc_size());
        let desc_per_block = u64::from(self.sb.block_size()) / desc_size;

        let first_table_block = self.sb.first_data_block() + 1;
        let bgid = u64::from(u32::from(bgid));

        (
            Ext4RealBlkId::from(first_table_block + bgid / desc_per_block),
            ((bgid % desc_per_block) * desc_size) as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use core::mem::{offset_of, size_of};

    fn sb_with_desc_size(desc_size: u16) -> Ext4Superblock {
        let mut sb = Ext4Superblock::zeroed();
        sb.log_block_size = 0;
        sb.desc_size = desc_size.to_le();
        if desc_size == EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE {
            sb.feature_incompat =
                crate::sb::IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_64BIT;
        }
        sb
    }

    #[test]
    fn on_disk_layout() {
        assert_eq!(size_of::<Ext4GroupDescriptor>(), 64);
        assert_eq!(offset_of!(Ext4GroupDescriptor, free_blocks_count_lo), 0x0C);
        assert_eq!(offset_of!(Ext4GroupDescriptor, block_bitmap_csum_lo), 0x18);
        assert_eq!(offset_of!(Ext4GroupDescriptor, checksum), 0x1E);
        assert_eq!(offset_of!(Ext4GroupDescriptor, block_bitmap_hi), 0x20);
        assert_eq!(offset_of!(Ext4GroupDescriptor, block_bitmap_csum_hi), 0x38);
    }

    #[test]
    fn free_count_high_half_gated_on_desc_size() {
        let sb32 = sb_with_desc_size(32);
        let sb64 = sb_with_desc_size(64);
        let mut desc = Ext4GroupDescriptor::zeroed();

        desc.set_free_blocks_count(&sb32, 0x0002_0005);
        assert_eq!(desc.free_blocks_count(&sb32), 5);
        assert_eq!(desc.free_blocks_count_hi, 0);

        desc.set_free_blocks_count(&sb64, 0x0002_0005);
        assert_eq!(desc.free_blocks_count(&sb64), 0x0002_0005);
    }

    #[test]
    fn bitmap_address_high_half_gated_on_desc_size() {
        let sb32 = sb_with_desc_size(32);
        let sb64 = sb_with_desc_size(64);
        let mut desc = Ext4GroupDescriptor::zeroed();

        desc.set_block_bitmap(&sb64, Ext4RealBlkId::from(0x1_2345_6789));
        assert_eq!(u64::from(desc.block_bitmap(&sb64)), 0x1_2345_6789);
        assert_eq!(u64::from(desc.block_bitmap(&sb32)), 0x2345_6789);
    }

    #[test]
    fn bitmap_csum_stamping() {
        let sb32 = sb_with_desc_size(32);
        let sb64 = sb_with_desc_size(64);
        let mut desc = Ext4GroupDescriptor::zeroed();

        desc.set_block_bitmap_csum(&sb32, 0xABCD_1234);
        assert_eq!(desc.block_bitmap_csum_lo(), 0x1234);
        assert_eq!(desc.block_bitmap_csum_hi(), 0);

        desc.set_block_bitmap_csum(&sb64, 0xABCD_1234);
        assert_eq!(desc.block_bitmap_csum_hi(), 0xABCD);
    }

    #[test]
    fn descriptor_checksum_round_trip() {
        let mut sb = sb_with_desc_size(64);
        sb.feature_ro_compat =
            ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM;
        sb.uuid = crate::sb::Ext4FsUuid(*b"0123456789abcdef");

        let mut desc = Ext4GroupDescriptor::zeroed();
        desc.set_free_blocks_count(&sb, 42);

        let bgid = BlockGroupNumber::from(3);
        desc.update_chksum(&sb, bgid);
        assert!(desc.validate_chksum(&sb, bgid));

        desc.set_free_blocks_count(&sb, 41);
        assert!(!desc.validate_chksum(&sb, bgid));

        // without the feature the stored value is irrelevant
        let plain_sb = sb_with_desc_size(64);
        assert!(desc.validate_chksum(&plain_sb, bgid));
    }
}
