//! `ext4` superblock structures and the geometry map derived from them.
//!
//! The superblock stores the filesystem's characteristics (block count,
//! sizes, feature sets, ...). The allocator reads its geometry from here and
//! maintains its 64-bit free-block counter; everything else is carried so
//! that the on-disk layout round-trips.
//!
//! All multi-byte on-disk fields are little-endian; the accessor methods
//! encapsulate the byte order so callers stay byte-order-agnostic.

use bytemuck::{bytes_of, Pod, Zeroable};
use log::error;

use crate::crc32c::{crc32c, CRC32C_INIT};

/// Derives the [`core::fmt::Display`] trait for tuple structs containing a
/// single field.
#[macro_export]
macro_rules! ext4_uint_field_derive_display {
    ($struct_name: tt) => {
        impl core::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_fmt(format_args!("{}", self.0))
            }
        }
    };
}

/// Defines a standard structure for flag-related fields of the on-disk
/// metadata.
#[macro_export]
macro_rules! ext4_flag_field {
    ($struct_name: tt, $size: ident, $desc: literal) => {
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable,
        )]
        #[repr(transparent)]
        #[doc=$desc]
        pub struct $struct_name($size);

        impl core::ops::BitAnd for $struct_name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self::Output {
                Self(self.0 & rhs.0)
            }
        }

        impl core::ops::BitOr for $struct_name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }

        impl core::ops::BitXor for $struct_name {
            type Output = Self;

            fn bitxor(self, rhs: Self) -> Self::Output {
                Self(self.0 ^ rhs.0)
            }
        }
    };
}

/// Absolute 64-bit index into the filesystem's logical block space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Ext4RealBlkId(u64);

ext4_uint_field_derive_display!(Ext4RealBlkId);

impl From<u64> for Ext4RealBlkId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Ext4RealBlkId> for u64 {
    fn from(value: Ext4RealBlkId) -> Self {
        value.0
    }
}

/// Lower or upper 32-bit half of an [`Ext4RealBlkId`], as stored in the
/// group descriptors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Ext4RealBlkId32(pub(crate) u32);

impl Ext4RealBlkId32 {
    pub(crate) fn add_high_bits(self, high: Ext4RealBlkId32) -> Ext4RealBlkId {
        Ext4RealBlkId(u64::from(u32::from_le(self.0)) | (u64::from(u32::from_le(high.0)) << 32))
    }
}

/// 128-bit UUID identifying the volume, also the seed of every metadata
/// checksum chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Ext4FsUuid(pub(crate) [u8; 16]);

/// Magic number `Ext4Superblock` field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Ext4SuperblockMagic(u16);

impl Ext4SuperblockMagic {
    pub const MAGIC: Self = Self(0xEF53_u16.to_le());

    pub fn is_valid(self) -> bool {
        self == Self::MAGIC
    }
}

/// Checksum of the `Ext4Superblock` structure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Ext4SuperblockChksum(u32);

ext4_flag_field!(
    CompatibleFeatureSet,
    u32,
    "Compatible feature set flags. The system may still read/write to this \
filesystem even if it doesn't implement all flags defined in the superblock."
);

impl CompatibleFeatureSet {
    /// Empty feature set.
    pub const EMPTY_SET: Self = Self(0);

    /// Create a journal file to ensure file system consistency.
    pub const EXT4_FEATURE_COMPAT_HAS_JOURNAL: Self = Self(0x0004);

    /// This feature enables the use of extended attributes.
    pub const EXT4_FEATURE_COMPAT_EXT_ATTR: Self = Self(0x0008);

    /// Space has been reserved so that the block group descriptor table can
    /// be extended while resizing a mounted file system.
    pub const EXT4_FEATURE_COMPAT_RESIZE_INODE: Self = Self(0x0010);

    /// Use hashed B-trees to speed up name lookup in large directories.
    pub const EXT4_FEATURE_COMPAT_DIR_INDEX: Self = Self(0x0020);

    /// Checks if this `CompatibleFeatureSet` is a subset of (included in)
    /// the `CompatibleFeatureSet` passed as argument.
    pub fn is_subset_of(self, features: Self) -> bool {
        (self | features) ^ features == Self::EMPTY_SET
    }

    /// Checks if this `CompatibleFeatureSet` includes the set passed as
    /// argument.
    pub fn includes(self, features: Self) -> bool {
        features.is_subset_of(self)
    }
}

ext4_flag_field!(
    IncompatibleFeatureSet,
    u32,
    "Incompatible feature set flags. The system should refuse to mount a \
filesystem carrying a flag it does not implement."
);

impl IncompatibleFeatureSet {
    /// Empty feature set.
    pub const EMPTY_SET: Self = Self(0);

    /// Directory entries record the type of the file they point to.
    pub const EXT4_FEATURE_INCOMPAT_FILETYPE: Self = Self(0x0002);

    /// Files use extent trees instead of indirect block maps.
    pub const EXT4_FEATURE_INCOMPAT_EXTENTS: Self = Self(0x0040);

    /// Block addresses and counters are 64-bit wide; group descriptors may
    /// grow to 64 bytes.
    pub const EXT4_FEATURE_INCOMPAT_64BIT: Self = Self(0x0080);

    /// Block group metadata (bitmaps, inode tables) may live outside their
    /// own group, so contiguous data ranges can cross group boundaries.
    pub const EXT4_FEATURE_INCOMPAT_FLEX_BG: Self = Self(0x0200);

    /// Checks if this `IncompatibleFeatureSet` is a subset of (included in)
    /// the `IncompatibleFeatureSet` passed as argument.
    pub fn is_subset_of(self, features: Self) -> bool {
        (self | features) ^ features == Self::EMPTY_SET
    }

    /// Checks if this `IncompatibleFeatureSet` includes the set passed as
    /// argument.
    pub fn includes(self, features: Self) -> bool {
        features.is_subset_of(self)
    }
}

ext4_flag_field!(
    ReadOnlyCompatibleFeatureSet,
    u32,
    "Read-only compatible feature set flags. If the system does not \
understand one of these flags, it may still mount the filesystem read-only."
);

impl ReadOnlyCompatibleFeatureSet {
    /// Empty feature set.
    pub const EMPTY_SET: Self = Self(0);

    /// Backup copies of the superblock are present only in a subset of
    /// block groups.
    pub const EXT4_FEATURE_RO_COMPAT_SPARSE_SUPER: Self = Self(0x0001);

    /// Usually set when a file larger than 2 GiB is created.
    pub const EXT4_FEATURE_RO_COMPAT_LARGE_FILE: Self = Self(0x0002);

    /// Allows files larger than 2 TiB; inode block counts gain 16 high
    /// bits.
    pub const EXT4_FEATURE_RO_COMPAT_HUGE_FILE: Self = Self(0x0008);

    /// Group descriptors have checksums.
    pub const EXT4_FEATURE_RO_COMPAT_GDT_CSUM: Self = Self(0x0010);

    /// Filesystem metadata, including the allocation bitmaps, carries
    /// CRC32C checksums.
    pub const EXT4_FEATURE_RO_COMPAT_METADATA_CSUM: Self = Self(0x0400);

    /// Checks if this `ReadOnlyCompatibleFeatureSet` is a subset of
    /// (included in) the `ReadOnlyCompatibleFeatureSet` passed as argument.
    pub fn is_subset_of(self, features: Self) -> bool {
        (self | features) ^ features == Self::EMPTY_SET
    }

    /// Checks if this `ReadOnlyCompatibleFeatureSet` includes the set
    /// passed as argument.
    pub fn includes(self, features: Self) -> bool {
        features.is_subset_of(self)
    }
}

/// Group descriptors are 64 bytes at most; half of that without the
/// `64bit` feature.
pub const EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE: u16 = 64;

pub const EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE: u16 = 32;

/// The `Ext4Superblock` holds useful information about the filesystem's
/// characteristics and attributes (block count, sizes, required features,
/// ...). It lives at byte offset 1024 of the volume and is 1024 bytes long.
///
/// The allocator mutates only the free-block counters; every other field is
/// carried verbatim so that the structure round-trips to disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Ext4Superblock {
    /// Inodes count.
    pub(crate) inodes_count: u32,

    /// Blocks count, low 32 bits.
    pub(crate) blocks_count_lo: u32,

    /// Reserved (superuser-only) blocks count, low 32 bits.
    pub(crate) r_blocks_count_lo: u32,

    /// Free blocks count, low 32 bits.
    pub(crate) free_blocks_count_lo: u32,

    /// Free inodes count.
    pub(crate) free_inodes_count: u32,

    /// First data block: block number of the block containing the
    /// superblock. 1 for 1 KiB blocks, 0 otherwise.
    pub(crate) first_data_block: u32,

    /// Block size, defined as `log_2(block_size) - 10`.
    pub(crate) log_block_size: u32,

    /// Allocation cluster size, defined as `log_2(cluster_size) - 10`.
    pub(crate) log_cluster_size: u32,

    /// Number of blocks in each group.
    pub(crate) blocks_per_group: u32,

    /// Number of clusters in each group.
    pub(crate) clusters_per_group: u32,

    /// Number of inodes in each group.
    pub(crate) inodes_per_group: u32,

    /// Last mount time.
    pub(crate) mtime: u32,

    /// Last write time.
    pub(crate) wtime: u32,

    /// Mount count since the last consistency check.
    pub(crate) mnt_count: u16,

    /// Number of mounts allowed before a consistency check is required.
    pub(crate) max_mnt_count: u16,

    /// `ext4` magic signature: `0xEF53`.
    pub(crate) magic: Ext4SuperblockMagic,

    /// File system state.
    pub(crate) state: u16,

    /// Behaviour on error detection.
    pub(crate) errors: u16,

    /// Minor revision level.
    pub(crate) minor_rev_level: u16,

    /// Time of last consistency check.
    pub(crate) lastcheck: u32,

    /// Max time between successive consistency checks.
    pub(crate) checkinterval: u32,

    /// Operating system ID from which the filesystem was created.
    pub(crate) creator_os: u32,

    /// Major revision level.
    pub(crate) rev_level: u32,

    /// Default user ID for reserved blocks.
    pub(crate) def_resuid: u16,

    /// Default group ID for reserved blocks.
    pub(crate) def_resgid: u16,

    /// First non-reserved inode in the file system.
    pub(crate) first_ino: u32,

    /// Size of each inode structure, in bytes.
    pub(crate) inode_size: u16,

    /// Block group number of this superblock copy.
    pub(crate) block_group_nr: u16,

    /// Compatible feature set.
    pub(crate) feature_compat: CompatibleFeatureSet,

    /// Incompatible feature set.
    pub(crate) feature_incompat: IncompatibleFeatureSet,

    /// Read-only compatible feature set.
    pub(crate) feature_ro_compat: ReadOnlyCompatibleFeatureSet,

    /// 128-bit UUID for the volume.
    pub(crate) uuid: Ext4FsUuid,

    /// Volume name.
    pub(crate) volume_name: [u8; 16],

    /// Path the volume was last mounted to.
    pub(crate) last_mounted: [u8; 64],

    /// Compression algorithms in use (unused).
    pub(crate) algorithm_usage_bitmap: u32,

    /// Number of blocks to preallocate for regular files.
    pub(crate) prealloc_blocks: u8,

    /// Number of blocks to preallocate for directories.
    pub(crate) prealloc_dir_blocks: u8,

    /// Number of reserved GDT entries for future filesystem growth.
    pub(crate) reserved_gdt_blocks: u16,

    /// UUID of the journal superblock.
    pub(crate) journal_uuid: [u8; 16],

    /// Inode number of the journal file.
    pub(crate) journal_inum: u32,

    /// Device number of the journal file, if external.
    pub(crate) journal_dev: u32,

    /// Head of the list of orphaned inodes to delete.
    pub(crate) last_orphan: u32,

    /// HTREE hash seed.
    pub(crate) hash_seed: [u32; 4],

    /// Default hash algorithm for directory hashes.
    pub(crate) def_hash_version: u8,

    /// Journal backup type.
    pub(crate) jnl_backup_type: u8,

    /// Size of group descriptors, when the `64bit` feature is set.
    pub(crate) desc_size: u16,

    /// Default mount options.
    pub(crate) default_mount_opts: u32,

    /// First metablock block group, if the `meta_bg` feature is enabled.
    pub(crate) first_meta_bg: u32,

    /// Filesystem creation time.
    pub(crate) mkfs_time: u32,

    /// Backup copy of the journal inode's block array.
    pub(crate) jnl_blocks: [u32; 17],

    /// Blocks count, high 32 bits.
    pub(crate) blocks_count_hi: u32,

    /// Reserved blocks count, high 32 bits.
    pub(crate) r_blocks_count_hi: u32,

    /// Free blocks count, high 32 bits.
    pub(crate) free_blocks_count_hi: u32,

    /// Inodes smaller than this have no extra fields.
    pub(crate) min_extra_isize: u16,

    /// New inodes should reserve this many extra bytes.
    pub(crate) want_extra_isize: u16,

    /// Miscellaneous flags.
    pub(crate) flags: u32,

    /// RAID stride.
    pub(crate) raid_stride: u16,

    /// Seconds to wait in multi-mount protection checking.
    pub(crate) mmp_update_interval: u16,

    /// Block for the multi-mount protection data.
    pub(crate) mmp_block: u64,

    /// Blocks on all data disks (N * stride).
    pub(crate) raid_stripe_width: u32,

    /// Flexible block group size, defined as `log_2(groups_per_flex)`.
    pub(crate) log_groups_per_flex: u8,

    /// Metadata checksum algorithm; 1 means crc32c.
    pub(crate) checksum_type: u8,

    pub(crate) encryption_level: u8,

    pub(crate) reserved_pad: u8,

    /// Number of KiB written over the filesystem's lifetime.
    pub(crate) kbytes_written: u64,

    /// Inode number of the active snapshot.
    pub(crate) snapshot_inum: u32,

    /// Sequential ID of the active snapshot.
    pub(crate) snapshot_id: u32,

    /// Blocks reserved for the active snapshot's future use.
    pub(crate) snapshot_r_blocks_count: u64,

    /// Inode number of the head of the on-disk snapshot list.
    pub(crate) snapshot_list: u32,

    /// Number of errors seen.
    pub(crate) error_count: u32,

    /// First time an error happened.
    pub(crate) first_error_time: u32,

    /// Inode involved in the first error.
    pub(crate) first_error_ino: u32,

    /// Block involved in the first error.
    pub(crate) first_error_block: u64,

    /// Function where the first error happened.
    pub(crate) first_error_func: [u8; 32],

    /// Line number where the first error happened.
    pub(crate) first_error_line: u32,

    /// Most recent time an error happened.
    pub(crate) last_error_time: u32,

    /// Inode involved in the most recent error.
    pub(crate) last_error_ino: u32,

    /// Line number where the most recent error happened.
    pub(crate) last_error_line: u32,

    /// Block involved in the most recent error.
    pub(crate) last_error_block: u64,

    /// Function where the most recent error happened.
    pub(crate) last_error_func: [u8; 32],

    /// ASCIIZ string of mount options.
    pub(crate) mount_opts: [u8; 64],

    /// Inode for tracking user quota.
    pub(crate) usr_quota_inum: u32,

    /// Inode for tracking group quota.
    pub(crate) grp_quota_inum: u32,

    /// Overhead blocks/clusters in the filesystem.
    pub(crate) overhead_blocks: u32,

    /// Groups with `sparse_super2` superblock backups.
    pub(crate) backup_bgs: [u32; 2],

    /// Encryption algorithms in use.
    pub(crate) encrypt_algos: [u8; 4],

    /// Salt used for the string2key algorithm.
    pub(crate) encrypt_pw_salt: [u8; 16],

    /// Location of the lost+found inode.
    pub(crate) lpf_ino: u32,

    /// Inode for tracking project quota.
    pub(crate) prj_quota_inum: u32,

    /// Checksum seed, when it differs from the UUID-derived one.
    pub(crate) checksum_seed: u32,

    /// High 8 bits of the last write time.
    pub(crate) wtime_hi: u8,

    /// High 8 bits of the last mount time.
    pub(crate) mtime_hi: u8,

    /// High 8 bits of the filesystem creation time.
    pub(crate) mkfs_time_hi: u8,

    /// High 8 bits of the last consistency check time.
    pub(crate) lastcheck_hi: u8,

    /// High 8 bits of the first error time.
    pub(crate) first_error_time_hi: u8,

    /// High 8 bits of the most recent error time.
    pub(crate) last_error_time_hi: u8,

    pub(crate) pad: [u8; 2],

    /// Filename charset encoding.
    pub(crate) encoding: u16,

    /// Filename charset encoding flags.
    pub(crate) encoding_flags: u16,

    /// Inode number of the orphan file.
    pub(crate) orphan_file_inum: u32,

    /// Padding to 1024 bytes.
    pub(crate) reserved: [u32; 94],

    /// Superblock checksum, crc32c of everything above.
    pub(crate) checksum: Ext4SuperblockChksum,
}

impl Ext4Superblock {
    /// Returns the size of a block, in bytes.
    pub fn block_size(&self) -> u32 {
        1024 << u32::from_le(self.log_block_size)
    }

    /// Returns the block number of the block containing the superblock: 1
    /// for 1 KiB blocks, 0 otherwise. Blocks below it are never handed out.
    pub fn first_data_block(&self) -> u64 {
        u64::from(u32::from_le(self.first_data_block))
    }

    /// Returns the number of blocks in each block group.
    pub fn blocks_per_group(&self) -> u32 {
        u32::from_le(self.blocks_per_group)
    }

    /// Returns the total count of blocks.
    pub fn block_count(&self) -> u64 {
        let lo = u64::from(u32::from_le(self.blocks_count_lo));

        if self
            .feature_incompat()
            .includes(IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_64BIT)
        {
            lo | (u64::from(u32::from_le(self.blocks_count_hi)) << 32)
        } else {
            lo
        }
    }

    /// Returns the count of free blocks, merging the two on-disk halves.
    pub fn free_blocks_count(&self) -> u64 {
        let lo = u64::from(u32::from_le(self.free_blocks_count_lo));

        if self
            .feature_incompat()
            .includes(IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_64BIT)
        {
            lo | (u64::from(u32::from_le(self.free_blocks_count_hi)) << 32)
        } else {
            lo
        }
    }

    /// Updates the count of free blocks, splitting it into the two on-disk
    /// halves.
    pub fn set_free_blocks_count(&mut self, count: u64) {
        self.free_blocks_count_lo = ((count & 0xFFFF_FFFF) as u32).to_le();

        if self
            .feature_incompat()
            .includes(IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_64BIT)
        {
            self.free_blocks_count_hi = ((count >> 32) as u32).to_le();
        }
    }

    /// Returns the size of a block group descriptor, in bytes: 64 when the
    /// `64bit` feature claims it, 32 otherwise.
    pub fn desc_size(&self) -> u16 {
        let raw = u16::from_le(self.desc_size);

        if self
            .feature_incompat()
            .includes(IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_64BIT)
            && raw >= EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE
        {
            EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE
        } else {
            EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE
        }
    }

    /// Returns the volume UUID.
    pub fn uuid(&self) -> Ext4FsUuid {
        self.uuid
    }

    /// Returns the compatible feature set.
    pub fn feature_compat(&self) -> CompatibleFeatureSet {
        CompatibleFeatureSet(u32::from_le(self.feature_compat.0))
    }

    /// Returns the incompatible feature set.
    pub fn feature_incompat(&self) -> IncompatibleFeatureSet {
        IncompatibleFeatureSet(u32::from_le(self.feature_incompat.0))
    }

    /// Returns the read-only compatible feature set.
    pub fn feature_ro_compat(&self) -> ReadOnlyCompatibleFeatureSet {
        ReadOnlyCompatibleFeatureSet(u32::from_le(self.feature_ro_compat.0))
    }

    /// Checks the superblock magic signature.
    pub fn magic_valid(&self) -> bool {
        self.magic.is_valid()
    }

    /// Returns the number of block groups of this filesystem.
    pub fn block_group_count(&self) -> u32 {
        let data_blocks = self.block_count() - self.first_data_block();

        data_blocks.div_ceil(u64::from(self.blocks_per_group())) as u32
    }

    /// Returns the number of blocks in group `bgid`. Only the last group
    /// may come up short.
    pub fn blocks_in_group_cnt(&self, bgid: u32) -> u32 {
        let group_count = self.block_group_count();

        if bgid + 1 < group_count {
            return self.blocks_per_group();
        }

        let data_blocks = self.block_count() - self.first_data_block();
        (data_blocks - u64::from(group_count - 1) * u64::from(self.blocks_per_group())) as u32
    }

    /// Returns the block group holding the block at `baddr`.
    ///
    /// The first-data-block bias applies only on layouts where block 0 is
    /// the superblock pad, and never to block 0 itself: that keeps group 0
    /// anchored at the block actually holding the superblock.
    pub fn bgid_of_block(&self, baddr: u64) -> u32 {
        let mut baddr = baddr;

        if self.first_data_block() != 0 && baddr != 0 {
            baddr -= 1;
        }

        (baddr / u64::from(self.blocks_per_group())) as u32
    }

    /// Returns the absolute address of the first block of group `bgid`.
    pub fn block_of_bgid(&self, bgid: u32) -> u64 {
        let mut baddr = 0;

        if self.first_data_block() != 0 {
            baddr += 1;
        }

        baddr + u64::from(bgid) * u64::from(self.blocks_per_group())
    }

    /// Returns the position of the block at `baddr` within its group.
    pub fn baddr_to_index_in_group(&self, baddr: u64) -> u32 {
        let mut baddr = baddr;

        if self.first_data_block() != 0 && baddr != 0 {
            baddr -= 1;
        }

        (baddr % u64::from(self.blocks_per_group())) as u32
    }

    /// Returns the absolute address of the block at position `index` within
    /// group `bgid`.
    pub fn index_in_group_to_baddr(&self, bgid: u32, index: u32) -> u64 {
        let mut index = u64::from(index);

        if self.first_data_block() != 0 {
            index += 1;
        }

        u64::from(bgid) * u64::from(self.blocks_per_group()) + index
    }

    /// Compares the checksum of the `Ext4Superblock` to its stored value.
    pub fn validate_chksum(&self) -> bool {
        let comp_chksum = self.compute_chksum();

        if comp_chksum != self.checksum {
            error!(
                "ext4: invalid superblock checksum (got {:#010x} expected {:#010x})",
                u32::from_le(comp_chksum.0),
                u32::from_le(self.checksum.0),
            );

            return false;
        }

        true
    }

    /// Updates the checksum field based on the current value of the other
    /// fields. Useful before writing the `Ext4Superblock` back to disk.
    pub fn update_chksum(&mut self) {
        self.checksum = self.compute_chksum();
    }

    fn compute_chksum(&self) -> Ext4SuperblockChksum {
        let sb_bytes = bytes_of(self);

        // the trailing checksum field takes no part in the calculation
        Ext4SuperblockChksum(crc32c(CRC32C_INIT, &sb_bytes[..sb_bytes.len() - 4]).to_le())
    }
}
