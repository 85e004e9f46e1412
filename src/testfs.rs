//! Test fixtures: a sparse in-memory block device and a minimal formatter
//! that lays out a superblock, a descriptor table and per-group bitmaps.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use bytemuck::{bytes_of, Zeroable};
use hashbrown::HashMap;
use spin::Mutex;

use crate::bdev::BlockDevice;
use crate::bitmap;
use crate::block_grp::{BlockGroupNumber, Ext4GroupDescriptor};
use crate::crc32c::{crc32c, CRC32C_INIT};
use crate::errors::{CanFail, IOError};
use crate::fs::{Ext4Fs, EXT4_SUPERBLOCK_OFFSET};
use crate::sb::{
    Ext4FsUuid, Ext4RealBlkId, Ext4Superblock, Ext4SuperblockMagic, IncompatibleFeatureSet,
    ReadOnlyCompatibleFeatureSet,
};

const CHUNK_SIZE: usize = 4096;

/// Sparse RAM-backed device: only chunks that were written occupy memory,
/// everything else reads back as zeroes. Large scenario geometries stay
/// cheap this way.
pub(crate) struct RamDisk {
    chunks: Mutex<HashMap<u64, Vec<u8>>>,

    /// When set, any write overlapping this byte offset fails.
    fail_write_at: Mutex<Option<u64>>,
}

impl RamDisk {
    pub(crate) fn new() -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
            fail_write_at: Mutex::new(None),
        }
    }

    /// Makes every write overlapping byte `offset` fail until cleared.
    pub(crate) fn fail_writes_at(&self, offset: Option<u64>) {
        *self.fail_write_at.lock() = offset;
    }
}

impl BlockDevice for RamDisk {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> CanFail<IOError> {
        let chunks = self.chunks.lock();
        let mut pos = 0usize;

        while pos < buf.len() {
            let abs = offset + pos as u64;
            let chunk_id = abs / CHUNK_SIZE as u64;
            let chunk_off = (abs % CHUNK_SIZE as u64) as usize;
            let len = (CHUNK_SIZE - chunk_off).min(buf.len() - pos);

            match chunks.get(&chunk_id) {
                Some(chunk) => buf[pos..pos + len].copy_from_slice(&chunk[chunk_off..chunk_off + len]),
                None => buf[pos..pos + len].fill(0),
            }
            pos += len;
        }

        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> CanFail<IOError> {
        if let Some(fail) = *self.fail_write_at.lock() {
            if offset <= fail && fail < offset + buf.len() as u64 {
                return Err(IOError::DeviceFailure);
            }
        }

        let mut chunks = self.chunks.lock();
        let mut pos = 0usize;

        while pos < buf.len() {
            let abs = offset + pos as u64;
            let chunk_id = abs / CHUNK_SIZE as u64;
            let chunk_off = (abs % CHUNK_SIZE as u64) as usize;
            let len = (CHUNK_SIZE - chunk_off).min(buf.len() - pos);

            let chunk = chunks.entry(chunk_id).or_insert_with(|| vec![0u8; CHUNK_SIZE]);
            chunk[chunk_off..chunk_off + len].copy_from_slice(&buf[pos..pos + len]);
            pos += len;
        }

        Ok(())
    }
}

pub(crate) struct FormatOpts {
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub block_count: u64,
    pub first_data_block: u32,
    pub incompat: IncompatibleFeatureSet,
    pub ro_compat: ReadOnlyCompatibleFeatureSet,

    /// Mark the formatter's own blocks (superblock, descriptor table,
    /// bitmaps) allocated. Scenario tests that want a fully-free group 0
    /// turn this off.
    pub mark_metadata: bool,
}

impl Default for FormatOpts {
    fn default() -> Self {
        Self {
            block_size: 1024,
            blocks_per_group: 64,
            block_count: 257,
            first_data_block: 1,
            incompat: IncompatibleFeatureSet::EMPTY_SET,
            ro_compat: ReadOnlyCompatibleFeatureSet::EMPTY_SET,
            mark_metadata: true,
        }
    }
}

pub(crate) struct TestVolume {
    pub disk: Arc<RamDisk>,
    pub fs: Ext4Fs,
}

/// Builds a consistent volume on a fresh [`RamDisk`] and mounts it.
///
/// Layout, front to back: superblock block, descriptor table, one bitmap
/// block per group. Bitmap padding bits past each group's valid prefix are
/// set, checksums are stamped wherever the requested features call for
/// them, and the three-way counter invariant holds from the start.
pub(crate) fn format(opts: &FormatOpts) -> TestVolume {
    let mut sb = Ext4Superblock::zeroed();
    sb.magic = Ext4SuperblockMagic::MAGIC;
    sb.log_block_size = (opts.block_size.trailing_zeros() - 10).to_le();
    sb.blocks_per_group = opts.blocks_per_group.to_le();
    sb.blocks_count_lo = ((opts.block_count & 0xFFFF_FFFF) as u32).to_le();
    sb.blocks_count_hi = ((opts.block_count >> 32) as u32).to_le();
    sb.first_data_block = opts.first_data_block.to_le();
    sb.feature_incompat = opts.incompat;
    sb.feature_ro_compat = opts.ro_compat;
    sb.uuid = Ext4FsUuid(*b"balloc-test-uuid");

    let metadata_csum = sb
        .feature_ro_compat()
        .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM);

    if sb
        .feature_incompat()
        .includes(IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_64BIT)
    {
        sb.desc_size = 64u16.to_le();
    }
    if metadata_csum {
        sb.checksum_type = 1;
    }

    let block_size = sb.block_size();
    let group_count = sb.block_group_count();
    let desc_size = u64::from(sb.desc_size());
    let fdb = sb.first_data_block();

    let table_blocks =
        (u64::from(group_count) * desc_size).div_ceil(u64::from(block_size));

    // superblock block, then the table, then one bitmap block per group
    let bitmap_block_of = |bgid: u32| fdb + 1 + table_blocks + u64::from(bgid);
    let metadata_end = bitmap_block_of(group_count - 1) + 1;
    assert!(
        metadata_end <= fdb + u64::from(sb.blocks_in_group_cnt(0)),
        "formatter metadata does not fit in group 0"
    );

    let disk = Arc::new(RamDisk::new());
    let mut table = vec![0u8; (table_blocks * u64::from(block_size)) as usize];
    let mut total_free = 0u64;

    for bgid in 0..group_count {
        let bits = sb.blocks_in_group_cnt(bgid);
        let mut bmap = vec![0u8; block_size as usize];

        // padding past the valid prefix is set at format time and never
        // touched again
        for idx in bits..(bits + 7) & !7 {
            bitmap::bit_set(&mut bmap, idx);
        }
        bmap[(bits as usize + 7) / 8..].fill(0xFF);

        let mut used = 0u32;
        if opts.mark_metadata {
            for baddr in fdb..metadata_end {
                if sb.bgid_of_block(baddr) == bgid {
                    bitmap::bit_set(&mut bmap, sb.baddr_to_index_in_group(baddr));
                    used += 1;
                }
            }
        }

        let mut desc = Ext4GroupDescriptor::zeroed();
        desc.set_block_bitmap(&sb, Ext4RealBlkId::from(bitmap_block_of(bgid)));
        desc.set_free_blocks_count(&sb, bits - used);
        total_free += u64::from(bits - used);

        if metadata_csum {
            let mut csum = crc32c(CRC32C_INIT, bytes_of(&sb.uuid()));
            csum = crc32c(csum, &bmap[..(sb.blocks_per_group() / 8) as usize]);
            desc.set_block_bitmap_csum(&sb, csum);
        }
        desc.update_chksum(&sb, BlockGroupNumber::from(bgid));

        let offset = (u64::from(bgid) * desc_size) as usize;
        table[offset..offset + desc_size as usize]
            .copy_from_slice(&bytes_of(&desc)[..desc_size as usize]);

        disk.write_at(bitmap_block_of(bgid) * u64::from(block_size), &bmap)
            .unwrap();
    }

    sb.set_free_blocks_count(total_free);
    if metadata_csum {
        sb.update_chksum();
    }

    disk.write_at((fdb + 1) * u64::from(block_size), &table).unwrap();
    disk.write_at(EXT4_SUPERBLOCK_OFFSET, bytes_of(&sb)).unwrap();

    let fs = Ext4Fs::mount(disk.clone()).expect("formatted volume failed to mount");

    TestVolume { disk, fs }
}
