//! Physical block allocator.
//!
//! The four entry points — [`Ext4Fs::alloc_block`], [`Ext4Fs::free_block`],
//! [`Ext4Fs::free_blocks`] and [`Ext4Fs::try_alloc_block`] — share one
//! discipline: load the group's bitmap, mutate it, store it, and only then
//! move the three redundant free-block counters (superblock, group
//! descriptor, inode). A failed bitmap store therefore leaves the
//! filesystem logically unchanged.
//!
//! Group and bitmap handles never outlive a call. Handles are plain values:
//! an early `?` return drops them unflushed, which releases them without
//! committing anything.

use log::{error, warn};

use crate::bdev::Block;
use crate::bitmap;
use crate::block_grp::{BlockGroupNumber, BlockGroupRef, Ext4GroupDescriptor};
use crate::crc32c::{crc32c, CRC32C_INIT};
use crate::errors::{AllocError, CanFail, IOError};
use crate::fs::Ext4Fs;
use crate::inode::{InodeRef, EXT4_INODE_BLOCK_SIZE};
use crate::sb::{
    Ext4RealBlkId, Ext4Superblock, IncompatibleFeatureSet, ReadOnlyCompatibleFeatureSet,
    EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE,
};

/// CRC32C of a block bitmap: the volume UUID seeds the chain, then the
/// bitmap's `blocks_per_group / 8` bytes. Zero when `metadata_csum` is off.
fn bitmap_csum(sb: &Ext4Superblock, bmap: &[u8]) -> u32 {
    if !sb
        .feature_ro_compat()
        .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
    {
        return 0;
    }

    let chksum = crc32c(CRC32C_INIT, bytemuck::bytes_of(&sb.uuid()));
    crc32c(chksum, &bmap[..(sb.blocks_per_group() / 8) as usize])
}

/// Stamps the bitmap checksum into the group descriptor. The high half is
/// only written on 64-byte descriptors.
fn set_bitmap_csum(sb: &Ext4Superblock, desc: &mut Ext4GroupDescriptor, bmap: &[u8]) {
    desc.set_block_bitmap_csum(sb, bitmap_csum(sb, bmap));
}

impl Ext4Fs {
    /// Compares a freshly read bitmap against the checksum stored in its
    /// group descriptor, under the `metadata_csum` feature.
    fn check_bitmap_csum(&self, bg_ref: &BlockGroupRef, bmap: &[u8]) -> CanFail<IOError> {
        if !self
            .sb
            .feature_ro_compat()
            .includes(ReadOnlyCompatibleFeatureSet::EXT4_FEATURE_RO_COMPAT_METADATA_CSUM)
        {
            return Ok(());
        }

        let chksum = bitmap_csum(&self.sb, bmap);
        let lo_ok = bg_ref.desc.block_bitmap_csum_lo() == (chksum & 0xFFFF) as u16;
        let hi_ok = self.sb.desc_size() != EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE
            || bg_ref.desc.block_bitmap_csum_hi() == (chksum >> 16) as u16;

        if !(lo_ok && hi_ok) {
            error!(
                "ext4: block bitmap checksum mismatch in group {}",
                bg_ref.index
            );
            return Err(IOError::BadChecksum);
        }

        Ok(())
    }

    /// Moves the three counters for one freshly claimed block. They move
    /// together, after the bitmap store; never expose them separately.
    fn account_alloc(&mut self, inode_ref: &mut InodeRef, bg_ref: &mut BlockGroupRef) {
        let sectors_per_block = u64::from(self.sb.block_size() / EXT4_INODE_BLOCK_SIZE);

        let sb_free = self.sb.free_blocks_count() - 1;
        self.sb.set_free_blocks_count(sb_free);

        let ino_blocks = inode_ref.inode.blocks_count(&self.sb) + sectors_per_block;
        inode_ref.inode.set_blocks_count(&self.sb, ino_blocks);
        inode_ref.dirty = true;

        let bg_free = bg_ref.desc.free_blocks_count(&self.sb) - 1;
        bg_ref.desc.set_free_blocks_count(&self.sb, bg_free);
        bg_ref.dirty = true;
    }

    /// Counterpart of [`Ext4Fs::account_alloc`] for `count` released
    /// blocks. The inode counter drops exactly once per freed block.
    fn account_free(&mut self, inode_ref: &mut InodeRef, bg_ref: &mut BlockGroupRef, count: u32) {
        let sectors_per_block = u64::from(self.sb.block_size() / EXT4_INODE_BLOCK_SIZE);

        let sb_free = self.sb.free_blocks_count() + u64::from(count);
        self.sb.set_free_blocks_count(sb_free);

        let ino_blocks =
            inode_ref.inode.blocks_count(&self.sb) - u64::from(count) * sectors_per_block;
        inode_ref.inode.set_blocks_count(&self.sb, ino_blocks);
        inode_ref.dirty = true;

        let bg_free = bg_ref.desc.free_blocks_count(&self.sb) + count;
        bg_ref.desc.set_free_blocks_count(&self.sb, bg_free);
        bg_ref.dirty = true;
    }

    /// Claims the clear bit `index_in_group`: sets it, stamps the bitmap
    /// checksum, stores the bitmap, then settles the counters and releases
    /// the group handle.
    fn claim_at(
        &mut self,
        inode_ref: &mut InodeRef,
        mut bg_ref: BlockGroupRef,
        mut bitmap_block: Block,
        index_in_group: u32,
    ) -> Result<Ext4RealBlkId, AllocError> {
        bitmap::bit_set(&mut bitmap_block.data, index_in_group);
        set_bitmap_csum(&self.sb, &mut bg_ref.desc, &bitmap_block.data);
        bitmap_block.dirty = true;

        self.block_set(bitmap_block)?;

        let allocated = self
            .sb
            .index_in_group_to_baddr(u32::from(bg_ref.index), index_in_group);

        self.account_alloc(inode_ref, &mut bg_ref);
        self.put_block_group_ref(bg_ref)?;

        Ok(Ext4RealBlkId::from(allocated))
    }

    /// Allocates one block, preferring the neighborhood of `goal`.
    ///
    /// The goal's group is probed in three steps — the goal bit itself, the
    /// remainder of its 64-bit bitmap word, then the whole group — before a
    /// cyclic walk visits every other group (and the goal's once more) in
    /// ascending order. The first clear bit encountered wins.
    ///
    /// Returns the absolute address of the claimed block, or
    /// [`AllocError::NoSpace`] once every group came up empty.
    pub fn alloc_block(
        &mut self,
        inode_ref: &mut InodeRef,
        goal: Ext4RealBlkId,
    ) -> Result<Ext4RealBlkId, AllocError> {
        let mut goal = u64::from(goal);

        if goal >= self.sb.block_count() {
            return Err(AllocError::InvalidArgument);
        }
        if goal < self.sb.first_data_block() {
            goal = self.sb.first_data_block();
        }

        let block_group = self.sb.bgid_of_block(goal);
        let mut index_in_group = self.sb.baddr_to_index_in_group(goal);

        let bg_ref = self.get_block_group_ref(BlockGroupNumber::from(block_group))?;

        if bg_ref.desc.free_blocks_count(&self.sb) > 0 {
            // group 0 keeps the superblock and descriptor table in its
            // lowest indexes; never aim below the group's first block
            let first_in_group = self.sb.block_of_bgid(block_group);
            let first_in_group_index = self.sb.baddr_to_index_in_group(first_in_group);
            if index_in_group < first_in_group_index {
                index_in_group = first_in_group_index;
            }

            let bitmap_block = self.block_get(bg_ref.desc.block_bitmap(&self.sb))?;
            self.check_bitmap_csum(&bg_ref, &bitmap_block.data)?;

            let blocks_in_group = self.sb.blocks_in_group_cnt(block_group);

            if bitmap::is_bit_clr(&bitmap_block.data, index_in_group) {
                return self.claim_at(inode_ref, bg_ref, bitmap_block, index_in_group);
            }

            // scan the rest of the goal's 64-bit word before falling back
            // on the whole group
            let end_idx = ((index_in_group + 63) & !63).min(blocks_in_group);
            if let Some(near) = (index_in_group + 1..end_idx)
                .find(|&idx| bitmap::is_bit_clr(&bitmap_block.data, idx))
            {
                return self.claim_at(inode_ref, bg_ref, bitmap_block, near);
            }

            if let Some(idx) =
                bitmap::find_bit_clr(&bitmap_block.data, index_in_group, blocks_in_group)
            {
                return self.claim_at(inode_ref, bg_ref, bitmap_block, idx);
            }
        }

        self.put_block_group_ref(bg_ref)?;

        // cyclic walk over the remaining groups, ending back on the goal's
        let group_count = self.sb.block_group_count();

        for bgid in (1..=group_count).map(|step| (block_group + step) % group_count) {
            let bg_ref = self.get_block_group_ref(BlockGroupNumber::from(bgid))?;

            if bg_ref.desc.free_blocks_count(&self.sb) == 0 {
                self.put_block_group_ref(bg_ref)?;
                continue;
            }

            let bitmap_block = self.block_get(bg_ref.desc.block_bitmap(&self.sb))?;
            self.check_bitmap_csum(&bg_ref, &bitmap_block.data)?;

            let first_in_group = self.sb.block_of_bgid(bgid);
            let index_in_group = self.sb.baddr_to_index_in_group(first_in_group);
            let blocks_in_group = self.sb.blocks_in_group_cnt(bgid);

            if let Some(idx) =
                bitmap::find_bit_clr(&bitmap_block.data, index_in_group, blocks_in_group)
            {
                return self.claim_at(inode_ref, bg_ref, bitmap_block, idx);
            }

            self.put_block_group_ref(bg_ref)?;
        }

        Err(AllocError::NoSpace)
    }

    /// Returns one block to the free pool.
    ///
    /// The bitmap bit is cleared and stored first; the counters move only
    /// once the store went through.
    pub fn free_block(
        &mut self,
        inode_ref: &mut InodeRef,
        baddr: Ext4RealBlkId,
    ) -> CanFail<AllocError> {
        let baddr = u64::from(baddr);

        if baddr < self.sb.first_data_block() || baddr >= self.sb.block_count() {
            return Err(AllocError::InvalidArgument);
        }

        let block_group = self.sb.bgid_of_block(baddr);
        let index_in_group = self.sb.baddr_to_index_in_group(baddr);

        let mut bg_ref = self.get_block_group_ref(BlockGroupNumber::from(block_group))?;

        let mut bitmap_block = self.block_get(bg_ref.desc.block_bitmap(&self.sb))?;
        self.check_bitmap_csum(&bg_ref, &bitmap_block.data)?;

        if bitmap::is_bit_clr(&bitmap_block.data, index_in_group) {
            warn!("ext4: freeing block {baddr} which is already free");
        }

        bitmap::bit_clr(&mut bitmap_block.data, index_in_group);
        set_bitmap_csum(&self.sb, &mut bg_ref.desc, &bitmap_block.data);
        bitmap_block.dirty = true;

        self.block_set(bitmap_block)?;

        self.account_free(inode_ref, &mut bg_ref, 1);

        self.put_block_group_ref(bg_ref).map_err(AllocError::from)
    }

    /// Returns `count` contiguous blocks starting at `first` to the free
    /// pool.
    ///
    /// Without `flex_bg` a contiguous allocated range cannot leak into
    /// another group; crossing ranges fail fast in debug builds. Each
    /// visited group is settled (bitmap stored, counters moved, handle
    /// released) before the next one is touched.
    pub fn free_blocks(
        &mut self,
        inode_ref: &mut InodeRef,
        first: Ext4RealBlkId,
        count: u32,
    ) -> CanFail<AllocError> {
        if count == 0 {
            return Ok(());
        }

        let mut first = u64::from(first);
        let mut count = count;

        if first < self.sb.first_data_block()
            || first + u64::from(count) > self.sb.block_count()
        {
            return Err(AllocError::InvalidArgument);
        }

        let block_group_first = self.sb.bgid_of_block(first);
        let block_group_last = self.sb.bgid_of_block(first + u64::from(count) - 1);

        if !self
            .sb
            .feature_incompat()
            .includes(IncompatibleFeatureSet::EXT4_FEATURE_INCOMPAT_FLEX_BG)
        {
            debug_assert_eq!(
                block_group_first, block_group_last,
                "contiguous range crosses a group boundary without flex_bg"
            );
        }

        let mut bgid = block_group_first;
        while bgid <= block_group_last {
            let mut bg_ref = self.get_block_group_ref(BlockGroupNumber::from(bgid))?;

            let index_in_group = self.sb.baddr_to_index_in_group(first);

            let mut bitmap_block = self.block_get(bg_ref.desc.block_bitmap(&self.sb))?;
            self.check_bitmap_csum(&bg_ref, &bitmap_block.data)?;

            // the tail of the range may continue in the next group's bitmap
            let room = self.sb.block_size() * 8 - index_in_group;
            let freed = count.min(room);

            bitmap::bits_free(&mut bitmap_block.data, index_in_group, freed);
            set_bitmap_csum(&self.sb, &mut bg_ref.desc, &bitmap_block.data);
            bitmap_block.dirty = true;

            first += u64::from(freed);
            count -= freed;

            self.block_set(bitmap_block)?;

            self.account_free(inode_ref, &mut bg_ref, freed);
            self.put_block_group_ref(bg_ref)?;

            bgid += 1;
        }

        debug_assert_eq!(count, 0, "unfreed blocks left after the group walk");

        Ok(())
    }

    /// Claims the specific block `baddr` if it is still free.
    ///
    /// Returns whether the block was free before the call; counters move
    /// only when it was.
    pub fn try_alloc_block(
        &mut self,
        inode_ref: &mut InodeRef,
        baddr: Ext4RealBlkId,
    ) -> Result<bool, AllocError> {
        let baddr = u64::from(baddr);

        if baddr < self.sb.first_data_block() || baddr >= self.sb.block_count() {
            return Err(AllocError::InvalidArgument);
        }

        let block_group = self.sb.bgid_of_block(baddr);
        let index_in_group = self.sb.baddr_to_index_in_group(baddr);

        let mut bg_ref = self.get_block_group_ref(BlockGroupNumber::from(block_group))?;

        let mut bitmap_block = self.block_get(bg_ref.desc.block_bitmap(&self.sb))?;
        self.check_bitmap_csum(&bg_ref, &bitmap_block.data)?;

        let free = bitmap::is_bit_clr(&bitmap_block.data, index_in_group);

        if free {
            bitmap::bit_set(&mut bitmap_block.data, index_in_group);
            set_bitmap_csum(&self.sb, &mut bg_ref.desc, &bitmap_block.data);
            bitmap_block.dirty = true;
        }

        self.block_set(bitmap_block)?;

        if free {
            self.account_alloc(inode_ref, &mut bg_ref);
        }

        self.put_block_group_ref(bg_ref)?;

        Ok(free)
    }
}
