//! Disk layout:
//! [ super block | block bitmap | inode bitmap | inode blocks(5) | data blocks(n) ]
//! 8 + n blocks in total. Callers address records by region and index, never by byte offset.

use crate::block_device::BlockDevice;
use crate::common::*;
use crate::error::{FsError, Result};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    SuperBlock,
    BlockBitmap,
    InodeBitmap,
    InodeTable,
    Data,
}

impl Region {
    /// first block of the region
    pub const fn start(self) -> usize {
        match self {
            Region::SuperBlock => SB_BLOCK,
            Region::BlockBitmap => BMAP_BLOCK,
            Region::InodeBitmap => IMAP_BLOCK,
            Region::InodeTable => INODE_START,
            Region::Data => DATA_START,
        }
    }

    /// # of blocks in the region; the data region is sized by the superblock
    const fn blocks(self, data_blocks: usize) -> usize {
        match self {
            Region::SuperBlock | Region::BlockBitmap | Region::InodeBitmap => 1,
            Region::InodeTable => INODE_BLOCKS,
            Region::Data => data_blocks,
        }
    }
}

/// A fixed-width structure living at a known index inside one region.
pub trait Record: Serialize + DeserializeOwned {
    const REGION: Region;
    /// encoded width; records never straddle a block boundary
    const SIZE: usize;
    /// # of records the region holds
    const CAPACITY: usize;
}

/// Typed accessor over a block device.
#[derive(Clone)]
pub struct Disk {
    blk_dev: Arc<dyn BlockDevice>,
    data_blocks: usize,
}

impl Disk {
    pub fn new(blk_dev: Arc<dyn BlockDevice>, data_blocks: usize) -> Result<Self> {
        let needed = DATA_START + data_blocks;
        if blk_dev.num_blocks() < needed {
            return Err(FsError::corrupt(format!(
                "device holds {} blocks, layout needs {}",
                blk_dev.num_blocks(),
                needed
            )));
        }
        Ok(Self {
            blk_dev,
            data_blocks,
        })
    }

    pub fn blk_dev(&self) -> Arc<dyn BlockDevice> {
        self.blk_dev.clone()
    }

    pub fn data_blocks(&self) -> usize {
        self.data_blocks
    }

    fn blockno(&self, region: Region, index: usize) -> Result<usize> {
        if index >= region.blocks(self.data_blocks) {
            return Err(FsError::corrupt(format!(
                "block {index} outside the {region:?} region"
            )));
        }
        Ok(region.start() + index)
    }

    /// (absolute block, byte offset) of record `index`
    fn locate<T: Record>(index: usize) -> Result<(usize, usize)> {
        if index >= T::CAPACITY {
            return Err(FsError::corrupt(format!(
                "record {index} outside the {:?} region",
                T::REGION
            )));
        }
        let per_block = BSIZE / T::SIZE;
        Ok((
            T::REGION.start() + index / per_block,
            (index % per_block) * T::SIZE,
        ))
    }

    pub fn read_block(&self, region: Region, index: usize) -> Result<Block> {
        let mut buf = [0u8; BSIZE];
        self.blk_dev
            .read_block(self.blockno(region, index)?, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` to the block, zero-padding whatever it does not cover.
    pub fn write_block(&self, region: Region, index: usize, data: &[u8]) -> Result<()> {
        if data.len() > BSIZE {
            return Err(FsError::InvalidArgument);
        }
        let mut buf = [0u8; BSIZE];
        buf[..data.len()].copy_from_slice(data);
        self.blk_dev.write_block(self.blockno(region, index)?, &buf)?;
        Ok(())
    }

    pub fn zero_block(&self, region: Region, index: usize) -> Result<()> {
        self.write_block(region, index, &[])
    }

    pub fn read_record<T: Record>(&self, index: usize) -> Result<T> {
        let (blockno, offset) = Self::locate::<T>(index)?;
        let mut buf = [0u8; BSIZE];
        self.blk_dev.read_block(blockno, &mut buf)?;
        Ok(bincode::deserialize(&buf[offset..offset + T::SIZE])?)
    }

    pub fn write_record<T: Record>(&self, index: usize, rec: &T) -> Result<()> {
        let (blockno, offset) = Self::locate::<T>(index)?;
        let mut buf = [0u8; BSIZE];
        self.blk_dev.read_block(blockno, &mut buf)?;
        bincode::serialize_into(&mut buf[offset..offset + T::SIZE], rec)?;
        self.blk_dev.write_block(blockno, &buf)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        Ok(self.blk_dev.flush()?)
    }
}
