use crate::common::*;
use crate::disk::{Disk, Record, Region};
use crate::error::{FsError, Result};

use log::debug;
use serde::{Deserialize, Serialize};

#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SuperBlock {
    /// Number of inodes, used and free
    pub inodes_count: u32,
    /// Number of data blocks, used and free
    pub blocks_count: u32,
    pub free_inodes_count: u32,
    pub free_blocks_count: u32,
    /// Block number of the first data block
    pub first_data_block: u32,
    /// First non-reserved inode
    pub first_ino: u32,
    /// Must be FSMAGIC
    pub magic: u32,
}

impl Record for SuperBlock {
    const REGION: Region = Region::SuperBlock;
    const SIZE: usize = 28;
    const CAPACITY: usize = 1;
}

impl SuperBlock {
    /// Geometry of a fresh image with nothing allocated yet.
    pub fn new(blocks_count: u32) -> Self {
        Self {
            inodes_count: NINODES as u32,
            blocks_count,
            free_inodes_count: (NINODES as u32) - FIRST_INO,
            free_blocks_count: blocks_count,
            first_data_block: DATA_START as u32,
            first_ino: FIRST_INO,
            magic: FSMAGIC,
        }
    }

    pub fn load(disk: &Disk) -> Result<Self> {
        disk.read_record(0)
    }

    pub fn store(&self, disk: &Disk) -> Result<()> {
        disk.write_record(0, self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != FSMAGIC {
            return Err(FsError::corrupt(format!(
                "bad magic {:#x}, expected {:#x}",
                self.magic, FSMAGIC
            )));
        }
        if self.inodes_count != NINODES as u32
            || self.first_data_block != DATA_START as u32
            || self.first_ino != FIRST_INO
        {
            return Err(FsError::corrupt("unsupported geometry"));
        }
        if self.blocks_count == 0 || self.blocks_count as usize > BPB {
            return Err(FsError::corrupt(format!(
                "block count {} out of range",
                self.blocks_count
            )));
        }
        if self.free_inodes_count > self.inodes_count || self.free_blocks_count > self.blocks_count
        {
            return Err(FsError::corrupt("free counts exceed totals"));
        }
        Ok(())
    }

    /// Apply signed deltas to the free counters and persist the record.
    pub fn adjust(&mut self, disk: &Disk, delta_inodes: i32, delta_blocks: i32) -> Result<()> {
        let free_inodes = self
            .free_inodes_count
            .checked_add_signed(delta_inodes)
            .filter(|&n| n <= self.inodes_count)
            .ok_or_else(|| FsError::corrupt("free inode count out of range"))?;
        let free_blocks = self
            .free_blocks_count
            .checked_add_signed(delta_blocks)
            .filter(|&n| n <= self.blocks_count)
            .ok_or_else(|| FsError::corrupt("free block count out of range"))?;
        self.free_inodes_count = free_inodes;
        self.free_blocks_count = free_blocks;
        debug!(
            "superblock: free inodes {} ({:+}), free blocks {} ({:+})",
            free_inodes, delta_inodes, free_blocks, delta_blocks
        );
        self.store(disk)
    }
}
