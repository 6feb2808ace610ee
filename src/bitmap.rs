use crate::common::*;
use crate::disk::{Disk, Region};
use crate::error::{FsError, Result};

use log::{debug, trace};

/// One block of allocation bits. Only the first `capacity` bits are ever handed out.
#[derive(Clone, PartialEq, Eq)]
pub struct BitMap {
    bits: Block,
    capacity: usize,
}

impl BitMap {
    pub fn new(capacity: usize) -> Self {
        Self::from_block([0u8; BSIZE], capacity)
    }

    pub fn from_block(bits: Block, capacity: usize) -> Self {
        debug_assert!(capacity <= BPB);
        Self { bits, capacity }
    }

    pub fn as_block(&self) -> &Block {
        &self.bits
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_set(&self, no: usize) -> bool {
        no < self.capacity && self.bits[no / 8] & (1 << (no % 8)) != 0
    }

    pub fn set(&mut self, no: usize) -> Result<()> {
        if no >= self.capacity {
            return Err(FsError::corrupt(format!(
                "bit {no} past capacity {}",
                self.capacity
            )));
        }
        self.bits[no / 8] |= 1 << (no % 8);
        Ok(())
    }

    /// First-fit: the lowest clear bit below `capacity` is set and returned.
    pub fn alloc(&mut self) -> Option<usize> {
        let full_bytes = self.capacity / 8;
        for byte in 0..full_bytes {
            if self.bits[byte] != 0xff {
                let bit = self.bits[byte].trailing_ones() as usize;
                self.bits[byte] |= 1 << bit;
                return Some(byte * 8 + bit);
            }
        }
        // the last partial byte only owns the bits below the modulus
        let rest = self.capacity % 8;
        if rest != 0 {
            let bit = self.bits[full_bytes].trailing_ones() as usize;
            if bit < rest {
                self.bits[full_bytes] |= 1 << bit;
                return Some(full_bytes * 8 + bit);
            }
        }
        None
    }

    /// Clear a bit that must be set.
    pub fn dealloc(&mut self, no: usize) -> Result<()> {
        if !self.is_set(no) {
            return Err(FsError::corrupt(format!("freeing free bit {no}")));
        }
        self.bits[no / 8] &= !(1 << (no % 8));
        Ok(())
    }

    pub fn count_set(&self) -> usize {
        (0..self.capacity).filter(|&no| self.is_set(no)).count()
    }
}

/// The inode and block bitmaps, always persisted together.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmaps {
    pub inodes: BitMap,
    pub blocks: BitMap,
}

impl Bitmaps {
    /// Fresh bitmaps with the reserved inodes 0 and 1 marked in use.
    pub fn new(blocks_count: usize) -> Result<Self> {
        let mut inodes = BitMap::new(NINODES);
        for ino in 0..FIRST_INO as usize {
            inodes.set(ino)?;
        }
        Ok(Self {
            inodes,
            blocks: BitMap::new(blocks_count),
        })
    }

    pub fn load(disk: &Disk, blocks_count: usize) -> Result<Self> {
        let blocks = BitMap::from_block(disk.read_block(Region::BlockBitmap, 0)?, blocks_count);
        let inodes = BitMap::from_block(disk.read_block(Region::InodeBitmap, 0)?, NINODES);
        for ino in 0..FIRST_INO as usize {
            if !inodes.is_set(ino) {
                return Err(FsError::corrupt(format!("reserved inode {ino} marked free")));
            }
        }
        Ok(Self { inodes, blocks })
    }

    pub fn store(&self, disk: &Disk) -> Result<()> {
        disk.write_block(Region::BlockBitmap, 0, self.blocks.as_block())?;
        disk.write_block(Region::InodeBitmap, 0, self.inodes.as_block())
    }

    pub fn allocate_inode(&mut self) -> Result<u32> {
        let ino = self.inodes.alloc().ok_or(FsError::Exhausted)? as u32;
        trace!("bitmap: took inode {}", ino);
        Ok(ino)
    }

    /// Take a data block. When none is left the inode being built (if any) is given back
    /// before failing.
    pub fn allocate_block(&mut self, rollback_ino: Option<u32>) -> Result<u32> {
        match self.blocks.alloc() {
            Some(bno) => {
                trace!("bitmap: took block {}", bno);
                Ok(bno as u32)
            }
            None => {
                if let Some(ino) = rollback_ino {
                    debug!("bitmap: out of blocks, releasing inode {}", ino);
                    self.free_inode(ino)?;
                }
                Err(FsError::Exhausted)
            }
        }
    }

    pub fn free_inode(&mut self, ino: u32) -> Result<()> {
        if ino < FIRST_INO {
            return Err(FsError::corrupt(format!("freeing reserved inode {ino}")));
        }
        self.inodes.dealloc(ino as usize)
    }

    pub fn free_block(&mut self, bno: u32) -> Result<()> {
        self.blocks.dealloc(bno as usize)
    }
}
