use crate::bitmap::Bitmaps;
use crate::block_device::{BlockDevice, FileDisk};
use crate::common::*;
use crate::config::{Credentials, Options};
use crate::dirent::DirBlock;
use crate::disk::{Disk, Region};
use crate::error::{FsError, Result};
use crate::inode::{FileKind, Stat};
use crate::path;
use crate::superblock::SuperBlock;

use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

/// Free-space summary of an open image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u32,
    pub blocks: u32,
    pub free_blocks: u32,
    pub inodes: u32,
    pub free_inodes: u32,
    pub name_max: u32,
}

/// An open image. Holds everything that must stay consistent across calls: the device,
/// the superblock snapshot, both bitmaps and the acting credentials.
pub struct FileSystem {
    pub(crate) disk: Disk,
    pub(crate) sb: SuperBlock,
    pub(crate) bitmaps: Bitmaps,
    pub(crate) opts: Options,
}

impl FileSystem {
    /// Lay out an empty filesystem with `blocks_count` data blocks on `blk_dev`.
    /// The root directory takes the first data block.
    pub fn format(blk_dev: Arc<dyn BlockDevice>, blocks_count: u32, opts: Options) -> Result<Self> {
        if blocks_count == 0 || blocks_count as usize > BPB {
            return Err(FsError::InvalidArgument);
        }
        let disk = Disk::new(blk_dev, blocks_count as usize)?;
        for i in 0..INODE_BLOCKS {
            disk.zero_block(Region::InodeTable, i)?;
        }

        let mut fs = Self {
            disk,
            sb: SuperBlock::new(blocks_count),
            bitmaps: Bitmaps::new(blocks_count as usize)?,
            opts,
        };
        fs.sb.store(&fs.disk)?;

        let (ino, root) = fs.ialloc(FileKind::Directory, (2 * DIRENT_SIZE) as u32)?;
        if ino != ROOTINO {
            return Err(FsError::corrupt(format!("root landed on inode {ino}")));
        }
        fs.write_dir_block(&root, &DirBlock::init_root_pair(ino, ino))?;
        fs.iupdate(ino, &root)?;
        fs.commit(-1, -(root.nblocks as i32))?;
        fs.disk.flush()?;
        info!(
            "format: {} data blocks, {} inodes, {} blocks free",
            blocks_count, NINODES, fs.sb.free_blocks_count
        );
        Ok(fs)
    }

    /// Create the image file at `image` and format it.
    pub fn init_filesystem<P: AsRef<Path>>(
        blocks_count: u32,
        image: P,
        opts: Options,
    ) -> Result<Self> {
        if blocks_count == 0 || blocks_count as usize > BPB {
            return Err(FsError::InvalidArgument);
        }
        let dev = FileDisk::create(image, DATA_START + blocks_count as usize)?;
        Self::format(Arc::new(dev), blocks_count, opts)
    }

    /// Attach to an already formatted device. Fails without side effects if the
    /// superblock does not check out.
    pub fn mount(blk_dev: Arc<dyn BlockDevice>, opts: Options) -> Result<Self> {
        let probe = Disk::new(blk_dev.clone(), 0)?;
        let sb = SuperBlock::load(&probe)?;
        sb.validate()?;
        let disk = Disk::new(blk_dev, sb.blocks_count as usize)?;
        let bitmaps = Bitmaps::load(&disk, sb.blocks_count as usize)?;
        let fs = Self {
            disk,
            sb,
            bitmaps,
            opts,
        };
        if !fs.iread(ROOTINO)?.is_dir() {
            return Err(FsError::corrupt("root inode is not a directory"));
        }
        info!(
            "mount: {} data blocks ({} free), {} inodes ({} free)",
            fs.sb.blocks_count,
            fs.sb.free_blocks_count,
            fs.sb.inodes_count,
            fs.sb.free_inodes_count
        );
        Ok(fs)
    }

    pub fn open_filesystem<P: AsRef<Path>>(image: P, opts: Options) -> Result<Self> {
        let dev = FileDisk::open(image)?;
        Self::mount(Arc::new(dev), opts)
    }

    /// Persist the counters, then both bitmaps. Always the last step of a mutation.
    pub(crate) fn commit(&mut self, delta_inodes: i32, delta_blocks: i32) -> Result<()> {
        self.sb.adjust(&self.disk, delta_inodes, delta_blocks)?;
        self.bitmaps.store(&self.disk)
    }

    /// Run a mutation. If it fails, the in-memory superblock and bitmaps are put back so
    /// a later commit cannot persist bits taken or released by the failed call.
    pub(crate) fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let sb = self.sb.clone();
        let bitmaps = self.bitmaps.clone();
        let result = op(self);
        if let Err(e) = &result {
            debug!("fs: rolling back allocation state after {}", e);
            self.sb = sb;
            self.bitmaps = bitmaps;
        }
        result
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    pub fn bitmaps(&self) -> &Bitmaps {
        &self.bitmaps
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn credentials(&self) -> Credentials {
        self.opts.cred
    }

    /// Act as `cred` from now on.
    pub fn set_credentials(&mut self, cred: Credentials) {
        debug!("fs: acting as {}:{}", cred.uid, cred.gid);
        self.opts.cred = cred;
    }

    pub fn blk_dev(&self) -> Arc<dyn BlockDevice> {
        self.disk.blk_dev()
    }

    pub fn statfs(&self) -> FsStats {
        FsStats {
            block_size: BSIZE as u32,
            blocks: self.sb.blocks_count,
            free_blocks: self.sb.free_blocks_count,
            inodes: self.sb.inodes_count,
            free_inodes: self.sb.free_inodes_count,
            name_max: MAX_NAME_LEN as u32,
        }
    }

    /// Attributes of a live inode.
    pub fn stat_inode(&self, ino: u32) -> Result<Stat> {
        if ino < FIRST_INO || !self.bitmaps.inodes.is_set(ino as usize) {
            return Err(FsError::NotFound);
        }
        Stat::new(ino, &self.iread(ino)?)
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let path = path::normalize(path, false)?;
        self.stat_inode(self.resolve(path, None)?)
    }

    pub fn sync(&self) -> Result<()> {
        self.disk.flush()
    }
}
