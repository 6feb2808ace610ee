use crate::common::*;
use crate::dirent::EntryType;
use crate::disk::{Record, Region};
use crate::error::{FsError, Result};
use crate::fs::FileSystem;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

impl FileKind {
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(FileKind::File),
            S_IFDIR => Some(FileKind::Directory),
            S_IFLNK => Some(FileKind::Symlink),
            _ => None,
        }
    }

    pub fn type_bits(self) -> u16 {
        match self {
            FileKind::File => S_IFREG,
            FileKind::Directory => S_IFDIR,
            FileKind::Symlink => S_IFLNK,
        }
    }

    /// Tag used in directory entries; symlinks are stored as files.
    pub fn entry_type(self) -> EntryType {
        match self {
            FileKind::Directory => EntryType::Directory,
            FileKind::File | FileKind::Symlink => EntryType::File,
        }
    }
}

/// inode on disk
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DInode {
    /// File type and permission bits
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    /// Number of directory entries referring to this inode
    pub nlink: u16,
    /// Size of file (bytes)
    pub size: u32,
    /// Last access time
    pub atime: u32,
    /// Creation time
    pub ctime: u32,
    /// Last modification time
    pub mtime: u32,
    /// Deletion time, 0 while live
    pub dtime: u32,
    /// # of data blocks owned
    pub nblocks: u32,
    /// Data block indices, relative to the first data block
    pub addrs: [u32; NDIRECT],
}

impl Record for DInode {
    const REGION: Region = Region::InodeTable;
    const SIZE: usize = INODE_SIZE;
    const CAPACITY: usize = NINODES;
}

/// Seconds since the epoch, as stored on disk.
pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Blocks needed for `size` bytes. Even an empty file owns one block.
pub fn blocks_for(size: usize) -> usize {
    size.div_ceil(BSIZE).max(1)
}

impl DInode {
    pub fn kind(&self) -> Result<FileKind> {
        FileKind::from_mode(self.mode)
            .ok_or_else(|| FsError::corrupt(format!("unknown file type in mode {:o}", self.mode)))
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn perm(&self) -> u16 {
        self.mode & S_IRWXUGO
    }

    /// The allocated data blocks, in file order.
    pub fn block_list(&self) -> Result<&[u32]> {
        let n = self.nblocks as usize;
        if n > NDIRECT {
            return Err(FsError::corrupt(format!("inode claims {n} direct blocks")));
        }
        Ok(&self.addrs[..n])
    }

    pub fn touch_access(&mut self) {
        self.atime = now();
    }

    pub fn touch_modify(&mut self) {
        let t = now();
        self.atime = t;
        self.mtime = t;
    }
}

/// Attributes of one inode, for adapters that report them to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub ino: u32,
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u16,
    pub uid: u16,
    pub gid: u16,
    pub size: u32,
    pub blocks: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl Stat {
    pub fn new(ino: u32, inode: &DInode) -> Result<Self> {
        Ok(Self {
            ino,
            kind: inode.kind()?,
            perm: inode.perm(),
            nlink: inode.nlink,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size,
            blocks: inode.nblocks,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        })
    }
}

impl FileSystem {
    pub(crate) fn iread(&self, ino: u32) -> Result<DInode> {
        trace!("inode: read {}", ino);
        self.disk.read_record(ino as usize)
    }

    pub(crate) fn iupdate(&self, ino: u32, inode: &DInode) -> Result<()> {
        trace!("inode: write {} (size {}, nlink {})", ino, inode.size, inode.nlink);
        self.disk.write_record(ino as usize, inode)
    }

    /// Allocate and populate a fresh inode with enough blocks for `size` bytes.
    /// Nothing is written; on error every bit taken here has been given back.
    pub(crate) fn ialloc(&mut self, kind: FileKind, size: u32) -> Result<(u32, DInode)> {
        let ino = self.bitmaps.allocate_inode()?;
        let nblocks = blocks_for(size as usize);
        if nblocks > NDIRECT {
            self.bitmaps.free_inode(ino)?;
            return Err(FsError::FileTooLarge);
        }
        if (self.sb.free_blocks_count as usize) < nblocks {
            debug!(
                "inode: {} blocks wanted, {} free",
                nblocks, self.sb.free_blocks_count
            );
            self.bitmaps.free_inode(ino)?;
            return Err(FsError::Exhausted);
        }

        let mut addrs = [0u32; NDIRECT];
        for i in 0..nblocks {
            match self.bitmaps.allocate_block(Some(ino)) {
                Ok(bno) => addrs[i] = bno,
                Err(e) => {
                    for &bno in &addrs[..i] {
                        self.bitmaps.free_block(bno)?;
                    }
                    return Err(e);
                }
            }
        }

        let t = now();
        let inode = DInode {
            mode: kind.type_bits() | self.opts.new_perm(),
            uid: self.opts.cred.uid,
            gid: self.opts.cred.gid,
            nlink: 1,
            size,
            atime: t,
            ctime: t,
            mtime: t,
            dtime: 0,
            nblocks: nblocks as u32,
            addrs,
        };
        debug!("inode: allocated {} ({:?}, {} blocks)", ino, kind, nblocks);
        Ok((ino, inode))
    }
}
