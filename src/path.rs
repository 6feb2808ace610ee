//! Path handling and resolution.

use crate::common::*;
use crate::dirent::{DirBlock, EntryType};
use crate::disk::Region;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::inode::DInode;

use log::trace;

/// Strip one trailing `/`. File operations refuse such paths outright.
pub fn normalize(path: &str, file_op: bool) -> Result<&str> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath);
    }
    match path.strip_suffix('/') {
        Some(_) if file_op => Err(FsError::InvalidPath),
        Some(stripped) => Ok(stripped),
        None => Ok(path),
    }
}

/// Split a normalized path at its last `/` into (parent, leaf).
/// The parent of a top-level name is the empty string, i.e. the root.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(at) => (&path[..at], &path[at + 1..]),
        None => ("", path),
    }
}

pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl FileSystem {
    /// Load the entry list of a directory inode.
    pub(crate) fn read_dir_block(&self, inode: &DInode) -> Result<DirBlock> {
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let count = DirBlock::count_for_size(inode.size)?;
        let bno = *inode
            .block_list()?
            .first()
            .ok_or_else(|| FsError::corrupt("directory without a block"))?;
        DirBlock::decode(&self.disk.read_block(Region::Data, bno as usize)?, count)
    }

    /// Store `dir` into the directory's block. The caller keeps `inode.size` in step.
    pub(crate) fn write_dir_block(&self, inode: &DInode, dir: &DirBlock) -> Result<()> {
        let bno = *inode
            .block_list()?
            .first()
            .ok_or_else(|| FsError::corrupt("directory without a block"))?;
        self.disk
            .write_block(Region::Data, bno as usize, &dir.encode()?)
    }

    /// Walk `path` from the root. `expect` constrains the type of the final entry;
    /// `None` accepts anything. The bare root resolves without touching the disk.
    pub fn resolve(&self, path: &str, expect: Option<EntryType>) -> Result<u32> {
        let mut ino = ROOTINO;
        let mut parts = components(path).peekable();
        while let Some(name) = parts.next() {
            let inode = self.iread(ino)?;
            let dir = self.read_dir_block(&inode)?;
            let at = dir.find(name).ok_or(FsError::NotFound)?;
            let ent = dir.entries()[at];
            let ty = ent.entry_type()?;
            let last = parts.peek().is_none();
            if !last && ty == EntryType::File {
                return Err(FsError::NotADirectory);
            }
            if last && expect.is_some_and(|want| want != ty) {
                return Err(FsError::NotFound);
            }
            trace!("path: {:?} -> inode {}", name, ent.inum);
            ino = ent.inum;
        }
        Ok(ino)
    }
}
