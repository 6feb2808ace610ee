//! Namespace operations. Each call resolves its paths, checks permissions, then writes
//! inodes and directory blocks before committing the counters and bitmaps.

use crate::common::*;
use crate::dirent::{DirBlock, DirEnt, DirEntry, DirName, EntryType};
use crate::disk::Region;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::inode::{blocks_for, now, DInode, FileKind};
use crate::path::{components, normalize, split_parent};
use crate::perm::{self, Access};

use log::debug;

impl FileSystem {
    pub fn make_directory(&mut self, path: &str) -> Result<u32> {
        self.create(path, FileKind::Directory, (2 * DIRENT_SIZE) as u32, None)
    }

    /// Create a regular file of `size` bytes. `data` supplies the leading bytes and may be
    /// shorter than `size`; the rest reads as zeros.
    pub fn create_file(&mut self, path: &str, size: u32, data: Option<&[u8]>) -> Result<u32> {
        if data.is_some_and(|d| d.len() > size as usize) {
            return Err(FsError::InvalidArgument);
        }
        self.create(path, FileKind::File, size, data)
    }

    /// A symbolic link is a file whose content is `target`; the engine never follows it.
    pub fn make_symlink(&mut self, path: &str, target: &str) -> Result<u32> {
        if target.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let data = target.as_bytes();
        self.create(path, FileKind::Symlink, data.len() as u32, Some(data))
    }

    pub fn read_directory(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize(path, false)?;
        let ino = self.resolve(path, Some(EntryType::Directory))?;
        let mut inode = self.iread(ino)?;
        perm::check(&inode, ino, &self.opts.cred, Access::Read)?;
        let dir = self.read_dir_block(&inode)?;
        let entries = dir
            .entries()
            .iter()
            .map(DirEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        inode.touch_access();
        self.iupdate(ino, &inode)?;
        Ok(entries)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path, true)?;
        let ino = self.resolve(path, Some(EntryType::File))?;
        let mut inode = self.iread(ino)?;
        if inode.kind()? == FileKind::Directory {
            return Err(FsError::IsADirectory);
        }
        perm::check(&inode, ino, &self.opts.cred, Access::Read)?;
        let data = self.read_content(&inode)?;
        inode.touch_access();
        self.iupdate(ino, &inode)?;
        debug!("read {:?}: {} bytes", path, data.len());
        Ok(data)
    }

    pub fn read_link(&mut self, path: &str) -> Result<String> {
        let path = normalize(path, true)?;
        let ino = self.resolve(path, Some(EntryType::File))?;
        if self.iread(ino)?.kind()? != FileKind::Symlink {
            return Err(FsError::InvalidArgument);
        }
        String::from_utf8(self.read_file(path)?)
            .map_err(|_| FsError::corrupt("symlink target is not utf-8"))
    }

    pub fn rm_directory(&mut self, path: &str) -> Result<()> {
        self.remove(path, EntryType::Directory)
    }

    pub fn rm_file(&mut self, path: &str) -> Result<()> {
        self.remove(path, EntryType::File)
    }

    /// Add `path` as another name for the file at `target`.
    pub fn make_link(&mut self, path: &str, target: &str) -> Result<()> {
        let path = normalize(path, true)?;
        let target = normalize(target, true)?;
        let (parent, leaf) = split_parent(path);
        DirName::new(leaf)?;

        let pino = self.resolve(parent, Some(EntryType::Directory))?;
        let tino = self.resolve(target, None)?;
        let mut pinode = self.iread(pino)?;
        perm::check(&pinode, pino, &self.opts.cred, Access::ReadWrite)?;
        let mut dir = self.read_dir_block(&pinode)?;
        if dir.find(leaf).is_some() {
            return Err(FsError::AlreadyExists);
        }
        if dir.is_full() {
            return Err(FsError::QuotaExceeded);
        }

        let mut tinode = self.iread(tino)?;
        if tinode.kind()? == FileKind::Directory {
            return Err(FsError::IsADirectory);
        }
        perm::check(&tinode, tino, &self.opts.cred, Access::ReadWrite)?;
        tinode.nlink = tinode
            .nlink
            .checked_add(1)
            .ok_or(FsError::InvalidArgument)?;

        dir.push(DirEnt::new(tino, EntryType::File, leaf)?)?;
        self.write_dir_block(&pinode, &dir)?;
        pinode.size = dir.byte_size();
        pinode.touch_modify();
        self.iupdate(pino, &pinode)?;

        tinode.touch_modify();
        self.iupdate(tino, &tinode)?;
        debug!("link {:?} -> inode {} (nlink {})", path, tino, tinode.nlink);
        Ok(())
    }

    /// Write `data` at `offset` into a regular file, growing it as needed.
    pub fn write_file(&mut self, path: &str, offset: u32, data: &[u8]) -> Result<usize> {
        self.guarded(|fs| fs.write_at(path, offset, data))
    }

    /// Set the size of a regular file, zero-filling growth and freeing trailing blocks.
    pub fn truncate(&mut self, path: &str, size: u32) -> Result<()> {
        self.guarded(|fs| fs.resize(path, size))
    }

    fn write_at(&mut self, path: &str, offset: u32, data: &[u8]) -> Result<usize> {
        let (ino, mut inode) = self.open_regular(path)?;
        let offset = offset as usize;
        let end = offset
            .checked_add(data.len())
            .ok_or(FsError::FileTooLarge)?;
        if end > MAXFILE {
            return Err(FsError::FileTooLarge);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let new_size = end.max(inode.size as usize);
        let grown = self.grow(&mut inode, blocks_for(new_size))?;
        self.splice(&inode, offset, data)?;

        inode.size = new_size as u32;
        inode.touch_modify();
        self.iupdate(ino, &inode)?;
        self.commit(0, -(grown as i32))?;
        debug!("write {:?}: {} bytes at {}", path, data.len(), offset);
        Ok(data.len())
    }

    fn resize(&mut self, path: &str, size: u32) -> Result<()> {
        let (ino, mut inode) = self.open_regular(path)?;
        let size = size as usize;
        if size > MAXFILE {
            return Err(FsError::FileTooLarge);
        }

        let needed = blocks_for(size);
        let grown = self.grow(&mut inode, needed)?;
        let freed = self.shrink(&mut inode, needed)?;
        if size < inode.size as usize && size / BSIZE < needed {
            // bytes past the end must read as zero if the file grows again
            let bno = inode.addrs[size / BSIZE] as usize;
            let mut block = self.disk.read_block(Region::Data, bno)?;
            block[size % BSIZE..].fill(0);
            self.disk.write_block(Region::Data, bno, &block)?;
        }

        inode.size = size as u32;
        inode.touch_modify();
        self.iupdate(ino, &inode)?;
        self.commit(0, freed as i32 - grown as i32)?;
        debug!("truncate {:?} to {} bytes", path, size);
        Ok(())
    }

    /// chmod. Only the owner may change permission bits.
    pub fn set_mode(&mut self, path: &str, perm: u16) -> Result<()> {
        let path = normalize(path, false)?;
        let ino = self.resolve(path, None)?;
        let mut inode = self.iread(ino)?;
        if inode.uid != self.opts.cred.uid {
            return Err(FsError::PermissionDenied);
        }
        inode.mode = (inode.mode & S_IFMT) | (perm & S_IRWXUGO);
        self.iupdate(ino, &inode)
    }

    fn create(
        &mut self,
        path: &str,
        kind: FileKind,
        size: u32,
        data: Option<&[u8]>,
    ) -> Result<u32> {
        self.guarded(|fs| fs.create_entry(path, kind, size, data))
    }

    fn create_entry(
        &mut self,
        path: &str,
        kind: FileKind,
        size: u32,
        data: Option<&[u8]>,
    ) -> Result<u32> {
        let path = normalize(path, kind != FileKind::Directory)?;
        let (parent, leaf) = split_parent(path);
        DirName::new(leaf)?;

        let pino = self.resolve(parent, Some(EntryType::Directory))?;
        let mut pinode = self.iread(pino)?;
        perm::check(&pinode, pino, &self.opts.cred, Access::ReadWrite)?;
        let mut dir = self.read_dir_block(&pinode)?;
        if dir.find(leaf).is_some() {
            return Err(FsError::AlreadyExists);
        }
        if dir.is_full() {
            return Err(FsError::QuotaExceeded);
        }

        let (ino, inode) = self.ialloc(kind, size)?;
        match kind {
            FileKind::Directory => {
                self.write_dir_block(&inode, &DirBlock::init_root_pair(ino, pino))?
            }
            FileKind::File | FileKind::Symlink => {
                self.write_content(&inode, data.unwrap_or(&[]))?
            }
        }
        self.iupdate(ino, &inode)?;

        dir.push(DirEnt::new(ino, kind.entry_type(), leaf)?)?;
        self.write_dir_block(&pinode, &dir)?;
        pinode.size = dir.byte_size();
        pinode.touch_modify();
        self.iupdate(pino, &pinode)?;

        self.commit(-1, -(inode.nblocks as i32))?;
        debug!("create {:?}: inode {} ({:?}, {} bytes)", path, ino, kind, size);
        Ok(ino)
    }

    fn remove(&mut self, path: &str, ty: EntryType) -> Result<()> {
        self.guarded(|fs| fs.remove_entry(path, ty))
    }

    fn remove_entry(&mut self, path: &str, ty: EntryType) -> Result<()> {
        let path = normalize(path, ty == EntryType::File)?;
        if components(path).next().is_none() {
            return Err(FsError::BusyRoot);
        }
        let (parent, leaf) = split_parent(path);
        if leaf.is_empty() {
            return Err(FsError::InvalidPath);
        }
        if leaf == "." || leaf == ".." {
            return Err(FsError::InvalidPath);
        }

        let pino = self.resolve(parent, Some(EntryType::Directory))?;
        let mut pinode = self.iread(pino)?;
        perm::check(&pinode, pino, &self.opts.cred, Access::ReadWrite)?;
        let mut dir = self.read_dir_block(&pinode)?;
        let at = dir.find(leaf).ok_or(FsError::NotFound)?;
        let ent = dir.entries()[at];
        if ent.entry_type()? != ty {
            return Err(match ty {
                EntryType::Directory => FsError::NotADirectory,
                EntryType::File => FsError::IsADirectory,
            });
        }

        let ino = ent.inum;
        let mut child = self.iread(ino)?;
        perm::check(&child, ino, &self.opts.cred, Access::ReadWrite)?;
        if ty == EntryType::Directory && !self.read_dir_block(&child)?.has_no_children() {
            return Err(FsError::NotEmpty);
        }

        // the entry goes first so no live name ever points at a freed inode
        dir.remove(at)?;
        self.write_dir_block(&pinode, &dir)?;
        pinode.size = dir.byte_size();
        pinode.touch_modify();
        self.iupdate(pino, &pinode)?;

        let last_link = child.nlink <= 1;
        let (freed_inodes, freed_blocks) = if last_link {
            child.nlink = 0;
            child.dtime = now();
            (1, child.nblocks as i32)
        } else {
            child.nlink -= 1;
            child.touch_modify();
            (0, 0)
        };
        self.iupdate(ino, &child)?;
        if last_link {
            self.release(ino, &child)?;
        }

        self.commit(freed_inodes, freed_blocks)?;
        debug!(
            "remove {:?}: inode {} (nlink now {}, {} blocks freed)",
            path, ino, child.nlink, freed_blocks
        );
        Ok(())
    }

    /// Resolve a regular file for writing.
    fn open_regular(&self, path: &str) -> Result<(u32, DInode)> {
        let path = normalize(path, true)?;
        let ino = self.resolve(path, Some(EntryType::File))?;
        let inode = self.iread(ino)?;
        match inode.kind()? {
            FileKind::File => {}
            FileKind::Directory => return Err(FsError::IsADirectory),
            FileKind::Symlink => return Err(FsError::InvalidArgument),
        }
        perm::check(&inode, ino, &self.opts.cred, Access::ReadWrite)?;
        Ok((ino, inode))
    }

    /// Give back the inode bit and every block of `inode`.
    fn release(&mut self, ino: u32, inode: &DInode) -> Result<()> {
        for &bno in inode.block_list()? {
            self.bitmaps.free_block(bno)?;
        }
        self.bitmaps.free_inode(ino)
    }

    /// Fill every block of `inode` from `data`, zero-padding past its end.
    fn write_content(&self, inode: &DInode, data: &[u8]) -> Result<()> {
        let mut chunks = data.chunks(BSIZE);
        for &bno in inode.block_list()? {
            self.disk
                .write_block(Region::Data, bno as usize, chunks.next().unwrap_or(&[]))?;
        }
        Ok(())
    }

    fn read_content(&self, inode: &DInode) -> Result<Vec<u8>> {
        let size = inode.size as usize;
        let mut out = Vec::new();
        out.try_reserve_exact(size)
            .map_err(|_| FsError::OutOfMemory)?;
        for &bno in inode.block_list()? {
            let want = (size - out.len()).min(BSIZE);
            if want == 0 {
                break;
            }
            let block = self.disk.read_block(Region::Data, bno as usize)?;
            out.extend_from_slice(&block[..want]);
        }
        if out.len() != size {
            return Err(FsError::corrupt(format!(
                "{} bytes recorded, {} blocks allocated",
                size, inode.nblocks
            )));
        }
        Ok(out)
    }

    /// Copy `data` into the file's blocks starting at byte `offset`.
    fn splice(&self, inode: &DInode, offset: usize, data: &[u8]) -> Result<()> {
        let blocks = inode.block_list()?;
        let mut pos = offset;
        let mut rest = data;
        while !rest.is_empty() {
            let bno = *blocks
                .get(pos / BSIZE)
                .ok_or_else(|| FsError::corrupt("write past the allocated blocks"))?
                as usize;
            let at = pos % BSIZE;
            let n = rest.len().min(BSIZE - at);
            let mut block = self.disk.read_block(Region::Data, bno)?;
            block[at..at + n].copy_from_slice(&rest[..n]);
            self.disk.write_block(Region::Data, bno, &block)?;
            pos += n;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Extend the block list of `inode` to `needed` zeroed blocks. Returns how many were
    /// added; on failure nothing stays allocated.
    fn grow(&mut self, inode: &mut DInode, needed: usize) -> Result<usize> {
        let have = inode.nblocks as usize;
        if needed <= have {
            return Ok(0);
        }
        if needed > NDIRECT {
            return Err(FsError::FileTooLarge);
        }
        if (self.sb.free_blocks_count as usize) < needed - have {
            return Err(FsError::Exhausted);
        }
        for i in have..needed {
            let taken = self
                .bitmaps
                .allocate_block(None)
                .and_then(|bno| self.disk.zero_block(Region::Data, bno as usize).map(|_| bno));
            match taken {
                Ok(bno) => {
                    inode.addrs[i] = bno;
                    inode.nblocks += 1;
                }
                Err(e) => {
                    self.shrink(inode, have)?;
                    return Err(e);
                }
            }
        }
        Ok(needed - have)
    }

    /// Drop blocks past the first `keep`. Returns how many were freed.
    fn shrink(&mut self, inode: &mut DInode, keep: usize) -> Result<usize> {
        let have = inode.block_list()?.len();
        if keep >= have {
            return Ok(0);
        }
        for i in keep..have {
            self.bitmaps.free_block(inode.addrs[i])?;
            inode.addrs[i] = 0;
        }
        inode.nblocks = keep as u32;
        Ok(have - keep)
    }
}
