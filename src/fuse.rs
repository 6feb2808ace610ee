//! FUSE front end. Translates kernel requests into path-based engine calls.
//!
//! FUSE reserves inode 1 for the root while the engine keeps inodes 0 and 1 reserved and
//! puts the root at 2, so the two numbering schemes differ by one.

use crate::common::*;
use crate::config::Credentials;
use crate::dirent::EntryType;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::inode::{FileKind, Stat};
use crate::tree;

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, error, info};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TTL: Duration = Duration::from_secs(1);
const FUSE_ROOT: u64 = 1;

fn to_fuse(ino: u32) -> u64 {
    ino as u64 - 1
}

fn to_engine(ino: u64) -> Result<u32> {
    ino.checked_add(1)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or(FsError::NotFound)
}

fn timestamp(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}

impl From<FileKind> for FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::File => FileType::RegularFile,
            FileKind::Directory => FileType::Directory,
            FileKind::Symlink => FileType::Symlink,
        }
    }
}

impl From<&Stat> for FileAttr {
    fn from(st: &Stat) -> Self {
        FileAttr {
            ino: to_fuse(st.ino),
            size: st.size as u64,
            blocks: st.blocks as u64,
            atime: timestamp(st.atime),
            mtime: timestamp(st.mtime),
            ctime: timestamp(st.ctime),
            crtime: timestamp(st.ctime),
            kind: st.kind.into(),
            perm: st.perm,
            nlink: st.nlink as u32,
            uid: st.uid as u32,
            gid: st.gid as u32,
            rdev: 0,
            blksize: BSIZE as u32,
            flags: 0,
        }
    }
}

/// Every name the kernel has seen for each FUSE inode. A hard-linked file has several.
#[derive(Debug, Default)]
struct PathMap {
    names: HashMap<u64, Vec<String>>,
}

impl PathMap {
    fn insert(&mut self, ino: u64, path: String) {
        let known = self.names.entry(ino).or_default();
        if !known.contains(&path) {
            known.push(path);
        }
    }

    fn first(&self, ino: u64) -> Option<&str> {
        self.names.get(&ino)?.first().map(String::as_str)
    }

    /// Drop `path` and everything below it. Other names of the same inodes stay.
    fn forget(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.names.retain(|_, known| {
            known.retain(|p| p.as_str() != path && !p.starts_with(&prefix));
            !known.is_empty()
        });
    }
}

/// Adapter state: the engine plus the known paths of each FUSE inode.
pub struct SimpleFuse {
    fs: FileSystem,
    paths: PathMap,
}

impl SimpleFuse {
    pub fn new(fs: FileSystem) -> Self {
        let mut paths = PathMap::default();
        paths.insert(FUSE_ROOT, "/".to_string());
        Self { fs, paths }
    }

    fn act_as(&mut self, req: &Request<'_>) {
        let cred = Credentials::new(req.uid(), req.gid());
        if cred != self.fs.credentials() {
            self.fs.set_credentials(cred);
        }
    }

    fn path_of(&self, ino: u64) -> Result<String> {
        self.paths
            .first(ino)
            .map(str::to_string)
            .ok_or(FsError::NotFound)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String> {
        let name = name.to_str().ok_or(FsError::InvalidPath)?;
        let parent = self.path_of(parent)?;
        Ok(if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        })
    }

    /// Stat `path` and remember it under its FUSE inode.
    fn remember(&mut self, path: String) -> Result<FileAttr> {
        let st = self.fs.stat(&path)?;
        let attr = FileAttr::from(&st);
        self.paths.insert(attr.ino, path);
        Ok(attr)
    }

    fn forget(&mut self, path: &str) {
        self.paths.forget(path);
    }

    fn getattr_inner(&self, ino: u64) -> Result<FileAttr> {
        Ok(FileAttr::from(&self.fs.stat_inode(to_engine(ino)?)?))
    }

    fn setattr_inner(
        &mut self,
        ino: u64,
        mode: Option<u32>,
        size: Option<u64>,
    ) -> Result<FileAttr> {
        let path = self.path_of(ino)?;
        if let Some(mode) = mode {
            self.fs.set_mode(&path, (mode & S_IRWXUGO as u32) as u16)?;
        }
        if let Some(size) = size {
            let size = u32::try_from(size).map_err(|_| FsError::FileTooLarge)?;
            self.fs.truncate(&path, size)?;
        }
        self.getattr_inner(ino)
    }

    fn create_inner(
        &mut self,
        parent: u64,
        name: &OsStr,
        kind: FileKind,
        mode: u32,
        umask: u32,
    ) -> Result<FileAttr> {
        let path = self.child_path(parent, name)?;
        match kind {
            FileKind::Directory => self.fs.make_directory(&path)?,
            _ => self.fs.create_file(&path, 0, None)?,
        };
        self.fs
            .set_mode(&path, (mode & !umask & S_IRWXUGO as u32) as u16)?;
        self.remember(path)
    }

    fn readdir_inner(
        &mut self,
        ino: u64,
        offset: i64,
        reply: &mut ReplyDirectory,
    ) -> Result<()> {
        let path = self.path_of(ino)?;
        let entries = self.fs.read_directory(&path)?;
        let skip = usize::try_from(offset).map_err(|_| FsError::InvalidArgument)?;
        for (i, ent) in entries.iter().enumerate().skip(skip) {
            let kind = match ent.entry_type {
                EntryType::Directory => FileType::Directory,
                EntryType::File => self.fs.stat_inode(ent.ino)?.kind.into(),
            };
            if ent.name != "." && ent.name != ".." {
                let child = if path == "/" {
                    format!("/{}", ent.name)
                } else {
                    format!("{}/{}", path, ent.name)
                };
                self.paths.insert(to_fuse(ent.ino), child);
            }
            if reply.add(to_fuse(ent.ino), (i + 1) as i64, kind, &ent.name) {
                break;
            }
        }
        Ok(())
    }

    fn read_inner(&mut self, ino: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        let path = self.path_of(ino)?;
        let data = self.fs.read_file(&path)?;
        let start = usize::try_from(offset)
            .map_err(|_| FsError::InvalidArgument)?
            .min(data.len());
        let end = start.saturating_add(size as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn write_inner(&mut self, ino: u64, offset: i64, data: &[u8]) -> Result<u32> {
        let path = self.path_of(ino)?;
        let offset = u32::try_from(offset).map_err(|_| FsError::FileTooLarge)?;
        Ok(self.fs.write_file(&path, offset, data)? as u32)
    }

    fn link_inner(&mut self, ino: u64, newparent: u64, newname: &OsStr) -> Result<FileAttr> {
        let target = self.path_of(ino)?;
        let path = self.child_path(newparent, newname)?;
        self.fs.make_link(&path, &target)?;
        self.getattr_inner(ino)
    }
}

impl Filesystem for SimpleFuse {
    fn destroy(&mut self) {
        if let Err(e) = self.fs.sync() {
            error!("fuse: sync on unmount failed: {}", e);
        }
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.act_as(req);
        match self.child_path(parent, name).and_then(|p| self.remember(p)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        self.act_as(req);
        match self.getattr_inner(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        self.act_as(req);
        match self.setattr_inner(ino, mode, size) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        self.act_as(req);
        match self.path_of(ino).and_then(|p| self.fs.read_link(&p)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        self.act_as(req);
        if mode & S_IFMT as u32 != S_IFREG as u32 {
            reply.error(libc::ENOSYS);
            return;
        }
        match self.create_inner(parent, name, FileKind::File, mode, umask) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        self.act_as(req);
        match self.create_inner(parent, name, FileKind::Directory, mode, umask) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.act_as(req);
        let removed = self.child_path(parent, name).and_then(|p| {
            self.fs.rm_file(&p)?;
            Ok(p)
        });
        match removed {
            Ok(p) => {
                self.forget(&p);
                reply.ok()
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    /// Removes the whole subtree, not just an empty directory.
    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.act_as(req);
        let removed = self.child_path(parent, name).and_then(|p| {
            tree::remove_all(&mut self.fs, &p)?;
            Ok(p)
        });
        match removed {
            Ok(p) => {
                self.forget(&p);
                reply.ok()
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        self.act_as(req);
        let made = self.child_path(parent, link_name).and_then(|p| {
            let target = target.to_str().ok_or(FsError::InvalidPath)?;
            self.fs.make_symlink(&p, target)?;
            self.remember(p)
        });
        match made {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        self.act_as(req);
        match self.link_inner(ino, newparent, newname) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.act_as(req);
        match self.read_inner(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        self.act_as(req);
        match self.write_inner(ino, offset, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        self.act_as(req);
        match self.readdir_inner(ino, offset, &mut reply) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let st = self.fs.statfs();
        reply.statfs(
            st.blocks as u64,
            st.free_blocks as u64,
            st.free_blocks as u64,
            st.inodes as u64,
            st.free_inodes as u64,
            st.block_size,
            st.name_max,
            st.block_size,
        );
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        self.act_as(req);
        match self.create_inner(parent, name, FileKind::File, mode, umask) {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }
}

/// Serve `fs` at `mountpoint` until it is unmounted.
pub fn mount<P: AsRef<Path>>(fs: FileSystem, mountpoint: P) -> Result<()> {
    let mountpoint = mountpoint.as_ref();
    let options = [
        MountOption::FSName("simplefs".to_string()),
        MountOption::RW,
    ];
    info!("fuse: mounting at {}", mountpoint.display());
    fuser::mount2(SimpleFuse::new(fs), mountpoint, &options)?;
    debug!("fuse: unmounted {}", mountpoint.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_maps_to_fuse_root() {
        assert_eq!(to_fuse(ROOTINO), FUSE_ROOT);
        assert_eq!(to_engine(FUSE_ROOT).unwrap(), ROOTINO);
    }

    #[test]
    fn out_of_range_inodes_are_not_found() {
        assert!(matches!(to_engine(u64::MAX), Err(FsError::NotFound)));
        assert!(matches!(to_engine(u32::MAX as u64), Err(FsError::NotFound)));
        assert_eq!(to_engine(u32::MAX as u64 - 1).unwrap(), u32::MAX);
    }

    #[test]
    fn unlinking_one_name_keeps_the_others() {
        let mut paths = PathMap::default();
        paths.insert(7, "/a".to_string());
        paths.insert(7, "/b".to_string());
        paths.insert(7, "/a".to_string());
        assert_eq!(paths.names[&7].len(), 2);

        paths.forget("/a");
        assert_eq!(paths.first(7), Some("/b"));
        paths.forget("/b");
        assert_eq!(paths.first(7), None);
        assert!(paths.names.is_empty());
    }

    #[test]
    fn forgetting_a_directory_drops_what_is_below_it() {
        let mut paths = PathMap::default();
        paths.insert(3, "/d".to_string());
        paths.insert(4, "/d/f".to_string());
        paths.insert(4, "/f".to_string());
        paths.insert(5, "/dd".to_string());

        paths.forget("/d");
        assert_eq!(paths.first(3), None);
        assert_eq!(paths.first(4), Some("/f"));
        assert_eq!(paths.first(5), Some("/dd"));
    }

    #[test]
    fn kinds_convert() {
        assert_eq!(FileType::from(FileKind::Symlink), FileType::Symlink);
        assert_eq!(FileType::from(FileKind::Directory), FileType::Directory);
    }
}
