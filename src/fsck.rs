//! Read-only consistency check of an open image.

use crate::common::*;
use crate::dirent::EntryType;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::inode::{blocks_for, DInode, FileKind};

use log::{info, warn};
use std::collections::HashMap;

/// What `check` found. An empty `problems` list means the image is consistent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub directories: usize,
    pub files: usize,
    pub blocks_in_use: usize,
    pub problems: Vec<String>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(&mut self, msg: String) {
        warn!("fsck: {}", msg);
        self.problems.push(msg);
    }
}

struct Walk<'a> {
    fs: &'a FileSystem,
    report: Report,
    /// entries naming each non-directory inode
    refs: HashMap<u32, u16>,
    nlink: HashMap<u32, u16>,
    dirs_seen: HashMap<u32, u32>,
    block_owner: HashMap<u32, u32>,
}

/// Walk the tree from the root and verify counters, bitmaps, dot entries, block
/// ownership and link counts. Only I/O failures abort the walk.
pub fn check(fs: &FileSystem) -> Result<Report> {
    let mut walk = Walk {
        fs,
        report: Report::default(),
        refs: HashMap::new(),
        nlink: HashMap::new(),
        dirs_seen: HashMap::new(),
        block_owner: HashMap::new(),
    };
    walk.directory(ROOTINO, ROOTINO, "/".to_string())?;
    walk.finish();
    info!(
        "fsck: {} directories, {} files, {} blocks in use, {} problems",
        walk.report.directories,
        walk.report.files,
        walk.report.blocks_in_use,
        walk.report.problems.len()
    );
    Ok(walk.report)
}

impl Walk<'_> {
    fn directory(&mut self, ino: u32, parent: u32, path: String) -> Result<()> {
        if let Some(prev) = self.dirs_seen.insert(ino, parent) {
            self.report.problem(format!(
                "{path}: directory inode {ino} reached again (first under {prev})"
            ));
            return Ok(());
        }
        let inode = self.fs.iread(ino)?;
        self.inode(ino, &inode, &path);
        self.report.directories += 1;

        let dir = match self.fs.read_dir_block(&inode) {
            Ok(dir) => dir,
            Err(e) => {
                self.report.problem(format!("{path}: unreadable directory: {e}"));
                return Ok(());
            }
        };
        for (at, name, want) in [(0, ".", ino), (1, "..", parent)] {
            match dir.get(at) {
                Some(ent) if ent.is_named(name) && ent.inum == want => {}
                Some(ent) => self.report.problem(format!(
                    "{path}: entry {at} is {:?} -> {}, expected {name:?} -> {want}",
                    ent.name(),
                    ent.inum
                )),
                None => self.report.problem(format!("{path}: missing {name:?}")),
            }
        }

        for ent in dir.entries().iter().skip(2) {
            let child = if path == "/" {
                format!("/{}", ent.name())
            } else {
                format!("{}/{}", path, ent.name())
            };
            if ent.inum < FIRST_INO || ent.inum as usize >= NINODES {
                self.report
                    .problem(format!("{child}: entry names inode {}", ent.inum));
                continue;
            }
            match ent.entry_type() {
                Ok(EntryType::Directory) => self.directory(ent.inum, ino, child)?,
                Ok(EntryType::File) => self.file(ent.inum, &child)?,
                Err(e) => self.report.problem(format!("{child}: {e}")),
            }
        }
        Ok(())
    }

    fn file(&mut self, ino: u32, path: &str) -> Result<()> {
        let refs = self.refs.entry(ino).or_insert(0);
        *refs += 1;
        if *refs > 1 {
            return Ok(());
        }
        let inode = self.fs.iread(ino)?;
        match inode.kind() {
            Ok(FileKind::Directory) => {
                self.report
                    .problem(format!("{path}: file entry points at a directory"));
            }
            Ok(_) => {}
            Err(e) => self.report.problem(format!("{path}: {e}")),
        }
        self.nlink.insert(ino, inode.nlink);
        self.inode(ino, &inode, path);
        self.report.files += 1;
        Ok(())
    }

    /// Checks shared by every reachable inode.
    fn inode(&mut self, ino: u32, inode: &DInode, path: &str) {
        if !self.fs.bitmaps.inodes.is_set(ino as usize) {
            self.report
                .problem(format!("{path}: inode {ino} is reachable but marked free"));
        }
        if inode.nblocks as usize != blocks_for(inode.size as usize) {
            self.report.problem(format!(
                "{path}: {} bytes in {} blocks",
                inode.size, inode.nblocks
            ));
        }
        let blocks = match inode.block_list() {
            Ok(blocks) => blocks,
            Err(e) => {
                self.report.problem(format!("{path}: {e}"));
                return;
            }
        };
        for &bno in blocks {
            self.report.blocks_in_use += 1;
            if !self.fs.bitmaps.blocks.is_set(bno as usize) {
                self.report
                    .problem(format!("{path}: block {bno} is in use but marked free"));
            }
            if let Some(owner) = self.block_owner.insert(bno, ino) {
                self.report
                    .problem(format!("{path}: block {bno} also owned by inode {owner}"));
            }
        }
    }

    fn finish(&mut self) {
        for (&ino, &refs) in &self.refs {
            let nlink = self.nlink.get(&ino).copied().unwrap_or(0);
            if nlink != refs {
                self.report.problem(format!(
                    "inode {ino}: link count {nlink}, {refs} entries"
                ));
            }
        }

        let sb = &self.fs.sb;
        let live_inodes = self.dirs_seen.len() + self.refs.len();
        if live_inodes + FIRST_INO as usize + sb.free_inodes_count as usize
            != sb.inodes_count as usize
        {
            self.report.problem(format!(
                "{} live inodes and {} free do not add up to {}",
                live_inodes, sb.free_inodes_count, sb.inodes_count
            ));
        }
        if self.fs.bitmaps.inodes.count_set() != live_inodes + FIRST_INO as usize {
            self.report.problem(format!(
                "inode bitmap has {} bits set for {} live inodes",
                self.fs.bitmaps.inodes.count_set(),
                live_inodes
            ));
        }
        let used = self.report.blocks_in_use;
        if used + sb.free_blocks_count as usize != sb.blocks_count as usize {
            self.report.problem(format!(
                "{} blocks in use and {} free do not add up to {}",
                used, sb.free_blocks_count, sb.blocks_count
            ));
        }
        if self.fs.bitmaps.blocks.count_set() != used {
            self.report.problem(format!(
                "block bitmap has {} bits set for {} blocks in use",
                self.fs.bitmaps.blocks.count_set(),
                used
            ));
        }
    }
}
