//! On-disk geometry. Every offset in the crate is derived from these.

/// block size
pub const BSIZE: usize = 512;

/// inode slots in the inode table
pub const NINODES: usize = 40;

/// size of an inode record on disk
pub const INODE_SIZE: usize = 64;

/// root i-number, 0 and 1 are reserved
pub const ROOTINO: u32 = 2;

/// first inode handed out by the allocator
pub const FIRST_INO: u32 = ROOTINO;

/// "UNIX"
pub const FSMAGIC: u32 = 0x554e4958;

/// direct blocks in inode
pub const NDIRECT: usize = 8;

/// largest file a single inode can describe
pub const MAXFILE: usize = NDIRECT * BSIZE;

/// size of a directory entry on disk
pub const DIRENT_SIZE: usize = 64;

/// entries in a directory block, `.` and `..` included
pub const MAX_DIRENT: usize = BSIZE / DIRENT_SIZE;

/// capacity of the name field of a directory entry
pub const DIRSIZ: usize = 57;

/// longest name we accept; the last byte of the field stays zero
pub const MAX_NAME_LEN: usize = DIRSIZ - 1;

/// bits per bitmap block
pub const BPB: usize = BSIZE * 8;

/// block numbers of the metadata regions
pub const SB_BLOCK: usize = 0;
pub const BMAP_BLOCK: usize = 1;
pub const IMAP_BLOCK: usize = 2;
pub const INODE_START: usize = 3;
pub const INODE_BLOCKS: usize = NINODES * INODE_SIZE / BSIZE;
pub const DATA_START: usize = INODE_START + INODE_BLOCKS;

/// mode bits, spelled out so the on-disk format does not depend on the host's libc
pub const S_IFMT: u16 = 0o170000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFLNK: u16 = 0o120000;
pub const S_IRWXUGO: u16 = 0o777;

pub const S_IRUSR: u16 = 0o400;
pub const S_IWUSR: u16 = 0o200;
pub const S_IRGRP: u16 = 0o040;
pub const S_IWGRP: u16 = 0o020;
pub const S_IROTH: u16 = 0o004;
pub const S_IWOTH: u16 = 0o002;

/// one data block
pub type Block = [u8; BSIZE];
