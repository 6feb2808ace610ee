pub mod bitmap;
pub mod block_device; // backing storage for images
pub mod common;
pub mod config;
pub mod dirent;
pub mod disk;
pub mod error;
pub mod fs; // file system context
pub mod fsck;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod inode;
mod namespace;
pub mod path;
pub mod perm;
pub mod superblock;
pub mod tree;

pub use block_device::{BlockDevice, FileDisk, RamDisk};
pub use config::{Credentials, Options};
pub use dirent::{DirEntry, EntryType};
pub use error::{FsError, Result};
pub use fs::{FileSystem, FsStats};
pub use inode::{FileKind, Stat};
