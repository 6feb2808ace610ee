//! Directory block codec.
//!
//! A directory owns exactly one data block holding up to `MAX_DIRENT` fixed-size entries,
//! `.` and `..` first. The block does not record how many entries are live; that count
//! comes from the owning inode's size.

use crate::common::*;
use crate::error::{FsError, Result};

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File = 1,
    Directory = 2,
}

impl EntryType {
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            1 => Ok(EntryType::File),
            2 => Ok(EntryType::Directory),
            _ => Err(FsError::corrupt(format!("unknown directory entry type {tag}"))),
        }
    }
}

/// Zero-padded name field. serde only derives arrays up to 32 elements, so the tuple
/// encoding is spelled out by hand.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DirName([u8; DIRSIZ]);

impl DirName {
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.contains(&b'/') || bytes.contains(&0) {
            return Err(FsError::InvalidPath);
        }
        if bytes.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let mut buf = [0u8; DIRSIZ];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    fn dot(name: &[u8]) -> Self {
        let mut buf = [0u8; DIRSIZ];
        buf[..name.len()].copy_from_slice(name);
        Self(buf)
    }

    /// Bytes up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        &self.0[..end]
    }
}

impl Default for DirName {
    fn default() -> Self {
        Self([0u8; DIRSIZ])
    }
}

impl fmt::Debug for DirName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl Serialize for DirName {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(DIRSIZ)?;
        for b in &self.0 {
            tup.serialize_element(b)?;
        }
        tup.end()
    }
}

impl<'de> Deserialize<'de> for DirName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        struct NameVisitor;

        impl<'de> Visitor<'de> for NameVisitor {
            type Value = DirName;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{DIRSIZ} name bytes")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> core::result::Result<DirName, A::Error> {
                let mut buf = [0u8; DIRSIZ];
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(DirName(buf))
            }
        }

        deserializer.deserialize_tuple(DIRSIZ, NameVisitor)
    }
}

/// directory entry on disk
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DirEnt {
    pub inum: u32,
    /// 1 for files (and symlinks), 2 for directories
    pub file_type: u16,
    pub name_len: u8,
    pub name: DirName,
}

impl DirEnt {
    pub fn new(inum: u32, ty: EntryType, name: &str) -> Result<Self> {
        let name = DirName::new(name)?;
        Ok(Self {
            inum,
            file_type: ty as u16,
            name_len: name.as_bytes().len() as u8,
            name,
        })
    }

    pub fn entry_type(&self) -> Result<EntryType> {
        EntryType::from_tag(self.file_type)
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.as_bytes() == name.as_bytes()
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name.as_bytes()).into_owned()
    }
}

/// The entries of one directory: a fixed array plus its logical length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    ents: [DirEnt; MAX_DIRENT],
    len: usize,
}

impl DirBlock {
    /// `.` and `..` of a new directory. The root is its own parent.
    pub fn init_root_pair(self_ino: u32, parent_ino: u32) -> Self {
        let mut ents = [DirEnt::default(); MAX_DIRENT];
        ents[0] = DirEnt {
            inum: self_ino,
            file_type: EntryType::Directory as u16,
            name_len: 1,
            name: DirName::dot(b"."),
        };
        ents[1] = DirEnt {
            inum: parent_ino,
            file_type: EntryType::Directory as u16,
            name_len: 2,
            name: DirName::dot(b".."),
        };
        Self { ents, len: 2 }
    }

    /// Number of entries a directory of `size` bytes holds.
    pub fn count_for_size(size: u32) -> Result<usize> {
        let size = size as usize;
        if size % DIRENT_SIZE != 0 || size / DIRENT_SIZE > MAX_DIRENT || size < 2 * DIRENT_SIZE {
            return Err(FsError::corrupt(format!("bad directory size {size}")));
        }
        Ok(size / DIRENT_SIZE)
    }

    pub fn decode(block: &Block, count: usize) -> Result<Self> {
        if count > MAX_DIRENT {
            return Err(FsError::corrupt(format!("{count} directory entries in one block")));
        }
        let mut ents = [DirEnt::default(); MAX_DIRENT];
        for (i, ent) in ents.iter_mut().take(count).enumerate() {
            let off = i * DIRENT_SIZE;
            *ent = bincode::deserialize(&block[off..off + DIRENT_SIZE])?;
        }
        Ok(Self { ents, len: count })
    }

    pub fn encode(&self) -> Result<Block> {
        let mut block = [0u8; BSIZE];
        for (i, ent) in self.entries().iter().enumerate() {
            let off = i * DIRENT_SIZE;
            bincode::serialize_into(&mut block[off..off + DIRENT_SIZE], ent)?;
        }
        Ok(block)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte size of the owning directory inode.
    pub fn byte_size(&self) -> u32 {
        (self.len * DIRENT_SIZE) as u32
    }

    pub fn is_full(&self) -> bool {
        self.len == MAX_DIRENT
    }

    /// Only `.` and `..` left.
    pub fn has_no_children(&self) -> bool {
        self.len <= 2
    }

    pub fn entries(&self) -> &[DirEnt] {
        &self.ents[..self.len]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.is_named(name))
    }

    pub fn get(&self, i: usize) -> Option<&DirEnt> {
        self.entries().get(i)
    }

    pub fn push(&mut self, ent: DirEnt) -> Result<()> {
        if self.is_full() {
            return Err(FsError::QuotaExceeded);
        }
        self.ents[self.len] = ent;
        self.len += 1;
        Ok(())
    }

    /// Remove entry `i`, shifting later entries down over it.
    pub fn remove(&mut self, i: usize) -> Result<DirEnt> {
        if i >= self.len {
            return Err(FsError::corrupt(format!("dirent {} of {}", i, self.len)));
        }
        let ent = self.ents[i];
        self.ents.copy_within(i + 1..self.len, i);
        self.len -= 1;
        self.ents[self.len] = DirEnt::default();
        Ok(ent)
    }
}

/// A directory listing entry handed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u32,
    pub entry_type: EntryType,
    pub name: String,
}

impl TryFrom<&DirEnt> for DirEntry {
    type Error = FsError;

    fn try_from(ent: &DirEnt) -> Result<Self> {
        Ok(Self {
            ino: ent.inum,
            entry_type: ent.entry_type()?,
            name: ent.name(),
        })
    }
}
