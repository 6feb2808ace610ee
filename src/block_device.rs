use crate::common::BSIZE;

use std::any::Any;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Block-granular storage. `buf` is always exactly one block long.
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&self, blockno: usize, buf: &[u8]) -> io::Result<()>;
    /// # of blocks the device holds
    fn num_blocks(&self) -> usize;
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> io::Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "block device lock poisoned"))
}

fn check_io(blockno: usize, len: usize, num_blocks: usize) -> io::Result<()> {
    if len != BSIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("buffer of {len} bytes is not one block"),
        ));
    }
    if blockno >= num_blocks {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("block {blockno} past end of device ({num_blocks} blocks)"),
        ));
    }
    Ok(())
}

/// A disk image in a regular file.
pub struct FileDisk {
    file: Mutex<File>,
    blocks: usize,
}

impl FileDisk {
    /// Create (or truncate) an image of `blocks` zeroed blocks.
    pub fn create<P: AsRef<Path>>(path: P, blocks: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((blocks * BSIZE) as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    /// Open an existing image; trailing bytes short of a block are ignored.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let blocks = file.metadata()?.len() as usize / BSIZE;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> io::Result<()> {
        check_io(blockno, buf.len(), self.blocks)?;
        let mut file = lock(&self.file)?;
        file.seek(SeekFrom::Start((blockno * BSIZE) as u64))?;
        file.read_exact(buf)
    }

    fn write_block(&self, blockno: usize, buf: &[u8]) -> io::Result<()> {
        check_io(blockno, buf.len(), self.blocks)?;
        let mut file = lock(&self.file)?;
        file.seek(SeekFrom::Start((blockno * BSIZE) as u64))?;
        file.write_all(buf)
    }

    fn num_blocks(&self) -> usize {
        self.blocks
    }

    fn flush(&self) -> io::Result<()> {
        lock(&self.file)?.sync_data()
    }
}

/// In-memory disk, handy for tests and scratch images.
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    blocks: usize,
}

impl RamDisk {
    pub fn new(blocks: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; blocks * BSIZE]),
            blocks,
        }
    }

    /// Copy of the raw image bytes.
    pub fn snapshot(&self) -> io::Result<Vec<u8>> {
        Ok(lock(&self.data)?.clone())
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> io::Result<()> {
        check_io(blockno, buf.len(), self.blocks)?;
        let data = lock(&self.data)?;
        let start = blockno * BSIZE;
        buf.copy_from_slice(&data[start..start + BSIZE]);
        Ok(())
    }

    fn write_block(&self, blockno: usize, buf: &[u8]) -> io::Result<()> {
        check_io(blockno, buf.len(), self.blocks)?;
        let mut data = lock(&self.data)?;
        let start = blockno * BSIZE;
        data[start..start + BSIZE].copy_from_slice(buf);
        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_disk_round_trips_blocks() {
        let disk = RamDisk::new(4);
        let mut block = [0u8; BSIZE];
        block[0] = 0xaa;
        block[BSIZE - 1] = 0x55;
        disk.write_block(3, &block).unwrap();

        let mut back = [0u8; BSIZE];
        disk.read_block(3, &mut back).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn out_of_range_block_is_an_error() {
        let disk = RamDisk::new(2);
        let mut block = [0u8; BSIZE];
        assert!(disk.read_block(2, &mut block).is_err());
        assert!(disk.write_block(0, &block[..10]).is_err());
    }

    #[test]
    fn file_disk_persists_across_handles() {
        let path = std::env::temp_dir().join(format!("simplefs-bdev-{}.img", std::process::id()));
        {
            let disk = FileDisk::create(&path, 3).unwrap();
            let block = [7u8; BSIZE];
            disk.write_block(1, &block).unwrap();
            disk.flush().unwrap();
        }
        let disk = FileDisk::open(&path).unwrap();
        assert_eq!(disk.num_blocks(), 3);
        let mut back = [0u8; BSIZE];
        disk.read_block(1, &mut back).unwrap();
        assert_eq!(back, [7u8; BSIZE]);
        std::fs::remove_file(&path).unwrap();
    }
}
