use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use simplefs::common::{BSIZE, DATA_START, MAXFILE, MAX_DIRENT};
use simplefs::{fsck, tree, BlockDevice, Credentials, FileSystem, FsError, Options, RamDisk};

const OWNER: Credentials = Credentials { uid: 1000, gid: 1000 };

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn opts() -> Options {
    Options::default().with_credentials(OWNER)
}

fn ram_fs(blocks: u32) -> (Arc<RamDisk>, FileSystem) {
    init_log();
    let dev = Arc::new(RamDisk::new(DATA_START + blocks as usize));
    let fs = FileSystem::format(dev.clone(), blocks, opts()).unwrap();
    (dev, fs)
}

fn assert_consistent(fs: &FileSystem) {
    let report = fsck::check(fs).unwrap();
    assert!(report.is_clean(), "{:#?}", report.problems);
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn payloads_round_trip_up_to_the_direct_limit() {
    let (_, mut fs) = ram_fs(20);
    let mut lengths: Vec<usize> = (0..=MAXFILE).step_by(97).collect();
    lengths.extend([1, BSIZE - 1, BSIZE, BSIZE + 1, MAXFILE - 1, MAXFILE]);
    for len in lengths {
        let data = pattern(len);
        fs.create_file("/f", len as u32, Some(data.as_slice())).unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), data, "length {len}");
        assert_eq!(fs.stat("/f").unwrap().blocks as usize, len.div_ceil(BSIZE).max(1));
        assert_consistent(&fs);
        fs.rm_file("/f").unwrap();
        assert_consistent(&fs);
    }
}

#[test]
fn counters_stay_conserved_through_a_session() {
    let (_, mut fs) = ram_fs(40);
    fs.make_directory("/usr").unwrap();
    assert_consistent(&fs);
    fs.make_directory("/usr/bin").unwrap();
    assert_consistent(&fs);
    fs.create_file("/usr/bin/sh", 1300, None).unwrap();
    assert_consistent(&fs);
    fs.make_link("/sh", "/usr/bin/sh").unwrap();
    assert_consistent(&fs);
    fs.write_file("/sh", 2000, b"tail").unwrap();
    assert_consistent(&fs);
    fs.truncate("/usr/bin/sh", 5).unwrap();
    assert_consistent(&fs);
    fs.rm_file("/usr/bin/sh").unwrap();
    assert_consistent(&fs);
    fs.rm_directory("/usr/bin").unwrap();
    assert_consistent(&fs);
}

#[test]
fn every_directory_keeps_dot_entries() {
    let (_, mut fs) = ram_fs(20);
    let a = fs.make_directory("/a").unwrap();
    let b = fs.make_directory("/a/b").unwrap();
    fs.create_file("/a/b/x", 0, None).unwrap();
    fs.create_file("/a/y", 0, None).unwrap();
    fs.rm_file("/a/b/x").unwrap();

    for (path, me, parent) in [("/", 2, 2), ("/a", a, 2), ("/a/b", b, a)] {
        let listing = fs.read_directory(path).unwrap();
        assert_eq!(listing[0].name, ".");
        assert_eq!(listing[0].ino, me);
        assert_eq!(listing[1].name, "..");
        assert_eq!(listing[1].ino, parent);
    }
}

#[test]
fn reused_blocks_never_leak_old_content() {
    let (_, mut fs) = ram_fs(20);
    let secret = vec![0xab; 3 * BSIZE];
    fs.create_file("/secret", secret.len() as u32, Some(secret.as_slice()))
        .unwrap();
    fs.rm_file("/secret").unwrap();

    fs.create_file("/fresh", 3 * BSIZE as u32, None).unwrap();
    assert!(fs.read_file("/fresh").unwrap().iter().all(|&b| b == 0));

    fs.create_file("/small", 4, Some(&b"abcd"[..])).unwrap();
    fs.truncate("/small", 300).unwrap();
    assert!(fs.read_file("/small").unwrap()[4..].iter().all(|&b| b == 0));
}

#[test]
fn hard_links_share_one_inode() {
    let (_, mut fs) = ram_fs(20);
    let ino = fs.create_file("/a", 5, Some(&b"hello"[..])).unwrap();
    fs.make_directory("/d").unwrap();
    fs.make_link("/d/b", "/a").unwrap();
    fs.make_link("/c", "/d/b").unwrap();
    assert_eq!(fs.stat("/c").unwrap().ino, ino);
    assert_eq!(fs.stat("/a").unwrap().nlink, 3);

    fs.write_file("/c", 0, b"J").unwrap();
    assert_eq!(fs.read_file("/d/b").unwrap(), b"Jello");

    let free = fs.statfs();
    fs.rm_file("/a").unwrap();
    fs.rm_file("/d/b").unwrap();
    assert_eq!(fs.statfs(), free);
    assert_eq!(fs.stat("/c").unwrap().nlink, 1);
    fs.rm_file("/c").unwrap();
    assert_eq!(fs.statfs().free_inodes, free.free_inodes + 1);
    assert_eq!(fs.statfs().free_blocks, free.free_blocks + 1);
    assert_consistent(&fs);
}

#[test]
fn running_out_of_blocks_changes_nothing() {
    // the root directory owns one of the three blocks
    let (dev, mut fs) = ram_fs(3);
    assert_eq!(fs.statfs().free_blocks, 2);
    fs.create_file("/one", 10, None).unwrap();
    fs.create_file("/two", 10, None).unwrap();

    let before = fs.statfs();
    let image = dev.snapshot().unwrap();
    assert!(matches!(
        fs.create_file("/three", 10, None),
        Err(FsError::Exhausted)
    ));
    assert_eq!(fs.statfs(), before);
    assert_eq!(before.free_blocks, 0);
    assert_eq!(dev.snapshot().unwrap(), image);
    assert!(matches!(fs.make_directory("/d"), Err(FsError::Exhausted)));
    assert_consistent(&fs);

    fs.rm_file("/one").unwrap();
    fs.create_file("/three", 10, None).unwrap();
    assert_consistent(&fs);
}

#[test]
fn non_empty_directory_removal() {
    let (_, mut fs) = ram_fs(20);
    fs.make_directory("/d").unwrap();
    fs.create_file("/d/f", 1, None).unwrap();
    assert!(matches!(fs.rm_directory("/d"), Err(FsError::NotEmpty)));
    fs.rm_file("/d/f").unwrap();
    fs.rm_directory("/d").unwrap();
    assert!(matches!(fs.stat("/d"), Err(FsError::NotFound)));
    assert_consistent(&fs);
}

#[test]
fn permission_denial_leaves_the_image_alone() {
    init_log();
    let dev = Arc::new(RamDisk::new(DATA_START + 20));
    let private = opts().with_umask(0o077);
    let mut fs = FileSystem::format(dev.clone(), 20, private).unwrap();
    fs.make_directory("/home").unwrap();
    fs.create_file("/home/notes", 3, Some(&b"abc"[..])).unwrap();
    assert_eq!(fs.stat("/home").unwrap().perm, 0o700);

    let image = dev.snapshot().unwrap();
    let before = fs.statfs();
    fs.set_credentials(Credentials { uid: 2000, gid: 2000 });
    assert!(matches!(
        fs.create_file("/home/x", 0, None),
        Err(FsError::PermissionDenied)
    ));
    assert!(matches!(
        fs.rm_file("/home/notes"),
        Err(FsError::PermissionDenied)
    ));
    assert!(matches!(
        fs.read_directory("/home"),
        Err(FsError::PermissionDenied)
    ));
    assert!(matches!(
        fs.make_link("/stolen", "/home/notes"),
        Err(FsError::PermissionDenied)
    ));
    assert_eq!(fs.statfs(), before);
    assert_eq!(dev.snapshot().unwrap(), image);
}

#[test]
fn file_bits_guard_removal_in_an_open_directory() {
    let (dev, mut fs) = ram_fs(20);
    fs.make_directory("/shared").unwrap();
    fs.set_mode("/shared", 0o777).unwrap();
    fs.create_file("/shared/report", 4, Some(&b"q3q4"[..])).unwrap();
    fs.set_mode("/shared/report", 0o775).unwrap();

    let image = dev.snapshot().unwrap();
    let before = fs.statfs();
    fs.set_credentials(Credentials { uid: 2000, gid: 2000 });
    assert!(matches!(
        fs.rm_file("/shared/report"),
        Err(FsError::PermissionDenied)
    ));
    assert!(matches!(
        fs.write_file("/shared/report", 0, b"x"),
        Err(FsError::PermissionDenied)
    ));
    assert!(matches!(
        fs.make_link("/shared/copy", "/shared/report"),
        Err(FsError::PermissionDenied)
    ));
    assert_eq!(fs.statfs(), before);
    assert_eq!(dev.snapshot().unwrap(), image);

    // the directory itself is open to everyone
    fs.create_file("/shared/mine", 1, None).unwrap();
    fs.rm_file("/shared/mine").unwrap();
    fs.set_credentials(OWNER);
    fs.rm_file("/shared/report").unwrap();
    assert_consistent(&fs);
}

#[test]
fn only_the_first_matching_tier_counts() {
    let (_, mut fs) = ram_fs(20);
    fs.create_file("/f", 1, None).unwrap();
    fs.set_mode("/f", 0o077).unwrap();
    assert!(matches!(fs.read_file("/f"), Err(FsError::PermissionDenied)));

    fs.set_credentials(Credentials { uid: 1, gid: OWNER.gid });
    assert!(fs.read_file("/f").is_ok());
}

#[test]
fn directory_holds_six_children() {
    let (_, mut fs) = ram_fs(20);
    fs.make_directory("/d").unwrap();
    for i in 0..MAX_DIRENT - 2 {
        fs.create_file(&format!("/d/f{i}"), 0, None).unwrap();
    }
    let before = fs.statfs();
    assert!(matches!(
        fs.create_file("/d/extra", 0, None),
        Err(FsError::QuotaExceeded)
    ));
    assert!(matches!(
        fs.make_link("/d/extra", "/d/f0"),
        Err(FsError::QuotaExceeded)
    ));
    assert_eq!(fs.statfs(), before);
    assert_eq!(fs.read_directory("/d").unwrap().len(), MAX_DIRENT);
}

#[test]
fn oversized_files_are_refused() {
    let (_, mut fs) = ram_fs(20);
    let before = fs.statfs();
    assert!(matches!(
        fs.create_file("/big", MAXFILE as u32 + 1, None),
        Err(FsError::FileTooLarge)
    ));
    assert_eq!(fs.statfs(), before);
    assert_consistent(&fs);
}

#[test]
fn long_names_are_refused() {
    let (_, mut fs) = ram_fs(20);
    let name = format!("/{}", "n".repeat(57));
    assert!(matches!(
        fs.make_directory(&name),
        Err(FsError::NameTooLong)
    ));
    fs.make_directory(&name[..57]).unwrap();
}

#[test]
fn image_file_survives_reopen() {
    init_log();
    let path = std::env::temp_dir().join(format!("simplefs-reopen-{}.img", std::process::id()));
    {
        let mut fs = FileSystem::init_filesystem(16, &path, opts()).unwrap();
        fs.make_directory("/etc").unwrap();
        fs.create_file("/etc/motd", 6, Some(&b"hello\n"[..])).unwrap();
        fs.make_symlink("/motd", "/etc/motd").unwrap();
        fs.sync().unwrap();
    }
    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len, ((DATA_START + 16) * BSIZE) as u64);

    let mut fs = FileSystem::open_filesystem(&path, opts()).unwrap();
    assert_eq!(fs.read_file("/etc/motd").unwrap(), b"hello\n");
    assert_eq!(fs.read_link("/motd").unwrap(), "/etc/motd");
    assert_eq!(fs.statfs().free_blocks, 16 - 4);
    assert_consistent(&fs);
    drop(fs);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn bad_magic_is_rejected() {
    let (dev, fs) = ram_fs(8);
    drop(fs);
    let mut block = [0u8; BSIZE];
    dev.read_block(0, &mut block).unwrap();
    block[24] ^= 0xff;
    dev.write_block(0, &block).unwrap();
    assert!(matches!(
        FileSystem::mount(dev, opts()),
        Err(FsError::CorruptImage(_))
    ));
}

#[test]
fn writes_and_truncates_move_the_free_count() {
    let (_, mut fs) = ram_fs(20);
    fs.create_file("/log", 0, None).unwrap();
    let start = fs.statfs().free_blocks;

    fs.write_file("/log", 0, &pattern(BSIZE * 3)).unwrap();
    assert_eq!(fs.statfs().free_blocks, start - 2);
    fs.write_file("/log", (BSIZE * 3) as u32, b"!").unwrap();
    assert_eq!(fs.stat("/log").unwrap().size as usize, BSIZE * 3 + 1);
    assert_eq!(fs.statfs().free_blocks, start - 3);

    fs.truncate("/log", 0).unwrap();
    assert_eq!(fs.statfs().free_blocks, start);
    assert!(fs.read_file("/log").unwrap().is_empty());
    assert_consistent(&fs);
}

#[test]
fn write_beyond_free_space_rolls_back() {
    let (_, mut fs) = ram_fs(3);
    fs.create_file("/f", 0, None).unwrap();
    let before = fs.statfs();
    assert!(matches!(
        fs.write_file("/f", 0, &pattern(BSIZE * 3)),
        Err(FsError::Exhausted)
    ));
    assert_eq!(fs.statfs(), before);
    assert!(fs.read_file("/f").unwrap().is_empty());
    assert_consistent(&fs);
}

#[test]
fn remove_all_clears_a_subtree() {
    let (_, mut fs) = ram_fs(30);
    let before = fs.statfs();
    fs.make_directory("/src").unwrap();
    fs.make_directory("/src/fs").unwrap();
    fs.create_file("/src/fs/mod.rs", 700, None).unwrap();
    fs.create_file("/src/lib.rs", 10, None).unwrap();
    fs.make_symlink("/src/fs/up", "..").unwrap();

    assert!(matches!(fs.rm_directory("/src"), Err(FsError::NotEmpty)));
    tree::remove_all(&mut fs, "/src").unwrap();
    assert_eq!(fs.statfs(), before);
    assert_eq!(fs.read_directory("/").unwrap().len(), 2);
    assert_consistent(&fs);
}

/// A RAM disk whose writes can be made to fail.
struct FailingDisk {
    inner: RamDisk,
    broken: AtomicBool,
}

impl FailingDisk {
    fn new(blocks: usize) -> Self {
        Self {
            inner: RamDisk::new(blocks),
            broken: AtomicBool::new(false),
        }
    }

    fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }
}

impl BlockDevice for FailingDisk {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_block(blockno, buf)
    }

    fn write_block(&self, blockno: usize, buf: &[u8]) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "write refused"));
        }
        self.inner.write_block(blockno, buf)
    }

    fn num_blocks(&self) -> usize {
        self.inner.num_blocks()
    }
}

fn failing_fs(blocks: u32) -> (Arc<FailingDisk>, FileSystem) {
    init_log();
    let dev = Arc::new(FailingDisk::new(DATA_START + blocks as usize));
    let fs = FileSystem::format(dev.clone(), blocks, opts()).unwrap();
    (dev, fs)
}

#[test]
fn failed_remove_keeps_the_inode_allocated() {
    let (dev, mut fs) = failing_fs(20);
    let old = fs.create_file("/old", 3, Some(&b"old"[..])).unwrap();
    let before = fs.statfs();

    dev.set_broken(true);
    assert!(matches!(fs.rm_file("/old"), Err(FsError::Io(_))));
    dev.set_broken(false);
    assert_eq!(fs.statfs(), before);

    let new = fs.create_file("/new", 3, Some(&b"new"[..])).unwrap();
    assert_ne!(new, old);
    assert_eq!(fs.read_file("/old").unwrap(), b"old");
    assert_eq!(fs.read_file("/new").unwrap(), b"new");
    assert_consistent(&fs);
}

#[test]
fn failed_create_returns_its_inode_and_blocks() {
    let (dev, mut fs) = failing_fs(20);
    let before = fs.statfs();
    let bitmaps = fs.bitmaps().clone();

    dev.set_broken(true);
    assert!(matches!(
        fs.create_file("/f", 1200, Some(pattern(1200).as_slice())),
        Err(FsError::Io(_))
    ));
    assert!(matches!(fs.make_directory("/d"), Err(FsError::Io(_))));
    dev.set_broken(false);

    assert_eq!(fs.statfs(), before);
    assert!(fs.bitmaps() == &bitmaps);
    assert!(matches!(fs.stat("/f"), Err(FsError::NotFound)));
    fs.create_file("/f", 1200, Some(pattern(1200).as_slice())).unwrap();
    assert_eq!(fs.read_file("/f").unwrap(), pattern(1200));
    assert_consistent(&fs);
}

#[test]
fn failed_resize_leaves_the_counters_alone() {
    let (dev, mut fs) = failing_fs(20);
    fs.create_file("/f", 700, Some(pattern(700).as_slice())).unwrap();
    let before = fs.statfs();
    let bitmaps = fs.bitmaps().clone();

    dev.set_broken(true);
    assert!(fs.write_file("/f", 0, &pattern(MAXFILE)).is_err());
    assert!(fs.truncate("/f", 3000).is_err());
    assert!(fs.truncate("/f", 0).is_err());
    dev.set_broken(false);

    assert_eq!(fs.statfs(), before);
    assert!(fs.bitmaps() == &bitmaps);
    assert_eq!(fs.read_file("/f").unwrap(), pattern(700));
    assert_consistent(&fs);
}
