//! simplefs is a command line front end for SimpleFS images: it formats, inspects and
//! edits an image file, and can serve it through FUSE when built with the `fuse` feature.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::debug;

use simplefs::{fsck, tree, Credentials, EntryType, FileSystem, FsError, Options, Result};

/// The CLI of simplefs.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the disk image.
    image: PathBuf,

    /// Act as this user id instead of the caller's.
    #[arg(long)]
    uid: Option<u32>,

    /// Act as this group id instead of the caller's.
    #[arg(long)]
    gid: Option<u32>,

    /// Permission bits cleared on new files and directories, in octal.
    #[arg(long, value_parser = parse_octal, default_value = "0")]
    umask: u16,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a fresh image with the given number of data blocks.
    Mkfs { blocks: u32 },
    /// List a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file to stdout.
    Cat { path: String },
    /// Copy a host file into the image.
    Put { host: PathBuf, path: String },
    Mkdir { path: String },
    /// Remove a file or link.
    Rm { path: String },
    /// Remove a directory.
    Rmdir {
        path: String,
        /// Remove everything below it as well.
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
    /// Add a hard link `path` to the file `target`.
    Ln { target: String, path: String },
    Symlink { target: String, path: String },
    Stat { path: String },
    /// Show free space.
    Df,
    /// Check the image for inconsistencies.
    Fsck,
    /// Serve the image at a mount point until unmounted.
    Mount { mountpoint: PathBuf },
}

fn parse_octal(s: &str) -> std::result::Result<u16, String> {
    u16::from_str_radix(s, 8).map_err(|e| format!("{s:?} is not an octal mode: {e}"))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("simplefs: {e}");
            ExitCode::from(e.errno() as u8)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let current = Credentials::current();
    let cred = Credentials {
        uid: args.uid.map_or(current.uid, |uid| uid as u16),
        gid: args.gid.map_or(current.gid, |gid| gid as u16),
    };
    let opts = Options::default()
        .with_credentials(cred)
        .with_umask(args.umask);
    debug!("cli: {:?} as {}:{}", args.cmd, cred.uid, cred.gid);

    if let Cmd::Mkfs { blocks } = args.cmd {
        let fs = FileSystem::init_filesystem(blocks, &args.image, opts)?;
        println!(
            "{}: {} data blocks, {} free",
            args.image.display(),
            blocks,
            fs.statfs().free_blocks
        );
        return Ok(ExitCode::SUCCESS);
    }

    let mut fs = FileSystem::open_filesystem(&args.image, opts)?;
    match args.cmd {
        // formatted above
        Cmd::Mkfs { .. } => {}
        Cmd::Ls { path } => {
            for ent in fs.read_directory(&path)? {
                let st = fs.stat_inode(ent.ino)?;
                let tag = match ent.entry_type {
                    EntryType::Directory => 'd',
                    EntryType::File => '-',
                };
                println!(
                    "{}{:03o} {:>3} {:>5}:{:<5} {:>6} {}",
                    tag, st.perm, st.nlink, st.uid, st.gid, st.size, ent.name
                );
            }
        }
        Cmd::Cat { path } => {
            let data = fs.read_file(&path)?;
            std::io::stdout().write_all(&data)?;
        }
        Cmd::Put { host, path } => {
            let data = std::fs::read(&host)?;
            let size = u32::try_from(data.len()).map_err(|_| FsError::FileTooLarge)?;
            fs.create_file(&path, size, Some(data.as_slice()))?;
        }
        Cmd::Mkdir { path } => {
            fs.make_directory(&path)?;
        }
        Cmd::Rm { path } => fs.rm_file(&path)?,
        Cmd::Rmdir { path, recursive } => {
            if recursive {
                tree::remove_all(&mut fs, &path)?
            } else {
                fs.rm_directory(&path)?
            }
        }
        Cmd::Ln { target, path } => fs.make_link(&path, &target)?,
        Cmd::Symlink { target, path } => {
            fs.make_symlink(&path, &target)?;
        }
        Cmd::Stat { path } => {
            let st = fs.stat(&path)?;
            println!("inode: {}", st.ino);
            println!("kind:  {:?}", st.kind);
            println!("mode:  {:03o}", st.perm);
            println!("links: {}", st.nlink);
            println!("owner: {}:{}", st.uid, st.gid);
            println!("size:  {} ({} blocks)", st.size, st.blocks);
            println!("times: atime {} mtime {} ctime {}", st.atime, st.mtime, st.ctime);
        }
        Cmd::Df => {
            let st = fs.statfs();
            println!(
                "blocks: {}/{} free, inodes: {}/{} free, block size {}",
                st.free_blocks, st.blocks, st.free_inodes, st.inodes, st.block_size
            );
        }
        Cmd::Fsck => {
            let report = fsck::check(&fs)?;
            for problem in &report.problems {
                println!("{problem}");
            }
            println!(
                "{} directories, {} files, {} blocks in use: {}",
                report.directories,
                report.files,
                report.blocks_in_use,
                if report.is_clean() { "clean" } else { "NOT CLEAN" }
            );
            if !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
        #[cfg(feature = "fuse")]
        Cmd::Mount { mountpoint } => {
            simplefs::fuse::mount(fs, mountpoint)?;
            return Ok(ExitCode::SUCCESS);
        }
        #[cfg(not(feature = "fuse"))]
        Cmd::Mount { .. } => {
            eprintln!("simplefs: built without the `fuse` feature");
            return Ok(ExitCode::FAILURE);
        }
    }
    fs.sync()?;
    Ok(ExitCode::SUCCESS)
}
