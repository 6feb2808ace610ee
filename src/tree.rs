//! Helpers layered on the public engine calls.

use crate::dirent::EntryType;
use crate::error::Result;
use crate::fs::FileSystem;

use log::debug;

/// Remove the directory at `path` and everything under it, depth first.
pub fn remove_all(fs: &mut FileSystem, path: &str) -> Result<()> {
    let base = path.trim_end_matches('/');
    for ent in fs.read_directory(path)? {
        if ent.name == "." || ent.name == ".." {
            continue;
        }
        let child = format!("{}/{}", base, ent.name);
        match ent.entry_type {
            EntryType::Directory => remove_all(fs, &child)?,
            EntryType::File => fs.rm_file(&child)?,
        }
    }
    debug!("tree: removing {:?}", path);
    fs.rm_directory(path)
}
