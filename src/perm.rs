//! Owner/group/other permission test.
//!
//! Only the first tier that matches the caller is consulted: an owner without the
//! owner bits is denied even if "other" would allow it.

use crate::common::*;
use crate::config::Credentials;
use crate::error::{FsError, Result};
use crate::inode::DInode;

use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

impl Access {
    fn mask(self, (r, w): (u16, u16)) -> u16 {
        match self {
            Access::Read => r,
            Access::ReadWrite => r | w,
        }
    }
}

pub fn permitted(inode: &DInode, cred: &Credentials, access: Access) -> bool {
    let tier = if inode.uid == cred.uid {
        (S_IRUSR, S_IWUSR)
    } else if inode.gid == cred.gid {
        (S_IRGRP, S_IWGRP)
    } else {
        (S_IROTH, S_IWOTH)
    };
    let mask = access.mask(tier);
    inode.mode & mask == mask
}

pub fn check(inode: &DInode, ino: u32, cred: &Credentials, access: Access) -> Result<()> {
    if permitted(inode, cred, access) {
        Ok(())
    } else {
        warn!(
            "perm: uid {} gid {} denied {:?} on inode {} (mode {:o}, owner {}:{})",
            cred.uid, cred.gid, access, ino, inode.mode, inode.uid, inode.gid
        );
        Err(FsError::PermissionDenied)
    }
}
