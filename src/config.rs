use crate::common::S_IRWXUGO;

/// Identity the engine checks permissions against and stamps on new inodes.
/// Ids are stored on disk as 16 bits, larger host ids are truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u16,
    pub gid: u16,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: uid as u16,
            gid: gid as u16,
        }
    }

    /// The calling process' real ids.
    pub fn current() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self::new(uid, gid)
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::current()
    }
}

/// Per-context settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub cred: Credentials,
    /// permission bits cleared on every new inode
    pub umask: u16,
}

impl Options {
    pub fn with_credentials(mut self, cred: Credentials) -> Self {
        self.cred = cred;
        self
    }

    pub fn with_umask(mut self, umask: u16) -> Self {
        self.umask = umask & S_IRWXUGO;
        self
    }

    /// Permission bits a new inode starts with.
    pub fn new_perm(&self) -> u16 {
        S_IRWXUGO & !self.umask
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cred: Credentials::current(),
            umask: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn umask_clears_bits() {
        let opts = Options::default().with_umask(0o022);
        assert_eq!(opts.new_perm(), 0o755);
        assert_eq!(Options::default().new_perm(), 0o777);
    }

    #[test]
    fn ids_truncate_to_sixteen_bits() {
        let cred = Credentials::new(0x1_0005, 7);
        assert_eq!(cred, Credentials { uid: 5, gid: 7 });
    }
}
