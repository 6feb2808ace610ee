use libc::c_int;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("file exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    /// the parent directory block has no free entry left
    #[error("directory is full")]
    QuotaExceeded,
    /// no free inode or data block
    #[error("no space left on device")]
    Exhausted,
    #[error("out of memory")]
    OutOfMemory,
    #[error("corrupt image: {0}")]
    CorruptImage(String),
    #[error("cannot remove the root directory")]
    BusyRoot,
    #[error("file too large")]
    FileTooLarge,
    #[error("file name too long")]
    NameTooLong,
    #[error("invalid path")]
    InvalidPath,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = core::result::Result<T, FsError>;

impl FsError {
    pub(crate) fn corrupt(what: impl Into<String>) -> Self {
        FsError::CorruptImage(what.into())
    }

    /// Host errno for this error, positive.
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound | FsError::InvalidPath => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::PermissionDenied => libc::EACCES,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::QuotaExceeded | FsError::Exhausted => libc::ENOSPC,
            FsError::OutOfMemory => libc::ENOMEM,
            FsError::CorruptImage(_) | FsError::InvalidArgument => libc::EINVAL,
            FsError::BusyRoot => libc::EBUSY,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::Io(_) | FsError::Codec(_) => libc::EIO,
        }
    }

    /// Negative return code, the convention of the C-style engine API.
    pub fn code(&self) -> c_int {
        -self.errno()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_errnos() {
        assert_eq!(FsError::NotFound.code(), -libc::ENOENT);
        assert_eq!(FsError::NotEmpty.code(), -libc::ENOTEMPTY);
        assert_eq!(FsError::Exhausted.code(), -libc::ENOSPC);
        assert_eq!(FsError::corrupt("bad magic").errno(), libc::EINVAL);
    }

    #[test]
    fn io_errors_convert() {
        fn fails() -> Result<()> {
            let io: std::io::Result<()> = Err(std::io::ErrorKind::UnexpectedEof.into());
            io?;
            Ok(())
        }
        assert!(matches!(fails(), Err(FsError::Io(_))));
    }
}
