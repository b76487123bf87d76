#![forbid(unsafe_code)]
//! Error types for T2FS.
//!
//! # Error Taxonomy
//!
//! T2FS uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `t2fs-types` | Byte-level violations in the superblock, FAT or records |
//! | Runtime | `T2fsError` | `t2fs-error` (this crate) | Errors returned by the public filesystem API |
//!
//! ## Mapping Policy: ParseError → T2fsError
//!
//! `t2fs-error` does not depend on `t2fs-types`, so there is no blanket
//! `From<ParseError>`. Each caller maps the error where it knows which
//! structure failed: `t2fs-core` at mount, `t2fs-dir` for records.
//!
//! | Where the parse failed | T2fsError Variant |
//! |------------------------|-------------------|
//! | sector 0 while mounting | `CorruptSuperblock(detail)` |
//! | a live FAT sector or directory record | `Corruption { cluster, detail }` |
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`T2fsError::to_errno`].
//! The match is exhaustive so a new variant does not compile until it has one.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io`, `Device`, `Corruption`, `BadSector` | `EIO` (or the raw OS error for `Io`) |
//! | `CorruptSuperblock`, `InvalidGeometry`, `InvalidPath`, `InvalidOffset` | `EINVAL` |
//! | `NotFound`, `EndOfDirectory` | `ENOENT` |
//! | `AlreadyExists` | `EEXIST` |
//! | `NotADirectory` | `ENOTDIR` |
//! | `NotAFile` | `EISDIR` |
//! | `DirectoryNotEmpty` | `ENOTEMPTY` |
//! | `DirectoryFull`, `NoFreeSpace` | `ENOSPC` |
//! | `InvalidHandle` | `EBADF` |
//! | `TooManyOpenFiles`, `TooManyOpenDirs` | `EMFILE` |
//! | `BufferTooSmall` | `ERANGE` |
//!
//! No operation is retried and nothing is rolled back: the first error
//! encountered is returned to the caller as-is.

use thiserror::Error;

/// Unified error type for all T2FS operations.
#[derive(Debug, Error)]
pub enum T2fsError {
    /// Operating system I/O error from a file-backed device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sector device refused a read or write.
    #[error("device error at sector {sector}: {detail}")]
    Device { sector: u64, detail: String },

    /// Sector 0 is unreadable or does not carry the T2FS id/version.
    ///
    /// Fatal at mount time: the whole image is unusable.
    #[error("corrupt superblock: {0}")]
    CorruptSuperblock(String),

    /// Live metadata (FAT chain or directory record) failed validation.
    #[error("corrupt metadata at cluster {cluster}: {detail}")]
    Corruption { cluster: u32, detail: String },

    /// Geometry requested for formatting, or found at mount, is unusable.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Empty, oversized or malformed path string.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A path component does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// The name is already taken in the target directory.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A regular file (or a link to one) was required.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// rmdir on a directory that still holds records.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Every record slot of the directory cluster is in use.
    ///
    /// Directories occupy exactly one cluster and never grow.
    #[error("directory full: {0}")]
    DirectoryFull(String),

    /// No FREE entry left in the FAT.
    #[error("no free cluster left on device")]
    NoFreeSpace,

    /// Attempted to reassign a cluster marked bad.
    #[error("cluster {0} is marked as a bad sector")]
    BadSector(u32),

    /// Handle out of range or not currently open.
    #[error("invalid handle: {0}")]
    InvalidHandle(i64),

    /// The open-file table is exhausted.
    #[error("too many open files")]
    TooManyOpenFiles,

    /// The open-directory table is exhausted.
    #[error("too many open directories")]
    TooManyOpenDirs,

    /// Negative seek offset other than the end-of-file sentinel.
    #[error("invalid seek offset: {0}")]
    InvalidOffset(i64),

    /// readdir reached the end of the directory cluster.
    #[error("end of directory")]
    EndOfDirectory,

    /// Destination buffer cannot hold the result plus its terminator.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

impl T2fsError {
    /// Convert this error into a POSIX errno.
    ///
    /// Policy notes:
    /// - `NotAFile` → `EISDIR`: the only non-file record a file operation
    ///   can meet is a directory.
    /// - `EndOfDirectory` → `ENOENT`: there is no next entry.
    /// - `DirectoryFull` → `ENOSPC`: the directory cannot grow.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Device { .. } | Self::Corruption { .. } | Self::BadSector(_) => libc::EIO,
            Self::CorruptSuperblock(_)
            | Self::InvalidGeometry(_)
            | Self::InvalidPath(_)
            | Self::InvalidOffset(_) => libc::EINVAL,
            Self::NotFound(_) | Self::EndOfDirectory => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::NotAFile(_) => libc::EISDIR,
            Self::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            Self::DirectoryFull(_) | Self::NoFreeSpace => libc::ENOSPC,
            Self::InvalidHandle(_) => libc::EBADF,
            Self::TooManyOpenFiles | Self::TooManyOpenDirs => libc::EMFILE,
            Self::BufferTooSmall { .. } => libc::ERANGE,
        }
    }
}

/// Result alias using `T2fsError`.
pub type Result<T> = std::result::Result<T, T2fsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(T2fsError, libc::c_int)> = vec![
            (T2fsError::Io(std::io::Error::other("test")), libc::EIO),
            (
                T2fsError::Device {
                    sector: 7,
                    detail: "test".into(),
                },
                libc::EIO,
            ),
            (T2fsError::CorruptSuperblock("bad id".into()), libc::EINVAL),
            (
                T2fsError::Corruption {
                    cluster: 3,
                    detail: "cycle".into(),
                },
                libc::EIO,
            ),
            (
                T2fsError::InvalidGeometry("sectors_per_cluster=0".into()),
                libc::EINVAL,
            ),
            (T2fsError::InvalidPath(String::new()), libc::EINVAL),
            (T2fsError::NotFound("a".into()), libc::ENOENT),
            (T2fsError::AlreadyExists("a".into()), libc::EEXIST),
            (T2fsError::NotADirectory("a".into()), libc::ENOTDIR),
            (T2fsError::NotAFile("a".into()), libc::EISDIR),
            (T2fsError::DirectoryNotEmpty("a".into()), libc::ENOTEMPTY),
            (T2fsError::DirectoryFull("a".into()), libc::ENOSPC),
            (T2fsError::NoFreeSpace, libc::ENOSPC),
            (T2fsError::BadSector(9), libc::EIO),
            (T2fsError::InvalidHandle(-1), libc::EBADF),
            (T2fsError::TooManyOpenFiles, libc::EMFILE),
            (T2fsError::TooManyOpenDirs, libc::EMFILE),
            (T2fsError::InvalidOffset(-2), libc::EINVAL),
            (T2fsError::EndOfDirectory, libc::ENOENT),
            (
                T2fsError::BufferTooSmall {
                    needed: 4,
                    available: 2,
                },
                libc::ERANGE,
            ),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(T2fsError::Io(raw).to_errno(), libc::EPERM);
    }

    #[test]
    fn display_formatting() {
        let err = T2fsError::Corruption {
            cluster: 42,
            detail: "chain does not terminate".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt metadata at cluster 42: chain does not terminate"
        );

        let dev = T2fsError::Device {
            sector: 3,
            detail: "short read".into(),
        };
        assert_eq!(dev.to_string(), "device error at sector 3: short read");

        assert_eq!(
            T2fsError::BadSector(12).to_string(),
            "cluster 12 is marked as a bad sector"
        );
        assert_eq!(
            T2fsError::BufferTooSmall {
                needed: 10,
                available: 4
            }
            .to_string(),
            "buffer too small: need 10 bytes, have 4"
        );
    }
}
