//! Filesystem error taxonomy.
//!
//! Every VFS handler resolves to one of these variants, and the FUSE
//! adapter translates them to errno values with [`FsError::errno`].
//! Background workers never propagate errors into handlers; they log and
//! retry, leaving inode state (notably `has_changes`) arranged so that a
//! later handler call re-triggers the work.

use thiserror::Error;

/// Errors surfaced by the VFS operation handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    /// No such name or id, locally or remotely.
    #[error("no such file or directory")]
    NotFound,

    /// Case-insensitive name collision in a parent directory.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Directory removal refused because children remain.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// Transient server or network failure, offline mode, quota refusal.
    #[error("remote I/O failure: {0}")]
    RemoteIo(String),

    /// Local store failure.
    #[error("I/O failure: {0}")]
    Io(String),

    /// Read past EOF, offset exceeding size, malformed names.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs a remote id that could not be obtained.
    #[error("no usable remote id: {0}")]
    BadDescriptor(String),

    /// Operation not supported (e.g. chown).
    #[error("operation not permitted: {0}")]
    Permission(String),

    /// A chunked upload's server-side session was garbage-collected.
    #[error("upload session expired")]
    SessionExpired,

    /// A rename/move would clobber a case-folded sibling.
    #[error("name conflict: {0}")]
    Conflict(String),
}

impl FsError {
    /// The errno reported to the kernel for this error.
    pub fn errno(&self) -> libc::c_int {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotEmpty(_) => libc::ENOTEMPTY,
            Self::RemoteIo(_) => libc::EREMOTEIO,
            Self::Io(_) => libc::EIO,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::BadDescriptor(_) => libc::EBADF,
            Self::Permission(_) => libc::EPERM,
            Self::SessionExpired => libc::EIO,
            Self::Conflict(_) => libc::EEXIST,
        }
    }

    /// The refusal handed out while the filesystem is offline.
    pub fn offline() -> Self {
        Self::RemoteIo("filesystem is offline".to_string())
    }
}

/// Shorthand used throughout the handler and worker code.
pub type FsResult<T> = Result<T, FsError>;
