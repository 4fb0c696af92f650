//! The error taxonomy surfaced to the filesystem core.

use thiserror::Error;

use crate::store::StoreError;

/// Failure of a node or stream operation.
///
/// Every variant maps onto one errno value via [`errno`](Self::errno), which
/// is the only shape the dispatching core consumes. Backend-specific causes
/// are folded into this taxonomy by the adapters; io errors that carry no
/// recognizable cause pass through unchanged in [`Io`](Self::Io).
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("inappropriate ioctl for device")]
    NotATty,

    #[error("directory not empty")]
    NotEmpty,

    #[error("device or resource busy")]
    Busy,

    #[error("cross-device link")]
    CrossDevice,

    #[error("operation not supported")]
    Unsupported,

    #[error("bad file descriptor")]
    BadFileDescriptor,

    #[error("function not implemented")]
    NoSys,

    #[error("not a directory")]
    NotADirectory,

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// The errno value this failure surfaces as.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::InvalidArgument => libc::EINVAL,
            Self::NotATty => libc::ENOTTY,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::Busy => libc::EBUSY,
            Self::CrossDevice => libc::EXDEV,
            Self::Unsupported => libc::EOPNOTSUPP,
            Self::BadFileDescriptor => libc::EBADF,
            Self::NoSys => libc::ENOSYS,
            Self::NotADirectory => libc::ENOTDIR,
            Self::QuotaExceeded => libc::EDQUOT,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::QuotaExceeded => Self::QuotaExceeded,
            // An entry the store refuses to modify while open, and a handle
            // caught in a state the store cannot operate on, both surface as
            // a busy object unless the operation maps them more specifically.
            StoreError::Busy | StoreError::InvalidState => Self::Busy,
            StoreError::Unsupported => Self::Unsupported,
            StoreError::Io(e) => Self::Io(e),
        }
    }
}
