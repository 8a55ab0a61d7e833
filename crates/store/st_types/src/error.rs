use std::fmt;

/// The stable classification of an [`Error`].
///
/// Kinds are part of the public contract: the S3 gateway maps them to wire
/// error codes and a FUSE adapter would map them to errnos. Add variants at
/// the end; never repurpose one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The named entity (inode, dentry, bucket, object, chunk) does not exist.
    NotFound,

    /// The entity already exists and the operation refuses to replace it.
    Exist,

    PermissionDenied,

    /// The operation requires a non-directory but found a directory.
    IsDirectory,

    /// The operation requires a directory but found something else.
    NotDirectory,

    /// `rmdir`/`delete_bucket` on a container that still has entries.
    NotEmpty,

    InvalidArgument,

    /// An underlying storage failure (WAL write, chunk I/O).
    IoError,

    NoSpace,

    /// The caller's [`crate::CancelToken`] fired at a suspension point.
    Cancelled,

    /// A persisted record failed to decode.
    Corrupt,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::Exist => "already exists",
            Self::PermissionDenied => "permission denied",
            Self::IsDirectory => "is a directory",
            Self::NotDirectory => "not a directory",
            Self::NotEmpty => "not empty",
            Self::InvalidArgument => "invalid argument",
            Self::IoError => "i/o error",
            Self::NoSpace => "no space",
            Self::Cancelled => "cancelled",
            Self::Corrupt => "corrupt record",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An engine error: a stable [`ErrorKind`] plus a human-readable message.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn exist(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Exist, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn is_directory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IsDirectory, message)
    }

    pub fn not_directory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotDirectory, message)
    }

    pub fn not_empty(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotEmpty, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoError, message)
    }

    pub fn no_space(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoSpace, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corrupt, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::StorageFull => ErrorKind::NoSpace,
            _ => ErrorKind::IoError,
        };
        Self::new(kind, err.to_string())
    }
}
