//! Unified filesystem error surface. Every upcall maps its failure to a
//! POSIX errno through [`FsError::errno`]; hosts negate the code.

use crate::oplog::record::WireError;
use crate::oplog::replay::ReplayError;
use std::fmt;
use thiserror::Error;

/// Optional path context carried by namespace errors.
#[derive(Debug, Clone)]
pub struct PathHint(Option<String>);

impl PathHint {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn some(path: impl Into<String>) -> Self {
        Self(Some(path.into()))
    }
}

impl fmt::Display for PathHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) if !path.is_empty() => write!(f, ": {path}"),
            _ => Ok(()),
        }
    }
}

impl From<String> for PathHint {
    fn from(value: String) -> Self {
        Self::some(value)
    }
}

impl From<&str> for PathHint {
    fn from(value: &str) -> Self {
        Self::some(value)
    }
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found{path}")]
    NotFound { path: PathHint },

    #[error("already exists{path}")]
    AlreadyExists { path: PathHint },

    #[error("not a directory{path}")]
    NotADirectory { path: PathHint },

    #[error("is a directory{path}")]
    IsADirectory { path: PathHint },

    #[error("directory not empty{path}")]
    DirectoryNotEmpty { path: PathHint },

    #[error("invalid argument{path}")]
    InvalidArgument { path: PathHint },

    #[error("name too long{path}")]
    NameTooLong { path: PathHint },

    #[error("{0}")]
    Wire(#[from] WireError),

    #[error("{0}")]
    Replay(#[from] ReplayError),

    #[error("object store: {0}")]
    Store(#[source] anyhow::Error),
}

impl FsError {
    pub fn not_found(path: impl Into<PathHint>) -> Self {
        FsError::NotFound { path: path.into() }
    }

    pub fn already_exists(path: impl Into<PathHint>) -> Self {
        FsError::AlreadyExists { path: path.into() }
    }

    pub fn not_a_directory(path: impl Into<PathHint>) -> Self {
        FsError::NotADirectory { path: path.into() }
    }

    pub fn is_a_directory(path: impl Into<PathHint>) -> Self {
        FsError::IsADirectory { path: path.into() }
    }

    pub fn invalid(path: impl Into<PathHint>) -> Self {
        FsError::InvalidArgument { path: path.into() }
    }

    /// Positive POSIX error code for this failure; upcall hosts return the
    /// negated value.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound { .. } => libc::ENOENT,
            FsError::AlreadyExists { .. } => libc::EEXIST,
            FsError::NotADirectory { .. } => libc::ENOTDIR,
            FsError::IsADirectory { .. } => libc::EISDIR,
            FsError::DirectoryNotEmpty { .. } => libc::ENOTEMPTY,
            FsError::InvalidArgument { .. } => libc::EINVAL,
            FsError::NameTooLong { .. } => libc::ENAMETOOLONG,
            FsError::Wire(_) | FsError::Replay(_) | FsError::Store(_) => libc::EIO,
        }
    }
}
