// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for counterfs core

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("node allocation failed for {name:?}")]
    AllocationFailed { name: String },
    #[error("filesystem initialization failed: {reason}")]
    InitFailed { reason: String },
    #[error("write at non-zero offset {offset}")]
    InvalidOffset { offset: u64 },
    #[error("write of {len} bytes does not fit the {capacity}-byte scratch buffer")]
    BufferTooLarge { len: usize, capacity: usize },
    #[error("out of resources")]
    OutOfResources,
    #[error("not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("bad handle")]
    BadHandle,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FsError {
    /// POSIX errno a host should report for this error.
    ///
    /// Allocation and init failures map to `EFAULT`, not `ENOMEM`.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::AllocationFailed { .. } | FsError::InitFailed { .. } => libc::EFAULT,
            FsError::InvalidOffset { .. } | FsError::BufferTooLarge { .. } => libc::EINVAL,
            FsError::OutOfResources => libc::ENOMEM,
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::BadHandle => libc::EBADF,
            FsError::InvalidConfig(_) => libc::EINVAL,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
