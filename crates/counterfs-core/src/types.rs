// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for counterfs

use std::time::{SystemTime, UNIX_EPOCH};

/// Magic number reported by `statfs`.
pub const COUNTERFS_MAGIC: u64 = 0x1998_0122;

/// Block size reported by `statfs`.
pub const BLOCK_SIZE: u32 = 4096;

/// Longest name a directory entry may carry, as reported by `statfs`.
pub const NAME_MAX: u32 = 255;

pub const DEFAULT_DIR_MODE: u32 = libc::S_IFDIR as u32 | 0o755;
pub const DEFAULT_FILE_MODE: u32 = libc::S_IFREG as u32 | 0o644;

const PERMISSION_BITS: u32 = 0o7777;

/// Directory mode carrying the permission bits of `mode`.
pub fn dir_mode(mode: u32) -> u32 {
    libc::S_IFDIR as u32 | (mode & PERMISSION_BITS)
}

/// Regular-file mode carrying the permission bits of `mode`.
pub fn file_mode(mode: u32) -> u32 {
    libc::S_IFREG as u32 | (mode & PERMISSION_BITS)
}

/// Stable identifier of a node within one mounted session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// File timestamps, seconds since the Unix epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

impl FileTimes {
    pub fn all(now: i64) -> Self {
        Self {
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Directory,
    CounterFile,
}

/// File attributes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub id: NodeId,
    pub node_type: NodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub times: FileTimes,
    /// Number of entries for directories, 0 for counter files.
    pub len: u64,
}

impl Attributes {
    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Directory
    }

    pub fn permissions(&self) -> u32 {
        self.mode & PERMISSION_BITS
    }
}

/// Directory entry information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub id: NodeId,
    pub node_type: NodeType,
}

/// Filesystem statistics in the shape hosts expect from `statfs`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatFs {
    pub magic: u64,
    pub block_size: u32,
    pub name_max: u32,
    pub files: u64,
}

/// Session statistics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub nodes: u64,
    pub open_handles: u32,
}

/// Time source used to stamp new nodes.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// Wall-clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
