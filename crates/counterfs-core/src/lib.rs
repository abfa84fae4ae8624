// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! counterfs core: an in-memory namespace of directories and counter files.
//!
//! A counter file has no stored content. Reading it yields the current value
//! of an integer counter and increments that counter for the next read
//! session; writing parses a decimal number and stores it. The crate covers
//! the node store, the namespace tree, the counter engine and the session
//! that mounts a default tree. Hosts (FUSE adapters, shells, tests) drive it
//! through [`FilesystemSession`].

pub mod config;
pub mod counter;
pub mod error;
pub mod fault;
pub mod node;
pub mod session;
pub mod tree;
pub mod types;

pub use config::{CounterScope, FsConfig, LookupPolicy, DEFAULT_SCRATCH_CAPACITY};
pub use counter::{parse_decimal, Counter, CounterSession};
pub use error::{FsError, FsResult};
pub use fault::{FaultInjector, FaultOp, FaultPolicy, FaultRule};
pub use node::{Node, NodeKind, NodeStore};
pub use session::{FilesystemSession, NESTED_COUNTER_NAME, ROOT_COUNTER_NAME, SEED_DIR_NAME};
pub use tree::NamespaceTree;
pub use types::*;
