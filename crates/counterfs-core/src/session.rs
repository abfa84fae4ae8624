// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem session: mount-time population, namespace growth and the
//! open-handle table hosts drive counter files through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::{CounterScope, FsConfig};
use crate::counter::{Counter, CounterSession};
use crate::error::{FsError, FsResult};
use crate::fault::FaultInjector;
use crate::node::{NodeKind, NodeStore};
use crate::tree::NamespaceTree;
use crate::types::{
    dir_mode, file_mode, Attributes, Clock, DirEntry, FsStats, HandleId, NodeId, StatFs,
    SystemClock, BLOCK_SIZE, COUNTERFS_MAGIC, DEFAULT_DIR_MODE, NAME_MAX,
};

/// Name of the counter file created in the root at mount.
pub const ROOT_COUNTER_NAME: &str = "counter1";
/// Name of the subdirectory created in the root at mount.
pub const SEED_DIR_NAME: &str = "folder1";
/// Name of the counter file created inside [`SEED_DIR_NAME`] at mount.
pub const NESTED_COUNTER_NAME: &str = "counter2";

/// Open handle on a counter file
#[derive(Debug)]
struct Handle {
    node_id: NodeId,
    session: CounterSession,
}

/// A mounted counterfs instance.
///
/// Dropping the session (or calling [`FilesystemSession::unmount`]) releases
/// the whole tree at once; individual nodes are never removed.
#[derive(Debug)]
pub struct FilesystemSession {
    config: FsConfig,
    tree: NamespaceTree,
    shared_counter: Counter,
    handles: Mutex<HashMap<HandleId, Handle>>,
    next_handle_id: AtomicU64,
}

impl FilesystemSession {
    /// Mount a new filesystem with the default tree.
    pub fn mount(config: FsConfig) -> FsResult<Self> {
        Self::mount_with_clock(config, Arc::new(SystemClock))
    }

    pub fn mount_with_clock(config: FsConfig, clock: Arc<dyn Clock>) -> FsResult<Self> {
        config.validate()?;

        let faults = Arc::new(FaultInjector::with_policy(config.fault.clone()));
        let store = NodeStore::new(clock, faults);
        let root = store
            .allocate(NodeKind::directory(), DEFAULT_DIR_MODE)
            .map_err(|e| FsError::InitFailed {
                reason: format!("allocating root: {e}"),
            })?;
        let tree = NamespaceTree::with_root(store, root, config.lookup)?;

        Self::populate_default_tree(&tree).map_err(|e| FsError::InitFailed {
            reason: format!("populating default tree: {e}"),
        })?;

        info!(
            nodes = tree.node_count(),
            counter_scope = ?config.counter_scope,
            lookup = ?config.lookup,
            "mounted counterfs"
        );

        Ok(Self {
            config,
            tree,
            shared_counter: Counter::new(0),
            handles: Mutex::new(HashMap::new()),
            next_handle_id: AtomicU64::new(1),
        })
    }

    fn populate_default_tree(tree: &NamespaceTree) -> FsResult<()> {
        let root = tree.root();
        tree.create_file(root, ROOT_COUNTER_NAME, Counter::new(0))?;
        let folder = tree.create_dir(root, SEED_DIR_NAME)?;
        tree.create_file(folder, NESTED_COUNTER_NAME, Counter::new(0))?;
        Ok(())
    }

    /// Release the whole tree. Open handles are invalidated with it.
    pub fn unmount(self) {
        let open_handles = self.handles().len();
        info!(nodes = self.tree.node_count(), open_handles, "unmounting counterfs");
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<HandleId, Handle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_handle_id(&self) -> HandleId {
        HandleId::new(self.next_handle_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn lookup(&self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.tree.lookup(parent, name)
    }

    /// Create a counter file. Hosts call this after `lookup` missed.
    pub fn create(&self, parent: NodeId, name: &str, mode: u32) -> FsResult<NodeId> {
        let counter = match self.config.counter_scope {
            CounterScope::PerFile => Counter::new(0),
            CounterScope::Shared => self.shared_counter.clone(),
        };
        let id = self.tree.create_file_with_mode(parent, name, counter, file_mode(mode))?;
        // The shared counter restarts only once the new file is linked.
        if self.config.counter_scope == CounterScope::Shared {
            self.shared_counter.set(0);
        }
        debug!(%parent, name, %id, "created counter file");
        Ok(id)
    }

    /// Create a directory. Hosts call this after `lookup` missed.
    pub fn mkdir(&self, parent: NodeId, name: &str, mode: u32) -> FsResult<NodeId> {
        let id = self.tree.create_dir_with_mode(parent, name, dir_mode(mode))?;
        debug!(%parent, name, %id, "created directory");
        Ok(id)
    }

    pub fn getattr(&self, id: NodeId) -> FsResult<Attributes> {
        self.tree.getattr(id)
    }

    pub fn readdir(&self, dir: NodeId) -> FsResult<Vec<DirEntry>> {
        self.tree.readdir(dir)
    }

    pub fn open(&self, id: NodeId) -> FsResult<HandleId> {
        let counter = self.tree.counter_of(id)?;
        let handle_id = self.allocate_handle_id();
        let handle = Handle {
            node_id: id,
            session: CounterSession::open(counter, self.config.scratch_capacity),
        };
        self.handles().insert(handle_id, handle);
        debug!(%id, handle = handle_id.0, "opened counter file");
        Ok(handle_id)
    }

    pub fn close(&self, handle_id: HandleId) -> FsResult<()> {
        let handle = self.handles().remove(&handle_id).ok_or(FsError::BadHandle)?;
        debug!(id = %handle.node_id, handle = handle_id.0, "closed counter file");
        Ok(())
    }

    /// Read from the handle's cursor, advancing it.
    pub fn read(&self, handle_id: HandleId, buf: &mut [u8]) -> FsResult<usize> {
        let mut handles = self.handles();
        let handle = handles.get_mut(&handle_id).ok_or(FsError::BadHandle)?;
        Ok(handle.session.read(buf))
    }

    /// Write at the handle's cursor.
    pub fn write(&self, handle_id: HandleId, data: &[u8]) -> FsResult<usize> {
        let mut handles = self.handles();
        let handle = handles.get_mut(&handle_id).ok_or(FsError::BadHandle)?;
        handle.session.write(data)
    }

    pub fn seek(&self, handle_id: HandleId, offset: u64) -> FsResult<()> {
        let mut handles = self.handles();
        let handle = handles.get_mut(&handle_id).ok_or(FsError::BadHandle)?;
        handle.session.seek(offset);
        Ok(())
    }

    /// Positional read for hosts that keep their own per-descriptor offset.
    pub fn read_at(&self, handle_id: HandleId, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let mut handles = self.handles();
        let handle = handles.get_mut(&handle_id).ok_or(FsError::BadHandle)?;
        handle.session.seek(offset);
        Ok(handle.session.read(buf))
    }

    /// Positional write for hosts that keep their own per-descriptor offset.
    pub fn write_at(&self, handle_id: HandleId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let mut handles = self.handles();
        let handle = handles.get_mut(&handle_id).ok_or(FsError::BadHandle)?;
        handle.session.seek(offset);
        handle.session.write(data)
    }

    pub fn statfs(&self) -> StatFs {
        StatFs {
            magic: COUNTERFS_MAGIC,
            block_size: BLOCK_SIZE,
            name_max: NAME_MAX,
            files: self.tree.node_count(),
        }
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            nodes: self.tree.node_count(),
            open_handles: self.handles().len() as u32,
        }
    }
}
