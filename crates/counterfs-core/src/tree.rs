// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Namespace tree: the directory hierarchy and name resolution

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::LookupPolicy;
use crate::counter::Counter;
use crate::error::{FsError, FsResult};
use crate::node::{Node, NodeKind, NodeStore};
use crate::types::{Attributes, DirEntry, NodeId, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};

/// Owns every node reachable from the root.
#[derive(Debug)]
pub struct NamespaceTree {
    store: NodeStore,
    nodes: Mutex<HashMap<NodeId, Node>>,
    root_id: NodeId,
    lookup_policy: LookupPolicy,
}

impl NamespaceTree {
    /// Build a tree around an already allocated root directory.
    pub fn with_root(store: NodeStore, root: Node, lookup_policy: LookupPolicy) -> FsResult<Self> {
        if !matches!(root.kind, NodeKind::Directory { .. }) {
            return Err(FsError::NotADirectory);
        }
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Ok(Self {
            store,
            nodes: Mutex::new(nodes),
            root_id,
            lookup_policy,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root_id
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<NodeId, Node>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Link `node` under `parent` as `name`.
    ///
    /// No collision check is made: an existing entry with the same name is
    /// replaced, and the displaced child is dropped together with its subtree.
    pub fn insert(&self, parent: NodeId, name: &str, node: Node) -> FsResult<NodeId> {
        let child_id = node.id;
        let mut nodes = self.nodes();

        let displaced = match nodes.get_mut(&parent).map(|p| &mut p.kind) {
            Some(NodeKind::Directory { children }) => children.insert(name.to_string(), child_id),
            Some(NodeKind::CounterFile { .. }) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        };
        nodes.insert(child_id, node);

        if let Some(old_id) = displaced {
            warn!(%parent, name, %old_id, "name already linked; replacing entry");
            Self::drop_subtree(&mut nodes, old_id);
        }
        debug!(%parent, name, child = %child_id, "linked node");
        Ok(child_id)
    }

    fn drop_subtree(nodes: &mut HashMap<NodeId, Node>, id: NodeId) {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = nodes.remove(&next) {
                if let NodeKind::Directory { children } = node.kind {
                    pending.extend(children.into_values());
                }
            }
        }
    }

    /// Resolve `name` inside `parent` according to the configured policy.
    pub fn lookup(&self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        let nodes = self.nodes();
        let children = match nodes.get(&parent).map(|p| &p.kind) {
            Some(NodeKind::Directory { children }) => children,
            Some(NodeKind::CounterFile { .. }) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        };
        match self.lookup_policy {
            LookupPolicy::Resolve => children.get(name).copied().ok_or(FsError::NotFound),
            LookupPolicy::AlwaysMiss => {
                debug!(%parent, name, "lookup configured to always miss");
                Err(FsError::NotFound)
            }
        }
    }

    pub fn create_dir(&self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.create_dir_with_mode(parent, name, DEFAULT_DIR_MODE)
    }

    pub fn create_dir_with_mode(&self, parent: NodeId, name: &str, mode: u32) -> FsResult<NodeId> {
        let node = self
            .store
            .allocate(NodeKind::directory(), mode)
            .map_err(|_| FsError::AllocationFailed { name: name.to_string() })?;
        self.insert(parent, name, node)
    }

    pub fn create_file(&self, parent: NodeId, name: &str, counter: Counter) -> FsResult<NodeId> {
        self.create_file_with_mode(parent, name, counter, DEFAULT_FILE_MODE)
    }

    pub fn create_file_with_mode(
        &self,
        parent: NodeId,
        name: &str,
        counter: Counter,
        mode: u32,
    ) -> FsResult<NodeId> {
        let node = self
            .store
            .allocate(NodeKind::counter_file(counter), mode)
            .map_err(|_| FsError::AllocationFailed { name: name.to_string() })?;
        self.insert(parent, name, node)
    }

    pub fn getattr(&self, id: NodeId) -> FsResult<Attributes> {
        self.nodes().get(&id).map(Node::attributes).ok_or(FsError::NotFound)
    }

    /// Entries of a directory, sorted by name.
    pub fn readdir(&self, dir: NodeId) -> FsResult<Vec<DirEntry>> {
        let nodes = self.nodes();
        let NodeKind::Directory { children } = &nodes.get(&dir).ok_or(FsError::NotFound)?.kind
        else {
            return Err(FsError::NotADirectory);
        };
        children
            .iter()
            .map(|(name, id)| -> FsResult<DirEntry> {
                let child = nodes.get(id).ok_or(FsError::NotFound)?;
                Ok(DirEntry {
                    name: name.clone(),
                    id: *id,
                    node_type: child.kind.node_type(),
                })
            })
            .collect()
    }

    /// The counter bound to a counter file.
    pub fn counter_of(&self, id: NodeId) -> FsResult<Counter> {
        match self.nodes().get(&id).map(|n| &n.kind) {
            Some(NodeKind::CounterFile { counter }) => Ok(counter.clone()),
            Some(NodeKind::Directory { .. }) => Err(FsError::IsADirectory),
            None => Err(FsError::NotFound),
        }
    }

    pub fn node_count(&self) -> u64 {
        self.nodes().len() as u64
    }
}
