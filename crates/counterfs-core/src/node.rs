// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node store: allocation of directory and counter-file records

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::counter::Counter;
use crate::error::FsResult;
use crate::fault::{FaultInjector, FaultOp};
use crate::types::{Attributes, Clock, FileTimes, NodeId, NodeType};

/// Filesystem node types
#[derive(Clone, Debug)]
pub enum NodeKind {
    Directory { children: BTreeMap<String, NodeId> },
    CounterFile { counter: Counter },
}

impl NodeKind {
    pub fn directory() -> Self {
        NodeKind::Directory {
            children: BTreeMap::new(),
        }
    }

    pub fn counter_file(counter: Counter) -> Self {
        NodeKind::CounterFile { counter }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Directory { .. } => NodeType::Directory,
            NodeKind::CounterFile { .. } => NodeType::CounterFile,
        }
    }
}

/// Filesystem node
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub kind: NodeKind,
    pub times: FileTimes,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn attributes(&self) -> Attributes {
        let len = match &self.kind {
            NodeKind::Directory { children } => children.len() as u64,
            NodeKind::CounterFile { .. } => 0,
        };
        Attributes {
            id: self.id,
            node_type: self.kind.node_type(),
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            times: self.times,
            len,
        }
    }
}

/// Hands out fully initialized, not yet linked nodes.
pub struct NodeStore {
    next_node_id: AtomicU64,
    clock: Arc<dyn Clock>,
    faults: Arc<FaultInjector>,
}

impl NodeStore {
    pub fn new(clock: Arc<dyn Clock>, faults: Arc<FaultInjector>) -> Self {
        Self {
            next_node_id: AtomicU64::new(1),
            clock,
            faults,
        }
    }

    pub fn allocate(&self, kind: NodeKind, mode: u32) -> FsResult<Node> {
        if let Some(err) = self.faults.should_fault(FaultOp::AllocateNode) {
            return Err(err);
        }

        let id = NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed));
        let node = Node {
            id,
            kind,
            times: FileTimes::all(self.clock.now()),
            mode,
            uid: 0,
            gid: 0,
        };
        trace!(%id, mode = format_args!("{mode:o}"), "allocated node");
        Ok(node)
    }
}

impl std::fmt::Debug for NodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStore")
            .field("next_node_id", &self.next_node_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsError;
    use crate::fault::FaultPolicy;
    use crate::types::{MockClock, SystemClock, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};

    fn store_with_clock(clock: impl Clock + 'static) -> NodeStore {
        NodeStore::new(Arc::new(clock), Arc::new(FaultInjector::new()))
    }

    #[test]
    fn test_allocate_stamps_defaults() {
        let mut clock = MockClock::new();
        clock.expect_now().times(1).return_const(1_700_000_000i64);
        let store = store_with_clock(clock);

        let node = store.allocate(NodeKind::directory(), DEFAULT_DIR_MODE).expect("allocate");
        assert_eq!(node.uid, 0);
        assert_eq!(node.gid, 0);
        assert_eq!(node.mode, DEFAULT_DIR_MODE);
        assert_eq!(node.times, FileTimes::all(1_700_000_000));
        match &node.kind {
            NodeKind::Directory { children } => assert!(children.is_empty()),
            other => panic!("expected directory, got {other:?}"),
        }
    }

    #[test]
    fn test_allocate_counter_file_keeps_counter() {
        let store = store_with_clock(SystemClock);
        let counter = Counter::new(7);
        let node = store
            .allocate(NodeKind::counter_file(counter.clone()), DEFAULT_FILE_MODE)
            .expect("allocate");

        let attrs = node.attributes();
        assert_eq!(attrs.node_type, NodeType::CounterFile);
        assert_eq!(attrs.permissions(), 0o644);
        match &node.kind {
            NodeKind::CounterFile { counter: bound } => assert!(bound.shares_with(&counter)),
            other => panic!("expected counter file, got {other:?}"),
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let store = store_with_clock(SystemClock);
        let a = store.allocate(NodeKind::directory(), DEFAULT_DIR_MODE).expect("a");
        let b = store.allocate(NodeKind::directory(), DEFAULT_DIR_MODE).expect("b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_injected_fault_surfaces_out_of_resources() {
        let faults = Arc::new(FaultInjector::with_policy(FaultPolicy::fail_allocations_after(1)));
        let store = NodeStore::new(Arc::new(SystemClock), faults);

        assert!(store.allocate(NodeKind::directory(), DEFAULT_DIR_MODE).is_ok());
        let err = store.allocate(NodeKind::directory(), DEFAULT_DIR_MODE).unwrap_err();
        assert_eq!(err, FsError::OutOfResources);
    }
}
