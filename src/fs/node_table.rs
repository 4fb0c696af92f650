//! Id-addressed arena for the in-memory node tree.
//!
//! Parent/child relationships are id-based edges rather than owning
//! references: each node stores its parent id and directories store a
//! name → id map of their children. Back edges exist only for path
//! reconstruction, so the cyclic parent/child shape never turns into a
//! cyclic ownership problem.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::error::FsError;
use crate::fs::{NodeId, NodeKind, NodePerms, Stream};

/// The id of the root directory, seeded by [`NodeTable::new`].
pub const ROOT_NODE: NodeId = 1;

/// A single entry in the virtual tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique, stable identifier.
    pub id: NodeId,
    /// Parent id. `None` for the root and for detached nodes.
    pub parent: Option<NodeId>,
    /// Name of this entry within its parent.
    pub name: String,
    /// Node type.
    pub kind: NodeKind,
    /// Permission bits.
    pub perms: NodePerms,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Child name → child id. Empty for non-directories.
    pub children: HashMap<String, NodeId>,
}

/// The arena owning every [`Node`], addressed by id.
///
/// One table is shared by all backends of a filesystem instance and is
/// passed to them explicitly, so separate instances (and separate tests)
/// never leak state into each other. Ids are allocated from atomic
/// counters and never reused.
pub struct NodeTable {
    nodes: scc::HashMap<NodeId, Node>,
    next_node: AtomicU64,
    next_stream: AtomicU64,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    /// Creates a table seeded with a root directory at [`ROOT_NODE`].
    #[must_use]
    pub fn new() -> Self {
        let nodes = scc::HashMap::new();
        let root = Node {
            id: ROOT_NODE,
            parent: None,
            name: "/".to_owned(),
            kind: NodeKind::Directory,
            perms: NodePerms::ALL_RWX,
            mtime: SystemTime::now(),
            children: HashMap::new(),
        };
        let _ = nodes.insert(ROOT_NODE, root);
        Self {
            nodes,
            next_node: AtomicU64::new(ROOT_NODE + 1),
            next_stream: AtomicU64::new(1),
        }
    }

    /// Allocates a new node and attaches it under `parent`.
    ///
    /// The parent's child map and mtime are updated in the same call so
    /// the tree never holds a half-linked entry.
    pub fn insert(
        &self,
        parent: Option<NodeId>,
        name: &str,
        kind: NodeKind,
        perms: NodePerms,
    ) -> NodeId {
        let id = self.next_node.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now();
        let node = Node {
            id,
            parent,
            name: name.to_owned(),
            kind,
            perms,
            mtime: now,
            children: HashMap::new(),
        };
        let _ = self.nodes.insert(id, node);
        if let Some(parent) = parent {
            self.nodes.update(&parent, |_, n| {
                n.children.insert(name.to_owned(), id);
                n.mtime = now;
            });
        }
        id
    }

    /// Returns a snapshot of the node, if present.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.nodes.read(&id, |_, n| n.clone())
    }

    /// Returns the node's type, if present.
    #[must_use]
    pub fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.read(&id, |_, n| n.kind)
    }

    /// Resolves a child of `parent` by exact name.
    #[must_use]
    pub fn child_of(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .read(&parent, |_, n| n.children.get(name).copied())
            .flatten()
    }

    /// Names of the children currently linked under `id`.
    #[must_use]
    pub fn children_of(&self, id: NodeId) -> Vec<String> {
        self.nodes
            .read(&id, |_, n| n.children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `id` has at least one linked child.
    #[must_use]
    pub fn has_children(&self, id: NodeId) -> bool {
        self.nodes
            .read(&id, |_, n| !n.children.is_empty())
            .unwrap_or(false)
    }

    /// Replaces the node's permission bits.
    pub fn set_perms(&self, id: NodeId, perms: NodePerms) {
        self.nodes.update(&id, |_, n| n.perms = perms);
    }

    /// Sets the node's modification time.
    pub fn touch(&self, id: NodeId, mtime: SystemTime) {
        self.nodes.update(&id, |_, n| n.mtime = mtime);
    }

    /// Unlinks the named child from `parent`, returning its id.
    ///
    /// The child node itself stays in the arena (detached, parent
    /// cleared) until [`remove`](Self::remove) drops it.
    pub fn detach(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let now = SystemTime::now();
        let child = self
            .nodes
            .update(&parent, |_, n| {
                let child = n.children.remove(name);
                if child.is_some() {
                    n.mtime = now;
                }
                child
            })
            .flatten()?;
        self.nodes.update(&child, |_, n| n.parent = None);
        Some(child)
    }

    /// Drops a node from the arena.
    pub fn remove(&self, id: NodeId) {
        let _ = self.nodes.remove(&id);
    }

    /// Moves `id` under `new_parent` as `new_name`, updating both parents'
    /// child maps and mtimes.
    pub fn relink(&self, id: NodeId, new_parent: NodeId, new_name: &str) -> Result<(), FsError> {
        let (old_parent, old_name) = self
            .nodes
            .read(&id, |_, n| (n.parent, n.name.clone()))
            .ok_or(FsError::NotFound)?;
        let now = SystemTime::now();
        if let Some(old_parent) = old_parent {
            self.nodes.update(&old_parent, |_, n| {
                n.children.remove(&old_name);
                n.mtime = now;
            });
        }
        self.nodes.update(&id, |_, n| {
            n.parent = Some(new_parent);
            n.name = new_name.to_owned();
        });
        self.nodes
            .update(&new_parent, |_, n| {
                n.children.insert(new_name.to_owned(), id);
                n.mtime = now;
            })
            .ok_or(FsError::NotFound)?;
        Ok(())
    }

    /// Reconstructs the absolute path of `id` by walking parent edges.
    ///
    /// Returns `None` for unknown or detached nodes.
    #[must_use]
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        if id == ROOT_NODE {
            return Some("/".to_owned());
        }
        let mut parts = Vec::new();
        let mut cur = id;
        while cur != ROOT_NODE {
            let (name, parent) = self.nodes.read(&cur, |_, n| (n.name.clone(), n.parent))?;
            parts.push(name);
            cur = parent?;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    /// Creates a stream positioned at byte 0, bound to `node`.
    ///
    /// The stream is inert until a backend's `open` runs for it.
    #[must_use]
    pub fn new_stream(&self, node: NodeId) -> Stream {
        Stream {
            id: self.next_stream.fetch_add(1, Ordering::Relaxed),
            node,
            position: 0,
        }
    }

    /// Number of nodes currently in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
