//! Adapter for stores with native directory/file handles.
//!
//! The store mirrors the virtual tree one-to-one: every node carries a
//! backing reference (directory or file), creation is eager, and rename
//! maps onto the store's atomic move. The adapter's own bookkeeping is
//! three side tables keyed by node or stream id: backing references,
//! shared per-node open state, and per-stream handle bindings.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::error::FsError;
use crate::fs::node_table::NodeTable;
use crate::fs::ops::{NodeOps, StreamOps};
use crate::fs::{
    AttrChanges, BLOCK_SIZE, NodeAttr, NodeId, NodeKind, NodePerms, OpenState, ROOT_NODE, Stream,
    StreamId, Whence, seek_position,
};
use crate::store::{DirStore, EntryRef, StoreError, StoreHandle as _};

/// Backend over a [`DirStore`].
pub struct HierarchicalBackend<S: DirStore> {
    store: S,
    nodes: Arc<NodeTable>,
    /// Node id → backing reference.
    refs: scc::HashMap<NodeId, EntryRef<S::Dir, S::File>>,
    open: scc::HashMap<NodeId, OpenState<S::Handle>>,
    streams: scc::HashMap<StreamId, (NodeId, Arc<S::Handle>)>,
}

impl<S: DirStore> HierarchicalBackend<S> {
    /// Creates a backend over `store`, binding the arena's root to the
    /// store's root directory.
    pub async fn new(store: S, nodes: Arc<NodeTable>) -> Result<Self, FsError> {
        let root = store.root().await?;
        let refs = scc::HashMap::new();
        let _ = refs.insert(ROOT_NODE, EntryRef::<S::Dir, S::File>::Dir(root));
        Ok(Self {
            store,
            nodes,
            refs,
            open: scc::HashMap::new(),
            streams: scc::HashMap::new(),
        })
    }

    fn entry_ref(&self, node: NodeId) -> Option<EntryRef<S::Dir, S::File>> {
        self.refs.read(&node, |_, r| r.clone())
    }

    fn dir_ref(&self, node: NodeId) -> Result<S::Dir, FsError> {
        match self.entry_ref(node).ok_or(FsError::NotFound)? {
            EntryRef::Dir(d) => Ok(d),
            EntryRef::File(_) => Err(FsError::NotADirectory),
        }
    }

    fn file_ref(&self, node: NodeId) -> Result<S::File, FsError> {
        match self.entry_ref(node).ok_or(FsError::NotFound)? {
            EntryRef::File(f) => Ok(f),
            EntryRef::Dir(_) => Err(FsError::InvalidArgument),
        }
    }

    fn shared_handle(&self, node: NodeId) -> Option<Arc<S::Handle>> {
        self.open.read(&node, |_, st| Arc::clone(&st.handle))
    }

    /// Handle bound to `stream`, or bad-file-descriptor.
    fn bound_handle(&self, stream: StreamId) -> Result<Arc<S::Handle>, FsError> {
        self.streams
            .read(&stream, |_, (_, h)| Arc::clone(h))
            .ok_or(FsError::BadFileDescriptor)
    }

    /// Current stream refcount of `node`, if any stream has it open.
    #[doc(hidden)]
    #[must_use]
    pub fn stream_refcount(&self, node: NodeId) -> Option<u32> {
        self.open.read(&node, |_, st| st.refcount)
    }
}

#[async_trait]
impl<S: DirStore> NodeOps for HierarchicalBackend<S> {
    async fn getattr(&self, node: NodeId) -> Result<NodeAttr, FsError> {
        let snapshot = self.nodes.get(node).ok_or(FsError::NotFound)?;
        let size = match snapshot.kind {
            NodeKind::Directory => u64::from(BLOCK_SIZE),
            NodeKind::File => {
                if let Some(handle) = self.shared_handle(node) {
                    handle.len().await?
                } else {
                    // Opened solely for the size query; close it before
                    // surfacing either outcome.
                    let file = self.file_ref(node)?;
                    let handle = self.store.open(&file).await?;
                    let len = handle.len().await;
                    if let Err(e) = handle.close().await {
                        debug!(error = %e, node, "closing transient handle");
                    }
                    len?
                }
            }
            _ => 0,
        };
        Ok(NodeAttr::from_node(&snapshot, size))
    }

    async fn setattr(&self, node: NodeId, changes: AttrChanges) -> Result<(), FsError> {
        if self.nodes.kind_of(node).is_none() {
            return Err(FsError::NotFound);
        }
        if let Some(perms) = changes.perms {
            self.nodes.set_perms(node, perms);
        }
        if let Some(mtime) = changes.mtime {
            self.nodes.touch(node, mtime);
        }
        if let Some(size) = changes.size {
            let (handle, transient) = match self.shared_handle(node) {
                Some(h) => (h, false),
                None => {
                    let file = self.file_ref(node)?;
                    (Arc::new(self.store.open(&file).await?), true)
                }
            };
            let result = handle.set_len(size).await;
            if transient {
                if let Err(e) = handle.close().await {
                    debug!(error = %e, node, "closing transient handle");
                }
            }
            result?;
        }
        Ok(())
    }

    async fn lookup(&self, parent: NodeId, name: &str) -> Result<NodeId, FsError> {
        if let Some(existing) = self.nodes.child_of(parent, name) {
            return Ok(existing);
        }
        let dir = self.dir_ref(parent)?;
        let (kind, entry) = match self.store.dir(&dir, name, false).await {
            Ok(child) => (NodeKind::Directory, EntryRef::Dir(child)),
            Err(_) => match self.store.file(&dir, name, false).await {
                Ok(child) => (NodeKind::File, EntryRef::File(child)),
                Err(_) => return Err(FsError::NotFound),
            },
        };
        let id = self.nodes.insert(Some(parent), name, kind, NodePerms::ALL_RWX);
        let _ = self.refs.insert(id, entry);
        Ok(id)
    }

    async fn mknod(
        &self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        perms: NodePerms,
    ) -> Result<NodeId, FsError> {
        let dir = self.dir_ref(parent)?;
        let entry = match kind {
            NodeKind::Directory => EntryRef::Dir(self.store.dir(&dir, name, true).await?),
            NodeKind::File => EntryRef::File(self.store.file(&dir, name, true).await?),
            _ => return Err(FsError::InvalidArgument),
        };
        let id = self.nodes.insert(Some(parent), name, kind, perms);
        let _ = self.refs.insert(id, entry);
        Ok(id)
    }

    /// Delegates to the store's atomic move. All failure causes collapse
    /// into cross-device; the diagnostics distinguish them.
    #[instrument(level = "debug", skip(self))]
    async fn rename(
        &self,
        node: NodeId,
        new_parent: NodeId,
        new_name: &str,
    ) -> Result<(), FsError> {
        let Some(entry) = self.entry_ref(node) else {
            warn!(node, "rename failed: no backing reference for the source");
            return Err(FsError::CrossDevice);
        };
        let new_dir = match self.dir_ref(new_parent) {
            Ok(d) => d,
            Err(e) => {
                warn!(new_parent, error = %e, "rename failed: no backing reference for the destination directory");
                return Err(FsError::CrossDevice);
            }
        };
        match self.store.move_entry(&entry, &new_dir, new_name).await {
            Ok(()) => self.nodes.relink(node, new_parent, new_name),
            Err(e) => {
                match &e {
                    StoreError::InvalidState | StoreError::Busy => {
                        warn!(node, "rename failed: is the source currently open?");
                    }
                    StoreError::Unsupported => {
                        warn!(node, "rename failed: store does not support moving entries");
                    }
                    other => warn!(node, error = %other, "rename failed"),
                }
                Err(FsError::CrossDevice)
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn unlink(&self, parent: NodeId, name: &str) -> Result<(), FsError> {
        let dir = self.dir_ref(parent)?;
        self.store.remove(&dir, name).await?;
        if let Some(child) = self.nodes.detach(parent, name) {
            let _ = self.refs.remove(&child);
            self.nodes.remove(child);
        }
        self.nodes.touch(parent, SystemTime::now());
        Ok(())
    }

    async fn rmdir(&self, parent: NodeId, name: &str) -> Result<(), FsError> {
        let dir = self.dir_ref(parent)?;
        if let Err(remove_err) = self.store.remove(&dir, name).await {
            // Classify the failure: a populated directory is the expected
            // cause, anything else is an argument problem.
            return match self.store.dir(&dir, name, false).await {
                Ok(child) => {
                    if self.store.entries(&child).await?.is_empty() {
                        debug!(name, error = %remove_err, "rmdir failed on an empty directory");
                        Err(FsError::InvalidArgument)
                    } else {
                        Err(FsError::NotEmpty)
                    }
                }
                Err(StoreError::NotFound) => Err(FsError::NotFound),
                Err(e) => Err(e.into()),
            };
        }
        if let Some(child) = self.nodes.detach(parent, name) {
            let _ = self.refs.remove(&child);
            self.nodes.remove(child);
        }
        self.nodes.touch(parent, SystemTime::now());
        Ok(())
    }

    async fn readdir(&self, node: NodeId) -> Result<Vec<String>, FsError> {
        let dir = self.dir_ref(node)?;
        let mut entries = vec![".".to_owned(), "..".to_owned()];
        for (name, _) in self.store.entries(&dir).await? {
            entries.push(name);
        }
        Ok(entries)
    }
}

#[async_trait]
impl<S: DirStore> StreamOps for HierarchicalBackend<S> {
    async fn open(&self, stream: &mut Stream) -> Result<(), FsError> {
        let node = stream.node;
        match self.nodes.kind_of(node).ok_or(FsError::NotFound)? {
            NodeKind::Directory => return Ok(()),
            NodeKind::File => {}
            _ => return Err(FsError::NoSys),
        }

        // Fast path: some stream already holds the node open.
        if let Some(handle) = self.open.update(&node, |_, st| {
            st.refcount += 1;
            Arc::clone(&st.handle)
        }) {
            let _ = self.streams.insert(stream.id, (node, handle));
            return Ok(());
        }

        let file = self.file_ref(node)?;
        let opened = Arc::new(self.store.open(&file).await?);
        // A concurrent open may have won the race while ours was in
        // flight; only one handle may back the node, so the loser's is
        // discarded.
        let (bound, redundant) = match self.open.entry(node) {
            scc::hash_map::Entry::Occupied(mut occ) => {
                let st = occ.get_mut();
                st.refcount += 1;
                (Arc::clone(&st.handle), Some(opened))
            }
            scc::hash_map::Entry::Vacant(vac) => {
                vac.insert_entry(OpenState {
                    handle: Arc::clone(&opened),
                    refcount: 1,
                });
                (opened, None)
            }
        };
        if let Some(extra) = redundant {
            if let Err(e) = extra.close().await {
                debug!(error = %e, node, "closing redundant handle");
            }
        }
        let _ = self.streams.insert(stream.id, (node, bound));
        Ok(())
    }

    async fn close(&self, stream: &mut Stream) -> Result<(), FsError> {
        let node = stream.node;
        // The node may already be gone from the arena (unlinked while
        // open); the stream's binding still has to be released.
        match self.nodes.kind_of(node) {
            Some(NodeKind::Directory) => return Ok(()),
            Some(NodeKind::File) | None => {}
            Some(_) => return Err(FsError::NoSys),
        }

        if self.streams.remove(&stream.id).is_none() {
            return Err(FsError::BadFileDescriptor);
        }

        let last = self
            .open
            .update(&node, |_, st| {
                st.refcount -= 1;
                (st.refcount == 0).then(|| Arc::clone(&st.handle))
            })
            .flatten();
        if let Some(handle) = last {
            let _ = self.open.remove_if(&node, |st| st.refcount == 0);
            handle.close().await?;
        }
        Ok(())
    }

    async fn fsync(&self, stream: &Stream) -> Result<(), FsError> {
        let handle = self.bound_handle(stream.id)?;
        handle.flush().await?;
        Ok(())
    }

    async fn read(&self, stream: &Stream, position: u64, size: u32) -> Result<Bytes, FsError> {
        let handle = self.bound_handle(stream.id)?;
        let mut buf = vec![0u8; size as usize];
        let n = handle.read(&mut buf, position).await?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn write(&self, stream: &Stream, position: u64, data: &[u8]) -> Result<usize, FsError> {
        let handle = self.bound_handle(stream.id)?;
        self.nodes.touch(stream.node, SystemTime::now());
        Ok(handle.write(data, position).await?)
    }

    async fn llseek(
        &self,
        stream: &mut Stream,
        offset: i64,
        whence: Whence,
    ) -> Result<u64, FsError> {
        let end = if whence == Whence::End {
            match self.nodes.kind_of(stream.node).ok_or(FsError::NotFound)? {
                NodeKind::File => self.bound_handle(stream.id)?.len().await?,
                _ => 0,
            }
        } else {
            0
        };
        let position = seek_position(offset, whence, stream.position, end)?;
        stream.position = position;
        Ok(position)
    }
}
