//! Adapter for stores that expose only a flat namespace of named files.
//!
//! The store has no directories, so the full (lower-cased) path of every
//! file is encoded into its stored name via [`codec`] and hierarchy is
//! reconstructed by prefix listing. Directories exist only in the node
//! arena; creating or removing one never touches the store. Open handles
//! are shared per path through a [`handle_cache::HandleCache`], with the
//! reference count kept on the owning node.

pub mod codec;
pub mod handle_cache;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::error::FsError;
use crate::fs::node_table::NodeTable;
use crate::fs::ops::{NodeOps, StreamOps};
use crate::fs::{
    AttrChanges, BLOCK_SIZE, NodeAttr, NodeId, NodeKind, NodePerms, OpenState, Stream, StreamId,
    Whence, seek_position,
};
use crate::store::{FlatStore, StoreError, StoreHandle as _};
use handle_cache::HandleCache;

/// Capacity requested from the store when a write or truncate is
/// rejected for quota, before the single retry.
const CAPACITY_STEP: u64 = 2 * 1024 * 1024 * 1024;

/// Backend over a [`FlatStore`], emulating a case-insensitive hierarchy.
pub struct FlatBackend<S: FlatStore> {
    store: S,
    nodes: Arc<NodeTable>,
    handles: HandleCache<S::Handle>,
    open: scc::HashMap<NodeId, OpenState<S::Handle>>,
    streams: scc::HashMap<StreamId, (NodeId, Arc<S::Handle>)>,
}

/// Appends a trailing separator so prefix matches cannot cross a path
/// component boundary.
fn directory_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

impl<S: FlatStore> FlatBackend<S> {
    /// Creates a backend over `store`, sharing the given node arena.
    #[must_use]
    pub fn new(store: S, nodes: Arc<NodeTable>) -> Self {
        Self {
            store,
            nodes,
            handles: HandleCache::new(),
            open: scc::HashMap::new(),
            streams: scc::HashMap::new(),
        }
    }

    /// Lower-cased absolute path of `node`. The emulated filesystem is
    /// case-insensitive, so every store interaction goes through the
    /// lower-cased form.
    fn node_path(&self, node: NodeId) -> Result<String, FsError> {
        self.nodes
            .path_of(node)
            .map(|p| p.to_lowercase())
            .ok_or(FsError::NotFound)
    }

    /// Encodes `path` for the store, diagnosing oversized tokens.
    fn encoded(&self, path: &str, op: &str) -> String {
        let token = codec::encode(path);
        if token.len() > codec::MAX_TOKEN_LEN {
            warn!(op, path, token_len = token.len(), "encoded path may exceed the store's name cap");
        }
        token
    }

    /// Decoded paths of every stored entry under `dir_path` (which must
    /// end with `/`). Prefix matching happens on encoded names; the
    /// codec is prefix-preserving, so this equals matching on decoded
    /// paths.
    async fn list_prefix(&self, dir_path: &str) -> Result<Vec<String>, FsError> {
        let prefix = codec::encode(dir_path);
        let names = self.store.list().await?;
        let mut out = Vec::new();
        for name in names {
            if !name.starts_with(&prefix) {
                continue;
            }
            match codec::decode(&name) {
                Some(path) => out.push(path),
                None => warn!(%name, "skipping undecodable store entry"),
            }
        }
        Ok(out)
    }

    /// The handle currently backing `node`, if any stream has it open or
    /// the cache still holds its path.
    fn cached_handle(&self, node: NodeId, path: &str) -> Option<Arc<S::Handle>> {
        self.open
            .read(&node, |_, st| Arc::clone(&st.handle))
            .or_else(|| self.handles.get(path))
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

    /// Whether the handle cache holds an open handle for `path`.
    #[doc(hidden)]
    #[must_use]
    pub fn has_cached_handle(&self, path: &str) -> bool {
        self.handles.contains(&path.to_lowercase())
    }
}

#[async_trait]
impl<S: FlatStore> NodeOps for FlatBackend<S> {
    async fn getattr(&self, node: NodeId) -> Result<NodeAttr, FsError> {
        let snapshot = self.nodes.get(node).ok_or(FsError::NotFound)?;
        let size = match snapshot.kind {
            NodeKind::Directory => u64::from(BLOCK_SIZE),
            NodeKind::File => {
                let path = self.node_path(node)?;
                if let Some(handle) = self.cached_handle(node, &path) {
                    handle.len().await?
                } else {
                    let token = self.encoded(&path, "getattr");
                    match self.store.open(&token).await {
                        Ok(handle) => {
                            // Opened solely for the size query; close it
                            // before surfacing either outcome.
                            let len = handle.len().await;
                            if let Err(e) = handle.close().await {
                                debug!(error = %e, %path, "closing transient handle");
                            }
                            len?
                        }
                        Err(StoreError::NotFound) => 0,
                        Err(e) => return Err(e.into()),
                    }
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
            let path = self.node_path(node)?;
            let (handle, transient) = match self.cached_handle(node, &path) {
                Some(h) => (h, false),
                None => {
                    // Changing a file's length requires an open handle;
                    // open one for just this call.
                    let token = self.encoded(&path, "setattr");
                    (Arc::new(self.store.open(&token).await?), true)
                }
            };
            let mut result = handle.set_len(size).await;
            if matches!(result, Err(StoreError::QuotaExceeded)) {
                self.store.request_capacity(CAPACITY_STEP).await?;
                result = handle.set_len(size).await;
            }
            if transient {
                if let Err(e) = handle.close().await {
                    debug!(error = %e, %path, "closing transient handle");
                }
            }
            result?;
        }
        Ok(())
    }

    async fn lookup(&self, parent: NodeId, name: &str) -> Result<NodeId, FsError> {
        let name = name.to_lowercase();
        if let Some(existing) = self.nodes.child_of(parent, &name) {
            return Ok(existing);
        }

        let parent_path = directory_path(&self.node_path(parent)?);
        let children = self.list_prefix(&parent_path).await?;

        let subdir_prefix = format!("{name}/");
        let mut kind = None;
        for child in &children {
            let rest = &child[parent_path.len()..];
            if rest == name {
                kind = Some(NodeKind::File);
                break;
            }
            if rest.starts_with(&subdir_prefix) {
                kind = Some(NodeKind::Directory);
                break;
            }
        }
        let kind = kind.ok_or(FsError::NotFound)?;

        Ok(self.nodes.insert(Some(parent), &name, kind, NodePerms::ALL_RWX))
    }

    async fn mknod(
        &self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        perms: NodePerms,
    ) -> Result<NodeId, FsError> {
        if !matches!(kind, NodeKind::File | NodeKind::Directory) {
            return Err(FsError::InvalidArgument);
        }
        match self.nodes.kind_of(parent) {
            Some(NodeKind::Directory) => {}
            Some(_) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        }
        // The store only materializes files on first open; directories
        // are never stored at all. Creation is purely an arena affair.
        Ok(self
            .nodes
            .insert(Some(parent), &name.to_lowercase(), kind, perms))
    }

    #[instrument(level = "debug", skip(self))]
    async fn rename(
        &self,
        node: NodeId,
        new_parent: NodeId,
        new_name: &str,
    ) -> Result<(), FsError> {
        let new_name = new_name.to_lowercase();
        let old_path = self.node_path(node)?;
        let encoded_old = self.encoded(&old_path, "rename");

        // Close and evict the source's cached handle before the store
        // rename; the store refuses to move open files. The node's open
        // state is parked so it can be restored under the new path.
        let mut source_was_open = false;
        if let Some(handle) = self.handles.take(&old_path) {
            handle.close().await?;
            source_was_open = true;
        }
        let parked_refcount = self.open.remove(&node).map(|(_, st)| st.refcount);

        self.nodes.relink(node, new_parent, &new_name)?;
        let new_path = self.node_path(node)?;
        let encoded_new = self.encoded(&new_path, "rename");

        let stored = self.store.list().await?;

        // A pre-existing destination is replaced: close its cached
        // handle, then delete the entry.
        if stored.iter().any(|n| *n == encoded_new) {
            if let Some(handle) = self.handles.take(&new_path) {
                warn!(path = %new_path, "renaming over a file with an open handle");
                handle.close().await?;
            }
            self.store.delete(&encoded_new).await?;
        }

        // Directories and files that were never written have no stored
        // entry; for those the in-memory relink is the whole rename.
        if stored.iter().any(|n| *n == encoded_old) {
            self.store.rename(&encoded_old, &encoded_new).await?;
        }

        if source_was_open {
            let reopened = Arc::new(self.store.open(&encoded_new).await?);
            self.handles.insert(&new_path, Arc::clone(&reopened));
            let _ = self.open.insert(
                node,
                OpenState {
                    handle: Arc::clone(&reopened),
                    refcount: parked_refcount.unwrap_or(1),
                },
            );
            // Repoint every live stream of this node at the new handle.
            let mut bound = Vec::new();
            self.streams.scan(|sid, (nid, _)| {
                if *nid == node {
                    bound.push(*sid);
                }
            });
            for sid in bound {
                self.streams
                    .update(&sid, |_, entry| entry.1 = Arc::clone(&reopened));
            }
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn unlink(&self, parent: NodeId, name: &str) -> Result<(), FsError> {
        let name = name.to_lowercase();
        let parent_path = directory_path(&self.node_path(parent)?);
        let path = format!("{parent_path}{name}");
        let token = self.encoded(&path, "unlink");
        match self.store.delete(&token).await {
            Ok(()) => {}
            Err(StoreError::Busy) => {
                warn!(%path, "cannot unlink a file with an open handle");
                return Err(FsError::Busy);
            }
            // Never-written files have no stored entry to delete.
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(child) = self.nodes.detach(parent, &name) {
            self.nodes.remove(child);
        }
        Ok(())
    }

    async fn rmdir(&self, parent: NodeId, name: &str) -> Result<(), FsError> {
        let name = name.to_lowercase();
        let parent_path = directory_path(&self.node_path(parent)?);
        let dir_path = directory_path(&format!("{parent_path}{name}"));
        if !self.list_prefix(&dir_path).await?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        // Stored entries are not the only possible children: a file
        // created but never written exists solely in the arena.
        if let Some(dir) = self.nodes.child_of(parent, &name) {
            if self.nodes.has_children(dir) {
                return Err(FsError::NotEmpty);
            }
            self.nodes.detach(parent, &name);
            self.nodes.remove(dir);
        }
        // The store never holds directories, so there is nothing else to
        // remove.
        Ok(())
    }

    async fn readdir(&self, node: NodeId) -> Result<Vec<String>, FsError> {
        if self.nodes.kind_of(node).ok_or(FsError::NotFound)? != NodeKind::Directory {
            return Err(FsError::NotADirectory);
        }
        let dir_path = directory_path(&self.node_path(node)?);
        let mut names = BTreeSet::new();
        for child in self.list_prefix(&dir_path).await? {
            let rest = &child[dir_path.len()..];
            let first = rest.split('/').next().unwrap_or(rest);
            if !first.is_empty() {
                names.insert(first.to_owned());
            }
        }
        // Arena-only children (unwritten files, empty directories) are
        // invisible to the store listing.
        for name in self.nodes.children_of(node) {
            names.insert(name);
        }
        let mut entries = vec![".".to_owned(), "..".to_owned()];
        entries.extend(names);
        Ok(entries)
    }
}

#[async_trait]
impl<S: FlatStore> StreamOps for FlatBackend<S> {
    async fn open(&self, stream: &mut Stream) -> Result<(), FsError> {
        let node = stream.node;
        match self.nodes.kind_of(node).ok_or(FsError::NotFound)? {
            NodeKind::Directory => return Ok(()),
            NodeKind::File => {}
            _ => return Err(FsError::NoSys),
        }

        // Fast path: some stream already holds the node open.
        if let Some(handle) = self
            .open
            .update(&node, |_, st| {
                st.refcount += 1;
                Arc::clone(&st.handle)
            })
        {
            let _ = self.streams.insert(stream.id, (node, handle));
            return Ok(());
        }

        let path = self.node_path(node)?;
        let token = self.encoded(&path, "open");
        let store = &self.store;
        let handle = self
            .handles
            .acquire(&path, || async move { store.open(&token).await })
            .await?;

        match self.open.entry(node) {
            scc::hash_map::Entry::Occupied(mut occ) => occ.get_mut().refcount += 1,
            scc::hash_map::Entry::Vacant(vac) => {
                vac.insert_entry(OpenState {
                    handle: Arc::clone(&handle),
                    refcount: 1,
                });
            }
        }
        let _ = self.streams.insert(stream.id, (node, handle));
        Ok(())
    }

    async fn close(&self, stream: &mut Stream) -> Result<(), FsError> {
        let node = stream.node;
        match self.nodes.kind_of(node).ok_or(FsError::NotFound)? {
            NodeKind::Directory => return Ok(()),
            NodeKind::File => {}
            _ => return Err(FsError::NoSys),
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
            let path = self.node_path(node)?;
            let _ = self.handles.take(&path);
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
        let mut result = handle.write(data, position).await;
        if matches!(result, Err(StoreError::QuotaExceeded)) {
            self.store.request_capacity(CAPACITY_STEP).await?;
            result = handle.write(data, position).await;
        }
        Ok(result?)
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
