//! The node and stream operation contracts implemented by every backend.
//!
//! These two traits are the entire surface a dispatching filesystem core
//! depends on. All operations are asynchronous and may suspend at any
//! backing-store call; results are structured attribute records or raw
//! byte payloads, never backend-specific types.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FsError;
use crate::fs::{AttrChanges, NodeAttr, NodeId, NodeKind, NodePerms, Stream, Whence};

/// Operations on the nodes of the virtual tree.
#[async_trait]
pub trait NodeOps: Send + Sync {
    /// Returns the attribute record for `node`.
    ///
    /// Querying a regular file's size may open a transient backing handle;
    /// any handle opened solely for the query is closed before returning.
    async fn getattr(&self, node: NodeId) -> Result<NodeAttr, FsError>;

    /// Applies the present fields of `changes` to `node`.
    ///
    /// Mode and timestamp apply verbatim. A size change truncates or grows
    /// the backing file through a (possibly transient) handle.
    async fn setattr(&self, node: NodeId, changes: AttrChanges) -> Result<(), FsError>;

    /// Resolves a child of `parent` by name, entering it into the tree.
    async fn lookup(&self, parent: NodeId, name: &str) -> Result<NodeId, FsError>;

    /// Creates a new file or directory node under `parent`.
    ///
    /// New file nodes start with no cached handle and a zero stream
    /// refcount.
    async fn mknod(
        &self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        perms: NodePerms,
    ) -> Result<NodeId, FsError>;

    /// Moves `node` under `new_parent` as `new_name`.
    async fn rename(
        &self,
        node: NodeId,
        new_parent: NodeId,
        new_name: &str,
    ) -> Result<(), FsError>;

    /// Removes the named file under `parent`.
    async fn unlink(&self, parent: NodeId, name: &str) -> Result<(), FsError>;

    /// Removes the named directory under `parent`.
    ///
    /// Fails with [`FsError::NotEmpty`] while the directory still has
    /// children.
    async fn rmdir(&self, parent: NodeId, name: &str) -> Result<(), FsError>;

    /// Lists the entries of a directory, starting with `.` and `..`.
    async fn readdir(&self, node: NodeId) -> Result<Vec<String>, FsError>;

    /// Symbolic links are not supported by either backend.
    async fn symlink(
        &self,
        _parent: NodeId,
        _name: &str,
        _target: &str,
    ) -> Result<NodeId, FsError> {
        Err(FsError::Unsupported)
    }

    /// Symbolic links are not supported by either backend.
    async fn readlink(&self, _node: NodeId) -> Result<String, FsError> {
        Err(FsError::Unsupported)
    }
}

/// Operations on open streams.
#[async_trait]
pub trait StreamOps: Send + Sync {
    /// Binds `stream` to a backing handle.
    ///
    /// A no-op for directories. For files this reuses the node's cached
    /// handle when one exists (incrementing its refcount) and opens a new
    /// one otherwise.
    async fn open(&self, stream: &mut Stream) -> Result<(), FsError>;

    /// Releases the stream's binding.
    ///
    /// Decrements the node's refcount; at zero the backing handle is
    /// closed and the cached state cleared.
    async fn close(&self, stream: &mut Stream) -> Result<(), FsError>;

    /// Flushes pending writes on the stream's handle.
    ///
    /// Fails with [`FsError::BadFileDescriptor`] when no handle is bound.
    /// A no-op where the backing store has no flush primitive.
    async fn fsync(&self, stream: &Stream) -> Result<(), FsError>;

    /// Reads up to `size` bytes at absolute `position`, clamped to
    /// end-of-file without error.
    async fn read(&self, stream: &Stream, position: u64, size: u32) -> Result<Bytes, FsError>;

    /// Writes `data` at absolute `position`, returning the number of bytes
    /// written and refreshing the node's modification time.
    async fn write(&self, stream: &Stream, position: u64, data: &[u8]) -> Result<usize, FsError>;

    /// Repositions the stream, returning the new absolute position.
    ///
    /// Fails with [`FsError::InvalidArgument`] when the resulting position
    /// would be negative.
    async fn llseek(
        &self,
        stream: &mut Stream,
        offset: i64,
        whence: Whence,
    ) -> Result<u64, FsError>;

    /// Device control is not supported on any node.
    async fn ioctl(&self, _stream: &Stream) -> Result<(), FsError> {
        Err(FsError::NotATty)
    }

    /// Memory mapping is not supported by either backend.
    async fn mmap(&self, _stream: &Stream) -> Result<(), FsError> {
        Err(FsError::Unsupported)
    }

    /// Memory mapping is not supported by either backend.
    async fn msync(&self, _stream: &Stream) -> Result<(), FsError> {
        Err(FsError::Unsupported)
    }

    /// Memory mapping is not supported by either backend.
    async fn munmap(&self, _stream: &Stream) -> Result<(), FsError> {
        Err(FsError::Unsupported)
    }
}
