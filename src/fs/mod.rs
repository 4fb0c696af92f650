//! Core node and stream types shared by every backend.

/// Adapter for stores exposing only a flat namespace of named byte files.
pub mod flat;
/// Adapter for stores with native directory/file handles.
pub mod hierarchical;
/// Id-addressed arena for the in-memory node tree.
pub mod node_table;
/// The node and stream operation contracts.
pub mod ops;

pub use node_table::{Node, NodeTable, ROOT_NODE};

use std::sync::Arc;
use std::time::SystemTime;

use bitflags::bitflags;

use crate::error::FsError;

/// Type representing a node identifier. Node 1 is the root.
pub type NodeId = u64;

/// Type representing an open stream identifier.
pub type StreamId = u64;

/// Block size reported for every node.
pub const BLOCK_SIZE: u32 = 4096;

bitflags! {
    /// Permission bits for a node, similar to Unix file permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodePerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Other: read, write, and execute.
        const OTHER_RWX = Self::OTHER_READ.bits()
            | Self::OTHER_WRITE.bits()
            | Self::OTHER_EXECUTE.bits();
        /// Group: read, write, and execute.
        const GROUP_RWX = Self::GROUP_READ.bits()
            | Self::GROUP_WRITE.bits()
            | Self::GROUP_EXECUTE.bits();
        /// Owner: read, write, and execute.
        const OWNER_RWX = Self::OWNER_READ.bits()
            | Self::OWNER_WRITE.bits()
            | Self::OWNER_EXECUTE.bits();

        /// Read, write, and execute for everyone (0o777).
        const ALL_RWX = Self::OWNER_RWX.bits()
            | Self::GROUP_RWX.bits()
            | Self::OTHER_RWX.bits();
    }
}

/// The type of a node in the virtual tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NodeKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A character device. Present in the tree model but not creatable
    /// through either backend.
    CharDevice,
}

/// Attributes of a node, as returned by `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    /// Device id. Reuses the node id for character devices.
    pub dev: u64,
    /// Node id.
    pub ino: NodeId,
    /// Node type.
    pub kind: NodeKind,
    /// Permission bits.
    pub perms: NodePerms,
    /// Link count. Always 1; hard links are not modeled.
    pub nlink: u32,
    /// Owner user id. Always 0.
    pub uid: u32,
    /// Owner group id. Always 0.
    pub gid: u32,
    /// Size in bytes. 4096 for directories, the backing length for files.
    pub size: u64,
    /// Last access time. Mirrors `mtime`.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Status change time. Mirrors `mtime`.
    pub ctime: SystemTime,
    /// Block size.
    pub blksize: u32,
    /// Number of `blksize` blocks covering `size`.
    pub blocks: u64,
}

impl NodeAttr {
    /// Builds the attribute record for `node` with a resolved byte size.
    pub(crate) fn from_node(node: &Node, size: u64) -> Self {
        let dev = match node.kind {
            NodeKind::CharDevice => node.id,
            _ => 1,
        };
        Self {
            dev,
            ino: node.id,
            kind: node.kind,
            perms: node.perms,
            nlink: 1,
            uid: 0,
            gid: 0,
            size,
            atime: node.mtime,
            mtime: node.mtime,
            ctime: node.mtime,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
        }
    }
}

/// Attribute fields applied by `setattr`. Absent fields are untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttrChanges {
    /// New permission bits.
    pub perms: Option<NodePerms>,
    /// New modification time.
    pub mtime: Option<SystemTime>,
    /// New file size; truncates or grows the backing file.
    pub size: Option<u64>,
}

/// Origin for a stream seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position.
    Set,
    /// Relative to the stream's current position.
    Current,
    /// Relative to the end of the backing file.
    End,
}

/// A transient open-file session bound to one node.
///
/// Created by [`NodeTable::new_stream`], destroyed by
/// [`ops::StreamOps::close`]. The byte position belongs to the stream;
/// the backing handle is owned by the node and shared between all
/// streams that have the node open.
#[derive(Debug, Clone)]
pub struct Stream {
    /// Unique identifier of this stream.
    pub id: StreamId,
    /// The node this stream is bound to.
    pub node: NodeId,
    /// Current byte position, maintained by `llseek`.
    pub position: u64,
}

/// Shared per-node open state. An entry exists iff at least one stream
/// has the node open, so the cached handle is present exactly when the
/// reference count is positive.
pub(crate) struct OpenState<H> {
    pub(crate) handle: Arc<H>,
    pub(crate) refcount: u32,
}

/// Resolves a seek request against the current position and, for
/// end-relative seeks, the backing size.
pub(crate) fn seek_position(
    offset: i64,
    whence: Whence,
    current: u64,
    end: u64,
) -> Result<u64, FsError> {
    let base = match whence {
        Whence::Set => 0,
        Whence::Current => i64::try_from(current).map_err(|_| FsError::InvalidArgument)?,
        Whence::End => i64::try_from(end).map_err(|_| FsError::InvalidArgument)?,
    };
    let position = base.checked_add(offset).ok_or(FsError::InvalidArgument)?;
    u64::try_from(position).map_err(|_| FsError::InvalidArgument)
}
