//! Capability traits for the asynchronous backing stores.
//!
//! The backends in [`crate::fs`] are written against these traits, never
//! against a concrete store. Everything here is asynchronous and
//! handle-based: a store hands out opaque references and open handles,
//! and offers no POSIX semantics of its own.

/// Hierarchical store over the host filesystem.
pub mod local;
/// In-memory flat store with a capacity quota.
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a backing store.
///
/// The recognizable causes are enumerated so adapters can fold them into
/// the filesystem error taxonomy; anything else travels in
/// [`Io`](Self::Io) and passes through the adapters unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry not found")]
    NotFound,

    #[error("storage capacity exceeded")]
    QuotaExceeded,

    #[error("entry is open and cannot be modified")]
    Busy,

    #[error("handle is in a state the store cannot operate on")]
    InvalidState,

    #[error("operation not supported by this store")]
    Unsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An open, byte-addressable handle to a stored file.
///
/// All reads and writes are positional; the handle keeps no cursor.
#[async_trait]
pub trait StoreHandle: Send + Sync + 'static {
    /// Reads into `buf` starting at byte `at`, returning the number of
    /// bytes read. Short reads past end-of-file are not an error.
    async fn read(&self, buf: &mut [u8], at: u64) -> Result<usize, StoreError>;

    /// Writes `data` starting at byte `at`, returning the number of bytes
    /// written.
    async fn write(&self, data: &[u8], at: u64) -> Result<usize, StoreError>;

    /// Current length of the file in bytes.
    async fn len(&self) -> Result<u64, StoreError>;

    /// Truncates or zero-extends the file to `size` bytes.
    async fn set_len(&self, size: u64) -> Result<(), StoreError>;

    /// Flushes pending writes. A no-op for stores without a flush
    /// primitive.
    async fn flush(&self) -> Result<(), StoreError>;

    /// Closes the handle. Further operations on it are undefined.
    async fn close(&self) -> Result<(), StoreError>;
}

/// The kind of an entry yielded by [`DirStore::entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A file entry.
    File,
    /// A directory entry.
    Directory,
}

/// A backing reference to either kind of entry in a hierarchical store.
#[derive(Debug, Clone)]
pub enum EntryRef<D, F> {
    /// Reference to a directory.
    Dir(D),
    /// Reference to a file.
    File(F),
}

/// A store with native directory/file references and hierarchical
/// move/delete primitives.
#[async_trait]
pub trait DirStore: Send + Sync + 'static {
    /// Opaque reference to a directory.
    type Dir: Clone + Send + Sync + 'static;
    /// Opaque reference to a file.
    type File: Clone + Send + Sync + 'static;
    /// Open handle type produced by [`open`](Self::open).
    type Handle: StoreHandle;

    /// Reference to the store's root directory.
    async fn root(&self) -> Result<Self::Dir, StoreError>;

    /// Resolves (or, with `create`, creates) a child directory.
    async fn dir(
        &self,
        parent: &Self::Dir,
        name: &str,
        create: bool,
    ) -> Result<Self::Dir, StoreError>;

    /// Resolves (or, with `create`, creates) a child file.
    async fn file(
        &self,
        parent: &Self::Dir,
        name: &str,
        create: bool,
    ) -> Result<Self::File, StoreError>;

    /// Opens a file reference for byte access.
    async fn open(&self, file: &Self::File) -> Result<Self::Handle, StoreError>;

    /// Removes the named child of `parent` (file, or empty directory).
    async fn remove(&self, parent: &Self::Dir, name: &str) -> Result<(), StoreError>;

    /// Atomically moves an entry under `new_parent` as `new_name`.
    ///
    /// The reference stays valid and designates the entry at its new
    /// location.
    async fn move_entry(
        &self,
        entry: &EntryRef<Self::Dir, Self::File>,
        new_parent: &Self::Dir,
        new_name: &str,
    ) -> Result<(), StoreError>;

    /// Lists the immediate children of a directory.
    async fn entries(&self, dir: &Self::Dir) -> Result<Vec<(String, EntryKind)>, StoreError>;
}

/// A store exposing only a flat set of named byte files.
///
/// Names are opaque to the store; hierarchy, if any, is the caller's
/// construction. Capacity is explicit: writes beyond the granted quota
/// fail with [`StoreError::QuotaExceeded`] until
/// [`request_capacity`](Self::request_capacity) raises the grant.
#[async_trait]
pub trait FlatStore: Send + Sync + 'static {
    /// Open handle type produced by [`open`](Self::open).
    type Handle: StoreHandle;

    /// Opens the named file, creating it empty if absent.
    async fn open(&self, name: &str) -> Result<Self::Handle, StoreError>;

    /// Deletes the named file. Fails with [`StoreError::Busy`] while the
    /// name has an open handle.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Atomically renames `old` to `new`, replacing any existing `new`.
    /// Fails with [`StoreError::Busy`] while either name has an open
    /// handle.
    async fn rename(&self, old: &str, new: &str) -> Result<(), StoreError>;

    /// Lists every stored name.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Requests `bytes` of additional capacity, returning the new total
    /// grant.
    async fn request_capacity(&self, bytes: u64) -> Result<u64, StoreError>;
}
