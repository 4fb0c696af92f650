//! Deduplicating path → open-handle cache for the flat backend.
//!
//! The backing store's opens are asynchronous, so two concurrent opens of
//! one path could otherwise race and produce two live handles. Each
//! cached path owns a per-path cell; concurrent acquirers serialize on
//! it, so at most one store open is in flight per path and at most one
//! open handle exists per path system-wide. All streams of a path share
//! that handle.
//!
//! Reference counts are deliberately *not* kept here — they live on the
//! owning node's open state. The cache only answers "which handle backs
//! this path". Entries must only be taken or reseeded by the operation
//! sequence that owns the path (the open that created the entry, or the
//! close/rename/delete retiring it); there is no cross-path ordering.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::store::StoreError;

/// Path → shared open handle, with per-path open deduplication.
pub struct HandleCache<H> {
    map: scc::HashMap<String, Arc<OnceCell<Arc<H>>>>,
}

impl<H> Default for HandleCache<H> {
    fn default() -> Self {
        Self {
            map: scc::HashMap::new(),
        }
    }
}

impl<H: Send + Sync + 'static> HandleCache<H> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open handle for `path`, running `open_fn` if none
    /// exists yet.
    ///
    /// Concurrent acquires of the same path serialize on the path's
    /// cell: exactly one caller runs `open_fn`, the rest await its
    /// outcome. A failed open caches nothing, so the next acquire
    /// retries.
    pub async fn acquire<F, Fut>(&self, path: &str, open_fn: F) -> Result<Arc<H>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, StoreError>>,
    {
        let cell = match self.map.entry(path.to_owned()) {
            scc::hash_map::Entry::Occupied(occ) => Arc::clone(occ.get()),
            scc::hash_map::Entry::Vacant(vac) => {
                let cell = Arc::new(OnceCell::new());
                vac.insert_entry(Arc::clone(&cell));
                cell
            }
        };
        let handle = cell
            .get_or_try_init(|| async move { Ok::<Arc<H>, StoreError>(Arc::new(open_fn().await?)) })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Returns the cached handle for `path` without opening anything.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<H>> {
        self.map
            .read(path, |_, cell| cell.get().cloned())
            .flatten()
    }

    /// Evicts `path`, returning the handle so the caller can close it.
    pub fn take(&self, path: &str) -> Option<Arc<H>> {
        self.map
            .remove(path)
            .and_then(|(_, cell)| cell.get().cloned())
    }

    /// Seeds `path` with an already-open handle, replacing any entry.
    ///
    /// Used when a rename reopens the source under its new path.
    pub fn insert(&self, path: &str, handle: Arc<H>) {
        let _ = self.map.remove(path);
        let _ = self
            .map
            .insert(path.to_owned(), Arc::new(OnceCell::new_with(Some(handle))));
    }

    /// Whether an open handle is cached for `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Number of cached entries, counting in-flight opens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
