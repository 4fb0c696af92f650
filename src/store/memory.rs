//! An in-memory flat store with an explicit capacity quota.
//!
//! Behaves like the restricted object stores the flat backend targets:
//! names are opaque, files are created on first open, open names refuse
//! deletion and renaming, and growth beyond the granted capacity fails
//! until the caller requests more. Operation counters make the store
//! convenient to assert against in tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::store::{FlatStore, StoreError, StoreHandle};

#[derive(Debug)]
struct MemFile {
    data: Mutex<Vec<u8>>,
}

#[derive(Debug)]
struct Shared {
    files: scc::HashMap<String, Arc<MemFile>>,
    /// Name → number of open handles. Present only while positive.
    open_names: scc::HashMap<String, usize>,
    granted: AtomicU64,
    /// Hard ceiling on `granted`; capacity requests cannot raise the
    /// grant past it.
    limit: AtomicU64,
    used: AtomicU64,
    open_count: AtomicUsize,
    capacity_requests: AtomicUsize,
}

impl Shared {
    /// Reserves `delta` bytes against the quota.
    fn reserve(&self, delta: u64) -> Result<(), StoreError> {
        let used = self.used.load(Ordering::Relaxed);
        if used.saturating_add(delta) > self.granted.load(Ordering::Relaxed) {
            return Err(StoreError::QuotaExceeded);
        }
        self.used.fetch_add(delta, Ordering::Relaxed);
        Ok(())
    }

    fn release(&self, delta: u64) {
        self.used.fetch_sub(delta, Ordering::Relaxed);
    }
}

/// In-memory [`FlatStore`] with a byte quota.
#[derive(Clone)]
pub struct MemFlatStore {
    inner: Arc<Shared>,
}

impl MemFlatStore {
    /// Creates a store with `capacity` bytes granted up front and no
    /// ceiling on further grants.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self::with_limit(capacity, u64::MAX)
    }

    /// Creates a store whose grant can never exceed `limit`, regardless
    /// of how much capacity is requested.
    #[must_use]
    pub fn with_limit(capacity: u64, limit: u64) -> Self {
        Self {
            inner: Arc::new(Shared {
                files: scc::HashMap::new(),
                open_names: scc::HashMap::new(),
                granted: AtomicU64::new(capacity.min(limit)),
                limit: AtomicU64::new(limit),
                used: AtomicU64::new(0),
                open_count: AtomicUsize::new(0),
                capacity_requests: AtomicUsize::new(0),
            }),
        }
    }

    /// Total number of `open` calls served so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::Relaxed)
    }

    /// Number of `request_capacity` calls served so far.
    #[must_use]
    pub fn capacity_requests(&self) -> usize {
        self.inner.capacity_requests.load(Ordering::Relaxed)
    }

    /// Whether the store currently holds `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.files.read(name, |_, _| ()).is_some()
    }

    /// Whether `name` currently has at least one open handle.
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.inner.open_names.read(name, |_, _| ()).is_some()
    }

    /// The raw bytes stored under `name`, if present.
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<Vec<u8>> {
        self.inner
            .files
            .read(name, |_, f| f.data.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// Handle to a [`MemFlatStore`] file.
#[derive(Debug)]
pub struct MemFlatHandle {
    name: String,
    file: Arc<MemFile>,
    shared: Arc<Shared>,
}

fn lock_data(file: &MemFile) -> std::sync::MutexGuard<'_, Vec<u8>> {
    file.data.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl StoreHandle for MemFlatHandle {
    async fn read(&self, buf: &mut [u8], at: u64) -> Result<usize, StoreError> {
        let data = lock_data(&self.file);
        let start = usize::try_from(at).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(buf.len()).min(data.len());
        let n = end - start;
        buf[..n].copy_from_slice(&data[start..end]);
        Ok(n)
    }

    async fn write(&self, data: &[u8], at: u64) -> Result<usize, StoreError> {
        let end = at
            .checked_add(data.len() as u64)
            .ok_or(StoreError::InvalidState)?;
        let mut bytes = lock_data(&self.file);
        let cur = bytes.len() as u64;
        if end > cur {
            self.shared.reserve(end - cur)?;
            bytes.resize(usize::try_from(end).map_err(|_| StoreError::QuotaExceeded)?, 0);
        }
        let at = usize::try_from(at).map_err(|_| StoreError::InvalidState)?;
        bytes[at..at + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        Ok(lock_data(&self.file).len() as u64)
    }

    async fn set_len(&self, size: u64) -> Result<(), StoreError> {
        let mut bytes = lock_data(&self.file);
        let cur = bytes.len() as u64;
        if size > cur {
            self.shared.reserve(size - cur)?;
        } else {
            self.shared.release(cur - size);
        }
        bytes.resize(usize::try_from(size).map_err(|_| StoreError::QuotaExceeded)?, 0);
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        // Nothing buffered; flush is a formality here.
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let removed = self
            .shared
            .open_names
            .update(&self.name, |_, count| {
                *count -= 1;
                *count == 0
            })
            .unwrap_or(false);
        if removed {
            let _ = self
                .shared
                .open_names
                .remove_if(&self.name, |count| *count == 0);
        }
        Ok(())
    }
}

#[async_trait]
impl FlatStore for MemFlatStore {
    type Handle = MemFlatHandle;

    async fn open(&self, name: &str) -> Result<Self::Handle, StoreError> {
        let file = match self.inner.files.entry(name.to_owned()) {
            scc::hash_map::Entry::Occupied(occ) => Arc::clone(occ.get()),
            scc::hash_map::Entry::Vacant(vac) => {
                let file = Arc::new(MemFile {
                    data: Mutex::new(Vec::new()),
                });
                vac.insert_entry(Arc::clone(&file));
                file
            }
        };
        match self.inner.open_names.entry(name.to_owned()) {
            scc::hash_map::Entry::Occupied(mut occ) => *occ.get_mut() += 1,
            scc::hash_map::Entry::Vacant(vac) => {
                vac.insert_entry(1);
            }
        }
        self.inner.open_count.fetch_add(1, Ordering::Relaxed);
        Ok(MemFlatHandle {
            name: name.to_owned(),
            file,
            shared: Arc::clone(&self.inner),
        })
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        if self.inner.open_names.read(name, |_, _| ()).is_some() {
            return Err(StoreError::Busy);
        }
        let (_, file) = self
            .inner
            .files
            .remove(name)
            .ok_or(StoreError::NotFound)?;
        self.inner.release(lock_data(&file).len() as u64);
        Ok(())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<(), StoreError> {
        if self.inner.open_names.read(old, |_, _| ()).is_some()
            || self.inner.open_names.read(new, |_, _| ()).is_some() {
            return Err(StoreError::Busy);
        }
        let (_, file) = self
            .inner
            .files
            .remove(old)
            .ok_or(StoreError::NotFound)?;
        if let Some((_, displaced)) = self.inner.files.remove(new) {
            self.inner.release(lock_data(&displaced).len() as u64);
        }
        let _ = self.inner.files.insert(new.to_owned(), file);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        self.inner.files.scan(|name, _| {
            names.push(name.clone());
        });
        names.sort();
        Ok(names)
    }

    async fn request_capacity(&self, bytes: u64) -> Result<u64, StoreError> {
        self.inner.capacity_requests.fetch_add(1, Ordering::Relaxed);
        let limit = self.inner.limit.load(Ordering::Relaxed);
        let granted = self
            .inner
            .granted
            .load(Ordering::Relaxed)
            .saturating_add(bytes)
            .min(limit);
        self.inner.granted.store(granted, Ordering::Relaxed);
        Ok(granted)
    }
}
