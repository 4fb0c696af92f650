//! A hierarchical store over the host filesystem.
//!
//! References are path-based: each [`LocalRef`] wraps a shared path that
//! [`move_entry`](DirStore::move_entry) rewrites in place, so a moved
//! entry's reference keeps designating it, the way a real handle-based
//! store behaves. The one divergence from such a store: moving a
//! directory does not rewrite the paths of references previously handed
//! out for its descendants.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};

use crate::store::{DirStore, EntryKind, EntryRef, StoreError, StoreHandle};

fn map_io(e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound
    } else {
        StoreError::Io(e)
    }
}

/// A shared, rewritable path standing in for a store reference.
#[derive(Debug, Clone)]
pub struct LocalRef(Arc<Mutex<PathBuf>>);

impl LocalRef {
    fn new(path: PathBuf) -> Self {
        Self(Arc::new(Mutex::new(path)))
    }

    fn path(&self) -> PathBuf {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_path(&self, path: PathBuf) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = path;
    }
}

/// [`DirStore`] implementation over a directory of the host filesystem.
pub struct LocalDirStore {
    base: PathBuf,
}

impl LocalDirStore {
    /// Creates a store rooted at `base`. The directory must already
    /// exist.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl DirStore for LocalDirStore {
    type Dir = LocalRef;
    type File = LocalRef;
    type Handle = LocalHandle;

    async fn root(&self) -> Result<Self::Dir, StoreError> {
        let meta = tokio::fs::metadata(&self.base).await.map_err(map_io)?;
        if !meta.is_dir() {
            return Err(StoreError::NotFound);
        }
        Ok(LocalRef::new(self.base.clone()))
    }

    async fn dir(
        &self,
        parent: &Self::Dir,
        name: &str,
        create: bool,
    ) -> Result<Self::Dir, StoreError> {
        let path = parent.path().join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(LocalRef::new(path)),
            Ok(_) => Err(StoreError::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create => {
                tokio::fs::create_dir(&path).await.map_err(map_io)?;
                Ok(LocalRef::new(path))
            }
            Err(e) => Err(map_io(e)),
        }
    }

    async fn file(
        &self,
        parent: &Self::Dir,
        name: &str,
        create: bool,
    ) -> Result<Self::File, StoreError> {
        let path = parent.path().join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(LocalRef::new(path)),
            Ok(_) => Err(StoreError::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create => {
                drop(
                    tokio::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&path)
                        .await
                        .map_err(map_io)?,
                );
                Ok(LocalRef::new(path))
            }
            Err(e) => Err(map_io(e)),
        }
    }

    async fn open(&self, file: &Self::File) -> Result<Self::Handle, StoreError> {
        let handle = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(file.path())
            .await
            .map_err(map_io)?;
        Ok(LocalHandle {
            file: tokio::sync::Mutex::new(handle),
        })
    }

    async fn remove(&self, parent: &Self::Dir, name: &str) -> Result<(), StoreError> {
        let path = parent.path().join(name);
        let meta = tokio::fs::metadata(&path).await.map_err(map_io)?;
        if meta.is_dir() {
            tokio::fs::remove_dir(&path).await.map_err(map_io)
        } else {
            tokio::fs::remove_file(&path).await.map_err(map_io)
        }
    }

    async fn move_entry(
        &self,
        entry: &EntryRef<Self::Dir, Self::File>,
        new_parent: &Self::Dir,
        new_name: &str,
    ) -> Result<(), StoreError> {
        let source = match entry {
            EntryRef::Dir(d) => d,
            EntryRef::File(f) => f,
        };
        let old_path = source.path();
        let new_path = new_parent.path().join(new_name);
        tokio::fs::rename(&old_path, &new_path)
            .await
            .map_err(map_io)?;
        source.set_path(new_path);
        Ok(())
    }

    async fn entries(&self, dir: &Self::Dir) -> Result<Vec<(String, EntryKind)>, StoreError> {
        let mut read_dir = tokio::fs::read_dir(dir.path()).await.map_err(map_io)?;
        let mut out = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(map_io)? {
            let kind = if entry.file_type().await.map_err(map_io)?.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            out.push((entry.file_name().to_string_lossy().into_owned(), kind));
        }
        Ok(out)
    }
}

/// Open handle over a [`tokio::fs::File`], serialized through a mutex
/// because positional access is seek-then-read on the host filesystem.
pub struct LocalHandle {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

#[async_trait]
impl StoreHandle for LocalHandle {
    async fn read(&self, buf: &mut [u8], at: u64) -> Result<usize, StoreError> {
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(at)).await?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn write(&self, data: &[u8], at: u64) -> Result<usize, StoreError> {
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(at)).await?;
        file.write_all(data).await?;
        Ok(data.len())
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let file = self.file.lock().await;
        Ok(file.metadata().await?.len())
    }

    async fn set_len(&self, size: u64) -> Result<(), StoreError> {
        let file = self.file.lock().await;
        file.set_len(size).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let file = self.file.lock().await;
        file.sync_all().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        Ok(())
    }
}
