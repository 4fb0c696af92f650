#![allow(dead_code, missing_docs, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use storefs::fs::NodeTable;
use storefs::fs::flat::{FlatBackend, codec};
use storefs::store::memory::MemFlatStore;
use storefs::store::{FlatStore as _, StoreHandle as _};

/// Builds a flat backend over a fresh in-memory store and node arena.
pub fn flat_fixture(capacity: u64) -> (FlatBackend<MemFlatStore>, MemFlatStore, Arc<NodeTable>) {
    let store = MemFlatStore::new(capacity);
    let nodes = Arc::new(NodeTable::new());
    let backend = FlatBackend::new(store.clone(), Arc::clone(&nodes));
    (backend, store, nodes)
}

/// Like [`flat_fixture`], but the store's grant can never exceed `limit`.
pub fn flat_fixture_limited(
    capacity: u64,
    limit: u64,
) -> (FlatBackend<MemFlatStore>, MemFlatStore, Arc<NodeTable>) {
    let store = MemFlatStore::with_limit(capacity, limit);
    let nodes = Arc::new(NodeTable::new());
    let backend = FlatBackend::new(store.clone(), Arc::clone(&nodes));
    (backend, store, nodes)
}

/// Seeds the store with `data` under the encoded form of `path`,
/// bypassing the backend — simulates pre-existing store contents.
pub async fn seed_file(store: &MemFlatStore, path: &str, data: &[u8]) {
    let handle = store.open(&codec::encode(path)).await.unwrap();
    if !data.is_empty() {
        handle.write(data, 0).await.unwrap();
    }
    handle.close().await.unwrap();
}

/// The store-side bytes for `path`, if the entry exists.
pub fn stored_bytes(store: &MemFlatStore, path: &str) -> Option<Vec<u8>> {
    store.raw(&codec::encode(path))
}
