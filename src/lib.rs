//! A POSIX-like node/stream filesystem layer over pluggable, asynchronous,
//! handle-based backing stores.
//!
//! The crate adapts two structurally different kinds of storage to one
//! shared operation contract:
//!
//! - [`fs::hierarchical::HierarchicalBackend`] sits on a store with native
//!   directory/file handles and hierarchical move/delete
//!   ([`store::DirStore`]).
//! - [`fs::flat::FlatBackend`] sits on a store that only offers a flat
//!   namespace of named byte files ([`store::FlatStore`]), emulating a
//!   hierarchy by encoding full paths into the store's restricted name
//!   alphabet and sharing open handles through a per-path cache.
//!
//! Both backends implement [`fs::ops::NodeOps`] and [`fs::ops::StreamOps`];
//! a dispatching filesystem core depends only on those traits. The
//! in-memory tree lives in an id-addressed arena ([`fs::NodeTable`]) that
//! is passed to each backend explicitly, so independent instances never
//! share state.

pub mod error;
pub mod fs;
pub mod store;

pub use error::FsError;
