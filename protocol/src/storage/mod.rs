//! # Storage Module
//!
//! The one thing the client persists: block headers it has already proven.
//! Everything else (UTXOs, history, mempool) is asked of a full node each
//! time and proven on demand.
//!
//! Backed by sled. A store is opened from a path, or created in memory when
//! the node runs with `--dbfile 0`.

pub mod headers;

pub use headers::{HeaderStore, StoreError, StoreResult};
