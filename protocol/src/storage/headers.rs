//! # Header Store
//!
//! Block headers the client has already proven, either through a verified
//! notarization bridge or by hashing to a notarized blockhash. Once a height
//! is here, `verifytx` for a transaction at that height only needs the
//! merkle branch.
//!
//! ## Tree Layout
//!
//! | Tree         | Key                 | Value                     |
//! |--------------|---------------------|---------------------------|
//! | `headers`    | `height` (4B BE)    | header, NSPV wire layout  |
//! | `by_hash`    | `hash` (32B)        | `height` (4B BE)          |
//!
//! Heights are big-endian so sled's key order is height order, and the tip
//! is simply the last key.

use std::path::Path;

use sled::{Batch, Db, Tree};
use tracing::debug;

use crate::codec::{Decode, Encode};
use crate::crypto::Bits256;
use crate::message::EquiHeader;
use crate::proof::VerifiedBridge;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("stored header at {height} is corrupt: {reason}")]
    Corrupt { height: i32, reason: String },

    #[error("negative height {0}")]
    NegativeHeight(i32),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn height_key(height: i32) -> StoreResult<[u8; 4]> {
    u32::try_from(height)
        .map(u32::to_be_bytes)
        .map_err(|_| StoreError::NegativeHeight(height))
}

fn key_height(bytes: &[u8]) -> Option<i32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    i32::try_from(u32::from_be_bytes(arr)).ok()
}

/// Persistent set of trusted headers. Cheap to clone; clones share the db.
#[derive(Debug, Clone)]
pub struct HeaderStore {
    db: Db,
    headers: Tree,
    by_hash: Tree,
}

impl HeaderStore {
    /// Opens or creates a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store, gone when the last clone drops.
    pub fn temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let headers = db.open_tree("headers")?;
        let by_hash = db.open_tree("by_hash")?;
        Ok(Self {
            db,
            headers,
            by_hash,
        })
    }

    /// Stores one header the caller has already checked.
    pub fn put_header(&self, height: i32, header: &EquiHeader) -> StoreResult<()> {
        let key = height_key(height)?;
        let bytes = header.encode().map_err(|e| StoreError::Corrupt {
            height,
            reason: e.to_string(),
        })?;
        self.headers.insert(key, bytes)?;
        self.by_hash.insert(header.hash().as_bytes(), &key)?;
        Ok(())
    }

    /// Stores every header a verified bridge proved. Returns how many.
    pub fn put_bridge(&self, bridge: &VerifiedBridge) -> StoreResult<usize> {
        let mut headers = Batch::default();
        let mut hashes = Batch::default();
        let mut count = 0;
        for (height, header) in bridge.headers() {
            let key = height_key(height)?;
            let bytes = header.encode().map_err(|e| StoreError::Corrupt {
                height,
                reason: e.to_string(),
            })?;
            headers.insert(&key, bytes);
            hashes.insert(header.hash().as_bytes(), &key);
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }
        self.headers.apply_batch(headers)?;
        self.by_hash.apply_batch(hashes)?;
        debug!(
            count,
            lower = bridge.lower().height,
            upper = bridge.upper().height,
            "stored bridge headers"
        );
        Ok(count)
    }

    pub fn get(&self, height: i32) -> StoreResult<Option<EquiHeader>> {
        let Some(bytes) = self.headers.get(height_key(height)?)? else {
            return Ok(None);
        };
        EquiHeader::decode(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                height,
                reason: e.to_string(),
            })
    }

    pub fn contains(&self, height: i32) -> StoreResult<bool> {
        Ok(self.headers.contains_key(height_key(height)?)?)
    }

    /// Height of a stored header by its block hash.
    pub fn height_of(&self, hash: &Bits256) -> StoreResult<Option<i32>> {
        Ok(self
            .by_hash
            .get(hash.as_bytes())?
            .and_then(|v| key_height(&v)))
    }

    /// Highest stored height.
    pub fn tip(&self) -> StoreResult<Option<i32>> {
        Ok(self.headers.last()?.and_then(|(k, _)| key_height(&k)))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
