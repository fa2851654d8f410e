//! # Cryptographic Primitives
//!
//! The client verifies, it never signs on the wire, so this module is just
//! hashing. Key material lives in [`crate::session`] and never leaves it.

pub mod hash;

pub use hash::{double_sha256, merkle_parent, merkle_root, sha256, Bits256, HashParseError};
