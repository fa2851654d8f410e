//! # Hashing Utilities
//!
//! Everything NSPV hashes goes through double SHA-256: transaction ids,
//! block header hashes, merkle tree nodes and the P2P envelope checksum.
//! This is the bitcoin construction, inherited unchanged by the chains the
//! client talks to.
//!
//! ## Byte order
//!
//! Hashes are kept in *internal* order, exactly as they come out of the
//! hasher and exactly as they sit on the wire. Humans, block explorers and
//! the RPC output see them in *display* order, which is the same 32 bytes
//! reversed. [`Bits256`] keeps the two from getting mixed up: the inner
//! array is always internal order, `Display`/`FromStr` always use display
//! order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash and return a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute the double-SHA-256 hash: `SHA-256(SHA-256(data))`.
///
/// # Example
///
/// ```
/// use nspv_protocol::crypto::double_sha256;
///
/// let txid = double_sha256(b"raw transaction bytes");
/// assert_eq!(txid.as_bytes().len(), 32);
/// ```
pub fn double_sha256(data: &[u8]) -> Bits256 {
    Bits256(sha256(&sha256(data)))
}

/// Hash two merkle nodes into their parent: `dsha256(left || right)`.
pub fn merkle_parent(left: &Bits256, right: &Bits256) -> Bits256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&left.0);
    buf[32..].copy_from_slice(&right.0);
    double_sha256(&buf)
}

/// Compute a bitcoin-style merkle root over transaction ids.
///
/// Odd levels duplicate their last node. A single leaf is its own root.
/// An empty list yields the zero hash.
pub fn merkle_root(leaves: &[Bits256]) -> Bits256 {
    if leaves.is_empty() {
        return Bits256::ZERO;
    }

    let mut level: Vec<Bits256> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(merkle_parent(&pair[0], right));
        }
        level = next;
    }
    level[0]
}

// ---------------------------------------------------------------------------
// Bits256
// ---------------------------------------------------------------------------

/// A 256-bit hash in internal byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bits256(pub [u8; 32]);

impl Bits256 {
    /// The all-zero hash. Used as "unset" by full nodes.
    pub const ZERO: Bits256 = Bits256([0u8; 32]);

    /// Wraps raw bytes in internal order.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes in internal order.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True for the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hex in display (reversed) order.
    pub fn to_display_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parses hex given in display (reversed) order.
    pub fn from_display_hex(s: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(s.trim()).map_err(|_| HashParseError::InvalidHex)?;
        let mut arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| HashParseError::InvalidLength(v.len()))?;
        arr.reverse();
        Ok(Self(arr))
    }
}

impl fmt::Display for Bits256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_hex())
    }
}

impl fmt::Debug for Bits256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bits256({})", self.to_display_hex())
    }
}

impl FromStr for Bits256 {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_display_hex(s)
    }
}

impl Serialize for Bits256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_display_hex())
    }
}

impl<'de> Deserialize<'de> for Bits256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_display_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Failure parsing a display-order hash string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashParseError {
    #[error("hash is not valid hex")]
    InvalidHex,
    #[error("hash must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn double_sha256_known_vector() {
        // dsha256("hello")
        let hash = double_sha256(b"hello");
        assert_eq!(
            hex::encode(hash.as_bytes()),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn double_sha256_is_sha_of_sha() {
        let single = sha256(b"nspv");
        assert_eq!(double_sha256(b"nspv").0, sha256(&single));
    }

    #[test]
    fn display_hex_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let h = Bits256(bytes);
        let shown = h.to_string();
        assert!(shown.ends_with("ab"));
        assert!(shown.starts_with("00"));
        assert_eq!(shown.parse::<Bits256>().unwrap(), h);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            "zz".parse::<Bits256>().unwrap_err(),
            HashParseError::InvalidHex
        );
        assert_eq!(
            "abcd".parse::<Bits256>().unwrap_err(),
            HashParseError::InvalidLength(2)
        );
    }

    #[test]
    fn serde_uses_display_order() {
        let h = double_sha256(b"serde");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h));
        let back: Bits256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn merkle_root_single_leaf_is_leaf() {
        let leaf = double_sha256(b"only");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn merkle_root_odd_level_duplicates_last() {
        let a = double_sha256(b"a");
        let b = double_sha256(b"b");
        let c = double_sha256(b"c");
        let expected = merkle_parent(&merkle_parent(&a, &b), &merkle_parent(&c, &c));
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn merkle_root_order_matters() {
        let a = double_sha256(b"first");
        let b = double_sha256(b"second");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn merkle_root_empty_is_zero() {
        assert!(merkle_root(&[]).is_zero());
    }
}
