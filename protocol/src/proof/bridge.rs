//! Notarization bridges.
//!
//! A bridge is the run of headers from just above one notarized height up to
//! the next notarized height. If the first header points back at the lower
//! notarized blockhash, each header points at the one before it, and the last
//! header hashes to the upper notarized blockhash, every header in between is
//! as trustworthy as the notarizations themselves.

use std::collections::BTreeMap;

use tracing::debug;

use crate::crypto::{double_sha256, Bits256};
use crate::message::{BridgeProof, EquiHeader, Notarization, NotarizationWindow};

use super::ProofError;

/// Headers proven by a bridge, keyed by height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBridge {
    lower: Notarization,
    upper: Notarization,
    headers: BTreeMap<i32, EquiHeader>,
}

impl VerifiedBridge {
    /// A bridge of zero length: `ntz` itself is the trusted point.
    pub fn singleton(ntz: Notarization) -> Self {
        Self {
            lower: ntz,
            upper: ntz,
            headers: BTreeMap::new(),
        }
    }

    pub fn lower(&self) -> &Notarization {
        &self.lower
    }

    pub fn upper(&self) -> &Notarization {
        &self.upper
    }

    /// Whether `height` falls inside the bridged range.
    pub fn covers(&self, height: i32) -> bool {
        height == self.upper.height || (height > self.lower.height && height < self.upper.height)
    }

    /// A header proven by the bridge.
    pub fn header_at(&self, height: i32) -> Option<&EquiHeader> {
        self.headers.get(&height)
    }

    pub fn headers(&self) -> impl Iterator<Item = (i32, &EquiHeader)> {
        self.headers.iter().map(|(h, hdr)| (*h, hdr))
    }

    /// Trusted block hash at `height`, if the bridge pins one down.
    pub fn trusted_hash(&self, height: i32) -> Option<Bits256> {
        if height == self.upper.height {
            return Some(self.upper.blockhash);
        }
        if height == self.lower.height {
            return Some(self.lower.blockhash);
        }
        self.headers.get(&height).map(EquiHeader::hash)
    }

    /// Accepts a header obtained elsewhere if it hashes to the trusted value.
    pub fn check_header(&self, height: i32, header: &EquiHeader) -> Result<(), ProofError> {
        match self.trusted_hash(height) {
            Some(h) if h == header.hash() => Ok(()),
            Some(_) => Err(ProofError::ChainBroken(format!(
                "header at {} does not hash to the trusted block",
                height
            ))),
            None => Err(ProofError::Malformed(format!(
                "height {} is outside the bridge",
                height
            ))),
        }
    }
}

/// Rejects windows that cannot anchor `window.req_height` yet.
pub fn check_window(window: &NotarizationWindow) -> Result<(), ProofError> {
    let h = window.req_height;
    if window.next.height == 0 || window.next.height < h {
        return Err(ProofError::NotYetNotarized { height: h });
    }
    if !window.prev.is_empty() && window.prev.height > h {
        return Err(ProofError::Malformed(format!(
            "lower notarization {} is above queried height {}",
            window.prev.height, h
        )));
    }
    Ok(())
}

/// Verifies the bridge for `window`. `proof` may be `None` only when the
/// queried height is itself notarized.
pub fn verify_bridge(
    window: &NotarizationWindow,
    proof: Option<&BridgeProof>,
) -> Result<VerifiedBridge, ProofError> {
    check_window(window)?;

    let h = window.req_height;
    if h == window.next.height {
        return Ok(VerifiedBridge::singleton(window.next));
    }
    if h == window.prev.height {
        return Ok(VerifiedBridge::singleton(window.prev));
    }

    let proof = proof.ok_or_else(|| {
        ProofError::Malformed(format!("height {} needs a bridge proof", h))
    })?;
    verify_linkage(&window.prev, &window.next, proof)
}

/// Checks a bridge proof against two trusted notarizations.
pub fn verify_linkage(
    prev: &Notarization,
    next: &Notarization,
    proof: &BridgeProof,
) -> Result<VerifiedBridge, ProofError> {
    if proof.prev_height != prev.height || proof.next_height != next.height {
        return Err(ProofError::ChainBroken(format!(
            "proof spans {}..{}, window spans {}..{}",
            proof.prev_height, proof.next_height, prev.height, next.height
        )));
    }
    if proof.prev_txid != prev.txid || proof.next_txid != next.txid {
        return Err(ProofError::ChainBroken(
            "proof is for different notarizations".into(),
        ));
    }

    check_ntz_tx("prev", &proof.prev_ntz_tx, prev)?;
    check_ntz_tx("next", &proof.next_ntz_tx, next)?;

    let expected = i64::from(next.height) - i64::from(prev.height);
    if proof.headers.len() as i64 != expected {
        return Err(ProofError::ChainBroken(format!(
            "{} headers for a gap of {}",
            proof.headers.len(),
            expected
        )));
    }

    let mut headers = BTreeMap::new();
    let mut tip = prev.blockhash;
    for (offset, header) in proof.headers.iter().enumerate() {
        let height = prev.height + 1 + offset as i32;
        if header.prev_hash != tip {
            return Err(ProofError::ChainBroken(format!(
                "header at {} does not link to its parent",
                height
            )));
        }
        tip = header.hash();
        headers.insert(height, header.clone());
    }
    if tip != next.blockhash {
        return Err(ProofError::ChainBroken(
            "last header does not match the upper notarization".into(),
        ));
    }

    Ok(VerifiedBridge {
        lower: *prev,
        upper: *next,
        headers,
    })
}

/// Checks a raw notarization tx against its txid. Peers may omit the raw tx,
/// in which case the linkage alone vouches for the bridge.
fn check_ntz_tx(which: &'static str, raw: &[u8], ntz: &Notarization) -> Result<(), ProofError> {
    if raw.is_empty() {
        debug!(which, height = ntz.height, "bridge proof omits notarization tx");
        return Ok(());
    }
    if double_sha256(raw) != ntz.txid {
        return Err(ProofError::NotarizationTxMismatch { which });
    }
    Ok(())
}
