//! # Proof Verification
//!
//! The client never validates the chain. It checks two kinds of proof
//! instead:
//!
//! - **Inclusion** ([`verify_inclusion`]): a merkle branch from a transaction
//!   to the merkle root of a block header.
//! - **Bridges** ([`verify_bridge`]): a hash-linked run of headers between two
//!   notarized heights, which makes every header in between trustworthy.
//!
//! [`verify_tx_proof`] composes them: a transaction is verified once its
//! inclusion proof checks out against a header that a bridge (or a stored,
//! previously bridged header) vouches for.
//!
//! ## Failure semantics
//!
//! Every failure is a typed [`ProofError`]. `NotYetNotarized` is a legitimate
//! pending state, the others mean the peer sent something that does not
//! verify. None of them is ever reported to a caller as success.

mod bridge;
mod merkle;

pub use bridge::{check_window, verify_bridge, verify_linkage, VerifiedBridge};
pub use merkle::{verify_inclusion, MerkleBranch};

#[cfg(test)]
pub(crate) use bridge::tests::{chain as test_chain, fixture as test_fixture};

use crate::message::{BridgeProof, EquiHeader, NotarizationWindow, TxProof};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// The merkle branch does not lead to the header's root.
    #[error("merkle root mismatch")]
    RootMismatch,

    /// A header does not link where it must.
    #[error("header chain broken: {0}")]
    ChainBroken(String),

    /// The proof cannot be interpreted.
    #[error("malformed proof: {0}")]
    Malformed(String),

    /// No notarization covers the height yet.
    #[error("height {height} is not notarized yet")]
    NotYetNotarized { height: i32 },

    /// A raw notarization transaction does not hash to its txid.
    #[error("{which} notarization tx does not match its txid")]
    NotarizationTxMismatch { which: &'static str },
}

/// Verifies `proof` end to end.
///
/// The header for `proof.height` comes from the bridge when it carries one.
/// Otherwise `header` must be supplied and must hash to the value the bridge
/// trusts at that height (the singleton case). Returns the bridge so callers
/// can keep the proven headers.
pub fn verify_tx_proof(
    proof: &TxProof,
    window: &NotarizationWindow,
    bridge: Option<&BridgeProof>,
    header: Option<&EquiHeader>,
) -> Result<VerifiedBridge, ProofError> {
    if proof.height != window.req_height {
        return Err(ProofError::Malformed(format!(
            "proof is for height {}, window for {}",
            proof.height, window.req_height
        )));
    }
    let verified = verify_bridge(window, bridge)?;

    let trusted = match verified.header_at(proof.height) {
        Some(h) => h,
        None => {
            let h = header.ok_or_else(|| {
                ProofError::Malformed(format!("no header for height {}", proof.height))
            })?;
            verified.check_header(proof.height, h)?;
            h
        }
    };
    verify_inclusion(proof, trusted)?;
    Ok(verified)
}
