//! Merkle inclusion proofs.
//!
//! A proof blob is `leaf index u32 | leaf count u32 | u8 sibling count |
//! siblings`, siblings ordered leaf to root. At each level the low bit of the
//! running index says which side the sibling sits on. Odd levels pair their
//! last node with itself, so the last leaf's sibling may be its own hash.

use crate::codec::{Decode, DecodeError, Encode, EncodeError, Reader, Writer};
use crate::crypto::{double_sha256, merkle_parent, Bits256};
use crate::message::{EquiHeader, TxProof};

use super::ProofError;

/// Decoded proof blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBranch {
    pub index: u32,
    pub leaf_count: u32,
    pub siblings: Vec<Bits256>,
}

/// Tree depth for `leaf_count` leaves.
fn depth_for(leaf_count: u32) -> usize {
    let mut n = leaf_count;
    let mut depth = 0;
    while n > 1 {
        n = (n + 1) / 2;
        depth += 1;
    }
    depth
}

impl MerkleBranch {
    /// Builds the branch for `leaves[index]`.
    pub fn build(leaves: &[Bits256], index: usize) -> Option<Self> {
        if index >= leaves.len() {
            return None;
        }
        let mut siblings = Vec::new();
        let mut level = leaves.to_vec();
        let mut i = index;
        while level.len() > 1 {
            let sibling = if i % 2 == 0 {
                level.get(i + 1).unwrap_or(&level[i])
            } else {
                &level[i - 1]
            };
            siblings.push(*sibling);

            level = level
                .chunks(2)
                .map(|pair| merkle_parent(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            i /= 2;
        }
        Some(Self {
            index: index as u32,
            leaf_count: leaves.len() as u32,
            siblings,
        })
    }

    /// Root implied by `leaf` sitting at `self.index`.
    pub fn root_for(&self, leaf: Bits256) -> Bits256 {
        let mut idx = self.index;
        let mut node = leaf;
        for sibling in &self.siblings {
            node = if idx & 1 == 0 {
                merkle_parent(&node, sibling)
            } else {
                merkle_parent(sibling, &node)
            };
            idx >>= 1;
        }
        node
    }

    fn check_shape(&self) -> Result<(), ProofError> {
        if self.leaf_count == 0 || self.index >= self.leaf_count {
            return Err(ProofError::Malformed(format!(
                "leaf index {} outside tree of {} leaves",
                self.index, self.leaf_count
            )));
        }
        let depth = depth_for(self.leaf_count);
        if self.siblings.len() != depth {
            return Err(ProofError::Malformed(format!(
                "branch has {} siblings, tree of {} leaves needs {}",
                self.siblings.len(),
                self.leaf_count,
                depth
            )));
        }
        Ok(())
    }
}

impl Encode for MerkleBranch {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        if self.siblings.len() > u8::MAX as usize {
            return Err(EncodeError::CountOverflow {
                field: "siblings",
                count: self.siblings.len(),
                max: u8::MAX as usize,
            });
        }
        w.put_u32(self.index);
        w.put_u32(self.leaf_count);
        w.put_u8(self.siblings.len() as u8);
        for s in &self.siblings {
            w.put_hash(s);
        }
        Ok(())
    }
}

impl Decode for MerkleBranch {
    const MIN_LEN: usize = 4 + 4 + 1;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let index = r.get_u32()?;
        let leaf_count = r.get_u32()?;
        let n = r.get_u8()? as usize;
        let mut siblings = Vec::with_capacity(n.min(r.remaining() / 32));
        for _ in 0..n {
            siblings.push(r.get_hash()?);
        }
        Ok(Self {
            index,
            leaf_count,
            siblings,
        })
    }
}

/// Checks that `proof.tx` is included in the block `header` describes.
pub fn verify_inclusion(proof: &TxProof, header: &EquiHeader) -> Result<(), ProofError> {
    let branch = MerkleBranch::decode(&proof.proof)
        .map_err(|e| ProofError::Malformed(format!("proof blob: {}", e)))?;
    branch.check_shape()?;

    let leaf = double_sha256(&proof.tx);
    if leaf != proof.txid {
        return Err(ProofError::RootMismatch);
    }
    if branch.root_for(leaf) != header.merkle_root {
        return Err(ProofError::RootMismatch);
    }
    Ok(())
}
