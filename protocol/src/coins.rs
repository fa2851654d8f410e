//! # Coin Selection
//!
//! Picks inputs from an address's UTXO set to cover a target amount. The
//! rule is greedy and deterministic: while something is still owed, take the
//! smallest unused UTXO that covers the remainder on its own; if none does,
//! take the largest unused one and go again.
//!
//! The result never has more than [`MAX_VINS`](crate::config::MAX_VINS)
//! inputs, and it is all or nothing: if the target cannot be covered the
//! caller gets an error, never a partial selection.

use serde::Serialize;
use tracing::debug;

use crate::config::format_coins;
use crate::message::{Utxo, UtxoSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoinSelectionError {
    #[error("target must be positive, got {0}")]
    InvalidTarget(i64),

    #[error("insufficient funds: {available} available, {target} needed")]
    InsufficientFunds { available: i64, target: i64 },

    #[error("cannot cover {target} with at most {max_vins} inputs")]
    TooManyInputs { target: i64, max_vins: usize },
}

/// Inputs chosen to fund a transaction, with the set they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoinSelection {
    pub source: UtxoSet,
    pub used: Vec<Utxo>,
    /// Sum of `used`, interest included when the chain pays it.
    pub total: i64,
    pub target: i64,
}

impl CoinSelection {
    /// What is left over after paying `target`.
    pub fn change(&self) -> i64 {
        self.total - self.target
    }
}

/// Spendable value of one UTXO.
pub fn utxo_value(utxo: &Utxo, accrues_interest: bool) -> i64 {
    if accrues_interest {
        utxo.satoshis.saturating_add(utxo.extradata.max(0))
    } else {
        utxo.satoshis
    }
}

/// Selects inputs from `set` covering `target`.
pub fn select_inputs(
    set: &UtxoSet,
    target: i64,
    max_vins: usize,
    accrues_interest: bool,
) -> Result<CoinSelection, CoinSelectionError> {
    if target <= 0 {
        return Err(CoinSelectionError::InvalidTarget(target));
    }

    let values: Vec<i64> = set
        .utxos
        .iter()
        .map(|u| utxo_value(u, accrues_interest))
        .collect();
    let available = values
        .iter()
        .filter(|v| **v > 0)
        .fold(0i64, |acc, v| acc.saturating_add(*v));
    if available < target {
        return Err(CoinSelectionError::InsufficientFunds { available, target });
    }

    let mut used = vec![false; values.len()];
    let mut chosen = Vec::new();
    let mut total = 0i64;

    while total < target {
        if chosen.len() == max_vins {
            debug!(
                target = %format_coins(target),
                max_vins,
                "selection ran out of input slots"
            );
            return Err(CoinSelectionError::TooManyInputs { target, max_vins });
        }
        let remaining = target - total;

        let mut above: Option<usize> = None;
        let mut below: Option<usize> = None;
        for (i, &v) in values.iter().enumerate() {
            if used[i] || v <= 0 {
                continue;
            }
            if v >= remaining {
                if above.map_or(true, |j| v < values[j]) {
                    above = Some(i);
                }
            } else if below.map_or(true, |j| v > values[j]) {
                below = Some(i);
            }
        }

        // available >= target guarantees one of them exists
        let Some(pick) = above.or(below) else {
            return Err(CoinSelectionError::InsufficientFunds { available, target });
        };
        used[pick] = true;
        total += values[pick];
        chosen.push(set.utxos[pick]);
    }

    Ok(CoinSelection {
        source: set.clone(),
        used: chosen,
        total,
        target,
    })
}
