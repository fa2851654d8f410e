//! # Protocol Configuration & Constants
//!
//! Every magic number the NSPV client depends on lives here. Most of these
//! are not ours to choose: full nodes speaking the protocol already agree on
//! them, and a client that disagrees is simply ignored.
//!
//! Chain parameter tables proper (genesis hashes, seeds, checkpoints) belong
//! to the P2P layer. We only keep what the client itself needs: the envelope
//! magic, the ports, and whether the coin pays interest on UTXOs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire Limits
// ---------------------------------------------------------------------------

/// Upper bound on any encoded NSPV message, kind byte included. 4 MiB.
pub const MAX_PACKET_SIZE: usize = 4096 * 1024;

/// Length of the fixed address field. Addresses are NUL-terminated text,
/// so the usable length is one byte shorter.
pub const ADDRESS_LEN: usize = 64;

/// Size of the equihash solution carried by every block header.
pub const EQUIHASH_SOLUTION_LEN: usize = 1344;

/// Maximum inputs a coin selection may return.
pub const MAX_VINS: usize = 64;

/// Consensus branch id used when signing transactions for the chain.
pub const BRANCH_ID: u32 = 0x76b8_09bb;

/// Satoshis per coin.
pub const SATOSHIDEN: i64 = 100_000_000;

// ---------------------------------------------------------------------------
// Service Bits
// ---------------------------------------------------------------------------

/// Peer serves NSPV requests. Only peers advertising this bit are candidates
/// for dispatch.
pub const NODE_NSPV: u64 = 1 << 30;

/// Peer maintains an address index (needed for UTXO/txid listings).
pub const NODE_ADDRINDEX: u64 = 1 << 29;

/// Peer maintains a spent index (needed for spent-info queries).
pub const NODE_SPENTINDEX: u64 = 1 << 28;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Number of wait slices the dispatcher grants one peer.
pub const POLL_ITERS: u32 = 100;

/// Length of one wait slice.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Seconds a login stays valid before the key material is scrubbed.
pub const AUTO_LOGOUT_SECS: u64 = 777;

/// Login TTL as a `Duration`.
pub const AUTO_LOGOUT: Duration = Duration::from_secs(AUTO_LOGOUT_SECS);

/// Maintenance tick.
pub const MAINTENANCE_TICK: Duration = Duration::from_secs(1);

/// Cached chain info older than this gets refreshed. Half the 60 second
/// block time, so a new tip is noticed within one block.
pub const INFO_REFRESH: Duration = Duration::from_secs(30);

/// Default cap on simultaneously connected full nodes.
pub const DEFAULT_MAX_PEERS: usize = 10;

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Wait budget of the request dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Wait slices granted to each candidate peer.
    pub poll_iters: u32,
    /// Length of one slice.
    pub poll_interval: Duration,
}

impl DispatchConfig {
    /// Total time one peer gets to answer.
    pub fn per_peer_budget(&self) -> Duration {
        self.poll_interval * self.poll_iters
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_iters: POLL_ITERS,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Cadence of the maintenance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub tick: Duration,
    pub info_refresh: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            tick: MAINTENANCE_TICK,
            info_refresh: INFO_REFRESH,
        }
    }
}

// ---------------------------------------------------------------------------
// Chain Parameters
// ---------------------------------------------------------------------------

/// Network selection from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// The slice of chain parameters the client needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainParams {
    /// Ticker-style name, used for logs and file names.
    pub name: &'static str,
    /// Network this table describes.
    pub network: Network,
    /// Envelope magic, in wire order.
    pub magic: [u8; 4],
    /// Default P2P port of full nodes.
    pub p2p_port: u16,
    /// Port the local RPC gateway listens on.
    pub rpc_port: u16,
    /// P2P protocol version announced in the handshake.
    pub protocol_version: i32,
    /// Whether UTXOs accrue interest. When false the `extradata` field of a
    /// UTXO carries no meaning and is ignored in totals.
    pub accrues_interest: bool,
}

impl ChainParams {
    /// Komodo mainnet.
    pub const fn mainnet() -> Self {
        Self {
            name: "KMD",
            network: Network::Mainnet,
            magic: [0xf9, 0xee, 0xe4, 0x8d],
            p2p_port: 7770,
            rpc_port: 7771,
            protocol_version: 170_009,
            accrues_interest: true,
        }
    }

    /// Public test network.
    pub const fn testnet() -> Self {
        Self {
            name: "KMDTEST",
            network: Network::Testnet,
            magic: [0x0b, 0x11, 0x09, 0x07],
            p2p_port: 17770,
            rpc_port: 17771,
            protocol_version: 170_009,
            accrues_interest: false,
        }
    }

    /// Local regression test network.
    pub const fn regtest() -> Self {
        Self {
            name: "KMDREG",
            network: Network::Regtest,
            magic: [0xfa, 0xbf, 0xb5, 0xda],
            p2p_port: 17880,
            rpc_port: 17881,
            protocol_version: 170_009,
            accrues_interest: false,
        }
    }

    /// Parameters for a network.
    pub const fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Formats a satoshi amount as a decimal coin value, mainly for logs.
pub fn format_coins(satoshis: i64) -> String {
    let sign = if satoshis < 0 { "-" } else { "" };
    let abs = satoshis.unsigned_abs();
    let whole = abs / SATOSHIDEN as u64;
    let frac = abs % SATOSHIDEN as u64;
    format!("{}{}.{:08}", sign, whole, frac)
}
