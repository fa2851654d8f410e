// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NSPV Super-Light Client Library
//!
//! An NSPV client does not download the header chain. It asks a handful of
//! full nodes for what it needs (chain info, UTXOs, history, mempool state)
//! and checks the facts that matter with short proofs: a merkle branch to a
//! block header, and a hash-linked run of headers back to a block that was
//! notarized on another chain.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants, chain parameters, timing budgets.
//! - **crypto**: SHA-256d, 256-bit hashes, merkle roots.
//! - **codec**: Little-endian, length-checked wire encoding.
//! - **message**: The nine request/response pairs and their bodies.
//! - **proof**: Inclusion and notarization-bridge verification.
//! - **network**: Peer links, response cache, dispatcher, maintenance.
//! - **session**: Time-boxed login holding key material.
//! - **coins**: Input selection over a UTXO set.
//! - **storage**: sled store of headers already proven.
//! - **client**: The client facade, one method per command.
//! - **rpc**: Gateway command parsing, execution and error codes.
//!
//! ## Design Philosophy
//!
//! 1. Anything decoded from a peer is bounded before it is allocated.
//! 2. A proof either verifies or yields a typed error. There is no "probably".
//! 3. Every wait has a budget, and shutdown cancels all of them.
//! 4. Key material is zeroized on logout, on expiry and on drop.

pub mod client;
pub mod codec;
pub mod coins;
pub mod config;
pub mod crypto;
pub mod message;
pub mod network;
pub mod proof;
pub mod rpc;
pub mod session;
pub mod storage;

pub use client::{ClientError, NspvClient, TrustAnchor, VerifiedTx};
