//! # Network Module
//!
//! Everything between an encoded request and a decoded, correlated response.
//! The crate stays transport-agnostic: full nodes are reached through the
//! [`PeerLink`] trait, and the node binary supplies the TCP implementation.
//!
//! ## Architecture
//!
//! ```text
//! peer.rs         PeerLink trait and the live peer set
//! cache.rs        One watch slot per message kind, plus chain info
//! handler.rs      Decodes inbound payloads into the cache
//! dispatcher.rs   Send, wait, correlate, fail over
//! maintenance.rs  Info refresh, peer pruning, login expiry
//! ```
//!
//! ## Design Decisions
//!
//! - The cache holds only the latest response per kind. Responses carry no
//!   request id, so correlation happens on content
//!   ([`NspvRequest::matches`](crate::message::NspvRequest::matches)) and
//!   same-kind requests are serialized by the dispatcher.
//! - Peer and cache state sit behind `parking_lot` locks and `DashMap`, never
//!   held across an await.
//! - Shutdown is a `tokio_util` `CancellationToken` shared by the dispatcher,
//!   the maintenance task and the node's listeners.

pub mod cache;
pub mod dispatcher;
pub mod handler;
pub mod maintenance;
pub mod peer;

pub use cache::{PeerStats, ResponseCache, Slot};
pub use dispatcher::{DispatchError, Dispatched, Dispatcher, PeerSelector};
pub use handler::{DropReason, HandleOutcome, ResponseHandler};
pub use maintenance::{Maintenance, TickReport};
pub use peer::{PeerError, PeerId, PeerLink, PeerSet};
