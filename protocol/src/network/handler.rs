//! # Response Handler
//!
//! Entry point for everything peers send back. The transport calls
//! [`ResponseHandler::handle`] with the raw NSPV payload; the handler reads
//! the kind byte, decodes, and stores the result in the one cache slot that
//! kind owns. Anything it cannot use is logged and dropped. A dispatcher
//! waiting on that kind just keeps waiting until its own budget runs out.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{Direction, MessageKind, NspvResponse};
use crate::network::cache::ResponseCache;
use crate::network::peer::PeerId;

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Empty,
    UnknownKind(u8),
    /// A request kind arrived where only responses are expected.
    NotAResponse(MessageKind),
    Malformed(MessageKind),
}

/// What [`ResponseHandler::handle`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Stored(MessageKind),
    Dropped(DropReason),
}

#[derive(Clone)]
pub struct ResponseHandler {
    cache: Arc<ResponseCache>,
}

impl ResponseHandler {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    pub fn handle(&self, peer: PeerId, bytes: &[u8]) -> HandleOutcome {
        let outcome = self.classify_and_store(peer, bytes);
        if let HandleOutcome::Dropped(reason) = outcome {
            self.cache.record_dropped(peer);
            warn!(peer, len = bytes.len(), ?reason, "dropping peer message");
        }
        outcome
    }

    fn classify_and_store(&self, peer: PeerId, bytes: &[u8]) -> HandleOutcome {
        let Some((&byte, body)) = bytes.split_first() else {
            return HandleOutcome::Dropped(DropReason::Empty);
        };
        let kind = match MessageKind::classify(byte) {
            Some((kind, Direction::Response)) => kind,
            Some((kind, Direction::Request)) => {
                return HandleOutcome::Dropped(DropReason::NotAResponse(kind))
            }
            None => return HandleOutcome::Dropped(DropReason::UnknownKind(byte)),
        };

        match NspvResponse::decode_body(kind, body) {
            Ok(response) => {
                debug!(peer, %kind, len = bytes.len(), "response stored");
                self.cache.store(peer, response);
                HandleOutcome::Stored(kind)
            }
            Err(e) => {
                debug!(peer, %kind, error = %e, "response failed to decode");
                HandleOutcome::Dropped(DropReason::Malformed(kind))
            }
        }
    }
}
