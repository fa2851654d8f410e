//! # NSPV Messages
//!
//! A wire message is one kind byte followed by the body of the struct that
//! kind selects. Request kinds are even; the response to a request always
//! carries `request kind + 1`. [`MessageKind`] names the nine request/response
//! pairs, [`NspvRequest`] and [`NspvResponse`] carry the typed bodies.
//!
//! ```
//! use nspv_protocol::message::{InfoRequest, MessageKind, NspvRequest};
//!
//! let req = NspvRequest::Info(InfoRequest { hdr_height: 0 });
//! let bytes = req.encode().unwrap();
//! assert_eq!(bytes[0], MessageKind::Info.request_byte());
//! assert_eq!(NspvRequest::decode(&bytes).unwrap(), req);
//! ```

mod types;

pub use types::{
    AddressRequest, BridgeProof, BroadcastRequest, BroadcastResult, ChainInfo, EquiHeader,
    InfoRequest, MempoolQuery, MempoolRequest, MempoolResult, Notarization, NotarizationWindow,
    NtzsProofRequest, NtzsRequest, SpentInfo, SpentInfoRequest, TxProof, TxProofRequest, TxRef,
    TxRefSet, Utxo, UtxoSet,
};

use std::fmt;

use crate::codec::{Decode, DecodeError, Encode, EncodeError, Reader, Writer};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// A request/response pair, identified by its request byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageKind {
    Info = 0x00,
    Utxos = 0x02,
    Ntzs = 0x04,
    NtzsProof = 0x06,
    TxProof = 0x08,
    SpentInfo = 0x0a,
    Broadcast = 0x0c,
    Txids = 0x0e,
    Mempool = 0x10,
}

/// Whether a kind byte opens a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl MessageKind {
    /// Number of request/response pairs.
    pub const COUNT: usize = 9;

    pub const ALL: [MessageKind; Self::COUNT] = [
        MessageKind::Info,
        MessageKind::Utxos,
        MessageKind::Ntzs,
        MessageKind::NtzsProof,
        MessageKind::TxProof,
        MessageKind::SpentInfo,
        MessageKind::Broadcast,
        MessageKind::Txids,
        MessageKind::Mempool,
    ];

    pub const fn request_byte(self) -> u8 {
        self as u8
    }

    pub const fn response_byte(self) -> u8 {
        self as u8 + 1
    }

    /// Dense index, for per-kind tables.
    pub const fn index(self) -> usize {
        (self as u8 / 2) as usize
    }

    /// Splits a kind byte into its pair and direction.
    pub fn classify(byte: u8) -> Option<(MessageKind, Direction)> {
        let kind = *Self::ALL.get((byte / 2) as usize)?;
        let dir = if byte % 2 == 0 {
            Direction::Request
        } else {
            Direction::Response
        };
        Some((kind, dir))
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageKind::Info => "info",
            MessageKind::Utxos => "utxos",
            MessageKind::Ntzs => "ntzs",
            MessageKind::NtzsProof => "ntzsproof",
            MessageKind::TxProof => "txproof",
            MessageKind::SpentInfo => "spentinfo",
            MessageKind::Broadcast => "broadcast",
            MessageKind::Txids => "txids",
            MessageKind::Mempool => "mempool",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn split_kind(bytes: &[u8], expect: Direction) -> Result<(MessageKind, &[u8]), DecodeError> {
    let (&byte, body) = bytes.split_first().ok_or(DecodeError::Truncated {
        needed: 1,
        remaining: 0,
    })?;
    match MessageKind::classify(byte) {
        Some((kind, dir)) if dir == expect => Ok((kind, body)),
        Some((_, dir)) => Err(DecodeError::Malformed(format!(
            "kind 0x{:02x} is a {:?}, expected a {:?}",
            byte, dir, expect
        ))),
        None => Err(DecodeError::Malformed(format!(
            "unknown kind 0x{:02x}",
            byte
        ))),
    }
}

fn frame<T: Encode>(kind_byte: u8, body: &T) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    w.put_u8(kind_byte);
    body.encode_to(&mut w)?;
    w.finish()
}

fn body<T: Decode>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut r = Reader::new(bytes)?;
    let value = T::decode_from(&mut r)?;
    r.finish()?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NspvRequest {
    Info(InfoRequest),
    Utxos(AddressRequest),
    Ntzs(NtzsRequest),
    NtzsProof(NtzsProofRequest),
    TxProof(TxProofRequest),
    SpentInfo(SpentInfoRequest),
    Broadcast(BroadcastRequest),
    Txids(AddressRequest),
    Mempool(MempoolRequest),
}

impl NspvRequest {
    pub fn kind(&self) -> MessageKind {
        match self {
            NspvRequest::Info(_) => MessageKind::Info,
            NspvRequest::Utxos(_) => MessageKind::Utxos,
            NspvRequest::Ntzs(_) => MessageKind::Ntzs,
            NspvRequest::NtzsProof(_) => MessageKind::NtzsProof,
            NspvRequest::TxProof(_) => MessageKind::TxProof,
            NspvRequest::SpentInfo(_) => MessageKind::SpentInfo,
            NspvRequest::Broadcast(_) => MessageKind::Broadcast,
            NspvRequest::Txids(_) => MessageKind::Txids,
            NspvRequest::Mempool(_) => MessageKind::Mempool,
        }
    }

    /// Kind byte plus body.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let k = self.kind().request_byte();
        match self {
            NspvRequest::Info(b) => frame(k, b),
            NspvRequest::Utxos(b) | NspvRequest::Txids(b) => frame(k, b),
            NspvRequest::Ntzs(b) => frame(k, b),
            NspvRequest::NtzsProof(b) => frame(k, b),
            NspvRequest::TxProof(b) => frame(k, b),
            NspvRequest::SpentInfo(b) => frame(k, b),
            NspvRequest::Broadcast(b) => frame(k, b),
            NspvRequest::Mempool(b) => frame(k, b),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (kind, b) = split_kind(bytes, Direction::Request)?;
        Self::decode_body(kind, b)
    }

    /// Decodes a body whose kind byte has already been read.
    pub fn decode_body(kind: MessageKind, b: &[u8]) -> Result<Self, DecodeError> {
        Ok(match kind {
            MessageKind::Info => NspvRequest::Info(body(b)?),
            MessageKind::Utxos => NspvRequest::Utxos(body(b)?),
            MessageKind::Ntzs => NspvRequest::Ntzs(body(b)?),
            MessageKind::NtzsProof => NspvRequest::NtzsProof(body(b)?),
            MessageKind::TxProof => NspvRequest::TxProof(body(b)?),
            MessageKind::SpentInfo => NspvRequest::SpentInfo(body(b)?),
            MessageKind::Broadcast => NspvRequest::Broadcast(body(b)?),
            MessageKind::Txids => NspvRequest::Txids(body(b)?),
            MessageKind::Mempool => NspvRequest::Mempool(body(b)?),
        })
    }

    /// Whether `resp` answers this request and not an earlier one of the
    /// same kind.
    pub fn matches(&self, resp: &NspvResponse) -> bool {
        match (self, resp) {
            (NspvRequest::Info(q), NspvResponse::Info(r)) => {
                q.hdr_height == 0 || q.hdr_height == r.hdr_height
            }
            (NspvRequest::Utxos(q), NspvResponse::Utxos(r)) => {
                (q.address.is_empty() || q.address == r.address) && q.cc_flag == r.cc_flag
            }
            (NspvRequest::Txids(q), NspvResponse::Txids(r)) => {
                (q.address.is_empty() || q.address == r.address) && q.cc_flag == r.cc_flag
            }
            (NspvRequest::Ntzs(q), NspvResponse::Ntzs(r)) => q.height == r.req_height,
            (NspvRequest::NtzsProof(q), NspvResponse::NtzsProof(r)) => {
                q.prev_txid == r.prev_txid && q.next_txid == r.next_txid
            }
            (NspvRequest::TxProof(q), NspvResponse::TxProof(r)) => {
                q.txid == r.txid && q.vout == r.vout
            }
            (NspvRequest::SpentInfo(q), NspvResponse::SpentInfo(r)) => {
                q.txid == r.txid && q.vout == r.vout
            }
            (NspvRequest::Broadcast(q), NspvResponse::Broadcast(r)) => q.txid == r.txid,
            (NspvRequest::Mempool(q), NspvResponse::Mempool(r)) => {
                let outpoint = match q.query {
                    MempoolQuery::IsSpent => q.txid == r.txid && q.vout == r.vout,
                    MempoolQuery::InMempool => q.txid == r.txid,
                    _ => true,
                };
                q.query == r.query
                    && (q.address.is_empty() || q.address == r.address)
                    && outpoint
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NspvResponse {
    Info(ChainInfo),
    Utxos(UtxoSet),
    Ntzs(NotarizationWindow),
    NtzsProof(BridgeProof),
    TxProof(TxProof),
    SpentInfo(SpentInfo),
    Broadcast(BroadcastResult),
    Txids(TxRefSet),
    Mempool(MempoolResult),
}

impl NspvResponse {
    pub fn kind(&self) -> MessageKind {
        match self {
            NspvResponse::Info(_) => MessageKind::Info,
            NspvResponse::Utxos(_) => MessageKind::Utxos,
            NspvResponse::Ntzs(_) => MessageKind::Ntzs,
            NspvResponse::NtzsProof(_) => MessageKind::NtzsProof,
            NspvResponse::TxProof(_) => MessageKind::TxProof,
            NspvResponse::SpentInfo(_) => MessageKind::SpentInfo,
            NspvResponse::Broadcast(_) => MessageKind::Broadcast,
            NspvResponse::Txids(_) => MessageKind::Txids,
            NspvResponse::Mempool(_) => MessageKind::Mempool,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let k = self.kind().response_byte();
        match self {
            NspvResponse::Info(b) => frame(k, b),
            NspvResponse::Utxos(b) => frame(k, b),
            NspvResponse::Ntzs(b) => frame(k, b),
            NspvResponse::NtzsProof(b) => frame(k, b),
            NspvResponse::TxProof(b) => frame(k, b),
            NspvResponse::SpentInfo(b) => frame(k, b),
            NspvResponse::Broadcast(b) => frame(k, b),
            NspvResponse::Txids(b) => frame(k, b),
            NspvResponse::Mempool(b) => frame(k, b),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (kind, b) = split_kind(bytes, Direction::Response)?;
        Self::decode_body(kind, b)
    }

    pub fn decode_body(kind: MessageKind, b: &[u8]) -> Result<Self, DecodeError> {
        Ok(match kind {
            MessageKind::Info => NspvResponse::Info(body(b)?),
            MessageKind::Utxos => NspvResponse::Utxos(body(b)?),
            MessageKind::Ntzs => NspvResponse::Ntzs(body(b)?),
            MessageKind::NtzsProof => NspvResponse::NtzsProof(body(b)?),
            MessageKind::TxProof => NspvResponse::TxProof(body(b)?),
            MessageKind::SpentInfo => NspvResponse::SpentInfo(body(b)?),
            MessageKind::Broadcast => NspvResponse::Broadcast(body(b)?),
            MessageKind::Txids => NspvResponse::Txids(body(b)?),
            MessageKind::Mempool => NspvResponse::Mempool(body(b)?),
        })
    }
}
