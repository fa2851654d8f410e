//! Request and response payload structs.
//!
//! Field order in each struct is the wire order. Fixed-width fields come
//! first, then `u16`-counted arrays, then `i32`-length byte blobs.

use serde::{Serialize, Serializer};

use crate::codec::{Address, Decode, DecodeError, Encode, EncodeError, Reader, Writer};
use crate::config::{ADDRESS_LEN, EQUIHASH_SOLUTION_LEN};
use crate::crypto::{double_sha256, Bits256};

/// Compact-size prefix of the 1344-byte solution in the consensus encoding.
const SOLUTION_COMPACT_SIZE: [u8; 3] = [0xfd, 0x40, 0x05];

fn bool_from_u8(v: u8, field: &str) -> Result<bool, DecodeError> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::Malformed(format!(
            "{} flag must be 0 or 1, got {}",
            field, other
        ))),
    }
}

// ---------------------------------------------------------------------------
// Block header
// ---------------------------------------------------------------------------

/// Equihash block header.
#[derive(Clone, PartialEq, Eq)]
pub struct EquiHeader {
    pub version: i32,
    pub prev_hash: Bits256,
    pub merkle_root: Bits256,
    pub sapling_root: Bits256,
    pub time: u32,
    pub bits: u32,
    pub nonce: Bits256,
    pub solution: Box<[u8; EQUIHASH_SOLUTION_LEN]>,
}

impl EquiHeader {
    /// Serialized size on the NSPV wire (solution without its length prefix).
    pub const WIRE_LEN: usize = 4 + 32 * 3 + 4 + 4 + 32 + EQUIHASH_SOLUTION_LEN;

    /// Consensus serialization: the wire layout with the solution's
    /// compact-size length in front of it.
    pub fn consensus_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_LEN + SOLUTION_COMPACT_SIZE.len());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_hash.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(self.sapling_root.as_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(self.nonce.as_bytes());
        out.extend_from_slice(&SOLUTION_COMPACT_SIZE);
        out.extend_from_slice(&self.solution[..]);
        out
    }

    /// Block hash: double SHA-256 of the consensus serialization.
    pub fn hash(&self) -> Bits256 {
        double_sha256(&self.consensus_bytes())
    }
}

impl Default for EquiHeader {
    fn default() -> Self {
        Self {
            version: 0,
            prev_hash: Bits256::ZERO,
            merkle_root: Bits256::ZERO,
            sapling_root: Bits256::ZERO,
            time: 0,
            bits: 0,
            nonce: Bits256::ZERO,
            solution: Box::new([0u8; EQUIHASH_SOLUTION_LEN]),
        }
    }
}

impl std::fmt::Debug for EquiHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquiHeader")
            .field("hash", &self.hash())
            .field("version", &self.version)
            .field("prev_hash", &self.prev_hash)
            .field("merkle_root", &self.merkle_root)
            .field("time", &self.time)
            .field("bits", &format_args!("{:08x}", self.bits))
            .finish_non_exhaustive()
    }
}

impl Serialize for EquiHeader {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("EquiHeader", 8)?;
        s.serialize_field("hash", &self.hash())?;
        s.serialize_field("version", &self.version)?;
        s.serialize_field("previousblockhash", &self.prev_hash)?;
        s.serialize_field("merkleroot", &self.merkle_root)?;
        s.serialize_field("finalsaplingroot", &self.sapling_root)?;
        s.serialize_field("time", &self.time)?;
        s.serialize_field("bits", &format!("{:08x}", self.bits))?;
        s.serialize_field("nonce", &self.nonce)?;
        s.end()
    }
}

impl Encode for EquiHeader {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_i32(self.version);
        w.put_hash(&self.prev_hash);
        w.put_hash(&self.merkle_root);
        w.put_hash(&self.sapling_root);
        w.put_u32(self.time);
        w.put_u32(self.bits);
        w.put_hash(&self.nonce);
        w.put_fixed(&self.solution[..]);
        Ok(())
    }
}

impl Decode for EquiHeader {
    const MIN_LEN: usize = Self::WIRE_LEN;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version: r.get_i32()?,
            prev_hash: r.get_hash()?,
            merkle_root: r.get_hash()?,
            sapling_root: r.get_hash()?,
            time: r.get_u32()?,
            bits: r.get_u32()?,
            nonce: r.get_hash()?,
            solution: Box::new(r.get_fixed::<EQUIHASH_SOLUTION_LEN>()?),
        })
    }
}

// ---------------------------------------------------------------------------
// Notarizations
// ---------------------------------------------------------------------------

/// A cross-chain checkpoint of `blockhash` at `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Notarization {
    pub blockhash: Bits256,
    pub txid: Bits256,
    /// Paired transaction on the notarizing chain.
    pub othertxid: Bits256,
    pub height: i32,
    /// Height the notarization transaction itself was mined at.
    pub txid_height: i32,
}

impl Notarization {
    pub const WIRE_LEN: usize = 32 * 3 + 4 + 4;

    /// Full nodes send an all-zero notarization for "none found".
    pub fn is_empty(&self) -> bool {
        self.height == 0 && self.blockhash.is_zero()
    }
}

impl Encode for Notarization {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.blockhash);
        w.put_hash(&self.txid);
        w.put_hash(&self.othertxid);
        w.put_i32(self.height);
        w.put_i32(self.txid_height);
        Ok(())
    }
}

impl Decode for Notarization {
    const MIN_LEN: usize = Self::WIRE_LEN;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            blockhash: r.get_hash()?,
            txid: r.get_hash()?,
            othertxid: r.get_hash()?,
            height: r.get_i32()?,
            txid_height: r.get_i32()?,
        })
    }
}

/// Notarizations bracketing a queried height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NotarizationWindow {
    pub prev: Notarization,
    pub next: Notarization,
    pub req_height: i32,
}

impl Encode for NotarizationWindow {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        self.prev.encode_to(w)?;
        self.next.encode_to(w)?;
        w.put_i32(self.req_height);
        Ok(())
    }
}

impl Decode for NotarizationWindow {
    const MIN_LEN: usize = Notarization::WIRE_LEN * 2 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            prev: Notarization::decode_from(r)?,
            next: Notarization::decode_from(r)?,
            req_height: r.get_i32()?,
        })
    }
}

/// Headers linking two notarized heights, plus the raw notarization txs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BridgeProof {
    pub prev_height: i32,
    pub next_height: i32,
    pub prev_txid: Bits256,
    pub next_txid: Bits256,
    pub prev_txid_height: i32,
    pub next_txid_height: i32,
    /// Headers `prev_height + 1 ..= next_height`, in chain order.
    pub headers: Vec<EquiHeader>,
    #[serde(with = "hex_bytes")]
    pub prev_ntz_tx: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub next_ntz_tx: Vec<u8>,
}

impl Encode for BridgeProof {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_i32(self.prev_height);
        w.put_i32(self.next_height);
        w.put_hash(&self.prev_txid);
        w.put_hash(&self.next_txid);
        w.put_i32(self.prev_txid_height);
        w.put_i32(self.next_txid_height);
        w.put_list("headers", &self.headers)?;
        w.put_var_bytes(&self.prev_ntz_tx)?;
        w.put_var_bytes(&self.next_ntz_tx)
    }
}

impl Decode for BridgeProof {
    const MIN_LEN: usize = 4 * 2 + 32 * 2 + 4 * 2 + 2 + 4 * 2;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            prev_height: r.get_i32()?,
            next_height: r.get_i32()?,
            prev_txid: r.get_hash()?,
            next_txid: r.get_hash()?,
            prev_txid_height: r.get_i32()?,
            next_txid_height: r.get_i32()?,
            headers: r.get_list()?,
            prev_ntz_tx: r.get_var_bytes()?,
            next_ntz_tx: r.get_var_bytes()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Chain info
// ---------------------------------------------------------------------------

/// Tip and latest notarization as seen by a full node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChainInfo {
    pub notarization: Notarization,
    pub blockhash: Bits256,
    pub height: i32,
    /// Height of `header`; echoes the request.
    pub hdr_height: i32,
    pub header: EquiHeader,
}

impl Encode for ChainInfo {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        self.notarization.encode_to(w)?;
        w.put_hash(&self.blockhash);
        w.put_i32(self.height);
        w.put_i32(self.hdr_height);
        self.header.encode_to(w)
    }
}

impl Decode for ChainInfo {
    const MIN_LEN: usize = Notarization::WIRE_LEN + 32 + 4 + 4 + EquiHeader::WIRE_LEN;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            notarization: Notarization::decode_from(r)?,
            blockhash: r.get_hash()?,
            height: r.get_i32()?,
            hdr_height: r.get_i32()?,
            header: EquiHeader::decode_from(r)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Address listings
// ---------------------------------------------------------------------------

/// One unspent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Utxo {
    pub txid: Bits256,
    pub satoshis: i64,
    /// Accrued interest on chains that pay it.
    pub extradata: i64,
    pub vout: i32,
    pub height: i32,
}

impl Encode for Utxo {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_i64(self.satoshis);
        w.put_i64(self.extradata);
        w.put_i32(self.vout);
        w.put_i32(self.height);
        Ok(())
    }
}

impl Decode for Utxo {
    const MIN_LEN: usize = 32 + 8 + 8 + 4 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            satoshis: r.get_i64()?,
            extradata: r.get_i64()?,
            vout: r.get_i32()?,
            height: r.get_i32()?,
        })
    }
}

/// Unspent outputs of an address, in node order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UtxoSet {
    pub address: Address,
    pub total: i64,
    pub interest: i64,
    pub node_height: i32,
    pub skip_count: i32,
    pub cc_flag: bool,
    pub utxos: Vec<Utxo>,
}

impl Encode for UtxoSet {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_address(&self.address);
        w.put_i64(self.total);
        w.put_i64(self.interest);
        w.put_i32(self.node_height);
        w.put_i32(self.skip_count);
        w.put_u8(self.cc_flag as u8);
        w.put_list("utxos", &self.utxos)
    }
}

impl Decode for UtxoSet {
    const MIN_LEN: usize = ADDRESS_LEN + 8 + 8 + 4 + 4 + 1 + 2;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: r.get_address()?,
            total: r.get_i64()?,
            interest: r.get_i64()?,
            node_height: r.get_i32()?,
            skip_count: r.get_i32()?,
            cc_flag: bool_from_u8(r.get_u8()?, "cc")?,
            utxos: r.get_list()?,
        })
    }
}

/// One transaction touching an address. Negative `satoshis` mark spends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TxRef {
    pub txid: Bits256,
    pub satoshis: i64,
    pub vout: i32,
    pub height: i32,
}

impl Encode for TxRef {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_i64(self.satoshis);
        w.put_i32(self.vout);
        w.put_i32(self.height);
        Ok(())
    }
}

impl Decode for TxRef {
    const MIN_LEN: usize = 32 + 8 + 4 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            satoshis: r.get_i64()?,
            vout: r.get_i32()?,
            height: r.get_i32()?,
        })
    }
}

/// Transaction history of an address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TxRefSet {
    pub address: Address,
    pub node_height: i32,
    pub skip_count: i32,
    pub cc_flag: bool,
    pub txids: Vec<TxRef>,
}

impl Encode for TxRefSet {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_address(&self.address);
        w.put_i32(self.node_height);
        w.put_i32(self.skip_count);
        w.put_u8(self.cc_flag as u8);
        w.put_list("txids", &self.txids)
    }
}

impl Decode for TxRefSet {
    const MIN_LEN: usize = ADDRESS_LEN + 4 + 4 + 1 + 2;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: r.get_address()?,
            node_height: r.get_i32()?,
            skip_count: r.get_i32()?,
            cc_flag: bool_from_u8(r.get_u8()?, "cc")?,
            txids: r.get_list()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

/// What a mempool query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MempoolQuery {
    #[default]
    All = 0,
    Address = 1,
    IsSpent = 2,
    InMempool = 3,
    CcEvalCode = 4,
}

impl MempoolQuery {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::All),
            1 => Some(Self::Address),
            2 => Some(Self::IsSpent),
            3 => Some(Self::InMempool),
            4 => Some(Self::CcEvalCode),
            _ => None,
        }
    }

    /// Parses the RPC spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "all" => Some(Self::All),
            "address" => Some(Self::Address),
            "isspent" => Some(Self::IsSpent),
            "inmempool" => Some(Self::InMempool),
            "cc" | "ccevalcode" => Some(Self::CcEvalCode),
            _ => None,
        }
    }
}

fn get_query(r: &mut Reader<'_>) -> Result<MempoolQuery, DecodeError> {
    let v = r.get_u8()?;
    MempoolQuery::from_u8(v)
        .ok_or_else(|| DecodeError::Malformed(format!("unknown mempool query {}", v)))
}

/// Answer to a mempool query. Which fields carry meaning depends on `query`:
/// listings fill `txids`; `IsSpent` echoes the queried outpoint and lists the
/// spender with `vindex` set to its input; `InMempool` echoes `txid` and lists
/// it when present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MempoolResult {
    pub query: MempoolQuery,
    pub cc_flag: bool,
    pub func_id: u8,
    pub address: Address,
    pub txid: Bits256,
    pub node_height: i32,
    pub vout: i32,
    pub vindex: i32,
    pub txids: Vec<Bits256>,
}

impl MempoolResult {
    /// True when the query found something.
    pub fn is_hit(&self) -> bool {
        !self.txids.is_empty()
    }
}

impl Encode for MempoolResult {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_u8(self.query as u8);
        w.put_u8(self.cc_flag as u8);
        w.put_u8(self.func_id);
        w.put_address(&self.address);
        w.put_hash(&self.txid);
        w.put_i32(self.node_height);
        w.put_i32(self.vout);
        w.put_i32(self.vindex);
        w.put_list("txids", &self.txids)
    }
}

impl Decode for MempoolResult {
    const MIN_LEN: usize = 3 + ADDRESS_LEN + 32 + 4 * 3 + 2;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            query: get_query(r)?,
            cc_flag: bool_from_u8(r.get_u8()?, "cc")?,
            func_id: r.get_u8()?,
            address: r.get_address()?,
            txid: r.get_hash()?,
            node_height: r.get_i32()?,
            vout: r.get_i32()?,
            vindex: r.get_i32()?,
            txids: r.get_list()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Proofs
// ---------------------------------------------------------------------------

/// A transaction with a merkle branch to its block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TxProof {
    pub txid: Bits256,
    /// Value of `vout` if unspent at `height`, else zero.
    pub unspent_value: i64,
    pub height: i32,
    pub vout: i32,
    #[serde(with = "hex_bytes")]
    pub tx: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
}

impl Encode for TxProof {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_i64(self.unspent_value);
        w.put_i32(self.height);
        w.put_i32(self.vout);
        w.put_var_bytes(&self.tx)?;
        w.put_var_bytes(&self.proof)
    }
}

impl Decode for TxProof {
    const MIN_LEN: usize = 32 + 8 + 4 + 4 + 4 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            unspent_value: r.get_i64()?,
            height: r.get_i32()?,
            vout: r.get_i32()?,
            tx: r.get_var_bytes()?,
            proof: r.get_var_bytes()?,
        })
    }
}

/// Proof that `(txid, vout)` was spent by input `spent_vin` of `spent.txid`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SpentInfo {
    pub txid: Bits256,
    pub vout: i32,
    pub spent_vin: i32,
    pub spent: TxProof,
}

impl SpentInfo {
    /// Full nodes answer with a zero spender when the output is unspent.
    pub fn is_spent(&self) -> bool {
        !self.spent.txid.is_zero()
    }
}

impl Encode for SpentInfo {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_i32(self.vout);
        w.put_i32(self.spent_vin);
        self.spent.encode_to(w)
    }
}

impl Decode for SpentInfo {
    const MIN_LEN: usize = 32 + 4 + 4 + TxProof::MIN_LEN;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            vout: r.get_i32()?,
            spent_vin: r.get_i32()?,
            spent: TxProof::decode_from(r)?,
        })
    }
}

/// Relay outcome of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BroadcastResult {
    pub txid: Bits256,
    /// Positive on acceptance, zero or negative on rejection.
    pub retcode: i32,
}

impl BroadcastResult {
    pub fn accepted(&self) -> bool {
        self.retcode > 0
    }
}

impl Encode for BroadcastResult {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_i32(self.retcode);
        Ok(())
    }
}

impl Decode for BroadcastResult {
    const MIN_LEN: usize = 32 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            retcode: r.get_i32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Chain info, with the header at `hdr_height` (0 for the tip).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InfoRequest {
    pub hdr_height: i32,
}

/// Address listing. Shared by UTXOS and TXIDS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressRequest {
    pub address: Address,
    pub cc_flag: bool,
    pub skip_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtzsRequest {
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtzsProofRequest {
    pub prev_txid: Bits256,
    pub next_txid: Bits256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxProofRequest {
    pub txid: Bits256,
    pub vout: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpentInfoRequest {
    pub txid: Bits256,
    pub vout: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastRequest {
    pub txid: Bits256,
    pub tx: Vec<u8>,
}

impl BroadcastRequest {
    /// Builds a request for raw transaction bytes, deriving the txid.
    pub fn for_tx(tx: Vec<u8>) -> Self {
        Self {
            txid: double_sha256(&tx),
            tx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MempoolRequest {
    pub query: MempoolQuery,
    pub cc_flag: bool,
    pub eval_code: u8,
    pub func_id: u8,
    pub address: Address,
    pub txid: Bits256,
    pub vout: i32,
}

impl Encode for InfoRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_i32(self.hdr_height);
        Ok(())
    }
}

impl Decode for InfoRequest {
    const MIN_LEN: usize = 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            hdr_height: r.get_i32()?,
        })
    }
}

impl Encode for AddressRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_address(&self.address);
        w.put_u8(self.cc_flag as u8);
        w.put_i32(self.skip_count);
        Ok(())
    }
}

impl Decode for AddressRequest {
    const MIN_LEN: usize = ADDRESS_LEN + 1 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: r.get_address()?,
            cc_flag: bool_from_u8(r.get_u8()?, "cc")?,
            skip_count: r.get_i32()?,
        })
    }
}

impl Encode for NtzsRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_i32(self.height);
        Ok(())
    }
}

impl Decode for NtzsRequest {
    const MIN_LEN: usize = 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            height: r.get_i32()?,
        })
    }
}

impl Encode for NtzsProofRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.prev_txid);
        w.put_hash(&self.next_txid);
        Ok(())
    }
}

impl Decode for NtzsProofRequest {
    const MIN_LEN: usize = 64;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            prev_txid: r.get_hash()?,
            next_txid: r.get_hash()?,
        })
    }
}

impl Encode for TxProofRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_i32(self.vout);
        w.put_i32(self.height);
        Ok(())
    }
}

impl Decode for TxProofRequest {
    const MIN_LEN: usize = 32 + 4 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            vout: r.get_i32()?,
            height: r.get_i32()?,
        })
    }
}

impl Encode for SpentInfoRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_i32(self.vout);
        Ok(())
    }
}

impl Decode for SpentInfoRequest {
    const MIN_LEN: usize = 32 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            vout: r.get_i32()?,
        })
    }
}

impl Encode for BroadcastRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(&self.txid);
        w.put_var_bytes(&self.tx)
    }
}

impl Decode for BroadcastRequest {
    const MIN_LEN: usize = 32 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            txid: r.get_hash()?,
            tx: r.get_var_bytes()?,
        })
    }
}

impl Encode for MempoolRequest {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_u8(self.query as u8);
        w.put_u8(self.cc_flag as u8);
        w.put_u8(self.eval_code);
        w.put_u8(self.func_id);
        w.put_address(&self.address);
        w.put_hash(&self.txid);
        w.put_i32(self.vout);
        Ok(())
    }
}

impl Decode for MempoolRequest {
    const MIN_LEN: usize = 4 + ADDRESS_LEN + 32 + 4;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            query: get_query(r)?,
            cc_flag: bool_from_u8(r.get_u8()?, "cc")?,
            eval_code: r.get_u8()?,
            func_id: r.get_u8()?,
            address: r.get_address()?,
            txid: r.get_hash()?,
            vout: r.get_i32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}
