//! # Gateway RPC
//!
//! Types for the local command gateway. A client writes one JSON object per
//! line, `{"id", "method", "params"}`, and reads back one object per line,
//! `{"id", "result"}` or `{"id", "error"}`. Parameters are positional, as in
//! the full node's own RPC. The TCP server lives in the node binary; this
//! module parses commands, runs them against an [`NspvClient`], and maps
//! failures to error codes.
//!
//! ## Method Index
//!
//! | Method             | Params                                   |
//! |--------------------|------------------------------------------|
//! | `getinfo`          | `[hdr_height?]`                          |
//! | `listunspent`      | `[address?, is_cc?, skip_count?]`        |
//! | `listtransactions` | `[address?, is_cc?, skip_count?]`        |
//! | `mempool`          | `[query, ...]` (see [`parse_mempool`])   |
//! | `notarizations`    | `[height]`                               |
//! | `hdrsproof`        | `[prev_ntz_txid, next_ntz_txid]`         |
//! | `txproof`          | `[txid, vout?, height?]`                 |
//! | `spentinfo`        | `[txid, vout]`                           |
//! | `broadcast`        | `[rawtx_hex]`                            |
//! | `login`            | `[wif, address]`                         |
//! | `logout`           | `[]`                                     |
//! | `selectinputs`     | `[amount_coins]`                         |
//! | `verifytx`         | `[txid, vout?, height?]`                 |
//! | `stop`             | `[]`                                     |
//!
//! ## Error Codes
//!
//! | Code     | Meaning                                  |
//! |----------|------------------------------------------|
//! | `-32700` | Line is not JSON                         |
//! | `-32600` | JSON is not a request object             |
//! | `-32601` | Unknown method                           |
//! | `-32602` | Bad parameters                           |
//! | `-32603` | Internal error                           |
//! | `-32010` | No peer answered in time                 |
//! | `-32011` | No NSPV peers connected                  |
//! | `-32012` | Request cancelled by shutdown            |
//! | `-32020` | Proof did not verify                     |
//! | `-32030` | Not logged in, or the login expired      |
//! | `-32040` | Coin selection failed                    |
//! | `-32050` | Encoding or stored data error            |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{ClientError, NspvClient};
use crate::codec::Address;
use crate::config::SATOSHIDEN;
use crate::crypto::Bits256;
use crate::message::{MempoolQuery, MempoolRequest};
use crate::network::DispatchError;
use crate::session::KeyMaterial;
use crate::storage::StoreError;

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcMethod {
    GetInfo,
    ListUnspent,
    ListTransactions,
    Mempool,
    Notarizations,
    HdrsProof,
    TxProof,
    SpentInfo,
    Broadcast,
    Login,
    Logout,
    SelectInputs,
    VerifyTx,
    Stop,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 14] = [
        RpcMethod::GetInfo,
        RpcMethod::ListUnspent,
        RpcMethod::ListTransactions,
        RpcMethod::Mempool,
        RpcMethod::Notarizations,
        RpcMethod::HdrsProof,
        RpcMethod::TxProof,
        RpcMethod::SpentInfo,
        RpcMethod::Broadcast,
        RpcMethod::Login,
        RpcMethod::Logout,
        RpcMethod::SelectInputs,
        RpcMethod::VerifyTx,
        RpcMethod::Stop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RpcMethod::GetInfo => "getinfo",
            RpcMethod::ListUnspent => "listunspent",
            RpcMethod::ListTransactions => "listtransactions",
            RpcMethod::Mempool => "mempool",
            RpcMethod::Notarizations => "notarizations",
            RpcMethod::HdrsProof => "hdrsproof",
            RpcMethod::TxProof => "txproof",
            RpcMethod::SpentInfo => "spentinfo",
            RpcMethod::Broadcast => "broadcast",
            RpcMethod::Login => "login",
            RpcMethod::Logout => "logout",
            RpcMethod::SelectInputs => "selectinputs",
            RpcMethod::VerifyTx => "verifytx",
            RpcMethod::Stop => "stop",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Whether the method needs a live login.
    pub fn needs_login(self) -> bool {
        matches!(self, RpcMethod::SelectInputs)
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// One line from a gateway client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Echoed back in the response.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: Value, method: RpcMethod, params: Value) -> Self {
        Self {
            id,
            method: method.name().to_string(),
            params,
        }
    }

    /// Parses one request line. On failure returns the error response to
    /// send back, carrying the id when one could be read.
    pub fn from_line(line: &str) -> Result<Self, RpcResponse> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| RpcResponse::error(Value::Null, RpcError::parse_error(e.to_string())))?;
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| RpcResponse::error(id, RpcError::invalid_request(e.to_string())))
    }
}

/// One line back to a gateway client. Exactly one of `result` and `error`
/// is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_outcome(id: Value, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(v) => Self::success(id, v),
            Err(e) => Self::error(id, e),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const TIMEOUT: i32 = -32010;
    pub const NO_PEERS: i32 = -32011;
    pub const CANCELLED: i32 = -32012;
    pub const UNVERIFIED: i32 = -32020;
    pub const SESSION: i32 = -32030;
    pub const COIN_SELECTION: i32 = -32040;
    pub const CODEC: i32 = -32050;

    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, msg)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method not found: {}", method))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(Self::TIMEOUT, msg)
    }

    pub fn no_peers() -> Self {
        Self::new(Self::NO_PEERS, "no connected NSPV peers")
    }

    pub fn cancelled() -> Self {
        Self::new(Self::CANCELLED, "request cancelled")
    }

    pub fn unverified(msg: impl Into<String>) -> Self {
        Self::new(Self::UNVERIFIED, msg)
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::new(Self::SESSION, msg)
    }

    pub fn coin_selection(msg: impl Into<String>) -> Self {
        Self::new(Self::COIN_SELECTION, msg)
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::new(Self::CODEC, msg)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl From<&ClientError> for RpcError {
    fn from(e: &ClientError) -> Self {
        let msg = e.to_string();
        match e {
            ClientError::Dispatch(DispatchError::Timeout { .. }) => Self::timeout(msg),
            ClientError::Dispatch(DispatchError::NoPeersAvailable) => Self::no_peers(),
            ClientError::Dispatch(DispatchError::Cancelled) => Self::cancelled(),
            ClientError::Dispatch(DispatchError::Encode(_)) => Self::codec(msg),
            ClientError::Proof(_) => Self::unverified(msg),
            ClientError::Session(_) => Self::session(msg),
            ClientError::CoinSelection(_) => Self::coin_selection(msg),
            ClientError::Store(StoreError::Corrupt { .. }) => Self::codec(msg),
            ClientError::Store(_) | ClientError::UnexpectedResponse { .. } => {
                Self::internal_error(msg)
            }
            ClientError::InvalidParams(_) => Self::invalid_params(msg),
        }
    }
}

impl From<ClientError> for RpcError {
    fn from(e: ClientError) -> Self {
        Self::from(&e)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A parsed, typed gateway command.
#[derive(Debug)]
pub enum RpcCommand {
    GetInfo {
        hdr_height: i32,
    },
    ListUnspent {
        address: Option<Address>,
        cc_flag: bool,
        skip_count: i32,
    },
    ListTransactions {
        address: Option<Address>,
        cc_flag: bool,
        skip_count: i32,
    },
    Mempool(MempoolRequest),
    Notarizations {
        height: i32,
    },
    HdrsProof {
        prev_txid: Bits256,
        next_txid: Bits256,
    },
    TxProof {
        txid: Bits256,
        vout: i32,
        height: i32,
    },
    SpentInfo {
        txid: Bits256,
        vout: i32,
    },
    Broadcast {
        tx: Vec<u8>,
    },
    Login {
        material: KeyMaterial,
        address: Address,
    },
    Logout,
    SelectInputs {
        target: i64,
    },
    VerifyTx {
        txid: Bits256,
        vout: i32,
        height: i32,
    },
    Stop,
}

impl RpcCommand {
    /// Parses `method` and its positional `params`.
    pub fn parse(method: &str, params: Value) -> Result<Self, RpcError> {
        let m = RpcMethod::from_name(method).ok_or_else(|| RpcError::method_not_found(method))?;
        let mut p = Params::new(m, params)?;
        let cmd = match m {
            RpcMethod::GetInfo => RpcCommand::GetInfo {
                hdr_height: p.opt_i32(0, "hdr_height")?.unwrap_or(0),
            },
            RpcMethod::ListUnspent => RpcCommand::ListUnspent {
                address: p.opt_address(0)?,
                cc_flag: p.opt_bool(1, "is_cc")?.unwrap_or(false),
                skip_count: p.opt_i32(2, "skip_count")?.unwrap_or(0),
            },
            RpcMethod::ListTransactions => RpcCommand::ListTransactions {
                address: p.opt_address(0)?,
                cc_flag: p.opt_bool(1, "is_cc")?.unwrap_or(false),
                skip_count: p.opt_i32(2, "skip_count")?.unwrap_or(0),
            },
            RpcMethod::Mempool => RpcCommand::Mempool(parse_mempool(&mut p)?),
            RpcMethod::Notarizations => RpcCommand::Notarizations {
                height: p.req_i32(0, "height")?,
            },
            RpcMethod::HdrsProof => RpcCommand::HdrsProof {
                prev_txid: p.req_hash(0, "prev_txid")?,
                next_txid: p.req_hash(1, "next_txid")?,
            },
            RpcMethod::TxProof => RpcCommand::TxProof {
                txid: p.req_hash(0, "txid")?,
                vout: p.opt_i32(1, "vout")?.unwrap_or(0),
                height: p.opt_i32(2, "height")?.unwrap_or(0),
            },
            RpcMethod::SpentInfo => RpcCommand::SpentInfo {
                txid: p.req_hash(0, "txid")?,
                vout: p.req_i32(1, "vout")?,
            },
            RpcMethod::Broadcast => RpcCommand::Broadcast {
                tx: hex::decode(p.req_str(0, "rawtx")?.trim())
                    .map_err(|e| RpcError::invalid_params(format!("rawtx: {}", e)))?,
            },
            RpcMethod::Login => {
                let material = KeyMaterial::from(p.take_string(0, "wif")?);
                let address = p
                    .opt_address(1)?
                    .ok_or_else(|| RpcError::invalid_params("missing address"))?;
                RpcCommand::Login { material, address }
            }
            RpcMethod::Logout => RpcCommand::Logout,
            RpcMethod::SelectInputs => RpcCommand::SelectInputs {
                target: p.req_coins(0, "amount")?,
            },
            RpcMethod::VerifyTx => RpcCommand::VerifyTx {
                txid: p.req_hash(0, "txid")?,
                vout: p.opt_i32(1, "vout")?.unwrap_or(0),
                height: p.opt_i32(2, "height")?.unwrap_or(0),
            },
            RpcMethod::Stop => RpcCommand::Stop,
        };
        Ok(cmd)
    }

    pub fn method(&self) -> RpcMethod {
        match self {
            RpcCommand::GetInfo { .. } => RpcMethod::GetInfo,
            RpcCommand::ListUnspent { .. } => RpcMethod::ListUnspent,
            RpcCommand::ListTransactions { .. } => RpcMethod::ListTransactions,
            RpcCommand::Mempool(_) => RpcMethod::Mempool,
            RpcCommand::Notarizations { .. } => RpcMethod::Notarizations,
            RpcCommand::HdrsProof { .. } => RpcMethod::HdrsProof,
            RpcCommand::TxProof { .. } => RpcMethod::TxProof,
            RpcCommand::SpentInfo { .. } => RpcMethod::SpentInfo,
            RpcCommand::Broadcast { .. } => RpcMethod::Broadcast,
            RpcCommand::Login { .. } => RpcMethod::Login,
            RpcCommand::Logout => RpcMethod::Logout,
            RpcCommand::SelectInputs { .. } => RpcMethod::SelectInputs,
            RpcCommand::VerifyTx { .. } => RpcMethod::VerifyTx,
            RpcCommand::Stop => RpcMethod::Stop,
        }
    }
}

/// Mempool query params, keyed by the query name in slot 0:
///
/// - `["all"]`
/// - `["address", address, is_cc?]`
/// - `["isspent", txid, vout]`
/// - `["inmempool", txid]`
/// - `["cc", eval_code, func_id?]`
pub fn parse_mempool(p: &mut Params) -> Result<MempoolRequest, RpcError> {
    let name = p.opt_str(0, "query")?.unwrap_or_else(|| "all".to_string());
    let query = MempoolQuery::from_name(&name)
        .ok_or_else(|| RpcError::invalid_params(format!("unknown mempool query {:?}", name)))?;
    let mut req = MempoolRequest {
        query,
        ..Default::default()
    };
    match query {
        MempoolQuery::All => {}
        MempoolQuery::Address => {
            req.address = p
                .opt_address(1)?
                .ok_or_else(|| RpcError::invalid_params("missing address"))?;
            req.cc_flag = p.opt_bool(2, "is_cc")?.unwrap_or(false);
        }
        MempoolQuery::IsSpent => {
            req.txid = p.req_hash(1, "txid")?;
            req.vout = p.req_i32(2, "vout")?;
        }
        MempoolQuery::InMempool => {
            req.txid = p.req_hash(1, "txid")?;
        }
        MempoolQuery::CcEvalCode => {
            req.cc_flag = true;
            req.eval_code = p.req_u8(1, "eval_code")?;
            req.func_id = p.opt_u8(2, "func_id")?.unwrap_or(0);
        }
    }
    Ok(req)
}

/// Positional parameters of one request.
pub struct Params {
    method: RpcMethod,
    items: Vec<Value>,
}

impl Params {
    fn new(method: RpcMethod, params: Value) -> Result<Self, RpcError> {
        let items = match params {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            _ => {
                return Err(RpcError::invalid_params(format!(
                    "{}: params must be an array",
                    method
                )))
            }
        };
        Ok(Self { method, items })
    }

    fn bad(&self, name: &str, why: &str) -> RpcError {
        RpcError::invalid_params(format!("{}: {} {}", self.method, name, why))
    }

    fn get(&self, idx: usize) -> Option<&Value> {
        self.items.get(idx).filter(|v| !v.is_null())
    }

    fn opt_i64(&self, idx: usize, name: &str) -> Result<Option<i64>, RpcError> {
        match self.get(idx) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.bad(name, "must be an integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.bad(name, "must be an integer")),
            Some(_) => Err(self.bad(name, "must be an integer")),
        }
    }

    fn opt_i32(&self, idx: usize, name: &str) -> Result<Option<i32>, RpcError> {
        self.opt_i64(idx, name)?
            .map(|v| i32::try_from(v).map_err(|_| self.bad(name, "is out of range")))
            .transpose()
    }

    fn req_i32(&self, idx: usize, name: &str) -> Result<i32, RpcError> {
        self.opt_i32(idx, name)?
            .ok_or_else(|| self.bad(name, "is required"))
    }

    fn opt_u8(&self, idx: usize, name: &str) -> Result<Option<u8>, RpcError> {
        self.opt_i64(idx, name)?
            .map(|v| u8::try_from(v).map_err(|_| self.bad(name, "is out of range")))
            .transpose()
    }

    fn req_u8(&self, idx: usize, name: &str) -> Result<u8, RpcError> {
        self.opt_u8(idx, name)?
            .ok_or_else(|| self.bad(name, "is required"))
    }

    fn opt_bool(&self, idx: usize, name: &str) -> Result<Option<bool>, RpcError> {
        match self.get(idx) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) if n.as_u64() == Some(0) => Ok(Some(false)),
            Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(Some(true)),
            Some(_) => Err(self.bad(name, "must be a boolean")),
        }
    }

    fn opt_str(&self, idx: usize, name: &str) -> Result<Option<String>, RpcError> {
        match self.get(idx) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.bad(name, "must be a string")),
        }
    }

    fn req_str(&self, idx: usize, name: &str) -> Result<String, RpcError> {
        self.opt_str(idx, name)?
            .ok_or_else(|| self.bad(name, "is required"))
    }

    /// Moves a string out, leaving null behind.
    fn take_string(&mut self, idx: usize, name: &str) -> Result<String, RpcError> {
        match self.items.get_mut(idx).map(Value::take) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            _ => Err(self.bad(name, "must be a non-empty string")),
        }
    }

    fn req_hash(&self, idx: usize, name: &str) -> Result<Bits256, RpcError> {
        let s = self.req_str(idx, name)?;
        Bits256::from_display_hex(&s).map_err(|e| self.bad(name, &e.to_string()))
    }

    fn opt_address(&self, idx: usize) -> Result<Option<Address>, RpcError> {
        match self.opt_str(idx, "address")? {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => Address::new(s)
                .map(Some)
                .map_err(|e| self.bad("address", &e.to_string())),
        }
    }

    /// A coin amount, converted to satoshis.
    fn req_coins(&self, idx: usize, name: &str) -> Result<i64, RpcError> {
        let coins = match self.get(idx) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|c| c.is_finite() && *c > 0.0)
        .ok_or_else(|| self.bad(name, "must be a positive amount"))?;
        let sats = (coins * SATOSHIDEN as f64).round();
        if sats < 1.0 || sats > i64::MAX as f64 {
            return Err(self.bad(name, "is out of range"));
        }
        Ok(sats as i64)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn to_json<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(e.to_string()))
}

/// Runs one command. `stop` only acknowledges here; shutting down is the
/// gateway's job.
pub async fn execute(client: &NspvClient, cmd: RpcCommand) -> Result<Value, RpcError> {
    if cmd.method().needs_login() {
        client.session().require().map_err(ClientError::from)?;
    }
    match cmd {
        RpcCommand::GetInfo { hdr_height } => to_json(&client.getinfo(hdr_height).await?),
        RpcCommand::ListUnspent {
            address,
            cc_flag,
            skip_count,
        } => to_json(&client.listunspent(address, cc_flag, skip_count).await?),
        RpcCommand::ListTransactions {
            address,
            cc_flag,
            skip_count,
        } => to_json(&client.listtransactions(address, cc_flag, skip_count).await?),
        RpcCommand::Mempool(req) => to_json(&client.mempool(req).await?),
        RpcCommand::Notarizations { height } => to_json(&client.notarizations(height).await?),
        RpcCommand::HdrsProof {
            prev_txid,
            next_txid,
        } => to_json(&client.hdrsproof(prev_txid, next_txid).await?),
        RpcCommand::TxProof { txid, vout, height } => {
            to_json(&client.txproof(txid, vout, height).await?)
        }
        RpcCommand::SpentInfo { txid, vout } => to_json(&client.spentinfo(txid, vout).await?),
        RpcCommand::Broadcast { tx } => {
            let r = client.broadcast(tx).await?;
            Ok(json!({
                "txid": r.txid,
                "retcode": r.retcode,
                "accepted": r.accepted(),
            }))
        }
        RpcCommand::Login { material, address } => to_json(&client.login(material, address)?),
        RpcCommand::Logout => Ok(json!({ "logged_out": client.logout() })),
        RpcCommand::SelectInputs { target } => to_json(&client.selectinputs(target).await?),
        RpcCommand::VerifyTx { txid, vout, height } => {
            to_json(&client.verifytx(txid, vout, height).await?)
        }
        RpcCommand::Stop => Ok(json!("stopping")),
    }
}
