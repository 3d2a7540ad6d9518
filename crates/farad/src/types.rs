//! Typed results for the Electrum RPC surface.
//!
//! Field names follow the protocol documentation:
//! <https://electrumx.readthedocs.io/en/latest/protocol-methods.html>

use std::collections::HashMap;

use serde::Deserialize;

/// `blockchain.scripthash.get_balance` result, in satoshis.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Balance {
    pub confirmed: f64,
    pub unconfirmed: f64,
}

/// One entry of `blockchain.scripthash.get_history` or `.get_mempool`.
/// `height` is 0 for mempool entries and -1 when unconfirmed parents exist.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryItem {
    #[serde(rename = "tx_hash")]
    pub tx_hash: String,
    pub height: i64,
    #[serde(default)]
    pub fee: Option<u64>,
}

/// One entry of `blockchain.scripthash.listunspent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Unspent {
    pub height: u64,
    #[serde(rename = "tx_pos")]
    pub position: u32,
    #[serde(rename = "tx_hash")]
    pub tx_hash: String,
    pub value: u64,
}

/// `blockchain.block.header` result. `branch` and `root` are only present
/// when a checkpoint height was supplied.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub branch: Vec<String>,
    pub header: String,
    #[serde(default)]
    pub root: String,
}

/// `blockchain.block.headers` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockHeaders {
    pub count: u32,
    #[serde(rename = "hex")]
    pub headers: String,
    pub max: u32,
    #[serde(default)]
    pub branch: Vec<String>,
    #[serde(default)]
    pub root: String,
}

/// `blockchain.headers.subscribe` payload: the immediate reply and every
/// subsequent push carry the tip header in this shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeaderNotification {
    pub height: i64,
    pub hex: String,
}

/// A `blockchain.scripthash.subscribe` event for a tracked scripthash.
/// `status` is `None` for a script with no history.
#[derive(Debug, Clone, PartialEq)]
pub struct ScripthashNotification {
    pub scripthash: String,
    pub status: Option<String>,
}

/// `server.features` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFeatures {
    pub genesis_hash: String,
    pub hosts: HashMap<String, HostPorts>,
    pub protocol_max: String,
    pub protocol_min: String,
    #[serde(default)]
    pub pruning: Option<u64>,
    pub server_version: String,
    pub hash_function: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostPorts {
    #[serde(default)]
    pub tcp_port: Option<u16>,
    #[serde(default)]
    pub ssl_port: Option<u16>,
}

/// Verbose `blockchain.transaction.get` result. Confirmation fields are
/// absent for mempool transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub blocktime: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<i64>,
    pub hash: String,
    pub hex: String,
    pub locktime: u32,
    pub size: u32,
    #[serde(default)]
    pub time: Option<u64>,
    pub version: u32,
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vin {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(rename = "scriptSig", default)]
    pub script_sig: Option<ScriptSig>,
    pub sequence: u32,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSig {
    pub asm: String,
    pub hex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vout {
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pubkey: ScriptPubkey,
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPubkey {
    #[serde(default)]
    pub addresses: Vec<String>,
    pub asm: String,
    #[serde(default)]
    pub hex: String,
    #[serde(rename = "reqSigs", default)]
    pub req_sigs: Option<u32>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `blockchain.transaction.get_merkle` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Merkle {
    pub merkle: Vec<String>,
    #[serde(rename = "block_height")]
    pub height: u64,
    #[serde(rename = "pos")]
    pub position: u32,
}

/// `blockchain.transaction.id_from_pos` result with `merkle = true`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MerkleFromPosition {
    #[serde(rename = "tx_hash")]
    pub tx_hash: String,
    pub merkle: Vec<String>,
}
