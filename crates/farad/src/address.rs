//! Bitcoin address to Electrum scripthash derivation.

use std::fmt::Write as _;

use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, Network};

use crate::error::Error;

/// Derive the Electrum scripthash for `address`: the sha256 digest of its
/// script pubkey, byte-reversed, as lowercase hex.
/// <https://electrumx.readthedocs.io/en/latest/protocol-basics.html#script-hashes>
pub fn address_to_scripthash(address: &str, network: Network) -> Result<String, Error> {
    let address = address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|err| Error::InvalidAddress(err.to_string()))?
        .require_network(network)
        .map_err(|err| Error::InvalidAddress(err.to_string()))?;

    let digest = sha256::Hash::hash(address.script_pubkey().as_bytes());
    let mut bytes = digest.to_byte_array();
    bytes.reverse();

    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}
