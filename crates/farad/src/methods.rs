//! The RPC wrapper surface: each method marshals positional params and
//! unmarshals the typed result through [`Client::call`]. Every call takes a
//! bounded deadline; an unbounded wait is a caller error.

use std::time::Duration;

use serde_json::{json, Value};

use crate::client::Client;
use crate::error::Error;
use crate::types::{
    Balance, BlockHeader, BlockHeaders, HistoryItem, Merkle, MerkleFromPosition, ServerFeatures,
    Transaction, Unspent,
};

/// Client name reported by `server.version`.
pub const CLIENT_VERSION: &str = "farad 0.1";

/// Protocol version negotiated with the server.
pub const PROTOCOL_VERSION: &str = "1.4";

impl Client {
    // ==========================================================================
    // Server meta
    // ==========================================================================

    pub async fn ping(&self, deadline: Duration) -> Result<(), Error> {
        self.request(deadline, "server.ping", Vec::new()).await?;
        Ok(())
    }

    /// Negotiate versions; returns `(server_version, protocol_version)`.
    pub async fn server_version(&self, deadline: Duration) -> Result<(String, String), Error> {
        let versions: Vec<String> = self
            .call(
                deadline,
                "server.version",
                vec![json!(CLIENT_VERSION), json!(PROTOCOL_VERSION)],
            )
            .await?;
        let mut versions = versions.into_iter();
        match (versions.next(), versions.next()) {
            (Some(server), Some(protocol)) => Ok((server, protocol)),
            _ => Err(Error::Protocol(
                "server.version reply must carry [server, protocol]".to_owned(),
            )),
        }
    }

    pub async fn banner(&self, deadline: Duration) -> Result<String, Error> {
        self.call(deadline, "server.banner", Vec::new()).await
    }

    pub async fn donation_address(&self, deadline: Duration) -> Result<String, Error> {
        self.call(deadline, "server.donation_address", Vec::new())
            .await
    }

    pub async fn features(&self, deadline: Duration) -> Result<ServerFeatures, Error> {
        self.call(deadline, "server.features", Vec::new()).await
    }

    /// One-shot peer list; the subscription aspect of `server.peers.subscribe`
    /// was dropped from the protocol.
    pub async fn peers(&self, deadline: Duration) -> Result<Vec<Value>, Error> {
        self.call(deadline, "server.peers.subscribe", Vec::new())
            .await
    }

    // ==========================================================================
    // Fees
    // ==========================================================================

    /// Estimated fee per kilobyte, in coin units, for confirmation within
    /// `target` blocks. `-1` means the server has no estimate.
    pub async fn estimate_fee(&self, deadline: Duration, target: u32) -> Result<f64, Error> {
        self.call(deadline, "blockchain.estimatefee", vec![json!(target)])
            .await
    }

    /// Minimum fee per kilobyte the server's mempool accepts.
    pub async fn relay_fee(&self, deadline: Duration) -> Result<f64, Error> {
        self.call(deadline, "blockchain.relayfee", Vec::new()).await
    }

    /// Mempool fee histogram as `(fee_rate, vsize)` pairs, densest first.
    pub async fn fee_histogram(&self, deadline: Duration) -> Result<Vec<(f64, u64)>, Error> {
        self.call(deadline, "mempool.get_fee_histogram", Vec::new())
            .await
    }

    // ==========================================================================
    // Blocks
    // ==========================================================================

    /// Header at `height`. With a checkpoint the server also returns the
    /// merkle branch and root; `height` must not exceed the checkpoint.
    pub async fn block_header(
        &self,
        deadline: Duration,
        height: u32,
        checkpoint: Option<u32>,
    ) -> Result<BlockHeader, Error> {
        match checkpoint {
            Some(checkpoint) => {
                if height > checkpoint {
                    return Err(Error::CheckpointHeight);
                }
                self.call(
                    deadline,
                    "blockchain.block.header",
                    vec![json!(height), json!(checkpoint)],
                )
                .await
            }
            None => {
                let header: String = self
                    .call(deadline, "blockchain.block.header", vec![json!(height)])
                    .await?;
                Ok(BlockHeader {
                    branch: Vec::new(),
                    header,
                    root: String::new(),
                })
            }
        }
    }

    /// Up to `count` consecutive headers starting at `start_height`.
    pub async fn block_headers(
        &self,
        deadline: Duration,
        start_height: u32,
        count: u32,
        checkpoint: Option<u32>,
    ) -> Result<BlockHeaders, Error> {
        let params = match checkpoint {
            Some(checkpoint) => {
                // Widened so the end of an extreme range cannot wrap.
                let end = u64::from(start_height) + u64::from(count.saturating_sub(1));
                if end > u64::from(checkpoint) {
                    return Err(Error::CheckpointHeight);
                }
                vec![json!(start_height), json!(count), json!(checkpoint)]
            }
            None => vec![json!(start_height), json!(count)],
        };
        self.call(deadline, "blockchain.block.headers", params).await
    }

    // ==========================================================================
    // Transactions
    // ==========================================================================

    /// Broadcast a raw transaction (hex); returns its txid.
    pub async fn broadcast_transaction(
        &self,
        deadline: Duration,
        raw_tx: &str,
    ) -> Result<String, Error> {
        self.call(
            deadline,
            "blockchain.transaction.broadcast",
            vec![json!(raw_tx)],
        )
        .await
    }

    pub async fn transaction(
        &self,
        deadline: Duration,
        tx_hash: &str,
    ) -> Result<Transaction, Error> {
        self.call(
            deadline,
            "blockchain.transaction.get",
            vec![json!(tx_hash), json!(true)],
        )
        .await
    }

    pub async fn raw_transaction(&self, deadline: Duration, tx_hash: &str) -> Result<String, Error> {
        self.call(
            deadline,
            "blockchain.transaction.get",
            vec![json!(tx_hash), json!(false)],
        )
        .await
    }

    pub async fn transaction_merkle(
        &self,
        deadline: Duration,
        tx_hash: &str,
        height: u32,
    ) -> Result<Merkle, Error> {
        self.call(
            deadline,
            "blockchain.transaction.get_merkle",
            vec![json!(tx_hash), json!(height)],
        )
        .await
    }

    pub async fn transaction_id_from_position(
        &self,
        deadline: Duration,
        height: u32,
        position: u32,
    ) -> Result<String, Error> {
        self.call(
            deadline,
            "blockchain.transaction.id_from_pos",
            vec![json!(height), json!(position), json!(false)],
        )
        .await
    }

    pub async fn transaction_merkle_from_position(
        &self,
        deadline: Duration,
        height: u32,
        position: u32,
    ) -> Result<MerkleFromPosition, Error> {
        self.call(
            deadline,
            "blockchain.transaction.id_from_pos",
            vec![json!(height), json!(position), json!(true)],
        )
        .await
    }

    // ==========================================================================
    // Scripthash queries
    // ==========================================================================

    pub async fn balance(&self, deadline: Duration, scripthash: &str) -> Result<Balance, Error> {
        self.call(
            deadline,
            "blockchain.scripthash.get_balance",
            vec![json!(scripthash)],
        )
        .await
    }

    pub async fn history(
        &self,
        deadline: Duration,
        scripthash: &str,
    ) -> Result<Vec<HistoryItem>, Error> {
        self.call(
            deadline,
            "blockchain.scripthash.get_history",
            vec![json!(scripthash)],
        )
        .await
    }

    pub async fn mempool(
        &self,
        deadline: Duration,
        scripthash: &str,
    ) -> Result<Vec<HistoryItem>, Error> {
        self.call(
            deadline,
            "blockchain.scripthash.get_mempool",
            vec![json!(scripthash)],
        )
        .await
    }

    pub async fn unspent(
        &self,
        deadline: Duration,
        scripthash: &str,
    ) -> Result<Vec<Unspent>, Error> {
        self.call(
            deadline,
            "blockchain.scripthash.listunspent",
            vec![json!(scripthash)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::mock::{mock_client, MockHandle};

    const DEADLINE: Duration = Duration::from_secs(5);

    /// Answer the next request with `result`, returning the sent envelope.
    async fn respond(handle: &mut MockHandle, result: Value) -> Value {
        let envelope: Value =
            serde_json::from_str(&handle.sent.recv().await.expect("request sent")).unwrap();
        let reply = json!({"id": envelope["id"], "result": result});
        handle.frames.send(reply.to_string()).await.unwrap();
        envelope
    }

    #[tokio::test]
    async fn balance_marshals_params_and_unmarshals_result() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let (balance, envelope) = tokio::join!(
            client.balance(DEADLINE, "8b01df4e"),
            respond(&mut handle, json!({"confirmed": 12345.0, "unconfirmed": 0.0})),
        );

        assert_eq!(envelope["method"], "blockchain.scripthash.get_balance");
        assert_eq!(envelope["params"], json!(["8b01df4e"]));
        let balance = balance.unwrap();
        assert_eq!(balance.confirmed, 12345.0);
        assert_eq!(balance.unconfirmed, 0.0);
    }

    #[tokio::test]
    async fn server_version_sends_identity_and_splits_the_pair() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let (version, envelope) = tokio::join!(
            client.server_version(DEADLINE),
            respond(&mut handle, json!(["ElectrumX 1.16.0", "1.4"])),
        );

        assert_eq!(envelope["params"], json!([CLIENT_VERSION, PROTOCOL_VERSION]));
        assert_eq!(
            version.unwrap(),
            ("ElectrumX 1.16.0".to_owned(), "1.4".to_owned())
        );
    }

    #[tokio::test]
    async fn plain_block_header_wraps_the_bare_hex_result() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let (header, envelope) = tokio::join!(
            client.block_header(DEADLINE, 500, None),
            respond(&mut handle, json!("00beef")),
        );

        assert_eq!(envelope["params"], json!([500]));
        let header = header.unwrap();
        assert_eq!(header.header, "00beef");
        assert!(header.branch.is_empty());
    }

    #[tokio::test]
    async fn block_header_rejects_height_beyond_checkpoint_locally() {
        let (client, _errors, handle) = mock_client(ClientConfig::default());

        let err = client
            .block_header(DEADLINE, 100, Some(99))
            .await
            .expect_err("height above checkpoint");
        assert!(matches!(err, Error::CheckpointHeight));
        drop(handle);
    }

    #[tokio::test]
    async fn block_headers_validates_the_requested_range() {
        let (client, _errors, handle) = mock_client(ClientConfig::default());

        let err = client
            .block_headers(DEADLINE, 90, 20, Some(100))
            .await
            .expect_err("range runs past checkpoint");
        assert!(matches!(err, Error::CheckpointHeight));

        // A range ending past u32::MAX must fail the check, not wrap.
        let err = client
            .block_headers(DEADLINE, u32::MAX, 2, Some(10))
            .await
            .expect_err("range end exceeds the checkpoint");
        assert!(matches!(err, Error::CheckpointHeight));
        drop(handle);
    }

    #[tokio::test]
    async fn fee_histogram_decodes_pairs() {
        let (client, _errors, mut handle) = mock_client(ClientConfig::default());

        let (histogram, _) = tokio::join!(
            client.fee_histogram(DEADLINE),
            respond(&mut handle, json!([[12.5, 400000], [1.0, 1500000]])),
        );
        assert_eq!(histogram.unwrap(), vec![(12.5, 400_000), (1.0, 1_500_000)]);
    }
}
