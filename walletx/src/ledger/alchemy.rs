//! Alchemy `alchemy_getAssetTransfers` remote source.
//!
//! Each fetch issues two JSON-RPC calls concurrently: one for transfers sent
//! by the address and one for transfers it received. Only `external`
//! (native-currency) transfers are requested, 50 per direction, with block
//! metadata for timestamps.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};

use super::{Direction, PartitionKey, RawTransferRecord, RemoteLedgerSource};
use crate::chain::{Chain, Network};
use crate::config::WalletxConfig;
use crate::error::{ConfigResult, RemoteResult, RemoteSourceError};

/// Maximum transfers requested per direction (`0x32`).
const MAX_COUNT: &str = "0x32";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<TransfersResult>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TransfersResult {
    #[serde(default)]
    transfers: Vec<AlchemyTransfer>,
}

#[derive(Debug, Deserialize)]
struct AlchemyTransfer {
    from: String,
    to: Option<String>,
    value: Option<f64>,
    hash: String,
    metadata: Option<TransferMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferMetadata {
    block_timestamp: String,
}

/// Remote source backed by Alchemy's transfers API (EVM chains only).
#[derive(Debug, Clone)]
pub struct AlchemyTransferSource {
    client: reqwest::Client,
    endpoints: HashMap<(Chain, Network), String>,
}

impl AlchemyTransferSource {
    /// Creates a source with no endpoints.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoints: HashMap::new(),
        }
    }

    /// Registers the RPC URL for a chain's network.
    #[must_use]
    pub fn with_endpoint(mut self, chain: Chain, network: Network, url: impl Into<String>) -> Self {
        self.endpoints.insert((chain, network), url.into());
        self
    }

    /// Builds a source from configuration, registering every EVM endpoint
    /// resolvable from the config file or the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &WalletxConfig) -> ConfigResult<Self> {
        let mut source = Self::new(config.http.build_client()?);
        for chain in Chain::ALL.into_iter().filter(|c| c.is_evm()) {
            for network in [Network::Mainnet, Network::Testnet] {
                if let Some(url) = config.resolve_rpc_url(chain, network) {
                    source.endpoints.insert((chain, network), url);
                }
            }
        }
        Ok(source)
    }

    fn endpoint(&self, partition: &PartitionKey) -> RemoteResult<&str> {
        if !partition.chain().is_evm() {
            return Err(RemoteSourceError::UnsupportedChain(partition.chain()));
        }
        self.endpoints
            .get(&(partition.chain(), partition.network()))
            .map(String::as_str)
            .ok_or_else(|| {
                RemoteSourceError::unavailable(format!(
                    "no RPC endpoint configured for {} {}",
                    partition.chain(),
                    partition.network()
                ))
            })
    }

    async fn query(
        &self,
        url: &str,
        address: &str,
        direction: Direction,
    ) -> RemoteResult<Vec<RawTransferRecord>> {
        let (id, address_field) = match direction {
            Direction::Outgoing => (1, "fromAddress"),
            Direction::Incoming => (2, "toAddress"),
        };
        let body = json!({
            "id": id,
            "jsonrpc": "2.0",
            "method": "alchemy_getAssetTransfers",
            "params": [{
                "fromBlock": "0x0",
                "toBlock": "latest",
                address_field: address,
                "category": ["external"],
                "withMetadata": true,
                "excludeZeroValue": false,
                "maxCount": MAX_COUNT,
            }],
        });

        let response = self.client.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteSourceError::unavailable(format!(
                "HTTP {status}: {text}"
            )));
        }

        let text = response.text().await?;
        trace!(bytes = text.len(), ?direction, "alchemy response received");
        parse_transfers(&text, direction)
    }
}

/// Decodes an `alchemy_getAssetTransfers` response body.
fn parse_transfers(body: &str, direction: Direction) -> RemoteResult<Vec<RawTransferRecord>> {
    let response: RpcResponse =
        serde_json::from_str(body).map_err(|e| RemoteSourceError::Decode(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(RemoteSourceError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    let result = response
        .result
        .ok_or_else(|| RemoteSourceError::Decode("response has neither result nor error".into()))?;

    result
        .transfers
        .into_iter()
        .map(|t| {
            let metadata = t.metadata.ok_or_else(|| {
                RemoteSourceError::Decode(format!("transfer {} has no metadata", t.hash))
            })?;
            Ok(RawTransferRecord {
                timestamp: parse_timestamp(&metadata.block_timestamp)?,
                from: t.from,
                to: t.to,
                value: t.value,
                hash: t.hash,
                direction,
            })
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> RemoteResult<u64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| RemoteSourceError::Decode(format!("block timestamp '{raw}': {e}")))?;
    u64::try_from(parsed.timestamp())
        .map_err(|_| RemoteSourceError::Decode(format!("block timestamp '{raw}' predates 1970")))
}

#[async_trait]
impl RemoteLedgerSource for AlchemyTransferSource {
    async fn fetch(&self, partition: &PartitionKey) -> RemoteResult<Vec<RawTransferRecord>> {
        let url = self.endpoint(partition)?;
        let address = partition.address();

        let (mut sent, received) = tokio::try_join!(
            self.query(url, address, Direction::Outgoing),
            self.query(url, address, Direction::Incoming),
        )?;
        debug!(
            partition = %partition,
            sent = sent.len(),
            received = received.len(),
            "alchemy transfers fetched"
        );
        sent.extend(received);
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENT: &str = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "transfers": [
                {
                    "blockNum": "0x10",
                    "hash": "0xdef",
                    "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                    "value": 1.000001,
                    "asset": "ETH",
                    "category": "external",
                    "metadata": { "blockTimestamp": "2024-05-01T12:00:04.000Z" }
                },
                {
                    "hash": "0xnull",
                    "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "to": null,
                    "value": null,
                    "metadata": { "blockTimestamp": "1970-01-01T00:00:10Z" }
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_transfers() {
        let records = parse_transfers(SENT, Direction::Outgoing).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.hash, "0xdef");
        assert_eq!(first.timestamp, 1_714_564_804);
        assert_eq!(first.value, Some(1.000_001));
        assert_eq!(first.direction, Direction::Outgoing);

        assert_eq!(records[1].to, None);
        assert_eq!(records[1].value, None);
        assert_eq!(records[1].timestamp, 10);
    }

    #[test]
    fn test_parse_empty_result() {
        let body = r#"{"jsonrpc":"2.0","id":2,"result":{"transfers":[]}}"#;
        assert!(parse_transfers(body, Direction::Incoming).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rpc_error() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"invalid address"}}"#;
        let err = parse_transfers(body, Direction::Outgoing).unwrap_err();
        assert!(matches!(err, RemoteSourceError::Rpc { code: -32602, .. }));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_transfers("<html>", Direction::Outgoing).unwrap_err(),
            RemoteSourceError::Decode(_)
        ));
        let bad_time = SENT.replace("2024-05-01T12:00:04.000Z", "yesterday");
        assert!(matches!(
            parse_transfers(&bad_time, Direction::Outgoing).unwrap_err(),
            RemoteSourceError::Decode(_)
        ));
    }

    #[tokio::test]
    async fn test_endpoint_resolution() {
        let source = AlchemyTransferSource::new(reqwest::Client::new()).with_endpoint(
            Chain::Base,
            Network::Testnet,
            "https://base-sepolia.g.alchemy.com/v2/key",
        );

        let sol = PartitionKey::new(Chain::Solana, Network::Mainnet, "So1");
        assert!(matches!(
            source.fetch(&sol).await.unwrap_err(),
            RemoteSourceError::UnsupportedChain(Chain::Solana)
        ));

        let unconfigured = PartitionKey::new(Chain::Polygon, Network::Mainnet, "0xabc");
        assert!(matches!(
            source.fetch(&unconfigured).await.unwrap_err(),
            RemoteSourceError::RemoteSourceUnavailable(_)
        ));

        let configured = PartitionKey::new(Chain::Base, Network::Testnet, "0xabc");
        assert!(source.endpoint(&configured).is_ok());
    }
}
