//! Execution-layer JSON-RPC client (latest block number only)

use super::error::ChainError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Last proof-of-work block; blocks after it are counted as post-merge
pub const DEFAULT_GENESIS_BLOCK: u64 = 15_537_393;

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, ChainError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// [`ChainRpc`] over HTTP JSON-RPC 2.0
pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

/// Decode a `0x`-prefixed hex quantity
pub fn parse_hex_quantity(raw: &str) -> Result<u64, ChainError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ChainError::InvalidBlockNumber(raw.to_string()))?;

    u64::from_str_radix(digits, 16).map_err(|_| ChainError::InvalidBlockNumber(raw.to_string()))
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1,
        });

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        let result = response.result.ok_or(ChainError::MissingResult)?;
        parse_hex_quantity(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_hex_quantity("0xed14f1").unwrap(), 15_537_393);
        assert_eq!(parse_hex_quantity("0XFF").unwrap(), 255);
    }

    #[test]
    fn test_parse_hex_quantity_rejects_garbage() {
        assert!(parse_hex_quantity("15537393").is_err());
        assert!(parse_hex_quantity("0x").is_err());
        assert!(parse_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn test_rpc_error_response_shape() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#;
        let response: RpcResponse = serde_json::from_str(raw).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32000);
    }
}
