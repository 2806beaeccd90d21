use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use log::{debug, warn};

use crate::{
    types::{Address, Amount, ChainRole, LogEntry, Receipt, TxHash},
    Error,
};
use super::ChainConnection;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// 以太坊 JSON-RPC 连接
pub struct JsonRpcChain {
    role: ChainRole,
    chain_id: u64,
    rpc_url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl JsonRpcChain {
    pub fn new(role: ChainRole, chain_id: u64, rpc_url: &str) -> Self {
        Self {
            role,
            chain_id,
            rpc_url: rpc_url.to_string(),
            client: reqwest::Client::new(),
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// 只重试瞬时错误，延迟线性增长
    async fn retry_with_backoff<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    retries += 1;
                    if retries >= self.max_retries {
                        return Err(e);
                    }
                    warn!("Retry {}/{} for {} chain RPC after error: {}", retries, self.max_retries, self.role, e);
                    sleep(self.retry_delay * retries).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        self.retry_with_backoff(|| async {
            debug!("{} chain RPC {}", self.role, method);
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": method,
                    "params": params,
                    "id": 1
                }))
                .send()
                .await
                .map_err(|e| Error::ChainUnavailable {
                    chain: self.role,
                    reason: e.to_string(),
                })?;

            let mut result: Value = response
                .json()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;

            if let Some(error) = result.get("error") {
                return Err(Error::Chain(format!("{} failed: {}", method, error)));
            }

            Ok(result.get_mut("result").map(Value::take).unwrap_or(Value::Null))
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    block_number: String,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

fn parse_quantity(value: &str) -> Result<u128, Error> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| Error::Serialization(format!("Invalid quantity {}: {}", value, e)))
}

fn parse_block(value: &str) -> Result<u64, Error> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity).map_err(|_| Error::Serialization(format!("Block number out of range: {}", value)))
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = Error;

    fn try_from(raw: RpcReceipt) -> Result<Self, Self::Error> {
        Ok(Receipt {
            tx_hash: raw.transaction_hash,
            block_number: parse_block(&raw.block_number)?,
            success: raw.status.as_deref().map(parse_quantity).transpose()?.unwrap_or(1) == 1,
            logs: raw
                .logs
                .into_iter()
                .map(|log| LogEntry {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ChainConnection for JsonRpcChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, Error> {
        let result = self
            .call("eth_getTransactionReceipt", serde_json::json!([tx_hash.to_string()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RpcReceipt =
            serde_json::from_value(result).map_err(|e| Error::Serialization(e.to_string()))?;
        Receipt::try_from(raw).map(Some)
    }

    async fn block_number(&self) -> Result<u64, Error> {
        let result = self.call("eth_blockNumber", serde_json::json!([])).await?;
        let value = result
            .as_str()
            .ok_or_else(|| Error::Serialization(format!("Unexpected eth_blockNumber result: {}", result)))?;
        parse_block(value)
    }

    async fn native_balance(&self, account: &Address) -> Result<Amount, Error> {
        let result = self
            .call("eth_getBalance", serde_json::json!([account.to_string(), "latest"]))
            .await?;
        let value = result
            .as_str()
            .ok_or_else(|| Error::Serialization(format!("Unexpected eth_getBalance result: {}", result)))?;
        parse_quantity(value)
    }
}
