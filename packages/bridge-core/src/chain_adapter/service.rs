use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use log::{debug, warn};

use crate::{
    types::{
        Address, Amount, AssetDescriptor, ChainRole, Direction, MessageStatus, Receipt,
        RelayedMessage, Signer, TxHash, WithdrawalEvent,
    },
    Error,
};
use super::BridgeSdk;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// 桥 SDK 服务的 JSON-RPC 客户端
///
/// 签名和合约编码都在服务端完成，`Signer::key_id` 用来选择服务端保管的密钥。
/// 数量以十进制字符串传输，避免超过 JSON 数字精度。
pub struct BridgeServiceClient {
    service_url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl BridgeServiceClient {
    pub fn new(service_url: &str) -> Self {
        Self {
            service_url: service_url.to_string(),
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

    /// 只读请求：瞬时错误会重试
    async fn query<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let mut retries = 0;
        loop {
            match self.request(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    retries += 1;
                    if retries >= self.max_retries {
                        return Err(e);
                    }
                    warn!("Retry {}/{} for {} after error: {}", retries, self.max_retries, method, e);
                    sleep(self.retry_delay * retries).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 提交交易的请求只发一次，重复提交可能造成双花
    async fn submit(&self, method: &str, params: Value) -> Result<TxHash, Error> {
        let tx_hash: TxHash = self.request(method, &params).await?;
        debug!("{} submitted {}", method, tx_hash);
        Ok(tx_hash)
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T, Error> {
        let response = self
            .client
            .post(&self.service_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": [params],
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let mut result: Value = response
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if let Some(error) = result.get("error") {
            return Err(Error::Chain(format!("{} failed: {}", method, error)));
        }

        let value = result.get_mut("result").map(Value::take).unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| Error::Serialization(format!("{}: {}", method, e)))
    }
}

fn parse_amount(value: String) -> Result<Amount, Error> {
    value
        .parse()
        .map_err(|e| Error::Serialization(format!("Invalid amount {}: {}", value, e)))
}

#[async_trait]
impl BridgeSdk for BridgeServiceClient {
    async fn approve(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        spender: &Address,
        amount: Amount,
        signer: &Signer,
    ) -> Result<TxHash, Error> {
        self.submit(
            "bridge_approve",
            json!({
                "chain": chain,
                "asset": asset,
                "spender": spender,
                "amount": amount.to_string(),
                "signer": signer,
            }),
        )
        .await
    }

    async fn allowance(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, Error> {
        let value: String = self
            .query(
                "bridge_allowance",
                json!({ "chain": chain, "asset": asset, "owner": owner, "spender": spender }),
            )
            .await?;
        parse_amount(value)
    }

    async fn parent_gateway(&self, parent_token: &Address) -> Result<Address, Error> {
        self.query("bridge_parentGateway", json!({ "token": parent_token })).await
    }

    async fn deposit_gas_fee(&self, asset: &AssetDescriptor, amount: Amount) -> Result<Amount, Error> {
        let value: String = self
            .query(
                "bridge_depositGasFee",
                json!({ "asset": asset, "amount": amount.to_string() }),
            )
            .await?;
        parse_amount(value)
    }

    async fn registration_gas_fee(&self, parent_token: &Address) -> Result<Amount, Error> {
        let value: String = self
            .query("bridge_registrationGasFee", json!({ "token": parent_token }))
            .await?;
        parse_amount(value)
    }

    async fn submit_deposit(
        &self,
        asset: &AssetDescriptor,
        amount: Amount,
        signer: &Signer,
        destination_chain: u64,
    ) -> Result<TxHash, Error> {
        self.submit(
            "bridge_deposit",
            json!({
                "asset": asset,
                "amount": amount.to_string(),
                "signer": signer,
                "destinationChain": destination_chain,
            }),
        )
        .await
    }

    async fn submit_withdrawal(
        &self,
        asset: &AssetDescriptor,
        amount: Amount,
        signer: &Signer,
        destination: &Address,
    ) -> Result<TxHash, Error> {
        self.submit(
            "bridge_withdraw",
            json!({
                "asset": asset,
                "amount": amount.to_string(),
                "signer": signer,
                "destination": destination,
            }),
        )
        .await
    }

    async fn submit_custom_token_registration(
        &self,
        parent_token: &Address,
        child_token: &Address,
        signer: &Signer,
    ) -> Result<TxHash, Error> {
        self.submit(
            "bridge_registerCustomToken",
            json!({ "parentToken": parent_token, "childToken": child_token, "signer": signer }),
        )
        .await
    }

    async fn messages_from_receipt(
        &self,
        receipt: &Receipt,
        direction: Direction,
    ) -> Result<Vec<RelayedMessage>, Error> {
        self.query(
            "bridge_messagesFromReceipt",
            json!({ "receipt": receipt, "direction": direction }),
        )
        .await
    }

    async fn withdrawal_events(&self, receipt: &Receipt) -> Result<Vec<WithdrawalEvent>, Error> {
        self.query("bridge_withdrawalEvents", json!({ "receipt": receipt })).await
    }

    async fn status(&self, message: &RelayedMessage) -> Result<MessageStatus, Error> {
        self.query("bridge_messageStatus", json!({ "message": message })).await
    }

    async fn execute_message(&self, message: &RelayedMessage, signer: &Signer) -> Result<TxHash, Error> {
        self.submit(
            "bridge_executeMessage",
            json!({ "message": message, "signer": signer }),
        )
        .await
    }

    async fn balance_of(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        account: &Address,
    ) -> Result<Amount, Error> {
        let value: String = self
            .query(
                "bridge_balanceOf",
                json!({ "chain": chain, "asset": asset, "account": account }),
            )
            .await?;
        parse_amount(value)
    }
}
