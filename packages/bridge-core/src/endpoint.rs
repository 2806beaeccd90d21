use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use log::{debug, info, warn};

use crate::{
    chain_adapter::{BridgeSdk, ChainConnection},
    config::TrackingConfig,
    types::{Address, Amount, AssetDescriptor, ChainRole, Receipt, TxHash},
    Error, Result,
};

/// 一条链的引用：角色、名称和连接
#[derive(Clone)]
pub struct ChainRef {
    pub role: ChainRole,
    pub name: String,
    connection: Arc<dyn ChainConnection>,
}

impl ChainRef {
    pub fn new(role: ChainRole, name: impl Into<String>, connection: Arc<dyn ChainConnection>) -> Self {
        Self {
            role,
            name: name.into(),
            connection,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.connection.chain_id()
    }

    pub fn connection(&self) -> &Arc<dyn ChainConnection> {
        &self.connection
    }
}

impl std::fmt::Debug for ChainRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRef")
            .field("role", &self.role)
            .field("name", &self.name)
            .field("chain_id", &self.chain_id())
            .finish()
    }
}

/// 等待回执的参数
#[derive(Debug, Clone)]
pub struct ReceiptPolicy {
    pub poll_interval: Duration,
    pub attempts: u32,
    pub confirmations: u64,
    pub transient_retries: u32,
}

impl From<&TrackingConfig> for ReceiptPolicy {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            poll_interval: config.receipt_poll_interval(),
            attempts: config.receipt_attempts,
            confirmations: config.confirmations,
            transient_retries: config.transient_retries,
        }
    }
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        ReceiptPolicy::from(&TrackingConfig::default())
    }
}

/// 父链与子链的连接对，以及桥 SDK
#[derive(Clone)]
pub struct EndpointPair {
    parent: ChainRef,
    child: ChainRef,
    sdk: Arc<dyn BridgeSdk>,
    receipts: ReceiptPolicy,
}

impl EndpointPair {
    pub fn new(
        parent: ChainRef,
        child: ChainRef,
        sdk: Arc<dyn BridgeSdk>,
        receipts: ReceiptPolicy,
    ) -> Result<Self> {
        if parent.role != ChainRole::Parent || child.role != ChainRole::Child {
            return Err(Error::Config(format!(
                "Endpoint roles out of order: got ({}, {})",
                parent.role, child.role
            )));
        }
        if parent.chain_id() == child.chain_id() {
            return Err(Error::Config(format!(
                "Parent and child endpoints point at the same chain {}",
                parent.chain_id()
            )));
        }
        if receipts.attempts == 0 {
            return Err(Error::Config("Receipt attempts must be greater than 0".to_string()));
        }
        Ok(Self {
            parent,
            child,
            sdk,
            receipts,
        })
    }

    pub fn chain(&self, role: ChainRole) -> &ChainRef {
        match role {
            ChainRole::Parent => &self.parent,
            ChainRole::Child => &self.child,
        }
    }

    pub fn sdk(&self) -> &Arc<dyn BridgeSdk> {
        &self.sdk
    }

    pub fn receipt_policy(&self) -> &ReceiptPolicy {
        &self.receipts
    }

    /// 瞬时读取失败在有限次数内重试
    pub(crate) async fn read_with_retry<T, F, Fut>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failures = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && failures < self.receipts.transient_retries => {
                    failures += 1;
                    warn!("Transient failure reading {} ({}/{}): {}", what, failures, self.receipts.transient_retries, e);
                    sleep(self.receipts.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn balance_of(&self, role: ChainRole, asset: &AssetDescriptor, account: &Address) -> Result<Amount> {
        let connection = self.chain(role).connection();
        match (role, asset) {
            // 自定义 gas token 在子链上就是原生资产
            (_, AssetDescriptor::Native) | (ChainRole::Child, AssetDescriptor::CustomGasToken { .. }) => {
                self.read_with_retry("native balance", || connection.native_balance(account)).await
            }
            _ => {
                self.read_with_retry("token balance", || self.sdk.balance_of(role, asset, account))
                    .await
            }
        }
    }

    pub async fn block_number(&self, role: ChainRole) -> Result<u64> {
        let connection = self.chain(role).connection();
        self.read_with_retry("block number", || connection.block_number()).await
    }

    /// 轮询直到交易出现在链上，并等够配置的确认数
    pub async fn wait_for_receipt(&self, role: ChainRole, tx_hash: &TxHash) -> Result<Receipt> {
        let connection = self.chain(role).connection();
        let mut failures = 0;

        for attempt in 1..=self.receipts.attempts {
            match connection.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    debug!("Receipt for {} on {} chain found at block {}", tx_hash, role, receipt.block_number);
                    self.wait_for_confirmations(role, &receipt, self.receipts.confirmations)
                        .await?;
                    return Ok(receipt);
                }
                Ok(None) => {
                    debug!("Receipt for {} not yet available (attempt {}/{})", tx_hash, attempt, self.receipts.attempts);
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures > self.receipts.transient_retries {
                        return Err(e);
                    }
                    warn!("Transient failure fetching receipt {}: {}", tx_hash, e);
                }
                Err(e) => return Err(e),
            }
            if attempt < self.receipts.attempts {
                sleep(self.receipts.poll_interval).await;
            }
        }

        Err(Error::TransactionNotFound {
            chain: role,
            tx_hash: *tx_hash,
            attempts: self.receipts.attempts,
        })
    }

    /// 等待回执并要求交易执行成功
    pub async fn wait_for_success(&self, role: ChainRole, tx_hash: &TxHash) -> Result<Receipt> {
        let receipt = self.wait_for_receipt(role, tx_hash).await?;
        if !receipt.success {
            return Err(Error::TransactionReverted {
                chain: role,
                tx_hash: *tx_hash,
            });
        }
        info!("Transaction {} confirmed on {} chain", tx_hash, role);
        Ok(receipt)
    }

    pub async fn wait_for_confirmations(&self, role: ChainRole, receipt: &Receipt, confirmations: u64) -> Result<()> {
        if confirmations <= 1 {
            return Ok(());
        }
        let target = receipt.block_number + confirmations - 1;
        let mut have = 0;
        for _ in 0..self.receipts.attempts {
            let head = self.block_number(role).await?;
            if head >= target {
                return Ok(());
            }
            // 打包区块本身算一次确认
            have = (head + 1).saturating_sub(receipt.block_number);
            debug!("Waiting for {} confirmations of {}: head {} target {}", confirmations, receipt.tx_hash, head, target);
            sleep(self.receipts.poll_interval).await;
        }
        Err(Error::ConfirmationsPending {
            chain: role,
            tx_hash: receipt.tx_hash,
            have,
            want: confirmations,
        })
    }
}
