use async_trait::async_trait;
use crate::{
    types::{
        Address, Amount, AssetDescriptor, ChainRole, Direction, MessageStatus, Receipt,
        RelayedMessage, Signer, TxHash, WithdrawalEvent,
    },
    Error,
};

/// 单条链的连接，只负责读取
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainConnection: Send + Sync {
    /// 链 ID
    fn chain_id(&self) -> u64;

    /// 交易回执，尚未打包时返回 None
    async fn get_transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, Error>;

    /// 当前区块高度
    async fn block_number(&self) -> Result<u64, Error>;

    /// 原生资产余额
    async fn native_balance(&self, account: &Address) -> Result<Amount, Error>;
}

/// 桥 SDK：签名、编码、证明构造都在它内部完成，这里只看到窄的类型化操作
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeSdk: Send + Sync {
    async fn approve(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        spender: &Address,
        amount: Amount,
        signer: &Signer,
    ) -> Result<TxHash, Error>;

    async fn allowance(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, Error>;

    /// 代币在父链上对应的网关
    async fn parent_gateway(&self, parent_token: &Address) -> Result<Address, Error>;

    /// 存款需要额外支付的 gas token 费用上限
    async fn deposit_gas_fee(&self, asset: &AssetDescriptor, amount: Amount) -> Result<Amount, Error>;

    /// 注册自定义代币需要的 gas token 费用
    async fn registration_gas_fee(&self, parent_token: &Address) -> Result<Amount, Error>;

    async fn submit_deposit(
        &self,
        asset: &AssetDescriptor,
        amount: Amount,
        signer: &Signer,
        destination_chain: u64,
    ) -> Result<TxHash, Error>;

    async fn submit_withdrawal(
        &self,
        asset: &AssetDescriptor,
        amount: Amount,
        signer: &Signer,
        destination: &Address,
    ) -> Result<TxHash, Error>;

    async fn submit_custom_token_registration(
        &self,
        parent_token: &Address,
        child_token: &Address,
        signer: &Signer,
    ) -> Result<TxHash, Error>;

    /// 按发出顺序返回回执中的跨链消息
    async fn messages_from_receipt(
        &self,
        receipt: &Receipt,
        direction: Direction,
    ) -> Result<Vec<RelayedMessage>, Error>;

    /// 回执中的提现事件
    async fn withdrawal_events(&self, receipt: &Receipt) -> Result<Vec<WithdrawalEvent>, Error>;

    async fn status(&self, message: &RelayedMessage) -> Result<MessageStatus, Error>;

    async fn execute_message(&self, message: &RelayedMessage, signer: &Signer) -> Result<TxHash, Error>;

    async fn balance_of(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        account: &Address,
    ) -> Result<Amount, Error>;
}

pub mod rpc;
pub mod service;

pub use rpc::JsonRpcChain;
pub use service::BridgeServiceClient;
