//! 内存中的父链/子链账本和桥 SDK
//!
//! 同时实现 `ChainConnection` 和 `BridgeSdk`，按脚本推进消息状态，
//! 记录调用顺序，并模拟中继延迟和挑战期。只用于测试。

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    chain_adapter::{BridgeSdk, ChainConnection},
    config::{BridgeNetwork, TrackingConfig},
    endpoint::{ChainRef, EndpointPair, ReceiptPolicy},
    types::{
        Address, Amount, AssetDescriptor, ChainRole, ChildToParentStatus, Direction,
        MessageId, MessageStatus, ParentToChildStatus, Receipt, RelayedMessage, Signer, TxHash,
        WithdrawalEvent,
    },
    workflow::Bridge,
    Error,
};

pub const PARENT_CHAIN_ID: u64 = 412346;
pub const CHILD_CHAIN_ID: u64 = 333333;

/// 自定义 gas token 网络上 ERC20 存款需要的费用
pub const DEPOSIT_FEE: Amount = 1_000;
pub const REGISTRATION_FEE: Amount = 2_000;

const STANDARD_GATEWAY: u64 = 0x6a7e;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// 消息到达成功终态后才入账
#[derive(Debug, Clone)]
struct Credit {
    chain: ChainRole,
    asset: AssetDescriptor,
    account: Address,
    amount: Amount,
}

struct TrackedMessage {
    message: RelayedMessage,
    script: VecDeque<MessageStatus>,
    credit: Option<Credit>,
}

impl TrackedMessage {
    /// 每读一次推进一步，停在最后一个状态
    fn advance(&mut self) -> MessageStatus {
        if self.script.len() > 1 {
            if let Some(next) = self.script.pop_front() {
                self.message.status = next;
            }
        } else if let Some(last) = self.script.front() {
            self.message.status = *last;
        }
        self.message.status
    }
}

struct Ledger {
    native: HashMap<(ChainRole, Address), Amount>,
    tokens: HashMap<(ChainRole, Address, Address), Amount>,
    allowances: HashMap<(ChainRole, Address, Address, Address), Amount>,
    receipts: HashMap<TxHash, (ChainRole, Receipt)>,
    blocks: HashMap<ChainRole, u64>,
    messages: HashMap<MessageId, TrackedMessage>,
    emitted: HashMap<TxHash, Vec<MessageId>>,
    withdrawals: HashMap<TxHash, Vec<WithdrawalEvent>>,
    deposit_script: Vec<ParentToChildStatus>,
    registration_script: (Vec<ParentToChildStatus>, Vec<ParentToChildStatus>),
    withdrawal_fanout: u32,
    next_position: u64,
    nonce: u64,
    reverts: Vec<String>,
    status_failures: u32,
    status_stall: Option<Duration>,
    submissions: Vec<TxHash>,
    trace: Vec<String>,
}

impl Ledger {
    fn new() -> Self {
        Self {
            native: HashMap::new(),
            tokens: HashMap::new(),
            allowances: HashMap::new(),
            receipts: HashMap::new(),
            blocks: HashMap::from([(ChainRole::Parent, 100), (ChainRole::Child, 1_000)]),
            messages: HashMap::new(),
            emitted: HashMap::new(),
            withdrawals: HashMap::new(),
            deposit_script: vec![ParentToChildStatus::Created, ParentToChildStatus::Redeemed],
            registration_script: (vec![ParentToChildStatus::Redeemed], vec![ParentToChildStatus::Redeemed]),
            withdrawal_fanout: 1,
            next_position: 0,
            nonce: 0,
            reverts: Vec::new(),
            status_failures: 0,
            status_stall: None,
            submissions: Vec::new(),
            trace: Vec::new(),
        }
    }

    fn balance(&self, chain: ChainRole, token: Option<Address>, account: &Address) -> Amount {
        match token {
            None => self.native.get(&(chain, *account)).copied().unwrap_or_default(),
            Some(token) => self.tokens.get(&(chain, token, *account)).copied().unwrap_or_default(),
        }
    }

    fn balance_entry(&mut self, chain: ChainRole, token: Option<Address>, account: &Address) -> &mut Amount {
        match token {
            None => self.native.entry((chain, *account)).or_default(),
            Some(token) => self.tokens.entry((chain, token, *account)).or_default(),
        }
    }

    fn allowance(&self, chain: ChainRole, token: Address, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(chain, token, *owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    /// 余额和授权都够时扣款并消耗授权
    fn spend(&mut self, chain: ChainRole, token: Option<Address>, owner: &Address, spender: Option<&Address>, amount: Amount) -> bool {
        if self.balance(chain, token, owner) < amount {
            return false;
        }
        if let (Some(token), Some(spender)) = (token, spender) {
            let allowance = self.allowances.entry((chain, token, *owner, *spender)).or_default();
            if *allowance < amount {
                return false;
            }
            *allowance -= amount;
        }
        *self.balance_entry(chain, token, owner) -= amount;
        true
    }

    fn apply(&mut self, credit: &Credit, gas_token: Option<Address>) {
        let token = match (&credit.asset, credit.chain) {
            (AssetDescriptor::Native, ChainRole::Parent) => gas_token,
            (AssetDescriptor::Native, ChainRole::Child) => None,
            (AssetDescriptor::CustomGasToken { parent_address }, ChainRole::Parent) => Some(*parent_address),
            (AssetDescriptor::CustomGasToken { .. }, ChainRole::Child) => None,
            (AssetDescriptor::Erc20 { parent_address, .. }, _) => Some(*parent_address),
        };
        *self.balance_entry(credit.chain, token, &credit.account) += credit.amount;
    }

    /// 打包一笔交易，按 kind 记录调用顺序
    fn mine(&mut self, chain: ChainRole, kind: String, success: bool) -> TxHash {
        self.nonce += 1;
        let tx_hash = TxHash::from_low_u64(0x7000 + self.nonce);
        let reverted = match self.reverts.iter().position(|k| kind.starts_with(k.as_str())) {
            Some(i) => {
                self.reverts.remove(i);
                true
            }
            None => false,
        };
        let block = self.blocks.entry(chain).or_default();
        *block += 1;
        let receipt = Receipt {
            tx_hash,
            block_number: *block,
            success: success && !reverted,
            logs: vec![],
        };
        self.receipts.insert(tx_hash, (chain, receipt));
        self.submissions.push(tx_hash);
        self.trace.push(kind);
        tx_hash
    }

    fn succeeded(&self, tx_hash: &TxHash) -> bool {
        self.receipts.get(tx_hash).map_or(false, |(_, receipt)| receipt.success)
    }

    fn emit(&mut self, tx_hash: TxHash, direction: Direction, script: Vec<MessageStatus>, credit: Option<Credit>) -> MessageId {
        let emitted = self.emitted.entry(tx_hash).or_default();
        let id = MessageId::new(tx_hash, emitted.len() as u32);
        emitted.push(id);
        let initial = match direction {
            Direction::ParentToChild => MessageStatus::ParentToChild(ParentToChildStatus::Created),
            Direction::ChildToParent => MessageStatus::ChildToParent(ChildToParentStatus::Unconfirmed),
        };
        let message = RelayedMessage {
            direction,
            source_tx_hash: tx_hash,
            sequence_index: id.sequence_index,
            status: initial,
            created_at: unix_now(),
        };
        self.messages.insert(
            id,
            TrackedMessage {
                message,
                script: script.into_iter().collect(),
                credit,
            },
        );
        id
    }
}

/// 测试用的整套桥环境，clone 后共享同一个账本
#[derive(Clone)]
pub struct FakeBridge {
    ledger: Arc<Mutex<Ledger>>,
    network: BridgeNetwork,
    signer: Signer,
}

impl Default for FakeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBridge {
    /// 子链以 ETH 为原生资产
    pub fn new() -> Self {
        Self::build(None)
    }

    /// 子链使用父链上的 ERC20 作为 gas token
    pub fn with_gas_token() -> Self {
        Self::build(Some(Self::gas_token()))
    }

    fn build(gas_token: Option<Address>) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger::new())),
            network: BridgeNetwork {
                service_url: "http://fake-bridge".to_string(),
                inbox: Address::from_low_u64(0x1b0c),
                gas_token,
                parent_custom_gateway: Address::from_low_u64(0xc5a7),
                child_custom_gateway: Address::from_low_u64(0xc5a8),
            },
            signer: Signer::new(Address::from_low_u64(0xa11ce), "fake"),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn gas_token() -> Address {
        Address::from_low_u64(0x6a5)
    }

    /// 走自定义网关的代币
    pub fn parent_token() -> Address {
        Address::from_low_u64(0xc0ffee)
    }

    pub fn child_token() -> Address {
        Address::from_low_u64(0xc0ffef)
    }

    /// 走标准网关的代币
    pub fn erc20() -> Address {
        Address::from_low_u64(0xe20)
    }

    pub fn standard_gateway() -> Address {
        Address::from_low_u64(STANDARD_GATEWAY)
    }

    pub fn gas_token_asset(&self) -> AssetDescriptor {
        AssetDescriptor::CustomGasToken {
            parent_address: self.network.gas_token.unwrap_or_else(Self::gas_token),
        }
    }

    pub fn network(&self) -> &BridgeNetwork {
        &self.network
    }

    pub fn signer(&self) -> Signer {
        self.signer.clone()
    }

    pub fn tracking() -> TrackingConfig {
        TrackingConfig {
            poll_interval_ms: 1,
            deposit_max_wait_secs: 5,
            registration_max_wait_secs: 5,
            confirmation_poll_interval_ms: 1,
            confirmation_deadline_secs: 5,
            receipt_poll_interval_ms: 1,
            receipt_attempts: 5,
            confirmations: 1,
            transient_retries: 2,
        }
    }

    pub fn endpoints(&self) -> EndpointPair {
        let parent = FakeChain {
            role: ChainRole::Parent,
            ledger: self.ledger.clone(),
        };
        let child = FakeChain {
            role: ChainRole::Child,
            ledger: self.ledger.clone(),
        };
        // 角色与链 ID 都是固定的，构造不会失败
        EndpointPair::new(
            ChainRef::new(ChainRole::Parent, "fake-parent", Arc::new(parent)),
            ChainRef::new(ChainRole::Child, "fake-child", Arc::new(child)),
            Arc::new(self.clone()),
            ReceiptPolicy::from(&Self::tracking()),
        )
        .expect("fake endpoints are consistent")
    }

    pub fn bridge(&self) -> Bridge {
        Bridge::new(self.endpoints(), self.network.clone(), Self::tracking())
    }

    pub fn mint_native(&self, chain: ChainRole, account: &Address, amount: Amount) {
        *self.ledger().balance_entry(chain, None, account) += amount;
    }

    pub fn mint_token(&self, token: &Address, account: &Address, amount: Amount) {
        *self.ledger().balance_entry(ChainRole::Parent, Some(*token), account) += amount;
    }

    /// 子链上的代币余额，按父链代币地址记账
    pub fn mint_child_token(&self, parent_token: &Address, account: &Address, amount: Amount) {
        *self.ledger().balance_entry(ChainRole::Child, Some(*parent_token), account) += amount;
    }

    pub fn mint_gas_token(&self, account: &Address, amount: Amount) {
        self.mint_token(&self.gas_token_asset_address(), account, amount);
    }

    fn gas_token_asset_address(&self) -> Address {
        self.network.gas_token.unwrap_or_else(Self::gas_token)
    }

    pub fn native_balance(&self, chain: ChainRole, account: &Address) -> Amount {
        self.ledger().balance(chain, None, account)
    }

    pub fn token_balance(&self, chain: ChainRole, token: &Address, account: &Address) -> Amount {
        self.ledger().balance(chain, Some(*token), account)
    }

    /// 之后的存款消息依次经历这些状态
    pub fn script_deposit(&self, statuses: Vec<ParentToChildStatus>) {
        self.ledger().deposit_script = statuses;
    }

    pub fn script_registration(&self, set_token: Vec<ParentToChildStatus>, set_gateways: Vec<ParentToChildStatus>) {
        self.ledger().registration_script = (set_token, set_gateways);
    }

    /// 每笔提现发出的消息数
    pub fn set_withdrawal_fanout(&self, messages: u32) {
        self.ledger().withdrawal_fanout = messages.max(1);
    }

    /// 下一笔 kind 开头的交易回滚
    pub fn revert_next(&self, kind: &str) {
        self.ledger().reverts.push(kind.to_string());
    }

    /// 接下来的 n 次状态查询返回网络错误
    pub fn fail_next_status_reads(&self, n: u32) {
        self.ledger().status_failures = n;
    }

    /// 之后每次状态查询先挂起这么久
    pub fn stall_status_reads(&self, stall: Duration) {
        self.ledger().status_stall = Some(stall);
    }

    /// 挑战期结束：所有未确认的子链消息变为 CONFIRMED
    pub fn elapse_challenge_period(&self) {
        let mut ledger = self.ledger();
        for tracked in ledger.messages.values_mut() {
            if tracked.message.status == MessageStatus::ChildToParent(ChildToParentStatus::Unconfirmed) {
                tracked.message.status = MessageStatus::ChildToParent(ChildToParentStatus::Confirmed);
            }
        }
    }

    pub fn message_status(&self, id: &MessageId) -> Option<MessageStatus> {
        self.ledger().messages.get(id).map(|tracked| tracked.message.status)
    }

    pub fn trace(&self) -> Vec<String> {
        self.ledger().trace.clone()
    }

    /// 第一条以 prefix 开头的调用记录的位置
    pub fn trace_position(&self, prefix: &str) -> Option<usize> {
        self.ledger().trace.iter().position(|entry| entry.starts_with(prefix))
    }

    pub fn submissions(&self, prefix: &str) -> usize {
        let ledger = self.ledger();
        ledger
            .trace
            .iter()
            .filter(|entry| entry.starts_with(prefix) && !entry.starts_with("receipt"))
            .count()
    }

    pub fn last_submission(&self) -> Option<TxHash> {
        self.ledger().submissions.last().copied()
    }
}

/// 一条链的只读视图
struct FakeChain {
    role: ChainRole,
    ledger: Arc<Mutex<Ledger>>,
}

impl FakeChain {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChainConnection for FakeChain {
    fn chain_id(&self) -> u64 {
        match self.role {
            ChainRole::Parent => PARENT_CHAIN_ID,
            ChainRole::Child => CHILD_CHAIN_ID,
        }
    }

    async fn get_transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, Error> {
        let mut ledger = self.ledger();
        ledger.trace.push(format!("receipt {}", tx_hash));
        Ok(ledger
            .receipts
            .get(tx_hash)
            .filter(|(chain, _)| *chain == self.role)
            .map(|(_, receipt)| receipt.clone()))
    }

    async fn block_number(&self) -> Result<u64, Error> {
        Ok(self.ledger().blocks.get(&self.role).copied().unwrap_or_default())
    }

    async fn native_balance(&self, account: &Address) -> Result<Amount, Error> {
        Ok(self.ledger().balance(self.role, None, account))
    }
}

#[async_trait]
impl BridgeSdk for FakeBridge {
    async fn approve(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        spender: &Address,
        amount: Amount,
        signer: &Signer,
    ) -> Result<TxHash, Error> {
        let token = asset
            .parent_token()
            .ok_or_else(|| Error::Chain("native asset has no allowance".to_string()))?;
        let mut ledger = self.ledger();
        let tx_hash = ledger.mine(chain, format!("approve {} {}", asset, spender), true);
        if ledger.succeeded(&tx_hash) {
            ledger.allowances.insert((chain, token, signer.address, *spender), amount);
        }
        Ok(tx_hash)
    }

    async fn allowance(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, Error> {
        let token = asset
            .parent_token()
            .ok_or_else(|| Error::Chain("native asset has no allowance".to_string()))?;
        Ok(self.ledger().allowance(chain, token, owner, spender))
    }

    async fn parent_gateway(&self, parent_token: &Address) -> Result<Address, Error> {
        if *parent_token == Self::parent_token() {
            Ok(self.network.parent_custom_gateway)
        } else {
            Ok(Self::standard_gateway())
        }
    }

    async fn deposit_gas_fee(&self, asset: &AssetDescriptor, _amount: Amount) -> Result<Amount, Error> {
        match (self.network.gas_token, asset) {
            (None, _) | (_, AssetDescriptor::Native) => Ok(0),
            _ => Ok(DEPOSIT_FEE),
        }
    }

    async fn registration_gas_fee(&self, _parent_token: &Address) -> Result<Amount, Error> {
        Ok(if self.network.uses_custom_gas_token() { REGISTRATION_FEE } else { 0 })
    }

    async fn submit_deposit(
        &self,
        asset: &AssetDescriptor,
        amount: Amount,
        signer: &Signer,
        destination_chain: u64,
    ) -> Result<TxHash, Error> {
        if destination_chain != CHILD_CHAIN_ID {
            return Err(Error::Chain(format!("unknown destination chain {}", destination_chain)));
        }
        let owner = signer.address;
        let inbox = self.network.inbox;
        let gas_token = self.network.gas_token;
        let mut ledger = self.ledger();

        let funded = match asset {
            AssetDescriptor::Native => ledger.spend(ChainRole::Parent, None, &owner, None, amount),
            AssetDescriptor::CustomGasToken { parent_address } => ledger.spend(
                ChainRole::Parent,
                Some(*parent_address),
                &owner,
                Some(&inbox),
                amount + DEPOSIT_FEE,
            ),
            AssetDescriptor::Erc20 { parent_address, .. } => {
                let gateway = if *parent_address == Self::parent_token() {
                    self.network.parent_custom_gateway
                } else {
                    Self::standard_gateway()
                };
                let fee_paid = match gas_token {
                    Some(gas_token) => ledger.spend(ChainRole::Parent, Some(gas_token), &owner, Some(&inbox), DEPOSIT_FEE),
                    None => true,
                };
                fee_paid && ledger.spend(ChainRole::Parent, Some(*parent_address), &owner, Some(&gateway), amount)
            }
        };

        let tx_hash = ledger.mine(ChainRole::Parent, format!("deposit {} {}", asset, amount), funded);
        if ledger.succeeded(&tx_hash) {
            let script = ledger
                .deposit_script
                .iter()
                .map(|status| MessageStatus::ParentToChild(*status))
                .collect();
            let credit = Credit {
                chain: ChainRole::Child,
                asset: asset.clone(),
                account: owner,
                amount,
            };
            ledger.emit(tx_hash, Direction::ParentToChild, script, Some(credit));
        }
        Ok(tx_hash)
    }

    async fn submit_withdrawal(
        &self,
        asset: &AssetDescriptor,
        amount: Amount,
        signer: &Signer,
        destination: &Address,
    ) -> Result<TxHash, Error> {
        let owner = signer.address;
        let mut ledger = self.ledger();
        let token = match asset {
            AssetDescriptor::Erc20 { parent_address, .. } => Some(*parent_address),
            _ => None,
        };
        let funded = ledger.spend(ChainRole::Child, token, &owner, None, amount);
        let tx_hash = ledger.mine(ChainRole::Child, format!("withdraw {} {}", asset, amount), funded);
        if !ledger.succeeded(&tx_hash) {
            return Ok(tx_hash);
        }

        let child_block = ledger.blocks.get(&ChainRole::Child).copied().unwrap_or_default();
        let parent_block = ledger.blocks.get(&ChainRole::Parent).copied().unwrap_or_default();
        let mut events = Vec::new();
        for i in 0..ledger.withdrawal_fanout {
            // 只有第一条消息携带资产
            let credit = (i == 0).then(|| Credit {
                chain: ChainRole::Parent,
                asset: asset.clone(),
                account: *destination,
                amount,
            });
            ledger.emit(tx_hash, Direction::ChildToParent, vec![], credit);

            let position = ledger.next_position;
            ledger.next_position += 1;
            events.push(WithdrawalEvent {
                position,
                hash: TxHash::from_low_u64(0xe000_0000 + position),
                child_block,
                parent_block,
                caller: owner,
                destination: *destination,
                callvalue: amount,
                timestamp: unix_now(),
                data: "0x".to_string(),
            });
        }
        ledger.withdrawals.insert(tx_hash, events);
        Ok(tx_hash)
    }

    async fn submit_custom_token_registration(
        &self,
        parent_token: &Address,
        child_token: &Address,
        signer: &Signer,
    ) -> Result<TxHash, Error> {
        let mut ledger = self.ledger();
        let fee_paid = match self.network.gas_token {
            Some(gas_token) => ledger.spend(ChainRole::Parent, Some(gas_token), &signer.address, Some(parent_token), REGISTRATION_FEE),
            None => true,
        };
        let tx_hash = ledger.mine(ChainRole::Parent, format!("register {} {}", parent_token, child_token), fee_paid);
        if ledger.succeeded(&tx_hash) {
            let (set_token, set_gateways) = ledger.registration_script.clone();
            for script in [set_token, set_gateways] {
                let script = script.into_iter().map(MessageStatus::ParentToChild).collect();
                ledger.emit(tx_hash, Direction::ParentToChild, script, None);
            }
        }
        Ok(tx_hash)
    }

    async fn messages_from_receipt(&self, receipt: &Receipt, direction: Direction) -> Result<Vec<RelayedMessage>, Error> {
        let ledger = self.ledger();
        let ids = ledger.emitted.get(&receipt.tx_hash).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| ledger.messages.get(id))
            .map(|tracked| tracked.message.clone())
            .filter(|message| message.direction == direction)
            .collect())
    }

    async fn withdrawal_events(&self, receipt: &Receipt) -> Result<Vec<WithdrawalEvent>, Error> {
        Ok(self.ledger().withdrawals.get(&receipt.tx_hash).cloned().unwrap_or_default())
    }

    async fn status(&self, message: &RelayedMessage) -> Result<MessageStatus, Error> {
        let stall = self.ledger().status_stall;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        let gas_token = self.network.gas_token;
        let mut ledger = self.ledger();
        if ledger.status_failures > 0 {
            ledger.status_failures -= 1;
            return Err(Error::Network("fake status read failure".to_string()));
        }
        let tracked = ledger
            .messages
            .get_mut(&message.id())
            .ok_or_else(|| Error::Chain(format!("unknown message {}", message.id())))?;
        let status = match message.direction {
            Direction::ParentToChild => tracked.advance(),
            Direction::ChildToParent => tracked.message.status,
        };
        let credit = if status == MessageStatus::ParentToChild(ParentToChildStatus::Redeemed) {
            tracked.credit.take()
        } else {
            None
        };
        if let Some(credit) = credit {
            ledger.apply(&credit, gas_token);
        }
        Ok(status)
    }

    async fn execute_message(&self, message: &RelayedMessage, _signer: &Signer) -> Result<TxHash, Error> {
        let gas_token = self.network.gas_token;
        let mut ledger = self.ledger();
        let confirmed = ledger
            .messages
            .get(&message.id())
            .map_or(false, |tracked| {
                tracked.message.status == MessageStatus::ChildToParent(ChildToParentStatus::Confirmed)
            });
        let tx_hash = ledger.mine(ChainRole::Parent, format!("execute {}", message.id()), confirmed);
        if ledger.succeeded(&tx_hash) {
            let credit = ledger.messages.get_mut(&message.id()).and_then(|tracked| {
                tracked.message.status = MessageStatus::ChildToParent(ChildToParentStatus::Executed);
                tracked.credit.take()
            });
            if let Some(credit) = credit {
                ledger.apply(&credit, gas_token);
            }
        }
        Ok(tx_hash)
    }

    async fn balance_of(&self, chain: ChainRole, asset: &AssetDescriptor, account: &Address) -> Result<Amount, Error> {
        let ledger = self.ledger();
        let token = match (asset, chain) {
            (AssetDescriptor::Native, _) | (AssetDescriptor::CustomGasToken { .. }, ChainRole::Child) => None,
            (AssetDescriptor::CustomGasToken { parent_address }, ChainRole::Parent) => Some(*parent_address),
            (AssetDescriptor::Erc20 { parent_address, .. }, _) => Some(*parent_address),
        };
        Ok(ledger.balance(chain, token, account))
    }
}
