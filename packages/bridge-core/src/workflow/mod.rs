use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use log::{error, info, warn};

use crate::{
    approval::ApprovalOutcome,
    chain_adapter::{BridgeServiceClient, JsonRpcChain},
    config::{BridgeNetwork, Config, TrackingConfig},
    endpoint::{ChainRef, EndpointPair, ReceiptPolicy},
    tracker::MessageTracker,
    types::{
        Address, ChainRole, Direction, MessageId, MessageStatus, RegistrationRecord,
        RelayedMessage, Signer, TxHash,
    },
    Error, Result,
};

pub mod deposit;
pub mod outbox;
pub mod registrar;
pub mod withdrawal;

pub use deposit::{DepositReceipt, DepositRequest, DepositWorkflow};
pub use outbox::{OutboxExecution, OutboxExecutor};
pub use registrar::CustomTokenRegistrar;
pub use withdrawal::{WithdrawRequest, WithdrawalReceipt, WithdrawalWorkflow};

/// 工作流已经完成的步骤，失败时用来判断重新发起是否安全
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum WorkflowStep {
    GasTokenApproval(ApprovalOutcome),
    TokenApproval(ApprovalOutcome),
    Submitted { chain: ChainRole, tx_hash: TxHash },
    Included { chain: ChainRole, tx_hash: TxHash, block_number: u64 },
    MessageCreated { message: MessageId },
    StatusObserved { message: MessageId, status: MessageStatus },
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStep::GasTokenApproval(outcome) => match outcome.tx_hash() {
                Some(tx_hash) => write!(f, "gas token approved ({})", tx_hash),
                None => write!(f, "gas token allowance already sufficient"),
            },
            WorkflowStep::TokenApproval(outcome) => match outcome.tx_hash() {
                Some(tx_hash) => write!(f, "token approved ({})", tx_hash),
                None => write!(f, "token allowance already sufficient"),
            },
            WorkflowStep::Submitted { chain, tx_hash } => write!(f, "submitted {} on {} chain", tx_hash, chain),
            WorkflowStep::Included { chain, tx_hash, block_number } => {
                write!(f, "{} included in {} block {}", tx_hash, chain, block_number)
            }
            WorkflowStep::MessageCreated { message } => write!(f, "message {} created", message),
            WorkflowStep::StatusObserved { message, status } => write!(f, "message {} reached {}", message, status),
        }
    }
}

/// 工作流的结构化失败
#[derive(Debug)]
pub struct WorkflowFailure {
    pub workflow: &'static str,
    pub error: Error,
    pub completed: Vec<WorkflowStep>,
    pub source_tx: Option<TxHash>,
    pub message: Option<RelayedMessage>,
}

impl WorkflowFailure {
    /// 导致失败的消息最后的状态
    pub fn status(&self) -> Option<MessageStatus> {
        self.error.message_status()
    }
}

impl fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.workflow, self.error)?;
        if let Some(tx_hash) = &self.source_tx {
            write!(f, " (source tx {})", tx_hash)?;
        }
        if !self.completed.is_empty() {
            let steps: Vec<String> = self.completed.iter().map(|step| step.to_string()).collect();
            write!(f, "; completed: {}", steps.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for WorkflowFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// 工作流的终态输出
#[derive(Debug)]
pub enum WorkflowResult<T> {
    Completed(T),
    Failed(WorkflowFailure),
}

impl<T> WorkflowResult<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkflowResult::Completed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            WorkflowResult::Completed(value) => Some(value),
            WorkflowResult::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&WorkflowFailure> {
        match self {
            WorkflowResult::Completed(_) => None,
            WorkflowResult::Failed(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> std::result::Result<T, WorkflowFailure> {
        match self {
            WorkflowResult::Completed(value) => Ok(value),
            WorkflowResult::Failed(failure) => Err(failure),
        }
    }
}

/// 记录工作流进度，结束时转换成 WorkflowResult
pub(crate) struct Progress {
    workflow: &'static str,
    steps: Vec<WorkflowStep>,
    source_tx: Option<TxHash>,
    message: Option<RelayedMessage>,
}

impl Progress {
    pub(crate) fn new(workflow: &'static str) -> Self {
        Self {
            workflow,
            steps: Vec::new(),
            source_tx: None,
            message: None,
        }
    }

    pub(crate) fn record(&mut self, step: WorkflowStep) {
        info!("[{}] {}", self.workflow, step);
        self.steps.push(step);
    }

    pub(crate) fn submitted(&mut self, chain: ChainRole, tx_hash: TxHash) {
        self.source_tx = Some(tx_hash);
        self.record(WorkflowStep::Submitted { chain, tx_hash });
    }

    pub(crate) fn track(&mut self, message: &RelayedMessage) {
        self.message = Some(message.clone());
        self.record(WorkflowStep::MessageCreated { message: message.id() });
    }

    pub(crate) fn observed(&mut self, message: &RelayedMessage, status: MessageStatus) {
        if let Some(tracked) = self.message.as_mut().filter(|tracked| tracked.id() == message.id()) {
            tracked.status = status;
        }
        self.record(WorkflowStep::StatusObserved {
            message: message.id(),
            status,
        });
    }

    /// 失败时指明出问题的消息
    pub(crate) fn blame(&mut self, message: &RelayedMessage) {
        self.message = Some(message.clone());
    }

    pub(crate) fn finish<T>(self, outcome: Result<T>) -> WorkflowResult<T> {
        match outcome {
            Ok(value) => {
                info!("[{}] completed after {} steps", self.workflow, self.steps.len());
                WorkflowResult::Completed(value)
            }
            Err(error) => {
                error!("[{}] failed after {} steps: {}", self.workflow, self.steps.len(), error);
                WorkflowResult::Failed(WorkflowFailure {
                    workflow: self.workflow,
                    error,
                    completed: self.steps,
                    source_tx: self.source_tx,
                    message: self.message,
                })
            }
        }
    }
}

/// 一笔交易可能发出多条消息，只处理序号最小的第一条
pub(crate) fn first_message(
    tx_hash: &TxHash,
    direction: Direction,
    mut messages: Vec<RelayedMessage>,
) -> Result<RelayedMessage> {
    messages.sort_by_key(|message| message.sequence_index);
    let found = messages.len();
    if found > 1 {
        warn!("Transaction {} emitted {} {} messages, using the first", tx_hash, found, direction);
    }
    messages
        .into_iter()
        .next()
        .ok_or(Error::UnexpectedMessageCount {
            tx_hash: *tx_hash,
            direction,
            expected: 1,
            found,
        })
}

/// 解析 ERC20 在父链上的网关
///
/// 经自定义网关的代币必须带上同一代币已完成的注册记录，否则在提交任何交易前失败。
pub(crate) async fn resolve_gateway(
    endpoints: &EndpointPair,
    network: &BridgeNetwork,
    parent_token: &Address,
    registration: Option<&RegistrationRecord>,
) -> Result<Address> {
    let sdk = endpoints.sdk();
    let gateway = endpoints
        .read_with_retry("parent gateway", || sdk.parent_gateway(parent_token))
        .await?;
    if gateway == network.parent_custom_gateway {
        let registered = registration.map_or(false, |record| record.parent_token() == *parent_token);
        if !registered {
            return Err(Error::Config(format!(
                "{} is routed through the custom gateway but has no completed registration",
                parent_token
            )));
        }
    }
    Ok(gateway)
}

/// 四个工作流的入口
pub struct Bridge {
    endpoints: EndpointPair,
    network: BridgeNetwork,
    tracking: TrackingConfig,
    tracker: MessageTracker,
}

impl Bridge {
    pub fn new(endpoints: EndpointPair, network: BridgeNetwork, tracking: TrackingConfig) -> Self {
        let tracker = MessageTracker::new(endpoints.sdk().clone());
        Self {
            endpoints,
            network,
            tracking,
            tracker,
        }
    }

    /// 按配置创建 JSON-RPC 连接和桥 SDK 客户端
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let retry_delay = config.tracking.receipt_poll_interval();

        // 适配器只发一次，瞬时错误由 EndpointPair 和 MessageTracker 按 transient_retries 统一重试
        let parent = JsonRpcChain::new(ChainRole::Parent, config.parent.chain_id, &config.parent.rpc_url)
            .with_retry(1, retry_delay);
        let child = JsonRpcChain::new(ChainRole::Child, config.child.chain_id, &config.child.rpc_url)
            .with_retry(1, retry_delay);
        let sdk = BridgeServiceClient::new(&config.bridge.service_url).with_retry(1, retry_delay);

        let endpoints = EndpointPair::new(
            ChainRef::new(ChainRole::Parent, config.parent.name.clone(), Arc::new(parent)),
            ChainRef::new(ChainRole::Child, config.child.name.clone(), Arc::new(child)),
            Arc::new(sdk),
            ReceiptPolicy::from(&config.tracking),
        )?;
        Ok(Self::new(endpoints, config.bridge.clone(), config.tracking.clone()))
    }

    pub fn endpoints(&self) -> &EndpointPair {
        &self.endpoints
    }

    pub fn network(&self) -> &BridgeNetwork {
        &self.network
    }

    pub fn tracking(&self) -> &TrackingConfig {
        &self.tracking
    }

    pub fn tracker(&self) -> &MessageTracker {
        &self.tracker
    }

    pub fn registrar(&self) -> CustomTokenRegistrar<'_> {
        CustomTokenRegistrar::new(&self.endpoints, &self.network, &self.tracker, &self.tracking)
    }

    pub fn deposits(&self) -> DepositWorkflow<'_> {
        DepositWorkflow::new(&self.endpoints, &self.network, &self.tracker, &self.tracking)
    }

    pub fn withdrawals(&self) -> WithdrawalWorkflow<'_> {
        WithdrawalWorkflow::new(&self.endpoints, &self.network)
    }

    pub fn outbox(&self) -> OutboxExecutor<'_> {
        OutboxExecutor::new(&self.endpoints, &self.tracker, &self.tracking)
    }

    pub async fn register_custom_token(
        &self,
        parent_token: Address,
        child_token: Address,
        signer: &Signer,
        cancel: &CancellationToken,
    ) -> WorkflowResult<RegistrationRecord> {
        self.registrar()
            .register(parent_token, child_token, signer, cancel)
            .await
    }

    pub async fn deposit(&self, request: &DepositRequest, cancel: &CancellationToken) -> WorkflowResult<DepositReceipt> {
        self.deposits().deposit(request, cancel).await
    }

    pub async fn withdraw(&self, request: &WithdrawRequest) -> WorkflowResult<WithdrawalReceipt> {
        self.withdrawals().withdraw(request).await
    }

    pub async fn execute_outbox_message(
        &self,
        message: &RelayedMessage,
        signer: &Signer,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> WorkflowResult<OutboxExecution> {
        self.outbox().execute(message, signer, deadline, cancel).await
    }

    /// 查询一笔源交易发出的所有消息的当前状态
    pub async fn message_status(
        &self,
        tx_hash: &TxHash,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelayedMessage>> {
        let receipt = self
            .endpoints
            .wait_for_receipt(direction.source(), tx_hash)
            .await?;
        let sdk = self.endpoints.sdk();
        let mut messages = self
            .endpoints
            .read_with_retry("messages", || sdk.messages_from_receipt(&receipt, direction))
            .await?;
        messages.sort_by_key(|message| message.sequence_index);

        for message in messages.iter_mut() {
            message.status = self
                .tracker
                .current_status(
                    message,
                    self.tracking.transient_retries,
                    self.tracking.receipt_poll_interval(),
                    cancel,
                )
                .await?;
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChildToParentStatus, ParentToChildStatus};

    fn message(index: u32) -> RelayedMessage {
        RelayedMessage {
            direction: Direction::ChildToParent,
            source_tx_hash: TxHash::from_low_u64(1),
            sequence_index: index,
            status: MessageStatus::ChildToParent(ChildToParentStatus::Unconfirmed),
            created_at: 0,
        }
    }

    #[test]
    fn test_first_message_by_sequence_index() {
        let selected = first_message(
            &TxHash::from_low_u64(1),
            Direction::ChildToParent,
            vec![message(1), message(0)],
        )
        .unwrap();
        assert_eq!(selected.sequence_index, 0);
    }

    #[test]
    fn test_no_messages() {
        let err = first_message(&TxHash::from_low_u64(1), Direction::ParentToChild, vec![]).unwrap_err();
        assert!(matches!(err, Error::UnexpectedMessageCount { found: 0, .. }));
    }

    #[test]
    fn test_failure_keeps_progress() {
        let mut progress = Progress::new("deposit");
        progress.submitted(ChainRole::Parent, TxHash::from_low_u64(4));
        let tracked = RelayedMessage {
            direction: Direction::ParentToChild,
            source_tx_hash: TxHash::from_low_u64(4),
            sequence_index: 0,
            status: MessageStatus::ParentToChild(ParentToChildStatus::Created),
            created_at: 0,
        };
        progress.track(&tracked);
        progress.observed(&tracked, MessageStatus::ParentToChild(ParentToChildStatus::Expired));

        let result: WorkflowResult<()> = progress.finish(Err(Error::MessageExpired { message: tracked.id() }));
        let failure = result.failure().unwrap();
        assert_eq!(failure.source_tx, Some(TxHash::from_low_u64(4)));
        assert_eq!(failure.completed.len(), 3);
        assert_eq!(
            failure.message.as_ref().map(|m| m.status),
            Some(MessageStatus::ParentToChild(ParentToChildStatus::Expired))
        );
        assert!(failure.to_string().contains("submitted"));
    }

    #[tokio::test]
    async fn test_configured_reads_retry_once_per_layer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "method": "eth_blockNumber" })))
            .with_status(502)
            .with_body("bad gateway")
            .expect(3)
            .create_async()
            .await;

        let config = Config::from_json(&format!(
            r#"{{
                "parent": {{ "name": "parent", "chain_id": 421614, "rpc_url": "{url}" }},
                "child": {{ "name": "child", "chain_id": 61022448, "rpc_url": "{url}" }},
                "bridge": {{
                    "service_url": "{url}",
                    "inbox": "0x0000000000000000000000000000000000000a01",
                    "parent_custom_gateway": "0x0000000000000000000000000000000000000a03",
                    "child_custom_gateway": "0x0000000000000000000000000000000000000b03"
                }},
                "tracking": {{ "receipt_poll_interval_ms": 1, "transient_retries": 2 }},
                "signer": {{ "address": "0x0000000000000000000000000000000000000c01", "key_id": "deployer" }}
            }}"#,
            url = server.url()
        ))
        .unwrap();
        let bridge = Bridge::from_config(&config).unwrap();

        // 一次读取加 transient_retries 次重试，适配器内部不再叠加
        let err = bridge.endpoints().block_number(ChainRole::Parent).await.unwrap_err();
        assert!(err.is_transient());
        mock.assert_async().await;
    }
}
