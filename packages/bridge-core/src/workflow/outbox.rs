use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use log::info;

use crate::{
    config::TrackingConfig,
    endpoint::EndpointPair,
    tracker::{MessageTracker, PollPolicy},
    types::{ChildToParentStatus, ChainRole, Direction, MessageStatus, Receipt, RelayedMessage, Signer, TxHash},
    Error, Result,
};
use super::{first_message, Progress, WorkflowResult, WorkflowStep};

const UNCONFIRMED: MessageStatus = MessageStatus::ChildToParent(ChildToParentStatus::Unconfirmed);
const EXECUTED: MessageStatus = MessageStatus::ChildToParent(ChildToParentStatus::Executed);

/// outbox 执行结果
#[derive(Debug, Clone, Serialize)]
pub struct OutboxExecution {
    pub message: RelayedMessage,
    /// 父链执行交易的回执
    pub receipt: Receipt,
    /// 依次观察到的状态
    pub observed: Vec<MessageStatus>,
}

/// 在父链上执行已过挑战期的子链消息
pub struct OutboxExecutor<'a> {
    endpoints: &'a EndpointPair,
    tracker: &'a MessageTracker,
    poll_interval: Duration,
    retries: u32,
}

impl<'a> OutboxExecutor<'a> {
    pub fn new(endpoints: &'a EndpointPair, tracker: &'a MessageTracker, tracking: &TrackingConfig) -> Self {
        Self {
            endpoints,
            tracker,
            poll_interval: tracking.confirmation_poll_interval(),
            retries: tracking.transient_retries,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// 执行消息；已执行过的消息直接返回 `AlreadyExecuted`，不提交交易
    pub async fn execute(
        &self,
        message: &RelayedMessage,
        signer: &Signer,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> WorkflowResult<OutboxExecution> {
        let mut progress = Progress::new("execute");
        progress.track(message);
        let outcome = self.run(message, signer, deadline, cancel, &mut progress).await;
        progress.finish(outcome)
    }

    /// 由提现交易哈希找到第一条消息后执行
    pub async fn execute_from_tx(
        &self,
        withdrawal_tx: &TxHash,
        signer: &Signer,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> WorkflowResult<OutboxExecution> {
        let mut progress = Progress::new("execute");
        let outcome = async {
            let message = self.resolve(withdrawal_tx).await?;
            progress.track(&message);
            self.run(&message, signer, deadline, cancel, &mut progress).await
        }
        .await;
        progress.finish(outcome)
    }

    async fn resolve(&self, withdrawal_tx: &TxHash) -> Result<RelayedMessage> {
        let receipt = self.endpoints.wait_for_success(ChainRole::Child, withdrawal_tx).await?;
        let sdk = self.endpoints.sdk();
        let messages = self
            .endpoints
            .read_with_retry("withdrawal messages", || {
                sdk.messages_from_receipt(&receipt, Direction::ChildToParent)
            })
            .await?;
        first_message(withdrawal_tx, Direction::ChildToParent, messages)
    }

    async fn run(
        &self,
        message: &RelayedMessage,
        signer: &Signer,
        deadline: Duration,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<OutboxExecution> {
        if message.direction != Direction::ChildToParent {
            return Err(Error::Config(format!(
                "Message {} is {}, only child-to-parent messages go through the outbox",
                message.id(),
                message.direction
            )));
        }

        let id = message.id();
        let mut observed = Vec::new();
        let mut status = self
            .tracker
            .current_status(message, self.retries, self.endpoints.receipt_policy().poll_interval, cancel)
            .await?;
        observed.push(status);
        progress.observed(message, status);
        if status.direction() != Direction::ChildToParent {
            return Err(Error::Chain(format!("Outbox message {} reported {}", id, status)));
        }

        if status == EXECUTED {
            return Err(Error::AlreadyExecuted { message: id });
        }

        if status == UNCONFIRMED {
            info!("Message {} waiting for the challenge period, deadline {:?}", id, deadline);
            let policy = PollPolicy::new(self.poll_interval, deadline);
            status = self
                .tracker
                .await_status(message, policy, cancel, |status| {
                    matches!(
                        status,
                        MessageStatus::ChildToParent(ChildToParentStatus::Confirmed | ChildToParentStatus::Executed)
                    )
                })
                .await
                .map_err(|e| match e {
                    Error::TrackingTimeout {
                        message,
                        last_status,
                        waited,
                    } => Error::ConfirmationTimeout {
                        message,
                        last_status,
                        waited,
                    },
                    other => other,
                })?;
            observed.push(status);
            progress.observed(message, status);

            // 等待期间被别人执行了
            if status == EXECUTED {
                return Err(Error::AlreadyExecuted { message: id });
            }
        }

        info!("Executing {} on the parent chain", id);
        let tx_hash = self.endpoints.sdk().execute_message(message, signer).await?;
        progress.record(WorkflowStep::Submitted {
            chain: ChainRole::Parent,
            tx_hash,
        });

        let receipt = self.endpoints.wait_for_success(ChainRole::Parent, &tx_hash).await?;
        progress.record(WorkflowStep::Included {
            chain: ChainRole::Parent,
            tx_hash,
            block_number: receipt.block_number,
        });

        let status = self
            .tracker
            .current_status(message, self.retries, self.endpoints.receipt_policy().poll_interval, cancel)
            .await?;
        observed.push(status);
        progress.observed(message, status);

        let mut message = message.clone();
        message.status = status;
        Ok(OutboxExecution {
            message,
            receipt,
            observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::{MockBridgeSdk, MockChainConnection};
    use crate::endpoint::{ChainRef, ReceiptPolicy};
    use crate::testing::FakeBridge;
    use crate::workflow::WithdrawRequest;
    use crate::types::{AssetDescriptor, ChildToParentStatus::*, ParentToChildStatus};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    const DEADLINE: Duration = Duration::from_secs(5);

    async fn withdrawn(fake: &FakeBridge) -> RelayedMessage {
        let signer = fake.signer();
        fake.mint_native(ChainRole::Child, &signer.address, 5_000000);
        let request = WithdrawRequest::new(AssetDescriptor::Native, 1_000000, signer.clone(), signer.address);
        fake.bridge().withdraw(&request).await.into_result().unwrap().message
    }

    #[tokio::test]
    async fn test_execute_after_challenge_period() {
        let fake = FakeBridge::new();
        let message = withdrawn(&fake).await;
        let bridge = fake.bridge();
        let signer = fake.signer();

        let waiter = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter.elapse_challenge_period();
        });

        let execution = bridge
            .outbox()
            .with_poll_interval(Duration::from_millis(2))
            .execute(&message, &signer, DEADLINE, &CancellationToken::new())
            .await
            .into_result()
            .unwrap();
        assert!(execution.receipt.success);
        assert_eq!(
            execution.observed,
            vec![
                MessageStatus::ChildToParent(Unconfirmed),
                MessageStatus::ChildToParent(Confirmed),
                MessageStatus::ChildToParent(Executed),
            ]
        );
        assert_eq!(fake.native_balance(ChainRole::Parent, &signer.address), 1_000000);

        // 第二次执行不提交交易
        let submissions = fake.submissions("execute");
        let again = bridge
            .execute_outbox_message(&message, &signer, DEADLINE, &CancellationToken::new())
            .await;
        let failure = again.failure().unwrap();
        assert!(matches!(failure.error, Error::AlreadyExecuted { .. }));
        assert_eq!(failure.status(), Some(MessageStatus::ChildToParent(Executed)));
        assert_eq!(fake.submissions("execute"), submissions);
    }

    #[tokio::test]
    async fn test_confirmation_timeout() {
        let fake = FakeBridge::new();
        let message = withdrawn(&fake).await;
        let bridge = fake.bridge();

        let failure = bridge
            .outbox()
            .with_poll_interval(Duration::from_millis(2))
            .execute(&message, &fake.signer(), Duration::from_millis(20), &CancellationToken::new())
            .await
            .into_result()
            .unwrap_err();
        match failure.error {
            Error::ConfirmationTimeout { last_status, .. } => {
                assert_eq!(last_status, Some(MessageStatus::ChildToParent(Unconfirmed)))
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(fake.submissions("execute"), 0);
    }

    #[tokio::test]
    async fn test_execute_from_withdrawal_tx() {
        let fake = FakeBridge::new();
        let message = withdrawn(&fake).await;
        fake.elapse_challenge_period();
        let bridge = fake.bridge();

        let execution = bridge
            .outbox()
            .execute_from_tx(&message.source_tx_hash, &fake.signer(), DEADLINE, &CancellationToken::new())
            .await
            .into_result()
            .unwrap();
        assert_eq!(execution.message.id(), message.id());
        assert_eq!(execution.message.status, MessageStatus::ChildToParent(Executed));
    }

    #[tokio::test]
    async fn test_parent_to_child_message_rejected() {
        let fake = FakeBridge::new();
        let mut message = withdrawn(&fake).await;
        message.direction = Direction::ParentToChild;
        let failure = fake
            .bridge()
            .outbox()
            .execute(&message, &fake.signer(), DEADLINE, &CancellationToken::new())
            .await
            .into_result()
            .unwrap_err();
        assert!(matches!(failure.error, Error::Config(_)));
    }

    fn connection(chain_id: u64) -> MockChainConnection {
        let mut connection = MockChainConnection::new();
        connection.expect_chain_id().return_const(chain_id);
        connection
    }

    /// 状态按脚本返回，停在最后一个；execute_message 不允许被调用
    fn scripted(statuses: Vec<MessageStatus>) -> (EndpointPair, MessageTracker) {
        let script = Mutex::new(VecDeque::from(statuses));
        let mut sdk = MockBridgeSdk::new();
        sdk.expect_status().returning(move |_| {
            let mut script = script.lock().unwrap();
            let status = if script.len() > 1 { script.pop_front() } else { script.front().copied() };
            Ok(status.unwrap())
        });
        sdk.expect_execute_message().times(0);

        let endpoints = EndpointPair::new(
            ChainRef::new(ChainRole::Parent, "parent", Arc::new(connection(1))),
            ChainRef::new(ChainRole::Child, "child", Arc::new(connection(2))),
            Arc::new(sdk),
            ReceiptPolicy::from(&FakeBridge::tracking()),
        )
        .unwrap();
        let tracker = MessageTracker::new(endpoints.sdk().clone());
        (endpoints, tracker)
    }

    fn outbox_message() -> RelayedMessage {
        RelayedMessage {
            direction: Direction::ChildToParent,
            source_tx_hash: TxHash::from_low_u64(7),
            sequence_index: 0,
            status: MessageStatus::ChildToParent(Unconfirmed),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_only_confirmed_or_executed_ends_the_wait() {
        let (endpoints, tracker) = scripted(vec![
            MessageStatus::ChildToParent(Unconfirmed),
            MessageStatus::ParentToChild(ParentToChildStatus::Redeemed),
        ]);
        let executor = OutboxExecutor::new(&endpoints, &tracker, &FakeBridge::tracking())
            .with_poll_interval(Duration::from_millis(2));

        let failure = executor
            .execute(&outbox_message(), &FakeBridge::new().signer(), Duration::from_millis(20), &CancellationToken::new())
            .await
            .into_result()
            .unwrap_err();
        assert!(matches!(failure.error, Error::ConfirmationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_wrong_direction_status_rejected() {
        let (endpoints, tracker) = scripted(vec![MessageStatus::ParentToChild(ParentToChildStatus::Created)]);
        let executor = OutboxExecutor::new(&endpoints, &tracker, &FakeBridge::tracking());

        let failure = executor
            .execute(&outbox_message(), &FakeBridge::new().signer(), DEADLINE, &CancellationToken::new())
            .await
            .into_result()
            .unwrap_err();
        assert!(matches!(failure.error, Error::Chain(_)));
    }
}
