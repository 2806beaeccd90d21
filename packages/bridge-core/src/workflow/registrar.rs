use tokio_util::sync::CancellationToken;
use log::{info, warn};

use crate::{
    approval::ApprovalManager,
    config::{BridgeNetwork, TrackingConfig},
    endpoint::EndpointPair,
    tracker::{MessageTracker, PollPolicy},
    types::{
        Address, AssetDescriptor, ChainRole, Direction, MessageOutcome, MessageStatus, Receipt,
        RegistrationRecord, RegistrationStep, RelayedMessage, Signer, TxHash,
    },
    Error, Result,
};
use super::{Progress, WorkflowResult, WorkflowStep};

/// 通过自定义网关把父链代币绑定到子链代币
///
/// 注册交易固定发出两条消息：SetToken（序号 0）和 SetGateways（序号 1）。
/// 两条消息都 REDEEMED 之前，网关不能用于存取款。
pub struct CustomTokenRegistrar<'a> {
    endpoints: &'a EndpointPair,
    network: &'a BridgeNetwork,
    tracker: &'a MessageTracker,
    policy: PollPolicy,
}

impl<'a> CustomTokenRegistrar<'a> {
    pub fn new(
        endpoints: &'a EndpointPair,
        network: &'a BridgeNetwork,
        tracker: &'a MessageTracker,
        tracking: &TrackingConfig,
    ) -> Self {
        Self {
            endpoints,
            network,
            tracker,
            policy: PollPolicy::new(tracking.poll_interval(), tracking.registration_max_wait()),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn register(
        &self,
        parent_token: Address,
        child_token: Address,
        signer: &Signer,
        cancel: &CancellationToken,
    ) -> WorkflowResult<RegistrationRecord> {
        let mut progress = Progress::new("register");
        let outcome = self
            .run(parent_token, child_token, signer, cancel, &mut progress)
            .await;
        progress.finish(outcome)
    }

    /// 根据已提交的注册交易重新确认两条消息的状态
    pub async fn verify(
        &self,
        registration_tx: &TxHash,
        parent_token: Address,
        child_token: Address,
        cancel: &CancellationToken,
    ) -> WorkflowResult<RegistrationRecord> {
        let mut progress = Progress::new("verify-registration");
        let outcome = async {
            let receipt = self
                .endpoints
                .wait_for_success(ChainRole::Parent, registration_tx)
                .await?;
            progress.submitted(ChainRole::Parent, receipt.tx_hash);
            self.track(&receipt, parent_token, child_token, cancel, &mut progress)
                .await
        }
        .await;
        progress.finish(outcome)
    }

    async fn run(
        &self,
        parent_token: Address,
        child_token: Address,
        signer: &Signer,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<RegistrationRecord> {
        let sdk = self.endpoints.sdk();

        // 注册费由父链代币合约代付，需要先授权 gas token 给它
        if let Some(gas_token) = self.network.gas_token {
            let fee = self
                .endpoints
                .read_with_retry("registration fee", || sdk.registration_gas_fee(&parent_token))
                .await?;
            let outcome = ApprovalManager::new(self.endpoints)
                .ensure_allowance(
                    ChainRole::Parent,
                    &AssetDescriptor::CustomGasToken { parent_address: gas_token },
                    signer,
                    &parent_token,
                    fee,
                )
                .await?;
            progress.record(WorkflowStep::GasTokenApproval(outcome));
        }

        info!("Registering {} -> {} on the custom gateway", parent_token, child_token);
        let tx_hash = sdk
            .submit_custom_token_registration(&parent_token, &child_token, signer)
            .await?;
        progress.submitted(ChainRole::Parent, tx_hash);

        let receipt = self.endpoints.wait_for_success(ChainRole::Parent, &tx_hash).await?;
        progress.record(WorkflowStep::Included {
            chain: ChainRole::Parent,
            tx_hash,
            block_number: receipt.block_number,
        });

        self.track(&receipt, parent_token, child_token, cancel, progress)
            .await
    }

    async fn track(
        &self,
        receipt: &Receipt,
        parent_token: Address,
        child_token: Address,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<RegistrationRecord> {
        let sdk = self.endpoints.sdk();
        let messages = self
            .endpoints
            .read_with_retry("registration messages", || {
                sdk.messages_from_receipt(receipt, Direction::ParentToChild)
            })
            .await?;
        let (set_token, set_gateways) = split_messages(&receipt.tx_hash, messages)?;
        progress.track(&set_token);
        progress.track(&set_gateways);

        // 两条消息互不依赖，同时跟踪
        let (set_token_status, set_gateways_status) = tokio::join!(
            self.tracker.await_terminal(&set_token, self.policy, cancel),
            self.tracker.await_terminal(&set_gateways, self.policy, cancel),
        );

        // 两条都没跟踪完（取消或超时）时报告跟踪本身的错误
        let (set_token_status, set_gateways_status) = match (set_token_status, set_gateways_status) {
            (Err(first), Err(second)) if interrupted(&first) && interrupted(&second) => {
                progress.blame(&set_token);
                return Err(match (first, second) {
                    (first @ Error::Cancelled { .. }, _) => first,
                    (_, second @ Error::Cancelled { .. }) => second,
                    (first, _) => first,
                });
            }
            statuses => statuses,
        };

        let set_token_outcome = outcome_of(&set_token, set_token_status, progress);
        let set_gateways_outcome = outcome_of(&set_gateways, set_gateways_status, progress);

        if set_token_outcome.is_success() && set_gateways_outcome.is_success() {
            info!("Custom token {} registered as {}", parent_token, child_token);
            return Ok(RegistrationRecord::new(
                parent_token,
                child_token,
                self.network.parent_custom_gateway,
                self.network.child_custom_gateway,
            ));
        }

        let which = if !set_token_outcome.is_success() {
            RegistrationStep::SetToken
        } else {
            RegistrationStep::SetGateways
        };
        warn!("Registration of {} incomplete: {} did not succeed", parent_token, which);
        let failing = match which {
            RegistrationStep::SetToken => &set_token,
            RegistrationStep::SetGateways => &set_gateways,
        };
        progress.blame(failing);

        Err(Error::RegistrationIncomplete {
            which,
            set_token: set_token_outcome,
            set_gateways: set_gateways_outcome,
        })
    }
}

/// 按发出顺序取出 SetToken 和 SetGateways
fn split_messages(tx_hash: &TxHash, mut messages: Vec<RelayedMessage>) -> Result<(RelayedMessage, RelayedMessage)> {
    messages.sort_by_key(|message| message.sequence_index);
    let found = messages.len();
    if found > 2 {
        warn!("Registration {} emitted {} messages, expected 2", tx_hash, found);
    }
    let mut iter = messages.into_iter();
    match (iter.next(), iter.next()) {
        (Some(set_token), Some(set_gateways))
            if set_token.sequence_index == RegistrationStep::SetToken.sequence_index()
                && set_gateways.sequence_index == RegistrationStep::SetGateways.sequence_index() =>
        {
            Ok((set_token, set_gateways))
        }
        _ => Err(Error::UnexpectedMessageCount {
            tx_hash: *tx_hash,
            direction: Direction::ParentToChild,
            expected: 2,
            found,
        }),
    }
}

fn interrupted(error: &Error) -> bool {
    matches!(error, Error::Cancelled { .. } | Error::TrackingTimeout { .. })
}

fn outcome_of(message: &RelayedMessage, status: Result<MessageStatus>, progress: &mut Progress) -> MessageOutcome {
    match status {
        Ok(status) => {
            progress.observed(message, status);
            MessageOutcome::Terminal(status)
        }
        Err(e) => MessageOutcome::Unresolved(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBridge;
    use crate::types::ParentToChildStatus::*;
    use std::time::Duration;

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5))
    }

    async fn register_with(set_token: Vec<crate::types::ParentToChildStatus>, set_gateways: Vec<crate::types::ParentToChildStatus>) -> (FakeBridge, WorkflowResult<RegistrationRecord>) {
        let fake = FakeBridge::with_gas_token();
        fake.script_registration(set_token, set_gateways);
        let bridge = fake.bridge();
        let signer = fake.signer();
        fake.mint_gas_token(&signer.address, 1_000_000);
        let result = bridge
            .registrar()
            .with_policy(fast())
            .register(FakeBridge::parent_token(), FakeBridge::child_token(), &signer, &CancellationToken::new())
            .await;
        (fake, result)
    }

    #[tokio::test]
    async fn test_register_success() {
        let (fake, result) = register_with(vec![Created, Redeemed], vec![Created, AutoRedeemAttempted, Redeemed]).await;
        let record = result.completed().expect("registration should complete");
        assert_eq!(record.parent_token(), FakeBridge::parent_token());
        assert_eq!(record.child_gateway(), fake.network().child_custom_gateway);
        // 先授权 gas token 给父链代币合约
        assert!(fake.trace_position("approve").unwrap() < fake.trace_position("register").unwrap());
    }

    #[tokio::test]
    async fn test_set_token_failure_is_named() {
        let (_, result) = register_with(vec![Created, Failed], vec![Redeemed]).await;
        let failure = result.failure().unwrap();
        match &failure.error {
            Error::RegistrationIncomplete { which, set_token, set_gateways } => {
                assert_eq!(*which, RegistrationStep::SetToken);
                assert_eq!(*set_token, MessageOutcome::Terminal(MessageStatus::ParentToChild(Failed)));
                assert!(set_gateways.is_success());
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(failure.message.as_ref().map(|m| m.sequence_index), Some(0));
    }

    #[tokio::test]
    async fn test_set_gateways_failure_is_named() {
        // SetGateways 先于 SetToken 到达终态
        let (_, result) = register_with(vec![Created, Created, Created, Redeemed], vec![Expired]).await;
        let failure = result.failure().unwrap();
        match &failure.error {
            Error::RegistrationIncomplete { which, set_token, set_gateways } => {
                assert_eq!(*which, RegistrationStep::SetGateways);
                assert!(set_token.is_success());
                assert_eq!(*set_gateways, MessageOutcome::Terminal(MessageStatus::ParentToChild(Expired)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(failure.message.as_ref().map(|m| m.sequence_index), Some(1));
    }

    #[tokio::test]
    async fn test_verify_existing_registration() {
        let (fake, result) = register_with(vec![Redeemed], vec![Redeemed]).await;
        assert!(result.is_completed());
        let registration_tx = fake.last_submission().unwrap();

        let bridge = fake.bridge();
        let verified = bridge
            .registrar()
            .with_policy(fast())
            .verify(&registration_tx, FakeBridge::parent_token(), FakeBridge::child_token(), &CancellationToken::new())
            .await;
        assert!(verified.is_completed());
    }

    #[test]
    fn test_split_requires_both_messages() {
        let only_one = vec![RelayedMessage {
            direction: Direction::ParentToChild,
            source_tx_hash: TxHash::from_low_u64(1),
            sequence_index: 0,
            status: MessageStatus::ParentToChild(Created),
            created_at: 0,
        }];
        let err = split_messages(&TxHash::from_low_u64(1), only_one).unwrap_err();
        assert!(matches!(err, Error::UnexpectedMessageCount { expected: 2, found: 1, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_tracking_is_reported() {
        let fake = FakeBridge::with_gas_token();
        let signer = fake.signer();
        fake.mint_gas_token(&signer.address, 1_000_000);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fake
            .bridge()
            .registrar()
            .with_policy(fast())
            .register(FakeBridge::parent_token(), FakeBridge::child_token(), &signer, &cancel)
            .await;
        let failure = result.failure().unwrap();
        assert!(matches!(failure.error, Error::Cancelled { .. }));
        // 注册交易已提交
        assert!(failure.source_tx.is_some());
    }

    #[tokio::test]
    async fn test_both_messages_timing_out_reports_timeout() {
        let fake = FakeBridge::with_gas_token();
        fake.script_registration(vec![Created], vec![Created]);
        let signer = fake.signer();
        fake.mint_gas_token(&signer.address, 1_000_000);

        let result = fake
            .bridge()
            .registrar()
            .with_policy(PollPolicy::new(Duration::from_millis(1), Duration::from_millis(20)))
            .register(FakeBridge::parent_token(), FakeBridge::child_token(), &signer, &CancellationToken::new())
            .await;
        let failure = result.failure().unwrap();
        match &failure.error {
            Error::TrackingTimeout { last_status, .. } => {
                assert_eq!(*last_status, Some(MessageStatus::ParentToChild(Created)))
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(failure.status(), Some(MessageStatus::ParentToChild(Created)));
    }
}
