use serde::Serialize;
use tokio_util::sync::CancellationToken;
use log::info;

use crate::{
    approval::ApprovalManager,
    config::{BridgeNetwork, TrackingConfig},
    endpoint::EndpointPair,
    tracker::{MessageTracker, PollPolicy},
    types::{
        Address, Amount, AssetDescriptor, ChainRole, Direction, MessageStatus,
        ParentToChildStatus, RegistrationRecord, RelayedMessage, Signer, TxHash,
    },
    Error, Result,
};
use super::{first_message, resolve_gateway, Progress, WorkflowResult, WorkflowStep};

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub asset: AssetDescriptor,
    pub amount: Amount,
    pub signer: Signer,
    /// 经自定义网关存款的代币必须带上注册记录
    pub registration: Option<RegistrationRecord>,
}

impl DepositRequest {
    pub fn new(asset: AssetDescriptor, amount: Amount, signer: Signer) -> Self {
        Self {
            asset,
            amount,
            signer,
            registration: None,
        }
    }

    pub fn with_registration(mut self, registration: RegistrationRecord) -> Self {
        self.registration = Some(registration);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositReceipt {
    pub source_tx: TxHash,
    pub message: RelayedMessage,
    pub child_balance_before: Amount,
    pub child_balance_after: Amount,
    pub parent_balance_after: Amount,
}

pub struct DepositWorkflow<'a> {
    endpoints: &'a EndpointPair,
    network: &'a BridgeNetwork,
    tracker: &'a MessageTracker,
    policy: PollPolicy,
}

impl<'a> DepositWorkflow<'a> {
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
            policy: PollPolicy::new(tracking.poll_interval(), tracking.deposit_max_wait()),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn deposit(&self, request: &DepositRequest, cancel: &CancellationToken) -> WorkflowResult<DepositReceipt> {
        let mut progress = Progress::new("deposit");
        let outcome = self.run(request, cancel, &mut progress).await;
        progress.finish(outcome)
    }

    /// 检查请求并解析 ERC20 使用的网关
    async fn preflight(&self, request: &DepositRequest) -> Result<Option<Address>> {
        if request.amount == 0 {
            return Err(Error::Config("Deposit amount must be greater than 0".to_string()));
        }

        match &request.asset {
            AssetDescriptor::Native if self.network.uses_custom_gas_token() => Err(Error::Config(
                "Child chain uses a custom gas token; deposit it as the gas token asset".to_string(),
            )),
            AssetDescriptor::Native => Ok(None),
            AssetDescriptor::CustomGasToken { parent_address } => {
                if self.network.gas_token != Some(*parent_address) {
                    return Err(Error::Config(format!(
                        "{} is not the gas token of this bridge",
                        parent_address
                    )));
                }
                Ok(None)
            }
            AssetDescriptor::Erc20 { parent_address, .. } => {
                resolve_gateway(self.endpoints, self.network, parent_address, request.registration.as_ref())
                    .await
                    .map(Some)
            }
        }
    }

    async fn run(
        &self,
        request: &DepositRequest,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<DepositReceipt> {
        let gateway = self.preflight(request).await?;
        let sdk = self.endpoints.sdk();
        let asset = &request.asset;
        let depositor = request.signer.address;

        let child_balance_before = self
            .endpoints
            .balance_of(ChainRole::Child, asset, &depositor)
            .await?;

        let approvals = ApprovalManager::new(self.endpoints);

        // gas token 授权必须先于代币授权确认
        if let Some(gas_token) = self.network.gas_token {
            let fee = self
                .endpoints
                .read_with_retry("deposit fee", || sdk.deposit_gas_fee(asset, request.amount))
                .await?;
            let required = match asset {
                AssetDescriptor::CustomGasToken { .. } => request
                    .amount
                    .checked_add(fee)
                    .ok_or_else(|| Error::Config("Deposit amount plus fee overflows".to_string()))?,
                _ => fee,
            };
            let outcome = approvals
                .ensure_allowance(
                    ChainRole::Parent,
                    &AssetDescriptor::CustomGasToken { parent_address: gas_token },
                    &request.signer,
                    &self.network.inbox,
                    required,
                )
                .await?;
            progress.record(WorkflowStep::GasTokenApproval(outcome));
        }

        if let Some(gateway) = gateway {
            let outcome = approvals
                .ensure_allowance(ChainRole::Parent, asset, &request.signer, &gateway, request.amount)
                .await?;
            progress.record(WorkflowStep::TokenApproval(outcome));
        }

        info!("Depositing {} of {} from {}", request.amount, asset, depositor);
        let child_chain_id = self.endpoints.chain(ChainRole::Child).chain_id();
        let tx_hash = sdk
            .submit_deposit(asset, request.amount, &request.signer, child_chain_id)
            .await?;
        progress.submitted(ChainRole::Parent, tx_hash);

        let receipt = self.endpoints.wait_for_success(ChainRole::Parent, &tx_hash).await?;
        progress.record(WorkflowStep::Included {
            chain: ChainRole::Parent,
            tx_hash,
            block_number: receipt.block_number,
        });

        let messages = self
            .endpoints
            .read_with_retry("deposit messages", || {
                sdk.messages_from_receipt(&receipt, Direction::ParentToChild)
            })
            .await?;
        let mut message = first_message(&tx_hash, Direction::ParentToChild, messages)?;
        progress.track(&message);

        // 排序器一般在十几分钟内收录
        info!("Waiting for {} to execute on the child chain", message.id());
        let status = self.tracker.await_terminal(&message, self.policy, cancel).await?;
        progress.observed(&message, status);
        message.status = status;

        match status {
            MessageStatus::ParentToChild(ParentToChildStatus::Redeemed) => {}
            MessageStatus::ParentToChild(ParentToChildStatus::Expired) => {
                return Err(Error::MessageExpired { message: message.id() });
            }
            status => {
                return Err(Error::MessageFailed {
                    message: message.id(),
                    status,
                });
            }
        }

        let child_balance_after = self
            .endpoints
            .balance_of(ChainRole::Child, asset, &depositor)
            .await?;
        let parent_balance_after = self
            .endpoints
            .balance_of(ChainRole::Parent, asset, &depositor)
            .await?;

        Ok(DepositReceipt {
            source_tx: tx_hash,
            message,
            child_balance_before,
            child_balance_after,
            parent_balance_after,
        })
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

    const ONE: Amount = 1_000000000000000000;

    #[tokio::test]
    async fn test_native_deposit_credits_child() {
        let fake = FakeBridge::new();
        let signer = fake.signer();
        fake.mint_native(ChainRole::Parent, &signer.address, 5 * ONE);
        fake.script_deposit(vec![Created, AutoRedeemAttempted, Redeemed]);
        let bridge = fake.bridge();

        let request = DepositRequest::new(AssetDescriptor::Native, ONE, signer.clone());
        let result = bridge
            .deposits()
            .with_policy(fast())
            .deposit(&request, &CancellationToken::new())
            .await;

        let receipt = result.into_result().unwrap();
        assert_eq!(receipt.child_balance_after - receipt.child_balance_before, ONE);
        assert_eq!(receipt.parent_balance_after, 4 * ONE);
        assert_eq!(receipt.message.status, MessageStatus::ParentToChild(Redeemed));
        // 原生资产不需要授权
        assert!(fake.trace_position("approve").is_none());
    }

    #[tokio::test]
    async fn test_expired_deposit_is_a_failure_result() {
        let fake = FakeBridge::with_gas_token();
        let signer = fake.signer();
        fake.mint_gas_token(&signer.address, 5 * ONE);
        fake.script_deposit(vec![Created, Expired]);
        let bridge = fake.bridge();

        let request = DepositRequest::new(fake.gas_token_asset(), ONE, signer);
        let result = bridge
            .deposits()
            .with_policy(fast())
            .deposit(&request, &CancellationToken::new())
            .await;

        let failure = result.failure().expect("expired deposit must fail");
        assert_eq!(failure.status(), Some(MessageStatus::ParentToChild(Expired)));
        assert!(matches!(failure.error, Error::MessageExpired { .. }));
        assert!(failure.source_tx.is_some());
        assert_eq!(failure.message.as_ref().map(|m| m.status), Some(MessageStatus::ParentToChild(Expired)));
    }

    #[tokio::test]
    async fn test_failed_auto_redeem_is_not_retried() {
        let fake = FakeBridge::new();
        let signer = fake.signer();
        fake.mint_native(ChainRole::Parent, &signer.address, 2 * ONE);
        fake.script_deposit(vec![Created, AutoRedeemAttempted, Failed]);
        let bridge = fake.bridge();

        let request = DepositRequest::new(AssetDescriptor::Native, ONE, signer);
        let result = bridge.deposits().with_policy(fast()).deposit(&request, &CancellationToken::new()).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.status(), Some(MessageStatus::ParentToChild(Failed)));
        assert_eq!(fake.submissions("deposit"), 1);
    }

    #[tokio::test]
    async fn test_erc20_gas_approval_precedes_token_approval() {
        let fake = FakeBridge::with_gas_token();
        let signer = fake.signer();
        fake.mint_gas_token(&signer.address, 5 * ONE);
        fake.mint_token(&FakeBridge::erc20(), &signer.address, 10 * ONE);
        fake.script_deposit(vec![Redeemed]);
        let bridge = fake.bridge();

        let asset = AssetDescriptor::Erc20 {
            parent_address: FakeBridge::erc20(),
            child_address: None,
        };
        let request = DepositRequest::new(asset, ONE, signer);
        let result = bridge.deposits().with_policy(fast()).deposit(&request, &CancellationToken::new()).await;
        let receipt = result.into_result().unwrap();
        assert_eq!(receipt.child_balance_after, ONE);

        let trace = fake.trace();
        let gas_approve = fake.trace_position("approve gas-token").unwrap();
        let gas_confirmed = trace
            .iter()
            .enumerate()
            .position(|(i, entry)| i > gas_approve && entry.starts_with("receipt"))
            .unwrap();
        let token_approve = fake.trace_position("approve erc20").unwrap();
        assert!(gas_approve < gas_confirmed && gas_confirmed < token_approve);
        assert!(token_approve < fake.trace_position("deposit").unwrap());
    }

    #[tokio::test]
    async fn test_custom_gateway_requires_registration() {
        let fake = FakeBridge::with_gas_token();
        let signer = fake.signer();
        let bridge = fake.bridge();

        let request = DepositRequest::new(
            AssetDescriptor::Erc20 {
                parent_address: FakeBridge::parent_token(),
                child_address: None,
            },
            ONE,
            signer,
        );
        let result = bridge.deposits().with_policy(fast()).deposit(&request, &CancellationToken::new()).await;
        let failure = result.failure().unwrap();
        assert!(matches!(failure.error, Error::Config(_)));
        assert!(failure.completed.is_empty());
        assert_eq!(fake.submissions("approve"), 0);
    }

    #[tokio::test]
    async fn test_reverted_deposit_reports_progress() {
        let fake = FakeBridge::with_gas_token();
        let signer = fake.signer();
        fake.mint_gas_token(&signer.address, 5 * ONE);
        fake.revert_next("deposit");
        let bridge = fake.bridge();

        let request = DepositRequest::new(fake.gas_token_asset(), ONE, signer);
        let result = bridge.deposits().with_policy(fast()).deposit(&request, &CancellationToken::new()).await;
        let failure = result.failure().unwrap();
        assert!(matches!(failure.error, Error::TransactionReverted { chain: ChainRole::Parent, .. }));
        // 授权成功，存款交易失败
        assert!(matches!(failure.completed[0], WorkflowStep::GasTokenApproval(_)));
        assert!(matches!(failure.completed[1], WorkflowStep::Submitted { .. }));
    }

    #[tokio::test]
    async fn test_native_on_custom_gas_network_rejected() {
        let fake = FakeBridge::with_gas_token();
        let bridge = fake.bridge();
        let request = DepositRequest::new(AssetDescriptor::Native, ONE, fake.signer());
        let result = bridge.deposits().with_policy(fast()).deposit(&request, &CancellationToken::new()).await;
        assert!(matches!(result.failure().unwrap().error, Error::Config(_)));
    }
}
