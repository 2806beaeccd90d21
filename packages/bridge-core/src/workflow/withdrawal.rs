use serde::Serialize;
use log::{info, warn};

use crate::{
    config::BridgeNetwork,
    endpoint::EndpointPair,
    types::{
        Address, Amount, AssetDescriptor, ChainRole, Direction, RegistrationRecord, RelayedMessage, Signer,
        TxHash, WithdrawalEvent,
    },
    Error, Result,
};
use super::{first_message, resolve_gateway, Progress, WorkflowResult, WorkflowStep};

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub asset: AssetDescriptor,
    pub amount: Amount,
    pub signer: Signer,
    /// 父链上的收款地址
    pub destination: Address,
    /// 经自定义网关提现的代币必须带上注册记录
    pub registration: Option<RegistrationRecord>,
}

impl WithdrawRequest {
    pub fn new(asset: AssetDescriptor, amount: Amount, signer: Signer, destination: Address) -> Self {
        Self {
            asset,
            amount,
            signer,
            destination,
            registration: None,
        }
    }

    pub fn with_registration(mut self, registration: RegistrationRecord) -> Self {
        self.registration = Some(registration);
        self
    }
}

/// 提现发起结果，不等待挑战期
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub source_tx: TxHash,
    pub message: RelayedMessage,
    /// 与 message 对应的事件
    pub event: WithdrawalEvent,
    /// 交易中的全部提现事件
    pub events: Vec<WithdrawalEvent>,
}

pub struct WithdrawalWorkflow<'a> {
    endpoints: &'a EndpointPair,
    network: &'a BridgeNetwork,
}

impl<'a> WithdrawalWorkflow<'a> {
    pub fn new(endpoints: &'a EndpointPair, network: &'a BridgeNetwork) -> Self {
        Self { endpoints, network }
    }

    pub async fn withdraw(&self, request: &WithdrawRequest) -> WorkflowResult<WithdrawalReceipt> {
        let mut progress = Progress::new("withdraw");
        let outcome = self.run(request, &mut progress).await;
        progress.finish(outcome)
    }

    async fn run(&self, request: &WithdrawRequest, progress: &mut Progress) -> Result<WithdrawalReceipt> {
        if request.amount == 0 {
            return Err(Error::Config("Withdrawal amount must be greater than 0".to_string()));
        }
        if let AssetDescriptor::Erc20 { parent_address, .. } = &request.asset {
            resolve_gateway(self.endpoints, self.network, parent_address, request.registration.as_ref()).await?;
        }

        let sdk = self.endpoints.sdk();
        info!(
            "Withdrawing {} of {} from {} to {}",
            request.amount, request.asset, request.signer.address, request.destination
        );
        let tx_hash = sdk
            .submit_withdrawal(&request.asset, request.amount, &request.signer, &request.destination)
            .await?;
        progress.submitted(ChainRole::Child, tx_hash);

        let receipt = self.endpoints.wait_for_success(ChainRole::Child, &tx_hash).await?;
        progress.record(WorkflowStep::Included {
            chain: ChainRole::Child,
            tx_hash,
            block_number: receipt.block_number,
        });

        let events = self
            .endpoints
            .read_with_retry("withdrawal events", || sdk.withdrawal_events(&receipt))
            .await?;
        let messages = self
            .endpoints
            .read_with_retry("withdrawal messages", || {
                sdk.messages_from_receipt(&receipt, Direction::ChildToParent)
            })
            .await?;
        let message = first_message(&tx_hash, Direction::ChildToParent, messages)?;
        progress.track(&message);

        // 事件与消息按发出顺序一一对应
        let event = events
            .get(message.sequence_index as usize)
            .or_else(|| events.first())
            .cloned()
            .ok_or(Error::UnexpectedMessageCount {
                tx_hash,
                direction: Direction::ChildToParent,
                expected: 1,
                found: 0,
            })?;
        if events.len() > 1 {
            warn!("Withdrawal {} emitted {} events", tx_hash, events.len());
        }

        info!(
            "Withdrawal {} initiated at position {}, status {}",
            message.id(),
            event.position,
            message.status
        );
        Ok(WithdrawalReceipt {
            source_tx: tx_hash,
            message,
            event,
            events,
        })
    }
}
