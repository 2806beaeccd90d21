use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    endpoint::EndpointPair,
    types::{Address, Allowance, Amount, AssetDescriptor, ChainRole, Signer, TxHash},
    Error, Result,
};

/// 一次 ensure_allowance 的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// 额度已足够，没有发交易
    AlreadySufficient { spender: Address, allowance: Amount },
    Approved {
        spender: Address,
        tx_hash: TxHash,
        allowance: Amount,
    },
}

impl ApprovalOutcome {
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            ApprovalOutcome::AlreadySufficient { .. } => None,
            ApprovalOutcome::Approved { tx_hash, .. } => Some(*tx_hash),
        }
    }
}

pub struct ApprovalManager<'a> {
    endpoints: &'a EndpointPair,
}

impl<'a> ApprovalManager<'a> {
    pub fn new(endpoints: &'a EndpointPair) -> Self {
        Self { endpoints }
    }

    pub async fn allowance(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        owner: &Address,
        spender: &Address,
    ) -> Result<Allowance> {
        let sdk = self.endpoints.sdk();
        let amount = self
            .endpoints
            .read_with_retry("allowance", || sdk.allowance(chain, asset, owner, spender))
            .await?;
        Ok(Allowance {
            owner: *owner,
            spender: *spender,
            asset: asset.clone(),
            amount,
        })
    }

    /// 保证 owner 给 spender 的授权额度不少于 required
    ///
    /// 额度已足够时直接返回，不提交任何交易。否则提交授权交易，等待回执后重新读取额度；
    /// 确认后的额度仍然不足则返回 `ApprovalRejected`。
    pub async fn ensure_allowance(
        &self,
        chain: ChainRole,
        asset: &AssetDescriptor,
        owner: &Signer,
        spender: &Address,
        required: Amount,
    ) -> Result<ApprovalOutcome> {
        if matches!(asset, AssetDescriptor::Native) {
            return Err(Error::Config("Native asset cannot be approved".to_string()));
        }

        let current = self.allowance(chain, asset, &owner.address, spender).await?;
        if current.satisfies(required) {
            debug!("Allowance {} of {} to {} already covers {}", current.amount, asset, spender, required);
            return Ok(ApprovalOutcome::AlreadySufficient {
                spender: *spender,
                allowance: current.amount,
            });
        }

        info!("Approving {} of {} to {} on {} chain", required, asset, spender, chain);
        let tx_hash = self
            .endpoints
            .sdk()
            .approve(chain, asset, spender, required, owner)
            .await?;
        self.endpoints.wait_for_success(chain, &tx_hash).await?;

        let confirmed = self.allowance(chain, asset, &owner.address, spender).await?;
        if !confirmed.satisfies(required) {
            warn!("Approval {} confirmed but allowance is only {}", tx_hash, confirmed.amount);
            return Err(Error::ApprovalRejected {
                spender: *spender,
                required,
                confirmed: confirmed.amount,
            });
        }

        info!("Allowance of {} to {} is now {}", asset, spender, confirmed.amount);
        Ok(ApprovalOutcome::Approved {
            spender: *spender,
            tx_hash,
            allowance: confirmed.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_adapter::{MockBridgeSdk, MockChainConnection};
    use crate::endpoint::{ChainRef, ReceiptPolicy};
    use crate::types::Receipt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn endpoints(sdk: MockBridgeSdk, parent: MockChainConnection) -> EndpointPair {
        let mut child = MockChainConnection::new();
        child.expect_chain_id().return_const(2u64);
        EndpointPair::new(
            ChainRef::new(ChainRole::Parent, "parent", Arc::new(parent)),
            ChainRef::new(ChainRole::Child, "child", Arc::new(child)),
            Arc::new(sdk),
            ReceiptPolicy {
                poll_interval: Duration::from_millis(1),
                attempts: 3,
                confirmations: 1,
                transient_retries: 2,
            },
        )
        .unwrap()
    }

    fn parent_with_receipts() -> MockChainConnection {
        let mut parent = MockChainConnection::new();
        parent.expect_chain_id().return_const(1u64);
        parent.expect_get_transaction_receipt().returning(|hash| {
            Ok(Some(Receipt {
                tx_hash: *hash,
                block_number: 1,
                success: true,
                logs: vec![],
            }))
        });
        parent
    }

    fn gas_token() -> AssetDescriptor {
        AssetDescriptor::CustomGasToken {
            parent_address: Address::from_low_u64(0x6a5),
        }
    }

    #[tokio::test]
    async fn test_sufficient_allowance_submits_nothing() {
        let mut sdk = MockBridgeSdk::new();
        sdk.expect_allowance().times(2).returning(|_, _, _, _| Ok(1_000));
        sdk.expect_approve().times(0);
        let endpoints = endpoints(sdk, parent_with_receipts());
        let manager = ApprovalManager::new(&endpoints);
        let owner = Signer::new(Address::from_low_u64(1), "owner");
        let spender = Address::from_low_u64(2);

        // 第二次调用同样不会提交交易
        for _ in 0..2 {
            let outcome = tokio_test::assert_ok!(
                manager
                    .ensure_allowance(ChainRole::Parent, &gas_token(), &owner, &spender, 1_000)
                    .await
            );
            assert_eq!(outcome.tx_hash(), None);
        }
    }

    #[tokio::test]
    async fn test_approval_rereads_allowance() {
        let reads = Arc::new(AtomicU32::new(0));
        let counter = reads.clone();
        let mut sdk = MockBridgeSdk::new();
        sdk.expect_allowance().times(2).returning(move |_, _, _, _| {
            Ok(if counter.fetch_add(1, Ordering::SeqCst) == 0 { 0 } else { 500 })
        });
        sdk.expect_approve()
            .withf(|chain, _, _, amount, _| *chain == ChainRole::Parent && *amount == 500)
            .times(1)
            .returning(|_, _, _, _, _| Ok(TxHash::from_low_u64(77)));
        let endpoints = endpoints(sdk, parent_with_receipts());
        let manager = ApprovalManager::new(&endpoints);
        let owner = Signer::new(Address::from_low_u64(1), "owner");

        let outcome = manager
            .ensure_allowance(ChainRole::Parent, &gas_token(), &owner, &Address::from_low_u64(2), 500)
            .await
            .unwrap();
        assert_eq!(outcome.tx_hash(), Some(TxHash::from_low_u64(77)));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_insufficient_after_approval_is_rejected() {
        let mut sdk = MockBridgeSdk::new();
        sdk.expect_allowance().returning(|_, _, _, _| Ok(10));
        sdk.expect_approve()
            .times(1)
            .returning(|_, _, _, _, _| Ok(TxHash::from_low_u64(3)));
        let endpoints = endpoints(sdk, parent_with_receipts());
        let manager = ApprovalManager::new(&endpoints);
        let owner = Signer::new(Address::from_low_u64(1), "owner");

        let err = manager
            .ensure_allowance(ChainRole::Parent, &gas_token(), &owner, &Address::from_low_u64(2), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ApprovalRejected { required: 100, confirmed: 10, .. }));
    }

    #[tokio::test]
    async fn test_native_asset_cannot_be_approved() {
        let endpoints = endpoints(MockBridgeSdk::new(), parent_with_receipts());
        let manager = ApprovalManager::new(&endpoints);
        let owner = Signer::new(Address::from_low_u64(1), "owner");
        let err = manager
            .ensure_allowance(ChainRole::Parent, &AssetDescriptor::Native, &owner, &Address::from_low_u64(2), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
