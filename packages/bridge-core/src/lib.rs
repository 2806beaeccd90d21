pub mod approval;
pub mod chain_adapter;
pub mod config;
pub mod endpoint;
pub mod tracker;
pub mod types;
pub mod workflow;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

pub use config::Config;
pub use endpoint::EndpointPair;
pub use types::{
    Address, Amount, AssetDescriptor, ChainRole, Direction, MessageId, MessageStatus,
    RelayedMessage, Signer, TxHash,
};
pub use workflow::{Bridge, WorkflowFailure, WorkflowResult};

use types::{MessageOutcome, RegistrationStep};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{chain} chain unavailable: {reason}")]
    ChainUnavailable { chain: ChainRole, reason: String },

    #[error("Transaction {tx_hash} not found on {chain} chain after {attempts} attempts")]
    TransactionNotFound {
        chain: ChainRole,
        tx_hash: TxHash,
        attempts: u32,
    },

    #[error("Transaction {tx_hash} has {have} of {want} confirmations on {chain} chain")]
    ConfirmationsPending {
        chain: ChainRole,
        tx_hash: TxHash,
        have: u64,
        want: u64,
    },

    #[error("Approval rejected: allowance for spender {spender} is {confirmed} after approval, {required} required")]
    ApprovalRejected {
        spender: Address,
        required: Amount,
        confirmed: Amount,
    },

    #[error("Transaction {tx_hash} reverted on {chain} chain")]
    TransactionReverted { chain: ChainRole, tx_hash: TxHash },

    #[error("Message {message} failed with status {status}")]
    MessageFailed {
        message: MessageId,
        status: MessageStatus,
    },

    #[error("Message {message} expired")]
    MessageExpired { message: MessageId },

    #[error("Registration incomplete: {which} did not succeed (SetToken: {set_token}, SetGateways: {set_gateways})")]
    RegistrationIncomplete {
        which: RegistrationStep,
        set_token: MessageOutcome,
        set_gateways: MessageOutcome,
    },

    #[error("Tracking message {message} timed out after {waited:?}, last status: {}", display_status(.last_status))]
    TrackingTimeout {
        message: MessageId,
        last_status: Option<MessageStatus>,
        waited: Duration,
    },

    #[error("Message {message} not confirmed within {waited:?}, last status: {}", display_status(.last_status))]
    ConfirmationTimeout {
        message: MessageId,
        last_status: Option<MessageStatus>,
        waited: Duration,
    },

    #[error("Message {message} already executed")]
    AlreadyExecuted { message: MessageId },

    #[error("Tracking message {message} cancelled")]
    Cancelled { message: MessageId },

    #[error("Transaction {tx_hash} emitted {found} {direction} message(s), expected at least {expected}")]
    UnexpectedMessageCount {
        tx_hash: TxHash,
        direction: Direction,
        expected: usize,
        found: usize,
    },
}

impl Error {
    /// 可重试的读取失败（网络抖动、交易尚未出现）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::ChainUnavailable { .. } | Error::TransactionNotFound { .. }
        )
    }

    /// 失败时最后观察到的消息状态
    pub fn message_status(&self) -> Option<MessageStatus> {
        match self {
            Error::MessageFailed { status, .. } => Some(*status),
            Error::MessageExpired { .. } => Some(MessageStatus::ParentToChild(
                types::ParentToChildStatus::Expired,
            )),
            Error::AlreadyExecuted { .. } => Some(MessageStatus::ChildToParent(
                types::ChildToParentStatus::Executed,
            )),
            Error::TrackingTimeout { last_status, .. }
            | Error::ConfirmationTimeout { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

fn display_status(status: &Option<MessageStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "unknown".to_string(),
    }
}
