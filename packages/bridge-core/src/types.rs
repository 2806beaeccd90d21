use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// 最小单位计量的数量（wei）
pub type Amount = u128;

pub const DEFAULT_DECIMALS: u32 = 18;

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], Error> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| Error::Config(format!("{} doesn't look like {}: missing 0x prefix", s, what)))?;
    if digits.len() != N * 2 {
        return Err(Error::Config(format!(
            "{} doesn't look like {}: expected {} hex digits, got {}",
            s,
            what,
            N * 2,
            digits.len()
        )));
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| Error::Config(format!("{} doesn't look like {}: {}", s, what, e)))?;
    Ok(out)
}

macro_rules! hex_newtype {
    ($name:ident, $len:expr, $what:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_fixed::<$len>(s, $what).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_newtype!(Address, 20, "an address");
hex_newtype!(TxHash, 32, "a transaction hash");

impl Address {
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Address(bytes)
    }
}

impl TxHash {
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        TxHash(bytes)
    }
}

/// 桥两端的账本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRole {
    Parent,
    Child,
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainRole::Parent => write!(f, "parent"),
            ChainRole::Child => write!(f, "child"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ParentToChild,
    ChildToParent,
}

impl Direction {
    pub fn source(&self) -> ChainRole {
        match self {
            Direction::ParentToChild => ChainRole::Parent,
            Direction::ChildToParent => ChainRole::Child,
        }
    }

    pub fn destination(&self) -> ChainRole {
        match self {
            Direction::ParentToChild => ChainRole::Child,
            Direction::ChildToParent => ChainRole::Parent,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ParentToChild => write!(f, "parent-to-child"),
            Direction::ChildToParent => write!(f, "child-to-parent"),
        }
    }
}

/// 被转移的资产
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetDescriptor {
    Native,
    CustomGasToken {
        parent_address: Address,
    },
    Erc20 {
        parent_address: Address,
        child_address: Option<Address>,
    },
}

impl AssetDescriptor {
    /// 父链上的代币合约地址，原生资产没有
    pub fn parent_token(&self) -> Option<Address> {
        match self {
            AssetDescriptor::Native => None,
            AssetDescriptor::CustomGasToken { parent_address }
            | AssetDescriptor::Erc20 { parent_address, .. } => Some(*parent_address),
        }
    }

    pub fn is_erc20(&self) -> bool {
        matches!(self, AssetDescriptor::Erc20 { .. })
    }
}

impl fmt::Display for AssetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetDescriptor::Native => write!(f, "native"),
            AssetDescriptor::CustomGasToken { parent_address } => {
                write!(f, "gas-token({})", parent_address)
            }
            AssetDescriptor::Erc20 { parent_address, .. } => write!(f, "erc20({})", parent_address),
        }
    }
}

/// 一次链上读取得到的授权额度，只在当前步骤内有效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub owner: Address,
    pub spender: Address,
    pub asset: AssetDescriptor,
    pub amount: Amount,
}

impl Allowance {
    pub fn satisfies(&self, required: Amount) -> bool {
        self.amount >= required
    }
}

/// 发起交易的账户，私钥由 SDK 侧保管
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub address: Address,
    pub key_id: String,
}

impl Signer {
    pub fn new(address: Address, key_id: impl Into<String>) -> Self {
        Self {
            address,
            key_id: key_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParentToChildStatus {
    Created,
    AutoRedeemAttempted,
    Redeemed,
    Expired,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildToParentStatus {
    Unconfirmed,
    Confirmed,
    Executed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "direction", content = "status", rename_all = "snake_case")]
pub enum MessageStatus {
    ParentToChild(ParentToChildStatus),
    ChildToParent(ChildToParentStatus),
}

impl MessageStatus {
    pub fn direction(&self) -> Direction {
        match self {
            MessageStatus::ParentToChild(_) => Direction::ParentToChild,
            MessageStatus::ChildToParent(_) => Direction::ChildToParent,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            MessageStatus::ParentToChild(status) => matches!(
                status,
                ParentToChildStatus::Redeemed
                    | ParentToChildStatus::Expired
                    | ParentToChildStatus::Failed
            ),
            MessageStatus::ChildToParent(status) => *status == ChildToParentStatus::Executed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MessageStatus::ParentToChild(ParentToChildStatus::Redeemed)
                | MessageStatus::ChildToParent(ChildToParentStatus::Executed)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageStatus::ParentToChild(status) => match status {
                ParentToChildStatus::Created => "CREATED",
                ParentToChildStatus::AutoRedeemAttempted => "AUTO_REDEEM_ATTEMPTED",
                ParentToChildStatus::Redeemed => "REDEEMED",
                ParentToChildStatus::Expired => "EXPIRED",
                ParentToChildStatus::Failed => "FAILED",
            },
            MessageStatus::ChildToParent(status) => match status {
                ChildToParentStatus::Unconfirmed => "UNCONFIRMED",
                ChildToParentStatus::Confirmed => "CONFIRMED",
                ChildToParentStatus::Executed => "EXECUTED",
            },
        };
        f.write_str(name)
    }
}

/// 源交易哈希 + 该交易内的消息序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub source_tx_hash: TxHash,
    pub sequence_index: u32,
}

impl MessageId {
    pub fn new(source_tx_hash: TxHash, sequence_index: u32) -> Self {
        Self {
            source_tx_hash,
            sequence_index,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_tx_hash, self.sequence_index)
    }
}

/// 一条正在跨链途中的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub direction: Direction,
    pub source_tx_hash: TxHash,
    pub sequence_index: u32,
    /// 最近一次观察到的状态
    pub status: MessageStatus,
    /// unix 秒
    pub created_at: u64,
}

impl RelayedMessage {
    pub fn id(&self) -> MessageId {
        MessageId::new(self.source_tx_hash, self.sequence_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// 子链提现交易发出的 L2ToL1Tx 事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub position: u64,
    pub hash: TxHash,
    pub child_block: u64,
    pub parent_block: u64,
    pub caller: Address,
    pub destination: Address,
    pub callvalue: Amount,
    pub timestamp: u64,
    pub data: String,
}

/// 自定义代币注册产生的两条消息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStep {
    SetToken,
    SetGateways,
}

impl RegistrationStep {
    pub fn sequence_index(&self) -> u32 {
        match self {
            RegistrationStep::SetToken => 0,
            RegistrationStep::SetGateways => 1,
        }
    }
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStep::SetToken => write!(f, "SetToken"),
            RegistrationStep::SetGateways => write!(f, "SetGateways"),
        }
    }
}

/// 一条子消息的跟踪结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Terminal(MessageStatus),
    Unresolved(String),
}

impl MessageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MessageOutcome::Terminal(status) if status.is_success())
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageOutcome::Terminal(status) => write!(f, "{}", status),
            MessageOutcome::Unresolved(reason) => write!(f, "unresolved ({})", reason),
        }
    }
}

/// 注册完成的证明，只能由注册流程在两条消息都 REDEEMED 后构造
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationRecord {
    parent_token: Address,
    child_token: Address,
    parent_gateway: Address,
    child_gateway: Address,
}

impl RegistrationRecord {
    pub(crate) fn new(
        parent_token: Address,
        child_token: Address,
        parent_gateway: Address,
        child_gateway: Address,
    ) -> Self {
        Self {
            parent_token,
            child_token,
            parent_gateway,
            child_gateway,
        }
    }

    pub fn parent_token(&self) -> Address {
        self.parent_token
    }

    pub fn child_token(&self) -> Address {
        self.child_token
    }

    pub fn parent_gateway(&self) -> Address {
        self.parent_gateway
    }

    pub fn child_gateway(&self) -> Address {
        self.child_gateway
    }

    /// 已注册代币对应的资产描述
    pub fn asset(&self) -> AssetDescriptor {
        AssetDescriptor::Erc20 {
            parent_address: self.parent_token,
            child_address: Some(self.child_token),
        }
    }
}

/// "1.5" -> 1_500000000000000000 (decimals = 18)
pub fn parse_units(value: &str, decimals: u32) -> Result<Amount, Error> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (value, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(Error::Config(format!("Invalid amount: {:?}", value)));
    }
    if frac.len() > decimals as usize {
        return Err(Error::Config(format!(
            "Invalid amount {}: more than {} decimal places",
            value, decimals
        )));
    }
    let digits = format!("{}{:0<width$}", whole, frac, width = decimals as usize);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Config(format!("Invalid amount: {}", value)));
    }
    digits
        .parse::<Amount>()
        .map_err(|e| Error::Config(format!("Invalid amount {}: {}", value, e)))
}

pub fn format_units(amount: Amount, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return format!("{}.0", whole);
    }
    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_hash_parsing() {
        let hash = "0x9a1b6f6c2c3f2e0b7d5f3c6a1e8d4b2a0c9e7f5d3b1a8c6e4f2d0b9a7c5e3f1d";
        let parsed: TxHash = hash.parse().unwrap();
        assert_eq!(parsed.to_string(), hash);

        // 长度不对
        assert!("0x1234".parse::<TxHash>().is_err());
        // 缺少 0x
        assert!(hash[2..].parse::<TxHash>().is_err());
        // 非十六进制
        let bad = format!("0x{}", "zz".repeat(32));
        assert!(bad.parse::<TxHash>().is_err());
    }

    #[test]
    fn test_address_serde() {
        let address = Address::from_low_u64(0xbeef);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0x000000000000000000000000000000000000beef\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_terminal_statuses() {
        use ParentToChildStatus::*;
        assert!(!MessageStatus::ParentToChild(Created).is_terminal());
        assert!(!MessageStatus::ParentToChild(AutoRedeemAttempted).is_terminal());
        assert!(MessageStatus::ParentToChild(Redeemed).is_terminal());
        assert!(MessageStatus::ParentToChild(Expired).is_terminal());
        assert!(MessageStatus::ParentToChild(Failed).is_terminal());
        assert!(!MessageStatus::ParentToChild(Failed).is_success());

        assert!(!MessageStatus::ChildToParent(ChildToParentStatus::Confirmed).is_terminal());
        assert!(MessageStatus::ChildToParent(ChildToParentStatus::Executed).is_success());
    }

    #[test]
    fn test_asset_descriptor_serde() {
        let asset: AssetDescriptor = serde_json::from_str(
            r#"{"kind":"erc20","parent_address":"0x0000000000000000000000000000000000000011","child_address":null}"#,
        )
        .unwrap();
        assert_eq!(asset.parent_token(), Some(Address::from_low_u64(0x11)));
        assert!(asset.is_erc20());
        assert_eq!(AssetDescriptor::Native.parent_token(), None);
    }

    #[test]
    fn test_units() {
        assert_eq!(parse_units("1", 18).unwrap(), 1_000000000000000000);
        assert_eq!(parse_units("0.000001", 18).unwrap(), 1_000000000000);
        assert_eq!(parse_units("2.5", 6).unwrap(), 2_500000);
        assert!(parse_units("1.1234567", 6).is_err());
        assert!(parse_units("abc", 18).is_err());
        assert!(parse_units(".", 18).is_err());

        assert_eq!(format_units(1_000000000000000000, 18), "1.0");
        assert_eq!(format_units(1_500000000000000000, 18), "1.5");
        assert_eq!(format_units(1_000000, 18), "0.000000000001");
    }
}
