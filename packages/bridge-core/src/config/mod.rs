use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::{
    types::{Address, Signer},
    Error,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
}

/// 桥合约部署信息
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BridgeNetwork {
    /// 桥 SDK 服务地址
    pub service_url: String,
    pub inbox: Address,
    /// 子链使用自定义 gas token 时，它在父链上的 ERC20 地址
    #[serde(default)]
    pub gas_token: Option<Address>,
    pub parent_custom_gateway: Address,
    pub child_custom_gateway: Address,
}

impl BridgeNetwork {
    pub fn uses_custom_gas_token(&self) -> bool {
        self.gas_token.is_some()
    }
}

/// 轮询相关参数
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TrackingConfig {
    pub poll_interval_ms: u64,
    pub deposit_max_wait_secs: u64,
    pub registration_max_wait_secs: u64,
    pub confirmation_poll_interval_ms: u64,
    pub confirmation_deadline_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_attempts: u32,
    pub confirmations: u64,
    pub transient_retries: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            // 排序器一般在 15 分钟左右收录
            deposit_max_wait_secs: 30 * 60,
            registration_max_wait_secs: 30 * 60,
            confirmation_poll_interval_ms: 60_000,
            confirmation_deadline_secs: 60,
            receipt_poll_interval_ms: 1_000,
            receipt_attempts: 120,
            confirmations: 1,
            transient_retries: 3,
        }
    }
}

impl TrackingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deposit_max_wait(&self) -> Duration {
        Duration::from_secs(self.deposit_max_wait_secs)
    }

    pub fn registration_max_wait(&self) -> Duration {
        Duration::from_secs(self.registration_max_wait_secs)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_interval_ms)
    }

    pub fn confirmation_deadline(&self) -> Duration {
        Duration::from_secs(self.confirmation_deadline_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// 默认使用的代币地址
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TokenConfig {
    #[serde(default)]
    pub erc20_parent: Option<Address>,
    #[serde(default)]
    pub erc20_child: Option<Address>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub parent: ChainConfig,
    pub child: ChainConfig,
    pub bridge: BridgeNetwork,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    pub signer: Signer,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&config_str)?,
            _ => Self::from_json(&config_str)?,
        };

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    pub fn from_json(config_str: &str) -> Result<Self, Error> {
        serde_json::from_str(config_str)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn from_toml(config_str: &str) -> Result<Self, Error> {
        toml::from_str(config_str)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        // 父链和子链必须是两条不同的链
        if self.parent.chain_id == self.child.chain_id {
            return Err(Error::Config(format!(
                "Parent and child chain must differ, both are chain {}",
                self.parent.chain_id
            )));
        }

        for chain in [&self.parent, &self.child] {
            if chain.rpc_url.trim().is_empty() {
                return Err(Error::Config(format!("Missing RPC URL for chain {}", chain.name)));
            }
        }

        if self.bridge.service_url.trim().is_empty() {
            return Err(Error::Config("Missing bridge service URL".to_string()));
        }

        if self.bridge.parent_custom_gateway == self.bridge.inbox {
            return Err(Error::Config("Custom gateway and inbox must be different contracts".to_string()));
        }

        // 验证轮询配置
        if self.tracking.poll_interval_ms == 0 || self.tracking.confirmation_poll_interval_ms == 0 {
            return Err(Error::Config("Poll interval must be greater than 0".to_string()));
        }
        if self.tracking.receipt_attempts == 0 {
            return Err(Error::Config("Receipt attempts must be greater than 0".to_string()));
        }

        if self.signer.key_id.trim().is_empty() {
            return Err(Error::Config("Signer key id must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "parent": { "name": "arbitrum-sepolia", "chain_id": 421614, "rpc_url": "http://localhost:8547" },
        "child": { "name": "dkargo-testnet", "chain_id": 61022448, "rpc_url": "http://localhost:3347" },
        "bridge": {
            "service_url": "http://localhost:9000",
            "inbox": "0x0000000000000000000000000000000000000a01",
            "gas_token": "0x0000000000000000000000000000000000000a02",
            "parent_custom_gateway": "0x0000000000000000000000000000000000000a03",
            "child_custom_gateway": "0x0000000000000000000000000000000000000b03"
        },
        "tracking": { "poll_interval_ms": 1000 },
        "signer": { "address": "0x0000000000000000000000000000000000000c01", "key_id": "deployer" }
    }"#;

    #[test]
    fn test_load_json_with_defaults() {
        let config = Config::from_json(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.tracking.poll_interval_ms, 1000);
        assert_eq!(config.tracking.receipt_attempts, TrackingConfig::default().receipt_attempts);
        assert!(config.bridge.uses_custom_gas_token());
        assert!(config.tokens.erc20_parent.is_none());
    }

    #[test]
    fn test_same_chain_rejected() {
        let mut config = Config::from_json(SAMPLE).unwrap();
        config.child.chain_id = config.parent.chain_id;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = Config::from_json(SAMPLE).unwrap();
        config.tracking.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_address_rejected() {
        let broken = SAMPLE.replace("0x0000000000000000000000000000000000000a01", "0x1234");
        assert!(matches!(Config::from_json(&broken), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_toml() {
        let toml_str = r#"
            [parent]
            name = "arbitrum-sepolia"
            chain_id = 421614
            rpc_url = "http://localhost:8547"

            [child]
            name = "dkargo-testnet"
            chain_id = 61022448
            rpc_url = "http://localhost:3347"

            [bridge]
            service_url = "http://localhost:9000"
            inbox = "0x0000000000000000000000000000000000000a01"
            parent_custom_gateway = "0x0000000000000000000000000000000000000a03"
            child_custom_gateway = "0x0000000000000000000000000000000000000b03"

            [signer]
            address = "0x0000000000000000000000000000000000000c01"
            key_id = "deployer"
        "#;
        let config = Config::from_toml(toml_str).unwrap();
        config.validate().unwrap();
        assert!(!config.bridge.uses_custom_gas_token());
    }
}
