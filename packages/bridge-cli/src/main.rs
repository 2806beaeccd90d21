use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rollup_bridge_core::{
    types::{format_units, parse_units, RegistrationRecord, WithdrawalEvent, DEFAULT_DECIMALS},
    workflow::{DepositRequest, WithdrawRequest},
    Address, Amount, AssetDescriptor, Bridge, Config, Direction, TxHash,
};
use std::path::PathBuf;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unicode_width::UnicodeWidthStr;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE", global = true, default_value = "bridge.json")]
    config: PathBuf,

    /// 以 JSON 输出结果
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AssetKind {
    Native,
    GasToken,
    Erc20,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    ParentToChild,
    ChildToParent,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::ParentToChild => Direction::ParentToChild,
            DirectionArg::ChildToParent => Direction::ChildToParent,
        }
    }
}

#[derive(clap::Args)]
struct AmountArgs {
    /// 数量，默认按主单位解析（如 1.5）
    #[arg(short, long)]
    amount: String,

    /// 代币精度
    #[arg(long, default_value_t = DEFAULT_DECIMALS)]
    decimals: u32,

    /// amount 已经是最小单位
    #[arg(long)]
    raw: bool,
}

impl AmountArgs {
    fn parse(&self) -> Result<Amount> {
        if self.raw {
            return self
                .amount
                .parse::<Amount>()
                .with_context(|| format!("无效的数量: {}", self.amount));
        }
        Ok(parse_units(&self.amount, self.decimals)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig,
    /// 在自定义网关上注册父链代币与子链代币的映射
    Register {
        /// 父链代币，默认取配置中的 tokens.erc20_parent
        #[arg(long)]
        parent_token: Option<Address>,
        /// 子链代币，默认取配置中的 tokens.erc20_child
        #[arg(long)]
        child_token: Option<Address>,
    },
    /// 从父链存入子链
    Deposit {
        #[arg(long, value_enum, default_value = "native")]
        asset: AssetKind,
        /// ERC20 代币地址，默认取配置中的 tokens.erc20_parent
        #[arg(long)]
        token: Option<Address>,
        #[command(flatten)]
        amount: AmountArgs,
        /// 已完成的自定义代币注册交易，走自定义网关的代币必须提供
        #[arg(long)]
        registration_tx: Option<TxHash>,
    },
    /// 从子链发起提现，不等待挑战期
    Withdraw {
        #[arg(long, value_enum, default_value = "native")]
        asset: AssetKind,
        #[arg(long)]
        token: Option<Address>,
        #[command(flatten)]
        amount: AmountArgs,
        /// 父链收款地址，默认为签名者地址
        #[arg(long)]
        destination: Option<Address>,
        /// 已完成的自定义代币注册交易，走自定义网关的代币必须提供
        #[arg(long)]
        registration_tx: Option<TxHash>,
    },
    /// 挑战期结束后在父链执行提现消息
    Execute {
        /// 子链提现交易哈希
        #[arg(long)]
        tx_hash: TxHash,
        /// 等待 CONFIRMED 的最长秒数，默认取配置
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// 查询一笔交易发出的跨链消息状态
    Status {
        #[arg(long)]
        tx_hash: TxHash,
        #[arg(long, value_enum)]
        direction: DirectionArg,
    },
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "position")]
    position: u64,
    #[tabled(rename = "hash")]
    hash: String,
    #[tabled(rename = "child block")]
    child_block: u64,
    #[tabled(rename = "parent block")]
    parent_block: u64,
    #[tabled(rename = "caller")]
    caller: String,
    #[tabled(rename = "destination")]
    destination: String,
    #[tabled(rename = "callvalue")]
    callvalue: String,
    #[tabled(rename = "timestamp")]
    timestamp: u64,
    #[tabled(rename = "data")]
    data: String,
}

impl From<&WithdrawalEvent> for EventRow {
    fn from(event: &WithdrawalEvent) -> Self {
        Self {
            position: event.position,
            hash: event.hash.to_string(),
            child_block: event.child_block,
            parent_block: event.parent_block,
            caller: event.caller.to_string(),
            destination: event.destination.to_string(),
            callvalue: event.callvalue.to_string(),
            timestamp: event.timestamp,
            data: event.data.clone(),
        }
    }
}

/// 按显示宽度对齐的中文标签
fn print_field(label: &str, value: impl std::fmt::Display) {
    let pad = 14usize.saturating_sub(UnicodeWidthStr::width(label));
    println!("  {}{}  {}", label, " ".repeat(pad), value);
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn asset_of(kind: AssetKind, token: Option<Address>, config: &Config) -> Result<AssetDescriptor> {
    match kind {
        AssetKind::Native => Ok(AssetDescriptor::Native),
        AssetKind::GasToken => config
            .bridge
            .gas_token
            .map(|parent_address| AssetDescriptor::CustomGasToken { parent_address })
            .ok_or_else(|| anyhow!("当前网络没有配置自定义 gas token")),
        AssetKind::Erc20 => {
            let parent_address = token
                .or(config.tokens.erc20_parent)
                .ok_or_else(|| anyhow!("未指定 ERC20 代币地址，也没有在配置中设置 tokens.erc20_parent"))?;
            Ok(AssetDescriptor::Erc20 {
                parent_address,
                child_address: config.tokens.erc20_child,
            })
        }
    }
}

/// Ctrl-C 时取消所有轮询
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，停止等待");
            trigger.cancel();
        }
    });
    cancel
}

async fn registration_record(
    bridge: &Bridge,
    registration_tx: &TxHash,
    parent_token: Address,
    child_token: Option<Address>,
    cancel: &CancellationToken,
) -> Result<RegistrationRecord> {
    let child_token = child_token.ok_or_else(|| anyhow!("验证注册需要在配置中设置 tokens.erc20_child"))?;
    info!("正在验证注册交易 {}", registration_tx);
    let record = bridge
        .registrar()
        .verify(registration_tx, parent_token, child_token, cancel)
        .await
        .into_result()?;
    Ok(record)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志，默认 info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    info!("使用配置文件: {:?}", cli.config);
    let config = Config::load(&cli.config)?;

    if let Commands::ValidateConfig = cli.command {
        println!("配置文件验证成功!");
        println!("配置内容概要:");
        print_field("父链", format!("{} ({}): {}", config.parent.name, config.parent.chain_id, config.parent.rpc_url));
        print_field("子链", format!("{} ({}): {}", config.child.name, config.child.chain_id, config.child.rpc_url));
        print_field("桥服务", &config.bridge.service_url);
        print_field("Inbox", config.bridge.inbox);
        match config.bridge.gas_token {
            Some(gas_token) => print_field("Gas token", gas_token),
            None => print_field("Gas token", "原生资产"),
        }
        print_field("自定义网关", format!("{} -> {}", config.bridge.parent_custom_gateway, config.bridge.child_custom_gateway));
        print_field("签名者", format!("{} ({})", config.signer.address, config.signer.key_id));
        print_field("轮询间隔", format!("{}毫秒", config.tracking.poll_interval_ms));
        print_field("存款最长等待", format!("{}秒", config.tracking.deposit_max_wait_secs));
        return Ok(());
    }

    let bridge = Bridge::from_config(&config)?;
    let signer = config.signer.clone();
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::ValidateConfig => Ok(()),
        Commands::Register { parent_token, child_token } => {
            let parent_token = parent_token
                .or(config.tokens.erc20_parent)
                .ok_or_else(|| anyhow!("未指定父链代币"))?;
            let child_token = child_token
                .or(config.tokens.erc20_child)
                .ok_or_else(|| anyhow!("未指定子链代币"))?;

            info!("正在注册自定义代币 {} -> {}", parent_token, child_token);
            let record = bridge
                .register_custom_token(parent_token, child_token, &signer, &cancel)
                .await
                .into_result()?;

            if cli.json {
                return print_json(&record);
            }
            println!("注册完成!");
            print_field("父链代币", record.parent_token());
            print_field("子链代币", record.child_token());
            print_field("父链网关", record.parent_gateway());
            print_field("子链网关", record.child_gateway());
            Ok(())
        }
        Commands::Deposit { asset, token, amount, registration_tx } => {
            let asset = asset_of(asset, token, &config)?;
            let decimals = amount.decimals;
            let amount = amount.parse()?;

            let mut request = DepositRequest::new(asset.clone(), amount, signer.clone());
            if let (Some(registration_tx), Some(parent_token)) = (registration_tx, asset.parent_token()) {
                let record = registration_record(&bridge, &registration_tx, parent_token, config.tokens.erc20_child, &cancel).await?;
                request = request.with_registration(record);
            }

            info!("正在存入 {} {}", format_units(amount, decimals), asset);
            let receipt = bridge.deposit(&request, &cancel).await.into_result()?;

            if cli.json {
                return print_json(&receipt);
            }
            println!("存款完成!");
            print_field("存款交易", receipt.source_tx);
            print_field("消息", format!("{} {}", receipt.message.id(), receipt.message.status));
            print_field("子链余额(前)", format_units(receipt.child_balance_before, decimals));
            print_field("子链余额(后)", format_units(receipt.child_balance_after, decimals));
            print_field("父链余额", format_units(receipt.parent_balance_after, decimals));
            Ok(())
        }
        Commands::Withdraw { asset, token, amount, destination, registration_tx } => {
            let asset = asset_of(asset, token, &config)?;
            let decimals = amount.decimals;
            let amount = amount.parse()?;
            let destination = destination.unwrap_or(signer.address);
            let mut request = WithdrawRequest::new(asset.clone(), amount, signer.clone(), destination);
            if let (Some(registration_tx), Some(parent_token)) = (registration_tx, asset.parent_token()) {
                let record = registration_record(&bridge, &registration_tx, parent_token, config.tokens.erc20_child, &cancel).await?;
                request = request.with_registration(record);
            }

            info!("正在提现 {}", format_units(amount, decimals));
            let receipt = bridge.withdraw(&request).await.into_result()?;

            if cli.json {
                return print_json(&receipt);
            }
            println!("提现已发起，挑战期结束后使用 execute 执行");
            print_field("提现交易", receipt.source_tx);
            print_field("消息", format!("{} {}", receipt.message.id(), receipt.message.status));
            let rows: Vec<EventRow> = receipt.events.iter().map(EventRow::from).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
            Ok(())
        }
        Commands::Execute { tx_hash, deadline_secs } => {
            let deadline = deadline_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.tracking.confirmation_deadline());

            info!("正在执行提现 {} 的 outbox 消息", tx_hash);
            let execution = bridge
                .outbox()
                .execute_from_tx(&tx_hash, &signer, deadline, &cancel)
                .await
                .into_result()?;

            if cli.json {
                return print_json(&execution);
            }
            println!("执行完成!");
            print_field("执行交易", execution.receipt.tx_hash);
            print_field("区块", execution.receipt.block_number);
            let observed: Vec<String> = execution.observed.iter().map(|status| status.to_string()).collect();
            print_field("状态变化", observed.join(" -> "));
            Ok(())
        }
        Commands::Status { tx_hash, direction } => {
            let messages = bridge.message_status(&tx_hash, direction.into(), &cancel).await?;

            if cli.json {
                return print_json(&messages);
            }
            if messages.is_empty() {
                println!("交易 {} 没有发出跨链消息", tx_hash);
            }
            for message in &messages {
                print_field(&format!("#{}", message.sequence_index), message.status);
            }
            Ok(())
        }
    }
}
