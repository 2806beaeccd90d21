use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn};

use crate::{
    chain_adapter::BridgeSdk,
    types::{MessageStatus, RelayedMessage},
    Error, Result,
};

/// 轮询间隔与最长等待时间
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }
}

/// 单次状态读取的默认上限
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// 消息状态机的轮询引擎，存款、注册、提现和 outbox 执行共用
///
/// 链上查询是唯一的状态来源：一次读取失败只会重试，只有查询返回的终态才算终态。
/// 每次读取都与截止时间和取消信号竞争，卡住的读取不会拖住轮询。
#[derive(Clone)]
pub struct MessageTracker {
    sdk: Arc<dyn BridgeSdk>,
    read_timeout: Duration,
}

impl MessageTracker {
    pub fn new(sdk: Arc<dyn BridgeSdk>) -> Self {
        Self {
            sdk,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// 读取一次状态，超时按瞬时错误处理
    async fn read(
        &self,
        message: &RelayedMessage,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<MessageStatus> {
        let deadline = deadline.min(Instant::now() + self.read_timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { message: message.id() }),
            read = timeout_at(deadline, self.sdk.status(message)) => match read {
                Ok(result) => result,
                Err(_) => Err(Error::Network(format!("status read for {} timed out", message.id()))),
            },
        }
    }

    /// 单次读取当前状态，瞬时失败最多重试 `retries` 次
    pub async fn current_status(
        &self,
        message: &RelayedMessage,
        retries: u32,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<MessageStatus> {
        let id = message.id();
        let mut failures = 0;
        loop {
            let deadline = Instant::now() + self.read_timeout;
            match self.read(message, deadline, cancel).await {
                Ok(status) => return Ok(status),
                Err(e) if e.is_transient() && failures < retries => {
                    failures += 1;
                    warn!("Status read for {} failed ({}/{}): {}", id, failures, retries, e);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled { message: id }),
                        _ = sleep(retry_delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 轮询直到出现终态
    pub async fn await_terminal(
        &self,
        message: &RelayedMessage,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<MessageStatus> {
        self.await_status(message, policy, cancel, |status| status.is_terminal())
            .await
    }

    /// 轮询直到状态满足 `reached`，超时返回 `TrackingTimeout`
    pub async fn await_status<F>(
        &self,
        message: &RelayedMessage,
        policy: PollPolicy,
        cancel: &CancellationToken,
        reached: F,
    ) -> Result<MessageStatus>
    where
        F: Fn(&MessageStatus) -> bool,
    {
        let id = message.id();
        let started = Instant::now();
        let deadline = started + policy.max_wait;
        let mut last_status: Option<MessageStatus> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { message: id });
            }

            match self.read(message, deadline, cancel).await {
                Ok(status) => {
                    if last_status != Some(status) {
                        info!("Message {} is {}", id, status);
                    }
                    last_status = Some(status);
                    if reached(&status) {
                        return Ok(status);
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!("Transient failure polling {}: {}", id, e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TrackingTimeout {
                    message: id,
                    last_status,
                    waited: now - started,
                });
            }

            let pause = policy.poll_interval.min(deadline - now);
            debug!("Polling {} again in {:?}", id, pause);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled { message: id }),
                _ = sleep(pause) => {}
            }
        }
    }
}
