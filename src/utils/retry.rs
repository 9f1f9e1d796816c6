//! 重试策略
//!
//! 线性退避并设上限：第 n 次失败后等待 `min(base * n, max)`。
//! 只有瞬时错误（频率限制、超时、网络错误）会被重试。

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::models::TaskError;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次调用之外的最大重试次数
    pub retry_times: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_times: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_times: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retry_times,
            base_delay,
            max_delay,
        }
    }

    /// 不重试
    pub fn none() -> Self {
        Self {
            retry_times: 0,
            ..Self::default()
        }
    }

    /// 最多调用次数
    pub fn max_attempts(&self) -> u32 {
        self.retry_times.saturating_add(1)
    }

    /// 第 `attempt` 次（1-based）失败后的等待时间
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

/// 按策略执行异步操作
///
/// # 参数
/// - `policy`: 重试策略
/// - `op`: 每次调用传入当前尝试序号（1-based）
///
/// # 返回
/// 最终结果以及实际调用次数
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> (Result<T, TaskError>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.kind.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "第 {}/{} 次尝试失败 ({})，{:?} 后重试",
                    attempt, max_attempts, e.kind, delay
                );
                sleep(delay).await;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
