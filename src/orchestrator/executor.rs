//! 单条目执行器 - 编排层
//!
//! ## 职责
//!
//! 对一个条目走完整的状态机，并保证恰好产生一条日志记录：
//!
//! ```text
//! PENDING → 幂等缓存命中 / 本地缓存命中 → DONE
//!         → 输入无效 → DONE (invalid_input)
//!         → RUNNING → 成功 → DONE
//!                   → 瞬时错误 → 退避后重试 (最多 retry_times 次)
//!                   → 永久错误 / 重试耗尽 → FAILED
//! ```
//!
//! 每次调用都有独立超时；任务内部 panic 在这里被捕获并记为 `unknown`。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::error::AppResult;
use crate::models::{LogRecord, TaskError, TaskOutcome, WorkItem};
use crate::orchestrator::context::RunContext;
use crate::utils::logging::truncate_text;
use crate::utils::with_retry;
use crate::workflow::Task;

/// 执行一个条目，得到结果（不写日志）
pub async fn execute_item<T: Task>(
    task: &T,
    ctx: &RunContext,
    item: &WorkItem<T::Payload>,
) -> TaskOutcome {
    let started = Instant::now();
    let payload = &item.payload;

    let key = task.idempotency_key(payload);
    if let Some(fields) = key.as_deref().and_then(|k| ctx.cache.get(k)) {
        debug!("[{}] 命中幂等缓存", item.id);
        return TaskOutcome::cached(fields);
    }

    if let Some(fields) = task.cached(payload) {
        debug!("[{}] 命中本地缓存", item.id);
        return TaskOutcome::cached(fields);
    }

    if let Err(e) = task.validate(payload) {
        warn!("[{}] ⚠️ 输入无效: {}", item.id, e.message);
        return TaskOutcome::failure(e, 0, started.elapsed());
    }

    let timeout = ctx.call_timeout;
    let (result, attempts) = with_retry(&ctx.retry, |attempt| async move {
        debug!("[{}] 第 {} 次调用", item.id, attempt);
        let call = AssertUnwindSafe(task.execute(payload)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Err(_) => Err(TaskError::timeout(format!("调用超过 {:?} 未返回", timeout))),
            Ok(Err(panic)) => Err(TaskError::unknown(format!(
                "任务 panic: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(result)) => result,
        }
    })
    .await;

    let duration = started.elapsed();
    match result {
        Ok(fields) => {
            if let Some(key) = key {
                ctx.cache.insert(key, fields.clone());
            }
            TaskOutcome::success(fields, attempts, duration)
        }
        Err(e) => {
            warn!(
                "[{}] ❌ 失败 ({}，共 {} 次): {}",
                item.id,
                e.kind,
                attempts,
                truncate_text(&e.message, 120)
            );
            TaskOutcome::failure(e, attempts, duration)
        }
    }
}

/// 执行一个条目，追加日志并更新统计
///
/// 日志写入失败时返回错误；条目本身的失败只是一条失败记录。
pub async fn process_item<T: Task>(
    task: &T,
    ctx: &RunContext,
    item: WorkItem<T::Payload>,
) -> AppResult<TaskOutcome> {
    let outcome = execute_item(task, ctx, &item).await;
    let record = LogRecord::from_outcome(item.id, &outcome);

    if let Err(e) = ctx.log.append(&record) {
        error!("[{}] 写入日志失败: {}", record.id, e);
        return Err(e);
    }
    ctx.record(&outcome);
    Ok(outcome)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
