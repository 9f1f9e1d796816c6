//! 批量运行器 - 编排层
//!
//! ## 职责
//!
//! 1. **续跑过滤**：扫描结果日志，去掉已完成的条目；幂等缓存只取已完成条目的结果
//! 2. **并发控制**：使用 Semaphore 限制同时执行的条目数
//! 3. **向下委托**：每个条目交给 `executor::process_item`
//! 4. **完整收尾**：等待所有已提交的条目结束后才返回统计
//!
//! 条目之间的完成顺序不做保证；日志行的追加各自原子。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::CsvLog;
use crate::models::{ItemId, LogRecord, TaskError, TaskOutcome, WorkItem};
use crate::orchestrator::completion::CompletionSet;
use crate::orchestrator::context::{IdempotencyCache, RunContext};
use crate::orchestrator::executor::{panic_message, process_item};
use crate::orchestrator::stats::RunStatistics;
use crate::utils::logging::{log_items_loaded, print_final_stats};
use crate::utils::RetryPolicy;
use crate::workflow::Task;

/// 运行参数
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
}

/// 批量运行器
pub struct BatchRunner {
    log: Arc<CsvLog>,
    options: RunnerOptions,
    /// 调用方额外提供的完成集合（覆盖任务默认的判定）
    completion: Option<CompletionSet>,
}

impl BatchRunner {
    pub fn new(log: Arc<CsvLog>, options: RunnerOptions) -> Self {
        Self {
            log,
            options,
            completion: None,
        }
    }

    /// 使用自定义的完成集合
    pub fn with_completion(mut self, completion: CompletionSet) -> Self {
        self.completion = Some(completion);
        self
    }

    /// 执行一批条目
    ///
    /// # 参数
    /// - `task`: 任务实现
    /// - `items`: 已按身份去重的条目
    ///
    /// # 返回
    /// 全部条目结束后的统计；只有日志写入失败会返回错误（在等待所有条目结束之后）
    pub async fn run<T: Task>(
        &self,
        task: Arc<T>,
        items: Vec<WorkItem<T::Payload>>,
    ) -> AppResult<RunStatistics> {
        let records = self.log.scan()?;
        let completion = match &self.completion {
            Some(set) => set.clone(),
            None => CompletionSet::from_records(&records, task.completion_policy()),
        };
        let cache = IdempotencyCache::from_records(
            records.iter().filter(|r| completion.contains(&r.id)),
            task.idempotency_column(),
        );
        drop(records);

        let total = items.len();
        let (pending, skipped) = completion.filter(items);
        log_items_loaded(total, pending.len());

        let ctx = Arc::new(RunContext::new(
            self.log.clone(),
            cache,
            self.options.retry,
            self.options.call_timeout,
        ));
        ctx.begin(total, pending.len(), skipped);

        if pending.is_empty() {
            info!("✓ 没有需要处理的条目");
            let stats = ctx.stats();
            print_final_stats(&stats, self.log.path());
            return Ok(stats);
        }

        info!(
            "🚀 开始执行 {}：{} 个条目，并发 {}",
            task.name(),
            pending.len(),
            self.options.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(pending.len());

        for item in pending {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::config(format!("并发控制异常: {}", e)))?;
            let task = task.clone();
            let ctx = ctx.clone();
            let id = item.id.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                process_item(task.as_ref(), &ctx, item).await
            });
            handles.push((id, handle));
        }

        // 等待全部结束
        let mut sink_error = None;
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    sink_error.get_or_insert(e);
                }
                Err(join_error) => {
                    // 执行器内部已捕获任务 panic，到这里说明执行器本身出了问题
                    error!("[{}] worker 异常退出: {}", id, join_error);
                    let message = if join_error.is_panic() {
                        panic_message(join_error.into_panic().as_ref())
                    } else {
                        join_error.to_string()
                    };
                    let outcome =
                        TaskOutcome::failure(TaskError::unknown(message), 0, Duration::ZERO);
                    if let Err(e) = self.append_fallback(id, &outcome) {
                        sink_error.get_or_insert(e);
                    }
                    ctx.record(&outcome);
                }
            }
        }

        let stats = ctx.stats();
        print_final_stats(&stats, self.log.path());

        match sink_error {
            Some(e) => {
                warn!("⚠️ 部分结果未能写入日志");
                Err(e)
            }
            None => Ok(stats),
        }
    }

    fn append_fallback(&self, id: ItemId, outcome: &TaskOutcome) -> AppResult<()> {
        self.log.append(&LogRecord::from_outcome(id, outcome))
    }
}
