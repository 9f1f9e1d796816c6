//! 运行上下文
//!
//! 一次运行中所有 worker 共享的状态都在这里显式传递，不使用全局变量。
//! 三把锁互相独立：日志写入、统计计数、幂等缓存。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::infrastructure::CsvLog;
use crate::models::{LogRecord, ResultFields, TaskOutcome};
use crate::orchestrator::stats::RunStatistics;
use crate::utils::RetryPolicy;

/// 幂等缓存：规范化输入 → 成功结果
///
/// 以日志中已完成条目的成功记录为种子，运行中每次成功后即时更新。
/// 被完成集合判为未完成的条目（例如子步骤缺失）不进入种子，否则重新排队
/// 后会直接命中缓存，缺失的子步骤永远补不上。
#[derive(Debug, Default)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, ResultFields>>,
}

impl IdempotencyCache {
    /// 从日志记录中取出指定列作为 key 构建缓存
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a LogRecord>,
        key_column: Option<&str>,
    ) -> Self {
        let mut entries = HashMap::new();
        if let Some(column) = key_column {
            for record in records.into_iter().filter(|r| r.is_success()) {
                let key = record.field(column);
                if !key.is_empty() {
                    entries.insert(key.to_string(), record.fields.clone());
                }
            }
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<ResultFields> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: String, fields: ResultFields) {
        self.lock().insert(key, fields);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ResultFields>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 运行上下文
#[derive(Debug)]
pub struct RunContext {
    pub log: Arc<CsvLog>,
    pub cache: IdempotencyCache,
    pub retry: RetryPolicy,
    /// 单次调用超时
    pub call_timeout: Duration,
    stats: Mutex<RunStatistics>,
}

impl RunContext {
    pub fn new(
        log: Arc<CsvLog>,
        cache: IdempotencyCache,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            log,
            cache,
            retry,
            call_timeout,
            stats: Mutex::new(RunStatistics::default()),
        }
    }

    /// 运行开始前设置总数
    pub fn begin(&self, total: usize, scheduled: usize, skipped: usize) {
        *self.lock_stats() = RunStatistics::new(total, scheduled, skipped);
    }

    /// 记录一个条目结果并输出进度行
    pub fn record(&self, outcome: &TaskOutcome) -> RunStatistics {
        let snapshot = {
            let mut stats = self.lock_stats();
            stats.record(outcome);
            stats.clone()
        };
        info!("{}", snapshot.progress_line());
        snapshot
    }

    pub fn stats(&self) -> RunStatistics {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, RunStatistics> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemId, TaskError};

    fn record(id: &str, keywords: &str, ok: bool) -> LogRecord {
        let mut fields = ResultFields::new();
        fields.insert("keywords".to_string(), keywords.to_string());
        let outcome = if ok {
            TaskOutcome::success(fields, 1, Duration::ZERO)
        } else {
            TaskOutcome::failure(TaskError::timeout("t"), 1, Duration::ZERO)
        };
        LogRecord::from_outcome(ItemId::new(id), &outcome)
    }

    #[test]
    fn test_cache_seeded_from_successes_only() {
        let records = vec![record("a", "rust", true), record("b", "go", false)];
        let cache = IdempotencyCache::from_records(&records, Some("keywords"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("rust").is_some());
        assert!(cache.get("go").is_none());

        let cache = IdempotencyCache::from_records(&records, None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_updates_live() {
        let cache = IdempotencyCache::default();
        cache.insert("q".to_string(), ResultFields::new());
        assert!(cache.get("q").is_some());
    }
}
