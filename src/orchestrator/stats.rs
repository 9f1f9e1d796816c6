//! 运行统计

use crate::models::{OutcomeStatus, TaskOutcome};

/// 运行统计
///
/// 由 `RunContext` 中的互斥锁保护，只在条目完成后短暂加锁更新。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatistics {
    /// 枚举出的条目数
    pub total: usize,
    /// 过滤后实际提交给工作池的条目数
    pub scheduled: usize,
    /// 已完成（不论成败）
    pub finished: usize,
    pub succeeded: usize,
    /// 成功中命中缓存、未调用任务的
    pub cached: usize,
    pub failed: usize,
    /// 日志中已完成而被跳过的，加上输入无效的
    pub skipped: usize,
}

impl RunStatistics {
    pub fn new(total: usize, scheduled: usize, skipped: usize) -> Self {
        Self {
            total,
            scheduled,
            skipped,
            ..Default::default()
        }
    }

    /// 记录一个条目的结果
    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.finished += 1;
        if let OutcomeStatus::Success { cached, .. } = &outcome.status {
            self.succeeded += 1;
            if *cached {
                self.cached += 1;
            }
        } else if outcome.is_degenerate() {
            self.skipped += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn percent(&self) -> f64 {
        if self.scheduled == 0 {
            100.0
        } else {
            self.finished as f64 * 100.0 / self.scheduled as f64
        }
    }

    /// 进度行
    pub fn progress_line(&self) -> String {
        format!(
            "[{}/{}] ({:.1}%) | 成功: {} | 失败: {}",
            self.finished,
            self.scheduled,
            self.percent(),
            self.succeeded,
            self.failed
        )
    }

    /// 没有失败的条目
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultFields, TaskError};
    use std::time::Duration;

    #[test]
    fn test_record_and_progress() {
        let mut stats = RunStatistics::new(10, 4, 6);
        stats.record(&TaskOutcome::success(ResultFields::new(), 1, Duration::ZERO));
        stats.record(&TaskOutcome::failure(
            TaskError::timeout("t"),
            2,
            Duration::ZERO,
        ));
        stats.record(&TaskOutcome::failure(
            TaskError::invalid_input("空"),
            0,
            Duration::ZERO,
        ));

        stats.record(&TaskOutcome::cached(ResultFields::new()));

        assert_eq!(stats.finished, 4);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 7);
        assert_eq!(stats.progress_line(), "[4/4] (100.0%) | 成功: 2 | 失败: 1");
        assert!(!stats.is_clean());
    }

    #[test]
    fn test_empty_run_is_complete() {
        let stats = RunStatistics::new(5, 0, 5);
        assert_eq!(stats.percent(), 100.0);
        assert!(stats.is_clean());
    }
}
