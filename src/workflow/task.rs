//! 任务抽象
//!
//! 工作池只认识这个 trait：给定一个条目的载荷，返回成功字段或带分类的错误。
//! 具体做什么（HTTP 搜索、浏览器快照、LLM 调用）由实现决定。

use async_trait::async_trait;

use crate::models::{ResultFields, TaskError};
use crate::orchestrator::completion::CompletionPolicy;

/// 批量任务
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// 条目载荷
    type Payload: Send + Sync + 'static;

    /// 任务名（用于日志输出）
    fn name(&self) -> &'static str;

    /// 写入结果日志的列（不含固定的前置列）
    fn result_columns(&self) -> Vec<String>;

    /// 续跑时的完成判定策略
    fn completion_policy(&self) -> CompletionPolicy {
        CompletionPolicy::AnySuccess
    }

    /// 调用前校验输入；返回 `invalid_input` 的条目记录一次，不重试
    fn validate(&self, _payload: &Self::Payload) -> Result<(), TaskError> {
        Ok(())
    }

    /// 幂等 key：相同 key 的条目共享一次成功结果
    fn idempotency_key(&self, _payload: &Self::Payload) -> Option<String> {
        None
    }

    /// 日志中保存幂等 key 的列，用于启动时预热缓存
    fn idempotency_column(&self) -> Option<&'static str> {
        None
    }

    /// 本地已有结果（如快照文件齐全）时直接返回，不发起外部调用
    fn cached(&self, _payload: &Self::Payload) -> Option<ResultFields> {
        None
    }

    /// 执行一次
    async fn execute(&self, payload: &Self::Payload) -> Result<ResultFields, TaskError>;
}
