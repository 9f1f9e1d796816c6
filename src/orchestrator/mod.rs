//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量调度和续跑，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_runner` - 批量运行器
//! - 扫描日志，过滤已完成条目
//! - 控制并发数量（Semaphore）
//! - 等待所有条目结束，输出全局统计
//!
//! ### `executor` - 单条目执行器
//! - 幂等缓存 / 本地缓存检查
//! - 输入校验、超时、重试、panic 捕获
//! - 追加一条日志记录
//!
//! ### `completion` / `context` / `stats`
//! - 完成集合与判定策略
//! - 运行上下文（日志、幂等缓存、统计，各自加锁）
//! - 运行统计与进度行
//!
//! ## 层次关系
//!
//! ```text
//! batch_runner (处理 Vec<WorkItem>)
//!     ↓
//! executor (处理单个 WorkItem)
//!     ↓
//! workflow::Task (search / snapshot / scan)
//!     ↓
//! services (能力层：ScrapingBee / 浏览器快照 / LLM)
//!     ↓
//! infrastructure (基础设施：CsvLog / ContentStore)
//! ```

pub mod batch_runner;
pub mod completion;
pub mod context;
pub mod executor;
pub mod stats;

// 重新导出主要类型
pub use batch_runner::{BatchRunner, RunnerOptions};
pub use completion::{CompletionPolicy, CompletionSet};
pub use context::{IdempotencyCache, RunContext};
pub use executor::{execute_item, process_item};
pub use stats::RunStatistics;
