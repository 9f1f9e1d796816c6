//! # Sheet Harvest
//!
//! 表格驱动的可续跑批量采集工具
//!
//! 从 Excel 表格的行范围读出条目，跳过结果日志中已完成的条目，
//! 以受限并发执行剩余条目（瞬时错误按退避重试），每完成一个条目就向
//! CSV 日志追加并落盘一行。进程中断后再次运行即可从断点继续。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `CsvLog` - 追加式结果日志，续跑的唯一依据
//! - `ContentStore` - 按 URL 摘要组织的快照目录
//!
//! ### ② 业务能力层（Services）
//! - `SearchService` - ScrapingBee Google 搜索
//! - `SnapshotService` - 浏览器网页快照
//! - `LlmService` - 大模型调用与 JSON 解析
//!
//! ### ③ 流程层（Workflow）
//! - `Task` - 工作池唯一认识的抽象
//! - `SearchTask` / `SnapshotTask` / `ScanTask`
//!
//! ### ④ 编排层（Orchestration）
//! - `BatchRunner` - 续跑过滤、并发控制、统计
//! - `executor` - 单条目状态机（缓存、校验、重试、超时）
//!
//! ## 模块结构

pub mod app;
pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::CsvLog;
pub use models::{ErrorKind, ItemId, LogRecord, RowRange, TaskError, TaskOutcome, WorkItem};
pub use orchestrator::{BatchRunner, CompletionPolicy, RunStatistics, RunnerOptions};
pub use workflow::Task;
