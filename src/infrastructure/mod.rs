//! 基础设施层（Infrastructure Layer）
//!
//! ## 职责
//!
//! 持有进程内唯一的持久化资源，只暴露能力：
//!
//! - `CsvLog` - 追加式结果日志，续跑的唯一依据
//! - `ContentStore` - 按 URL 摘要组织的快照缓存目录

pub mod content_store;
pub mod csv_log;

pub use content_store::ContentStore;
pub use csv_log::{latest_by_id, read_records, CsvLog};
