/// 日志工具模块
///
/// 提供 tracing 初始化以及运行横幅、统计输出的辅助函数
use std::path::Path;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::orchestrator::RunStatistics;

/// 默认日志级别
const DEFAULT_FILTER: &str = "sheet_harvest=info";
const VERBOSE_FILTER: &str = "sheet_harvest=debug";

/// 初始化 tracing
///
/// 设置了 `RUST_LOG` 时以环境变量为准，否则按 `verbose` 选择默认级别。
/// 重复调用不会报错（测试中多次初始化）。
pub fn init(verbose: bool) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `command`: 子命令名
/// - `concurrency`: 最大并发数
/// - `log_path`: 结果日志路径
pub fn log_startup(command: &str, concurrency: usize, log_path: &Path) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - {}", command);
    info!("📊 最大并发数: {}", concurrency);
    info!("📝 结果日志: {}", log_path.display());
    info!("{}", "=".repeat(60));
}

/// 记录待处理条目信息
///
/// # 参数
/// - `total`: 枚举出的条目数
/// - `pending`: 过滤已完成后剩余的条目数
pub fn log_items_loaded(total: usize, pending: usize) {
    info!("✓ 共 {} 个条目，{} 个已完成", total, total - pending);
    info!("📋 本次待处理: {}", pending);
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 运行统计
/// - `log_path`: 结果日志路径
pub fn print_final_stats(stats: &RunStatistics, log_path: &Path) {
    info!("{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📦 条目总数: {}", stats.total);
    info!("⏭️ 跳过: {}", stats.skipped);
    info!("✅ 成功: {}/{}", stats.succeeded, stats.scheduled);
    if stats.cached > 0 {
        info!("💾 命中缓存: {}", stats.cached);
    }
    info!("❌ 失败: {}", stats.failed);
    info!("{}", "=".repeat(60));
    info!("日志已保存至: {}", log_path.display());
    if !stats.is_clean() {
        warn!("⚠️ 部分条目失败，重新运行同一命令即可只重试失败的条目");
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
