//! 浏览器引导
//!
//! 快照任务需要一个浏览器实例：默认启动无头浏览器，
//! 配置了调试端口时改为连接到已有浏览器。

pub mod connection;
pub mod headless;

use anyhow::Result;
use chromiumoxide::Browser;

use crate::config::SnapshotConfig;

pub use connection::connect_to_browser;
pub use headless::launch_headless_browser;

/// 按配置获取浏览器
pub async fn open_browser(config: &SnapshotConfig, proxy: Option<&str>) -> Result<Browser> {
    match config.debug_port {
        Some(port) => connect_to_browser(port).await,
        None => launch_headless_browser(config, proxy).await,
    }
}
