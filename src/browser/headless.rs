use std::path::Path;

use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::SnapshotConfig;

/// 启动无头浏览器
///
/// # 参数
/// - `config`: 快照配置（可执行文件路径、窗口大小）
/// - `proxy`: 可选代理，传给浏览器的 `--proxy-server`
pub async fn launch_headless_browser(
    config: &SnapshotConfig,
    proxy: Option<&str>,
) -> Result<Browser> {
    info!("🚀 启动无头浏览器...");

    let mut args = vec![
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];
    if let Some(proxy) = proxy {
        debug!("浏览器代理: {}", proxy);
        args.push(format!("--proxy-server={}", proxy));
    }

    let mut builder = BrowserConfig::builder()
        .new_headless_mode()
        .window_size(config.window_width, config.window_height)
        .args(args);
    if let Some(executable) = &config.chrome_executable {
        debug!("浏览器可执行文件: {}", executable);
        builder = builder.chrome_executable(Path::new(executable));
    }

    let browser_config = builder.build().map_err(|e| {
        error!("配置无头浏览器失败: {}", e);
        anyhow::anyhow!("配置无头浏览器失败: {}", e)
    })?;

    let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        anyhow::anyhow!("启动无头浏览器失败: {}", e)
    })?;
    debug!("无头浏览器启动成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    info!("✅ 无头浏览器已就绪");
    Ok(browser)
}
