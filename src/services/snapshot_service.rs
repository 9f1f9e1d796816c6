//! 网页快照服务 - 业务能力层
//!
//! 打开一个 URL，保存渲染后的 DOM（`dom.html`）和 MHTML 归档（`page.mhtml`）
//! 到内容寻址目录。浏览器由调用方创建并共享，每次快照使用独立的标签页。

use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::page::{CaptureSnapshotFormat, CaptureSnapshotParams};
use chromiumoxide::{Browser, Page};
use tracing::{debug, warn};

use crate::infrastructure::ContentStore;
use crate::models::{ErrorKind, TaskError};

pub const DOM_FILE: &str = "dom.html";
pub const MHTML_FILE: &str = "page.mhtml";
pub const SNAPSHOT_FILES: [&str; 2] = [DOM_FILE, MHTML_FILE];

/// 单次快照的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub hash: String,
    pub dom_size: u64,
    pub mhtml_size: u64,
    /// 文件已存在，未打开浏览器
    pub cached: bool,
}

/// 快照服务
pub struct SnapshotService {
    browser: Arc<Browser>,
    store: ContentStore,
}

impl SnapshotService {
    pub fn new(browser: Arc<Browser>, store: ContentStore) -> Self {
        Self { browser, store }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// 快照文件是否已齐全
    pub fn is_cached(&self, url: &str) -> bool {
        self.store.has_all(url, &SNAPSHOT_FILES)
    }

    /// 已缓存时直接返回文件信息
    pub fn cached_info(&self, url: &str) -> Option<SnapshotInfo> {
        self.is_cached(url).then(|| self.info(url, true))
    }

    /// 抓取快照；文件已齐全时跳过
    pub async fn capture(&self, url: &str) -> Result<SnapshotInfo, TaskError> {
        if let Some(info) = self.cached_info(url) {
            debug!("快照已存在，跳过: {}", url);
            return Ok(info);
        }

        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| TaskError::from_message(format!("打开页面失败: {}", e)))?;

        let captured = capture_page(&page).await;
        if let Err(e) = page.close().await {
            warn!("关闭标签页失败: {}", e);
        }
        let (dom, mhtml) = captured?;

        self.write(url, DOM_FILE, dom.as_bytes())?;
        self.write(url, MHTML_FILE, mhtml.as_bytes())?;

        Ok(self.info(url, false))
    }

    fn write(&self, url: &str, file: &str, bytes: &[u8]) -> Result<(), TaskError> {
        self.store
            .write(url, file, bytes)
            .map(|_| ())
            .map_err(|e| TaskError::unknown(format!("写入 {} 失败: {}", file, e)))
    }

    fn info(&self, url: &str, cached: bool) -> SnapshotInfo {
        SnapshotInfo {
            hash: ContentStore::hash(url),
            dom_size: self.store.file_size(url, DOM_FILE),
            mhtml_size: self.store.file_size(url, MHTML_FILE),
            cached,
        }
    }
}

async fn capture_page(page: &Page) -> Result<(String, String), TaskError> {
    let dom = page
        .content()
        .await
        .map_err(|e| TaskError::from_message(format!("读取 DOM 失败: {}", e)))?;
    if dom.trim().is_empty() {
        return Err(TaskError::new(ErrorKind::ValidationError, "页面 DOM 为空"));
    }

    let params = CaptureSnapshotParams::builder()
        .format(CaptureSnapshotFormat::Mhtml)
        .build();
    let mhtml = page
        .execute(params)
        .await
        .map_err(|e| TaskError::from_message(format!("生成 MHTML 失败: {}", e)))?
        .result
        .data;

    Ok((dom, mhtml))
}
