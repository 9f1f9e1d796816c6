//! 快照任务
//!
//! 每个 URL 一个条目（身份就是 URL 本身），同一 URL 出现在多行时只抓一次。

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ResultFields, TaskError};
use crate::services::{SnapshotInfo, SnapshotService};
use crate::workflow::Task;

/// 快照条目载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPayload {
    pub url: String,
    /// 来源单元格，如 `Sheet1!D4`
    pub source: String,
}

/// 快照任务
pub struct SnapshotTask {
    service: Arc<SnapshotService>,
}

impl SnapshotTask {
    pub fn new(service: Arc<SnapshotService>) -> Self {
        Self { service }
    }

    fn fields(payload: &SnapshotPayload, info: &SnapshotInfo) -> ResultFields {
        let mut fields = ResultFields::new();
        fields.insert("source".to_string(), payload.source.clone());
        fields.insert("hash".to_string(), info.hash.clone());
        fields.insert("dom_size".to_string(), info.dom_size.to_string());
        fields.insert("mhtml_size".to_string(), info.mhtml_size.to_string());
        fields.insert("cached".to_string(), info.cached.to_string());
        fields
    }
}

/// 只接受 http / https
pub fn is_fetchable_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    let has_scheme = lower.starts_with("http://") || lower.starts_with("https://");
    has_scheme && lower.len() > "https://".len()
}

#[async_trait]
impl Task for SnapshotTask {
    type Payload = SnapshotPayload;

    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn result_columns(&self) -> Vec<String> {
        ["source", "hash", "dom_size", "mhtml_size", "cached"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn validate(&self, payload: &SnapshotPayload) -> Result<(), TaskError> {
        if !is_fetchable_url(&payload.url) {
            return Err(TaskError::invalid_input(format!(
                "不是有效的网页地址: '{}'",
                payload.url
            )));
        }
        Ok(())
    }

    fn cached(&self, payload: &SnapshotPayload) -> Option<ResultFields> {
        self.service
            .cached_info(&payload.url)
            .map(|info| Self::fields(payload, &info))
    }

    async fn execute(&self, payload: &SnapshotPayload) -> Result<ResultFields, TaskError> {
        let info = self.service.capture(&payload.url).await?;
        Ok(Self::fields(payload, &info))
    }
}
