//! 搜索任务
//!
//! 一行表格 → 一次 Google 搜索，取前 N 个结果 URL；
//! 开启快照时再逐个抓取这些 URL，全部成功才算这一行成功。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::models::{ResultFields, TaskError};
use crate::services::{SearchService, SnapshotService};
use crate::utils::logging::truncate_text;
use crate::workflow::Task;

/// 搜索任务
pub struct SearchTask {
    service: SearchService,
    top_n: usize,
    snapshot: Option<Arc<SnapshotService>>,
}

impl SearchTask {
    pub fn new(service: SearchService, top_n: usize) -> Self {
        Self {
            service,
            top_n: top_n.max(1),
            snapshot: None,
        }
    }

    /// 搜索后对结果 URL 做快照
    pub fn with_snapshot(mut self, snapshot: Arc<SnapshotService>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// 结果 URL 所在的列名
    pub fn url_columns(top_n: usize) -> Vec<String> {
        (1..=top_n.max(1)).map(|i| format!("url{}", i)).collect()
    }

    /// 从日志记录中取出结果 URL（快照子步骤的 key）
    pub fn urls_of(record: &crate::models::LogRecord, top_n: usize) -> Vec<String> {
        Self::url_columns(top_n)
            .iter()
            .map(|c| record.field(c).to_string())
            .filter(|u| !u.is_empty())
            .collect()
    }
}

#[async_trait]
impl Task for SearchTask {
    type Payload = String;

    fn name(&self) -> &'static str {
        "search"
    }

    fn result_columns(&self) -> Vec<String> {
        let mut columns = vec!["keywords".to_string(), "result_count".to_string()];
        columns.extend(Self::url_columns(self.top_n));
        columns.push("results_json".to_string());
        if self.snapshot.is_some() {
            columns.push("snapshot_dirs".to_string());
        }
        columns
    }

    fn validate(&self, keywords: &String) -> Result<(), TaskError> {
        if keywords.trim().is_empty() {
            return Err(TaskError::invalid_input("搜索关键字为空"));
        }
        Ok(())
    }

    fn idempotency_key(&self, keywords: &String) -> Option<String> {
        Some(keywords.trim().to_string())
    }

    fn idempotency_column(&self) -> Option<&'static str> {
        Some("keywords")
    }

    async fn execute(&self, keywords: &String) -> Result<ResultFields, TaskError> {
        let results = self.service.search(keywords).await?;
        info!(
            "[搜索] ✓ {} 条结果 | 关键字: {}",
            results.len(),
            truncate_text(keywords, 60)
        );

        let urls: Vec<String> = results
            .iter()
            .map(|r| r.url.clone())
            .filter(|u| !u.is_empty())
            .take(self.top_n)
            .collect();

        let raw: Vec<Value> = results.into_iter().map(|r| r.raw).collect();
        let results_json = serde_json::to_string(&raw).unwrap_or_default();

        let mut fields = ResultFields::new();
        fields.insert("keywords".to_string(), keywords.trim().to_string());
        fields.insert("result_count".to_string(), raw.len().to_string());
        for (column, url) in Self::url_columns(self.top_n).into_iter().zip(&urls) {
            fields.insert(column, url.clone());
        }
        fields.insert("results_json".to_string(), results_json);

        if let Some(snapshot) = &self.snapshot {
            let mut dirs = Vec::with_capacity(urls.len());
            for url in &urls {
                let info = snapshot.capture(url).await.map_err(|e| {
                    TaskError::new(e.kind, format!("快照 {} 失败: {}", url, e.message))
                })?;
                debug!("[快照] ✓ {} → {}", url, info.hash);
                dirs.push(snapshot.store().dir_for(url).display().to_string());
            }
            fields.insert("snapshot_dirs".to_string(), dirs.join(";"));
        }

        Ok(fields)
    }
}
