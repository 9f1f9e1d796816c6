//! 搜索服务 - 业务能力层
//!
//! 只负责"调用 ScrapingBee Google Search 一次"，不关心重试和日志。
//! HTTP 层面的失败在这里被归类成 [`ErrorKind`]，供上层决定是否重试。

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ScrapingBeeConfig;
use crate::models::{ErrorKind, TaskError};
use crate::utils::logging::truncate_text;

/// Google 搜索的单条自然结果（只解析用到的字段，原始 JSON 另行保留）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganicResult {
    pub url: String,
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Value,
}

/// 搜索服务
///
/// 职责：
/// - 组装 ScrapingBee 请求参数
/// - 将 HTTP 状态码 / reqwest 错误映射为错误类别
/// - 解析 `organic_results`
pub struct SearchService {
    client: Client,
    endpoint: String,
    api_key: String,
    language: String,
}

impl SearchService {
    /// 创建搜索服务
    ///
    /// # 参数
    /// - `config`: ScrapingBee 配置（api_key、endpoint）
    /// - `language`: 搜索语言，如 `zh-cn`
    /// - `timeout`: 单次请求超时
    /// - `proxy`: 可选的 HTTP(S) 代理
    pub fn new(
        config: &ScrapingBeeConfig,
        language: &str,
        timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Self, TaskError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                TaskError::new(ErrorKind::ConfigError, format!("代理地址无效: {}", e))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| TaskError::new(ErrorKind::ConfigError, e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            language: language.to_string(),
        })
    }

    /// 执行一次搜索
    ///
    /// # 返回
    /// 自然结果列表（可能为空）
    pub async fn search(&self, keywords: &str) -> Result<Vec<OrganicResult>, TaskError> {
        debug!("ScrapingBee 搜索: {}", keywords);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("search", keywords),
                ("language", self.language.as_str()),
            ])
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaskError::new(
                classify_status(status),
                format!("HTTP {}: {}", status.as_u16(), truncate_text(&body, 200)),
            ));
        }

        let body = response.text().await.map_err(classify_reqwest_error)?;
        parse_organic_results(&body)
    }
}

/// 解析响应体中的 `organic_results`
pub fn parse_organic_results(body: &str) -> Result<Vec<OrganicResult>, TaskError> {
    let parsed: SearchResponse = serde_json::from_str(body).map_err(|e| {
        TaskError::new(ErrorKind::JsonParseError, format!("响应不是合法 JSON: {}", e))
    })?;

    let items = match parsed.organic_results {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => {
            return Err(TaskError::new(
                ErrorKind::ValidationError,
                "organic_results 不是列表",
            ))
        }
    };

    Ok(items
        .into_iter()
        .map(|raw| OrganicResult {
            url: raw
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            raw,
        })
        .collect())
}

/// HTTP 状态码分类
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        429 => ErrorKind::RateLimit,
        401 | 403 => ErrorKind::AuthError,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::NetworkError,
        400..=499 => ErrorKind::ValidationError,
        _ => ErrorKind::Unknown,
    }
}

/// reqwest 错误分类
pub fn classify_reqwest_error(error: reqwest::Error) -> TaskError {
    let kind = if error.is_timeout() {
        ErrorKind::Timeout
    } else if error.is_connect() || error.is_request() {
        ErrorKind::NetworkError
    } else if error.is_decode() {
        ErrorKind::JsonParseError
    } else if let Some(status) = error.status() {
        classify_status(status)
    } else {
        ErrorKind::classify_message(&error.to_string())
    };
    TaskError::new(kind, format!("请求异常: {}", error))
}
