//! 期刊主办单位扫描任务
//!
//! 一行 = 期刊名 + 最多两个网址。让大模型阅读网址，返回主办单位 JSON 数组，
//! 只保留字段齐全的结果项。

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{ErrorKind, ResultFields, TaskError};
use crate::services::llm_service::{extract_json_array, retain_valid_items};
use crate::services::LlmService;
use crate::workflow::Task;

/// 每个结果项必须非空的字段
pub const REQUIRED_FIELDS: [&str; 5] = ["期刊名称", "主办单位", "关键句子", "判断依据", "来源链接"];

const SYSTEM_PROMPT: &str = "你是一名严谨的学术期刊信息核查员，只依据给定网页中的原文作答。";

/// 扫描条目载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    pub journal_name: String,
    pub url1: String,
    pub url2: String,
}

impl ScanPayload {
    fn prompt(&self) -> String {
        let or_none = |s: &str| {
            if s.trim().is_empty() {
                "无".to_string()
            } else {
                s.trim().to_string()
            }
        };
        format!(
            "请阅读以下网页，找出期刊《{}》的主办单位。\n\
             网址1: {}\n网址2: {}\n\n\
             以 JSON 数组作答，每项包含字段：期刊名称、主办单位（忠实于原文）、\
             关键句子（网页中包含主办单位的完整句子）、判断依据、来源链接。",
            self.journal_name.trim(),
            or_none(&self.url1),
            or_none(&self.url2)
        )
    }
}

/// 扫描任务
pub struct ScanTask {
    llm: LlmService,
}

impl ScanTask {
    pub fn new(llm: LlmService) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Task for ScanTask {
    type Payload = ScanPayload;

    fn name(&self) -> &'static str {
        "scan"
    }

    fn result_columns(&self) -> Vec<String> {
        [
            "journal_name",
            "url1",
            "url2",
            "results_count",
            "prompt_tokens",
            "completion_tokens",
            "total_tokens",
            "results_json",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect()
    }

    fn validate(&self, payload: &ScanPayload) -> Result<(), TaskError> {
        if payload.url1.trim().is_empty() && payload.url2.trim().is_empty() {
            return Err(TaskError::invalid_input("两个 URL 均为空"));
        }
        if payload.journal_name.trim().is_empty() {
            return Err(TaskError::invalid_input("期刊名为空"));
        }
        Ok(())
    }

    async fn execute(&self, payload: &ScanPayload) -> Result<ResultFields, TaskError> {
        let reply = self
            .llm
            .send_to_llm(&payload.prompt(), Some(SYSTEM_PROMPT))
            .await?;

        let items = extract_json_array(&reply.content).ok_or_else(|| {
            TaskError::new(ErrorKind::JsonParseError, "无法从回答中提取 JSON")
        })?;

        let (valid, invalid) = retain_valid_items(items, &REQUIRED_FIELDS);
        if valid.is_empty() {
            return Err(TaskError::new(
                ErrorKind::ValidationError,
                "没有字段齐全的结果项",
            ));
        }
        if invalid > 0 {
            warn!(
                "[扫描] {}: 有效 {} 项，无效 {} 项",
                payload.journal_name, valid.len(), invalid
            );
        }
        info!(
            "[扫描] ✓ {} | {} 项结果 | token {}",
            payload.journal_name,
            valid.len(),
            reply.usage.total_tokens
        );

        let mut fields = ResultFields::new();
        fields.insert("journal_name".to_string(), payload.journal_name.trim().to_string());
        fields.insert("url1".to_string(), payload.url1.trim().to_string());
        fields.insert("url2".to_string(), payload.url2.trim().to_string());
        fields.insert("results_count".to_string(), valid.len().to_string());
        fields.insert("prompt_tokens".to_string(), reply.usage.prompt_tokens.to_string());
        fields.insert(
            "completion_tokens".to_string(),
            reply.usage.completion_tokens.to_string(),
        );
        fields.insert("total_tokens".to_string(), reply.usage.total_tokens.to_string());
        fields.insert(
            "results_json".to_string(),
            serde_json::to_string(&valid).unwrap_or_default(),
        );
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn task() -> ScanTask {
        ScanTask::new(LlmService::new(&LlmConfig {
            api_key: "test".to_string(),
            ..Default::default()
        }))
    }

    #[test]
    fn test_both_urls_empty_is_invalid_input() {
        let payload = ScanPayload {
            journal_name: "中国科学".to_string(),
            url1: " ".to_string(),
            url2: String::new(),
        };
        let err = task().validate(&payload).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn test_prompt_uses_placeholder_for_missing_url() {
        let payload = ScanPayload {
            journal_name: "中国科学".to_string(),
            url1: "https://a.example".to_string(),
            url2: String::new(),
        };
        assert!(task().validate(&payload).is_ok());
        let prompt = payload.prompt();
        assert!(prompt.contains("《中国科学》"));
        assert!(prompt.contains("网址2: 无"));
    }
}
