//! LLM 服务 - 业务能力层
//!
//! 只负责"调用一次大模型并解析 JSON 回答"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）
//!
//! 代理通过环境变量 `HTTPS_PROXY` / `HTTP_PROXY` 生效。

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::models::{ErrorKind, TaskError};

/// token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// 一次调用的回答
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API
/// - 将 SDK 错误归类为错误类别
/// - 不关心重试与日志落盘
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &LlmConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);
        if let Some(base) = &config.api_base {
            openai_config = openai_config.with_api_base(base);
        }

        Self {
            client: Client::with_config(openai_config),
            model_name: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// LLM 的回答与 token 用量
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<LlmReply, TaskError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.chars().count());

        let build_error = |e: async_openai::error::OpenAIError| {
            TaskError::new(ErrorKind::ConfigError, format!("构建请求失败: {}", e))
        };

        let mut messages = Vec::new();
        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(build_error)?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(build_error)?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(build_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            TaskError::from_message(format!("LLM API 调用失败: {}", e))
        })?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| TaskError::new(ErrorKind::ValidationError, "LLM 返回内容为空"))?;

        debug!(
            "LLM API 调用成功，token: 输入 {} / 输出 {} / 总计 {}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );

        Ok(LlmReply {
            content: content.trim().to_string(),
            usage,
        })
    }
}

/// 从回答文本中提取 JSON 对象数组
///
/// 依次尝试：整段解析、```json 代码块、裸数组、单个对象。
/// 单个对象会被包装成只有一项的数组。
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    if let Some(items) = as_array(text) {
        return Some(items);
    }

    let patterns = [
        r"```(?:json)?\s*([\s\S]*?)```",
        r"(\[\s*\{[\s\S]*\}\s*\])",
        r#"(\{\s*"[\s\S]*\})"#,
    ];
    for pattern in patterns {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        for captures in re.captures_iter(text) {
            if let Some(items) = captures.get(1).and_then(|m| as_array(m.as_str())) {
                return Some(items);
            }
        }
    }
    None
}

fn as_array(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text.trim()).ok()? {
        Value::Array(items) => Some(items),
        obj @ Value::Object(_) => Some(vec![obj]),
        _ => None,
    }
}

/// 保留所有必需字段都非空的对象
///
/// # 返回
/// (有效项, 无效项数量)
pub fn retain_valid_items(
    items: Vec<Value>,
    required: &[&str],
) -> (Vec<Map<String, Value>>, usize) {
    let total = items.len();
    let valid: Vec<_> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) if required.iter().all(|f| is_filled(map.get(*f))) => Some(map),
            _ => None,
        })
        .collect();
    let invalid = total - valid.len();
    (valid, invalid)
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}
