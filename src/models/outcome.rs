//! 任务结果与错误分类
//!
//! 所有任务都返回同一种带标签的结果 [`TaskOutcome`]，不管底层是 HTTP、
//! 浏览器还是 LLM 调用。

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;

/// 任务结果字段（按列名展开写入日志）
pub type ResultFields = BTreeMap<String, String>;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 缺少凭据 / 参数错误
    ConfigError,
    /// 条目本身为空或格式错误，记为"已完成但无结果"
    InvalidInput,
    RateLimit,
    Timeout,
    NetworkError,
    ValidationError,
    AuthError,
    JsonParseError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConfigError => "config_error",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::JsonParseError => "json_parse_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// 从日志中的字符串还原，未识别的一律视为 `Unknown`
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "config_error" => ErrorKind::ConfigError,
            "invalid_input" => ErrorKind::InvalidInput,
            "rate_limit" => ErrorKind::RateLimit,
            "timeout" => ErrorKind::Timeout,
            "network_error" => ErrorKind::NetworkError,
            "validation_error" => ErrorKind::ValidationError,
            "auth_error" => ErrorKind::AuthError,
            "json_parse_error" | "json_error" => ErrorKind::JsonParseError,
            _ => ErrorKind::Unknown,
        }
    }

    /// 频率限制、超时、网络错误值得重试
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::NetworkError
        )
    }

    /// 根据错误文本粗略分类
    ///
    /// 用于只能拿到错误字符串的场景（LLM SDK、浏览器协议错误）。
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["429", "rate limit", "rate_limit", "ratelimit", "too many requests"]) {
            ErrorKind::RateLimit
        } else if has(&["timeout", "timed out", "deadline"]) {
            ErrorKind::Timeout
        } else if has(&["connection", "network", "net::", "dns", "ns_error", "broken pipe"]) {
            ErrorKind::NetworkError
        } else if has(&["401", "403", "unauthorized", "forbidden", "invalid api key", "auth"]) {
            ErrorKind::AuthError
        } else {
            ErrorKind::Unknown
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次任务调用的失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// 按错误文本分类
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::classify_message(&message), message)
    }
}

/// 结果状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success {
        fields: ResultFields,
        /// 命中缓存，未发起外部调用
        cached: bool,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

/// 单个条目的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    /// 实际调用任务函数的次数（命中缓存为 0）
    pub attempts: u32,
    pub duration: Duration,
}

impl TaskOutcome {
    pub fn success(fields: ResultFields, attempts: u32, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::Success {
                fields,
                cached: false,
            },
            attempts,
            duration,
        }
    }

    pub fn cached(fields: ResultFields) -> Self {
        Self {
            status: OutcomeStatus::Success {
                fields,
                cached: true,
            },
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn failure(error: TaskError, attempts: u32, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::Failure {
                kind: error.kind,
                message: error.message,
            },
            attempts,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success { .. })
    }

    /// 输入无效：记录一次，不算失败
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Failure {
                kind: ErrorKind::InvalidInput,
                ..
            }
        )
    }
}
