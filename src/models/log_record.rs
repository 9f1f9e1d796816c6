//! 日志记录
//!
//! 每个尝试过的条目对应日志中的一行。记录一旦追加就不再修改；
//! 更正只能通过追加同一身份的新记录完成（后写入者为准）。

use std::fmt::Display;

use chrono::Local;

use crate::models::outcome::{ErrorKind, OutcomeStatus, ResultFields, TaskOutcome};
use crate::models::work_item::ItemId;
use crate::utils::logging::truncate_text;

/// 固定的前置列，任务结果列追加在其后
pub const BASE_COLUMNS: [&str; 7] = [
    "id",
    "timestamp",
    "status",
    "attempts",
    "duration_ms",
    "error_type",
    "error_message",
];

/// 写入日志的错误信息最大长度
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// 记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Success,
    Failure,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failure => "failure",
        }
    }

    /// 兼容旧脚本写下的 `failed`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "success" => Some(RecordStatus::Success),
            "failure" | "failed" => Some(RecordStatus::Failure),
            _ => None,
        }
    }
}

impl Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条日志记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub id: ItemId,
    /// RFC 3339，本地时区
    pub timestamp: String,
    pub status: RecordStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error_type: String,
    pub error_message: String,
    pub fields: ResultFields,
}

impl LogRecord {
    /// 由任务结果生成记录，时间戳取当前时间
    pub fn from_outcome(id: ItemId, outcome: &TaskOutcome) -> Self {
        let (status, error_type, error_message, fields) = match &outcome.status {
            OutcomeStatus::Success { fields, .. } => (
                RecordStatus::Success,
                String::new(),
                String::new(),
                fields.clone(),
            ),
            OutcomeStatus::Failure { kind, message } => (
                RecordStatus::Failure,
                kind.as_str().to_string(),
                truncate_text(message, MAX_ERROR_MESSAGE_CHARS),
                ResultFields::new(),
            ),
        };

        Self {
            id,
            timestamp: Local::now().to_rfc3339(),
            status,
            attempts: outcome.attempts,
            duration_ms: outcome.duration.as_millis() as u64,
            error_type,
            error_message,
            fields,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.error_type.is_empty() {
            None
        } else {
            Some(ErrorKind::parse(&self.error_type))
        }
    }

    /// 输入无效的记录：续跑时视为已完成
    pub fn is_degenerate(&self) -> bool {
        self.status == RecordStatus::Failure && self.error_kind() == Some(ErrorKind::InvalidInput)
    }

    /// 续跑时是否可以跳过
    pub fn counts_as_done(&self) -> bool {
        self.is_success() || self.is_degenerate()
    }

    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// 按列顺序展开成一行
    pub fn to_row(&self, result_columns: &[String]) -> Vec<String> {
        let mut row = Vec::with_capacity(BASE_COLUMNS.len() + result_columns.len());
        row.push(self.id.to_string());
        row.push(self.timestamp.clone());
        row.push(self.status.as_str().to_string());
        row.push(self.attempts.to_string());
        row.push(self.duration_ms.to_string());
        row.push(self.error_type.clone());
        row.push(self.error_message.clone());
        for column in result_columns {
            row.push(self.field(column).to_string());
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::outcome::TaskError;
    use std::time::Duration;

    #[test]
    fn test_from_success_outcome() {
        let mut fields = ResultFields::new();
        fields.insert("url1".to_string(), "https://a.example".to_string());
        let outcome = TaskOutcome::success(fields, 2, Duration::from_millis(1500));

        let record = LogRecord::from_outcome(ItemId::row("S", 3), &outcome);
        assert!(record.is_success());
        assert_eq!(record.attempts, 2);
        assert_eq!(record.duration_ms, 1500);
        assert_eq!(record.field("url1"), "https://a.example");
        assert_eq!(record.field("missing"), "");

        let row = record.to_row(&["url1".to_string(), "url2".to_string()]);
        assert_eq!(row.len(), BASE_COLUMNS.len() + 2);
        assert_eq!(row[0], "S!3");
        assert_eq!(row[2], "success");
        assert_eq!(row[7], "https://a.example");
        assert_eq!(row[8], "");
    }

    #[test]
    fn test_failure_message_is_truncated() {
        let long = "x".repeat(500);
        let outcome = TaskOutcome::failure(TaskError::unknown(long), 1, Duration::ZERO);
        let record = LogRecord::from_outcome(ItemId::new("a"), &outcome);
        assert_eq!(record.error_type, "unknown");
        assert!(record.error_message.chars().count() <= MAX_ERROR_MESSAGE_CHARS + 3);
    }

    #[test]
    fn test_degenerate_counts_as_done() {
        let outcome = TaskOutcome::failure(TaskError::invalid_input("空"), 0, Duration::ZERO);
        let record = LogRecord::from_outcome(ItemId::new("a"), &outcome);
        assert!(record.is_degenerate());
        assert!(record.counts_as_done());

        let outcome = TaskOutcome::failure(TaskError::timeout("慢"), 2, Duration::ZERO);
        let record = LogRecord::from_outcome(ItemId::new("a"), &outcome);
        assert!(!record.counts_as_done());
    }

    #[test]
    fn test_status_parse_accepts_legacy_value() {
        assert_eq!(RecordStatus::parse("failed"), Some(RecordStatus::Failure));
        assert_eq!(RecordStatus::parse("success"), Some(RecordStatus::Success));
        assert_eq!(RecordStatus::parse("pending"), None);
    }
}
