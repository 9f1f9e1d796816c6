//! 错误类型
//!
//! 只有"开跑之前"的失败（配置、输入文件、行范围、日志目录）会以 `AppError`
//! 的形式向上传播并终止进程；单个条目的失败是普通的值（见
//! [`crate::models::TaskError`]），永远不会让工作池中断。

use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（缺少凭据、非法参数）
    #[error("配置错误: {0}")]
    Config(String),

    /// 行范围无法解析，或起始行大于结束行
    #[error("行范围非法: '{spec}' ({reason})")]
    InvalidRangeSpec { spec: String, reason: String },

    /// 起始行超出数据源的最大行
    #[error("行范围越界: 起始行 {start} 大于最大行 {max_extent}")]
    RangeOutOfBounds { start: u32, max_extent: u32 },

    /// 输入文件不存在
    #[error("输入文件不存在: {}", .0.display())]
    InputNotFound(PathBuf),

    /// 表格读取失败
    #[error("读取表格失败 ({path}): {message}")]
    Sheet { path: String, message: String },

    /// 日志文件读写失败
    #[error("日志文件错误 ({}): {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: LogIoError,
    },
}

/// 日志底层错误
#[derive(Debug, Error)]
pub enum LogIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("表头缺少必需列: {0}")]
    MissingColumn(String),
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    /// 创建行范围错误
    pub fn invalid_range(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::InvalidRangeSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// 创建日志错误
    pub fn log(path: impl Into<PathBuf>, source: impl Into<LogIoError>) -> Self {
        AppError::Log {
            path: path.into(),
            source: source.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
