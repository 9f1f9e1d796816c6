//! 程序配置
//!
//! 优先级：命令行参数 > 配置文件 > 环境变量 > 默认值。
//!
//! 配置文件为 TOML，包含 `[runner]`、`[scrapingbee]`、`[llm]`、`[snapshot]`
//! 四张表，全部字段可选。为兼容旧配置，`[scrapingbee]` 中的
//! `concurrency` / `retry_times` / `timeout_seconds` / `proxy` 在 `[runner]`
//! 未给出时同样生效。

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::utils::RetryPolicy;

/// 默认配置文件名，不存在时静默使用默认值
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 运行参数
#[derive(Clone, Debug, PartialEq)]
pub struct RunnerConfig {
    /// 同时处理的条目数量
    pub concurrency: usize,
    /// 瞬时错误的最大重试次数（不含首次调用）
    pub retry_times: u32,
    /// 单次外部调用超时（秒）
    pub timeout_seconds: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub proxy: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retry_times: 1,
            timeout_seconds: 120,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 5000,
            proxy: None,
        }
    }
}

impl RunnerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_times,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// ScrapingBee 配置
#[derive(Clone, Debug, PartialEq)]
pub struct ScrapingBeeConfig {
    pub api_key: String,
    pub endpoint: String,
}

impl Default for ScrapingBeeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://app.scrapingbee.com/api/v1/google".to_string(),
        }
    }
}

/// LLM 配置
#[derive(Clone, Debug, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: "gemini-2.5-pro-search".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// 快照配置
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotConfig {
    /// 内容寻址目录
    pub dir: String,
    pub chrome_executable: Option<String>,
    /// 设置后连接已有浏览器，而不是启动无头浏览器
    pub debug_port: Option<u16>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: "snapshots".to_string(),
            chrome_executable: None,
            debug_port: None,
            window_width: 1366,
            window_height: 900,
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub runner: RunnerConfig,
    pub scrapingbee: ScrapingBeeConfig,
    pub llm: LlmConfig,
    pub snapshot: SnapshotConfig,
}

/// 命令行覆盖项
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub concurrency: Option<usize>,
    pub retry_times: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub proxy: Option<String>,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// 默认值叠加环境变量
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            runner: RunnerConfig {
                concurrency: env_parse("SHEET_HARVEST_CONCURRENCY")
                    .unwrap_or(default.runner.concurrency),
                retry_times: env_parse("SHEET_HARVEST_RETRY_TIMES")
                    .unwrap_or(default.runner.retry_times),
                timeout_seconds: env_parse("SHEET_HARVEST_TIMEOUT_SECONDS")
                    .unwrap_or(default.runner.timeout_seconds),
                retry_base_delay_ms: env_parse("SHEET_HARVEST_RETRY_BASE_DELAY_MS")
                    .unwrap_or(default.runner.retry_base_delay_ms),
                retry_max_delay_ms: env_parse("SHEET_HARVEST_RETRY_MAX_DELAY_MS")
                    .unwrap_or(default.runner.retry_max_delay_ms),
                proxy: env_string("SHEET_HARVEST_PROXY").or(default.runner.proxy),
            },
            scrapingbee: ScrapingBeeConfig {
                api_key: env_string("SCRAPINGBEE_API_KEY").unwrap_or(default.scrapingbee.api_key),
                endpoint: env_string("SCRAPINGBEE_ENDPOINT")
                    .unwrap_or(default.scrapingbee.endpoint),
            },
            llm: LlmConfig {
                api_key: env_string("OPENAI_API_KEY").unwrap_or(default.llm.api_key),
                api_base: env_string("OPENAI_API_BASE").or(default.llm.api_base),
                model: env_string("LLM_MODEL_NAME").unwrap_or(default.llm.model),
                ..default.llm
            },
            snapshot: SnapshotConfig {
                dir: env_string("SHEET_HARVEST_SNAPSHOT_DIR").unwrap_or(default.snapshot.dir),
                chrome_executable: env_string("CHROME_EXECUTABLE")
                    .or(default.snapshot.chrome_executable),
                debug_port: env_parse("BROWSER_DEBUG_PORT").or(default.snapshot.debug_port),
                ..default.snapshot
            },
        }
    }

    /// 加载配置
    ///
    /// # 参数
    /// - `path`: 配置文件；`None` 时尝试 `config.toml`，不存在则跳过
    /// - `overrides`: 命令行覆盖项
    pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> AppResult<Self> {
        let mut config = Self::from_env();

        let file = match path {
            Some(p) if !p.exists() => {
                return Err(AppError::config(format!("配置文件不存在: {}", p.display())))
            }
            Some(p) => Some(p.to_path_buf()),
            None => Some(Path::new(DEFAULT_CONFIG_FILE).to_path_buf()).filter(|p| p.exists()),
        };

        if let Some(file) = file {
            let text = std::fs::read_to_string(&file).map_err(|e| {
                AppError::config(format!("读取配置文件 {} 失败: {}", file.display(), e))
            })?;
            config.merge_toml(&text).map_err(|e| {
                AppError::config(format!("解析配置文件 {} 失败: {}", file.display(), e))
            })?;
            debug!("已加载配置文件: {}", file.display());
        }

        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// 用 TOML 文本中出现的字段覆盖当前值
    pub fn merge_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;

        let bee = file.scrapingbee.unwrap_or_default();
        let runner = file.runner.unwrap_or_default();

        let r = &mut self.runner;
        set(&mut r.concurrency, runner.concurrency.or(bee.concurrency));
        set(&mut r.retry_times, runner.retry_times.or(bee.retry_times));
        set(&mut r.timeout_seconds, runner.timeout_seconds.or(bee.timeout_seconds));
        set(&mut r.retry_base_delay_ms, runner.retry_base_delay_ms);
        set(&mut r.retry_max_delay_ms, runner.retry_max_delay_ms);
        if let Some(proxy) = runner.proxy.or(bee.proxy) {
            r.proxy = Some(proxy).filter(|p| !p.trim().is_empty());
        }

        set(&mut self.scrapingbee.api_key, bee.api_key);
        set(&mut self.scrapingbee.endpoint, bee.endpoint);

        if let Some(llm) = file.llm {
            set(&mut self.llm.api_key, llm.api_key);
            if llm.api_base.is_some() {
                self.llm.api_base = llm.api_base;
            }
            set(&mut self.llm.model, llm.model);
            set(&mut self.llm.temperature, llm.temperature);
            set(&mut self.llm.max_tokens, llm.max_tokens);
        }

        if let Some(snapshot) = file.snapshot {
            set(&mut self.snapshot.dir, snapshot.dir);
            if snapshot.chrome_executable.is_some() {
                self.snapshot.chrome_executable = snapshot.chrome_executable;
            }
            if snapshot.debug_port.is_some() {
                self.snapshot.debug_port = snapshot.debug_port;
            }
            set(&mut self.snapshot.window_width, snapshot.window_width);
            set(&mut self.snapshot.window_height, snapshot.window_height);
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        set(&mut self.runner.concurrency, overrides.concurrency);
        set(&mut self.runner.retry_times, overrides.retry_times);
        set(&mut self.runner.timeout_seconds, overrides.timeout_seconds);
        if overrides.proxy.is_some() {
            self.runner.proxy = overrides.proxy.clone();
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.runner.concurrency == 0 {
            return Err(AppError::config("concurrency 必须 >= 1"));
        }
        if self.runner.timeout_seconds == 0 {
            return Err(AppError::config("timeout_seconds 必须 >= 1"));
        }
        if self.runner.retry_base_delay_ms > self.runner.retry_max_delay_ms {
            return Err(AppError::config(
                "retry_base_delay_ms 不能大于 retry_max_delay_ms",
            ));
        }
        Ok(())
    }

    /// 搜索命令需要 ScrapingBee 凭据
    pub fn require_scrapingbee_key(&self) -> AppResult<()> {
        if self.scrapingbee.api_key.trim().is_empty() {
            return Err(AppError::config(
                "未配置 ScrapingBee API key（SCRAPINGBEE_API_KEY 或 [scrapingbee].api_key）",
            ));
        }
        Ok(())
    }

    /// 扫描命令需要 LLM 凭据
    pub fn require_llm_key(&self) -> AppResult<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(AppError::config(
                "未配置 LLM API key（OPENAI_API_KEY 或 [llm].api_key）",
            ));
        }
        Ok(())
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

// ========== 配置文件结构 ==========

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    runner: Option<FileRunner>,
    scrapingbee: Option<FileScrapingBee>,
    llm: Option<FileLlm>,
    snapshot: Option<FileSnapshot>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRunner {
    concurrency: Option<usize>,
    retry_times: Option<u32>,
    timeout_seconds: Option<u64>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    proxy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileScrapingBee {
    api_key: Option<String>,
    endpoint: Option<String>,
    concurrency: Option<usize>,
    retry_times: Option<u32>,
    timeout_seconds: Option<u64>,
    proxy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLlm {
    api_key: Option<String>,
    api_base: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileSnapshot {
    dir: Option<String>,
    chrome_executable: Option<String>,
    debug_port: Option<u16>,
    window_width: Option<u32>,
    window_height: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.runner.concurrency, 1);
        assert_eq!(config.runner.retry_times, 1);
        assert_eq!(config.runner.timeout_seconds, 120);
        assert_eq!(config.runner.proxy, None);
        assert_eq!(config.runner.retry_policy().max_attempts(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runner_table_beats_legacy_scrapingbee_table() {
        let mut config = Config::default();
        config
            .merge_toml(
                r#"
                [runner]
                concurrency = 8

                [scrapingbee]
                api_key = "bee"
                concurrency = 3
                retry_times = 4
                proxy = "http://127.0.0.1:7890"
                "#,
            )
            .unwrap();

        assert_eq!(config.runner.concurrency, 8);
        assert_eq!(config.runner.retry_times, 4);
        assert_eq!(config.runner.timeout_seconds, 120);
        assert_eq!(config.runner.proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(config.scrapingbee.api_key, "bee");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = Config::default();
        config.merge_toml("[runner]\nconcurrency = 8\n").unwrap();
        config.apply_overrides(&CliOverrides {
            concurrency: Some(2),
            timeout_seconds: Some(30),
            ..Default::default()
        });
        assert_eq!(config.runner.concurrency, 2);
        assert_eq!(config.runner.timeout_seconds, 30);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.runner.concurrency = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::default();
        assert!(config.merge_toml("[runner]\nconcurrency = \"many\"\n").is_err());
        assert!(config.require_scrapingbee_key().is_err());
        assert!(config.require_llm_key().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = Config::load(
            Some(Path::new("/definitely/not/here.toml")),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
