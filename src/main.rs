use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sheet_harvest::app::{
    App, Command, ExtractArgs, ReportArgs, ScanArgs, SearchArgs, SnapshotArgs,
};
use sheet_harvest::config::{CliOverrides, Config};
use sheet_harvest::utils::logging;

/// 表格驱动的可续跑批量采集工具
#[derive(Debug, Parser)]
#[command(name = "sheet_harvest", version, about)]
struct Cli {
    /// 配置文件（默认尝试 ./config.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 并发数
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// 瞬时错误的重试次数
    #[arg(long, global = true)]
    retry_times: Option<u32>,

    /// 单次调用超时（秒）
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// HTTP(S) 代理
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 按行拼关键字调用 Google 搜索，可选对结果做快照
    Search(SearchArgs),
    /// 抓取表格中的网址快照（DOM + MHTML）
    Snapshot(SnapshotArgs),
    /// 从快照中抽取主办单位（大模型或规则）
    Extract(ExtractArgs),
    /// 让大模型阅读网址，提取期刊主办单位
    Scan(ScanArgs),
    /// 合并日志，每个条目只保留最后一条记录（输出 CSV 或 .xlsx）
    Report(ReportArgs),
}

impl From<Commands> for Command {
    fn from(value: Commands) -> Self {
        match value {
            Commands::Search(args) => Command::Search(args),
            Commands::Snapshot(args) => Command::Snapshot(args),
            Commands::Extract(args) => Command::Extract(args),
            Commands::Scan(args) => Command::Scan(args),
            Commands::Report(args) => Command::Report(args),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 初始化日志
    logging::init(cli.verbose);

    let overrides = CliOverrides {
        concurrency: cli.concurrency,
        retry_times: cli.retry_times,
        timeout_seconds: cli.timeout,
        proxy: cli.proxy.clone(),
    };

    // 加载配置
    let config = match Config::load(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("错误: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match App::new(config).run(cli.command.into()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
