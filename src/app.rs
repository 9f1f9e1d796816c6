//! 应用层
//!
//! 把配置、表格、任务和运行器接在一起。每个子命令：
//! 读取表格 → 枚举条目 → 打开日志 → 交给 `BatchRunner`。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chromiumoxide::Browser;
use clap::Args;
use rust_xlsxwriter::{Format, Workbook};
use tracing::{info, warn};

use crate::browser;
use crate::config::Config;
use crate::infrastructure::{read_records, ContentStore, CsvLog};
use crate::models::loaders::{
    build_keywords, column_index, enumerate, parse_columns, parse_search_columns,
};
use crate::models::{ItemId, LogRecord, RowRange, SheetGrid, WorkItem, WorkSource, BASE_COLUMNS};
use crate::orchestrator::{BatchRunner, CompletionSet, RunStatistics, RunnerOptions};
use crate::services::snapshot_service::SNAPSHOT_FILES;
use crate::services::{LlmService, SearchService, SnapshotService};
use crate::utils::logging::log_startup;
use crate::workflow::{
    ExtractMethod, ExtractTask, ScanPayload, ScanTask, SearchTask, SnapshotPayload, SnapshotTask,
    Task,
};

/// Excel 报告的表名
pub const REPORT_SHEET: &str = "report";

/// `search` 子命令参数
#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// 输入表格 (.xlsx)
    #[arg(long)]
    pub input: PathBuf,
    /// 表名
    #[arg(long)]
    pub sheet: String,
    /// 关键字列，带 * 的列加引号精确匹配，如 "C*,D"
    #[arg(long)]
    pub columns: String,
    /// 行范围，如 "3+" 或 "3-99"
    #[arg(long)]
    pub rows: String,
    /// 保留前几个结果 URL
    #[arg(long, default_value_t = 3)]
    pub top_n: usize,
    /// 对结果 URL 做网页快照
    #[arg(long)]
    pub snapshot: bool,
    /// 结果日志路径
    #[arg(long)]
    pub log: Option<PathBuf>,
    /// 搜索语言
    #[arg(long, default_value = "zh-cn")]
    pub language: String,
}

/// `snapshot` 子命令参数
#[derive(Debug, Clone, Args)]
pub struct SnapshotArgs {
    #[arg(long)]
    pub input: PathBuf,
    /// 表名，默认第一张表
    #[arg(long)]
    pub sheet: Option<String>,
    /// 哨兵列（如期刊名所在列），默认取第一个 URL 列
    #[arg(long)]
    pub name_column: Option<String>,
    /// URL 所在的列，如 "D,F"
    #[arg(long)]
    pub url_columns: String,
    #[arg(long)]
    pub rows: String,
    #[arg(long)]
    pub log: Option<PathBuf>,
    /// 快照目录，覆盖配置中的 [snapshot].dir
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,
}

/// `extract` 子命令参数
#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub sheet: Option<String>,
    /// 哨兵列，默认取第一个 URL 列
    #[arg(long)]
    pub name_column: Option<String>,
    /// URL 所在的列，如 "D,F"
    #[arg(long)]
    pub url_columns: String,
    #[arg(long)]
    pub rows: String,
    #[arg(long)]
    pub log: Option<PathBuf>,
    /// 快照目录，覆盖配置中的 [snapshot].dir
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,
    /// 抽取方式
    #[arg(long, value_enum, default_value_t = ExtractMethod::Auto)]
    pub method: ExtractMethod,
}

/// `scan` 子命令参数
#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub sheet: Option<String>,
    /// 期刊名所在列
    #[arg(long)]
    pub name_column: String,
    /// 两个 URL 所在的列，如 "D,F"
    #[arg(long)]
    pub url_columns: String,
    #[arg(long)]
    pub rows: String,
    #[arg(long)]
    pub log: Option<PathBuf>,
}

/// `report` 子命令参数
#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    /// 结果日志
    #[arg(long)]
    pub log: PathBuf,
    /// 输出文件，扩展名为 .xlsx 时写 Excel，否则写 CSV
    #[arg(long)]
    pub output: PathBuf,
    /// 只输出这些结果列（逗号分隔），默认全部
    #[arg(long)]
    pub columns: Option<String>,
}

/// 子命令
#[derive(Debug, Clone)]
pub enum Command {
    Search(SearchArgs),
    Snapshot(SnapshotArgs),
    Extract(ExtractArgs),
    Scan(ScanArgs),
    Report(ReportArgs),
}

/// 应用主结构
pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// 执行子命令
    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Search(args) => self.search(args).await.map(|_| ()),
            Command::Snapshot(args) => self.snapshot(args).await.map(|_| ()),
            Command::Extract(args) => self.extract(args).await.map(|_| ()),
            Command::Scan(args) => self.scan(args).await.map(|_| ()),
            Command::Report(args) => report(&args),
        }
    }

    async fn search(&self, args: SearchArgs) -> Result<RunStatistics> {
        self.config.require_scrapingbee_key()?;

        let columns = parse_search_columns(&args.columns)?;
        let range = RowRange::parse(&args.rows)?;
        let grid = SheetGrid::open(&args.input, Some(&args.sheet))?;

        let items = enumerate(&grid, range, columns[0].index, |g, row| {
            let keywords = build_keywords(g, row, &columns);
            Some(WorkItem::new(ItemId::row(g.name(), row), keywords))
        })?;

        let log_path = args
            .log
            .clone()
            .unwrap_or_else(|| default_log_path(&args.input, "search"));
        log_startup("search", self.config.runner.concurrency, &log_path);

        let service = SearchService::new(
            &self.config.scrapingbee,
            &args.language,
            self.config.runner.call_timeout(),
            self.config.runner.proxy.as_deref(),
        )?;
        let mut task = SearchTask::new(service, args.top_n);

        let mut browser = None;
        let mut completion = None;
        if args.snapshot {
            let opened = Arc::new(self.open_browser().await?);
            let store = ContentStore::new(&self.config.snapshot.dir);
            let snapshot = Arc::new(SnapshotService::new(opened.clone(), store.clone()));
            task = task.with_snapshot(snapshot);
            browser = Some(opened);

            // 行成功且所有结果 URL 的快照文件都在，才算完成
            let records = read_records(&log_path)?;
            let top_n = args.top_n;
            completion = Some(
                CompletionSet::from_records(&records, task.completion_policy()).require_children(
                    &records,
                    |r| SearchTask::urls_of(r, top_n),
                    |url| store.has_all(url, &SNAPSHOT_FILES),
                ),
            );
        }

        let stats = self.run_task(task, items, &log_path, completion).await?;
        close_browser(browser).await;
        Ok(stats)
    }

    async fn snapshot(&self, args: SnapshotArgs) -> Result<RunStatistics> {
        let items = url_items(
            &args.input,
            args.sheet.as_deref(),
            args.name_column.as_deref(),
            &args.url_columns,
            &args.rows,
        )?;

        let log_path = args
            .log
            .clone()
            .unwrap_or_else(|| default_log_path(&args.input, "snapshot"));
        log_startup("snapshot", self.config.runner.concurrency, &log_path);

        let dir = args
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.config.snapshot.dir));
        let browser = Arc::new(self.open_browser().await?);
        let service = Arc::new(SnapshotService::new(browser.clone(), ContentStore::new(dir)));

        let stats = self
            .run_task(SnapshotTask::new(service), items, &log_path, None)
            .await?;
        close_browser(Some(browser)).await;
        Ok(stats)
    }

    async fn extract(&self, args: ExtractArgs) -> Result<RunStatistics> {
        let items = url_items(
            &args.input,
            args.sheet.as_deref(),
            args.name_column.as_deref(),
            &args.url_columns,
            &args.rows,
        )?;

        let llm = match args.method {
            ExtractMethod::Regexp => None,
            ExtractMethod::Llm => {
                self.config.require_llm_key()?;
                Some(LlmService::new(&self.config.llm))
            }
            ExtractMethod::Auto => match self.config.require_llm_key() {
                Ok(()) => Some(LlmService::new(&self.config.llm)),
                Err(_) => {
                    warn!("⚠️ 未配置大模型，只使用规则抽取");
                    None
                }
            },
        };

        let log_path = args
            .log
            .clone()
            .unwrap_or_else(|| default_log_path(&args.input, "extract"));
        log_startup("extract", self.config.runner.concurrency, &log_path);

        let dir = args
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.config.snapshot.dir));
        let task = ExtractTask::new(ContentStore::new(dir), llm, args.method)?;
        self.run_task(task, items, &log_path, None).await
    }

    async fn scan(&self, args: ScanArgs) -> Result<RunStatistics> {
        self.config.require_llm_key()?;

        let name_column = column_index(&args.name_column)?;
        let url_columns = parse_columns(&args.url_columns)?;
        let range = RowRange::parse(&args.rows)?;
        let grid = SheetGrid::open(&args.input, args.sheet.as_deref())?;

        let url_at = |g: &SheetGrid, row: u32, i: usize| -> String {
            url_columns
                .get(i)
                .and_then(|&col| g.cell(row, col))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let items = enumerate(&grid, range, name_column, |g, row| {
            let journal_name = g.cell(row, name_column)?.trim().to_string();
            let payload = ScanPayload {
                url1: url_at(g, row, 0),
                url2: url_at(g, row, 1),
                journal_name: journal_name.clone(),
            };
            Some(WorkItem::new(journal_name, payload))
        })?;

        let log_path = args
            .log
            .clone()
            .unwrap_or_else(|| default_log_path(&args.input, "scan"));
        log_startup("scan", self.config.runner.concurrency, &log_path);

        let task = ScanTask::new(LlmService::new(&self.config.llm));
        self.run_task(task, items, &log_path, None).await
    }

    async fn run_task<T: Task>(
        &self,
        task: T,
        items: Vec<WorkItem<T::Payload>>,
        log_path: &Path,
        completion: Option<CompletionSet>,
    ) -> Result<RunStatistics> {
        let log = Arc::new(CsvLog::open(log_path, &task.result_columns())?);
        let options = RunnerOptions {
            concurrency: self.config.runner.concurrency,
            retry: self.config.runner.retry_policy(),
            call_timeout: self.config.runner.call_timeout(),
        };

        let mut runner = BatchRunner::new(log, options);
        if let Some(completion) = completion {
            runner = runner.with_completion(completion);
        }

        let stats = runner.run(Arc::new(task), items).await?;
        Ok(stats)
    }

    async fn open_browser(&self) -> Result<Browser> {
        browser::open_browser(&self.config.snapshot, self.config.runner.proxy.as_deref())
            .await
            .context("无法获取浏览器")
    }
}

/// 所有引用都已释放时关闭浏览器
async fn close_browser(browser: Option<Arc<Browser>>) {
    if let Some(Ok(mut browser)) = browser.map(Arc::try_unwrap) {
        if let Err(e) = browser.close().await {
            warn!("关闭浏览器失败: {}", e);
        }
        let _ = browser.wait().await;
    }
}

/// 按 URL 列枚举条目，每个非空 URL 一个条目，同一 URL 只保留第一次出现
fn url_items(
    input: &Path,
    sheet: Option<&str>,
    name_column: Option<&str>,
    url_columns: &str,
    rows: &str,
) -> Result<Vec<WorkItem<SnapshotPayload>>> {
    let url_columns = parse_columns(url_columns)?;
    let sentinel = match name_column {
        Some(letters) => column_index(letters)?,
        None => url_columns[0],
    };
    let range = RowRange::parse(rows)?;
    let grid = SheetGrid::open(input, sheet)?;

    let items = enumerate(&grid, range, sentinel, |g, row| {
        url_columns
            .iter()
            .filter_map(|&col| {
                let url = g.cell(row, col)?.trim().to_string();
                if url.is_empty() {
                    return None;
                }
                let source = format!("{}!{}{}", g.name(), column_letters(col), row);
                Some(WorkItem::new(url.clone(), SnapshotPayload { url, source }))
            })
            .collect::<Vec<_>>()
    })?;
    Ok(items)
}

/// 默认日志路径：与输入文件同目录，`<文件名>.<命令>.log.csv`
pub fn default_log_path(input: &Path, command: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    input.with_file_name(format!("{}.{}.log.csv", stem, command))
}

/// 0-based 列索引转列字母
pub fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// 合并日志：每个身份只保留最后一条记录，按首次出现的顺序输出
pub fn report(args: &ReportArgs) -> Result<()> {
    let records = read_records(&args.log)?;
    if records.is_empty() {
        warn!("⚠️ 日志中没有有效记录: {}", args.log.display());
    }

    let result_columns: Vec<String> = match &args.columns {
        Some(spec) => spec
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        None => log_result_columns(&args.log)?,
    };

    let rows = reconcile(records);

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("无法创建目录 {}", parent.display()))?;
    }

    let header: Vec<String> = BASE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(result_columns.iter().cloned())
        .collect();
    let body: Vec<Vec<String>> = rows.iter().map(|r| r.to_row(&result_columns)).collect();
    if is_xlsx(&args.output) {
        write_xlsx(&args.output, &header, &body)?;
    } else {
        write_csv(&args.output, &header, &body)?;
    }

    let succeeded = rows.iter().filter(|r| r.is_success()).count();
    info!(
        "✅ 已输出 {} 条记录（成功 {}，失败 {}）到 {}",
        rows.len(),
        succeeded,
        rows.len() - succeeded,
        args.output.display()
    );
    Ok(())
}

fn is_xlsx(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false)
}

fn write_csv(path: &Path, header: &[String], body: &[Vec<String>]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("无法写入 {}", path.display()))?;
    writer.write_record(header)?;
    for row in body {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// 写入单表工作簿 `report`：首行加粗并冻结
fn write_xlsx(path: &Path, header: &[String], body: &[Vec<String>]) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(REPORT_SHEET)?;

    for (col, title) in header.iter().enumerate() {
        sheet.write_string_with_format(0, excel_col(col)?, title, &bold)?;
    }
    for (i, row) in body.iter().enumerate() {
        let row_num = u32::try_from(i + 1).context("报告行数超出 Excel 上限")?;
        for (col, value) in row.iter().enumerate() {
            if !value.is_empty() {
                sheet.write_string(row_num, excel_col(col)?, value)?;
            }
        }
    }
    sheet.set_freeze_panes(1, 0)?;

    workbook
        .save(path)
        .with_context(|| format!("无法写入 {}", path.display()))?;
    Ok(())
}

fn excel_col(col: usize) -> Result<u16> {
    u16::try_from(col).context("报告列数超出 Excel 上限")
}

/// 后写入者为准，输出顺序为身份首次出现的顺序
pub fn reconcile(records: Vec<LogRecord>) -> Vec<LogRecord> {
    let mut order: Vec<ItemId> = Vec::new();
    let mut seen = HashSet::new();
    for record in &records {
        if seen.insert(record.id.clone()) {
            order.push(record.id.clone());
        }
    }

    let mut latest = crate::infrastructure::latest_by_id(records);
    order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect()
}

fn log_result_columns(path: &Path) -> Result<Vec<String>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("无法读取 {}", path.display()))?;
    Ok(reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !BASE_COLUMNS.contains(&h.as_str()))
        .collect())
}
