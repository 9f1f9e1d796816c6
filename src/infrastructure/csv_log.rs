//! 结果日志 - 基础设施层
//!
//! ## 职责
//!
//! - 追加写入：每条记录序列化为完整的一行，一次 `write_all` 写入并落盘
//! - 续跑读取：扫描日志，跳过格式错误的行
//! - 崩溃修复：打开时把文件截断到最后一条完整记录的末尾
//!
//! 日志是唯一的持久化状态，只追加，不改写。

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, LogIoError};
use crate::models::{ItemId, LogRecord, RecordStatus, ResultFields, BASE_COLUMNS};
use crate::orchestrator::completion::{CompletionPolicy, CompletionSet};

/// 追加式 CSV 结果日志
///
/// 写入端由互斥锁保护，所有 worker 共享同一个实例。
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    /// 实际的表头（已存在的日志以文件中的表头为准）
    header: Vec<String>,
    writer: Mutex<File>,
}

impl CsvLog {
    /// 打开或创建日志
    ///
    /// # 参数
    /// - `path`: 日志路径，父目录不存在时自动创建
    /// - `result_columns`: 任务结果列，仅在新建日志时决定表头
    pub fn open(path: impl AsRef<Path>, result_columns: &[String]) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let log_err = |e: LogIoError| AppError::log(&path, e);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| log_err(e.into()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| log_err(e.into()))?;

        let mut len = file.metadata().map_err(|e| log_err(e.into()))?.len();
        if len > 0 {
            len = truncate_torn_tail(&mut file, len).map_err(|e| log_err(e.into()))?;
        }

        let header = if len == 0 {
            let header: Vec<String> = BASE_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .chain(result_columns.iter().cloned())
                .collect();
            let line = encode_row(&header).map_err(log_err)?;
            write_durably(&mut file, &line).map_err(|e| log_err(e.into()))?;
            info!("📝 已创建结果日志: {}", path.display());
            header
        } else {
            let header = read_header(&path).map_err(log_err)?;
            for column in result_columns {
                if !header.contains(column) {
                    warn!("日志表头缺少结果列 '{}'，该列将不会写入", column);
                }
            }
            debug!("沿用已有日志表头: {:?}", header);
            header
        };

        Ok(Self {
            path,
            header,
            writer: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// 追加一条记录
    ///
    /// 返回前已完成 `flush` 与 `sync_data`，进程随后被杀也不会丢失这一行。
    pub fn append(&self, record: &LogRecord) -> AppResult<()> {
        let row = self.row_for(record);
        let line = encode_row(&row).map_err(|e| AppError::log(&self.path, e))?;

        let mut file = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        write_durably(&mut file, &line).map_err(|e| AppError::log(&self.path, e))
    }

    /// 读取全部格式正确的记录（按文件顺序）
    pub fn scan(&self) -> AppResult<Vec<LogRecord>> {
        read_records(&self.path)
    }

    /// 按完成策略得到已完成集合
    pub fn load_existing(&self, policy: CompletionPolicy) -> AppResult<CompletionSet> {
        Ok(CompletionSet::from_records(&self.scan()?, policy))
    }

    /// 每个身份的最新记录（后写入者为准）
    pub fn load_latest(&self) -> AppResult<HashMap<ItemId, LogRecord>> {
        Ok(latest_by_id(self.scan()?))
    }

    fn row_for(&self, record: &LogRecord) -> Vec<String> {
        self.header
            .iter()
            .map(|column| match column.as_str() {
                "id" => record.id.to_string(),
                "timestamp" => record.timestamp.clone(),
                "status" => record.status.as_str().to_string(),
                "attempts" => record.attempts.to_string(),
                "duration_ms" => record.duration_ms.to_string(),
                "error_type" => record.error_type.clone(),
                "error_message" => record.error_message.clone(),
                other => record.field(other).to_string(),
            })
            .collect()
    }
}

/// 读取日志文件中全部格式正确的记录
///
/// 文件不存在时返回空列表。字段数与表头不一致、状态无法识别或身份为空的行
/// 视为损坏，记录警告后跳过。
pub fn read_records(path: &Path) -> AppResult<Vec<LogRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| AppError::log(path, e))?;

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::log(path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let layout = HeaderLayout::new(&header).map_err(|e| AppError::log(path, e))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (index, row) in reader.records().enumerate() {
        // 表头占第 1 行
        let line = index + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("日志第 {} 行无法解析，已跳过: {}", line, e);
                skipped += 1;
                continue;
            }
        };

        match layout.parse(&row) {
            Some(record) => records.push(record),
            None => {
                warn!("日志第 {} 行格式错误，已跳过", line);
                skipped += 1;
            }
        }
    }

    debug!(
        "读取日志 {}: {} 条有效记录，{} 行跳过",
        path.display(),
        records.len(),
        skipped
    );
    Ok(records)
}

/// 每个身份只保留最后一条记录
pub fn latest_by_id(records: Vec<LogRecord>) -> HashMap<ItemId, LogRecord> {
    let mut latest = HashMap::with_capacity(records.len());
    for record in records {
        latest.insert(record.id.clone(), record);
    }
    latest
}

/// 表头到列下标的映射
struct HeaderLayout {
    width: usize,
    id: usize,
    timestamp: Option<usize>,
    status: usize,
    attempts: Option<usize>,
    duration_ms: Option<usize>,
    error_type: Option<usize>,
    error_message: Option<usize>,
    fields: Vec<(usize, String)>,
}

impl HeaderLayout {
    fn new(header: &[String]) -> Result<Self, LogIoError> {
        let find = |name: &str| header.iter().position(|h| h == name);
        let require = |name: &str| find(name).ok_or_else(|| LogIoError::MissingColumn(name.into()));

        let fields = header
            .iter()
            .enumerate()
            .filter(|(_, h)| !BASE_COLUMNS.contains(&h.as_str()))
            .map(|(i, h)| (i, h.clone()))
            .collect();

        Ok(Self {
            width: header.len(),
            id: require("id")?,
            timestamp: find("timestamp"),
            status: require("status")?,
            attempts: find("attempts"),
            duration_ms: find("duration_ms"),
            error_type: find("error_type"),
            error_message: find("error_message"),
            fields,
        })
    }

    fn parse(&self, row: &csv::StringRecord) -> Option<LogRecord> {
        if row.len() != self.width {
            return None;
        }

        let get = |index: Option<usize>| index.and_then(|i| row.get(i)).unwrap_or("");

        let id = row.get(self.id)?.trim();
        if id.is_empty() {
            return None;
        }
        let status = RecordStatus::parse(row.get(self.status)?)?;

        let attempts = match get(self.attempts).trim() {
            "" => 0,
            s => s.parse().ok()?,
        };
        let duration_ms = match get(self.duration_ms).trim() {
            "" => 0,
            s => s.parse().ok()?,
        };

        let fields: ResultFields = self
            .fields
            .iter()
            .filter_map(|(i, name)| {
                let value = row.get(*i)?;
                (!value.is_empty()).then(|| (name.clone(), value.to_string()))
            })
            .collect();

        Some(LogRecord {
            id: ItemId::new(id),
            timestamp: get(self.timestamp).to_string(),
            status,
            attempts,
            duration_ms,
            error_type: get(self.error_type).trim().to_string(),
            error_message: get(self.error_message).to_string(),
            fields,
        })
    }
}

fn encode_row(row: &[String]) -> Result<Vec<u8>, LogIoError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(row)?;
    writer
        .into_inner()
        .map_err(|e| LogIoError::Io(e.into_error()))
}

fn write_durably(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_data()
}

fn read_header(path: &Path) -> Result<Vec<String>, LogIoError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    // 校验必需列
    HeaderLayout::new(&header)?;
    Ok(header)
}

/// 上次运行在写一行的中途被杀：把文件截断到最后一条完整记录的末尾
///
/// 残缺的行可能停在引号字段内部（`results_json` 总是带引号），只补换行
/// 无法结束该字段，后续追加的记录会被吞进去。返回截断后的长度。
fn truncate_torn_tail(file: &mut File, len: u64) -> std::io::Result<u64> {
    let mut bytes = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;

    let valid = complete_prefix_len(&bytes);
    if valid < bytes.len() as u64 {
        warn!(
            "⚠️ 日志末尾存在不完整的记录（{} 字节），已截断",
            bytes.len() as u64 - valid
        );
        file.set_len(valid)?;
        file.sync_data()?;
    }
    Ok(valid)
}

/// 最后一条完整记录结束处的字节偏移
///
/// 完整记录以换行结尾，且引号成对出现（换行不在引号字段内部）。
fn complete_prefix_len(bytes: &[u8]) -> u64 {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut record = csv::ByteRecord::new();
    let mut valid = 0u64;

    loop {
        let start = reader.position().byte();
        match reader.read_byte_record(&mut record) {
            Ok(true) => {
                let end = reader.position().byte();
                let raw = &bytes[start as usize..end as usize];
                let quotes = raw.iter().filter(|&&b| b == b'"').count();
                if raw.last() != Some(&b'\n') || quotes % 2 != 0 {
                    break;
                }
                valid = end;
            }
            Ok(false) | Err(_) => break,
        }
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskError, TaskOutcome};
    use std::time::Duration;

    fn columns() -> Vec<String> {
        vec!["url1".to_string(), "note".to_string()]
    }

    fn success(id: &str, url: &str) -> LogRecord {
        let mut fields = ResultFields::new();
        fields.insert("url1".to_string(), url.to_string());
        fields.insert("note".to_string(), "含,逗号\n和换行".to_string());
        LogRecord::from_outcome(
            ItemId::new(id),
            &TaskOutcome::success(fields, 1, Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_open_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log.csv");

        let log = CsvLog::open(&path, &columns()).unwrap();
        assert_eq!(log.header().len(), BASE_COLUMNS.len() + 2);
        drop(log);

        CsvLog::open(&path, &columns()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("id,timestamp,status"));
    }

    #[test]
    fn test_append_then_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let log = CsvLog::open(&path, &columns()).unwrap();

        log.append(&success("a", "https://a.example")).unwrap();
        let failure = LogRecord::from_outcome(
            ItemId::new("b"),
            &TaskOutcome::failure(TaskError::timeout("slow"), 2, Duration::ZERO),
        );
        log.append(&failure).unwrap();

        let records = log.scan().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].field("url1"), "https://a.example");
        assert_eq!(records[0].field("note"), "含,逗号\n和换行");
        assert_eq!(records[1].error_type, "timeout");
        assert_eq!(records[1].attempts, 2);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(
            &path,
            "id,timestamp,status,attempts,duration_ms,error_type,error_message\n\
             a,t,success,1,3,,\n\
             b,t,maybe,1,3,,\n\
             c,t,success\n\
             ,t,success,1,3,,\n\
             d,t,failed,x,3,,\n\
             e,t,failed,1,3,timeout,slow\n",
        )
        .unwrap();

        let ids: Vec<String> = read_records(&path)
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "e"]);
    }

    #[test]
    fn test_missing_required_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "name,value\nx,1\n").unwrap();

        let err = CsvLog::open(&path, &columns()).unwrap_err();
        assert!(matches!(
            err,
            AppError::Log {
                source: LogIoError::MissingColumn(_),
                ..
            }
        ));
    }

    #[test]
    fn test_existing_header_order_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(
            &path,
            "note,id,timestamp,status,attempts,duration_ms,error_type,error_message,url1\n",
        )
        .unwrap();

        let log = CsvLog::open(&path, &columns()).unwrap();
        log.append(&success("a", "https://a.example")).unwrap();

        let records = log.scan().unwrap();
        assert_eq!(records[0].field("url1"), "https://a.example");
        assert_eq!(records[0].id.as_str(), "a");
    }

    #[test]
    fn test_complete_prefix_stops_before_open_quote() {
        let head = b"id,status\na,success\n";
        let mut bytes = head.to_vec();
        bytes.extend_from_slice(b"b,\"half\nopen");
        assert_eq!(complete_prefix_len(&bytes), head.len() as u64);

        // 换行落在引号字段内部，同样不算完整
        let mut bytes = head.to_vec();
        bytes.extend_from_slice(b"b,\"line one\n");
        assert_eq!(complete_prefix_len(&bytes), head.len() as u64);

        let mut bytes = head.to_vec();
        bytes.extend_from_slice(b"b,\"x\"\"y\"\n");
        assert_eq!(complete_prefix_len(&bytes), bytes.len() as u64);
    }

    #[test]
    fn test_torn_header_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "id,timest").unwrap();

        let log = CsvLog::open(&path, &columns()).unwrap();
        assert_eq!(log.header().len(), BASE_COLUMNS.len() + 2);
        log.append(&success("a", "https://a.example")).unwrap();
        assert_eq!(log.scan().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_records(&dir.path().join("none.csv")).unwrap().is_empty());
    }
}
