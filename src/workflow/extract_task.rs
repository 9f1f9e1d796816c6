//! 主办单位抽取任务
//!
//! 每个 URL 一个条目，读取快照目录中的 `dom.html`：
//! DOM → 文本（写入 `dom.md`）→ 大模型抽取，失败或为空时回退到规则抽取 →
//! 结果写入同一目录的 `host-<方法>.json`。结果文件已存在即视为完成。

use async_trait::async_trait;
use clap::ValueEnum;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::ContentStore;
use crate::models::{ErrorKind, ResultFields, TaskError};
use crate::services::extract_service::{
    dedup_similar, html_to_text, matched_keyword, CharSpan, ExtractionFile, ExtractionMetadata,
    Institution, InstitutionKind, RuleExtractor,
};
use crate::services::llm_service::{extract_json_array, retain_valid_items};
use crate::services::snapshot_service::DOM_FILE;
use crate::services::{LlmService, TokenUsage};
use crate::workflow::snapshot_task::is_fetchable_url;
use crate::workflow::{SnapshotPayload, Task};

/// 转换后的文本
pub const TEXT_FILE: &str = "dom.md";

/// 发给大模型的文本上限（字符）
const MAX_PROMPT_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You extract host institutions, publishers and copyright holders \
from journal web pages. Only report entities the text explicitly names in an official \
relationship. Copy names and sentences verbatim; never paraphrase.";

/// 抽取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractMethod {
    /// 只用大模型
    Llm,
    /// 只用规则
    Regexp,
    /// 大模型优先，失败或无结果时回退到规则
    Auto,
}

impl ExtractMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractMethod::Llm => "llm",
            ExtractMethod::Regexp => "regexp",
            ExtractMethod::Auto => "auto",
        }
    }

    /// 结果文件名；`Auto` 没有固定文件
    pub fn result_file(self) -> Option<&'static str> {
        match self {
            ExtractMethod::Llm => Some("host-llm.json"),
            ExtractMethod::Regexp => Some("host-regexp.json"),
            ExtractMethod::Auto => None,
        }
    }

    /// 判断是否已完成时要查找的结果文件
    fn accepted_files(self) -> &'static [&'static str] {
        match self {
            ExtractMethod::Llm => &["host-llm.json"],
            ExtractMethod::Regexp => &["host-regexp.json"],
            ExtractMethod::Auto => &["host-llm.json", "host-regexp.json"],
        }
    }
}

/// 一次抽取的结果
struct Extraction {
    institutions: Vec<Institution>,
    method: ExtractMethod,
    usage: Option<TokenUsage>,
}

/// 抽取任务
pub struct ExtractTask {
    store: ContentStore,
    llm: Option<LlmService>,
    rules: RuleExtractor,
    method: ExtractMethod,
}

impl ExtractTask {
    /// 创建抽取任务
    ///
    /// # 参数
    /// - `store`: 快照所在的内容存储
    /// - `llm`: 大模型服务，`Regexp` 方式可为 `None`；`Auto` 方式为 `None` 时只用规则
    /// - `method`: 抽取方式
    pub fn new(
        store: ContentStore,
        llm: Option<LlmService>,
        method: ExtractMethod,
    ) -> AppResult<Self> {
        if method == ExtractMethod::Llm && llm.is_none() {
            return Err(AppError::config("抽取方式为 llm，但未配置大模型"));
        }
        let rules =
            RuleExtractor::new().map_err(|e| AppError::config(format!("规则编译失败: {}", e)))?;
        Ok(Self {
            store,
            llm,
            rules,
            method,
        })
    }

    fn model_name(&self) -> Option<&str> {
        self.llm.as_ref().map(|llm| llm.model_name())
    }

    async fn extract(&self, url: &str, text: &str) -> Result<Extraction, TaskError> {
        let by_rules = || Extraction {
            institutions: self.rules.extract(text),
            method: ExtractMethod::Regexp,
            usage: None,
        };

        let llm = match (self.method, &self.llm) {
            (ExtractMethod::Regexp, _) | (ExtractMethod::Auto, None) => return Ok(by_rules()),
            (_, Some(llm)) => llm,
            (ExtractMethod::Llm, None) => {
                return Err(TaskError::new(ErrorKind::ConfigError, "未配置大模型"))
            }
        };

        match self.extract_with_llm(llm, text).await {
            Ok(extraction) if self.method == ExtractMethod::Llm => Ok(extraction),
            Ok(extraction) if !extraction.institutions.is_empty() => Ok(extraction),
            Ok(_) => {
                debug!("[抽取] {} 大模型无结果，回退到规则", url);
                Ok(by_rules())
            }
            Err(e) if self.method == ExtractMethod::Llm => Err(e),
            Err(e) => {
                warn!("[抽取] {} 大模型失败，回退到规则: {}", url, e);
                Ok(by_rules())
            }
        }
    }

    async fn extract_with_llm(
        &self,
        llm: &LlmService,
        text: &str,
    ) -> Result<Extraction, TaskError> {
        let reply = llm
            .send_to_llm(&self.prompt(text), Some(SYSTEM_PROMPT))
            .await?;

        let items = extract_json_array(&reply.content).ok_or_else(|| {
            TaskError::new(ErrorKind::JsonParseError, "无法从回答中提取 JSON")
        })?;
        let (valid, invalid) = retain_valid_items(items, &["name"]);
        if invalid > 0 {
            debug!("[抽取] 丢弃 {} 个缺少名称的结果项", invalid);
        }

        let institutions = valid
            .iter()
            .filter_map(|item| self.institution_from_reply(item, text))
            .collect();

        Ok(Extraction {
            institutions: dedup_similar(institutions),
            method: ExtractMethod::Llm,
            usage: Some(reply.usage),
        })
    }

    /// 优先发送相关句子，没有时发送截断后的全文
    fn prompt(&self, text: &str) -> String {
        let sentences = self.rules.relevant_sentences(text);
        let body: String = if sentences.is_empty() {
            text.chars().take(MAX_PROMPT_CHARS).collect()
        } else {
            let joined = sentences
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            joined.chars().take(MAX_PROMPT_CHARS).collect()
        };

        format!(
            "Extract every host institution, publisher and copyright holder from the text below.\n\
             Answer with a JSON array. Each item has the fields:\n\
             - name: the institution name exactly as written\n\
             - type: one of host, publisher, copyright\n\
             - source_sentence: the complete sentence containing the name\n\
             Answer [] if there is none.\n\n\
             Text:\n{}",
            body
        )
    }

    fn institution_from_reply(
        &self,
        item: &serde_json::Map<String, Value>,
        text: &str,
    ) -> Option<Institution> {
        let field = |key: &str| item.get(key).and_then(Value::as_str).unwrap_or("").trim();

        let kind = InstitutionKind::parse(field("type"));
        let name = self.rules.clean_name(field("name"), kind)?;

        let given = field("source_sentence");
        let sentence = if given.is_empty() {
            self.rules
                .split_sentences(text)
                .into_iter()
                .map(|(s, _)| s)
                .find(|s| s.contains(&name))
                .unwrap_or_default()
        } else {
            given.to_string()
        };
        let char_position = match text.find(&sentence) {
            Some(start) if !sentence.is_empty() => Some(CharSpan {
                start,
                end: start + sentence.len(),
            }),
            _ => None,
        };

        Some(Institution {
            name,
            kind,
            matched_keyword: matched_keyword(&sentence).unwrap_or("").to_string(),
            source_sentence: self.rules.plain(&sentence),
            char_position,
            extraction_method: "llm".to_string(),
        })
    }

    fn fields(
        payload: &SnapshotPayload,
        count: usize,
        method: &str,
        usage: Option<TokenUsage>,
        cached: bool,
    ) -> ResultFields {
        let mut fields = ResultFields::new();
        fields.insert("source".to_string(), payload.source.clone());
        fields.insert("hash".to_string(), ContentStore::hash(&payload.url));
        fields.insert("institutions_count".to_string(), count.to_string());
        fields.insert("extract_method".to_string(), method.to_string());
        if let Some(usage) = usage {
            fields.insert("prompt_tokens".to_string(), usage.prompt_tokens.to_string());
            fields.insert(
                "completion_tokens".to_string(),
                usage.completion_tokens.to_string(),
            );
            fields.insert("total_tokens".to_string(), usage.total_tokens.to_string());
        }
        fields.insert("cached".to_string(), cached.to_string());
        fields
    }
}

#[async_trait]
impl Task for ExtractTask {
    type Payload = SnapshotPayload;

    fn name(&self) -> &'static str {
        "extract"
    }

    fn result_columns(&self) -> Vec<String> {
        [
            "source",
            "hash",
            "institutions_count",
            "extract_method",
            "prompt_tokens",
            "completion_tokens",
            "total_tokens",
            "cached",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect()
    }

    fn validate(&self, payload: &SnapshotPayload) -> Result<(), TaskError> {
        if !is_fetchable_url(&payload.url) {
            return Err(TaskError::invalid_input(format!(
                "不是有效的网页地址: '{}'",
                payload.url
            )));
        }
        Ok(())
    }

    fn cached(&self, payload: &SnapshotPayload) -> Option<ResultFields> {
        self.method.accepted_files().iter().find_map(|file| {
            let text = self.store.read_to_string(&payload.url, file).ok()??;
            // 解析失败的结果文件当作不存在，重新抽取
            let saved: ExtractionFile = serde_json::from_str(&text).ok()?;
            Some(Self::fields(
                payload,
                saved.host_institutions.len(),
                &saved.extraction_metadata.method,
                None,
                true,
            ))
        })
    }

    async fn execute(&self, payload: &SnapshotPayload) -> Result<ResultFields, TaskError> {
        let url = payload.url.as_str();
        let html = self
            .store
            .read_to_string(url, DOM_FILE)
            .map_err(|e| TaskError::unknown(format!("读取 {} 失败: {}", DOM_FILE, e)))?
            .ok_or_else(|| {
                TaskError::new(
                    ErrorKind::ValidationError,
                    format!("快照不存在（{}），请先运行 snapshot", ContentStore::hash(url)),
                )
            })?;

        let text = html_to_text(&html);
        self.store
            .write(url, TEXT_FILE, text.as_bytes())
            .map_err(|e| TaskError::unknown(format!("写入 {} 失败: {}", TEXT_FILE, e)))?;

        let extraction = self.extract(url, &text).await?;
        let method = extraction.method;

        let saved = ExtractionFile {
            extraction_metadata: ExtractionMetadata {
                method: method.as_str().to_string(),
                model: (method == ExtractMethod::Llm)
                    .then(|| self.model_name().map(str::to_string))
                    .flatten(),
                timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            },
            host_institutions: extraction.institutions,
        };
        let json = serde_json::to_string_pretty(&saved)
            .map_err(|e| TaskError::unknown(format!("序列化结果失败: {}", e)))?;

        let file = method.result_file().unwrap_or("host-regexp.json");
        self.store
            .write(url, file, json.as_bytes())
            .map_err(|e| TaskError::unknown(format!("写入 {} 失败: {}", file, e)))?;

        info!(
            "[抽取] ✓ {} | {} 个机构 | {}",
            payload.source,
            saved.host_institutions.len(),
            method.as_str()
        );
        Ok(Self::fields(
            payload,
            saved.host_institutions.len(),
            method.as_str(),
            extraction.usage,
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <nav><ul><li>Browse</li><li>Current issue</li></ul></nav>
        <p>Allergy, the official journal of the European Academy of Allergy and
        Clinical Immunology (EAACI), aims to advance research.</p>
        <footer>
        <p>Copyright © 1999-2025 John Wiley &amp; Sons, Inc or related companies.</p>
        </footer>
        </body></html>"#;

    fn payload(url: &str) -> SnapshotPayload {
        SnapshotPayload {
            url: url.to_string(),
            source: "Sheet1!D4".to_string(),
        }
    }

    fn rules_task(store: &ContentStore, method: ExtractMethod) -> ExtractTask {
        ExtractTask::new(store.clone(), None, method).unwrap()
    }

    #[tokio::test]
    async fn test_rules_extraction_writes_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let url = "https://journal.example/about";
        store.write(url, DOM_FILE, PAGE.as_bytes()).unwrap();

        let task = rules_task(&store, ExtractMethod::Auto);
        let p = payload(url);
        assert!(task.validate(&p).is_ok());
        assert!(task.cached(&p).is_none());

        let fields = task.execute(&p).await.unwrap();
        assert_eq!(fields["extract_method"], "regexp");
        assert_eq!(fields["institutions_count"], "2");
        assert_eq!(fields["cached"], "false");
        assert!(!fields.contains_key("total_tokens"));

        let text = store.read_to_string(url, TEXT_FILE).unwrap().unwrap();
        assert!(text.contains("official journal of the European Academy"));

        let json = store.read_to_string(url, "host-regexp.json").unwrap().unwrap();
        let saved: ExtractionFile = serde_json::from_str(&json).unwrap();
        assert_eq!(saved.extraction_metadata.method, "regexp");
        assert_eq!(saved.extraction_metadata.model, None);
        let names: Vec<&str> = saved.host_institutions.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "European Academy of Allergy and Clinical Immunology",
                "John Wiley & Sons, Inc or related companies"
            ]
        );

        // 结果文件已存在：直接命中
        let cached = task.cached(&p).unwrap();
        assert_eq!(cached["cached"], "true");
        assert_eq!(cached["institutions_count"], "2");
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        let task = rules_task(&store, ExtractMethod::Regexp);
        let err = task.execute(&payload("https://none.example")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn test_cached_respects_method_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let url = "https://journal.example/llm";
        let saved = ExtractionFile {
            extraction_metadata: ExtractionMetadata {
                method: "llm".to_string(),
                model: Some("m".to_string()),
                timestamp: "2025-01-01 00:00:00".to_string(),
            },
            host_institutions: Vec::new(),
        };
        let json = serde_json::to_string(&saved).unwrap();
        store.write(url, "host-llm.json", json.as_bytes()).unwrap();

        let p = payload(url);
        assert!(rules_task(&store, ExtractMethod::Regexp).cached(&p).is_none());
        let cached = rules_task(&store, ExtractMethod::Auto).cached(&p).unwrap();
        assert_eq!(cached["extract_method"], "llm");
        assert_eq!(cached["institutions_count"], "0");

        // 损坏的结果文件不算完成
        store.write(url, "host-llm.json", b"{not json").unwrap();
        assert!(rules_task(&store, ExtractMethod::Auto).cached(&p).is_none());
    }

    #[test]
    fn test_llm_method_requires_service() {
        let store = ContentStore::new("/tmp/unused");
        assert!(ExtractTask::new(store, None, ExtractMethod::Llm).is_err());
    }

    #[test]
    fn test_reply_item_is_cleaned_and_located() {
        let store = ContentStore::new("/tmp/unused");
        let task = rules_task(&store, ExtractMethod::Auto);
        let text = "About us\n\nThe journal is published by Springer Nature. It is great.";

        let item = serde_json::json!({ "name": "Springer Nature", "type": "publisher" });
        let found = task
            .institution_from_reply(item.as_object().unwrap(), text)
            .unwrap();
        assert_eq!(found.kind, InstitutionKind::Publisher);
        assert_eq!(found.source_sentence, "The journal is published by Springer Nature.");
        assert_eq!(found.matched_keyword, "published by");
        assert_eq!(found.char_position.unwrap().start, text.find("The journal").unwrap());
        assert_eq!(found.extraction_method, "llm");
    }
}
