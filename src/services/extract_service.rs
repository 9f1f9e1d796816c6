//! 主办单位抽取 - 业务能力层
//!
//! ## 职责
//!
//! - 网页 DOM 转为保留段落结构的文本（`scraper` 解析，标题带 `#`，列表项带 `- `）
//! - 分句，并按关键短语筛出可能提到主办单位的句子
//! - 规则抽取：在筛出的句子上用正则取机构名，清洗后按名称包含关系去重
//!
//! 大模型抽取在任务层完成，这里只提供它需要的分句与清洗能力。

use regex::Regex;
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};

/// 句子筛选用的关键短语（小写）
pub const KEY_PHRASES: [&str; 22] = [
    "on behalf of",
    "official journal of",
    "official publication of",
    "affiliate",
    "edited by",
    "owned",
    "in association with",
    "responsible for",
    "supervised by",
    "sponsored by",
    "patronage",
    "compile",
    "in partnership with",
    "in cooperation with",
    "the backing of",
    "administrated by",
    "university press",
    "funded by",
    "published by",
    "publisher",
    "copyright",
    "©",
];

const COPYRIGHT_WORDS: [&str; 3] = ["copyright", "©", "all rights reserved"];
const PUBLISHER_WORDS: [&str; 3] = ["published by", "publisher", "university press"];
const NOISE_WORDS: [&str; 5] = [
    "tools",
    "submit an article",
    "connect with",
    "press room",
    "network",
];

const HIDDEN_TAGS: [&str; 6] = ["script", "style", "noscript", "template", "svg", "iframe"];
const BLOCK_TAGS: [&str; 24] = [
    "title", "body", "p", "div", "section", "article", "header", "footer", "nav", "aside",
    "main", "ul", "ol", "dl", "dt", "dd", "table", "tr", "blockquote", "figure", "figcaption",
    "address", "pre", "form",
];

/// 超过这个字符数的"句子"多半是分句失败，不参与抽取
const MAX_SENTENCE_CHARS: usize = 800;

/// 机构类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstitutionKind {
    Host,
    Publisher,
    Copyright,
}

impl InstitutionKind {
    /// 大模型回答中的类型字段，无法识别时视为主办单位
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "publisher" => Self::Publisher,
            "copyright" => Self::Copyright,
            _ => Self::Host,
        }
    }

    /// 按句子与名称中的关键词判断，优先级 copyright > publisher > host
    pub fn infer(sentence: &str, name: &str) -> Self {
        let sentence = sentence.to_lowercase();
        let name = name.to_lowercase();
        let mentions = |words: &[&str]| {
            words
                .iter()
                .any(|w| sentence.contains(w) || name.contains(w))
        };

        if mentions(&COPYRIGHT_WORDS) {
            Self::Copyright
        } else if mentions(&PUBLISHER_WORDS) {
            Self::Publisher
        } else {
            Self::Host
        }
    }
}

/// 句子在文本中的字节区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

/// 一个抽取出的机构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InstitutionKind,
    pub source_sentence: String,
    pub matched_keyword: String,
    pub char_position: Option<CharSpan>,
    pub extraction_method: String,
}

/// 结果文件的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub method: String,
    pub model: Option<String>,
    pub timestamp: String,
}

/// 写入内容存储的结果文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFile {
    pub extraction_metadata: ExtractionMetadata,
    pub host_institutions: Vec<Institution>,
}

/// 筛出的相关句子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantSentence {
    pub text: String,
    /// 在全文中的字节偏移
    pub offset: usize,
    pub keyword: &'static str,
}

/// 网页 DOM 转为文本
///
/// 脚本、样式等不可见内容被丢弃；块级元素之间空一行，标题前加 `#`，
/// 列表项前加 `- `。行内元素按原文的空白决定是否以空格相连。
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    // 上一个文本节点以空白结尾，或中间隔着单元格边界
    let mut space = false;

    for node in document.root_element().descendants() {
        match node.value() {
            Node::Element(element) => {
                let name = element.name();
                if let Some(level) = heading_level(name) {
                    start_block(&mut out);
                    out.push_str(&"#".repeat(level));
                    out.push(' ');
                } else if name == "li" {
                    start_line(&mut out);
                    out.push_str("- ");
                } else if name == "br" {
                    start_line(&mut out);
                } else if name == "td" || name == "th" {
                    space = true;
                } else if BLOCK_TAGS.contains(&name) {
                    start_block(&mut out);
                }
            }
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .map_or(false, |e| HIDDEN_TAGS.contains(&e.name()))
                });
                if hidden {
                    continue;
                }

                if text.starts_with(char::is_whitespace) {
                    space = true;
                }
                let words: Vec<&str> = text.split_whitespace().collect();
                if !words.is_empty() {
                    if space && !out.is_empty() && !out.ends_with(char::is_whitespace) {
                        out.push(' ');
                    }
                    out.push_str(&words.join(" "));
                    space = false;
                }
                if text.ends_with(char::is_whitespace) {
                    space = true;
                }
            }
            _ => {}
        }
    }

    tidy(&out)
}

fn heading_level(name: &str) -> Option<usize> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn start_block(out: &mut String) {
    let kept = out.trim_end().len();
    out.truncate(kept);
    if !out.is_empty() {
        out.push_str("\n\n");
    }
}

fn start_line(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// 行尾去空白，连续空行合并为一行
fn tidy(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines.join("\n")
}

/// 规则抽取器
///
/// 正则在构造时编译一次，之后只读，可在 worker 间共享。
#[derive(Debug)]
pub struct RuleExtractor {
    paragraph_break: Regex,
    sentence_end: Regex,
    noise: Regex,
    copyright: Regex,
    official: Regex,
    trailing_verb: Regex,
    suffixed: Regex,
    markup: Regex,
    copyright_prefix: Regex,
    role_prefix: Regex,
    year_range: Regex,
    year: Regex,
    related_suffix: Regex,
    separators: Regex,
    whitespace: Regex,
    leading_the: Regex,
}

impl RuleExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            paragraph_break: Regex::new(r"\n\s*\n")?,
            sentence_end: Regex::new(r"[。！？]\s*|[!?]\s+|\.\s+")?,
            noise: Regex::new(concat!(
                r"^\s*[+\-*]\s+|^\s*\d+\.\s+|^\s*##\s+",
                r"|browse|current issue|early view|accepted articles",
                r"|subscribe|alert|rss|facebook|twitter|x channel",
                r"|submit an article|journal metrics",
                r"|png\)|jpg\)|gif\)",
            ))?,
            copyright: Regex::new(concat!(
                r"(?i)(?:copyright|©)\s*(?:\d{4}(?:\s*[-–—]\s*\d{4})?)?\s*",
                r"([A-Z][^.!?;]{5,200}?)(?:\.|$)",
            ))?,
            official: Regex::new(concat!(
                r"(?i)(?:official (?:journal|publication) of|published by|on behalf of)",
                r"\s+(?:the\s+)?([A-Z][^.!?;()]{5,100}?)(?:\.|,|\(|$)",
            ))?,
            trailing_verb: Regex::new(r"(?i)\s+(?:aims|seeks|provides|offers|publishes)")?,
            suffixed: Regex::new(concat!(
                r"\b([A-Z][A-Za-z\s&\-,.]+(?:Inc\.?|Ltd\.?|LLC|Corp\.?|Co\.?|Society|Academy",
                r"|Association|Institute|University|Press|Foundation|Group|A/S|GmbH|S\.A\.|PLC))\b",
            ))?,
            markup: Regex::new(r"(?m)^\s*(?:#{1,6}|[-*+])\s+|<[^>]+>|\*\*|`")?,
            copyright_prefix: Regex::new(
                r"(?i)^.*?(?:copyright|©)\s*(?:\d{4}(?:\s*[-–—]\s*\d{4})?)?\s*",
            )?,
            role_prefix: Regex::new(r"(?i)^.*?(?:published by|edited by|official journal of)\s+")?,
            year_range: Regex::new(r"\d{4}\s*[-–—]\s*\d{4}")?,
            year: Regex::new(r"\b\d{4}\b")?,
            related_suffix: Regex::new(r"(?i)\s+(?:or|and)\s+related\s+\w+.*$")?,
            separators: Regex::new(r"[,;:\s]+")?,
            whitespace: Regex::new(r"\s+")?,
            leading_the: Regex::new(r"^the\s+")?,
        })
    }

    /// 分句，返回 (句子, 字节偏移)
    ///
    /// 先按空行分段，再在段内按中英文句末标点切分。英文句点只在
    /// "小写字母 + . + 空白 + 大写字母" 处切分，避免切开 `U.S.`、`Inc.` 之类的缩写。
    /// 不超过 10 个字符的片段丢弃。
    pub fn split_sentences(&self, text: &str) -> Vec<(String, usize)> {
        let mut paragraphs = Vec::new();
        let mut start = 0;
        for m in self.paragraph_break.find_iter(text) {
            paragraphs.push((start, m.start()));
            start = m.end();
        }
        paragraphs.push((start, text.len()));

        let mut sentences = Vec::new();
        for (begin, end) in paragraphs {
            let paragraph = &text[begin..end];
            let mut last = 0;
            for m in self.sentence_end.find_iter(paragraph) {
                if m.as_str().starts_with('.') && !is_sentence_period(paragraph, m.start(), m.end())
                {
                    continue;
                }
                push_sentence(&mut sentences, paragraph, last, m.end(), begin);
                last = m.end();
            }
            push_sentence(&mut sentences, paragraph, last, paragraph.len(), begin);
        }
        sentences
    }

    /// 包含关键短语、且不像导航或列表的句子
    pub fn relevant_sentences(&self, text: &str) -> Vec<RelevantSentence> {
        self.split_sentences(text)
            .into_iter()
            .filter(|(sentence, _)| sentence.chars().count() <= MAX_SENTENCE_CHARS)
            .filter(|(sentence, _)| !self.is_noise(sentence))
            .filter_map(|(sentence, offset)| {
                let keyword = matched_keyword(&sentence)?;
                Some(RelevantSentence {
                    text: sentence,
                    offset,
                    keyword,
                })
            })
            .collect()
    }

    fn is_noise(&self, sentence: &str) -> bool {
        self.noise.is_match(&sentence.to_lowercase())
            || sentence.matches(" + ").count() > 3
            || sentence.matches(" - ").count() > 3
    }

    /// 去掉标题、列表标记与残留标签，空白合并为单个空格
    pub fn plain(&self, text: &str) -> String {
        let stripped = self.markup.replace_all(text, "");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// 清洗机构名称
    ///
    /// 版权类保留 "or related companies" 之类的法律措辞；版权类与出版商类保留逗号
    /// （如 `Sons, Inc`）。清洗后为空或含导航噪音词时返回 `None`。
    pub fn clean_name(&self, raw: &str, kind: InstitutionKind) -> Option<String> {
        let mut name = self.plain(raw);
        for prefix in [&self.copyright_prefix, &self.role_prefix] {
            name = prefix.replace(&name, "").into_owned();
        }
        name = self.year_range.replace_all(&name, "").into_owned();
        name = self.year.replace_all(&name, "").into_owned();
        if kind != InstitutionKind::Copyright {
            name = self.related_suffix.replace(&name, "").into_owned();
        }

        let spacing = match kind {
            InstitutionKind::Copyright | InstitutionKind::Publisher => &self.whitespace,
            InstitutionKind::Host => &self.separators,
        };
        name = spacing.replace_all(&name, " ").into_owned();

        let trimmed = name.trim_matches(|c| matches!(c, ' ' | ',' | '-' | '.'));
        let name = self.leading_the.replace(trimmed, "");
        let name = name.trim();

        let lower = name.to_lowercase();
        if name.is_empty() || NOISE_WORDS.iter().any(|w| lower.contains(w)) {
            return None;
        }
        Some(name.to_string())
    }

    /// 规则抽取
    ///
    /// 依次匹配版权行、"official journal of / published by / on behalf of" 句式、
    /// 以常见机构后缀结尾的名称。
    pub fn extract(&self, text: &str) -> Vec<Institution> {
        let mut found: Vec<Institution> = Vec::new();

        for sentence in self.relevant_sentences(text) {
            let plain = self.plain(&sentence.text);
            let span = CharSpan {
                start: sentence.offset,
                end: sentence.offset + sentence.text.len(),
            };
            let make = |name: String, kind: InstitutionKind| Institution {
                name,
                kind,
                source_sentence: plain.clone(),
                matched_keyword: sentence.keyword.to_string(),
                char_position: Some(span),
                extraction_method: "regexp".to_string(),
            };

            for caps in self.copyright.captures_iter(&sentence.text) {
                let kind = InstitutionKind::Copyright;
                if let Some(name) = self.clean_name(&caps[1], kind) {
                    if name.chars().count() > 3 {
                        found.push(make(name, kind));
                    }
                }
            }

            for caps in self.official.captures_iter(&sentence.text) {
                let raw = caps[1].trim();
                let raw = self.trailing_verb.split(raw).next().unwrap_or(raw);
                let kind = InstitutionKind::infer(&sentence.text, raw);
                if let Some(name) = self.clean_name(raw, kind) {
                    if name.chars().count() > 5 {
                        found.push(make(name, kind));
                    }
                }
            }

            for caps in self.suffixed.captures_iter(&sentence.text) {
                let kind = InstitutionKind::infer(&sentence.text, &caps[1]);
                if let Some(name) = self.clean_name(&caps[1], kind) {
                    if name.chars().count() > 5 && !found.iter().any(|i| i.name == name) {
                        found.push(make(name, kind));
                    }
                }
            }
        }

        dedup_similar(found)
    }
}

/// 句子中第一个出现的关键短语
pub fn matched_keyword(sentence: &str) -> Option<&'static str> {
    let lower = sentence.to_lowercase();
    KEY_PHRASES.iter().copied().find(|p| lower.contains(p))
}

/// 名称互相包含（忽略大小写）的只保留先出现的一个
pub fn dedup_similar(institutions: Vec<Institution>) -> Vec<Institution> {
    let mut kept: Vec<Institution> = Vec::with_capacity(institutions.len());
    for institution in institutions {
        let name = institution.name.to_lowercase();
        let duplicate = kept.iter().any(|k| {
            let seen = k.name.to_lowercase();
            seen.contains(&name) || name.contains(&seen)
        });
        if !duplicate {
            kept.push(institution);
        }
    }
    kept
}

fn is_sentence_period(text: &str, dot: usize, after: usize) -> bool {
    let prev = text[..dot].chars().next_back();
    let next = text[after..].chars().next();
    prev.map_or(false, |c| c.is_ascii_lowercase())
        && next.map_or(false, |c| c.is_ascii_uppercase())
}

fn push_sentence(
    out: &mut Vec<(String, usize)>,
    paragraph: &str,
    from: usize,
    to: usize,
    base: usize,
) {
    let raw = &paragraph[from..to];
    let lead = raw.len() - raw.trim_start().len();
    let sentence = raw.trim();
    if sentence.chars().count() > 10 {
        out.push((sentence.to_string(), base + from + lead));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleExtractor {
        RuleExtractor::new().unwrap()
    }

    #[test]
    fn test_html_to_text_keeps_structure() {
        let html = r#"<html><head><title>Allergy</title><style>.x{color:red}</style>
            <script>var a = 1;</script></head>
            <body><h2>About</h2>
            <p>Allergy is the   official journal of the <b>EAACI</b>.</p>
            <ul><li>Browse</li><li>Submit</li></ul></body></html>"#;

        assert_eq!(
            html_to_text(html),
            "Allergy\n\n## About\n\nAllergy is the official journal of the EAACI.\n\n\
             - Browse\n- Submit"
        );
    }

    #[test]
    fn test_split_sentences_skips_abbreviations() {
        let text =
            "Founded in the U.S. in 1990 by the Society. It is sponsored by the Academy.\n\n短句。";
        let sentences = rules().split_sentences(text);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].0, "Founded in the U.S. in 1990 by the Society.");
        assert_eq!(sentences[0].1, 0);
        assert_eq!(sentences[1].0, "It is sponsored by the Society.");
        assert_eq!(&text[sentences[1].1..sentences[1].1 + 5], "It is");
    }

    #[test]
    fn test_noise_sentences_are_dropped() {
        let rules = rules();
        let text = "Subscribe to alerts published by Example Press today.\n\n\
                    - published by the list item Society\n\n\
                    This journal is published by Example University Press.";
        let relevant = rules.relevant_sentences(text);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].keyword, "university press");
    }

    #[test]
    fn test_extract_official_journal_of() {
        let text = "Allergy, the official journal of the European Academy of Allergy and \
                    Clinical Immunology (EAACI), aims to advance research.";
        let found = rules().extract(text);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "European Academy of Allergy and Clinical Immunology");
        assert_eq!(found[0].kind, InstitutionKind::Host);
        assert_eq!(found[0].matched_keyword, "official journal of");
        assert_eq!(found[0].extraction_method, "regexp");
        assert_eq!(found[0].char_position, Some(CharSpan { start: 0, end: text.len() }));
    }

    #[test]
    fn test_extract_copyright_line_keeps_legal_wording() {
        let text = "Copyright © 1999-2025 John Wiley & Sons, Inc or related companies.";
        let found = rules().extract(text);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, InstitutionKind::Copyright);
        assert_eq!(found[0].name, "John Wiley & Sons, Inc or related companies");
    }

    #[test]
    fn test_clean_name() {
        let rules = rules();
        assert_eq!(
            rules.clean_name("the Chinese Society, 2021", InstitutionKind::Host).as_deref(),
            Some("Chinese Society")
        );
        assert_eq!(
            rules.clean_name("Published by Elsevier B.V.", InstitutionKind::Publisher).as_deref(),
            Some("Elsevier B.V")
        );
        assert_eq!(rules.clean_name("Submit an article", InstitutionKind::Host), None);
        assert_eq!(rules.clean_name(" 2024 ", InstitutionKind::Host), None);
    }

    #[test]
    fn test_infer_kind_priority() {
        assert_eq!(
            InstitutionKind::infer("© Society. Published by Wiley", "Wiley"),
            InstitutionKind::Copyright
        );
        assert_eq!(
            InstitutionKind::infer("Published by Wiley", "Wiley"),
            InstitutionKind::Publisher
        );
        assert_eq!(
            InstitutionKind::infer("On behalf of the Academy", "Academy"),
            InstitutionKind::Host
        );
        assert_eq!(InstitutionKind::parse("Publisher"), InstitutionKind::Publisher);
        assert_eq!(InstitutionKind::parse("sponsor"), InstitutionKind::Host);
    }

    #[test]
    fn test_dedup_similar_keeps_first() {
        let item = |name: &str| Institution {
            name: name.to_string(),
            kind: InstitutionKind::Host,
            source_sentence: String::new(),
            matched_keyword: String::new(),
            char_position: None,
            extraction_method: "regexp".to_string(),
        };
        let kept = dedup_similar(vec![
            item("European Academy of Allergy"),
            item("european academy"),
            item("Wiley"),
        ]);
        let names: Vec<&str> = kept.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["European Academy of Allergy", "Wiley"]);
    }
}
