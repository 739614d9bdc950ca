//! 피드 모듈 - 스크래퍼 출력 읽기와 본문 정리
//!
//! 스크래퍼가 남긴 기사 레코드를 파일/폴더에서 읽어 `RawArticle`로 만듭니다.
//! 지원 형식: CSV (`title, content, date, source, link`), JSON 배열, JSONL.
//! 폴더는 .gitignore 패턴을 존중하며 재귀 수집합니다.
//!
//! 본문 정리(`BodyCleaner`)와 날짜 표준화(`parse_publication_date`)는
//! 수집 파이프라인에서 기사마다 호출됩니다.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use ignore::WalkBuilder;
use regex::Regex;
use scraper::Html;

use crate::error::NewsError;
use crate::knowledge::RawArticle;

// ============================================================================
// Feed Formats
// ============================================================================

/// 지원하는 피드 파일 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Csv,
    Json,
    JsonLines,
}

impl FeedFormat {
    /// 확장자로 형식 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(FeedFormat::Csv),
            "json" => Some(FeedFormat::Json),
            "jsonl" | "ndjson" => Some(FeedFormat::JsonLines),
            _ => None,
        }
    }

    /// 파일 경로에서 형식 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

// ============================================================================
// Feed Reader
// ============================================================================

/// 피드 읽기 설정
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 256 * 1024 * 1024, // 256MB
        }
    }
}

/// 피드 리더
pub struct FeedReader {
    config: FeedConfig,
}

impl FeedReader {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(FeedConfig::default())
    }

    /// 파일 또는 폴더에서 기사 읽기
    pub fn read_path(&self, path: &Path) -> Result<Vec<RawArticle>> {
        if path.is_dir() {
            self.read_directory(path)
        } else {
            self.read_file(path)
        }
    }

    /// 단일 피드 파일 읽기
    pub fn read_file(&self, path: &Path) -> Result<Vec<RawArticle>> {
        if !path.is_file() {
            anyhow::bail!("Feed file not found: {:?}", path);
        }

        let format = FeedFormat::from_path(path)
            .with_context(|| format!("Unsupported feed format: {:?}", path))?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed file: {:?}", path))?;

        let articles = parse_feed(format, &content)
            .with_context(|| format!("Failed to parse feed file: {:?}", path))?;

        tracing::info!("Read {} raw articles from {:?}", articles.len(), path);
        Ok(articles)
    }

    /// 폴더 재귀 읽기 (지원 형식 파일만)
    pub fn read_directory(&self, path: &Path) -> Result<Vec<RawArticle>> {
        if !path.is_dir() {
            anyhow::bail!("Not a directory: {:?}", path);
        }

        let mut articles = Vec::new();
        for file in self.collect_files(path) {
            match self.read_file(&file) {
                Ok(mut batch) => articles.append(&mut batch),
                Err(e) => tracing::warn!("Skipping feed file {:?}: {:#}", file, e),
            }
        }

        Ok(articles)
    }

    /// ignore 크레이트로 .gitignore 지원
    fn collect_files(&self, root: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(root)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            if FeedFormat::from_path(entry.path()).is_none() {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if self.config.max_file_size > 0 && size > self.config.max_file_size {
                tracing::debug!("Skipping large feed file: {:?} ({} bytes)", entry.path(), size);
                continue;
            }

            files.push(entry.path().to_path_buf());
        }

        files
    }
}

/// 형식별 파싱
///
/// CSV/JSONL은 깨진 레코드를 건너뛰고 나머지를 살립니다.
pub fn parse_feed(format: FeedFormat, content: &str) -> Result<Vec<RawArticle>> {
    match format {
        FeedFormat::Json => {
            let articles: Vec<RawArticle> =
                serde_json::from_str(content).context("Invalid JSON article array")?;
            Ok(articles)
        }
        FeedFormat::JsonLines => {
            let mut articles = Vec::new();
            for (i, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawArticle>(line) {
                    Ok(article) => articles.push(article),
                    Err(e) => tracing::warn!("Skipping JSONL line {}: {}", i + 1, e),
                }
            }
            Ok(articles)
        }
        FeedFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .trim(csv::Trim::Headers)
                .from_reader(content.as_bytes());

            let mut articles = Vec::new();
            for (i, record) in reader.deserialize::<RawArticle>().enumerate() {
                match record {
                    Ok(article) => articles.push(article),
                    Err(e) => tracing::warn!("Skipping CSV record {}: {}", i + 1, e),
                }
            }
            Ok(articles)
        }
    }
}

// ============================================================================
// Body Cleaning
// ============================================================================

/// 본문 중간에서 제거할 잡음 패턴
const JUNK_PATTERNS: &[&str] = &[
    r"(?i)Covering the operations of the oil and gas industry\s*",
    r"(?is)This content is sponsored by:.*$",
    r"(?is)Click the button to Download!.*$",
    r"(?is)Privacy Policy \| Terms of Use.*$",
    r"(?i)(?:Reuters|Newsfile Corp|Business Wire|PR Newswire|GlobeNewswire)\s*\d*\s*Comments?\s*",
    r"(?i)Get the Latest US Focused Energy News Delivered to You!.*?Quick Sign-Up Here",
    r"(?i)It's FREE: Quick Sign-Up Here",
    r"(?i)More News Articles\s*",
    r"(?i),?\s*opens new tab",
    r"(?i)Purchase Licensing Rights",
    r"(?i)\bvia REUTERS\b",
    r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+",
    // 인코딩 잔재
    r"Â\s*",
    r"&#\d+;",
];

/// 본문 끝에 붙는 구독/저작권 문구
const TRAILING_PATTERNS: &[&str] = &[
    r"(?i)\s*Sign up for.*$",
    r"(?i)\s*Successfully subscribed.*$",
    r"(?i)\s*BOE Network.*$",
    r"(?i)\s*© \d{4}.*$",
    r"(?i)\s*Email\s*X?\s*$",
];

/// 기사 본문 정리기
///
/// HTML 잔재 제거 → 잡음 패턴 제거 → 공백 정리 → 끝부분 구독 문구 제거 순서입니다.
#[derive(Debug, Clone)]
pub struct BodyCleaner {
    markup: Regex,
    junk: Vec<Regex>,
    trailing: Vec<Regex>,
}

impl BodyCleaner {
    pub fn new() -> crate::error::Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| NewsError::Ingestion(format!("body cleaner pattern: {}", e)))
        };

        Ok(Self {
            markup: compile(r"<[a-zA-Z/!][^>]*>")?,
            junk: JUNK_PATTERNS.iter().map(|p| compile(p)).collect::<Result<_, _>>()?,
            trailing: TRAILING_PATTERNS.iter().map(|p| compile(p)).collect::<Result<_, _>>()?,
        })
    }

    /// 본문 정리 (결과가 비어 있을 수 있음)
    pub fn clean(&self, raw: &str) -> String {
        let mut text = if self.markup.is_match(raw) {
            html_to_text(raw)
        } else {
            raw.to_string()
        };

        text = text.replace('\u{a0}', " ");
        for pattern in &self.junk {
            text = pattern.replace_all(&text, " ").into_owned();
        }

        let mut text = collapse_whitespace(&text);
        for pattern in &self.trailing {
            text = pattern.replace(&text, "").into_owned();
        }

        text.trim().to_string()
    }
}

/// HTML 조각에서 텍스트만 추출 (script/style 제외)
fn html_to_text(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let mut parts: Vec<&str> = Vec::new();

    for node in fragment.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let in_code = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .map(|name| matches!(name, "script" | "style" | "noscript"))
            .unwrap_or(false);
        if in_code {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    parts.join(" ")
}

/// 연속 공백 정리
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Date Standardization
// ============================================================================

/// 시도할 날짜 형식 (순서대로)
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",  // 2025-12-20
    "%B %d, %Y", // December 20, 2025
    "%b %d, %Y", // Dec 20, 2025
    "%b. %d, %Y", // Dec. 20, 2025
    "%d %B %Y",  // 20 December 2025
    "%d %b %Y",  // 20 Dec 2025
    "%m/%d/%Y",  // 12/20/2025
    "%d/%m/%Y",  // 20/12/2025
    "%Y/%m/%d",  // 2025/12/20
    "%B %d %Y",  // December 20 2025
    "%b %d %Y",  // Dec 20 2025
    "%Y-%b-%d",  // 2025-Dec-19
];

// 긴 문자열에 들어 있는 날짜용 (한 번만 컴파일)
static EMBEDDED_MONTH_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_date_pattern(
        r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\.?\s+(\d{1,2}),?\s+(\d{4})\b",
    )
});
static EMBEDDED_ISO_DATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_date_pattern(r"\b(\d{4})-(\d{2})-(\d{2})"));

fn compile_date_pattern(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| tracing::error!("Invalid date pattern {:?}: {}", pattern, e))
        .ok()
}

/// 다양한 날짜 문자열을 날짜로 변환
///
/// 해석할 수 없으면 `None` (정렬 시 가장 오래된 기사로 취급)입니다.
pub fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    // 긴 문자열 안에 들어 있는 날짜 ("Dec 19, 2025 at 12:40")
    if let Some(re) = EMBEDDED_MONTH_DATE.as_ref() {
        if let Some(caps) = re.captures(s) {
            let candidate = format!("{} {} {}", &caps[1], &caps[2], &caps[3]);
            for format in ["%B %d %Y", "%b %d %Y"] {
                if let Ok(date) = NaiveDate::parse_from_str(&candidate, format) {
                    return Some(date);
                }
            }
        }
    }

    if let Some(re) = EMBEDDED_ISO_DATE.as_ref() {
        if let Some(caps) = re.captures(s) {
            let candidate = format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]);
            if let Ok(date) = NaiveDate::parse_from_str(&candidate, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }

    tracing::debug!("Could not parse publication date '{}'", s);
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_feed_format_from_extension() {
        assert_eq!(FeedFormat::from_extension("csv"), Some(FeedFormat::Csv));
        assert_eq!(FeedFormat::from_extension("JSON"), Some(FeedFormat::Json));
        assert_eq!(FeedFormat::from_extension("jsonl"), Some(FeedFormat::JsonLines));
        assert_eq!(FeedFormat::from_extension("pdf"), None);
    }

    #[test]
    fn test_parse_publication_date_formats() {
        let expected = ymd(2025, 12, 20);
        for raw in [
            "2025-12-20",
            "December 20, 2025",
            "Dec 20, 2025",
            "Dec. 20, 2025",
            "20 December 2025",
            "20 Dec 2025",
            "12/20/2025",
            "2025/12/20",
            "2025-12-20T08:30:00Z",
            "Dec 20, 2025 at 12:40",
            "Published: 2025-12-20 14:00",
        ] {
            assert_eq!(parse_publication_date(raw), expected, "input: {}", raw);
        }
        assert_eq!(parse_publication_date("2025-Dec-19"), ymd(2025, 12, 19));
    }

    #[test]
    fn test_embedded_date_patterns_compile() {
        assert!(EMBEDDED_MONTH_DATE.is_some());
        assert!(EMBEDDED_ISO_DATE.is_some());
    }

    #[test]
    fn test_parse_publication_date_unknown() {
        assert_eq!(parse_publication_date(""), None);
        assert_eq!(parse_publication_date("yesterday"), None);
        assert_eq!(parse_publication_date("2025-13-45"), None);
    }

    #[test]
    fn test_clean_body_strips_html_and_boilerplate() {
        let cleaner = BodyCleaner::new().unwrap();
        let raw = "<p>Brent rose&nbsp;2%.</p><script>var x = 1;</script>\
                   <p>Traders watched OPEC+.</p> Sign up for the BOE Report newsletter";
        assert_eq!(cleaner.clean(raw), "Brent rose 2%. Traders watched OPEC+.");
    }

    #[test]
    fn test_clean_body_plain_text() {
        let cleaner = BodyCleaner::new().unwrap();
        assert_eq!(
            cleaner.clean("Output  rose\u{a0}Â to 1.2 million bpd.\n\n© 2025 Example Ltd. All rights"),
            "Output rose to 1.2 million bpd."
        );
        assert_eq!(cleaner.clean("   \n "), "");
        assert_eq!(cleaner.clean("Contact news@example.com for details"), "Contact for details");
    }

    #[test]
    fn test_parse_csv_feed() {
        let csv = "title,content,date,source,link\n\
                   OPEC+ Maintains Cuts,\"OPEC+ agreed, again.\",2025-12-20,reuters,https://example.com/a\n\
                   ,Body only,,boereport,https://example.com/b\n";
        let articles = parse_feed(FeedFormat::Csv, csv).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "OPEC+ Maintains Cuts");
        assert_eq!(articles[0].body, "OPEC+ agreed, again.");
        assert_eq!(articles[0].url, "https://example.com/a");
        assert_eq!(articles[0].date.as_deref(), Some("2025-12-20"));
        assert_eq!(articles[1].title, "");
        assert_eq!(articles[1].date, None);
    }

    #[test]
    fn test_parse_jsonl_skips_broken_lines() {
        let jsonl = r#"{"source":"a","title":"t","url":"https://x.com/1","body":"one"}
not json
{"source":"b","title":"u","link":"https://x.com/2","content":"two","date":"Dec 1, 2025"}
"#;
        let articles = parse_feed(FeedFormat::JsonLines, jsonl).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[1].url, "https://x.com/2");
        assert_eq!(articles[1].body, "two");
    }

    #[test]
    fn test_read_directory_recursively() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("reuters");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(
            dir.path().join("articles.json"),
            r#"[{"source":"a","title":"t","url":"https://x.com/1","body":"one"}]"#,
        )
        .unwrap();
        std::fs::write(
            nested.join("articles.csv"),
            "title,content,date,source,link\nT,Two,,reuters,https://x.com/2\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let reader = FeedReader::with_defaults();
        let articles = reader.read_path(dir.path()).unwrap();
        assert_eq!(articles.len(), 2);

        assert!(reader.read_file(&dir.path().join("notes.txt")).is_err());
        assert!(reader.read_path(&dir.path().join("missing.csv")).is_err());
    }
}
