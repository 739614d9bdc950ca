//! Article 타입 - 기사 레코드와 파생 필드
//!
//! 스크래퍼가 넘겨주는 원본 레코드(`RawArticle`), 검증/정규화된 미처리 기사(`NewArticle`),
//! 완전히 처리된 기사(`Article`)를 구분합니다.
//! 저장소에는 처리 완료된 기사만 들어가므로 "부분 처리" 상태는 타입으로 존재하지 않습니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{NewsError, Result};

/// 임베딩 벡터 차원
pub const EMBEDDING_DIMENSION: usize = 768;

// ============================================================================
// Topic Label
// ============================================================================

/// 토픽 카테고리 (닫힌 집합, `Other`가 필수 폴백)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicLabel {
    PriceMarket,
    Production,
    PipelineLng,
    Corporate,
    Geopolitics,
    Regulation,
    Exploration,
    Other,
}

impl TopicLabel {
    /// 전체 라벨 목록
    pub const ALL: [TopicLabel; 8] = [
        TopicLabel::PriceMarket,
        TopicLabel::Production,
        TopicLabel::PipelineLng,
        TopicLabel::Corporate,
        TopicLabel::Geopolitics,
        TopicLabel::Regulation,
        TopicLabel::Exploration,
        TopicLabel::Other,
    ];

    /// 센트로이드를 가지는 토픽 라벨 (`Other` 제외)
    pub const TOPICAL: [TopicLabel; 7] = [
        TopicLabel::PriceMarket,
        TopicLabel::Production,
        TopicLabel::PipelineLng,
        TopicLabel::Corporate,
        TopicLabel::Geopolitics,
        TopicLabel::Regulation,
        TopicLabel::Exploration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicLabel::PriceMarket => "price_market",
            TopicLabel::Production => "production",
            TopicLabel::PipelineLng => "pipeline_lng",
            TopicLabel::Corporate => "corporate",
            TopicLabel::Geopolitics => "geopolitics",
            TopicLabel::Regulation => "regulation",
            TopicLabel::Exploration => "exploration",
            TopicLabel::Other => "other",
        }
    }
}

impl fmt::Display for TopicLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicLabel {
    type Err = NewsError;

    fn from_str(s: &str) -> Result<Self> {
        TopicLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s.trim())
            .ok_or_else(|| NewsError::Store(format!("Unknown topic label: {}", s)))
    }
}

// ============================================================================
// Entities
// ============================================================================

/// 엔티티 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Organization,
    Location,
    MonetaryValue,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Organization => "organization",
            EntityKind::Location => "location",
            EntityKind::MonetaryValue => "monetary-value",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 추출된 엔티티
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// 본문에 나타난 원문 텍스트 (첫 등장)
    pub span: String,
    pub kind: EntityKind,
    /// 정규화된 표준형 (중복 제거 키)
    pub normalized: String,
}

// ============================================================================
// Articles
// ============================================================================

/// 스크래퍼가 전달하는 원본 기사 레코드
///
/// 원본 CSV 컬럼명(`content`, `link`)도 허용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawArticle {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(alias = "link")]
    pub url: String,
    #[serde(alias = "content")]
    pub body: String,
}

/// 검증/정규화는 끝났지만 아직 처리되지 않은 기사
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub id: String,
    pub source: String,
    pub title: String,
    pub published_on: Option<NaiveDate>,
    pub url: String,
    /// 중복 판정용 정규화 URL
    pub url_key: String,
    /// 중복 판정용 본문 해시
    pub content_hash: String,
    pub body: String,
}

/// 기사의 파생 필드 (임베딩, 토픽, 엔티티)
///
/// 항상 한 덩어리로 붙거나 없거나 둘 중 하나입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    pub embedding: Vec<f32>,
    pub topic: TopicLabel,
    pub topic_confidence: f32,
    pub entities: Vec<Entity>,
}

/// 처리 완료된 기사
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub source: String,
    pub title: String,
    pub published_on: Option<NaiveDate>,
    pub url: String,
    pub body: String,
    pub analysis: ArticleAnalysis,
    pub ingested_at: DateTime<Utc>,
}

impl Article {
    pub fn topic(&self) -> TopicLabel {
        self.analysis.topic
    }

    pub fn embedding(&self) -> &[f32] {
        &self.analysis.embedding
    }

    /// 임베딩 입력 텍스트 (제목 + 본문 앞부분)
    pub fn embedding_text(title: &str, body: &str, body_chars: usize) -> String {
        let head: String = body.chars().take(body_chars).collect();
        if title.trim().is_empty() {
            head
        } else {
            format!("{}. {}", title.trim(), head)
        }
    }
}

// ============================================================================
// Deduplication Keys
// ============================================================================

/// 추적용 쿼리 파라미터 (URL 정규화 시 제거)
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref"];

/// URL 정규화 (중복 판정 키)
///
/// 스킴과 `www.` 접두어, 프래그먼트, 추적 파라미터, 끝 슬래시를 무시합니다.
/// 호스트는 `url` 크레이트가 이미 소문자로 만듭니다.
pub fn normalize_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| NewsError::Ingestion(format!("Invalid URL '{}': {}", raw, e)))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| NewsError::Ingestion(format!("URL has no host: {}", raw)))?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    let path = parsed.path().trim_end_matches('/');

    let query: Vec<String> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let mut key = format!("{}{}", host, path);
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query.join("&"));
    }

    Ok(key)
}

/// 본문 콘텐츠 해시 (대소문자/공백 차이 무시)
pub fn content_hash(body: &str) -> String {
    let normalized = body
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Tests
// ============================================================================
