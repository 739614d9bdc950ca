//! 엔진 설정
//!
//! 우선순위: 기본값 → `<data_dir>/config.json` → 환경 변수
//!
//! | 환경 변수 | 필드 |
//! |-----------|------|
//! | `OILNEWS_DATA_DIR` | `data_dir` |
//! | `OILNEWS_EMBEDDING_MODEL` | `embedding_model` |
//! | `OILNEWS_TOPIC_MODEL` | `topic_model` |
//! | `OILNEWS_ENTITY_MODEL` | `entity_model` |
//! | `OILNEWS_TOPIC_BOOST` | `topic_boost` |
//! | `OILNEWS_KEYWORD_BOOST` | `keyword_boost` |
//! | `OILNEWS_RECENCY_BOOST` | `recency_boost` |
//!
//! 가산점(`*_boost`)은 모두 기본값 0이며, 이때 점수는 순수 유사도입니다.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::get_data_dir;

/// 설정 파일 이름 (데이터 디렉토리 안)
pub const CONFIG_FILE: &str = "config.json";

/// 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 데이터 디렉토리 (DB, 모델 아티팩트)
    pub data_dir: PathBuf,
    /// 임베딩 모델 아티팩트 경로 (없으면 `models/embedding.json` 또는 내장 모델)
    pub embedding_model: Option<PathBuf>,
    /// 토픽 모델 아티팩트 경로
    pub topic_model: Option<PathBuf>,
    /// 엔티티 모델 아티팩트 경로
    pub entity_model: Option<PathBuf>,
    /// 질의 기본 결과 수
    pub default_top_k: usize,
    /// 질의 결과 수 상한
    pub max_top_k: usize,
    /// 질의 토픽과 같은 토픽 기사에 더하는 점수 (0이면 순수 유사도)
    pub topic_boost: f32,
    /// 본문에 등장한 질의 키워드 하나당 가산점
    pub keyword_boost: f32,
    /// 키워드 가산점 상한
    pub max_keyword_boost: f32,
    /// 최근 기사 중 가장 최신 후보 하나에 더하는 점수
    pub recency_boost: f32,
    /// 최신 가산 대상 기간 (일)
    pub recency_window_days: i64,
    /// 후보 풀 크기 = top_k * candidate_factor
    pub candidate_factor: usize,
    /// 임베딩에 쓰는 본문 앞부분 길이 (문자 수)
    pub embed_body_chars: usize,
    /// 결과당 핵심 사실 최대 개수
    pub max_key_facts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            embedding_model: None,
            topic_model: None,
            entity_model: None,
            default_top_k: 5,
            max_top_k: 50,
            topic_boost: 0.0,
            keyword_boost: 0.0,
            max_keyword_boost: 0.20,
            recency_boost: 0.0,
            recency_window_days: 7,
            candidate_factor: 2,
            embed_body_chars: 1000,
            max_key_facts: 3,
        }
    }
}

impl EngineConfig {
    /// 기본값 + 설정 파일 + 환경 변수로 설정 로드
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// 지정된 데이터 디렉토리의 기본 설정
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// 환경 변수 조회 함수를 받아 로드 (테스트에서 프로세스 환경을 건드리지 않도록)
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("OILNEWS_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(get_data_dir);

        let config_path = data_dir.join(CONFIG_FILE);
        let mut config = if config_path.is_file() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        config.data_dir = data_dir;

        config.apply_overrides(lookup)?;
        config.validate()?;

        tracing::debug!("Engine config: {:?}", config);
        Ok(config)
    }

    /// JSON 설정 파일 로드 (없는 필드는 기본값)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config file: {:?}", path))
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path_var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);

        if let Some(path) = path_var("OILNEWS_EMBEDDING_MODEL") {
            self.embedding_model = Some(path);
        }
        if let Some(path) = path_var("OILNEWS_TOPIC_MODEL") {
            self.topic_model = Some(path);
        }
        if let Some(path) = path_var("OILNEWS_ENTITY_MODEL") {
            self.entity_model = Some(path);
        }
        let boost_var = |key: &str| -> Result<Option<f32>> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse()
                        .with_context(|| format!("{} must be a number, got '{}'", key, v))
                })
                .transpose()
        };
        if let Some(boost) = boost_var("OILNEWS_TOPIC_BOOST")? {
            self.topic_boost = boost;
        }
        if let Some(boost) = boost_var("OILNEWS_KEYWORD_BOOST")? {
            self.keyword_boost = boost;
        }
        if let Some(boost) = boost_var("OILNEWS_RECENCY_BOOST")? {
            self.recency_boost = boost;
        }

        Ok(())
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.default_top_k == 0 || self.max_top_k == 0 {
            bail!("default_top_k and max_top_k must be at least 1");
        }
        if self.default_top_k > self.max_top_k {
            bail!(
                "default_top_k ({}) exceeds max_top_k ({})",
                self.default_top_k,
                self.max_top_k
            );
        }
        if self.candidate_factor == 0 {
            bail!("candidate_factor must be at least 1");
        }
        for (name, boost) in [
            ("topic_boost", self.topic_boost),
            ("keyword_boost", self.keyword_boost),
            ("max_keyword_boost", self.max_keyword_boost),
            ("recency_boost", self.recency_boost),
        ] {
            if !boost.is_finite() || !(0.0..=1.0).contains(&boost) {
                bail!("{} must be within [0, 1], got {}", name, boost);
            }
        }
        if self.recency_window_days < 0 {
            bail!("recency_window_days must not be negative");
        }
        Ok(())
    }

    /// SQLite DB 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("news.db")
    }

    /// 재학습 아티팩트 디렉토리
    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }
}

// ============================================================================
// Tests
// ============================================================================
