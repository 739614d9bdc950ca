//! 임베딩 모듈 - 로컬 해시 기반 텍스트 벡터화
//!
//! 텍스트를 고정 길이(768) 벡터로 변환합니다. 네트워크 호출 없이
//! 불용어를 제거한 unigram/bigram을 부호 있는 feature hashing으로 투영합니다.
//! 오프라인 재학습 시 코퍼스에서 IDF 가중치를 학습해 새 모델 버전을 만듭니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HashEmbedding::new(EmbeddingModel::builtin())?;
//! let embedding = embedder.embed("OPEC+ extends production cuts")?;
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NewsError, Result};
use crate::knowledge::EMBEDDING_DIMENSION;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
/// 같은 모델 버전이면 같은 텍스트에 항상 같은 벡터를 반환해야 합니다.
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;

    /// 모델 버전
    fn version(&self) -> &str;
}

// ============================================================================
// Tokenizer
// ============================================================================

/// 불용어 (질의/본문 공통)
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "each", "for", "from", "give", "had", "has", "have", "how", "i", "in",
    "into", "is", "it", "its", "just", "latest", "like", "make", "may", "might", "more", "most",
    "news", "not", "now", "of", "on", "or", "our", "out", "over", "recent", "said", "says",
    "show", "such", "tell", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "to", "today", "too", "very", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you",
];

/// 불용어 여부
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// 텍스트를 소문자 토큰으로 분리 (불용어 제거)
///
/// 영숫자가 아닌 문자는 모두 구분자로 취급합니다. ("OPEC+" -> "opec")
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !is_stop_word(t))
        .collect()
}

// ============================================================================
// Embedding Model Artifact
// ============================================================================

/// 기본 모델 버전
pub const BUILTIN_EMBEDDING_VERSION: &str = "hash-v1";

/// bigram 기본 가중치
const DEFAULT_BIGRAM_WEIGHT: f32 = 0.5;

/// 임베딩 모델 아티팩트
///
/// 서비스 중에는 불변이며, 재학습 시 통째로 교체됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub version: String,
    pub dimension: usize,
    pub bigram_weight: f32,
    /// 토큰별 가중치 (IDF). 없는 토큰은 `default_weight`
    #[serde(default)]
    pub term_weights: HashMap<String, f32>,
    #[serde(default = "default_term_weight")]
    pub default_weight: f32,
}

fn default_term_weight() -> f32 {
    1.0
}

impl EmbeddingModel {
    /// 내장 기본 모델 (가중치 없음)
    pub fn builtin() -> Self {
        Self {
            version: BUILTIN_EMBEDDING_VERSION.to_string(),
            dimension: EMBEDDING_DIMENSION,
            bigram_weight: DEFAULT_BIGRAM_WEIGHT,
            term_weights: HashMap::new(),
            default_weight: 1.0,
        }
    }

    /// 코퍼스에서 IDF 가중치 학습 (smoothed: ln((1+N)/(1+df)) + 1)
    ///
    /// 학습에 없던 토큰은 가장 희귀한 토큰과 같은 가중치를 받습니다.
    pub fn fit<S: AsRef<str>>(texts: &[S], version: impl Into<String>) -> Self {
        let n = texts.len() as f32;
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let unique: HashSet<String> = tokenize(text.as_ref()).into_iter().collect();
            for token in unique {
                *doc_freq.entry(token).or_insert(0) += 1;
            }
        }

        let term_weights: HashMap<String, f32> = doc_freq
            .into_iter()
            .map(|(token, df)| {
                let idf = ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0;
                (token, idf)
            })
            .collect();

        Self {
            version: version.into(),
            dimension: EMBEDDING_DIMENSION,
            bigram_weight: DEFAULT_BIGRAM_WEIGHT,
            term_weights,
            default_weight: (1.0 + n).ln() + 1.0,
        }
    }

    /// JSON 아티팩트 로드
    ///
    /// 실패는 치명적(`ModelUnavailable`)입니다.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NewsError::ModelUnavailable(format!("embedding model {:?}: {}", path, e))
        })?;
        let model: Self = serde_json::from_str(&raw).map_err(|e| {
            NewsError::ModelUnavailable(format!("embedding model {:?}: {}", path, e))
        })?;

        if model.dimension != EMBEDDING_DIMENSION {
            return Err(NewsError::ModelUnavailable(format!(
                "embedding model {:?} has dimension {}, expected {}",
                path, model.dimension, EMBEDDING_DIMENSION
            )));
        }

        Ok(model)
    }

    /// JSON 아티팩트 저장
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn weight(&self, token: &str) -> f32 {
        if self.term_weights.is_empty() {
            return 1.0;
        }
        self.term_weights
            .get(token)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

// ============================================================================
// Hash Embedding
// ============================================================================

/// feature hashing 임베딩 구현체
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    model: EmbeddingModel,
}

impl HashEmbedding {
    pub fn new(model: EmbeddingModel) -> Self {
        Self { model }
    }

    /// 내장 기본 모델로 생성
    pub fn builtin() -> Self {
        Self::new(EmbeddingModel::builtin())
    }

    pub fn model(&self) -> &EmbeddingModel {
        &self.model
    }

    /// 특징 하나를 벡터에 누적 (부호 있는 해싱)
    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash % self.model.dimension as u64) as usize;
        let sign = if (hash >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        vector[index] += sign * weight;
    }
}

impl EmbeddingProvider for HashEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; self.model.dimension];

        // 빈 텍스트는 영벡터
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vector);
        }

        let weights: Vec<f32> = tokens.iter().map(|t| self.model.weight(t)).collect();

        for (token, weight) in tokens.iter().zip(&weights) {
            self.accumulate(&mut vector, token, *weight);
        }

        for (pair, pair_weights) in tokens.windows(2).zip(weights.windows(2)) {
            let feature = format!("{} {}", pair[0], pair[1]);
            let weight = self.model.bigram_weight * (pair_weights[0] * pair_weights[1]).sqrt();
            self.accumulate(&mut vector, &feature, weight);
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.model.dimension
    }

    fn name(&self) -> &str {
        "hash-embedding"
    }

    fn version(&self) -> &str {
        &self.model.version
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// FNV-1a 64bit 해시
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// 벡터 L2 정규화 (영벡터는 그대로)
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
