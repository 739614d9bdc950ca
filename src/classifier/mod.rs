//! 토픽 분류기 - 임베딩 벡터를 토픽 라벨로 분류
//!
//! 토픽별 센트로이드와의 코사인 유사도에 softmax를 적용한 nearest-centroid 분류기입니다.
//! `other`는 고정 로짓(임계값)을 가지므로 어떤 토픽도 우세하지 않으면 `other`가 됩니다.
//!
//! 학습은 오프라인 배치에서만 수행합니다:
//! 1. 키워드 규칙으로 약한 라벨 부여 (`weak_label`)
//! 2. 라벨별 임베딩 평균으로 센트로이드 계산 (`TopicClassifier::train`)

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::embedding::{l2_normalize, tokenize, EmbeddingProvider};
use crate::error::{NewsError, Result};
use crate::knowledge::{cosine_similarity, TopicLabel};

/// softmax 온도
const DEFAULT_TEMPERATURE: f32 = 0.05;

/// `other` 클래스의 고정 유사도
const DEFAULT_OTHER_THRESHOLD: f32 = 0.05;

/// 동률 판정 epsilon
const TIE_EPSILON: f32 = 1e-6;

/// 센트로이드 학습에 필요한 최소 샘플 수
const MIN_SAMPLES_PER_CLASS: usize = 2;

// ============================================================================
// Seed Keywords
// ============================================================================

/// 토픽별 시드 키워드
///
/// 기본 센트로이드와 약한 라벨링 규칙에 함께 쓰입니다.
pub fn seed_keywords(label: TopicLabel) -> &'static [&'static str] {
    match label {
        TopicLabel::PriceMarket => &[
            "price", "prices", "oil price", "crude", "brent", "wti", "barrel", "futures",
            "market", "markets", "trading", "traders", "demand", "supply", "rally", "surge",
            "slump", "drop", "gain", "fell", "rose", "benchmark", "inventories",
        ],
        TopicLabel::Production => &[
            "production", "output", "drilling", "well", "wells", "rig", "rigs", "rig count",
            "bpd", "barrels per day", "shale", "reservoir", "pump", "onshore", "upstream",
            "fracking", "completions", "mcf", "boe",
        ],
        TopicLabel::PipelineLng => &[
            "pipeline", "pipelines", "lng", "liquefied", "natural gas", "terminal", "export",
            "exports", "import", "imports", "tanker", "tankers", "shipping", "cargo",
            "regasification", "midstream", "capacity", "transport",
        ],
        TopicLabel::Corporate => &[
            "merger", "acquisition", "acquire", "deal", "ceo", "company", "earnings", "profit",
            "loss", "revenue", "quarterly", "shares", "stock", "dividend", "investors",
            "buyback", "ipo", "shareholders",
        ],
        TopicLabel::Geopolitics => &[
            "opec", "cartel", "saudi", "arabia", "russia", "iran", "iraq", "venezuela",
            "sanctions", "sanction", "embargo", "war", "conflict", "tensions", "diplomacy",
            "middle east", "cuts", "quota", "quotas", "alliance", "voluntary", "agreed",
            "ministers",
        ],
        TopicLabel::Regulation => &[
            "regulation", "regulations", "regulator", "legislative", "legislation", "epa",
            "compliance", "environmental", "emissions", "methane", "carbon", "climate",
            "policy", "rules", "permitting", "tax", "royalty", "mandate", "standards",
        ],
        TopicLabel::Exploration => &[
            "discovery", "discovered", "exploration", "explore", "seismic", "survey",
            "prospect", "reserves", "basin", "field", "block", "license", "acreage",
            "deepwater", "appraisal", "wildcat", "spud", "find",
        ],
        TopicLabel::Other => &[],
    }
}

/// 키워드 규칙 기반 약한 라벨링
///
/// 토큰 단위로 시드 키워드 매칭 수를 세고, 최다 매칭 토픽을 반환합니다.
/// 매칭이 없으면 `Other`, 동률이면 사전순 첫 라벨입니다.
pub fn weak_label(text: &str) -> TopicLabel {
    let tokens = tokenize(text);
    let joined = format!(" {} ", tokens.join(" "));

    let mut best: Option<(TopicLabel, usize)> = None;
    for label in TopicLabel::TOPICAL {
        let score = seed_keywords(label)
            .iter()
            .filter(|kw| joined.contains(&format!(" {} ", kw)))
            .count();
        if score == 0 {
            continue;
        }
        best = match best {
            Some((current, current_score))
                if current_score > score
                    || (current_score == score && current.as_str() < label.as_str()) =>
            {
                Some((current, current_score))
            }
            _ => Some((label, score)),
        };
    }

    best.map(|(label, _)| label).unwrap_or(TopicLabel::Other)
}

// ============================================================================
// Topic Classifier
// ============================================================================

/// 분류 결과
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub label: TopicLabel,
    /// 최고 클래스의 확률 (0~1)
    pub confidence: f32,
}

/// nearest-centroid 토픽 분류기 (모델 아티팩트)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicClassifier {
    pub version: String,
    pub temperature: f32,
    pub other_threshold: f32,
    pub centroids: HashMap<TopicLabel, Vec<f32>>,
}

/// 기본 분류기 버전
pub const BUILTIN_CLASSIFIER_VERSION: &str = "seed-v1";

impl TopicClassifier {
    /// 시드 키워드 임베딩으로 기본 분류기 생성
    pub fn seeded(embedder: &dyn EmbeddingProvider) -> Result<Self> {
        let mut centroids = HashMap::new();
        for label in TopicLabel::TOPICAL {
            centroids.insert(label, seed_centroid(embedder, label)?);
        }

        Ok(Self {
            version: BUILTIN_CLASSIFIER_VERSION.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            other_threshold: DEFAULT_OTHER_THRESHOLD,
            centroids,
        })
    }

    /// 라벨된 임베딩으로 학습
    ///
    /// 샘플이 부족한 클래스는 시드 센트로이드를 유지합니다.
    pub fn train(
        samples: &[(Vec<f32>, TopicLabel)],
        embedder: &dyn EmbeddingProvider,
        version: impl Into<String>,
    ) -> Result<Self> {
        let dimension = embedder.dimension();
        let mut sums: HashMap<TopicLabel, (Vec<f32>, usize)> = HashMap::new();

        for (vector, label) in samples {
            if *label == TopicLabel::Other || vector.len() != dimension {
                continue;
            }
            let entry = sums
                .entry(*label)
                .or_insert_with(|| (vec![0.0; dimension], 0));
            for (acc, x) in entry.0.iter_mut().zip(vector) {
                *acc += x;
            }
            entry.1 += 1;
        }

        let mut centroids = HashMap::new();
        for label in TopicLabel::TOPICAL {
            let centroid = match sums.remove(&label) {
                Some((mut sum, count)) if count >= MIN_SAMPLES_PER_CLASS => {
                    l2_normalize(&mut sum);
                    sum
                }
                _ => {
                    tracing::debug!("Topic {} has too few samples, keeping seed centroid", label);
                    seed_centroid(embedder, label)?
                }
            };
            centroids.insert(label, centroid);
        }

        Ok(Self {
            version: version.into(),
            temperature: DEFAULT_TEMPERATURE,
            other_threshold: DEFAULT_OTHER_THRESHOLD,
            centroids,
        })
    }

    /// JSON 아티팩트 로드
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NewsError::ModelUnavailable(format!("topic model {:?}: {}", path, e)))?;
        let model: Self = serde_json::from_str(&raw)
            .map_err(|e| NewsError::ModelUnavailable(format!("topic model {:?}: {}", path, e)))?;

        if model.temperature <= 0.0 {
            return Err(NewsError::ModelUnavailable(format!(
                "topic model {:?} has non-positive temperature",
                path
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

    /// 벡터를 토픽으로 분류
    ///
    /// 라벨은 항상 고정 8개 중 하나이며, 동률은 사전순 첫 라벨로 결정합니다.
    pub fn classify(&self, vector: &[f32]) -> Classification {
        let mut logits: Vec<(TopicLabel, f32)> = TopicLabel::TOPICAL
            .iter()
            .map(|label| {
                let similarity = self
                    .centroids
                    .get(label)
                    .map(|c| cosine_similarity(vector, c))
                    .unwrap_or(0.0);
                (*label, similarity / self.temperature)
            })
            .collect();
        logits.push((TopicLabel::Other, self.other_threshold / self.temperature));

        let max = logits
            .iter()
            .map(|(_, l)| *l)
            .fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<(TopicLabel, f32)> = logits
            .iter()
            .map(|(label, l)| (*label, (l - max).exp()))
            .collect();
        let total: f32 = exps.iter().map(|(_, e)| e).sum();

        let mut best = Classification {
            label: TopicLabel::Other,
            confidence: 0.0,
        };
        let mut first = true;
        for (label, e) in exps {
            let p = e / total;
            let better = first
                || p > best.confidence + TIE_EPSILON
                || ((p - best.confidence).abs() <= TIE_EPSILON
                    && label.as_str() < best.label.as_str());
            if better {
                best = Classification {
                    label,
                    confidence: p,
                };
            }
            first = false;
        }

        best
    }
}

/// 시드 키워드 임베딩 합으로 센트로이드 생성
fn seed_centroid(embedder: &dyn EmbeddingProvider, label: TopicLabel) -> Result<Vec<f32>> {
    let mut centroid = vec![0.0; embedder.dimension()];
    for keyword in seed_keywords(label) {
        let v = embedder.embed(keyword)?;
        for (acc, x) in centroid.iter_mut().zip(&v) {
            *acc += x;
        }
    }
    l2_normalize(&mut centroid);
    Ok(centroid)
}

// ============================================================================
// Tests
// ============================================================================
