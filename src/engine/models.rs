//! 모델 레지스트리 - 임베딩/토픽/엔티티 모델 로드와 기사 분석
//!
//! 모델 아티팩트는 시작 시 한 번 로드되어 불변으로 공유됩니다.
//! 재학습은 새 `ModelSet`을 만들어 통째로 교체합니다 (필드 단위 변경 없음).
//!
//! 아티팩트 결정 순서 (모델 종류별):
//! 1. 설정에 지정된 경로 (로드 실패는 치명적)
//! 2. `<data_dir>/models/<kind>.json` (재학습 결과)
//! 3. 내장 기본 모델

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::classifier::{Classification, TopicClassifier};
use crate::config::EngineConfig;
use crate::embedding::{EmbeddingModel, EmbeddingProvider, HashEmbedding};
use crate::error::{NewsError, Result};
use crate::extractor::{EntityExtractor, EntityModel};
use crate::knowledge::{Article, ArticleAnalysis, Entity, TopicLabel};

/// 재학습 아티팩트 파일 이름
pub const EMBEDDING_ARTIFACT: &str = "embedding.json";
pub const TOPIC_ARTIFACT: &str = "topic.json";
pub const ENTITY_ARTIFACT: &str = "entities.json";

/// `model_versions` 테이블의 kind 값
pub const EMBEDDING_KIND: &str = "embedding";
pub const TOPIC_KIND: &str = "topic";
pub const ENTITY_KIND: &str = "entity";

// ============================================================================
// Types
// ============================================================================

/// 현재 서비스 중인 모델 버전
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelVersions {
    pub embedding: String,
    /// 토픽 모델 로드 실패 시 `None`
    pub topic: Option<String>,
    pub entity: String,
}

/// 모델 묶음 (프로세스 전역, 읽기 전용)
pub struct ModelSet {
    embedder: Box<dyn EmbeddingProvider>,
    classifier: Option<TopicClassifier>,
    extractor: EntityExtractor,
}

impl ModelSet {
    pub fn new(
        embedder: Box<dyn EmbeddingProvider>,
        classifier: Option<TopicClassifier>,
        extractor: EntityExtractor,
    ) -> Self {
        Self {
            embedder,
            classifier,
            extractor,
        }
    }

    /// 내장 기본 모델
    pub fn builtin() -> Result<Self> {
        let embedder = HashEmbedding::builtin();
        let classifier = TopicClassifier::seeded(&embedder)?;
        Ok(Self::new(
            Box::new(embedder),
            Some(classifier),
            EntityExtractor::builtin()?,
        ))
    }

    /// 설정에 따라 모델 로드
    ///
    /// 임베딩/엔티티 모델 실패는 `ModelUnavailable`(치명적)입니다.
    /// 토픽 모델 실패는 경고 후 분류기 없이 동작합니다 (모든 기사 `other`).
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let models_dir = config.models_dir();

        let embedding_model =
            match resolve_artifact(&config.embedding_model, &models_dir, EMBEDDING_ARTIFACT) {
                Some(path) => EmbeddingModel::load(&path).map_err(|e| {
                    tracing::error!("Failed to load embedding model: {}", e);
                    e
                })?,
                None => EmbeddingModel::builtin(),
            };
        let embedder = HashEmbedding::new(embedding_model);

        let entity_model =
            match resolve_artifact(&config.entity_model, &models_dir, ENTITY_ARTIFACT) {
                Some(path) => EntityModel::load(&path).map_err(|e| {
                    tracing::error!("Failed to load entity model: {}", e);
                    e
                })?,
                None => EntityModel::builtin(),
            };
        let extractor = EntityExtractor::new(&entity_model)?;

        let classifier = match load_classifier(config, &models_dir, &embedder) {
            Ok(classifier) => Some(classifier),
            Err(e) => {
                tracing::warn!("Topic classifier unavailable, falling back to 'other': {}", e);
                None
            }
        };

        let models = Self::new(Box::new(embedder), classifier, extractor);
        tracing::info!("Models loaded: {:?}", models.versions());
        Ok(models)
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn classifier(&self) -> Option<&TopicClassifier> {
        self.classifier.as_ref()
    }

    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    pub fn classifier_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn versions(&self) -> ModelVersions {
        ModelVersions {
            embedding: self.embedder.version().to_string(),
            topic: self.classifier.as_ref().map(|c| c.version.clone()),
            entity: self.extractor.version().to_string(),
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text)
    }

    /// 토픽 분류 (분류기가 없으면 `other`, 신뢰도 0)
    pub fn classify(&self, vector: &[f32]) -> Classification {
        match &self.classifier {
            Some(classifier) => classifier.classify(vector),
            None => Classification {
                label: TopicLabel::Other,
                confidence: 0.0,
            },
        }
    }

    /// 엔티티 추출 (실패 시 빈 집합)
    pub fn extract_entities(&self, text: &str) -> Vec<Entity> {
        match self.extractor.extract(text) {
            Ok(entities) => entities,
            Err(e) => {
                tracing::warn!("Entity extraction failed, storing empty set: {}", e);
                Vec::new()
            }
        }
    }

    /// 기사 하나의 파생 필드 계산 (임베딩 → 토픽 → 엔티티)
    pub fn analyze(&self, title: &str, body: &str, body_chars: usize) -> Result<ArticleAnalysis> {
        let embedding = self.embed(&Article::embedding_text(title, body, body_chars))?;
        if embedding.len() != self.embedder.dimension() {
            return Err(NewsError::ModelUnavailable(format!(
                "embedding has dimension {}, expected {}",
                embedding.len(),
                self.embedder.dimension()
            )));
        }

        let classification = self.classify(&embedding);
        let entities = self.extract_entities(&format!("{}\n{}", title, body));

        Ok(ArticleAnalysis {
            embedding,
            topic: classification.label,
            topic_confidence: classification.confidence,
            entities,
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 설정 경로 → 재학습 아티팩트 → 없음(내장) 순서로 결정
fn resolve_artifact(explicit: &Option<PathBuf>, models_dir: &Path, file: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.clone());
    }
    let path = models_dir.join(file);
    path.is_file().then_some(path)
}

fn load_classifier(
    config: &EngineConfig,
    models_dir: &Path,
    embedder: &HashEmbedding,
) -> Result<TopicClassifier> {
    let Some(path) = resolve_artifact(&config.topic_model, models_dir, TOPIC_ARTIFACT) else {
        return TopicClassifier::seeded(embedder);
    };

    let classifier = TopicClassifier::load(&path)?;
    let dimension = embedder.dimension();
    if classifier.centroids.values().any(|c| c.len() != dimension) {
        return Err(NewsError::ModelUnavailable(format!(
            "topic model {:?} centroids do not match embedding dimension {}",
            path, dimension
        )));
    }

    Ok(classifier)
}

// ============================================================================
// Tests
// ============================================================================
