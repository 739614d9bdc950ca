//! Query Engine - 수집/질의 파이프라인 오케스트레이터
//!
//! 수집: 원본 레코드 검증/정리 → 중복 판정 → 임베딩 → 토픽 → 엔티티 → 저장
//!       → 배치가 끝나면 인덱스 스냅샷 재구성 후 교체
//! 질의: 임베딩 → 질의 토픽 분류 → 후보 검색 → 답변 합성 → 랭킹 → 반환
//!
//! 모델과 인덱스는 하나의 `ServingState`로 묶여 포인터 교체로만 바뀝니다.
//! 질의는 시작 시점의 스냅샷 하나만 보며 SQLite를 건드리지 않습니다.
//! 쓰기(수집 배치, 재학습)는 writer 락으로 직렬화됩니다.

mod models;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{NaiveDate, Utc};
use serde::{Serialize, Serializer};

use crate::answer::{lead_sentence, query_keywords, AnswerSynthesizer};
use crate::classifier::{weak_label, TopicClassifier};
use crate::config::EngineConfig;
use crate::embedding::{EmbeddingModel, EmbeddingProvider, HashEmbedding};
use crate::error::{NewsError, Result};
use crate::feed::{parse_publication_date, BodyCleaner};
use crate::knowledge::{
    content_hash, normalize_url, recency_then_id, Article, ArticleAnalysis, ArticleStore, Entity,
    IndexSnapshot, Neighbor, NewArticle, RawArticle, StoreOutcome, StoreStats, TopicLabel,
};

pub use models::{
    ModelSet, ModelVersions, EMBEDDING_ARTIFACT, EMBEDDING_KIND, ENTITY_ARTIFACT, ENTITY_KIND,
    TOPIC_ARTIFACT, TOPIC_KIND,
};

// ============================================================================
// Types
// ============================================================================

/// 질의 처리 단계 (건너뛸 수 없음)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    Embedded,
    TopicClassified,
    CandidatesRetrieved,
    AnswersSynthesized,
    Ranked,
    Returned,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::Received => "RECEIVED",
            QueryStage::Embedded => "EMBEDDED",
            QueryStage::TopicClassified => "TOPIC_CLASSIFIED",
            QueryStage::CandidatesRetrieved => "CANDIDATES_RETRIEVED",
            QueryStage::AnswersSynthesized => "ANSWERS_SYNTHESIZED",
            QueryStage::Ranked => "RANKED",
            QueryStage::Returned => "RETURNED",
        }
    }

    /// 다음 단계 (`Returned`가 마지막)
    pub fn next(self) -> Option<QueryStage> {
        match self {
            QueryStage::Received => Some(QueryStage::Embedded),
            QueryStage::Embedded => Some(QueryStage::TopicClassified),
            QueryStage::TopicClassified => Some(QueryStage::CandidatesRetrieved),
            QueryStage::CandidatesRetrieved => Some(QueryStage::AnswersSynthesized),
            QueryStage::AnswersSynthesized => Some(QueryStage::Ranked),
            QueryStage::Ranked => Some(QueryStage::Returned),
            QueryStage::Returned => None,
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 질의 결과 한 건
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(serialize_with = "serialize_article_ref")]
    pub article: Arc<Article>,
    /// 최종 점수 (0~1, 토픽/키워드/최신 가산 포함)
    pub score: f32,
    /// (cos + 1) / 2
    pub similarity: f32,
    /// 기사 토픽이 질의 토픽과 같은지
    pub topic_match: bool,
    /// 질의 키워드 등장 가산점
    pub keyword_boost: f32,
    /// 최신 기사 가산점 (후보 중 하나에만)
    pub recency_boost: f32,
    /// 추출형 직답 (없으면 빈 문자열)
    pub direct_answer: String,
    pub key_facts: Vec<String>,
    /// 직답이 없을 때 보여줄 본문 첫 문장 또는 제목
    pub lead: String,
}

impl SearchResult {
    /// 보여줄 답변 (직답, 없으면 리드 문장)
    pub fn display_answer(&self) -> &str {
        if self.direct_answer.is_empty() {
            &self.lead
        } else {
            &self.direct_answer
        }
    }
}

/// 결과 직렬화용 기사 요약 (본문/임베딩 제외)
#[derive(Serialize)]
struct ArticleRef<'a> {
    id: &'a str,
    source: &'a str,
    title: &'a str,
    published_on: Option<NaiveDate>,
    url: &'a str,
    topic: TopicLabel,
    topic_confidence: f32,
    entities: &'a [Entity],
}

fn serialize_article_ref<S: Serializer>(
    article: &Arc<Article>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    ArticleRef {
        id: &article.id,
        source: &article.source,
        title: &article.title,
        published_on: article.published_on,
        url: &article.url,
        topic: article.analysis.topic,
        topic_confidence: article.analysis.topic_confidence,
        entities: &article.analysis.entities,
    }
    .serialize(serializer)
}

/// 단일 기사 수집 결과
#[derive(Debug, Clone)]
pub struct Ingested {
    pub article: Article,
    /// 이미 저장된 기사였는지 (저장된 레코드를 그대로 반환)
    pub duplicate: bool,
}

/// 배치 내 실패 기사
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    /// 배치 내 위치 (0-based)
    pub position: usize,
    pub url: String,
    pub reason: String,
}

/// 수집 배치 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub failures: Vec<IngestFailure>,
    /// 배치 반영 후 인덱스 크기
    pub index_size: usize,
}

/// 헬스 체크
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub embedding_model_loaded: bool,
    pub classifier_loaded: bool,
    pub index_size: usize,
    pub model_versions: ModelVersions,
}

/// 재학습 결과
#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    pub articles: usize,
    pub embedding_version: String,
    pub topic_version: Option<String>,
    /// 약한 라벨 분포
    pub weak_labels: BTreeMap<TopicLabel, usize>,
}

/// 서비스 중인 모델 + 인덱스 (항상 함께 교체)
struct ServingState {
    models: Arc<ModelSet>,
    index: IndexSnapshot,
}

// ============================================================================
// NewsEngine
// ============================================================================

/// 뉴스 질의응답 엔진
///
/// 여러 스레드에서 공유해 동시에 `answer`를 호출할 수 있습니다.
pub struct NewsEngine {
    config: EngineConfig,
    store: ArticleStore,
    cleaner: BodyCleaner,
    synthesizer: AnswerSynthesizer,
    serving: RwLock<Arc<ServingState>>,
    writer: Mutex<()>,
}

impl NewsEngine {
    /// 설정으로 엔진 열기
    ///
    /// 모델 로드, 저장소 열기, 저장소 전체로 인덱스 구성까지 수행합니다.
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let models = ModelSet::load(&config)?;
        let store = ArticleStore::open(&config.db_path())?;
        Self::with_parts(config, store, models)
    }

    /// 이미 준비된 저장소/모델로 엔진 구성
    pub fn with_parts(config: EngineConfig, store: ArticleStore, models: ModelSet) -> Result<Self> {
        let versions = models.versions();
        store.record_model_version(EMBEDDING_KIND, &versions.embedding)?;
        store.record_model_version(ENTITY_KIND, &versions.entity)?;
        if let Some(topic) = &versions.topic {
            store.record_model_version(TOPIC_KIND, topic)?;
        }

        let index = build_index(&store, models.embedder().dimension())?;
        tracing::info!("Similarity index built with {} articles", index.len());

        Ok(Self {
            cleaner: BodyCleaner::new()?,
            synthesizer: AnswerSynthesizer::new(config.max_key_facts)?,
            config,
            store,
            serving: RwLock::new(Arc::new(ServingState {
                models: Arc::new(models),
                index,
            })),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArticleStore {
        &self.store
    }

    /// 현재 스냅샷 (읽기 락은 Arc 복제 동안만 잡힘)
    fn snapshot(&self) -> Result<Arc<ServingState>> {
        self.serving
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|e| NewsError::Store(format!("Serving state lock error: {}", e)))
    }

    /// 새 스냅샷 발행 (포인터 교체)
    fn publish(&self, state: ServingState) -> Result<()> {
        let mut guard = self
            .serving
            .write()
            .map_err(|e| NewsError::Store(format!("Serving state lock error: {}", e)))?;
        *guard = Arc::new(state);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------------

    /// 기사 하나 수집 (크기 1 배치)
    ///
    /// 중복이면 저장된 기사를 `duplicate: true`로 반환합니다.
    pub fn ingest(&self, raw: RawArticle) -> Result<Ingested> {
        let mut outcomes = self.ingest_records(vec![raw])?;
        match outcomes.pop() {
            Some(outcome) => outcome,
            None => Err(NewsError::Ingestion("no article processed".to_string())),
        }
    }

    /// 기사 배치 수집
    ///
    /// 기사 단위 실패는 기록 후 건너뛰고, 나머지는 계속 처리합니다.
    /// 인덱스는 배치가 끝난 뒤 한 번만 재구성됩니다.
    pub fn ingest_batch(&self, raws: Vec<RawArticle>) -> Result<BatchReport> {
        let urls: Vec<String> = raws.iter().map(|r| r.url.clone()).collect();
        let outcomes = self.ingest_records(raws)?;

        let mut report = BatchReport::default();
        for (position, (outcome, url)) in outcomes.into_iter().zip(urls).enumerate() {
            match outcome {
                Ok(ingested) if ingested.duplicate => report.duplicates += 1,
                Ok(_) => report.inserted += 1,
                Err(e) => report.failures.push(IngestFailure {
                    position,
                    url,
                    reason: e.to_string(),
                }),
            }
        }
        report.index_size = self.snapshot()?.index.len();

        tracing::info!(
            "Ingestion batch done: {} inserted, {} duplicates, {} failed",
            report.inserted,
            report.duplicates,
            report.failures.len()
        );
        Ok(report)
    }

    /// 배치 처리 본체 (기사별 결과 + 배치 후 인덱스 교체)
    ///
    /// 치명적 에러(`ModelUnavailable`)만 배치를 중단시킵니다.
    fn ingest_records(&self, raws: Vec<RawArticle>) -> Result<Vec<Result<Ingested>>> {
        let _writer = self
            .writer
            .lock()
            .map_err(|e| NewsError::Store(format!("Writer lock error: {}", e)))?;

        let state = self.snapshot()?;
        let mut outcomes = Vec::with_capacity(raws.len());
        let mut added: Vec<Arc<Article>> = Vec::new();

        for raw in raws {
            let url = raw.url.clone();
            match self.ingest_one(&state.models, raw) {
                Ok(StoreOutcome::Inserted(article)) => {
                    tracing::debug!("Ingested article {} ({})", article.id, article.topic());
                    added.push(Arc::new(article.clone()));
                    outcomes.push(Ok(Ingested {
                        article,
                        duplicate: false,
                    }));
                }
                Ok(StoreOutcome::Duplicate(article)) => {
                    tracing::debug!("Duplicate article skipped: {} (stored as {})", url, article.id);
                    outcomes.push(Ok(Ingested {
                        article,
                        duplicate: true,
                    }));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping article {}: {}", url, e);
                    outcomes.push(Err(e));
                }
            }
        }

        if !added.is_empty() {
            let index = state.index.with_added(&added);
            self.publish(ServingState {
                models: Arc::clone(&state.models),
                index,
            })?;
        }

        Ok(outcomes)
    }

    fn ingest_one(&self, models: &ModelSet, raw: RawArticle) -> Result<StoreOutcome> {
        let new = self.prepare(raw)?;

        // 중복이면 모델을 돌리지 않음
        if let Some(existing) = self.store.find_duplicate(&new.url_key, &new.content_hash)? {
            return Ok(StoreOutcome::Duplicate(existing));
        }

        let analysis = models.analyze(&new.title, &new.body, self.config.embed_body_chars)?;
        self.store.insert(&new, &analysis)
    }

    /// 원본 레코드 검증/정규화
    fn prepare(&self, raw: RawArticle) -> Result<NewArticle> {
        let body = self.cleaner.clean(&raw.body);
        if body.is_empty() {
            return Err(NewsError::Ingestion(format!("empty body: {}", raw.url)));
        }

        let url = raw.url.trim().to_string();
        if url.is_empty() {
            return Err(NewsError::Ingestion("missing url".to_string()));
        }
        let url_key = normalize_url(&url)?;

        let id = raw
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let source = match raw.source.trim() {
            "" => "unknown".to_string(),
            s => s.to_string(),
        };

        Ok(NewArticle {
            id,
            source,
            title: raw.title.split_whitespace().collect::<Vec<_>>().join(" "),
            published_on: raw.date.as_deref().and_then(parse_publication_date),
            url,
            url_key,
            content_hash: content_hash(&body),
            body,
        })
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 질의 응답 (설정의 기본 결과 수)
    pub fn ask(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.answer(query, self.config.default_top_k)
    }

    /// 질의 응답
    ///
    /// 점수 내림차순 결과를 최대 `top_k`개 (`max_top_k`로 제한) 반환합니다.
    /// 인덱스가 비어 있으면 빈 목록입니다.
    pub fn answer(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let mut stage = QueryStage::Received;
        tracing::debug!(stage = %stage, "query: {:?}", query);

        let state = self.snapshot()?;
        let top_k = top_k.min(self.config.max_top_k);

        let query_vector = state.models.embed(query)?;
        stage = advance(stage, QueryStage::Embedded);

        let query_topic = state.models.classify(&query_vector);
        stage = advance(stage, QueryStage::TopicClassified);
        tracing::debug!(
            "query topic: {} ({:.2})",
            query_topic.label,
            query_topic.confidence
        );

        let pool = top_k.saturating_mul(self.config.candidate_factor);
        let candidates = state.index.nearest(&query_vector, pool);
        stage = advance(stage, QueryStage::CandidatesRetrieved);
        tracing::debug!("{} candidates from index of {}", candidates.len(), state.index.len());

        let keywords = query_keywords(query);
        let newest = newest_recent_candidate(
            &candidates,
            Utc::now().date_naive(),
            self.config.recency_window_days,
        );

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|candidate| {
                let answer = self.synthesizer.synthesize(query, &candidate.article);
                let topic_match = query_topic.label != TopicLabel::Other
                    && candidate.article.topic() == query_topic.label;

                let keyword_boost = if self.config.keyword_boost > 0.0 {
                    let matches = keyword_hits(&candidate.article.body, &keywords);
                    (matches as f32 * self.config.keyword_boost).min(self.config.max_keyword_boost)
                } else {
                    0.0
                };
                let recency_boost = if newest.as_deref() == Some(candidate.article.id.as_str()) {
                    self.config.recency_boost
                } else {
                    0.0
                };
                let topic_boost = if topic_match { self.config.topic_boost } else { 0.0 };

                let boost = topic_boost + keyword_boost + recency_boost;
                let score = if boost > 0.0 {
                    (candidate.similarity + boost).min(1.0)
                } else {
                    candidate.similarity
                };

                SearchResult {
                    lead: lead_sentence(&candidate.article),
                    article: candidate.article,
                    score,
                    similarity: candidate.similarity,
                    topic_match,
                    keyword_boost,
                    recency_boost,
                    direct_answer: answer.direct_answer,
                    key_facts: answer.key_facts,
                }
            })
            .collect();
        stage = advance(stage, QueryStage::AnswersSynthesized);

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| recency_then_id(&a.article, &b.article))
        });
        results.truncate(top_k);
        stage = advance(stage, QueryStage::Ranked);

        advance(stage, QueryStage::Returned);
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    /// 헬스 체크
    pub fn health(&self) -> Result<Health> {
        let state = self.snapshot()?;
        Ok(Health {
            embedding_model_loaded: true,
            classifier_loaded: state.models.classifier_loaded(),
            index_size: state.index.len(),
            model_versions: state.models.versions(),
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Article>> {
        self.store.get(id)
    }

    pub fn list(&self, limit: usize, topic: Option<TopicLabel>) -> Result<Vec<Article>> {
        self.store.list(limit, topic)
    }

    // ------------------------------------------------------------------------
    // Offline Retraining
    // ------------------------------------------------------------------------

    /// 저장된 코퍼스로 임베딩/토픽 모델 재학습
    ///
    /// 1. 임베딩 모델 IDF 가중치 학습
    /// 2. 키워드 규칙으로 약한 라벨링 후 토픽 센트로이드 학습
    /// 3. 전체 기사 재임베딩/재분류 (단일 트랜잭션)
    /// 4. 아티팩트 저장, 버전 기록
    /// 5. 새 모델 + 재구성 인덱스를 한 번에 교체
    ///
    /// 아티팩트는 임시 파일로 먼저 쓰고, DB 커밋 후 이름을 바꿉니다.
    /// 설정에 모델 경로가 지정되어 있으면 재학습 결과가 다음 시작 때 쓰이지 않으므로 거부합니다.
    pub fn retrain(&self) -> Result<RetrainReport> {
        if self.config.embedding_model.is_some() || self.config.topic_model.is_some() {
            return Err(NewsError::Config(
                "embedding_model/topic_model paths are configured; unset them to use retrained artifacts"
                    .to_string(),
            ));
        }

        let _writer = self
            .writer
            .lock()
            .map_err(|e| NewsError::Store(format!("Writer lock error: {}", e)))?;

        let state = self.snapshot()?;
        let articles = self.store.all_articles()?;
        if articles.is_empty() {
            tracing::info!("No articles stored, skipping retrain");
            let versions = state.models.versions();
            return Ok(RetrainReport {
                articles: 0,
                embedding_version: versions.embedding,
                topic_version: versions.topic,
                weak_labels: BTreeMap::new(),
            });
        }

        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        tracing::info!("Retraining models on {} articles", articles.len());

        let texts: Vec<String> = articles
            .iter()
            .map(|a| Article::embedding_text(&a.title, &a.body, self.config.embed_body_chars))
            .collect();

        let embedding_model = EmbeddingModel::fit(texts.as_slice(), format!("hash-idf-{}", stamp));
        let embedder = HashEmbedding::new(embedding_model.clone());
        let vectors = embedder.embed_batch(&texts)?;

        let mut weak_labels = BTreeMap::new();
        let samples: Vec<(Vec<f32>, TopicLabel)> = articles
            .iter()
            .zip(&vectors)
            .map(|(article, vector)| {
                let label = weak_label(&format!("{} {}", article.title, article.body));
                *weak_labels.entry(label).or_insert(0) += 1;
                (vector.clone(), label)
            })
            .collect();

        let classifier = TopicClassifier::train(&samples, &embedder, format!("centroid-{}", stamp))?;

        let mut updates = Vec::with_capacity(articles.len());
        let mut rebuilt = Vec::with_capacity(articles.len());
        for (mut article, vector) in articles.into_iter().zip(vectors) {
            let classification = classifier.classify(&vector);
            article.analysis = ArticleAnalysis {
                embedding: vector,
                topic: classification.label,
                topic_confidence: classification.confidence,
                entities: std::mem::take(&mut article.analysis.entities),
            };
            updates.push((article.id.clone(), article.analysis.clone()));
            rebuilt.push(Arc::new(article));
        }

        // 아티팩트 → DB(기사 + 버전) → 아티팩트 설치 순서
        let models_dir = self.config.models_dir();
        std::fs::create_dir_all(&models_dir)?;
        let staged = [
            (models_dir.join(EMBEDDING_ARTIFACT), staging_path(&models_dir, EMBEDDING_ARTIFACT)),
            (models_dir.join(TOPIC_ARTIFACT), staging_path(&models_dir, TOPIC_ARTIFACT)),
        ];
        let written = embedding_model
            .save(&staged[0].1)
            .and_then(|_| classifier.save(&staged[1].1));
        if let Err(e) = written {
            discard_staged(&staged);
            return Err(e);
        }

        let versions = [
            (EMBEDDING_KIND, embedding_model.version.as_str()),
            (TOPIC_KIND, classifier.version.as_str()),
        ];
        if let Err(e) = self.store.update_analysis_batch(&updates, &versions) {
            discard_staged(&staged);
            return Err(e);
        }

        for (target, temp) in &staged {
            std::fs::rename(temp, target).map_err(|e| {
                tracing::error!("Failed to install retrained artifact {:?}: {}", target, e);
                e
            })?;
        }

        let report = RetrainReport {
            articles: rebuilt.len(),
            embedding_version: embedding_model.version.clone(),
            topic_version: Some(classifier.version.clone()),
            weak_labels,
        };

        let models = ModelSet::new(
            Box::new(embedder),
            Some(classifier),
            state.models.extractor().clone(),
        );
        self.publish(ServingState {
            models: Arc::new(models),
            index: IndexSnapshot::build(rebuilt),
        })?;

        tracing::info!(
            "Retrain complete: embedding {}, topic {:?}",
            report.embedding_version,
            report.topic_version
        );
        Ok(report)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 저장소 전체로 인덱스 구성 (차원이 다른 임베딩은 제외)
fn build_index(store: &ArticleStore, dimension: usize) -> Result<IndexSnapshot> {
    let mut articles = Vec::new();
    for article in store.all_articles()? {
        if article.embedding().len() != dimension {
            tracing::warn!(
                "Article {} has embedding dimension {}, expected {}; run retrain",
                article.id,
                article.embedding().len(),
                dimension
            );
            continue;
        }
        articles.push(Arc::new(article));
    }
    Ok(IndexSnapshot::build(articles))
}

/// 본문(소문자)에 들어 있는 질의 키워드 수
fn keyword_hits(body: &str, keywords: &[String]) -> usize {
    let body = body.to_lowercase();
    keywords.iter().filter(|kw| body.contains(kw.as_str())).count()
}

/// 최근 `window_days`일 안에 발행된 후보 중 가장 최신 기사 id
///
/// 같은 날짜면 후보 순서(유사도 순)에서 앞선 기사입니다.
fn newest_recent_candidate(
    candidates: &[Neighbor],
    today: NaiveDate,
    window_days: i64,
) -> Option<String> {
    let mut newest: Option<(&NaiveDate, &str)> = None;
    for candidate in candidates {
        let Some(date) = candidate.article.published_on.as_ref() else {
            continue;
        };
        if (today - *date).num_days() > window_days {
            continue;
        }
        if newest.map_or(true, |(best, _)| date > best) {
            newest = Some((date, candidate.article.id.as_str()));
        }
    }
    newest.map(|(_, id)| id.to_string())
}

fn staging_path(models_dir: &Path, artifact: &str) -> PathBuf {
    models_dir.join(format!("{}.tmp", artifact))
}

fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (_, temp) in staged {
        if temp.exists() {
            if let Err(e) = std::fs::remove_file(temp) {
                tracing::warn!("Failed to remove staged artifact {:?}: {}", temp, e);
            }
        }
    }
}

/// 단계 전이 (순서 위반은 debug 빌드에서 검출)
fn advance(current: QueryStage, next: QueryStage) -> QueryStage {
    debug_assert_eq!(current.next(), Some(next), "query stage skipped");
    tracing::debug!(stage = %next, "query stage {} -> {}", current, next);
    next
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::BUILTIN_EMBEDDING_VERSION;
    use crate::extractor::EntityExtractor;
    use crate::knowledge::{EntityKind, EMBEDDING_DIMENSION};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn open_engine() -> (TempDir, NewsEngine) {
        let dir = TempDir::new().unwrap();
        let engine = NewsEngine::open(EngineConfig::with_data_dir(dir.path())).unwrap();
        (dir, engine)
    }

    fn raw(url: &str, title: &str, body: &str) -> RawArticle {
        RawArticle {
            id: None,
            source: "reuters".to_string(),
            title: title.to_string(),
            date: Some("2025-12-20".to_string()),
            url: url.to_string(),
            body: body.to_string(),
        }
    }

    fn opec_article() -> RawArticle {
        raw(
            "https://www.reuters.com/business/energy/opec-cuts",
            "OPEC+ Maintains Production Cuts",
            "OPEC+ agreed to extend production cuts through Q1 2026, keeping output reduced by \
             2.2 million bpd. Saudi Arabia leads voluntary cuts.",
        )
    }

    fn corpus() -> Vec<RawArticle> {
        vec![
            opec_article(),
            raw(
                "https://oilprice.com/brent-rally",
                "Brent Crude Rallies on Supply Fears",
                "Brent crude futures rose 3% to $82 per barrel as traders weighed tighter supply. \
                 WTI also gained on the day.",
            ),
            raw(
                "https://lngworld.com/qatar-lng",
                "Qatar Ships Record LNG Cargoes",
                "QatarEnergy shipped a record number of LNG cargoes to Europe through the new \
                 pipeline and export terminal expansion.",
            ),
            raw(
                "https://boereport.com/chevron-hess",
                "Chevron Completes Hess Acquisition",
                "Chevron completed its $53 billion acquisition of Hess, gaining a stake in Guyana. \
                 The merger reshapes the company's upstream portfolio.",
            ),
        ]
    }

    #[test]
    fn test_query_stage_sequence() {
        let mut stage = QueryStage::Received;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.last(), Some(&QueryStage::Returned));
    }

    #[test]
    fn test_empty_index_returns_empty_list() {
        let (_dir, engine) = open_engine();
        let results = engine.answer("What is the latest OPEC decision?", 5).unwrap();
        assert!(results.is_empty());
        assert_eq!(engine.health().unwrap().index_size, 0);
    }

    #[test]
    fn test_ingest_opec_scenario() {
        let (_dir, engine) = open_engine();
        let ingested = engine.ingest(opec_article()).unwrap();
        assert!(!ingested.duplicate);

        let article = ingested.article;
        assert_eq!(article.embedding().len(), EMBEDDING_DIMENSION);
        assert!(matches!(
            article.topic(),
            TopicLabel::Geopolitics | TopicLabel::Regulation
        ));
        assert!(article.analysis.topic_confidence > 0.5);
        assert!(article
            .analysis
            .entities
            .iter()
            .any(|e| e.normalized == "OPEC+" && e.kind == EntityKind::Organization));
        assert!(article
            .analysis
            .entities
            .iter()
            .any(|e| e.normalized == "Saudi Arabia" && e.kind == EntityKind::Location));
        assert_eq!(article.published_on, chrono::NaiveDate::from_ymd_opt(2025, 12, 20));
    }

    #[test]
    fn test_opec_query_scenario() {
        let (_dir, engine) = open_engine();
        let report = engine.ingest_batch(corpus()).unwrap();
        assert_eq!(report.inserted, 4);
        assert_eq!(report.index_size, 4);

        let results = engine.answer("What is the latest OPEC decision?", 5).unwrap();
        assert!(!results.is_empty());

        let top = &results[0];
        assert_eq!(top.article.title, "OPEC+ Maintains Production Cuts");
        assert!(top.score > 0.5);
        assert!(top.direct_answer.contains("production cuts"));
    }

    #[test]
    fn test_scores_non_increasing() {
        let (_dir, engine) = open_engine();
        engine.ingest_batch(corpus()).unwrap();

        for query in ["Brent price", "LNG exports", "Chevron deal", "OPEC output"] {
            let results = engine.answer(query, 5).unwrap();
            for pair in results.windows(2) {
                assert!(pair[0].score >= pair[1].score, "query {:?}", query);
            }
            assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        }
    }

    #[test]
    fn test_no_matching_terms_query() {
        let (_dir, engine) = open_engine();
        engine.ingest_batch(corpus()).unwrap();

        let results = engine.answer("zebra giraffe symphony", 5).unwrap();
        assert!(results.len() <= 5);
        for result in &results {
            assert!(result.direct_answer.is_empty());
            assert!(result.key_facts.is_empty());
            assert!(!result.display_answer().is_empty());
        }
    }

    #[test]
    fn test_top_k_limits() {
        let (_dir, engine) = open_engine();
        engine.ingest_batch(corpus()).unwrap();

        assert_eq!(engine.answer("oil", 2).unwrap().len(), 2);
        assert!(engine.answer("oil", 0).unwrap().is_empty());
        assert_eq!(engine.answer("oil", 1000).unwrap().len(), 4);
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let (_dir, engine) = open_engine();
        let first = engine.ingest(opec_article()).unwrap();
        let second = engine.ingest(opec_article()).unwrap();

        assert!(second.duplicate);
        assert_eq!(first.article.id, second.article.id);
        assert_eq!(engine.stats().unwrap().article_count, 1);
        assert_eq!(engine.health().unwrap().index_size, 1);
    }

    #[test]
    fn test_same_normalized_url_different_capitalization() {
        let (_dir, engine) = open_engine();
        let mut a = opec_article();
        let mut b = opec_article();
        a.url = "https://www.reuters.com/business/energy/opec-cuts/".to_string();
        b.url = "http://reuters.com/business/energy/opec-cuts?utm_source=rss".to_string();
        b.body = b.body.to_uppercase();

        let report = engine.ingest_batch(vec![a, b]).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(engine.stats().unwrap().article_count, 1);
    }

    #[test]
    fn test_bad_article_does_not_abort_batch() {
        let (_dir, engine) = open_engine();
        let mut batch = corpus();
        batch.insert(1, raw("https://example.com/empty", "Empty", "   "));
        batch.insert(2, raw("not a url", "Broken", "Some body text here."));

        let report = engine.ingest_batch(batch).unwrap();
        assert_eq!(report.inserted, 4);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].position, 1);
        assert_eq!(report.failures[1].position, 2);

        let err = engine
            .ingest(raw("https://example.com/empty2", "Empty", "<p> </p>"))
            .unwrap_err();
        assert!(matches!(err, NewsError::Ingestion(_)));
        assert_eq!(engine.stats().unwrap().article_count, 4);
    }

    #[test]
    fn test_oversized_body_stored_with_empty_entities() {
        let (_dir, engine) = open_engine();
        let body = format!("OPEC+ met in Vienna. {}", "filler words ".repeat(200_000));
        let ingested = engine
            .ingest(raw("https://example.com/huge", "Huge", &body))
            .unwrap();
        assert!(ingested.article.analysis.entities.is_empty());
        assert_eq!(ingested.article.embedding().len(), EMBEDDING_DIMENSION);
    }

    #[test]
    fn test_stats_and_health() {
        let (_dir, engine) = open_engine();
        engine.ingest_batch(corpus()).unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.article_count, 4);
        assert_eq!(stats.topic_distribution.values().sum::<usize>(), 4);
        assert!(stats.last_ingestion_time.is_some());

        let health = engine.health().unwrap();
        assert!(health.embedding_model_loaded);
        assert!(health.classifier_loaded);
        assert_eq!(health.index_size, 4);
    }

    #[test]
    fn test_reopen_rebuilds_index_from_store() {
        let dir = TempDir::new().unwrap();
        {
            let engine = NewsEngine::open(EngineConfig::with_data_dir(dir.path())).unwrap();
            engine.ingest_batch(corpus()).unwrap();
        }

        let engine = NewsEngine::open(EngineConfig::with_data_dir(dir.path())).unwrap();
        assert_eq!(engine.health().unwrap().index_size, 4);
        let results = engine.answer("What is the latest OPEC decision?", 1).unwrap();
        assert_eq!(results[0].article.title, "OPEC+ Maintains Production Cuts");
    }

    /// "brent"가 들어간 텍스트는 x축, 나머지는 z축으로 보내는 3차원 임베딩
    struct AxisEmbedding;

    impl EmbeddingProvider for AxisEmbedding {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.to_lowercase().contains("brent") {
                Ok(vec![1.0, 0.0, 0.0])
            } else {
                Ok(vec![0.0, 0.0, 1.0])
            }
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "axis"
        }

        fn version(&self) -> &str {
            "axis-test"
        }
    }

    /// 유사도는 a-prod(0.95) > b-price(0.90)이지만
    /// b-price만 질의 토픽(price_market), 질의 키워드, 최근 날짜를 가짐
    fn axis_engine(config: EngineConfig) -> NewsEngine {
        let store = ArticleStore::open(&config.db_path()).unwrap();
        let today = Utc::now().date_naive();
        let rows = [
            (
                "a-prod",
                "Field output",
                "Output climbed at the field.",
                vec![0.9, 0.435_889_9, 0.0],
                TopicLabel::Production,
                today - chrono::Duration::days(30),
            ),
            (
                "b-price",
                "Market move",
                "Brent futures moved sharply.",
                vec![0.8, 0.6, 0.0],
                TopicLabel::PriceMarket,
                today,
            ),
        ];
        for (id, title, body, embedding, topic, date) in rows {
            let new = NewArticle {
                id: id.to_string(),
                source: "test".to_string(),
                title: title.to_string(),
                published_on: Some(date),
                url: format!("https://example.com/{}", id),
                url_key: format!("example.com/{}", id),
                content_hash: content_hash(body),
                body: body.to_string(),
            };
            let analysis = ArticleAnalysis {
                embedding,
                topic,
                topic_confidence: 0.9,
                entities: Vec::new(),
            };
            store.insert(&new, &analysis).unwrap();
        }

        let mut centroids = HashMap::new();
        for label in TopicLabel::TOPICAL {
            centroids.insert(label, vec![0.0, 0.0, 1.0]);
        }
        centroids.insert(TopicLabel::PriceMarket, vec![1.0, 0.0, 0.0]);
        centroids.insert(TopicLabel::Production, vec![0.0, 1.0, 0.0]);
        let classifier = TopicClassifier {
            version: "axis-topic".to_string(),
            temperature: 0.05,
            other_threshold: 0.05,
            centroids,
        };

        let models = ModelSet::new(
            Box::new(AxisEmbedding),
            Some(classifier),
            EntityExtractor::builtin().unwrap(),
        );
        NewsEngine::with_parts(config, store, models).unwrap()
    }

    fn ranked_ids(engine: &NewsEngine, query: &str) -> Vec<String> {
        engine
            .answer(query, 2)
            .unwrap()
            .iter()
            .map(|r| r.article.id.clone())
            .collect()
    }

    #[test]
    fn test_no_boosts_rank_by_similarity() {
        let dir = TempDir::new().unwrap();
        let engine = axis_engine(EngineConfig::with_data_dir(dir.path()));

        let results = engine.answer("brent futures", 2).unwrap();
        assert_eq!(results[0].article.id, "a-prod");
        assert_eq!(results[1].article.id, "b-price");
        assert!(results[1].topic_match);
        for result in &results {
            assert_eq!(result.score, result.similarity);
            assert_eq!(result.keyword_boost, 0.0);
            assert_eq!(result.recency_boost, 0.0);
        }
    }

    #[test]
    fn test_topic_boost_lifts_matching_topic_above_closer_article() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.topic_boost = 0.1;
        let engine = axis_engine(config);

        assert_eq!(ranked_ids(&engine, "brent"), vec!["b-price", "a-prod"]);

        let results = engine.answer("brent", 2).unwrap();
        assert!(results[0].topic_match);
        assert!(results[0].score > results[0].similarity);
        assert!(!results[1].topic_match);
        assert_eq!(results[1].score, results[1].similarity);
    }

    #[test]
    fn test_keyword_boost_lifts_article_containing_query_terms() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.keyword_boost = 0.05;
        let engine = axis_engine(config);

        let results = engine.answer("brent futures", 2).unwrap();
        assert_eq!(results[0].article.id, "b-price");
        assert!((results[0].keyword_boost - 0.10).abs() < 1e-6);
        assert_eq!(results[1].keyword_boost, 0.0);
        assert_eq!(results[0].recency_boost, 0.0);
    }

    #[test]
    fn test_keyword_boost_is_capped() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.keyword_boost = 0.5;
        config.max_keyword_boost = 0.02;
        let engine = axis_engine(config);

        // 상한 0.02로는 0.05 차이를 뒤집지 못함
        let results = engine.answer("brent futures", 2).unwrap();
        assert_eq!(results[0].article.id, "a-prod");
        assert!((results[1].keyword_boost - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_recency_boost_lifts_newest_recent_article() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.recency_boost = 0.1;
        let engine = axis_engine(config);

        let results = engine.answer("brent", 2).unwrap();
        assert_eq!(results[0].article.id, "b-price");
        assert_eq!(results[0].recency_boost, 0.1);
        // 30일 지난 기사는 대상 아님
        assert_eq!(results[1].recency_boost, 0.0);
    }

    #[test]
    fn test_concurrent_queries_during_ingestion() {
        let (_dir, engine) = open_engine();
        engine.ingest(opec_article()).unwrap();

        std::thread::scope(|s| {
            let writer = s.spawn(|| engine.ingest_batch(corpus()).unwrap());

            let readers: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        for _ in 0..10 {
                            let results = engine.answer("OPEC production cuts", 5).unwrap();
                            // 어느 스냅샷이든 OPEC 기사는 이미 들어 있음
                            assert!(!results.is_empty());
                            assert!(results.len() <= 4);
                        }
                    })
                })
                .collect();

            for reader in readers {
                reader.join().unwrap();
            }
            let report = writer.join().unwrap();
            assert_eq!(report.duplicates, 1);
        });

        assert_eq!(engine.health().unwrap().index_size, 4);
    }

    #[test]
    fn test_retrain_swaps_models_and_keeps_corpus() {
        let (dir, engine) = open_engine();
        engine.ingest_batch(corpus()).unwrap();
        let before = engine.health().unwrap().model_versions;

        let report = engine.retrain().unwrap();
        assert_eq!(report.articles, 4);
        assert!(report.embedding_version.starts_with("hash-idf-"));
        assert_eq!(report.weak_labels.values().sum::<usize>(), 4);

        let health = engine.health().unwrap();
        assert_ne!(health.model_versions.embedding, before.embedding);
        assert_eq!(health.model_versions.entity, before.entity);
        assert_eq!(health.index_size, 4);
        assert_eq!(engine.stats().unwrap().article_count, 4);

        let versions = engine.store().model_versions().unwrap();
        assert!(versions
            .iter()
            .any(|v| v.kind == EMBEDDING_KIND && v.version == report.embedding_version));
        assert!(dir.path().join("models").join(EMBEDDING_ARTIFACT).is_file());
        assert!(dir.path().join("models").join(TOPIC_ARTIFACT).is_file());

        // 재학습 후에도 질의는 정상 동작
        let results = engine.answer("What is the latest OPEC decision?", 3).unwrap();
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.article.embedding().len() == EMBEDDING_DIMENSION));
    }

    #[test]
    fn test_failed_artifact_write_leaves_store_and_models_untouched() {
        let (dir, engine) = open_engine();
        engine.ingest_batch(corpus()).unwrap();
        let before = engine.list(10, None).unwrap();

        // models 디렉토리 자리에 파일이 있으면 아티팩트를 쓸 수 없음
        std::fs::write(dir.path().join("models"), "not a directory").unwrap();
        assert!(engine.retrain().is_err());

        for article in &before {
            let stored = engine.get(&article.id).unwrap().unwrap();
            assert_eq!(stored.embedding(), article.embedding());
            assert_eq!(stored.topic(), article.topic());
        }
        let versions = engine.store().model_versions().unwrap();
        assert!(versions
            .iter()
            .any(|v| v.kind == EMBEDDING_KIND && v.version == BUILTIN_EMBEDDING_VERSION));
        assert_eq!(
            engine.health().unwrap().model_versions.embedding,
            BUILTIN_EMBEDDING_VERSION
        );
        drop(engine);

        // 다시 열어도 저장된 벡터와 서비스 모델이 일치
        std::fs::remove_file(dir.path().join("models")).unwrap();
        let reopened = NewsEngine::open(EngineConfig::with_data_dir(dir.path())).unwrap();
        assert_eq!(
            reopened.health().unwrap().model_versions.embedding,
            BUILTIN_EMBEDDING_VERSION
        );
        let models = ModelSet::load(reopened.config()).unwrap();
        for article in &before {
            let text = Article::embedding_text(&article.title, &article.body, 1000);
            assert_eq!(models.embed(&text).unwrap(), article.embedding());
        }
    }

    #[test]
    fn test_retrain_refused_when_model_paths_configured() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("pinned-embedding.json");
        EmbeddingModel::builtin().save(&model_path).unwrap();

        let mut config = EngineConfig::with_data_dir(dir.path());
        config.embedding_model = Some(model_path);
        let engine = NewsEngine::open(config).unwrap();
        engine.ingest_batch(corpus()).unwrap();
        let before = engine.list(10, None).unwrap();

        let err = engine.retrain().unwrap_err();
        assert!(matches!(err, NewsError::Config(_)));
        assert!(!dir.path().join("models").join(EMBEDDING_ARTIFACT).exists());
        for article in &before {
            let stored = engine.get(&article.id).unwrap().unwrap();
            assert_eq!(stored.embedding(), article.embedding());
        }
    }

    #[test]
    fn test_retrain_leaves_no_staged_files() {
        let (dir, engine) = open_engine();
        engine.ingest_batch(corpus()).unwrap();
        engine.retrain().unwrap();

        let models_dir = dir.path().join("models");
        assert!(!staging_path(&models_dir, EMBEDDING_ARTIFACT).exists());
        assert!(!staging_path(&models_dir, TOPIC_ARTIFACT).exists());
    }

    #[test]
    fn test_retrain_on_empty_store_is_noop() {
        let (_dir, engine) = open_engine();
        let report = engine.retrain().unwrap();
        assert_eq!(report.articles, 0);
        assert!(report.weak_labels.is_empty());
    }

    #[test]
    fn test_search_result_serializes_without_body() {
        let (_dir, engine) = open_engine();
        engine.ingest(opec_article()).unwrap();

        let results = engine.answer("OPEC decision", 1).unwrap();
        let json = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(json["article"]["title"], "OPEC+ Maintains Production Cuts");
        assert!(json["article"].get("body").is_none());
        assert!(json["article"].get("embedding").is_none());
        assert!(json["score"].as_f64().unwrap() > 0.0);
    }
}
