//! Article Store - rusqlite 기반 동기 기사 저장소
//!
//! 처리 완료된 기사(파생 필드 포함)와 모델 아티팩트 버전을 저장합니다.
//! 유사도 인덱스는 언제든 이 테이블에서 다시 만들 수 있습니다.
//! 저장 위치: ~/.oilnews-rag/news.db

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{NewsError, Result};

use super::article::{Article, ArticleAnalysis, Entity, NewArticle, TopicLabel};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.oilnews-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".oilnews-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 저장 결과
#[derive(Debug, Clone)]
pub enum StoreOutcome {
    /// 새로 저장됨
    Inserted(Article),
    /// 같은 URL 또는 본문이 이미 있음 (기존 레코드)
    Duplicate(Article),
}

impl StoreOutcome {
    pub fn article(&self) -> &Article {
        match self {
            StoreOutcome::Inserted(a) | StoreOutcome::Duplicate(a) => a,
        }
    }

    pub fn into_article(self) -> Article {
        match self {
            StoreOutcome::Inserted(a) | StoreOutcome::Duplicate(a) => a,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreOutcome::Duplicate(_))
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub article_count: usize,
    pub topic_distribution: BTreeMap<TopicLabel, usize>,
    pub last_ingestion_time: Option<DateTime<Utc>>,
    pub db_path: PathBuf,
}

/// 모델 아티팩트 버전 레코드
#[derive(Debug, Clone, Serialize)]
pub struct ModelVersion {
    pub kind: String,
    pub version: String,
    pub updated_at: DateTime<Utc>,
}

const UPSERT_MODEL_VERSION: &str =
    "INSERT INTO model_versions (kind, version, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(kind) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at";

const ARTICLE_COLUMNS: &str = "id, source, title, published_on, url, body, \
     embedding, topic, topic_confidence, entities, ingested_at";

// ============================================================================
// ArticleStore
// ============================================================================

/// Article Store - 동기 기사 저장소
///
/// 기사는 파생 필드와 함께 한 행으로만 들어가므로 부분 처리 상태가 보이지 않습니다.
pub struct ArticleStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ArticleStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NewsError::Store(format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                url_key TEXT NOT NULL UNIQUE,
                content_hash TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                published_on TEXT,
                body TEXT NOT NULL,
                embedding BLOB NOT NULL,
                topic TEXT NOT NULL,
                topic_confidence REAL NOT NULL,
                entities TEXT NOT NULL,
                ingested_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_articles_topic ON articles(topic);
            CREATE INDEX IF NOT EXISTS idx_articles_ingested ON articles(ingested_at);

            CREATE TABLE IF NOT EXISTS model_versions (
                kind TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        tracing::debug!("Article store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 처리 완료된 기사 저장
    ///
    /// 정규화 URL 또는 본문 해시가 같은 기사가 이미 있으면 저장하지 않고 기존 레코드를 돌려줍니다.
    pub fn insert(&self, new: &NewArticle, analysis: &ArticleAnalysis) -> Result<StoreOutcome> {
        let conn = self.lock()?;

        if let Some(existing) = find_duplicate(&conn, &new.url_key, &new.content_hash)? {
            return Ok(StoreOutcome::Duplicate(existing));
        }

        let ingested_at = Utc::now();
        let entities = serde_json::to_string(&analysis.entities)?;

        conn.execute(
            "INSERT INTO articles (id, url, url_key, content_hash, source, title, published_on,
                                   body, embedding, topic, topic_confidence, entities, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                new.id,
                new.url,
                new.url_key,
                new.content_hash,
                new.source,
                new.title,
                new.published_on.map(|d| d.to_string()),
                new.body,
                encode_embedding(&analysis.embedding),
                analysis.topic.as_str(),
                analysis.topic_confidence as f64,
                entities,
                ingested_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!("Stored article {} ({})", new.id, new.url_key);

        Ok(StoreOutcome::Inserted(Article {
            id: new.id.clone(),
            source: new.source.clone(),
            title: new.title.clone(),
            published_on: new.published_on,
            url: new.url.clone(),
            body: new.body.clone(),
            analysis: analysis.clone(),
            ingested_at,
        }))
    }

    /// 중복 후보 조회 (정규화 URL 또는 본문 해시)
    pub fn find_duplicate(&self, url_key: &str, content_hash: &str) -> Result<Option<Article>> {
        let conn = self.lock()?;
        find_duplicate(&conn, url_key, content_hash)
    }

    /// ID로 기사 조회
    pub fn get(&self, id: &str) -> Result<Option<Article>> {
        let conn = self.lock()?;

        let article = conn
            .query_row(
                &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
                params![id],
                row_to_article,
            )
            .optional()?;

        Ok(article)
    }

    /// 최근 수집 순 기사 목록
    pub fn list(&self, limit: usize, topic: Option<TopicLabel>) -> Result<Vec<Article>> {
        let conn = self.lock()?;

        let articles = if let Some(topic) = topic {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM articles WHERE topic = ?1
                 ORDER BY ingested_at DESC, id LIMIT ?2",
                ARTICLE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![topic.as_str(), limit as i64], row_to_article)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM articles ORDER BY ingested_at DESC, id LIMIT ?1",
                ARTICLE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![limit as i64], row_to_article)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(articles)
    }

    /// 전체 기사 (인덱스 재구축/재학습용)
    pub fn all_articles(&self) -> Result<Vec<Article>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM articles ORDER BY ingested_at, id",
            ARTICLE_COLUMNS
        ))?;
        let articles = stmt
            .query_map([], row_to_article)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(articles)
    }

    /// 파생 필드 일괄 갱신 + 모델 버전 기록 (단일 트랜잭션)
    ///
    /// 중간에 실패하면 기사와 버전 모두 바뀌지 않습니다.
    pub fn update_analysis_batch(
        &self,
        updates: &[(String, ArticleAnalysis)],
        versions: &[(&str, &str)],
    ) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE articles SET embedding = ?1, topic = ?2, topic_confidence = ?3, entities = ?4
                 WHERE id = ?5",
            )?;

            for (id, analysis) in updates {
                updated += stmt.execute(params![
                    encode_embedding(&analysis.embedding),
                    analysis.topic.as_str(),
                    analysis.topic_confidence as f64,
                    serde_json::to_string(&analysis.entities)?,
                    id,
                ])?;
            }

            let now = Utc::now().to_rfc3339();
            for &(kind, version) in versions {
                tx.execute(UPSERT_MODEL_VERSION, params![kind, version, now])?;
            }
        }

        tx.commit()?;
        tracing::info!("Updated analysis for {} articles", updated);
        Ok(updated)
    }

    /// 기사 수
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;

        let mut topic_distribution = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT topic, COUNT(*) FROM articles GROUP BY topic")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (topic, n) = row?;
            let label = topic.parse::<TopicLabel>().unwrap_or(TopicLabel::Other);
            *topic_distribution.entry(label).or_insert(0) += n as usize;
        }

        let last: Option<String> =
            conn.query_row("SELECT MAX(ingested_at) FROM articles", [], |row| row.get(0))?;

        Ok(StoreStats {
            article_count: count as usize,
            topic_distribution,
            last_ingestion_time: last.and_then(|s| parse_datetime(&s)),
            db_path: self.db_path.clone(),
        })
    }

    /// 모델 아티팩트 버전 기록 (kind별 최신 하나)
    pub fn record_model_version(&self, kind: &str, version: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            UPSERT_MODEL_VERSION,
            params![kind, version, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// 기록된 모델 버전 목록
    pub fn model_versions(&self) -> Result<Vec<ModelVersion>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT kind, version, updated_at FROM model_versions ORDER BY kind")?;

        let versions = stmt
            .query_map([], |row| {
                Ok(ModelVersion {
                    kind: row.get(0)?,
                    version: row.get(1)?,
                    updated_at: parse_datetime(&row.get::<_, String>(2)?).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(versions)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn find_duplicate(conn: &Connection, url_key: &str, content_hash: &str) -> Result<Option<Article>> {
    let article = conn
        .query_row(
            &format!(
                "SELECT {} FROM articles WHERE url_key = ?1 OR content_hash = ?2 LIMIT 1",
                ARTICLE_COLUMNS
            ),
            params![url_key, content_hash],
            row_to_article,
        )
        .optional()?;
    Ok(article)
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<Article> {
    let published_on: Option<String> = row.get(3)?;
    let embedding: Vec<u8> = row.get(6)?;
    let topic: String = row.get(7)?;
    let confidence: f64 = row.get(8)?;
    let entities: String = row.get(9)?;
    let ingested_at: String = row.get(10)?;

    let topic = topic
        .parse::<TopicLabel>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    let entities: Vec<Entity> = serde_json::from_str(&entities)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(Article {
        id: row.get(0)?,
        source: row.get(1)?,
        title: row.get(2)?,
        published_on: published_on
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        url: row.get(4)?,
        body: row.get(5)?,
        analysis: ArticleAnalysis {
            embedding: decode_embedding(&embedding),
            topic,
            topic_confidence: confidence as f32,
            entities,
        },
        ingested_at: parse_datetime(&ingested_at).unwrap_or_else(Utc::now),
    })
}

/// f32 벡터를 little-endian 바이트로
fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// ============================================================================
// Tests
// ============================================================================
