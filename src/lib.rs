//! oilnews-rag - 오일/가스 뉴스 질의응답 엔진
//!
//! 스크래퍼가 모은 기사를 임베딩/토픽 분류/엔티티 추출로 처리해 SQLite에 저장하고,
//! 자연어 질문에 관련 기사와 추출형 답변을 랭킹해 돌려줍니다.
//!
//! ```text
//! RawArticle → feed (정리/날짜) → engine (임베딩 → 토픽 → 엔티티) → knowledge (저장/인덱스)
//! query      → engine (임베딩 → 토픽 → 후보 검색 → answer 합성 → 랭킹) → SearchResult
//! ```

pub mod answer;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod feed;
pub mod knowledge;

// Re-exports
pub use answer::{Answer, AnswerSynthesizer};
pub use classifier::{Classification, TopicClassifier};
pub use config::EngineConfig;
pub use embedding::{EmbeddingModel, EmbeddingProvider, HashEmbedding};
pub use engine::{
    BatchReport, Health, IngestFailure, Ingested, ModelSet, ModelVersions, NewsEngine,
    QueryStage, RetrainReport, SearchResult,
};
pub use error::{NewsError, Result};
pub use extractor::{EntityExtractor, EntityModel};
pub use feed::{parse_publication_date, BodyCleaner, FeedFormat, FeedReader};
pub use knowledge::{
    get_data_dir, Article, ArticleAnalysis, ArticleStore, Entity, EntityKind, IndexSnapshot,
    RawArticle, StoreStats, TopicLabel, EMBEDDING_DIMENSION,
};
