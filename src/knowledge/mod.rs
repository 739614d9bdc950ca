//! Knowledge 모듈 - 기사 저장소와 유사도 인덱스
//!
//! - Article: 기사 레코드, 토픽/엔티티 타입, 중복 판정 키
//! - SQLite: 처리 완료된 기사와 모델 버전의 영구 저장
//! - Index: 저장소에서 언제든 재구축 가능한 불변 스냅샷 (정확한 선형 스캔)

mod article;
mod store;
mod vector;

// Re-exports
pub use article::{
    content_hash, normalize_url, Article, ArticleAnalysis, Entity, EntityKind, NewArticle,
    RawArticle, TopicLabel, EMBEDDING_DIMENSION,
};
pub use store::{get_data_dir, ArticleStore, ModelVersion, StoreOutcome, StoreStats};
pub use vector::{cosine_similarity, relevance, IndexSnapshot, Neighbor};

pub(crate) use vector::recency_then_id;
