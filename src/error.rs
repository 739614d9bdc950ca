//! 에러 타입 정의
//!
//! 파이프라인 전체에서 사용하는 에러 분류입니다.
//! - `ModelUnavailable`: 치명적 (모델 없이 질의/수집 불가)
//! - `Ingestion`: 기사 단위 복구 가능 (로그 후 건너뜀)
//! - `ExtractionFailure`: 로컬 복구 (빈 엔티티 집합으로 대체)
//!
//! 빈 코퍼스와 "답변 없음"은 에러가 아니라 정상 결과입니다.

use thiserror::Error;

/// 파이프라인 에러
#[derive(Error, Debug)]
pub enum NewsError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Entity extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NewsError {
    /// 프로세스가 더 이상 서비스할 수 없는 에러인지
    pub fn is_fatal(&self) -> bool {
        matches!(self, NewsError::ModelUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, NewsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_model_unavailable_is_fatal() {
        assert!(NewsError::ModelUnavailable("embedding".into()).is_fatal());
        assert!(!NewsError::Ingestion("empty body".into()).is_fatal());
        assert!(!NewsError::ExtractionFailure("too long".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = NewsError::Ingestion("empty body".to_string());
        assert_eq!(err.to_string(), "Ingestion error: empty body");
    }
}
