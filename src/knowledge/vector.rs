//! Similarity Index - 기사 임베딩 최근접 검색
//!
//! 불변 스냅샷 방식입니다. 쓰기 쪽은 새 스냅샷을 만들어 교체하고,
//! 읽기 쪽은 `Arc`만 복제해서 락 없이 검색합니다.
//! 기사 수천~수만 건 규모에서는 정확한 선형 스캔으로 충분합니다.

use std::cmp::Ordering;
use std::sync::Arc;

use super::article::Article;

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 코사인 유사도를 [0, 1] 관련도로 변환
pub fn relevance(a: &[f32], b: &[f32]) -> f32 {
    ((cosine_similarity(a, b) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// 동점 정렬: 최신 기사 우선 (날짜 없음은 가장 오래된 것으로), 그다음 id
pub(crate) fn recency_then_id(a: &Article, b: &Article) -> Ordering {
    b.published_on
        .cmp(&a.published_on)
        .then_with(|| a.id.cmp(&b.id))
}

// ============================================================================
// Index Snapshot
// ============================================================================

/// 검색 후보 (기사 + 관련도)
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub article: Arc<Article>,
    /// (cos + 1) / 2
    pub similarity: f32,
}

/// 유사도 인덱스 스냅샷
///
/// 생성 이후 변경되지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    entries: Vec<Arc<Article>>,
}

impl IndexSnapshot {
    /// 처리 완료된 기사 목록으로 인덱스 생성
    pub fn build(articles: Vec<Arc<Article>>) -> Self {
        Self { entries: articles }
    }

    /// 기존 항목 + 새 기사로 새 스냅샷 생성 (기존 스냅샷은 그대로)
    pub fn with_added(&self, added: &[Arc<Article>]) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + added.len());
        entries.extend(self.entries.iter().cloned());
        entries.extend(added.iter().cloned());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn articles(&self) -> &[Arc<Article>] {
        &self.entries
    }

    /// 질의 벡터와 가장 가까운 기사 최대 `k`개
    ///
    /// 관련도 내림차순, 동점이면 최신 기사 우선 후 id 순입니다.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|article| Neighbor {
                similarity: relevance(query, article.embedding()),
                article: Arc::clone(article),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| recency_then_id(&a.article, &b.article))
        });
        scored.truncate(k);
        scored
    }
}

// ============================================================================
// Tests
// ============================================================================
